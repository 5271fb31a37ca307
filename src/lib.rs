pub mod app;
pub mod cli;
pub mod codec;
pub mod config;
pub mod connection;
pub mod filter;
pub mod fixtures;
pub mod model;
pub mod presenter;
pub mod store;
pub mod sync;
pub mod ui;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use model::{Tag, TagKey};
