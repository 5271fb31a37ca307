use std::env;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::app::App;
use crate::config::ConfigLoader;

pub mod commands;

use self::commands::{ConvertArgs, GenArgs, TagArgs, UpdateArgs};

#[derive(Parser, Debug)]
#[command(
    name = "tagdash",
    version,
    about = "Terminal dashboard for RFID tags kept in sync with a tag server"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over TAGDASH_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Tag server `host[:port]`, overriding `server.host`
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Seconds a line-mode command waits for the server before failing
    #[arg(long, global = true, default_value_t = 15)]
    pub timeout: u64,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch the interactive tile dashboard (default)
    Tui,
    /// Print every tag the server knows and exit
    List,
    /// Ask the server to add a tag and wait for the confirmation
    Add(TagArgs),
    /// Ask the server to delete a tag and wait for the confirmation
    Delete(TagArgs),
    /// Replace a stored tag with edited fields
    Update(UpdateArgs),
    /// Print random demonstration tags as JSON lines
    Gen(GenArgs),
    /// Convert a binary string to upper-case hex
    Bin2hex(ConvertArgs),
    /// Convert a hex string to binary
    Hex2bin(ConvertArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var("TAGDASH_CONFIG", path);
    }

    let command = cli.command.unwrap_or(Commands::Tui);
    match command {
        Commands::Gen(args) => return commands::generate(args),
        Commands::Bin2hex(args) => return commands::bin_to_hex(args),
        Commands::Hex2bin(args) => return commands::hex_to_bin(args),
        _ => {}
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    let sink = match command {
        Commands::Tui => LogSink::File(paths.log_dir.join("tagdash.log")),
        _ => LogSink::Stderr,
    };
    init_tracing(&cli.log_level, &sink)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let mut config = loader.load_or_init()?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }

    let config = Arc::new(config);
    let wait = commands::Wait::seconds(cli.timeout);
    match command {
        Commands::Tui => {
            let mut app = App::new(config)?;
            app.run()
        }
        Commands::List => commands::list_tags(&config, wait),
        Commands::Add(args) => commands::add_tag(&config, wait, args),
        Commands::Delete(args) => commands::delete_tag(&config, wait, args),
        Commands::Update(args) => commands::update_tag(&config, wait, args),
        Commands::Gen(_) | Commands::Bin2hex(_) | Commands::Hex2bin(_) => Ok(()),
    }
}

enum LogSink {
    Stderr,
    /// The TUI owns the terminal, so logs go to a file.
    File(PathBuf),
}

fn init_tracing(level: &str, sink: &LogSink) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        match sink {
            LogSink::Stderr => fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init(),
            LogSink::File(path) => {
                let file = open_log(path)?;
                fmt()
                    .with_env_filter(env_filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .init()
            }
        }
        Ok(())
    })
    .map(|_| ())
}

fn open_log(path: &Path) -> Result<std::fs::File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))
}
