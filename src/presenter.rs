use std::fmt;

use crate::model::{Tag, TagFields, TagKey, TileId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Connection,
}

impl NotificationKind {
    pub fn caption(self) -> &'static str {
        match self {
            NotificationKind::Success => "Success",
            NotificationKind::Error => "Error",
            NotificationKind::Warning => "Warning",
            NotificationKind::Connection => "Connection",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub text: String,
}

impl Notification {
    pub fn new(kind: NotificationKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(NotificationKind::Success, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(NotificationKind::Error, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(NotificationKind::Warning, text)
    }

    pub fn connection(text: impl Into<String>) -> Self {
        Self::new(NotificationKind::Connection, text)
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.caption(), self.text)
    }
}

/// Everything the sync core asks of the display layer.
pub trait Presenter {
    fn render_tile(&mut self, tag: &Tag) -> TileId;
    fn remove_tile(&mut self, key: &TagKey);
    fn clear_tiles(&mut self);
    fn read_form_fields(&self) -> TagFields;
    fn populate_form(&mut self, tag: &Tag);
    fn show_notification(&mut self, notification: Notification);
}
