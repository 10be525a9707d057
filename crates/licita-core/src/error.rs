use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("snapshot directory unreadable: {path}")]
    DirectoryUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed XML stream: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML stream ended inside <{0}>")]
    Truncated(String),

    #[error("entry {id:?} dropped: {reason}")]
    InvalidEntry { id: String, reason: String },

    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),

    #[error("unknown timezone {0:?}")]
    InvalidTimezone(String),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
