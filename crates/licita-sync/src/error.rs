use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status} for {url}")]
    Server { url: String, status: u16 },
    #[error("feed page unreadable: {0}")]
    Feed(#[from] licita_core::FeedError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
