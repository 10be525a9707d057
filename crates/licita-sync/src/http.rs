//! HTTP page source for the live syndication feed.

use tracing::info;

use crate::SyncError;
use crate::mirror::{FeedPage, PageSource};

/// Walks the feed from a start URL, following each page's `rel="next"` link.
pub struct FeedPager {
    client: reqwest::Client,
    next_url: Option<String>,
}

impl FeedPager {
    pub fn new(start_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), start_url)
    }

    pub fn with_client(client: reqwest::Client, start_url: impl Into<String>) -> Self {
        Self {
            client,
            next_url: Some(start_url.into().trim().to_string()),
        }
    }

    /// URL the next call will fetch, if any.
    pub fn pending_url(&self) -> Option<&str> {
        self.next_url.as_deref()
    }
}

impl PageSource for FeedPager {
    async fn next_page(&mut self) -> Result<Option<FeedPage>, SyncError> {
        let Some(url) = self.next_url.take() else {
            return Ok(None);
        };

        info!(url = %url, "fetching feed page");
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SyncError::Server {
                url,
                status: status.as_u16(),
            });
        }

        let body = resp.bytes().await?.to_vec();
        let page = FeedPage::parse(url, body)?;
        self.next_url = page.next().map(str::to_string);
        info!(bytes = page.body.len(), next = ?self.next_url, "fetched feed page");
        Ok(Some(page))
    }
}
