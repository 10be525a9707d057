//! Mirror a paged feed into snapshot files.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use licita_core::{FeedHeader, SnapshotNaming};
use tracing::{debug, info};

use crate::SyncError;

/// One downloaded feed page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPage {
    pub url: String,
    pub body: Vec<u8>,
    pub header: FeedHeader,
}

impl FeedPage {
    /// Wrap a downloaded body, reading its header for the paging links.
    pub fn parse(url: impl Into<String>, body: Vec<u8>) -> Result<Self, SyncError> {
        let header = FeedHeader::scan(body.as_slice())?;
        Ok(Self {
            url: url.into(),
            body,
            header,
        })
    }

    pub fn next(&self) -> Option<&str> {
        self.header.next_link.as_deref()
    }
}

/// Supplies feed pages one at a time, following the `next` link.
#[allow(async_fn_in_trait)]
pub trait PageSource {
    /// The next page, or `None` once the chain is exhausted.
    async fn next_page(&mut self) -> Result<Option<FeedPage>, SyncError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorOptions {
    /// Stop after this many pages.
    pub max_pages: Option<usize>,
    /// Stop before following a `next` link containing this text.
    pub stop_marker: Option<String>,
    /// Stop at the first page whose `updated` is not after this instant.
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Exhausted,
    PageLimit,
    StopMarker,
    /// Reached a page no newer than `since`.
    UpToDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorStats {
    pub pages: usize,
    pub bytes: u64,
    pub files: Vec<PathBuf>,
    pub stop: StopReason,
}

/// Write every page from `source` into `out_dir` as
/// `<prefix>_<YYYYMMDD>_<HHMMSS>_<seq>.<ext>`, all stamped with `at`.
///
/// Each file is published atomically, so an interrupted mirror never leaves
/// a truncated snapshot behind.
pub async fn mirror<S: PageSource>(
    source: &mut S,
    out_dir: &Path,
    naming: &SnapshotNaming,
    options: &MirrorOptions,
    at: DateTime<Utc>,
) -> Result<MirrorStats, SyncError> {
    tokio::fs::create_dir_all(out_dir).await?;
    let mut stats = MirrorStats {
        pages: 0,
        bytes: 0,
        files: Vec::new(),
        stop: StopReason::Exhausted,
    };

    loop {
        if options.max_pages.is_some_and(|max| stats.pages >= max) {
            stats.stop = StopReason::PageLimit;
            break;
        }
        let Some(page) = source.next_page().await? else {
            break;
        };
        if let (Some(since), Some(updated)) = (options.since, page.header.updated)
            && updated <= since
        {
            info!(url = %page.url, %updated, %since, "page not newer than cursor, stopping");
            stats.stop = StopReason::UpToDate;
            break;
        }

        let seq = stats.pages as u32 + 1;
        let path = out_dir.join(naming.file_name(at, Some(seq)));
        let size = page.body.len() as u64;
        let next = page.next().map(str::to_string);
        write_page(path.clone(), page.body).await?;
        debug!(url = %page.url, path = %path.display(), bytes = size, "page mirrored");

        stats.pages += 1;
        stats.bytes += size;
        stats.files.push(path);

        match (next, options.stop_marker.as_deref()) {
            (None, _) => break,
            (Some(next), Some(marker)) if next.contains(marker) => {
                info!(next = %next, marker, "stop marker reached");
                stats.stop = StopReason::StopMarker;
                break;
            }
            _ => {}
        }
    }

    info!(
        pages = stats.pages,
        bytes = stats.bytes,
        stop = ?stats.stop,
        dir = %out_dir.display(),
        "mirror finished"
    );
    Ok(stats)
}

async fn write_page(path: PathBuf, body: Vec<u8>) -> Result<(), SyncError> {
    tokio::task::spawn_blocking(move || {
        licita_core::publish_atomically(&path, |w| w.write_all(&body))
    })
    .await
    .map_err(std::io::Error::other)??;
    Ok(())
}
