//! The seam between the orchestrator and whatever actually fetches media.
//!
//! An [`Extractor`] resolves a URL to media, downloads it (merging streams if
//! the format asks for it) and reports progress over a bounded channel while
//! it works. The orchestrator only ever sees the events and the final result.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

pub mod progress;
pub mod ytdlp;

pub use progress::ProgressEvent;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Extraction(String),
    #[error("{0}")]
    Merge(String),
    #[error("Extraction was cancelled")]
    Cancelled,
    #[error("Tool not found: '{0}'")]
    ToolNotFound(String),
    #[error("File IO operation failed, error: '{0}'")]
    Io(#[from] std::io::Error),
    #[error("Could not parse extractor output: '{0}'")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    Video,
    Collection,
}

/// Position of a video inside the collection it was expanded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRef {
    pub title: String,
    /// 1-based, in playlist order.
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionEntry {
    pub url: String,
    pub title: Option<String>,
}

/// A listed collection, entries that are private or deleted are already dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub title: String,
    pub entries: Vec<CollectionEntry>,
    pub unavailable: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleOptions {
    pub download: bool,
    pub embed: bool,
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub format_expression: String,
    pub destination: PathBuf,
    pub subtitles: SubtitleOptions,
    pub collection: Option<CollectionRef>,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Name of the extractor (for logging)
    fn name(&self) -> &'static str;

    /// Lists the videos of a collection without downloading anything.
    async fn list_collection(&self, url: &str) -> Result<Collection>;

    /// Downloads a single video and returns the path of the final file.
    /// Progress goes to `progress`, `cancel` asks the extractor to stop early,
    /// in which case it returns `Error::Cancelled` once nothing runs anymore.
    async fn download(
        &self,
        request: &DownloadRequest,
        progress: mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> Result<PathBuf>;
}

const COLLECTION_LIST_PREFIXES: [&str; 5] = ["PL", "UU", "FL", "RD", "LL"];
const SUPPORTED_HOSTS: [&str; 2] = ["youtube.com", "youtu.be"];

/// Decides whether a URL points at a single video or at a collection.
/// A `list` parameter on a watch URL only counts when it names a real playlist.
pub fn classify(url: &str) -> ItemKind {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return ItemKind::Video;
    };
    if parsed.path().to_lowercase().contains("playlist") {
        return ItemKind::Collection;
    }
    let is_playlist_id = parsed.query_pairs().any(|(key, value)| {
        key == "list"
            && COLLECTION_LIST_PREFIXES
                .iter()
                .any(|prefix| value.starts_with(prefix))
    });
    if is_playlist_id {
        ItemKind::Collection
    } else {
        ItemKind::Video
    }
}

/// True for URLs of the hosts the batch front-end accepts.
pub fn is_supported_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_lowercase();
    SUPPORTED_HOSTS
        .iter()
        .any(|h| host == *h || host.ends_with(&format!(".{}", h)))
}

/// Canonical watch URL for a bare video id.
pub fn watch_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", id)
}
