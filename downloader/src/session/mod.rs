use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::extract::{classify, CollectionEntry, CollectionRef, ItemKind};

pub mod config;
pub mod orchestrator;
pub mod tracker;

pub use config::DownloadConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemState::Succeeded | ItemState::Failed | ItemState::Cancelled
        )
    }
}

/// One URL of a session. Collections are placeholders until they are
/// expanded into their videos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub id: Uuid,
    pub url: String,
    pub kind: ItemKind,
    pub state: ItemState,
    pub progress_percent: f64,
    pub error: Option<String>,
    pub output_path: Option<PathBuf>,
    pub title: Option<String>,
    pub collection: Option<CollectionRef>,
}

impl DownloadItem {
    pub fn new(url: &str) -> Self {
        let url = url.trim();
        DownloadItem {
            id: Uuid::new_v4(),
            url: url.to_owned(),
            kind: classify(url),
            state: ItemState::Pending,
            progress_percent: 0.0,
            error: None,
            output_path: None,
            title: None,
            collection: None,
        }
    }

    pub(crate) fn from_entry(entry: CollectionEntry, collection: CollectionRef) -> Self {
        DownloadItem {
            kind: ItemKind::Video,
            title: entry.title,
            collection: Some(collection),
            ..DownloadItem::new(&entry.url)
        }
    }

    /// Finished items count as complete for the overall progress, whatever the outcome.
    pub fn effective_percent(&self) -> f64 {
        if self.state.is_terminal() {
            100.0
        } else {
            self.progress_percent
        }
    }

    /// Title if known, the url otherwise.
    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
}

impl SessionState {
    pub fn is_finished(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Cancelled)
    }
}

/// Terminal result of a single item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded(PathBuf),
    Failed(String),
    Cancelled,
}

impl Outcome {
    pub fn state(&self) -> ItemState {
        match self {
            Outcome::Succeeded(_) => ItemState::Succeeded,
            Outcome::Failed(_) => ItemState::Failed,
            Outcome::Cancelled => ItemState::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub pending: usize,
    pub running: usize,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.cancelled + self.pending + self.running
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.total()
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} succeeded, {} failed, {} cancelled",
            self.succeeded,
            self.total(),
            self.failed,
            self.cancelled
        )?;
        if self.pending + self.running > 0 {
            write!(f, ", {} pending, {} running", self.pending, self.running)?;
        }
        Ok(())
    }
}

/// Read-only copy of a session, handed out by `ProgressTracker::snapshot`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub state: SessionState,
    pub items: Vec<DownloadItem>,
    pub overall_progress_percent: f64,
    pub config: Option<DownloadConfig>,
}

impl SessionView {
    pub fn item(&self, id: Uuid) -> Option<&DownloadItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn summary(&self) -> Summary {
        self.items
            .iter()
            .fold(Summary::default(), |mut summary, item| {
                match item.state {
                    ItemState::Pending => summary.pending += 1,
                    ItemState::Running => summary.running += 1,
                    ItemState::Succeeded => summary.succeeded += 1,
                    ItemState::Failed => summary.failed += 1,
                    ItemState::Cancelled => summary.cancelled += 1,
                }
                summary
            })
    }

    /// Mean of the per-item percentages, 0 for an empty session.
    pub(crate) fn mean_progress(&self) -> f64 {
        if self.items.is_empty() {
            return 0.0;
        }
        let total: f64 = self.items.iter().map(DownloadItem::effective_percent).sum();
        total / self.items.len() as f64
    }
}
