use std::sync::Mutex;

use async_trait::async_trait;
use downloader::session::tracker::{Notification, ProgressObserver};
use downloader::session::{DownloadItem, ItemState};
use downloader::util::HALF_SECOND;
use tokio::time::Instant;
use uuid::Uuid;

/// Renders tracker notifications as log lines. Running progress is
/// throttled to one line per item every half second.
#[derive(Default)]
pub struct LoggingObserver {
    last_progress: Mutex<Option<(Uuid, Instant)>>,
}

impl LoggingObserver {
    fn should_log_progress(&self, id: Uuid) -> bool {
        let Ok(mut last) = self.last_progress.lock() else {
            return true;
        };
        let now = Instant::now();
        match *last {
            Some((last_id, at)) if last_id == id && now.duration_since(at) < HALF_SECOND => false,
            _ => {
                *last = Some((id, now));
                true
            }
        }
    }

    fn log_item(&self, item: &DownloadItem, overall: f64) {
        match item.state {
            ItemState::Pending => {}
            ItemState::Running => {
                if self.should_log_progress(item.id) {
                    log::info!(
                        "{:>5.1}% {} (overall {:.1}%)",
                        item.progress_percent,
                        item.display_name(),
                        overall
                    );
                }
            }
            ItemState::Succeeded => log::info!(
                "Downloaded {} -> {}",
                item.display_name(),
                item.output_path
                    .as_ref()
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_default()
            ),
            ItemState::Failed => log::warn!(
                "Failed {}: {}",
                item.display_name(),
                item.error.as_deref().unwrap_or("unknown error")
            ),
            ItemState::Cancelled => log::info!("Cancelled {}", item.display_name()),
        }
    }
}

#[async_trait]
impl ProgressObserver for LoggingObserver {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        match notification {
            Notification::SessionStarted { items } => {
                log::info!("Processing {} URLs", items.len())
            }
            Notification::ItemUpdated {
                item,
                overall_progress_percent,
            } => self.log_item(item, *overall_progress_percent),
            Notification::CollectionExpanded { title, items, .. } => {
                log::info!("Playlist '{}': {} videos queued", title, items.len())
            }
            Notification::SessionFinished { state, summary } => {
                log::debug!("Session {:?}: {}", state, summary)
            }
        }
        Ok(())
    }
}
