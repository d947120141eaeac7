use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::extract::{DownloadRequest, Extractor, ItemKind, ProgressEvent};
use crate::session::tracker::ProgressTracker;
use crate::session::{DownloadConfig, DownloadItem, ItemState, Outcome, SessionState};
use crate::Error;

/// Events buffered between the extractor and the tracker for one item.
const PROGRESS_BUFFER: usize = 64;

/// Background task of one session, processes its items one after another.
pub(super) struct Worker {
    pub extractor: Arc<dyn Extractor>,
    pub tracker: ProgressTracker,
    pub config: Arc<DownloadConfig>,
    pub format_expression: String,
    pub cancel: CancellationToken,
}

impl Worker {
    pub async fn run(self) {
        log::info!(
            "Session started with {} urls, extractor: {}",
            self.tracker.snapshot().items.len(),
            self.extractor.name()
        );
        self.tracker.announce_start().await;
        self.expand_collections().await;

        let pending: Vec<DownloadItem> = self
            .tracker
            .snapshot()
            .items
            .into_iter()
            .filter(|item| item.state == ItemState::Pending && item.kind == ItemKind::Video)
            .collect();
        let total = pending.len();
        for (position, item) in pending.into_iter().enumerate() {
            if position > 0 && !self.pause().await {
                break;
            }
            if self.cancel.is_cancelled() {
                break;
            }
            log::info!(
                "Processing item {}/{}: {}",
                position + 1,
                total,
                item.display_name()
            );
            self.process(item).await;
        }

        let state = if self.cancel.is_cancelled() {
            let cancelled = self.tracker.cancel_pending().await;
            log::info!("Session cancelled, {} items were never started", cancelled);
            SessionState::Cancelled
        } else {
            SessionState::Completed
        };
        let summary = self.tracker.end_session(state).await;
        log::info!("Session finished ({:?}): {}", state, summary);
    }

    /// Waits out the pause between two downloads. False when the session was
    /// cancelled meanwhile.
    async fn pause(&self) -> bool {
        let pause = self.config.pause_between_items();
        if pause.is_zero() {
            return true;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(pause) => true,
        }
    }

    /// Lists every collection before the first download so the item list is
    /// final early. Failed listings are only marked once all are done.
    async fn expand_collections(&self) {
        let collections: Vec<DownloadItem> = self
            .tracker
            .snapshot()
            .items
            .into_iter()
            .filter(|item| item.kind == ItemKind::Collection)
            .collect();
        let mut failures: Vec<(Uuid, String)> = Vec::new();
        for collection in collections {
            if self.cancel.is_cancelled() {
                break;
            }
            let listing = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                listing = self.extractor.list_collection(&collection.url) => listing,
            };
            match listing {
                Ok(listed) if listed.entries.is_empty() => {
                    log::warn!("No available videos in collection '{}'", listed.title);
                    failures.push((
                        collection.id,
                        format!("No available videos in collection '{}'", listed.title),
                    ));
                }
                Ok(listed) => {
                    let ids = self
                        .tracker
                        .expand(collection.id, &listed.title, listed.entries)
                        .await;
                    log::info!(
                        "Expanded collection '{}' into {} items",
                        listed.title,
                        ids.len()
                    );
                }
                Err(e) => {
                    let err = Error::from_extract(&collection.url, e);
                    log::error!("Listing collection failed: {}", err);
                    failures.push((collection.id, err.to_string()));
                }
            }
        }
        // placeholders of a cancelled session are cancelled with the rest
        if self.cancel.is_cancelled() {
            return;
        }
        for (id, message) in failures {
            self.tracker.finish(id, Outcome::Failed(message)).await;
        }
    }

    async fn process(&self, item: DownloadItem) {
        let request = DownloadRequest {
            url: item.url.clone(),
            format_expression: self.format_expression.clone(),
            destination: self.config.destination.clone(),
            subtitles: self.config.subtitle_options(),
            collection: item.collection.clone(),
        };
        self.tracker.update(item.id, 0.0, ItemState::Running).await;

        let (sender, mut receiver) = mpsc::channel::<ProgressEvent>(PROGRESS_BUFFER);
        let download = AssertUnwindSafe(self.extractor.download(
            &request,
            sender,
            self.cancel.child_token(),
        ))
        .catch_unwind();
        tokio::pin!(download);
        let result = loop {
            tokio::select! {
                Some(event) = receiver.recv() => self.report(item.id, &event).await,
                result = &mut download => break result,
            }
        };
        // nothing may follow the terminal notification
        while let Ok(event) = receiver.try_recv() {
            self.report(item.id, &event).await;
        }

        let outcome = match result {
            Ok(Ok(path)) => {
                log::info!("Finished {} -> {}", item.url, path.to_string_lossy());
                Outcome::Succeeded(path)
            }
            Ok(Err(e)) => match Error::from_extract(&item.url, e) {
                Error::Cancelled => {
                    log::info!("Cancelled {}", item.url);
                    Outcome::Cancelled
                }
                err => {
                    log::error!("Download failed: {}", err);
                    Outcome::Failed(err.to_string())
                }
            },
            Err(_) => {
                log::error!("Extractor panicked while downloading {}", item.url);
                Outcome::Failed(
                    Error::Extraction {
                        url: item.url.clone(),
                        message: "extractor panicked".to_owned(),
                    }
                    .to_string(),
                )
            }
        };
        self.tracker.finish(item.id, outcome).await;
    }

    async fn report(&self, id: Uuid, event: &ProgressEvent) {
        if let Some(percent) = event.percent() {
            self.tracker.update(id, percent, ItemState::Running).await;
        }
    }
}
