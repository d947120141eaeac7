mod worker;

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::tracker::{ProgressObserver, ProgressTracker};
use super::{DownloadConfig, DownloadItem, SessionView};
use crate::extract::Extractor;
use crate::{Error, Result};

use self::worker::Worker;

#[derive(Debug, Default)]
struct Inner {
    worker: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

/// Runs download sessions, one at a time, on a background task.
/// Cheap to clone, all clones drive the same session.
#[derive(Clone)]
pub struct Orchestrator {
    extractor: Arc<dyn Extractor>,
    tracker: ProgressTracker,
    inner: Arc<Mutex<Inner>>,
}

impl Orchestrator {
    pub fn new(extractor: Arc<dyn Extractor>, tracker: ProgressTracker) -> Self {
        Orchestrator {
            extractor,
            tracker,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Validates the request, registers one item per url and spawns the
    /// worker. Returns as soon as the worker is running. On error the
    /// previous session is left untouched.
    pub async fn start(&self, urls: Vec<String>, config: DownloadConfig) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if self.tracker.is_running() {
            return Err(Error::SessionInProgress);
        }
        let format_expression = config.validate(&urls)?;
        log::info!(
            "Starting session: {} urls, quality '{}' ({}), destination {}",
            urls.len(),
            config.quality,
            format_expression,
            config.destination.to_string_lossy()
        );

        let items = urls.iter().map(|url| DownloadItem::new(url)).collect();
        let cancel = CancellationToken::new();
        self.tracker.begin(config.clone(), items);
        let worker = Worker {
            extractor: self.extractor.clone(),
            tracker: self.tracker.clone(),
            config: Arc::new(config),
            format_expression,
            cancel: cancel.clone(),
        };
        inner.cancel = cancel;
        inner.worker = Some(tokio::spawn(worker.run()));
        Ok(())
    }

    /// Asks the running session to stop. The item in flight is told to abort,
    /// everything not started yet ends up cancelled. Does nothing when idle.
    pub async fn cancel(&self) {
        let inner = self.inner.lock().await;
        if !inner.cancel.is_cancelled() && self.tracker.is_running() {
            log::info!("Cancellation requested");
        }
        inner.cancel.cancel();
    }

    /// Waits until the worker of the current session has exited and returns
    /// the final state. Returns right away when no worker was started.
    pub async fn wait(&self) -> SessionView {
        let handle = self.inner.lock().await.worker.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("Download worker terminated abnormally: {}", e);
            }
        }
        self.tracker.snapshot()
    }

    /// Drops a finished session, the tracker is idle afterwards.
    pub async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if self.tracker.is_running() {
            return Err(Error::SessionInProgress);
        }
        *inner = Inner::default();
        self.tracker.reset();
        Ok(())
    }

    pub fn snapshot(&self) -> SessionView {
        self.tracker.snapshot()
    }

    pub async fn add_observer(&self, observer: impl ProgressObserver + 'static) {
        self.tracker.add_observer(observer).await;
    }
}
