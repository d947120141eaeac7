//! Per-item state plus the aggregate percentage of the live session.
//!
//! The tracker is the only place session state lives. The orchestrator's
//! worker writes to it, any number of readers take snapshots, and observers
//! get a [`Notification`] for every applied change. Notifications go through
//! a bounded channel to a publisher task, so a slow observer never stalls
//! the worker.

use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use super::{
    DownloadConfig, DownloadItem, ItemState, Outcome, SessionState, SessionView, Summary,
};
use crate::extract::{CollectionEntry, CollectionRef, ItemKind};
use crate::util::clamp_percent;

const NOTIFICATION_BUFFER: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    SessionStarted {
        items: Vec<DownloadItem>,
    },
    ItemUpdated {
        item: DownloadItem,
        overall_progress_percent: f64,
    },
    /// A collection placeholder was replaced by its videos.
    CollectionExpanded {
        collection_id: Uuid,
        title: String,
        items: Vec<DownloadItem>,
        overall_progress_percent: f64,
    },
    SessionFinished {
        state: SessionState,
        summary: Summary,
    },
}

impl Notification {
    /// Progress of a running item, the only kind that may be dropped under load.
    pub fn is_progress(&self) -> bool {
        matches!(self, Notification::ItemUpdated { item, .. } if !item.state.is_terminal())
    }
}

/// Gets told about every change the tracker applies, in order.
#[async_trait]
pub trait ProgressObserver: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

pub type Observers = Arc<Mutex<Vec<Arc<dyn ProgressObserver>>>>;

#[derive(Debug, Default)]
struct Inner {
    view: SessionView,
    /// Highest overall percentage reported in this session.
    high_water: f64,
}

impl Inner {
    fn recompute(&mut self) -> f64 {
        let mean = self.view.mean_progress();
        if mean > self.high_water {
            self.high_water = mean;
        }
        self.view.overall_progress_percent = self.high_water;
        self.high_water
    }

    fn item_mut(&mut self, id: Uuid) -> Option<&mut DownloadItem> {
        self.view.items.iter_mut().find(|item| item.id == id)
    }
}

#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<RwLock<Inner>>,
    observers: Observers,
    notifications: mpsc::Sender<Notification>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

async fn publish(mut notifications: mpsc::Receiver<Notification>, observers: Observers) {
    while let Some(notification) = notifications.recv().await {
        let observers = observers.lock().await.clone();
        for observer in observers {
            match AssertUnwindSafe(observer.notify(&notification))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("Observer failed to handle notification: {:#}", e),
                Err(_) => log::error!("Observer panicked while handling notification"),
            }
        }
    }
    log::info!("Notification channel closed, last tracker handle has been dropped");
}

impl ProgressTracker {
    /// Spawns the publisher task, needs a running tokio runtime.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel(NOTIFICATION_BUFFER);
        let observers: Observers = Arc::new(Mutex::new(Vec::new()));
        log::debug!("Spawning notification publisher task");
        tokio::spawn(publish(receiver, observers.clone()));
        ProgressTracker {
            inner: Arc::new(RwLock::new(Inner::default())),
            observers,
            notifications: sender,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn add_observer(&self, observer: impl ProgressObserver + 'static) {
        let mut guard = self.observers.lock().await;
        guard.push(Arc::new(observer));
    }

    /// Queues a notification. Progress is dropped when the queue is full,
    /// everything else waits for room.
    async fn notify(&self, notification: Notification) {
        let delivered = if notification.is_progress() {
            match self.notifications.try_send(notification) {
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::debug!("Notification queue full, dropping progress update");
                    true
                }
                other => other.is_ok(),
            }
        } else {
            self.notifications.send(notification).await.is_ok()
        };
        if !delivered {
            log::debug!("Notification publisher is gone, notification discarded");
        }
    }

    /// Owned copy of the current session, never waits on the worker.
    pub fn snapshot(&self) -> SessionView {
        self.read().view.clone()
    }

    pub fn state(&self) -> SessionState {
        self.read().view.state
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Replaces whatever session was tracked with a fresh running one.
    pub(crate) fn begin(&self, config: DownloadConfig, items: Vec<DownloadItem>) {
        let mut inner = self.write();
        *inner = Inner {
            view: SessionView {
                state: SessionState::Running,
                items,
                overall_progress_percent: 0.0,
                config: Some(config),
            },
            high_water: 0.0,
        };
    }

    pub(crate) async fn announce_start(&self) {
        let items = self.read().view.items.clone();
        self.notify(Notification::SessionStarted { items }).await;
    }

    /// Appends a pending item to the session.
    pub fn register(&self, item: DownloadItem) -> Uuid {
        let id = item.id;
        let mut inner = self.write();
        inner.view.items.push(item);
        inner.recompute();
        id
    }

    /// Applies a progress or state change to an item. Percentages only move
    /// up while an item is pending or running, terminal states always apply,
    /// and a terminal item never changes again. Returns whether anything changed.
    pub async fn update(&self, item_id: Uuid, percent: f64, state: ItemState) -> bool {
        let notification = {
            let mut inner = self.write();
            let Some(item) = inner.item_mut(item_id) else {
                log::warn!("Update for unknown item {}", item_id);
                return false;
            };
            if item.state.is_terminal() {
                return false;
            }
            let percent = clamp_percent(percent);
            if state.is_terminal() {
                item.state = state;
                item.progress_percent = if state == ItemState::Succeeded {
                    100.0
                } else {
                    item.progress_percent.max(percent)
                };
            } else {
                let state_changed = item.state == ItemState::Pending && state == ItemState::Running;
                let percent_raised = percent > item.progress_percent;
                if !state_changed && !percent_raised {
                    return false;
                }
                if state_changed {
                    item.state = state;
                }
                if percent_raised {
                    item.progress_percent = percent;
                }
            }
            let item = item.clone();
            let overall_progress_percent = inner.recompute();
            Notification::ItemUpdated {
                item,
                overall_progress_percent,
            }
        };
        self.notify(notification).await;
        true
    }

    /// Moves an item into its terminal state together with its output path or error.
    pub async fn finish(&self, item_id: Uuid, outcome: Outcome) -> bool {
        let notification = {
            let mut inner = self.write();
            let Some(item) = inner.item_mut(item_id) else {
                log::warn!("Outcome for unknown item {}", item_id);
                return false;
            };
            if item.state.is_terminal() {
                return false;
            }
            item.state = outcome.state();
            match outcome {
                Outcome::Succeeded(path) => {
                    item.progress_percent = 100.0;
                    if item.title.is_none() {
                        item.title = title_from_path(&path);
                    }
                    item.output_path = Some(path);
                }
                Outcome::Failed(message) => item.error = Some(message),
                Outcome::Cancelled => {}
            }
            let item = item.clone();
            let overall_progress_percent = inner.recompute();
            Notification::ItemUpdated {
                item,
                overall_progress_percent,
            }
        };
        self.notify(notification).await;
        true
    }

    /// Replaces a pending collection placeholder with one video item per entry,
    /// keeping the entries' order. Returns the ids of the new items.
    pub async fn expand(
        &self,
        collection_id: Uuid,
        title: &str,
        entries: Vec<CollectionEntry>,
    ) -> Vec<Uuid> {
        let notification = {
            let mut inner = self.write();
            let Some(position) = inner.view.items.iter().position(|item| {
                item.id == collection_id
                    && item.kind == ItemKind::Collection
                    && item.state == ItemState::Pending
            }) else {
                log::warn!("No pending collection {} to expand", collection_id);
                return Vec::new();
            };
            let items: Vec<DownloadItem> = entries
                .into_iter()
                .enumerate()
                .map(|(i, entry)| {
                    DownloadItem::from_entry(
                        entry,
                        CollectionRef {
                            title: title.to_owned(),
                            index: i + 1,
                        },
                    )
                })
                .collect();
            inner
                .view
                .items
                .splice(position..=position, items.iter().cloned());
            let overall_progress_percent = inner.recompute();
            Notification::CollectionExpanded {
                collection_id,
                title: title.to_owned(),
                items,
                overall_progress_percent,
            }
        };
        let ids = match &notification {
            Notification::CollectionExpanded { items, .. } => {
                items.iter().map(|item| item.id).collect()
            }
            _ => Vec::new(),
        };
        self.notify(notification).await;
        ids
    }

    /// Cancels every item that has not started yet, returns how many there were.
    pub async fn cancel_pending(&self) -> usize {
        let pending: Vec<Uuid> = self
            .read()
            .view
            .items
            .iter()
            .filter(|item| item.state == ItemState::Pending)
            .map(|item| item.id)
            .collect();
        let mut cancelled = 0;
        for id in pending {
            if self.finish(id, Outcome::Cancelled).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub(crate) async fn end_session(&self, state: SessionState) -> Summary {
        let summary = {
            let mut inner = self.write();
            inner.view.state = state;
            inner.recompute();
            inner.view.summary()
        };
        self.notify(Notification::SessionFinished { state, summary })
            .await;
        summary
    }

    /// Forgets the session, the tracker reports an idle session afterwards.
    pub(crate) fn reset(&self) {
        *self.write() = Inner::default();
    }
}

fn title_from_path(path: &Path) -> Option<String> {
    path.file_stem().map(|stem| stem.to_string_lossy().to_string())
}
