use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use downloader::extract::{
    self, Collection, CollectionEntry, DownloadRequest, Extractor, ProgressEvent,
};
use downloader::session::orchestrator::Orchestrator;
use downloader::session::tracker::{Notification, ProgressObserver, ProgressTracker};
use downloader::session::{DownloadConfig, ItemState, SessionState};
use downloader::Error;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use test_context::{test_context, AsyncTestContext};
use test_log::test;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Behaviour is picked from the url: `fail`, `merge` and `slow` videos, any
/// other video succeeds. `slow` only returns once it is cancelled. Listing
/// `PLbroken` fails.
struct Scripted {
    started_slow: Arc<Notify>,
}

#[async_trait]
impl Extractor for Scripted {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn list_collection(&self, url: &str) -> extract::Result<Collection> {
        if url.contains("PLbroken") {
            return Err(extract::Error::Extraction("playlist does not exist".into()));
        }
        let id = url.rsplit('=').next().unwrap_or_default();
        let entries = ["one", "two", "three"]
            .iter()
            .map(|n| CollectionEntry {
                url: format!("https://www.youtube.com/watch?v={}-{}", id, n),
                title: Some(format!("{} {}", id, n)),
            })
            .collect();
        Ok(Collection {
            title: format!("Playlist {}", id),
            entries,
            unavailable: 1,
        })
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        progress: mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> extract::Result<PathBuf> {
        for bytes in [10, 40, 80] {
            let _ = progress.send(ProgressEvent::new(bytes, Some(100))).await;
            tokio::task::yield_now().await;
        }
        if request.url.contains("slow") {
            self.started_slow.notify_one();
            cancel.cancelled().await;
            return Err(extract::Error::Cancelled);
        }
        if request.url.contains("fail") {
            return Err(extract::Error::Extraction("Video unavailable".into()));
        }
        if request.url.contains("merge") {
            return Err(extract::Error::Merge("Postprocessing: Conversion failed!".into()));
        }
        let dir = request.destination.join("Single Videos");
        tokio::fs::create_dir_all(&dir).await?;
        let name = request.url.rsplit(['/', '=']).next().unwrap_or("video");
        let path = dir.join(format!("{}.mp4", name));
        tokio::fs::write(&path, b"not really a video").await?;
        Ok(path)
    }
}

#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<Notification>>>,
}

impl Recorder {
    fn seen(&self) -> Vec<Notification> {
        self.seen.lock().unwrap().clone()
    }

    async fn wait_for_finish(&self) -> Vec<Notification> {
        let finished = || {
            self.seen()
                .iter()
                .any(|n| matches!(n, Notification::SessionFinished { .. }))
        };
        tokio::time::timeout(TIMEOUT, async {
            while !finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("session finished notification");
        self.seen()
    }
}

#[async_trait]
impl ProgressObserver for Recorder {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

struct Grumpy;

#[async_trait]
impl ProgressObserver for Grumpy {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        if matches!(notification, Notification::SessionStarted { .. }) {
            panic!("grumpy observer does not like new sessions");
        }
        anyhow::bail!("grumpy observer rejects {:?}", notification)
    }
}

struct Ctx {
    orchestrator: Orchestrator,
    tracker: ProgressTracker,
    recorder: Recorder,
    started_slow: Arc<Notify>,
    dir: TempDir,
}

impl Ctx {
    fn config(&self) -> DownloadConfig {
        DownloadConfig {
            destination: self.dir.path().to_owned(),
            pause_between_items_ms: 0,
            ..DownloadConfig::default()
        }
    }

    async fn start(&self, urls: &[&str]) {
        self.orchestrator
            .start(urls.iter().map(|u| u.to_string()).collect(), self.config())
            .await
            .unwrap();
    }

    async fn wait(&self) -> downloader::session::SessionView {
        tokio::time::timeout(TIMEOUT, self.orchestrator.wait())
            .await
            .expect("worker finished in time")
    }

    fn states(&self) -> Vec<ItemState> {
        self.tracker
            .snapshot()
            .items
            .iter()
            .map(|item| item.state)
            .collect()
    }
}

#[async_trait]
impl AsyncTestContext for Ctx {
    async fn setup() -> Self {
        let started_slow = Arc::new(Notify::new());
        let (orchestrator, tracker) = downloader::init(Scripted {
            started_slow: started_slow.clone(),
        });
        let recorder = Recorder::default();
        tracker.add_observer(recorder.clone()).await;
        Ctx {
            orchestrator,
            tracker,
            recorder,
            started_slow,
            dir: TempDir::new().unwrap(),
        }
    }
}

#[test_context(Ctx)]
#[test(tokio::test)]
async fn every_item_reaches_a_terminal_state(ctx: &mut Ctx) {
    let urls = [
        "https://youtu.be/first",
        "https://www.youtube.com/playlist?list=PLmix",
        "https://youtu.be/merge",
        "https://youtu.be/last",
    ];
    tokio::time::timeout(Duration::from_millis(500), ctx.start(&urls))
        .await
        .expect("start returns without waiting for downloads");
    let view = ctx.wait().await;
    assert_eq!(view.state, SessionState::Completed);
    assert_eq!(view.items.len(), 6);
    assert!(view.items.iter().all(|item| item.state.is_terminal()));
    assert_eq!(view.summary().succeeded, 5);
    assert_eq!(view.overall_progress_percent, 100.0);

    let merge = &view.items[4];
    assert_eq!(merge.state, ItemState::Failed);
    assert_eq!(
        merge.error.as_deref(),
        Some("Merging streams failed for 'https://youtu.be/merge': Postprocessing: Conversion failed!")
    );
    let first = &view.items[0];
    let output = first.output_path.clone().unwrap();
    assert!(output.starts_with(ctx.dir.path()));
    assert!(output.exists());
}

#[test_context(Ctx)]
#[test(tokio::test)]
async fn collections_expand_in_input_order(ctx: &mut Ctx) {
    ctx.start(&[
        "https://youtu.be/a",
        "https://www.youtube.com/playlist?list=PLx",
        "https://youtu.be/b",
        "https://www.youtube.com/watch?v=c&list=UUy",
    ])
    .await;
    let view = ctx.wait().await;
    let urls: Vec<&str> = view.items.iter().map(|item| item.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://youtu.be/a",
            "https://www.youtube.com/watch?v=PLx-one",
            "https://www.youtube.com/watch?v=PLx-two",
            "https://www.youtube.com/watch?v=PLx-three",
            "https://youtu.be/b",
            "https://www.youtube.com/watch?v=UUy-one",
            "https://www.youtube.com/watch?v=UUy-two",
            "https://www.youtube.com/watch?v=UUy-three",
        ]
    );
    let indices: Vec<usize> = view.items[5..]
        .iter()
        .filter_map(|item| item.collection.as_ref().map(|c| c.index))
        .collect();
    assert_eq!(indices, vec![1, 2, 3]);
    assert_eq!(view.items[1].title.as_deref(), Some("PLx one"));
}

#[test_context(Ctx)]
#[test(tokio::test)]
async fn one_failure_in_three(ctx: &mut Ctx) {
    ctx.start(&["https://youtu.be/a", "https://youtu.be/fail", "https://youtu.be/c"])
        .await;
    let view = ctx.wait().await;
    assert_eq!(view.state, SessionState::Completed);
    assert_eq!(
        ctx.states(),
        vec![ItemState::Succeeded, ItemState::Failed, ItemState::Succeeded]
    );
    assert!(view.items[1].error.as_deref().unwrap().contains("Video unavailable"));
    assert_eq!(view.items[1].output_path, None);
}

#[test_context(Ctx)]
#[test(tokio::test)]
async fn cancel_before_start_cancels_everything(ctx: &mut Ctx) {
    ctx.start(&["https://youtu.be/slow1", "https://youtu.be/slow2", "https://youtu.be/slow3"])
        .await;
    ctx.orchestrator.cancel().await;
    let view = ctx.wait().await;
    assert_eq!(view.state, SessionState::Cancelled);
    assert_eq!(ctx.states(), vec![ItemState::Cancelled; 3]);
}

#[test_context(Ctx)]
#[test(tokio::test)]
async fn cancel_before_listing_cancels_the_collection(ctx: &mut Ctx) {
    for _ in 0..20 {
        ctx.start(&[
            "https://www.youtube.com/playlist?list=PLbroken",
            "https://youtu.be/a",
        ])
        .await;
        ctx.orchestrator.cancel().await;
        let view = ctx.wait().await;
        assert_eq!(view.state, SessionState::Cancelled);
        assert_eq!(ctx.states(), vec![ItemState::Cancelled; 2]);
        ctx.orchestrator.clear().await.unwrap();
    }
}

#[test_context(Ctx)]
#[test(tokio::test)]
async fn failed_listing_is_reported_after_expansion(ctx: &mut Ctx) {
    ctx.start(&[
        "https://www.youtube.com/playlist?list=PLbroken",
        "https://youtu.be/a",
    ])
    .await;
    let view = ctx.wait().await;
    assert_eq!(view.state, SessionState::Completed);
    assert_eq!(ctx.states(), vec![ItemState::Failed, ItemState::Succeeded]);
}

#[test_context(Ctx)]
#[test(tokio::test)]
async fn downloads_are_spaced_out(ctx: &mut Ctx) {
    let config = DownloadConfig {
        pause_between_items_ms: 300,
        ..ctx.config()
    };
    let started = tokio::time::Instant::now();
    ctx.orchestrator
        .start(
            vec!["https://youtu.be/a".into(), "https://youtu.be/b".into()],
            config,
        )
        .await
        .unwrap();
    let view = ctx.wait().await;
    assert_eq!(view.summary().succeeded, 2);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[test_context(Ctx)]
#[test(tokio::test)]
async fn cancel_during_the_pause_is_immediate(ctx: &mut Ctx) {
    let config = DownloadConfig {
        pause_between_items_ms: 60_000,
        ..ctx.config()
    };
    ctx.orchestrator
        .start(
            vec!["https://youtu.be/a".into(), "https://youtu.be/b".into()],
            config,
        )
        .await
        .unwrap();
    tokio::time::timeout(TIMEOUT, async {
        while ctx.states()[0] != ItemState::Succeeded {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    ctx.orchestrator.cancel().await;
    let view = tokio::time::timeout(Duration::from_secs(2), ctx.orchestrator.wait())
        .await
        .expect("cancel interrupts the pause");
    assert_eq!(view.state, SessionState::Cancelled);
    assert_eq!(ctx.states(), vec![ItemState::Succeeded, ItemState::Cancelled]);
}

#[test_context(Ctx)]
#[test(tokio::test)]
async fn cancel_mid_session(ctx: &mut Ctx) {
    ctx.start(&[
        "https://youtu.be/a",
        "https://youtu.be/fail",
        "https://youtu.be/slow",
        "https://youtu.be/d",
        "https://www.youtube.com/playlist?list=PLlate",
    ])
    .await;
    tokio::time::timeout(TIMEOUT, ctx.started_slow.notified())
        .await
        .unwrap();
    ctx.orchestrator.cancel().await;
    // a second cancel changes nothing
    ctx.orchestrator.cancel().await;
    let view = ctx.wait().await;
    assert_eq!(view.state, SessionState::Cancelled);
    // the collection was expanded before the first download
    assert_eq!(
        ctx.states(),
        vec![
            ItemState::Succeeded,
            ItemState::Failed,
            ItemState::Cancelled,
            ItemState::Cancelled,
            ItemState::Cancelled,
            ItemState::Cancelled,
            ItemState::Cancelled,
        ]
    );
    assert_eq!(view.overall_progress_percent, 100.0);
}

#[test_context(Ctx)]
#[test(tokio::test)]
async fn unknown_quality_leaves_the_tracker_idle(ctx: &mut Ctx) {
    let baseline = ctx.tracker.snapshot();
    let config = DownloadConfig {
        quality: "ultra-hd-deluxe".into(),
        ..ctx.config()
    };
    let result = ctx
        .orchestrator
        .start(vec!["https://youtu.be/a".into()], config)
        .await;
    assert_eq!(result, Err(Error::UnknownQuality("ultra-hd-deluxe".into())));
    assert_eq!(ctx.tracker.snapshot(), baseline);
    assert!(ctx.recorder.seen().is_empty());
}

#[test_context(Ctx)]
#[test(tokio::test)]
async fn second_start_is_rejected_while_running(ctx: &mut Ctx) {
    ctx.start(&["https://youtu.be/slow"]).await;
    let running: Vec<String> = ctx.tracker.snapshot().items.into_iter().map(|i| i.url).collect();
    let result = ctx
        .orchestrator
        .start(vec!["https://youtu.be/other".into()], ctx.config())
        .await;
    assert_eq!(result, Err(Error::SessionInProgress));
    assert_eq!(ctx.orchestrator.clear().await, Err(Error::SessionInProgress));
    let still: Vec<String> = ctx.tracker.snapshot().items.into_iter().map(|i| i.url).collect();
    assert_eq!(still, running);
    ctx.orchestrator.cancel().await;
    ctx.wait().await;
    assert!(ctx.orchestrator.clear().await.is_ok());
}

#[test_context(Ctx)]
#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn progress_never_decreases_and_snapshots_stay_consistent(ctx: &mut Ctx) {
    let poller = {
        let tracker = ctx.tracker.clone();
        tokio::spawn(async move {
            let mut seen = Vec::new();
            loop {
                let view = tracker.snapshot();
                for item in &view.items {
                    assert!(
                        !(item.state == ItemState::Running && item.output_path.is_some()),
                        "running item with an output path: {:?}",
                        item
                    );
                }
                seen.push(view.overall_progress_percent);
                if view.state.is_finished() {
                    return seen;
                }
                tokio::task::yield_now().await;
            }
        })
    };
    ctx.start(&[
        "https://youtu.be/a",
        "https://www.youtube.com/playlist?list=PLbig",
        "https://youtu.be/fail",
        "https://www.youtube.com/playlist?list=PLsmall",
    ])
    .await;
    ctx.wait().await;
    let polled = tokio::time::timeout(TIMEOUT, poller).await.unwrap().unwrap();
    assert!(polled.windows(2).all(|w| w[0] <= w[1]), "{:?}", polled);

    let notified: Vec<f64> = ctx
        .recorder
        .wait_for_finish()
        .await
        .iter()
        .filter_map(|n| match n {
            Notification::ItemUpdated {
                overall_progress_percent,
                ..
            }
            | Notification::CollectionExpanded {
                overall_progress_percent,
                ..
            } => Some(*overall_progress_percent),
            _ => None,
        })
        .collect();
    assert!(notified.windows(2).all(|w| w[0] <= w[1]), "{:?}", notified);
    assert_eq!(notified.last(), Some(&100.0));
}

#[test_context(Ctx)]
#[test(tokio::test)]
async fn notifications_end_with_the_terminal_update(ctx: &mut Ctx) {
    ctx.tracker.add_observer(Grumpy).await;
    ctx.start(&["https://youtu.be/a", "https://youtu.be/fail", "https://youtu.be/c"])
        .await;
    ctx.wait().await;
    let seen = ctx.recorder.wait_for_finish().await;

    assert!(matches!(seen.first(), Some(Notification::SessionStarted { items }) if items.len() == 3));
    assert!(matches!(
        seen.last(),
        Some(Notification::SessionFinished {
            state: SessionState::Completed,
            ..
        })
    ));
    let mut finished: Vec<Uuid> = Vec::new();
    for notification in &seen {
        if let Notification::ItemUpdated { item, .. } = notification {
            assert!(
                !finished.contains(&item.id),
                "update after terminal state for {}",
                item.url
            );
            if item.state.is_terminal() {
                finished.push(item.id);
            }
        }
    }
    assert_eq!(finished.len(), 3);
    // progress of the extractor went through
    assert!(seen.iter().any(|n| matches!(
        n,
        Notification::ItemUpdated { item, .. }
            if item.state == ItemState::Running && item.progress_percent == 80.0
    )));
}
