use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{SessionMonitor, SessionSnapshot};

/// Burst of filesystem notifications collapsed into one early tick.
const WAKE_DEBOUNCE: Duration = Duration::from_millis(100);

/// Owner side of a running monitor loop.
pub struct MonitorHandle {
    stop_tx: mpsc::Sender<()>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    join_handle: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Requests a stop and waits for the loop to finish its current tick.
    pub async fn stop(self) {
        if self.stop_tx.send(()).await.is_err() {
            tracing::debug!("Session monitor already stopped");
        }
        if let Err(error) = self.join_handle.await {
            tracing::warn!(join_error = %error, "Session monitor task ended abnormally");
        }
    }
}

/// Moves `monitor` onto a tokio task that ticks every `poll_interval`,
/// earlier when the watched directories change. Must be called from
/// within a tokio runtime.
pub fn spawn_session_monitor(
    monitor: SessionMonitor,
    poll_interval: Duration,
    watch_paths: Vec<PathBuf>,
) -> MonitorHandle {
    let (stop_tx, stop_rx) = mpsc::channel(1);
    let snapshot_rx = monitor.subscribe();
    let join_handle = tokio::spawn(run_monitor_loop(monitor, poll_interval, watch_paths, stop_rx));

    MonitorHandle {
        stop_tx,
        snapshot_rx,
        join_handle,
    }
}

async fn run_monitor_loop(
    mut monitor: SessionMonitor,
    poll_interval: Duration,
    watch_paths: Vec<PathBuf>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    let (wake_tx, mut wake_rx) = mpsc::unbounded_channel::<()>();
    let _watcher = start_filesystem_watcher(&watch_paths, wake_tx);

    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        poll_interval_ms = poll_interval.as_millis() as u64,
        watched_paths = watch_paths.len(),
        "Session monitor started"
    );

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.recv() => break,
            _ = interval.tick() => {}
            Some(()) = wake_rx.recv() => {
                tokio::time::sleep(WAKE_DEBOUNCE).await;
                while wake_rx.try_recv().is_ok() {}
                interval.reset();
            }
        }

        monitor.tick();
    }

    tracing::info!("Session monitor stopped");
}

/// Returns `None` when watching is unavailable; the interval alone then
/// drives polling.
fn start_filesystem_watcher(
    watch_paths: &[PathBuf],
    wake_tx: mpsc::UnboundedSender<()>,
) -> Option<RecommendedWatcher> {
    if watch_paths.is_empty() {
        return None;
    }

    let watcher_result = notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
        match result {
            Ok(event) => {
                if is_relevant_notification(&event) && wake_tx.send(()).is_err() {
                    tracing::debug!("Session monitor wake receiver dropped");
                }
            }
            Err(error) => tracing::debug!(watch_error = %error, "Filesystem watcher error"),
        }
    });
    let mut watcher = match watcher_result {
        Ok(watcher) => watcher,
        Err(error) => {
            tracing::warn!(watch_error = %error, "Filesystem watching unavailable, polling on interval only");
            return None;
        }
    };

    let mut watched_count = 0;
    for path in watch_paths {
        if let Err(error) = watch_path(&mut watcher, path) {
            tracing::warn!(
                path = %path.display(),
                watch_error = %error,
                "Failed to watch directory, polling it on interval only"
            );
            continue;
        }
        watched_count += 1;
    }

    (watched_count > 0).then_some(watcher)
}

fn watch_path(watcher: &mut RecommendedWatcher, path: &Path) -> Result<(), notify::Error> {
    // Recursive so launch subdirectories created after startup are covered.
    watcher.watch(path, RecursiveMode::Recursive)
}

fn is_relevant_notification(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    )
}

#[cfg(test)]
mod tests {
    use super::{is_relevant_notification, spawn_session_monitor};
    use crate::metadata::OfflineMetadata;
    use crate::raid_state::RaidPhase;
    use crate::session::SessionMonitor;
    use crate::settings::TrackerSettings;
    use notify::event::{AccessKind, CreateKind};
    use notify::{Event, EventKind};
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn only_content_changes_wake_the_loop() {
        assert!(is_relevant_notification(&Event::new(EventKind::Create(
            CreateKind::File
        ))));
        assert!(!is_relevant_notification(&Event::new(EventKind::Access(
            AccessKind::Any
        ))));
    }

    #[tokio::test]
    async fn publishes_snapshots_until_stopped() {
        let temp_directory = tempfile::tempdir().expect("Failed to create temp directory");
        let settings = TrackerSettings {
            log_directory: temp_directory.path().to_path_buf(),
            screenshot_directory: temp_directory.path().join("Screenshots"),
            replay_existing_log: true,
            poll_interval_ms: 10,
            ..TrackerSettings::default()
        };
        let log_path = temp_directory.path().join("game application.log");
        let mut file = std::fs::File::create(&log_path).expect("Failed to create test log");
        file.write_all(b"2025-12-27 15:20:01.000 RaidStarted mapId=customs\n")
            .expect("Failed to write test log");
        drop(file);

        let monitor = SessionMonitor::new(&settings, Arc::new(OfflineMetadata))
            .expect("Monitor should build");
        let handle = spawn_session_monitor(monitor, settings.poll_interval(), Vec::new());
        let mut snapshot_rx = handle.subscribe();

        tokio::time::timeout(
            Duration::from_secs(5),
            snapshot_rx.wait_for(|snapshot| snapshot.raid_state.phase == RaidPhase::Loading),
        )
        .await
        .expect("Loading snapshot should be published")
        .expect("Monitor should still be running");
        assert_eq!(
            handle.snapshot().raid_state.current_map_id.as_deref(),
            Some("customs")
        );

        tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .expect("Stop should end the loop promptly");
    }
}
