mod runner;
mod snapshot;

use std::sync::Arc;

use tokio::sync::watch;

use crate::game_log::{classify_line, LogTailReader, TailHealth, TailReaderOptions};
use crate::metadata::{MetadataResolver, MetadataSource};
use crate::raid_state::{EventOutcome, RaidPhase, RaidStateMachine};
use crate::screenshot::ScreenshotScanner;
use crate::settings::{SettingsError, TrackerSettings};
use crate::timeline::{PositionTimeline, TimelineEntry};

pub use runner::{spawn_session_monitor, MonitorHandle};
pub use snapshot::SessionSnapshot;

/// Per-tick counters, mostly useful for tests and debug logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub lines_read: usize,
    pub events_classified: usize,
    pub transitions: usize,
    pub samples_recorded: usize,
    pub session_reset: bool,
    pub published: bool,
}

/// One tracked session: owns every piece of mutable tracking state and
/// mutates it only from [`SessionMonitor::tick`].
pub struct SessionMonitor {
    tail_reader: LogTailReader,
    raid_state: RaidStateMachine,
    timeline: PositionTimeline,
    screenshot_scanner: ScreenshotScanner,
    metadata: MetadataResolver,
    session_quests: Vec<String>,
    failure_threshold: u32,
    screenshot_failures: u32,
    screenshot_error: Option<String>,
    last_health: TailHealth,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl SessionMonitor {
    pub fn new(
        settings: &TrackerSettings,
        metadata_source: Arc<dyn MetadataSource>,
    ) -> Result<Self, SettingsError> {
        let tail_options = TailReaderOptions {
            file_pattern: settings.compiled_log_file_pattern()?,
            max_read_bytes: settings.max_read_bytes,
            failure_threshold: settings.failure_threshold,
            replay_existing: settings.replay_existing_log,
        };
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());

        Ok(Self {
            tail_reader: LogTailReader::new(&settings.log_directory, tail_options),
            raid_state: RaidStateMachine::new(settings.recent_event_capacity),
            timeline: PositionTimeline::new(settings.timeline_capacity),
            screenshot_scanner: ScreenshotScanner::new(&settings.screenshot_directory),
            metadata: MetadataResolver::new(metadata_source, settings.metadata.timeout()),
            session_quests: Vec::new(),
            failure_threshold: settings.failure_threshold.max(1),
            screenshot_failures: 0,
            screenshot_error: None,
            last_health: TailHealth::Healthy,
            snapshot_tx,
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn timeline(&self) -> &PositionTimeline {
        &self.timeline
    }

    /// Runs one full pass of the pipeline. Never fails: I/O problems are
    /// retried on the next tick and surfaced through the snapshot health.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        self.metadata.drain_results();

        let poll = self.tail_reader.poll();
        report.lines_read = poll.lines.len();
        if let Some(boundary) = poll.boundary {
            tracing::info!(
                log_path = %boundary.file_path.display(),
                reason = ?boundary.reason,
                "Log session boundary, resetting raid tracking"
            );
            let change = self
                .raid_state
                .force_idle(self.tail_reader.last_good_timestamp());
            self.timeline.observe_transition(&change);
            self.session_quests.clear();
            report.session_reset = true;
        }

        for line in &poll.lines {
            let Some(event) = classify_line(line) else {
                continue;
            };
            report.events_classified += 1;

            match self.raid_state.apply(event.clone()) {
                EventOutcome::Transitioned(change) => {
                    report.transitions += 1;
                    if change.from == RaidPhase::Ended && change.to == RaidPhase::Loading {
                        self.timeline.reset();
                    }
                    self.timeline.observe_transition(&change);
                    self.timeline.record(TimelineEntry::Event(event));
                    if let Some(map_id) = self.raid_state.state().current_map_id.clone() {
                        self.metadata.request_map(&map_id);
                    }
                }
                EventOutcome::Forwarded => {
                    if let Some(quest_id) = event.kind.quest_id() {
                        if !self.session_quests.iter().any(|known| known == quest_id) {
                            self.session_quests.push(quest_id.to_string());
                        }
                        self.metadata.request_quest(quest_id);
                    }
                    self.timeline.record(TimelineEntry::Event(event));
                }
                EventOutcome::Ignored(_) => {}
            }
        }

        report.samples_recorded = self.scan_screenshots();

        let health = self.current_health();
        if health != self.last_health {
            match &health {
                TailHealth::Healthy => tracing::info!("Tracking health restored"),
                TailHealth::Degraded {
                    consecutive_failures,
                    last_error,
                } => tracing::warn!(
                    consecutive_failures,
                    last_error = %last_error,
                    "Tracking health degraded"
                ),
            }
            self.last_health = health;
        }

        report.published = self.publish_snapshot();

        if report.lines_read > 0 || report.samples_recorded > 0 {
            tracing::debug!(
                lines_read = report.lines_read,
                events_classified = report.events_classified,
                transitions = report.transitions,
                samples_recorded = report.samples_recorded,
                "Session tick"
            );
        }
        report
    }

    fn scan_screenshots(&mut self) -> usize {
        let scan = match self.screenshot_scanner.scan() {
            Ok(scan) => scan,
            Err(error) => {
                self.screenshot_failures = self.screenshot_failures.saturating_add(1);
                tracing::debug!(
                    screenshot_directory = %self.screenshot_scanner.directory().display(),
                    consecutive_failures = self.screenshot_failures,
                    scan_error = %error,
                    "Screenshot scan failed, retrying next tick"
                );
                self.screenshot_error = Some(format!("screenshot directory: {error}"));
                return 0;
            }
        };
        self.screenshot_failures = 0;
        self.screenshot_error = None;

        self.timeline.discard_samples(&scan.removed_files);
        scan.new_samples
            .into_iter()
            .filter(|sample| self.timeline.record(TimelineEntry::Position(sample.clone())))
            .count()
    }

    /// Log tail problems take precedence; repeated screenshot scan
    /// failures degrade health the same way.
    fn current_health(&self) -> TailHealth {
        let log_health = self.tail_reader.health();
        if log_health != TailHealth::Healthy || self.screenshot_failures < self.failure_threshold {
            return log_health;
        }

        TailHealth::Degraded {
            consecutive_failures: self.screenshot_failures,
            last_error: self.screenshot_error.clone().unwrap_or_default(),
        }
    }

    fn publish_snapshot(&mut self) -> bool {
        let snapshot = self.build_snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        })
    }

    fn build_snapshot(&self) -> SessionSnapshot {
        let raid_state = self.raid_state.state().clone();
        let map = raid_state
            .current_map_id
            .as_deref()
            .map(|map_id| self.metadata.map_display(map_id));
        let quests = self
            .session_quests
            .iter()
            .map(|quest_id| self.metadata.quest_display(quest_id))
            .collect();

        SessionSnapshot {
            current_position: self.timeline.current_position().cloned(),
            recent_events: self.raid_state.recent_events().cloned().collect(),
            map,
            quests,
            health: self.last_health.clone(),
            anomaly_count: self.raid_state.anomaly_count(),
            raid_state,
        }
    }
}
