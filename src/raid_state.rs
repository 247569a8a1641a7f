use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::VecDeque;

use crate::game_log::{EventTag, LogEvent, LogEventKind};

const MAX_RECENT_ANOMALIES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RaidPhase {
    Idle,
    Loading,
    InRaid,
    Extracted,
    Dead,
    Ended,
}

impl RaidPhase {
    pub fn label(self) -> &'static str {
        match self {
            RaidPhase::Idle => "idle",
            RaidPhase::Loading => "loading",
            RaidPhase::InRaid => "in raid",
            RaidPhase::Extracted => "extracted",
            RaidPhase::Dead => "dead",
            RaidPhase::Ended => "ended",
        }
    }

    fn holds_map(self) -> bool {
        matches!(
            self,
            RaidPhase::Loading | RaidPhase::InRaid | RaidPhase::Extracted
        )
    }
}

/// Edges of the raid lifecycle: event kind, phases it is accepted in, and
/// the phase it moves to. Event kinds absent from this table never change
/// the phase.
pub const TRANSITION_TABLE: &[(EventTag, &[RaidPhase], RaidPhase)] = &[
    (
        EventTag::RaidStarted,
        &[RaidPhase::Idle, RaidPhase::Ended],
        RaidPhase::Loading,
    ),
    (EventTag::MapLoaded, &[RaidPhase::Loading], RaidPhase::InRaid),
    (
        EventTag::PlayerExtracted,
        &[RaidPhase::InRaid],
        RaidPhase::Extracted,
    ),
    (EventTag::PlayerDied, &[RaidPhase::InRaid], RaidPhase::Dead),
    (
        EventTag::RaidEnded,
        &[RaidPhase::Extracted, RaidPhase::Dead, RaidPhase::InRaid],
        RaidPhase::Ended,
    ),
];

pub fn is_phase_event(tag: EventTag) -> bool {
    TRANSITION_TABLE
        .iter()
        .any(|(table_tag, _, _)| *table_tag == tag)
}

pub fn next_phase(current: RaidPhase, tag: EventTag) -> Option<RaidPhase> {
    TRANSITION_TABLE
        .iter()
        .find(|(table_tag, allowed, _)| *table_tag == tag && allowed.contains(&current))
        .map(|(_, _, next)| *next)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaidState {
    pub phase: RaidPhase,
    pub current_map_id: Option<String>,
    pub started_at: Option<NaiveDateTime>,
    pub last_event_at: Option<NaiveDateTime>,
}

impl Default for RaidState {
    fn default() -> Self {
        Self {
            phase: RaidPhase::Idle,
            current_map_id: None,
            started_at: None,
            last_event_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    Event(EventTag),
    SessionBoundary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub from: RaidPhase,
    pub to: RaidPhase,
    pub at: NaiveDateTime,
    pub cause: TransitionCause,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Anomaly {
    pub phase: RaidPhase,
    pub event: LogEvent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Transitioned(StateChange),
    /// Accepted without touching the phase (quest progress, status lines).
    Forwarded,
    Ignored(Anomaly),
}

/// Sole owner of [`RaidState`]. Out-of-order or duplicate lines are
/// recorded as anomalies and leave the state untouched.
pub struct RaidStateMachine {
    state: RaidState,
    recent_events: VecDeque<LogEvent>,
    recent_event_capacity: usize,
    recent_anomalies: VecDeque<Anomaly>,
    anomaly_count: u64,
}

impl RaidStateMachine {
    pub fn new(recent_event_capacity: usize) -> Self {
        Self {
            state: RaidState::default(),
            recent_events: VecDeque::new(),
            recent_event_capacity,
            recent_anomalies: VecDeque::new(),
            anomaly_count: 0,
        }
    }

    pub fn state(&self) -> &RaidState {
        &self.state
    }

    pub fn recent_events(&self) -> impl Iterator<Item = &LogEvent> {
        self.recent_events.iter()
    }

    pub fn recent_anomalies(&self) -> impl Iterator<Item = &Anomaly> {
        self.recent_anomalies.iter()
    }

    pub fn anomaly_count(&self) -> u64 {
        self.anomaly_count
    }

    pub fn apply(&mut self, event: LogEvent) -> EventOutcome {
        let tag = event.kind.tag();
        if !is_phase_event(tag) {
            self.remember_event(event);
            return EventOutcome::Forwarded;
        }

        let from = self.state.phase;
        let Some(to) = next_phase(from, tag) else {
            tracing::debug!(
                phase = from.label(),
                event_kind = ?tag,
                sequence = event.sequence,
                "Ignoring raid event without a transition from the current phase"
            );
            let anomaly = Anomaly { phase: from, event };
            self.anomaly_count = self.anomaly_count.saturating_add(1);
            if self.recent_anomalies.len() >= MAX_RECENT_ANOMALIES {
                self.recent_anomalies.pop_front();
            }
            self.recent_anomalies.push_back(anomaly.clone());
            return EventOutcome::Ignored(anomaly);
        };

        match &event.kind {
            LogEventKind::RaidStarted { map_id } => {
                self.state.started_at = Some(event.timestamp);
                self.state.current_map_id = map_id.clone();
            }
            LogEventKind::MapLoaded { map_id } => {
                self.state.current_map_id = Some(map_id.clone());
            }
            _ => {}
        }
        if !to.holds_map() {
            self.state.current_map_id = None;
        }
        self.state.phase = to;
        self.state.last_event_at = Some(event.timestamp);

        tracing::info!(
            from = from.label(),
            to = to.label(),
            map_id = self.state.current_map_id.as_deref().unwrap_or("-"),
            "Raid phase changed"
        );

        let change = StateChange {
            from,
            to,
            at: event.timestamp,
            cause: TransitionCause::Event(tag),
        };
        self.remember_event(event);
        EventOutcome::Transitioned(change)
    }

    /// Out-of-band reset on log rotation or truncation; valid from any phase.
    pub fn force_idle(&mut self, at: Option<NaiveDateTime>) -> StateChange {
        let from = self.state.phase;
        let at = at.or(self.state.last_event_at).unwrap_or_default();

        self.state = RaidState {
            last_event_at: Some(at),
            ..RaidState::default()
        };
        tracing::info!(from = from.label(), "Raid state reset by session boundary");

        StateChange {
            from,
            to: RaidPhase::Idle,
            at,
            cause: TransitionCause::SessionBoundary,
        }
    }

    fn remember_event(&mut self, event: LogEvent) {
        if self.recent_event_capacity == 0 {
            return;
        }
        while self.recent_events.len() >= self.recent_event_capacity {
            self.recent_events.pop_front();
        }
        self.recent_events.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        next_phase, EventOutcome, RaidPhase, RaidStateMachine, TransitionCause, TRANSITION_TABLE,
    };
    use crate::game_log::{LogEvent, LogEventKind};
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    const ALL_PHASES: [RaidPhase; 6] = [
        RaidPhase::Idle,
        RaidPhase::Loading,
        RaidPhase::InRaid,
        RaidPhase::Extracted,
        RaidPhase::Dead,
        RaidPhase::Ended,
    ];

    fn base_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 12, 27)
            .and_then(|date| date.and_hms_opt(15, 20, 0))
            .expect("Valid test timestamp")
    }

    fn event(sequence: u64, kind: LogEventKind) -> LogEvent {
        LogEvent {
            timestamp: base_time() + Duration::seconds(sequence as i64),
            sequence,
            channel: "application".to_string(),
            kind,
        }
    }

    fn sample_kinds() -> Vec<LogEventKind> {
        vec![
            LogEventKind::RaidStarted {
                map_id: Some("customs".to_string()),
            },
            LogEventKind::MapLoaded {
                map_id: "customs".to_string(),
            },
            LogEventKind::PlayerExtracted { location: None },
            LogEventKind::PlayerDied { cause: None },
            LogEventKind::RaidEnded { result: None },
            LogEventKind::QuestObjectiveUpdated {
                quest_id: "q1".to_string(),
                objective_id: "o1".to_string(),
            },
            LogEventKind::RaidStatus {
                status: "matching".to_string(),
            },
        ]
    }

    #[test]
    fn follows_documented_raid_lifecycle() {
        let mut machine = RaidStateMachine::new(10);

        let started = machine.apply(event(
            1,
            LogEventKind::RaidStarted {
                map_id: Some("customs".to_string()),
            },
        ));
        assert!(matches!(
            started,
            EventOutcome::Transitioned(ref change)
                if change.from == RaidPhase::Idle && change.to == RaidPhase::Loading
        ));

        machine.apply(event(
            2,
            LogEventKind::MapLoaded {
                map_id: "customs".to_string(),
            },
        ));
        assert_eq!(machine.state().phase, RaidPhase::InRaid);
        assert_eq!(machine.state().current_map_id.as_deref(), Some("customs"));
        assert_eq!(machine.state().started_at, Some(base_time() + Duration::seconds(1)));

        machine.apply(event(3, LogEventKind::PlayerExtracted { location: None }));
        assert_eq!(machine.state().phase, RaidPhase::Extracted);
        assert_eq!(machine.state().current_map_id.as_deref(), Some("customs"));

        machine.apply(event(4, LogEventKind::RaidEnded { result: None }));
        assert_eq!(machine.state().phase, RaidPhase::Ended);
        assert_eq!(machine.state().current_map_id, None);
        assert_eq!(machine.state().last_event_at, Some(base_time() + Duration::seconds(4)));
    }

    #[test]
    fn death_clears_map_and_duplicates_are_anomalies() {
        let mut machine = RaidStateMachine::new(10);
        machine.apply(event(1, LogEventKind::RaidStarted { map_id: None }));
        machine.apply(event(
            2,
            LogEventKind::MapLoaded {
                map_id: "woods".to_string(),
            },
        ));
        machine.apply(event(3, LogEventKind::PlayerDied { cause: None }));
        assert_eq!(machine.state().phase, RaidPhase::Dead);
        assert_eq!(machine.state().current_map_id, None);

        let duplicate = machine.apply(event(4, LogEventKind::PlayerDied { cause: None }));
        assert!(matches!(duplicate, EventOutcome::Ignored(ref anomaly) if anomaly.phase == RaidPhase::Dead));
        assert_eq!(machine.state().phase, RaidPhase::Dead);
        assert_eq!(machine.anomaly_count(), 1);
        assert_eq!(machine.recent_anomalies().count(), 1);
    }

    #[test]
    fn quest_updates_do_not_change_phase() {
        let mut machine = RaidStateMachine::new(10);
        let outcome = machine.apply(event(
            1,
            LogEventKind::QuestObjectiveUpdated {
                quest_id: "q1".to_string(),
                objective_id: "o1".to_string(),
            },
        ));

        assert_eq!(outcome, EventOutcome::Forwarded);
        assert_eq!(machine.state().phase, RaidPhase::Idle);
        assert_eq!(machine.state().last_event_at, None);
        assert_eq!(machine.recent_events().count(), 1);
    }

    #[test]
    fn session_boundary_forces_idle_from_any_phase() {
        for phase_steps in 0..4 {
            let mut machine = RaidStateMachine::new(10);
            let kinds = sample_kinds();
            for (index, kind) in kinds.into_iter().take(phase_steps).enumerate() {
                machine.apply(event(index as u64, kind));
            }

            let change = machine.force_idle(Some(base_time()));
            assert_eq!(change.to, RaidPhase::Idle);
            assert_eq!(change.cause, TransitionCause::SessionBoundary);
            assert_eq!(machine.state().phase, RaidPhase::Idle);
            assert_eq!(machine.state().current_map_id, None);
            assert_eq!(machine.state().started_at, None);
        }
    }

    #[test]
    fn every_observed_transition_is_in_the_table() {
        let kinds = sample_kinds();
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;

        for _ in 0..200 {
            let mut machine = RaidStateMachine::new(4);
            for sequence in 0..40 {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                let kind = kinds[(seed % kinds.len() as u64) as usize].clone();
                let tag = kind.tag();

                if let EventOutcome::Transitioned(change) = machine.apply(event(sequence, kind)) {
                    assert!(
                        TRANSITION_TABLE.iter().any(|(table_tag, allowed, next)| {
                            *table_tag == tag && allowed.contains(&change.from) && *next == change.to
                        }),
                        "Transition {:?} -> {:?} on {tag:?} is not in the table",
                        change.from,
                        change.to
                    );
                }

                let state = machine.state();
                assert!(ALL_PHASES.contains(&state.phase));
                if state.current_map_id.is_some() {
                    assert!(matches!(
                        state.phase,
                        RaidPhase::Loading | RaidPhase::InRaid | RaidPhase::Extracted
                    ));
                }
            }
            assert!(machine.recent_events().count() <= 4);
        }
    }

    #[test]
    fn transition_lookup_matches_table() {
        assert_eq!(
            next_phase(RaidPhase::Ended, crate::game_log::EventTag::RaidStarted),
            Some(RaidPhase::Loading)
        );
        assert_eq!(
            next_phase(RaidPhase::InRaid, crate::game_log::EventTag::RaidStarted),
            None
        );
        assert_eq!(
            next_phase(RaidPhase::Idle, crate::game_log::EventTag::QuestStarted),
            None
        );
    }
}
