use chrono::{Duration, NaiveDateTime, Timelike};
use serde::Serialize;
use std::collections::HashSet;

use crate::game_log::LogEvent;
use crate::raid_state::{RaidPhase, StateChange};
use crate::screenshot::PositionSample;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "entry", content = "data", rename_all = "camelCase")]
pub enum TimelineEntry {
    Event(LogEvent),
    Position(PositionSample),
}

impl TimelineEntry {
    pub fn timestamp(&self) -> NaiveDateTime {
        match self {
            TimelineEntry::Event(event) => event.timestamp,
            TimelineEntry::Position(sample) => sample.timestamp,
        }
    }

    // Events sort ahead of positions at the same instant: a state change
    // is authoritative over a screenshot taken in that same second.
    fn order_key(&self) -> (NaiveDateTime, u8, u64) {
        match self {
            TimelineEntry::Event(event) => (event.timestamp, 0, event.sequence),
            TimelineEntry::Position(sample) => (sample.timestamp, 1, 0),
        }
    }
}

/// Ordered merge of log events and position samples for one session.
pub struct PositionTimeline {
    entries: Vec<TimelineEntry>,
    recorded_samples: HashSet<String>,
    capacity: usize,
    stale_through: Option<NaiveDateTime>,
}

impl PositionTimeline {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            recorded_samples: HashSet::new(),
            capacity: capacity.max(1),
            stale_through: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `false` when a sample from the same file was already recorded.
    pub fn record(&mut self, entry: TimelineEntry) -> bool {
        if let TimelineEntry::Position(sample) = &entry {
            if !self.recorded_samples.insert(sample.source_filename.clone()) {
                return false;
            }
        }

        let key = entry.order_key();
        let index = self
            .entries
            .partition_point(|existing| existing.order_key() <= key);
        self.entries.insert(index, entry);

        while self.entries.len() > self.capacity {
            let evicted = self.entries.remove(0);
            if let TimelineEntry::Position(sample) = evicted {
                self.recorded_samples.remove(&sample.source_filename);
            }
        }

        true
    }

    /// Applies the staleness rules of a raid transition: a new raid hides
    /// positions from before its start, death and raid end hide everything
    /// recorded up to that moment.
    pub fn observe_transition(&mut self, change: &StateChange) {
        match change.to {
            RaidPhase::Idle => self.reset(),
            RaidPhase::Loading => {
                // Screenshot names only carry minutes, so anything from the
                // minute the raid started in still counts.
                let minute_start = change
                    .at
                    .with_second(0)
                    .and_then(|value| value.with_nanosecond(0))
                    .unwrap_or(change.at);
                self.stale_through = Some(minute_start - Duration::seconds(1));
            }
            RaidPhase::Dead | RaidPhase::Ended => {
                // Lines without a timestamp can carry a fallback time far in
                // the past; everything already seen predates the transition.
                let cutoff = self
                    .newest_position_timestamp()
                    .map_or(change.at, |newest| newest.max(change.at));
                self.stale_through = Some(cutoff);
            }
            RaidPhase::InRaid | RaidPhase::Extracted => {}
        }
    }

    fn newest_position_timestamp(&self) -> Option<NaiveDateTime> {
        self.entries.iter().rev().find_map(|entry| match entry {
            TimelineEntry::Position(sample) => Some(sample.timestamp),
            TimelineEntry::Event(_) => None,
        })
    }

    pub fn current_position(&self) -> Option<&PositionSample> {
        self.entries.iter().rev().find_map(|entry| match entry {
            TimelineEntry::Position(sample)
                if self
                    .stale_through
                    .map(|cutoff| sample.timestamp > cutoff)
                    .unwrap_or(true) =>
            {
                Some(sample)
            }
            _ => None,
        })
    }

    /// Entries at or after `since`, oldest first. The iterator is `Clone`,
    /// so callers can restart it without touching the timeline again.
    pub fn history(
        &self,
        since: NaiveDateTime,
    ) -> impl Iterator<Item = &TimelineEntry> + Clone + '_ {
        let start = self
            .entries
            .partition_point(|entry| entry.timestamp() < since);
        self.entries[start..].iter()
    }

    pub fn discard_samples(&mut self, file_names: &[String]) {
        if file_names.is_empty() {
            return;
        }

        let discarded: HashSet<&str> = file_names.iter().map(String::as_str).collect();
        self.entries.retain(|entry| match entry {
            TimelineEntry::Position(sample) => !discarded.contains(sample.source_filename.as_str()),
            TimelineEntry::Event(_) => true,
        });
        for file_name in file_names {
            self.recorded_samples.remove(file_name);
        }
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.recorded_samples.clear();
        self.stale_through = None;
    }
}
