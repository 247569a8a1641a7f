use serde::Serialize;

use crate::game_log::{LogEvent, TailHealth};
use crate::metadata::{MapDisplay, QuestDisplay};
use crate::raid_state::{RaidPhase, RaidState};
use crate::screenshot::PositionSample;

/// What external consumers see of a session, refreshed every tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub raid_state: RaidState,
    pub current_position: Option<PositionSample>,
    pub recent_events: Vec<LogEvent>,
    pub map: Option<MapDisplay>,
    pub quests: Vec<QuestDisplay>,
    pub health: TailHealth,
    pub anomaly_count: u64,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            raid_state: RaidState::default(),
            current_position: None,
            recent_events: Vec::new(),
            map: None,
            quests: Vec::new(),
            health: TailHealth::Healthy,
            anomaly_count: 0,
        }
    }
}

impl SessionSnapshot {
    /// One-line human readable rendering used by the CLI.
    pub fn summary_line(&self) -> String {
        let map_label = self
            .map
            .as_ref()
            .map(|map| map.display_name.as_str())
            .unwrap_or("-");
        let position_label = match &self.current_position {
            Some(sample) => format!(
                "({:.1}, {:.1}, {:.1}) {}deg @ {}",
                sample.x,
                sample.y,
                sample.z,
                sample.rotation_degrees,
                sample.timestamp.format("%H:%M")
            ),
            None => "unknown".to_string(),
        };

        let mut line = format!(
            "[{}] map={map_label} position={position_label}",
            self.raid_state.phase.label()
        );
        if self.raid_state.phase == RaidPhase::Idle && self.map.is_none() {
            line = format!("[{}] waiting for a raid", self.raid_state.phase.label());
        }
        if !self.quests.is_empty() {
            let quest_names: Vec<&str> = self
                .quests
                .iter()
                .map(|quest| quest.display_name.as_str())
                .collect();
            line.push_str(&format!(" quests={}", quest_names.join(", ")));
        }
        if let TailHealth::Degraded {
            consecutive_failures,
            ..
        } = &self.health
        {
            line.push_str(&format!(" (log degraded, {consecutive_failures} failures)"));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::SessionSnapshot;
    use crate::game_log::TailHealth;
    use crate::metadata::MapDisplay;
    use crate::raid_state::RaidPhase;
    use crate::screenshot::PositionSample;
    use chrono::NaiveDate;

    #[test]
    fn serializes_with_camel_case_keys() {
        let snapshot = SessionSnapshot::default();
        let value = serde_json::to_value(&snapshot).expect("Snapshot should serialize");

        assert_eq!(value["raidState"]["phase"], "idle");
        assert!(value["currentPosition"].is_null());
        assert_eq!(value["health"]["status"], "healthy");
        assert_eq!(value["anomalyCount"], 0);
    }

    #[test]
    fn summary_mentions_map_position_and_health() {
        let mut snapshot = SessionSnapshot::default();
        snapshot.raid_state.phase = RaidPhase::InRaid;
        snapshot.map = Some(MapDisplay {
            map_id: "customs".to_string(),
            display_name: "Customs".to_string(),
            geometry_ref: None,
            resolved: true,
        });
        snapshot.current_position = Some(PositionSample {
            timestamp: NaiveDate::from_ymd_opt(2025, 12, 27)
                .and_then(|date| date.and_hms_opt(15, 20, 0))
                .expect("Valid test timestamp"),
            x: 12.5,
            y: 3.0,
            z: -40.5,
            rotation_degrees: 90,
            source_filename: "shot.png".to_string(),
        });
        snapshot.health = TailHealth::Degraded {
            consecutive_failures: 6,
            last_error: "locked".to_string(),
        };

        let line = snapshot.summary_line();
        assert!(line.starts_with("[in raid] map=Customs"), "Unexpected summary: {line}");
        assert!(line.contains("(12.5, 3.0, -40.5) 90deg @ 15:20"), "Unexpected summary: {line}");
        assert!(line.contains("6 failures"));
    }
}
