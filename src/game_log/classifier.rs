use chrono::{NaiveDateTime, Timelike};
use regex::{Captures, Regex};
use serde::Serialize;

use super::tail::TailLine;

const CHANNEL_APPLICATION: &str = "application";
const CHANNEL_NOTIFICATIONS: &str = "notifications";
const QUEST_CHANNELS: &[&str] = &[CHANNEL_APPLICATION, CHANNEL_NOTIFICATIONS];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "kind",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum LogEventKind {
    RaidStarted { map_id: Option<String> },
    MapLoaded { map_id: String },
    PlayerExtracted { location: Option<String> },
    PlayerDied { cause: Option<String> },
    QuestObjectiveUpdated { quest_id: String, objective_id: String },
    QuestStarted { quest_id: String },
    QuestCompleted { quest_id: String },
    ExtractionStarted,
    RaidStatus { status: String },
    RaidEnded { result: Option<String> },
}

/// Fieldless mirror of [`LogEventKind`], used as the key of the raid
/// transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventTag {
    RaidStarted,
    MapLoaded,
    PlayerExtracted,
    PlayerDied,
    QuestObjectiveUpdated,
    QuestStarted,
    QuestCompleted,
    ExtractionStarted,
    RaidStatus,
    RaidEnded,
}

impl LogEventKind {
    pub fn tag(&self) -> EventTag {
        match self {
            LogEventKind::RaidStarted { .. } => EventTag::RaidStarted,
            LogEventKind::MapLoaded { .. } => EventTag::MapLoaded,
            LogEventKind::PlayerExtracted { .. } => EventTag::PlayerExtracted,
            LogEventKind::PlayerDied { .. } => EventTag::PlayerDied,
            LogEventKind::QuestObjectiveUpdated { .. } => EventTag::QuestObjectiveUpdated,
            LogEventKind::QuestStarted { .. } => EventTag::QuestStarted,
            LogEventKind::QuestCompleted { .. } => EventTag::QuestCompleted,
            LogEventKind::ExtractionStarted => EventTag::ExtractionStarted,
            LogEventKind::RaidStatus { .. } => EventTag::RaidStatus,
            LogEventKind::RaidEnded { .. } => EventTag::RaidEnded,
        }
    }

    pub fn quest_id(&self) -> Option<&str> {
        match self {
            LogEventKind::QuestObjectiveUpdated { quest_id, .. }
            | LogEventKind::QuestStarted { quest_id }
            | LogEventKind::QuestCompleted { quest_id } => Some(quest_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub timestamp: NaiveDateTime,
    /// Monotonic line number assigned by the tail reader; breaks ties
    /// between events that share a timestamp.
    pub sequence: u64,
    pub channel: String,
    #[serde(flatten)]
    pub kind: LogEventKind,
}

/// Timestamp context for lines whose own prefix is missing or malformed.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineClock {
    pub fallback: Option<NaiveDateTime>,
    pub sequence: u64,
}

struct ClassifierRule {
    name: &'static str,
    pattern: Regex,
    channels: Option<&'static [&'static str]>,
    build: fn(&Captures) -> Option<LogEventKind>,
}

impl ClassifierRule {
    fn accepts_channel(&self, channel: &str) -> bool {
        self.channels
            .map(|channels| {
                channels
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(channel))
            })
            .unwrap_or(true)
    }
}

// Evaluated top to bottom, first match wins. Specific raid lifecycle
// rules must stay above the generic raid status rule.
const RULE_SPECS: &[(
    &str,
    &str,
    Option<&[&str]>,
    fn(&Captures) -> Option<LogEventKind>,
)] = &[
    (
        "raid_ended",
        r"(?i)\b(?:RaidEnded|Raid\s+ended)\b(?:.*?\bresult=(?P<result>[\w-]+))?",
        None,
        build_raid_ended,
    ),
    (
        "raid_started",
        r"(?i)\b(?:RaidStarted|Started\s+raid)\b(?:.*?\bmapId=(?P<map>[\w-]+))?",
        None,
        build_raid_started,
    ),
    (
        "map_loading",
        r"(?i)\bLoading\s+map:\s*(?P<map>[\w-]+)",
        None,
        build_raid_started,
    ),
    (
        "map_loaded",
        r"(?i)\bMapLoaded\b.*?\bmapId=(?P<map>[\w-]+)|\bMap\s+(?P<named_map>[\w-]+)\s+loaded\b",
        None,
        build_map_loaded,
    ),
    (
        "player_extracted",
        r"(?i)\b(?:PlayerExtracted|Player\s+extracted)\b(?:.*?\b(?:location|exit)=(?P<location>[\w-]+))?",
        None,
        build_player_extracted,
    ),
    (
        "player_died",
        r"(?i)\b(?:PlayerDied|Player\s+died)\b(?:.*?\bcause=(?P<cause>[\w-]+))?",
        None,
        build_player_died,
    ),
    (
        "extraction_started",
        r"(?i)\b(?:ExtractionStarted|Extract(?:ion)?\s+started)\b",
        None,
        build_extraction_started,
    ),
    (
        "quest_objective_updated",
        r"(?i)\bQuestObjectiveUpdated\b.*?\bquestId=(?P<quest>\w+).*?\bobjectiveId=(?P<objective>\w+)",
        Some(QUEST_CHANNELS),
        build_quest_objective_updated,
    ),
    (
        "quest_completed",
        r"(?i)\bQuestCompleted\b.*?\bquestId=(?P<quest>\w+)|\bQuest\s+completed:?\s*(?P<named_quest>\w+)",
        Some(QUEST_CHANNELS),
        build_quest_completed,
    ),
    (
        "quest_started",
        r"(?i)\bQuestStarted\b.*?\bquestId=(?P<quest>\w+)|\bQuest\s+started:?\s*(?P<named_quest>\w+)",
        Some(QUEST_CHANNELS),
        build_quest_started,
    ),
    (
        "raid_status",
        r"(?i)\bRaid(?:Status)?\b[:\s]+(?:status\b[:=\s]*)?(?P<status>[A-Za-z][\w-]*)",
        None,
        build_raid_status,
    ),
];

lazy_static::lazy_static! {
    static ref CLASSIFIER_RULES: Vec<ClassifierRule> = compile_rules();
    static ref LINE_TIMESTAMP_PATTERN: Option<Regex> = Regex::new(
        r"^\s*(?P<seconds>\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2})(?:[.,](?P<fraction>\d{1,9}))?"
    )
    .map_err(|error| {
        tracing::error!(pattern_error = %error, "Failed to compile log timestamp pattern");
    })
    .ok();
}

fn compile_rules() -> Vec<ClassifierRule> {
    RULE_SPECS
        .iter()
        .filter_map(|&(name, pattern, channels, build)| match Regex::new(pattern) {
            Ok(pattern) => Some(ClassifierRule {
                name,
                pattern,
                channels,
                build,
            }),
            Err(error) => {
                tracing::error!(rule = name, pattern_error = %error, "Failed to compile classifier rule");
                None
            }
        })
        .collect()
}

fn captured(captures: &Captures, group: &str) -> Option<String> {
    captures
        .name(group)
        .map(|value| value.as_str().trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn normalize_map_id(map_id: String) -> String {
    map_id.to_ascii_lowercase()
}

fn build_raid_ended(captures: &Captures) -> Option<LogEventKind> {
    Some(LogEventKind::RaidEnded {
        result: captured(captures, "result").map(|value| value.to_ascii_lowercase()),
    })
}

fn build_raid_started(captures: &Captures) -> Option<LogEventKind> {
    Some(LogEventKind::RaidStarted {
        map_id: captured(captures, "map").map(normalize_map_id),
    })
}

fn build_map_loaded(captures: &Captures) -> Option<LogEventKind> {
    let map_id = captured(captures, "map").or_else(|| captured(captures, "named_map"))?;
    Some(LogEventKind::MapLoaded {
        map_id: normalize_map_id(map_id),
    })
}

fn build_player_extracted(captures: &Captures) -> Option<LogEventKind> {
    Some(LogEventKind::PlayerExtracted {
        location: captured(captures, "location"),
    })
}

fn build_player_died(captures: &Captures) -> Option<LogEventKind> {
    Some(LogEventKind::PlayerDied {
        cause: captured(captures, "cause"),
    })
}

fn build_extraction_started(_captures: &Captures) -> Option<LogEventKind> {
    Some(LogEventKind::ExtractionStarted)
}

fn build_quest_objective_updated(captures: &Captures) -> Option<LogEventKind> {
    Some(LogEventKind::QuestObjectiveUpdated {
        quest_id: captured(captures, "quest")?,
        objective_id: captured(captures, "objective")?,
    })
}

fn build_quest_completed(captures: &Captures) -> Option<LogEventKind> {
    let quest_id = captured(captures, "quest").or_else(|| captured(captures, "named_quest"))?;
    Some(LogEventKind::QuestCompleted { quest_id })
}

fn build_quest_started(captures: &Captures) -> Option<LogEventKind> {
    let quest_id = captured(captures, "quest").or_else(|| captured(captures, "named_quest"))?;
    Some(LogEventKind::QuestStarted { quest_id })
}

fn build_raid_status(captures: &Captures) -> Option<LogEventKind> {
    Some(LogEventKind::RaidStatus {
        status: captured(captures, "status")?.to_ascii_lowercase(),
    })
}

/// Reads the `YYYY-MM-DD HH:MM:SS[.fff]` prefix the game writes on every
/// line. A trailing UTC offset, if present, is ignored.
pub fn line_timestamp(line: &str) -> Option<NaiveDateTime> {
    let captures = LINE_TIMESTAMP_PATTERN.as_ref()?.captures(line)?;
    let seconds_text = captures.name("seconds")?.as_str().replace('T', " ");
    let timestamp = NaiveDateTime::parse_from_str(&seconds_text, "%Y-%m-%d %H:%M:%S").ok()?;

    let Some(fraction) = captures.name("fraction") else {
        return Some(timestamp);
    };
    let digits = fraction.as_str();
    let nanoseconds = digits.parse::<u32>().ok()? * 10_u32.pow(9 - digits.len() as u32);
    timestamp.with_nanosecond(nanoseconds)
}

/// Maps one raw line to at most one event.
///
/// Returns `None` for the overwhelming majority of lines, which are
/// telemetry nobody here cares about.
pub fn classify(line: &str, channel: &str, clock: LineClock) -> Option<LogEvent> {
    let trimmed_line = line.trim_end();
    if trimmed_line.trim_start().is_empty() {
        return None;
    }

    let (rule, kind) = CLASSIFIER_RULES
        .iter()
        .filter(|rule| rule.accepts_channel(channel))
        .find_map(|rule| {
            let captures = rule.pattern.captures(trimmed_line)?;
            (rule.build)(&captures).map(|kind| (rule, kind))
        })?;

    let timestamp = line_timestamp(trimmed_line)
        .or(clock.fallback)
        .unwrap_or_default();

    tracing::trace!(rule = rule.name, channel, sequence = clock.sequence, "Classified log line");

    Some(LogEvent {
        timestamp,
        sequence: clock.sequence,
        channel: channel.to_string(),
        kind,
    })
}

pub fn classify_line(line: &TailLine) -> Option<LogEvent> {
    classify(
        &line.text,
        &line.channel,
        LineClock {
            fallback: line.fallback_timestamp,
            sequence: line.sequence,
        },
    )
}
