use chrono::NaiveDateTime;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{File, Metadata};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::classifier::line_timestamp;

#[derive(Debug, thiserror::Error)]
pub enum TailError {
    #[error("log directory '{path}' is unavailable: {source}")]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("log file '{path}' is unavailable: {source}")]
    File {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    device: Option<u64>,
    inode: Option<u64>,
    created: Option<SystemTime>,
}

#[cfg(unix)]
fn file_identity(metadata: &Metadata) -> FileIdentity {
    use std::os::unix::fs::MetadataExt;

    FileIdentity {
        device: Some(metadata.dev()),
        inode: Some(metadata.ino()),
        created: None,
    }
}

#[cfg(not(unix))]
fn file_identity(metadata: &Metadata) -> FileIdentity {
    FileIdentity {
        device: None,
        inode: None,
        created: metadata.created().ok(),
    }
}

#[derive(Debug, Clone)]
pub struct TailCursor {
    pub file_path: PathBuf,
    pub byte_offset: u64,
    pub identity: FileIdentity,
    modified: SystemTime,
    /// Set after the head of an over-long line was emitted; its tail is
    /// dropped up to the next newline.
    skipping_line_tail: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryReason {
    Rotated { previous_path: PathBuf },
    Truncated,
    Replaced,
}

/// Discontinuity in the tracked log; everything derived from the previous
/// stream is stale once this is observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionBoundary {
    pub reason: BoundaryReason,
    pub file_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TailHealth {
    Healthy,
    Degraded {
        consecutive_failures: u32,
        last_error: String,
    },
}

#[derive(Debug, Clone)]
pub struct TailLine {
    pub text: String,
    pub channel: String,
    pub sequence: u64,
    /// Last well-formed line timestamp seen up to and including this line.
    pub fallback_timestamp: Option<NaiveDateTime>,
}

#[derive(Debug, Default)]
pub struct TailPoll {
    pub boundary: Option<SessionBoundary>,
    pub lines: Vec<TailLine>,
}

impl TailPoll {
    pub fn is_empty(&self) -> bool {
        self.boundary.is_none() && self.lines.is_empty()
    }
}

pub struct TailReaderOptions {
    pub file_pattern: Regex,
    pub max_read_bytes: u64,
    pub failure_threshold: u32,
    pub replay_existing: bool,
}

#[derive(Debug, Clone)]
struct LogFileCandidate {
    path: PathBuf,
    modified: SystemTime,
}

/// Follows the newest game log under a directory, one bounded read per poll.
pub struct LogTailReader {
    directory: PathBuf,
    options: TailReaderOptions,
    cursor: Option<TailCursor>,
    known_files: HashSet<PathBuf>,
    has_polled: bool,
    consecutive_failures: u32,
    last_error: Option<String>,
    next_sequence: u64,
    last_good_timestamp: Option<NaiveDateTime>,
}

impl LogTailReader {
    pub fn new(directory: impl Into<PathBuf>, options: TailReaderOptions) -> Self {
        Self {
            directory: directory.into(),
            options,
            cursor: None,
            known_files: HashSet::new(),
            has_polled: false,
            consecutive_failures: 0,
            last_error: None,
            next_sequence: 0,
            last_good_timestamp: None,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn cursor(&self) -> Option<&TailCursor> {
        self.cursor.as_ref()
    }

    pub fn last_good_timestamp(&self) -> Option<NaiveDateTime> {
        self.last_good_timestamp
    }

    pub fn health(&self) -> TailHealth {
        if self.consecutive_failures < self.options.failure_threshold.max(1) {
            return TailHealth::Healthy;
        }

        TailHealth::Degraded {
            consecutive_failures: self.consecutive_failures,
            last_error: self.last_error.clone().unwrap_or_default(),
        }
    }

    /// Never blocks beyond one bounded read; failures are counted and
    /// reported through [`LogTailReader::health`] instead of returned.
    pub fn poll(&mut self) -> TailPoll {
        match self.try_poll() {
            Ok(poll) => {
                if self.consecutive_failures >= self.options.failure_threshold.max(1) {
                    tracing::info!(
                        log_directory = %self.directory.display(),
                        consecutive_failures = self.consecutive_failures,
                        "Log tailing recovered"
                    );
                }
                self.consecutive_failures = 0;
                self.last_error = None;
                poll
            }
            Err(error) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures == self.options.failure_threshold.max(1) {
                    tracing::warn!(
                        consecutive_failures = self.consecutive_failures,
                        poll_error = %error,
                        "Log tailing degraded"
                    );
                } else {
                    tracing::debug!(poll_error = %error, "Log poll failed, retrying next tick");
                }
                self.last_error = Some(error.to_string());
                TailPoll::default()
            }
        }
    }

    fn try_poll(&mut self) -> Result<TailPoll, TailError> {
        let candidates = find_log_files(&self.directory, &self.options.file_pattern)?;
        let is_first_poll = !self.has_polled;
        self.has_polled = true;

        let mut boundary = self.select_tracked_file(&candidates, is_first_poll)?;
        self.known_files
            .extend(candidates.into_iter().map(|candidate| candidate.path));

        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(TailPoll::default());
        };

        let mut file = File::open(&cursor.file_path).map_err(|source| TailError::File {
            path: cursor.file_path.clone(),
            source,
        })?;
        let metadata = file.metadata().map_err(|source| TailError::File {
            path: cursor.file_path.clone(),
            source,
        })?;
        let identity = file_identity(&metadata);
        let file_length = metadata.len();

        if identity != cursor.identity {
            cursor.identity = identity;
            cursor.byte_offset = 0;
            cursor.skipping_line_tail = false;
            boundary.get_or_insert_with(|| SessionBoundary {
                reason: BoundaryReason::Replaced,
                file_path: cursor.file_path.clone(),
            });
        } else if file_length < cursor.byte_offset {
            cursor.byte_offset = 0;
            cursor.skipping_line_tail = false;
            boundary.get_or_insert_with(|| SessionBoundary {
                reason: BoundaryReason::Truncated,
                file_path: cursor.file_path.clone(),
            });
        }
        if let Ok(modified) = metadata.modified() {
            cursor.modified = modified;
        }

        if file_length == cursor.byte_offset {
            return Ok(TailPoll {
                boundary,
                lines: Vec::new(),
            });
        }

        file.seek(SeekFrom::Start(cursor.byte_offset))
            .map_err(|source| TailError::File {
                path: cursor.file_path.clone(),
                source,
            })?;
        let mut buffer = Vec::new();
        file.take(self.options.max_read_bytes.max(1))
            .read_to_end(&mut buffer)
            .map_err(|source| TailError::File {
                path: cursor.file_path.clone(),
                source,
            })?;

        let read_budget = self.options.max_read_bytes.max(1);
        let mut line_start = 0;
        if cursor.skipping_line_tail {
            let Some(newline_index) = buffer.iter().position(|byte| *byte == b'\n') else {
                cursor.byte_offset = cursor.byte_offset.saturating_add(buffer.len() as u64);
                return Ok(TailPoll {
                    boundary,
                    lines: Vec::new(),
                });
            };
            line_start = newline_index + 1;
            cursor.skipping_line_tail = false;
        }

        let pending = &buffer[line_start..];
        let consumed_length = match pending.iter().rposition(|byte| *byte == b'\n') {
            Some(index) => index + 1,
            // A line longer than the read budget: keep its head, drop the rest.
            None if line_start == 0 && buffer.len() as u64 >= read_budget => {
                cursor.skipping_line_tail = true;
                tracing::debug!(
                    log_path = %cursor.file_path.display(),
                    max_read_bytes = read_budget,
                    "Truncating over-long log line"
                );
                pending.len()
            }
            None => 0,
        };
        cursor.byte_offset = cursor
            .byte_offset
            .saturating_add((line_start + consumed_length) as u64);

        let channel = channel_for_log_file(&cursor.file_path);
        let mut lines = Vec::new();
        for raw_line in pending[..consumed_length].split(|byte| *byte == b'\n') {
            let raw_line = raw_line.strip_suffix(b"\r").unwrap_or(raw_line);
            if raw_line.is_empty() {
                continue;
            }

            let text = String::from_utf8_lossy(raw_line).into_owned();
            if let Some(timestamp) = line_timestamp(&text) {
                self.last_good_timestamp = Some(timestamp);
            }
            lines.push(TailLine {
                text,
                channel: channel.clone(),
                sequence: self.next_sequence,
                fallback_timestamp: self.last_good_timestamp,
            });
            self.next_sequence = self.next_sequence.saturating_add(1);
        }

        Ok(TailPoll { boundary, lines })
    }

    fn select_tracked_file(
        &mut self,
        candidates: &[LogFileCandidate],
        is_first_poll: bool,
    ) -> Result<Option<SessionBoundary>, TailError> {
        let newest_unseen = candidates
            .iter()
            .filter(|candidate| !self.known_files.contains(&candidate.path))
            .max_by_key(|candidate| candidate.modified);

        match self.cursor.as_ref() {
            None => {
                let newest = candidates.iter().max_by_key(|candidate| candidate.modified);
                let Some(newest) = newest else {
                    return Ok(None);
                };

                let start_at_end = is_first_poll && !self.options.replay_existing;
                self.cursor = Some(open_cursor(newest, start_at_end)?);
                tracing::info!(
                    log_path = %newest.path.display(),
                    start_at_end,
                    "Tracking game log"
                );
                Ok(None)
            }
            Some(cursor) => {
                let Some(newer) = newest_unseen.filter(|candidate| {
                    candidate.path != cursor.file_path && candidate.modified >= cursor.modified
                }) else {
                    return Ok(None);
                };

                let previous_path = cursor.file_path.clone();
                self.cursor = Some(open_cursor(newer, false)?);
                tracing::info!(
                    previous_log_path = %previous_path.display(),
                    log_path = %newer.path.display(),
                    "Game log rotated"
                );
                Ok(Some(SessionBoundary {
                    reason: BoundaryReason::Rotated { previous_path },
                    file_path: newer.path.clone(),
                }))
            }
        }
    }
}

fn open_cursor(candidate: &LogFileCandidate, start_at_end: bool) -> Result<TailCursor, TailError> {
    let metadata = std::fs::metadata(&candidate.path).map_err(|source| TailError::File {
        path: candidate.path.clone(),
        source,
    })?;

    Ok(TailCursor {
        file_path: candidate.path.clone(),
        byte_offset: if start_at_end { metadata.len() } else { 0 },
        identity: file_identity(&metadata),
        modified: candidate.modified,
        skipping_line_tail: false,
    })
}

/// Matching files directly under `directory` and one level below it, since
/// the game writes each launch into its own subdirectory.
fn find_log_files(directory: &Path, file_pattern: &Regex) -> Result<Vec<LogFileCandidate>, TailError> {
    let directory_entries = std::fs::read_dir(directory).map_err(|source| TailError::Directory {
        path: directory.to_path_buf(),
        source,
    })?;

    let mut candidates = Vec::new();
    for entry_result in directory_entries {
        let Ok(entry) = entry_result else {
            continue;
        };
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            collect_matching_files(&path, file_pattern, &mut candidates);
        } else if file_type.is_file() {
            push_if_matching(&path, file_pattern, &mut candidates);
        }
    }

    Ok(candidates)
}

fn collect_matching_files(directory: &Path, file_pattern: &Regex, candidates: &mut Vec<LogFileCandidate>) {
    let directory_entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(error) => {
            tracing::debug!(
                log_subdirectory = %directory.display(),
                read_error = %error,
                "Skipping unreadable log subdirectory"
            );
            return;
        }
    };

    for entry in directory_entries.flatten() {
        let is_file = entry
            .file_type()
            .map(|file_type| file_type.is_file())
            .unwrap_or(false);
        if is_file {
            push_if_matching(&entry.path(), file_pattern, candidates);
        }
    }
}

fn push_if_matching(path: &Path, file_pattern: &Regex, candidates: &mut Vec<LogFileCandidate>) {
    let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
        return;
    };
    if !file_pattern.is_match(file_name) {
        return;
    }

    let modified = std::fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH);
    candidates.push(LogFileCandidate {
        path: path.to_path_buf(),
        modified,
    });
}

/// `"2025.12.27_15-20-01_0.16.1 application_000.log"` → `"application"`.
pub fn channel_for_log_file(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or_default();
    let last_word = stem.split_whitespace().last().unwrap_or(stem);
    let without_index = match last_word.rsplit_once('_') {
        Some((name, index))
            if !name.is_empty() && !index.is_empty() && index.chars().all(|character| character.is_ascii_digit()) =>
        {
            name
        }
        _ => last_word,
    };

    without_index.to_ascii_lowercase()
}
