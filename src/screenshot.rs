use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

lazy_static::lazy_static! {
    static ref SAMPLE_FILENAME_PATTERN: Option<Regex> = compile_pattern(
        r"^(?P<date>\d{4}-\d{2}-\d{2})\[(?P<hour>\d{1,2})[:\-](?P<minute>\d{2})\]_(?P<x>[^,]*),\s*(?P<y>[^,]*),\s*(?P<z>[^_]*)_(?P<rotation>[^_]*?)deg\.(?P<extension>[A-Za-z0-9]+)$",
    );
    static ref COORDINATE_PATTERN: Option<Regex> = compile_pattern(r"^-?\d+(?:\.\d*)?$");
    static ref ROTATION_PATTERN: Option<Regex> = compile_pattern(r"^-?\d+$");
}

fn compile_pattern(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(error) => {
            tracing::error!(pattern, pattern_error = %error, "Failed to compile screenshot pattern");
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSample {
    pub timestamp: NaiveDateTime,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rotation_degrees: u16,
    pub source_filename: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    fn label(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }
}

/// Why a filename did not yield a [`PositionSample`].
///
/// Rejections are expected: screenshot folders routinely hold unrelated
/// files, so callers count and drop these instead of surfacing them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleRejection {
    PatternMismatch,
    InvalidTimestamp,
    InvalidCoordinate { axis: Axis, value: String },
    NonFiniteCoordinate { axis: Axis },
    InvalidRotation(String),
    RotationOutOfRange(i64),
}

impl SampleRejection {
    pub fn reason_code(&self) -> &'static str {
        match self {
            SampleRejection::PatternMismatch => "pattern_mismatch",
            SampleRejection::InvalidTimestamp => "invalid_timestamp",
            SampleRejection::InvalidCoordinate { .. } => "invalid_coordinate",
            SampleRejection::NonFiniteCoordinate { .. } => "non_finite_coordinate",
            SampleRejection::InvalidRotation(_) => "invalid_rotation",
            SampleRejection::RotationOutOfRange(_) => "rotation_out_of_range",
        }
    }
}

impl std::fmt::Display for SampleRejection {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleRejection::InvalidCoordinate { axis, value } => {
                write!(formatter, "{}: {} = '{value}'", self.reason_code(), axis.label())
            }
            SampleRejection::NonFiniteCoordinate { axis } => {
                write!(formatter, "{}: {}", self.reason_code(), axis.label())
            }
            SampleRejection::InvalidRotation(value) => {
                write!(formatter, "{}: '{value}'", self.reason_code())
            }
            SampleRejection::RotationOutOfRange(value) => {
                write!(formatter, "{}: {value}", self.reason_code())
            }
            SampleRejection::PatternMismatch | SampleRejection::InvalidTimestamp => {
                formatter.write_str(self.reason_code())
            }
        }
    }
}

/// Parses `YYYY-MM-DD[HH:MM]_X,Y,Z_ROTdeg.<ext>` into a position sample.
///
/// Accepts a bare file name or a path; only the final component is
/// inspected. `[HH-MM]` is accepted as well since `:` is not allowed in
/// file names on every platform.
pub fn parse_sample_filename(file_name: &str) -> Result<PositionSample, SampleRejection> {
    let base_name = Path::new(file_name)
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or(file_name);

    let Some(pattern) = SAMPLE_FILENAME_PATTERN.as_ref() else {
        return Err(SampleRejection::PatternMismatch);
    };
    let captures = pattern
        .captures(base_name)
        .ok_or(SampleRejection::PatternMismatch)?;

    let timestamp = parse_sample_timestamp(&captures["date"], &captures["hour"], &captures["minute"])
        .ok_or(SampleRejection::InvalidTimestamp)?;
    let x = parse_coordinate(Axis::X, &captures["x"])?;
    let y = parse_coordinate(Axis::Y, &captures["y"])?;
    let z = parse_coordinate(Axis::Z, &captures["z"])?;
    let rotation_degrees = parse_rotation(&captures["rotation"])?;

    Ok(PositionSample {
        timestamp,
        x,
        y,
        z,
        rotation_degrees,
        source_filename: base_name.to_string(),
    })
}

fn parse_sample_timestamp(date: &str, hour: &str, minute: &str) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let hour = hour.parse::<u32>().ok()?;
    let minute = minute.parse::<u32>().ok()?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    Some(NaiveDateTime::new(date, time))
}

fn parse_coordinate(axis: Axis, raw_value: &str) -> Result<f64, SampleRejection> {
    let value = raw_value.trim();
    let is_decimal = COORDINATE_PATTERN
        .as_ref()
        .map(|pattern| pattern.is_match(value))
        .unwrap_or(false);
    if !is_decimal {
        return Err(SampleRejection::InvalidCoordinate {
            axis,
            value: value.to_string(),
        });
    }

    let parsed = value
        .parse::<f64>()
        .map_err(|_| SampleRejection::InvalidCoordinate {
            axis,
            value: value.to_string(),
        })?;
    if !parsed.is_finite() {
        return Err(SampleRejection::NonFiniteCoordinate { axis });
    }

    Ok(parsed)
}

fn parse_rotation(raw_value: &str) -> Result<u16, SampleRejection> {
    let value = raw_value.trim();
    let is_integer = ROTATION_PATTERN
        .as_ref()
        .map(|pattern| pattern.is_match(value))
        .unwrap_or(false);
    if !is_integer {
        return Err(SampleRejection::InvalidRotation(value.to_string()));
    }

    let degrees = value
        .parse::<i64>()
        .map_err(|_| SampleRejection::InvalidRotation(value.to_string()))?;
    if !(0..=359).contains(&degrees) {
        return Err(SampleRejection::RotationOutOfRange(degrees));
    }

    Ok(degrees as u16)
}

/// Builds the canonical file name a sample would have been parsed from.
pub fn format_sample_filename(sample: &PositionSample, extension: &str) -> String {
    format!(
        "{}_{},{},{}_{}deg.{extension}",
        sample.timestamp.format("%Y-%m-%d[%H:%M]"),
        sample.x,
        sample.y,
        sample.z,
        sample.rotation_degrees,
    )
}

#[derive(Debug, Default)]
pub struct ScreenshotScan {
    pub new_samples: Vec<PositionSample>,
    pub removed_files: Vec<String>,
    pub rejected_count: usize,
}

/// Tracks which screenshot files have already been looked at so each scan
/// only parses names that are new since the previous one.
pub struct ScreenshotScanner {
    directory: PathBuf,
    known_files: BTreeSet<String>,
    reported_missing: bool,
}

impl ScreenshotScanner {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            known_files: BTreeSet::new(),
            reported_missing: false,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn scan(&mut self) -> std::io::Result<ScreenshotScan> {
        let directory_entries = match std::fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                if !self.reported_missing {
                    tracing::info!(
                        screenshot_directory = %self.directory.display(),
                        "Screenshot directory does not exist yet"
                    );
                    self.reported_missing = true;
                }
                return Ok(ScreenshotScan::default());
            }
            Err(error) => return Err(error),
        };
        self.reported_missing = false;

        let mut present_files = BTreeSet::new();
        for entry_result in directory_entries {
            let entry = entry_result?;
            let is_file = entry
                .file_type()
                .map(|file_type| file_type.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }

            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            present_files.insert(file_name);
        }

        let mut scan = ScreenshotScan::default();
        for file_name in present_files.difference(&self.known_files) {
            match parse_sample_filename(file_name) {
                Ok(sample) => scan.new_samples.push(sample),
                Err(rejection) => {
                    tracing::trace!(file_name = %file_name, rejection = %rejection, "Skipping screenshot");
                    scan.rejected_count += 1;
                }
            }
        }
        scan.removed_files = self
            .known_files
            .difference(&present_files)
            .cloned()
            .collect();

        scan.new_samples.sort_by(|left, right| {
            left.timestamp
                .cmp(&right.timestamp)
                .then_with(|| left.source_filename.cmp(&right.source_filename))
        });
        self.known_files = present_files;

        Ok(scan)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        format_sample_filename, parse_sample_filename, Axis, SampleRejection, ScreenshotScanner,
    };
    use chrono::NaiveDate;

    #[test]
    fn parses_documented_example_filename() {
        let sample = parse_sample_filename("2025-12-27[15:20]_1234.56,789.01,2.34_45deg.png")
            .expect("Expected example filename to parse");

        let expected_timestamp = NaiveDate::from_ymd_opt(2025, 12, 27)
            .and_then(|date| date.and_hms_opt(15, 20, 0))
            .expect("Valid test timestamp");
        assert_eq!(sample.timestamp, expected_timestamp);
        assert_eq!(sample.x, 1234.56);
        assert_eq!(sample.y, 789.01);
        assert_eq!(sample.z, 2.34);
        assert_eq!(sample.rotation_degrees, 45);
        assert_eq!(
            sample.source_filename,
            "2025-12-27[15:20]_1234.56,789.01,2.34_45deg.png"
        );
    }

    #[test]
    fn accepts_negative_values_dash_separated_time_and_paths() {
        let sample = parse_sample_filename(
            "/home/player/Screenshots/2024-03-01[09-05]_-12.5, 3, -0.75_0deg.jpg",
        )
        .expect("Expected filename with negative coordinates to parse");

        assert_eq!(sample.x, -12.5);
        assert_eq!(sample.y, 3.0);
        assert_eq!(sample.z, -0.75);
        assert_eq!(sample.rotation_degrees, 0);
        assert_eq!(sample.timestamp.format("%H:%M").to_string(), "09:05");
        assert!(sample.source_filename.starts_with("2024-03-01"));
    }

    #[test]
    fn rejects_non_numeric_coordinate_without_panicking() {
        let rejection = parse_sample_filename("2025-12-27[15:20]_abc,789.01,2.34_45deg.png")
            .expect_err("Non-numeric X must be rejected");

        assert_eq!(
            rejection,
            SampleRejection::InvalidCoordinate {
                axis: Axis::X,
                value: "abc".to_string()
            }
        );
        assert_eq!(rejection.reason_code(), "invalid_coordinate");
    }

    #[test]
    fn rejects_out_of_range_rotation_and_bad_dates() {
        assert_eq!(
            parse_sample_filename("2025-12-27[15:20]_1,2,3_360deg.png"),
            Err(SampleRejection::RotationOutOfRange(360))
        );
        assert_eq!(
            parse_sample_filename("2025-12-27[15:20]_1,2,3_-5deg.png"),
            Err(SampleRejection::RotationOutOfRange(-5))
        );
        assert_eq!(
            parse_sample_filename("2025-12-27[15:20]_1,2,3_4.5deg.png"),
            Err(SampleRejection::InvalidRotation("4.5".to_string()))
        );
        assert_eq!(
            parse_sample_filename("2025-13-40[15:20]_1,2,3_45deg.png"),
            Err(SampleRejection::InvalidTimestamp)
        );
        assert_eq!(
            parse_sample_filename("2025-12-27[25:20]_1,2,3_45deg.png"),
            Err(SampleRejection::InvalidTimestamp)
        );
    }

    #[test]
    fn rejects_unrelated_files() {
        for file_name in ["desktop.ini", "Screenshot 2025-12-27.png", "", "_1,2,3_4deg.png"] {
            assert_eq!(
                parse_sample_filename(file_name),
                Err(SampleRejection::PatternMismatch),
                "'{file_name}' should not look like a position sample"
            );
        }
    }

    #[test]
    fn reconstructed_filename_reproduces_coordinates() {
        let file_names = [
            "2025-12-27[15:20]_1234.56,789.01,2.34_45deg.png",
            "2025-01-02[00:00]_-0.5,0,100000.125_359deg.png",
            "2024-07-31[23:59]_-4521.987,12.3456789,-3_180deg.jpg",
        ];

        for file_name in file_names {
            let sample = parse_sample_filename(file_name).expect("Fixture filename should parse");
            let rebuilt_name = format_sample_filename(&sample, "png");
            let reparsed =
                parse_sample_filename(&rebuilt_name).expect("Rebuilt filename should parse");

            assert!((reparsed.x - sample.x).abs() < 1e-9, "x drifted for {file_name}");
            assert!((reparsed.y - sample.y).abs() < 1e-9, "y drifted for {file_name}");
            assert!((reparsed.z - sample.z).abs() < 1e-9, "z drifted for {file_name}");
            assert_eq!(reparsed.rotation_degrees, sample.rotation_degrees);
            assert_eq!(reparsed.timestamp, sample.timestamp);
        }
    }

    #[test]
    fn scanner_reports_new_and_removed_files_once() {
        let temp_directory = tempfile::tempdir().expect("Failed to create temp directory");
        let first = "2025-12-27[15:20]_1,2,3_10deg.png";
        let second = "2025-12-27[15:21]_4,5,6_20deg.png";
        std::fs::write(temp_directory.path().join(first), b"").expect("Failed to write fixture");
        std::fs::write(temp_directory.path().join("notes.txt"), b"").expect("Failed to write fixture");

        let mut scanner = ScreenshotScanner::new(temp_directory.path());
        let initial_scan = scanner.scan().expect("Initial scan should succeed");
        assert_eq!(initial_scan.new_samples.len(), 1);
        assert_eq!(initial_scan.rejected_count, 1);

        let repeated_scan = scanner.scan().expect("Repeated scan should succeed");
        assert!(repeated_scan.new_samples.is_empty());
        assert_eq!(repeated_scan.rejected_count, 0);

        std::fs::write(temp_directory.path().join(second), b"").expect("Failed to write fixture");
        std::fs::remove_file(temp_directory.path().join(first)).expect("Failed to remove fixture");

        let changed_scan = scanner.scan().expect("Changed scan should succeed");
        assert_eq!(changed_scan.new_samples.len(), 1);
        assert_eq!(changed_scan.new_samples[0].source_filename, second);
        assert_eq!(changed_scan.removed_files, vec![first.to_string()]);
    }

    #[test]
    fn missing_directory_is_treated_as_empty() {
        let temp_directory = tempfile::tempdir().expect("Failed to create temp directory");
        let mut scanner = ScreenshotScanner::new(temp_directory.path().join("not-created-yet"));

        let scan = scanner.scan().expect("Missing directory must not be an error");
        assert!(scan.new_samples.is_empty());
        assert!(scan.removed_files.is_empty());
    }
}
