use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LOG_FILE_PATTERN: &str = r"(?i)\.log$";
pub const DEFAULT_METADATA_ENDPOINT: &str = "https://api.tarkov.dev/graphql";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid log-file-pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("log-directory is not configured")]
    MissingLogDirectory,

    #[error("screenshot-directory is not configured")]
    MissingScreenshotDirectory,

    #[error("{setting} '{path}' is not accessible: {reason}")]
    InaccessiblePath {
        setting: &'static str,
        path: PathBuf,
        reason: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MetadataSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_ms: u64,
    pub cache_ttl_secs: u64,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: DEFAULT_METADATA_ENDPOINT.to_string(),
            timeout_ms: 5_000,
            cache_ttl_secs: 300,
        }
    }
}

impl MetadataSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TrackerSettings {
    pub log_directory: PathBuf,
    pub log_file_pattern: String,
    pub screenshot_directory: PathBuf,
    pub poll_interval_ms: u64,
    pub failure_threshold: u32,
    pub max_read_bytes: u64,
    pub replay_existing_log: bool,
    pub recent_event_capacity: usize,
    pub timeline_capacity: usize,
    pub watch_filesystem: bool,
    pub metadata: MetadataSettings,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            log_directory: PathBuf::new(),
            log_file_pattern: DEFAULT_LOG_FILE_PATTERN.to_string(),
            screenshot_directory: PathBuf::new(),
            poll_interval_ms: 1_000,
            failure_threshold: 5,
            max_read_bytes: 1024 * 1024,
            replay_existing_log: false,
            recent_event_capacity: 50,
            timeline_capacity: 4_096,
            watch_filesystem: true,
            metadata: MetadataSettings::default(),
        }
    }
}

impl TrackerSettings {
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|directory| directory.join("raidwatch").join("config.toml"))
    }

    /// A missing file yields the defaults so command-line flags alone can
    /// configure a session.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        Self::from_toml(&contents).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn compiled_log_file_pattern(&self) -> Result<Regex, SettingsError> {
        Regex::new(&self.log_file_pattern).map_err(|source| SettingsError::InvalidPattern {
            pattern: self.log_file_pattern.clone(),
            source,
        })
    }

    /// Startup checks. Failing here is fatal; once the monitor runs, the
    /// same paths going missing only degrade its health.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.poll_interval_ms == 0 {
            return Err(SettingsError::ZeroValue("poll-interval-ms"));
        }
        if self.failure_threshold == 0 {
            return Err(SettingsError::ZeroValue("failure-threshold"));
        }
        if self.max_read_bytes == 0 {
            return Err(SettingsError::ZeroValue("max-read-bytes"));
        }
        if self.timeline_capacity == 0 {
            return Err(SettingsError::ZeroValue("timeline-capacity"));
        }
        self.compiled_log_file_pattern()?;

        if self.log_directory.as_os_str().is_empty() {
            return Err(SettingsError::MissingLogDirectory);
        }
        if self.screenshot_directory.as_os_str().is_empty() {
            return Err(SettingsError::MissingScreenshotDirectory);
        }

        check_directory("log-directory", &self.log_directory, false)?;
        check_directory("screenshot-directory", &self.screenshot_directory, true)?;
        Ok(())
    }
}

fn check_directory(setting: &'static str, path: &Path, allow_missing: bool) -> Result<(), SettingsError> {
    let inaccessible = |reason: String| SettingsError::InaccessiblePath {
        setting,
        path: path.to_path_buf(),
        reason,
    };

    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => {
            std::fs::read_dir(path).map_err(|error| inaccessible(error.to_string()))?;
            Ok(())
        }
        Ok(_) => Err(inaccessible("not a directory".to_string())),
        Err(error) if error.kind() == ErrorKind::NotFound && allow_missing => {
            tracing::warn!(
                setting,
                path = %path.display(),
                "Directory does not exist yet, waiting for it to appear"
            );
            Ok(())
        }
        Err(error) => Err(inaccessible(error.to_string())),
    }
}
