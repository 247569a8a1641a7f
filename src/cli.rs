use clap::Parser;
use std::path::PathBuf;

use crate::settings::TrackerSettings;

#[derive(Parser, Debug)]
#[command(name = "raidwatch")]
#[command(version)]
#[command(about = "Follows game logs and position screenshots to track the current raid", long_about = None)]
pub struct Cli {
    /// Config file to load instead of the per-user default
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory the game writes its logs into
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Directory the game saves screenshots into
    #[arg(long, value_name = "DIR")]
    pub screenshot_dir: Option<PathBuf>,

    /// Polling interval in milliseconds
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Read the current log from its start instead of only new lines
    #[arg(long)]
    pub replay: bool,

    /// Never contact the metadata service
    #[arg(long)]
    pub offline: bool,

    /// Print every changed snapshot as a JSON line
    #[arg(long)]
    pub json: bool,

    /// Debug-level logging for this crate
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config
            .clone()
            .or_else(TrackerSettings::default_config_path)
    }

    /// Command-line flags win over values from the config file.
    pub fn apply_overrides(&self, settings: &mut TrackerSettings) {
        if let Some(log_dir) = &self.log_dir {
            settings.log_directory = log_dir.clone();
        }
        if let Some(screenshot_dir) = &self.screenshot_dir {
            settings.screenshot_directory = screenshot_dir.clone();
        }
        if let Some(interval_ms) = self.interval_ms {
            settings.poll_interval_ms = interval_ms;
        }
        if self.replay {
            settings.replay_existing_log = true;
        }
        if self.offline {
            settings.metadata.enabled = false;
        }
    }
}
