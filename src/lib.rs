pub mod cli;
pub mod game_log;
pub mod metadata;
pub mod raid_state;
pub mod screenshot;
pub mod session;
pub mod settings;
pub mod timeline;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use metadata::{MetadataSource, OfflineMetadata, TarkovDevClient};
use session::{spawn_session_monitor, SessionMonitor, SessionSnapshot};
use settings::{SettingsError, TrackerSettings};

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(error) => {
            eprintln!("raidwatch: invalid configuration: {error}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!(runtime_error = %error, "Failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(watch_session(settings, cli.json)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(session_error = %error, "Session monitor failed to start");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "warn,raidwatch_lib=debug"
    } else {
        "warn,raidwatch_lib=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(cli: &Cli) -> Result<TrackerSettings, SettingsError> {
    let mut settings = match cli.config_path() {
        Some(config_path) => TrackerSettings::load(&config_path)?,
        None => TrackerSettings::default(),
    };
    cli.apply_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn build_metadata_source(settings: &TrackerSettings) -> Arc<dyn MetadataSource> {
    if !settings.metadata.enabled {
        tracing::info!("Metadata lookups disabled, showing raw map and quest ids");
        return Arc::new(OfflineMetadata);
    }

    match TarkovDevClient::new(
        settings.metadata.endpoint.clone(),
        settings.metadata.timeout(),
        settings.metadata.cache_ttl(),
    ) {
        Ok(client) => Arc::new(client),
        Err(error) => {
            tracing::warn!(metadata_error = %error, "Metadata client unavailable, continuing offline");
            Arc::new(OfflineMetadata)
        }
    }
}

async fn watch_session(settings: TrackerSettings, print_json: bool) -> Result<(), SettingsError> {
    let monitor = SessionMonitor::new(&settings, build_metadata_source(&settings))?;

    let mut watch_paths = Vec::new();
    if settings.watch_filesystem {
        watch_paths.push(settings.log_directory.clone());
        if settings.screenshot_directory.is_dir() {
            watch_paths.push(settings.screenshot_directory.clone());
        }
    }

    let handle = spawn_session_monitor(monitor, settings.poll_interval(), watch_paths);
    let mut snapshot_rx = handle.subscribe();

    loop {
        tokio::select! {
            signal_result = tokio::signal::ctrl_c() => {
                if let Err(error) = signal_result {
                    tracing::warn!(signal_error = %error, "Failed to listen for ctrl-c, stopping");
                }
                break;
            }
            changed = snapshot_rx.changed() => {
                if changed.is_err() {
                    tracing::warn!("Session monitor ended unexpectedly");
                    break;
                }
                let snapshot = snapshot_rx.borrow_and_update().clone();
                print_snapshot(&snapshot, print_json);
            }
        }
    }

    handle.stop().await;
    Ok(())
}

fn print_snapshot(snapshot: &SessionSnapshot, print_json: bool) {
    if !print_json {
        println!("{}", snapshot.summary_line());
        return;
    }

    match serde_json::to_string(snapshot) {
        Ok(line) => println!("{line}"),
        Err(error) => tracing::warn!(serialize_error = %error, "Failed to serialize snapshot"),
    }
}
