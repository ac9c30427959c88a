// Webcam Recorder command line front end

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use webcam_recorder_lib::caps::CapabilityRecord;
use webcam_recorder_lib::config::{self, Config};
use webcam_recorder_lib::devices::{filter_configs, DeviceManager, DeviceSource};
use webcam_recorder_lib::encoding::ContainerFormat;
use webcam_recorder_lib::gstreamer_init;
use webcam_recorder_lib::recording::{
    auto_increment_path, default_record_path, ManagerEvent, ManagerSettings, PipelineManager,
    PipelineRequest, ReconfigureWorker, RecordingInfo,
};
use webcam_recorder_lib::registration::PointSet;

#[derive(Parser)]
#[command(name = "webcam-recorder", version, about = "Preview and record webcams with GStreamer")]
struct Cli {
    /// Config file to use instead of the one in the user config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// List capture modes of the connected cameras
    Devices {
        /// Print modes as JSON
        #[arg(long)]
        json: bool,

        /// Include modes outside the preferred format and minimum framerate
        #[arg(long)]
        all: bool,
    },

    /// Show a live preview
    Preview(RunArgs),

    /// Preview and record to a file
    Record {
        #[command(flatten)]
        run: RunArgs,

        /// Output file (.mp4 or .avi); defaults to a timestamped file in the storage path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Encoder bitrate in bits/second
        #[arg(long)]
        bitrate: Option<u32>,
    },

    /// Inspect or reset registration points
    Points {
        #[command(subcommand)]
        action: PointsAction,
    },

    /// Report the GStreamer version and missing elements
    Check,

    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        write: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Mode index as listed by `devices` (pass `--all` here too if it was listed with `--all`)
    #[arg(short, long)]
    mode: Option<usize>,

    /// Index into the unfiltered mode list
    #[arg(long)]
    all: bool,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Native window handle to embed the video in
    #[arg(long)]
    window_handle: Option<usize>,
}

#[derive(Subcommand)]
enum PointsAction {
    /// Print the points stored in a file
    Show { file: PathBuf },

    /// Remove the points of one image, or all points
    Reset {
        file: PathBuf,

        /// Image index to reset (default: all)
        #[arg(long)]
        image: Option<u32>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let config = Config::load_or_default(cli.config.as_deref());

    match cli.command {
        CliCommand::Devices { json, all } => list_devices(&config, json, all),
        CliCommand::Preview(run) => run_pipeline(&config, &run, None, None),
        CliCommand::Record {
            run,
            output,
            bitrate,
        } => {
            let path = record_path(&config, output)?;
            run_pipeline(&config, &run, Some(path), bitrate)
        }
        CliCommand::Points { action } => points(action),
        CliCommand::Check => check(),
        CliCommand::Config { write } => {
            print!("{}", toml::to_string_pretty(&config)?);
            if write {
                let path = cli.config.clone().unwrap_or_else(config::get_config_path);
                config.save(Some(&path))?;
                log::info!("Wrote {}", path.display());
            }
            Ok(())
        }
    }
}

/// Enumerate devices and return the source with its (optionally filtered) modes
fn discover(config: &Config, all: bool) -> Result<(Arc<dyn DeviceSource>, Vec<CapabilityRecord>)> {
    gstreamer_init::init_gstreamer_env();

    let mut devices = DeviceManager::new(
        config.device_backend.create()?,
        config.probe_passes,
        config.parse_options(),
    );
    devices.refresh()?;

    let records = if all {
        devices.configs.clone()
    } else {
        filter_configs(
            &devices.configs,
            config.preferred_format.as_deref(),
            Some(config.min_framerate),
        )
    };

    Ok((Arc::from(devices.into_source()), records))
}

fn list_devices(config: &Config, json: bool, all: bool) -> Result<()> {
    let (_, records) = discover(config, all)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No matching capture modes");
    }
    for (i, record) in records.iter().enumerate() {
        println!("{:3}: {}\t{}\t{} bps", i, record, record.format, record.bitrate);
    }
    Ok(())
}

fn record_path(config: &Config, output: Option<PathBuf>) -> Result<PathBuf> {
    let mut path = match output {
        Some(path) => path,
        None => {
            std::fs::create_dir_all(&config.storage_path).with_context(|| {
                format!("failed to create {}", config.storage_path.display())
            })?;
            default_record_path(&config.storage_path, ContainerFormat::Mp4)
        }
    };

    if config.auto_increment {
        while path.exists() {
            path = auto_increment_path(&path);
        }
    }
    Ok(path)
}

fn run_pipeline(
    config: &Config,
    run: &RunArgs,
    record_path: Option<PathBuf>,
    bitrate: Option<u32>,
) -> Result<()> {
    let (source, records) = discover(config, run.all)?;
    let mode = select_mode(&records, run.mode)?;

    let request = match record_path {
        Some(path) => {
            let Some(mode) = mode else {
                bail!("--mode is required when recording");
            };
            PipelineRequest::record(mode, path)
        }
        None => PipelineRequest::preview(mode),
    };

    let mut settings = ManagerSettings::from_config(config);
    settings.window_handle = run.window_handle;
    if bitrate.is_some() {
        settings.bitrate_override = bitrate;
    }

    let worker = ReconfigureWorker::spawn(
        PipelineManager::new(source, settings),
        config.bus_poll_interval(),
    )?;

    let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })
    .context("failed to install Ctrl+C handler")?;

    let deadline = run
        .duration
        .map(|secs| crossbeam_channel::after(Duration::from_secs(secs)))
        .unwrap_or_else(crossbeam_channel::never);

    worker.configure(request);

    loop {
        crossbeam_channel::select! {
            recv(interrupt_rx) -> _ => {
                log::info!("Interrupted");
                break;
            }
            recv(deadline) -> _ => {
                log::info!("Duration reached");
                break;
            }
            recv(worker.events()) -> event => match event {
                Ok(ManagerEvent::Configured(_)) => log::info!("Running, press Ctrl+C to stop"),
                Ok(ManagerEvent::Stopped(info)) => {
                    report(info.as_ref());
                    break;
                }
                Ok(ManagerEvent::Failed(e)) => return Err(e.into()),
                Err(_) => bail!("pipeline worker exited unexpectedly"),
            },
        }
    }

    worker.stop();
    let wait = config.teardown_timeout() + Duration::from_secs(5);
    loop {
        match worker.events().recv_timeout(wait) {
            Ok(ManagerEvent::Configured(_)) => continue,
            Ok(ManagerEvent::Stopped(info)) => {
                report(info.as_ref());
                break;
            }
            Ok(ManagerEvent::Failed(e)) => return Err(e.into()),
            Err(_) => {
                log::warn!("No stop confirmation from pipeline worker");
                break;
            }
        }
    }

    worker.shutdown();
    Ok(())
}

/// Pick a mode by its index in the listing
fn select_mode(records: &[CapabilityRecord], index: Option<usize>) -> Result<Option<CapabilityRecord>> {
    match index {
        Some(i) => Ok(Some(records.get(i).cloned().with_context(|| {
            format!("no mode {} ({} available)", i, records.len())
        })?)),
        None => Ok(None),
    }
}

fn report(info: Option<&RecordingInfo>) {
    if let Some(info) = info {
        println!(
            "Saved {} ({} bytes, {:.1}s)",
            info.path.display(),
            info.bytes,
            info.duration.as_secs_f64()
        );
    }
}

fn points(action: PointsAction) -> Result<()> {
    match action {
        PointsAction::Show { file } => {
            let points = PointSet::load(&file)?;
            println!("{}", serde_json::to_string_pretty(&points)?);
        }
        PointsAction::Reset { file, image } => {
            let mut points = load_or_empty(&file)?;
            let removed = points.reset(image);
            points.save(&file)?;
            println!("Removed {} point(s)", removed);
        }
    }
    Ok(())
}

fn load_or_empty(file: &Path) -> Result<PointSet> {
    if file.exists() {
        Ok(PointSet::load(file)?)
    } else {
        Ok(PointSet::new())
    }
}

fn check() -> Result<()> {
    gstreamer_init::init_gstreamer_env();
    let info = gstreamer_init::get_gstreamer_info();

    match &info.version {
        Some(version) => println!("GStreamer {}", version),
        None => bail!("GStreamer is not available"),
    }

    if info.missing_elements.is_empty() {
        println!("All required elements found");
    } else {
        for element in &info.missing_elements {
            println!("missing: {}", element);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use webcam_recorder_lib::caps::{records_from_caps, ParseOptions};
    use webcam_recorder_lib::devices::filter_configs;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_commands_accept_all() {
        let cli = Cli::try_parse_from(["webcam-recorder", "record", "--all", "--mode", "1"]).unwrap();
        match cli.command {
            CliCommand::Record { run, .. } => {
                assert!(run.all);
                assert_eq!(run.mode, Some(1));
            }
            _ => panic!("expected record"),
        }

        let cli = Cli::try_parse_from(["webcam-recorder", "preview", "-m", "0"]).unwrap();
        match cli.command {
            CliCommand::Preview(run) => assert!(!run.all),
            _ => panic!("expected preview"),
        }
    }

    #[test]
    fn test_mode_index_depends_on_listing() {
        let caps = "video/x-raw, format=(string){ I420, YUY2 }, width=(int)640, height=(int)480, \
                    framerate=(fraction){ 30/1, 5/1 }";
        let all = records_from_caps("cam", caps, ParseOptions { strict: true }).unwrap();
        let filtered = filter_configs(&all, Some("I420"), Some(10.0));

        // Index 0 of the full listing is a 5 fps mode the filtered listing hides
        let from_all = select_mode(&all, Some(0)).unwrap().unwrap();
        let from_filtered = select_mode(&filtered, Some(0)).unwrap().unwrap();
        assert_eq!(from_all.framerate.numer(), 5);
        assert_eq!(from_filtered.framerate.numer(), 30);
        assert_eq!(from_filtered.format, "I420");

        assert!(select_mode(&filtered, Some(1)).is_err());
        assert!(select_mode(&filtered, None).unwrap().is_none());
    }
}
