// Pipeline orchestration
//
// `PipelineManager` owns at most one running pipeline and swaps it for a new
// configuration synchronously. `ReconfigureWorker` moves the manager onto a
// dedicated thread and feeds it commands over a channel, so front ends never
// block on GStreamer state changes or teardown waits.

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::caps::CapabilityRecord;
use crate::config::Config;
use crate::devices::DeviceSource;
use crate::encoding::EncoderSettings;

use super::video::{PreviewPipeline, RecordPipeline, RecordingInfo};
use super::{PipelineError, RecordingState, RecordingStatus, Result};

/// A requested pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRequest {
    /// Capture mode; `None` previews the default source unconstrained
    pub mode: Option<CapabilityRecord>,
    /// Record to this file while previewing
    pub record_path: Option<PathBuf>,
}

impl PipelineRequest {
    pub fn preview(mode: Option<CapabilityRecord>) -> Self {
        Self {
            mode,
            record_path: None,
        }
    }

    pub fn record(mode: CapabilityRecord, path: impl Into<PathBuf>) -> Self {
        Self {
            mode: Some(mode),
            record_path: Some(path.into()),
        }
    }
}

/// Tunables for building and stopping pipelines
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub bitrate_override: Option<u32>,
    pub bitrate_tolerance: u32,
    pub teardown_timeout: Duration,
    pub teardown_poll: Duration,
    /// Native window to embed the preview in
    pub window_handle: Option<usize>,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ManagerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bitrate_override: config.bitrate_override,
            bitrate_tolerance: config.bitrate_tolerance,
            teardown_timeout: config.teardown_timeout(),
            teardown_poll: config.teardown_poll(),
            window_handle: None,
        }
    }
}

enum ActivePipeline {
    Preview(PreviewPipeline),
    Record(RecordPipeline),
}

/// Owns the single active pipeline
pub struct PipelineManager {
    source: Arc<dyn DeviceSource>,
    settings: ManagerSettings,
    active: Option<ActivePipeline>,
    state: RecordingState,
}

impl PipelineManager {
    pub fn new(source: Arc<dyn DeviceSource>, settings: ManagerSettings) -> Self {
        Self {
            source,
            settings,
            active: None,
            state: RecordingState::new(),
        }
    }

    pub fn state(&self) -> &RecordingState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Replace the running pipeline with one built for `request`.
    ///
    /// The previous pipeline is always stopped first. A failure to finalize
    /// the previous recording is logged and does not prevent the switch.
    pub fn set_config(&mut self, request: &PipelineRequest) -> Result<()> {
        match &request.mode {
            Some(mode) => log::info!("Configuring pipeline: {}", mode.caps_string()),
            None => log::info!("Configuring pipeline with default source"),
        }

        if let Err(e) = self.stop() {
            log::warn!("Previous pipeline did not stop cleanly: {}", e);
        }

        let active = match &request.record_path {
            Some(path) => {
                let mode = request.mode.as_ref().ok_or(PipelineError::MissingMode)?;
                let encoder = EncoderSettings::for_mode(Some(mode), self.settings.bitrate_override)
                    .with_tolerance(self.settings.bitrate_tolerance);
                let mut pipeline = RecordPipeline::new(
                    self.source.as_ref(),
                    mode,
                    path,
                    &encoder,
                    self.settings.window_handle,
                )?;
                pipeline.start()?;
                ActivePipeline::Record(pipeline)
            }
            None => {
                let pipeline = PreviewPipeline::new(
                    self.source.as_ref(),
                    request.mode.as_ref(),
                    self.settings.window_handle,
                )?;
                pipeline.start()?;
                ActivePipeline::Preview(pipeline)
            }
        };

        self.state = RecordingState {
            status: match active {
                ActivePipeline::Preview(_) => RecordingStatus::Previewing,
                ActivePipeline::Record(_) => RecordingStatus::Recording,
            },
            started_at: Some(Utc::now()),
            current_path: request.record_path.clone(),
            mode: request.mode.as_ref().map(|m| m.to_string()),
        };
        self.active = Some(active);
        Ok(())
    }

    /// Stop the active pipeline, finalizing the file if it was recording.
    pub fn stop(&mut self) -> Result<Option<RecordingInfo>> {
        let Some(active) = self.active.take() else {
            return Ok(None);
        };
        self.state = RecordingState::new();

        match active {
            ActivePipeline::Preview(pipeline) => {
                pipeline.stop()?;
                Ok(None)
            }
            ActivePipeline::Record(mut pipeline) => pipeline
                .stop(self.settings.teardown_timeout, self.settings.teardown_poll)
                .map(Some),
        }
    }

    /// Check the active pipeline's bus. An error tears the pipeline down and
    /// is returned to the caller.
    pub fn poll(&mut self) -> Result<()> {
        let result = match &self.active {
            Some(ActivePipeline::Preview(pipeline)) => pipeline.poll(),
            Some(ActivePipeline::Record(pipeline)) => pipeline.poll(),
            None => Ok(()),
        };

        if result.is_err() {
            // Dropping sets the pipeline to NULL
            self.active = None;
            self.state = RecordingState::new();
        }
        result
    }
}

impl Drop for PipelineManager {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("Failed to stop pipeline on shutdown: {}", e);
        }
    }
}

/// Messages to the reconfiguration worker
#[derive(Debug)]
pub enum Command {
    Configure(PipelineRequest),
    Stop,
    Shutdown,
}

/// Notifications from the reconfiguration worker
#[derive(Debug)]
pub enum ManagerEvent {
    Configured(PipelineRequest),
    Stopped(Option<RecordingInfo>),
    Failed(PipelineError),
}

/// Runs a `PipelineManager` on its own thread
pub struct ReconfigureWorker {
    commands: Sender<Command>,
    events: Receiver<ManagerEvent>,
    handle: Option<JoinHandle<()>>,
}

impl ReconfigureWorker {
    /// Start the worker. While idle it drains the active pipeline's bus every
    /// `bus_poll_interval`.
    pub fn spawn(manager: PipelineManager, bus_poll_interval: Duration) -> Result<Self> {
        let (commands, command_rx) = crossbeam_channel::unbounded();
        let (event_tx, events) = crossbeam_channel::unbounded();

        let handle = std::thread::Builder::new()
            .name("pipeline-worker".into())
            .spawn(move || run_worker(manager, command_rx, event_tx, bus_poll_interval))?;

        Ok(Self {
            commands,
            events,
            handle: Some(handle),
        })
    }

    /// Queue a new configuration. Only the newest of several queued requests
    /// is applied.
    pub fn configure(&self, request: PipelineRequest) {
        self.send(Command::Configure(request));
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub fn events(&self) -> &Receiver<ManagerEvent> {
        &self.events
    }

    /// Stop the worker, waiting for the active pipeline to finish.
    pub fn shutdown(mut self) {
        self.join();
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::warn!("Pipeline worker has exited");
        }
    }

    fn join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.commands.send(Command::Shutdown);
        if handle.join().is_err() {
            log::error!("Pipeline worker panicked");
        }
    }
}

impl Drop for ReconfigureWorker {
    fn drop(&mut self) {
        self.join();
    }
}

fn run_worker(
    mut manager: PipelineManager,
    commands: Receiver<Command>,
    events: Sender<ManagerEvent>,
    bus_poll_interval: Duration,
) {
    log::debug!("Pipeline worker started");
    let mut deferred: Option<Command> = None;

    loop {
        let command = match deferred.take() {
            Some(command) => command,
            None => match commands.recv_timeout(bus_poll_interval) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(e) = manager.poll() {
                        let _ = events.send(ManagerEvent::Failed(e));
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            },
        };

        match command {
            Command::Configure(mut request) => {
                // Collapse a burst of requests into the latest one
                while let Ok(next) = commands.try_recv() {
                    match next {
                        Command::Configure(newer) => request = newer,
                        other => {
                            deferred = Some(other);
                            break;
                        }
                    }
                }

                let event = match manager.set_config(&request) {
                    Ok(()) => ManagerEvent::Configured(request),
                    Err(e) => ManagerEvent::Failed(e),
                };
                let _ = events.send(event);
            }
            Command::Stop => {
                let event = match manager.stop() {
                    Ok(info) => ManagerEvent::Stopped(info),
                    Err(e) => ManagerEvent::Failed(e),
                };
                let _ = events.send(event);
            }
            Command::Shutdown => break,
        }
    }

    match manager.stop() {
        Ok(Some(info)) => {
            let _ = events.send(ManagerEvent::Stopped(Some(info)));
        }
        Ok(None) => {}
        Err(e) => {
            let _ = events.send(ManagerEvent::Failed(e));
        }
    }
    log::debug!("Pipeline worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::{records_from_caps, ParseOptions};
    use crate::devices::{DeviceError, DeviceId};
    use gstreamer as gst;

    /// Device source whose devices can never be opened
    struct Unplugged;

    impl DeviceSource for Unplugged {
        fn enumerate_devices(&self) -> crate::devices::Result<Vec<DeviceId>> {
            Err(DeviceError::DeviceNotFound("No devices available".into()))
        }

        fn probe_caps(&self, device: &DeviceId) -> crate::devices::Result<String> {
            Err(DeviceError::DeviceNotFound(device.id.clone()))
        }

        fn create_source(&self, device: &str) -> crate::devices::Result<gst::Element> {
            Err(DeviceError::DeviceNotFound(device.to_string()))
        }
    }

    fn mode() -> CapabilityRecord {
        let caps = "video/x-raw, format=(string)I420, width=(int)1280, height=(int)720, framerate=(fraction)30/1";
        records_from_caps("/dev/v4l/by-id/usb-Acme_Cam-video-index0", caps, ParseOptions { strict: true })
            .unwrap()
            .remove(0)
    }

    fn manager() -> PipelineManager {
        PipelineManager::new(Arc::new(Unplugged), ManagerSettings::default())
    }

    #[test]
    fn test_record_without_mode_is_rejected() {
        let mut manager = manager();
        let request = PipelineRequest {
            mode: None,
            record_path: Some(PathBuf::from("/tmp/out.mp4")),
        };
        assert!(matches!(manager.set_config(&request), Err(PipelineError::MissingMode)));
        assert!(!manager.is_active());
    }

    #[test]
    fn test_bad_container_leaves_manager_idle() {
        let mut manager = manager();
        let request = PipelineRequest::record(mode(), "/tmp/out.mov");
        assert!(matches!(
            manager.set_config(&request),
            Err(PipelineError::Encoding(_))
        ));
        assert!(!manager.is_active());
        assert_eq!(manager.state().status, RecordingStatus::Idle);
    }

    #[test]
    fn test_stop_when_idle() {
        let mut manager = manager();
        assert!(manager.stop().unwrap().is_none());
        assert!(manager.poll().is_ok());
    }

    #[test]
    fn test_worker_reports_failures() {
        let worker = ReconfigureWorker::spawn(manager(), Duration::from_millis(10)).unwrap();
        worker.configure(PipelineRequest::record(mode(), "/tmp/out.webm"));

        match worker.events().recv_timeout(Duration::from_secs(5)) {
            Ok(ManagerEvent::Failed(PipelineError::Encoding(_))) => {}
            other => panic!("unexpected event: {:?}", other),
        }

        worker.stop();
        match worker.events().recv_timeout(Duration::from_secs(5)) {
            Ok(ManagerEvent::Stopped(None)) => {}
            other => panic!("unexpected event: {:?}", other),
        }

        worker.shutdown();
    }
}
