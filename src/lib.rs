// Webcam Recorder - GStreamer webcam preview and recording
// Main library entry point

pub mod caps;
pub mod config;
pub mod devices;
pub mod encoding;
pub mod gstreamer_init;
pub mod recording;
pub mod registration;

pub use caps::{CapabilityRecord, CapsError, ParseOptions};
pub use config::Config;
pub use devices::{DeviceError, DeviceSource};
pub use recording::{PipelineError, PipelineManager, PipelineRequest, ReconfigureWorker};
