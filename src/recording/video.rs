// Preview and record pipelines
//
// Preview:
//   source ! capsfilter ! autovideosink
//
// Record:
//   source ! capsfilter ! videorate ! capsfilter(framerate) ! tee
//     tee. ! queue ! autovideosink
//     tee. ! queue ! videoconvert ! avenc_mpeg4 ! mp4mux|avimux ! filesink
//
// Stopping a recording blocks the tee's capture pad, injects EOS into the
// capture queue and waits for it to leave the muxer before the pipeline is
// set to NULL (see `teardown`).

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_video as gst_video;
use gstreamer_video::prelude::*;

use crate::caps::CapabilityRecord;
use crate::devices::DeviceSource;
use crate::encoding::{ContainerFormat, EncoderSettings};

use super::teardown::{Teardown, TeardownState};
use super::{PipelineError, Result};

/// Result of a finished recording
#[derive(Debug, Clone, Serialize)]
pub struct RecordingInfo {
    pub path: PathBuf,
    pub container: ContainerFormat,
    pub bytes: u64,
    pub duration: Duration,
}

fn make_element(factory: &str, name: &str) -> Result<gst::Element> {
    gst::ElementFactory::make(factory)
        .name(name)
        .build()
        .map_err(|e| PipelineError::Element {
            factory: factory.to_string(),
            reason: e.to_string(),
        })
}

fn make_capsfilter(name: &str, caps: &gst::Caps) -> Result<gst::Element> {
    gst::ElementFactory::make("capsfilter")
        .name(name)
        .property("caps", caps)
        .build()
        .map_err(|e| PipelineError::Element {
            factory: "capsfilter".to_string(),
            reason: e.to_string(),
        })
}

fn make_preview_sink(name: &str) -> Result<gst::Element> {
    let sink = make_element("autovideosink", name)?;
    // Show frames as they arrive instead of against the pipeline clock
    if sink.find_property("sync").is_some() {
        sink.set_property("sync", false);
    }
    Ok(sink)
}

fn make_source(source: &dyn DeviceSource, mode: Option<&CapabilityRecord>) -> Result<gst::Element> {
    match mode {
        Some(mode) => Ok(source.create_source(&mode.device)?),
        None => make_element("autovideosrc", "source"),
    }
}

/// Request a new tee src pad and link it to `queue`
fn link_tee(tee: &gst::Element, queue: &gst::Element) -> Result<gst::Pad> {
    let tee_pad = tee
        .request_pad_simple("src_%u")
        .ok_or_else(|| PipelineError::Link(format!("no request pad available on {}", tee.name())))?;
    let queue_pad = queue
        .static_pad("sink")
        .ok_or_else(|| PipelineError::Link(format!("{} has no sink pad", queue.name())))?;

    tee_pad.link(&queue_pad).map_err(|e| {
        PipelineError::Link(format!("{} -> {}: {:?}", tee_pad.name(), queue.name(), e))
    })?;
    Ok(tee_pad)
}

/// Route the sink's `prepare-window-handle` request to a native window.
///
/// `handle` must name a window that outlives the pipeline.
fn attach_window_handle(pipeline: &gst::Pipeline, handle: usize) {
    let Some(bus) = pipeline.bus() else {
        log::warn!("Pipeline has no bus, cannot embed preview");
        return;
    };

    bus.set_sync_handler(move |_, msg| {
        if !gst_video::is_video_overlay_prepare_window_handle_message(msg) {
            return gst::BusSyncReply::Pass;
        }

        if let Some(src) = msg.src() {
            if src.find_property("force-aspect-ratio").is_some() {
                src.set_property("force-aspect-ratio", true);
            }
            if let Some(overlay) = src.dynamic_cast_ref::<gst_video::VideoOverlay>() {
                // SAFETY: the caller guarantees `handle` is a live native window
                unsafe { overlay.set_window_handle(handle) };
            }
        }
        gst::BusSyncReply::Drop
    });
}

/// Pop pending bus messages without blocking.
///
/// The first error becomes `PipelineError::Bus`; warnings are only logged.
fn drain_bus(pipeline: &gst::Pipeline) -> Result<()> {
    let Some(bus) = pipeline.bus() else {
        return Ok(());
    };

    while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Warning]) {
        match msg.view() {
            gst::MessageView::Error(err) => {
                let source_name = err
                    .src()
                    .map(|s| s.path_string().to_string())
                    .unwrap_or_else(|| pipeline.name().to_string());
                log::error!("{}: {} ({:?})", source_name, err.error(), err.debug());
                return Err(PipelineError::Bus {
                    source_name,
                    message: err.error().to_string(),
                    debug: err.debug().map(|d| d.to_string()),
                });
            }
            gst::MessageView::Warning(warn) => {
                log::warn!(
                    "{}: {} ({:?})",
                    warn.src().map(|s| s.path_string().to_string()).unwrap_or_default(),
                    warn.error(),
                    warn.debug()
                );
            }
            _ => {}
        }
    }

    Ok(())
}

/// Live view of a capture device
pub struct PreviewPipeline {
    pipeline: gst::Pipeline,
}

impl PreviewPipeline {
    /// Build the pipeline. Without a mode the platform default source is used
    /// unconstrained.
    pub fn new(
        source: &dyn DeviceSource,
        mode: Option<&CapabilityRecord>,
        window_handle: Option<usize>,
    ) -> Result<Self> {
        gst::init()?;

        let pipeline = gst::Pipeline::with_name("preview");
        let src = make_source(source, mode)?;
        let sink = make_preview_sink("sink")?;

        match mode {
            Some(mode) => {
                let filter = make_capsfilter("filter", &mode.to_caps()?)?;
                pipeline.add_many([&src, &filter, &sink])?;
                gst::Element::link_many([&src, &filter, &sink])?;
            }
            None => {
                pipeline.add_many([&src, &sink])?;
                src.link(&sink)?;
            }
        }

        if let Some(handle) = window_handle {
            attach_window_handle(&pipeline, handle);
        }

        Ok(Self { pipeline })
    }

    pub fn start(&self) -> Result<()> {
        self.pipeline.set_state(gst::State::Playing)?;
        log::info!("Preview started");
        Ok(())
    }

    /// Surface any error posted on the bus since the last call
    pub fn poll(&self) -> Result<()> {
        drain_bus(&self.pipeline)
    }

    pub fn stop(&self) -> Result<()> {
        self.pipeline.set_state(gst::State::Null)?;
        log::info!("Preview stopped");
        Ok(())
    }

    pub fn pipeline(&self) -> &gst::Pipeline {
        &self.pipeline
    }
}

impl Drop for PreviewPipeline {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

/// Live view plus MPEG-4 capture to a file
pub struct RecordPipeline {
    pipeline: gst::Pipeline,
    /// Tee pad feeding the capture branch; blocked during teardown
    tee_pad: gst::Pad,
    capture_queue: gst::Element,
    muxer: gst::Element,
    teardown: Arc<Teardown>,
    output_path: PathBuf,
    container: ContainerFormat,
    started_at: Option<Instant>,
}

impl RecordPipeline {
    /// Build the pipeline.
    ///
    /// The container is chosen from the output extension, checked before any
    /// element is created.
    pub fn new(
        source: &dyn DeviceSource,
        mode: &CapabilityRecord,
        output_path: &Path,
        encoder: &EncoderSettings,
        window_handle: Option<usize>,
    ) -> Result<Self> {
        let container = ContainerFormat::from_path(output_path)?;

        gst::init()?;

        let pipeline = gst::Pipeline::with_name("record");

        let src = make_source(source, Some(mode))?;
        let filter = make_capsfilter("filter", &mode.to_caps()?)?;
        let rate = make_element("videorate", "rate")?;
        let rate_caps: gst::Caps = mode.framerate_caps_string().parse()?;
        let rate_filter = make_capsfilter("rate_filter", &rate_caps)?;
        let tee = make_element("tee", "tee")?;

        let preview_queue = make_element("queue", "preview_queue")?;
        let sink = make_preview_sink("sink")?;

        let capture_queue = make_element("queue", "capture_queue")?;
        let convert = make_element("videoconvert", "convert")?;
        let encoder = encoder.build_element().map_err(|e| PipelineError::Element {
            factory: crate::encoding::encoder::MPEG4_ENCODER.to_string(),
            reason: e.to_string(),
        })?;
        let muxer = make_element(container.gst_muxer(), "muxer")?;
        let filesink = make_element("filesink", "filesink")?;
        filesink.set_property("location", output_path.to_string_lossy().as_ref());

        pipeline.add_many([
            &src,
            &filter,
            &rate,
            &rate_filter,
            &tee,
            &preview_queue,
            &sink,
            &capture_queue,
            &convert,
            &encoder,
            &muxer,
            &filesink,
        ])?;

        gst::Element::link_many([&src, &filter, &rate, &rate_filter, &tee])?;
        gst::Element::link_many([&preview_queue, &sink])?;
        gst::Element::link_many([&capture_queue, &convert, &encoder, &muxer, &filesink])?;

        link_tee(&tee, &preview_queue)?;
        let tee_pad = link_tee(&tee, &capture_queue)?;

        if let Some(handle) = window_handle {
            attach_window_handle(&pipeline, handle);
        }

        log::debug!(
            "Record pipeline: {} -> {} ({})",
            mode.caps_string(),
            output_path.display(),
            container.gst_muxer()
        );

        Ok(Self {
            pipeline,
            tee_pad,
            capture_queue,
            muxer,
            teardown: Arc::new(Teardown::new()),
            output_path: output_path.to_path_buf(),
            container,
            started_at: None,
        })
    }

    pub fn start(&mut self) -> Result<()> {
        self.pipeline.set_state(gst::State::Playing)?;
        self.started_at = Some(Instant::now());
        log::info!("Recording to {}", self.output_path.display());
        Ok(())
    }

    pub fn poll(&self) -> Result<()> {
        drain_bus(&self.pipeline)
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn teardown_state(&self) -> TeardownState {
        self.teardown.state()
    }

    /// Finalize the file and stop the pipeline.
    ///
    /// Waits up to `timeout` for end-of-stream to reach the muxer output. On
    /// timeout the pipeline is still set to NULL and `TeardownTimeout` is
    /// returned; the file may then be unplayable.
    pub fn stop(&mut self, timeout: Duration, poll: Duration) -> Result<RecordingInfo> {
        if self
            .teardown
            .transition(TeardownState::Recording, TeardownState::FlushRequested)
        {
            self.request_flush()?;

            if !self.teardown.wait_confirmed(timeout, poll) {
                log::error!(
                    "End-of-stream did not reach {} within {:?}",
                    self.muxer.name(),
                    timeout
                );
                self.shutdown();
                return Err(PipelineError::TeardownTimeout(timeout));
            }
        }

        let bus_result = drain_bus(&self.pipeline);
        self.shutdown();
        bus_result?;

        let bytes = std::fs::metadata(&self.output_path)
            .map(|m| m.len())
            .unwrap_or(0);
        let duration = self.started_at.map(|t| t.elapsed()).unwrap_or_default();

        log::info!(
            "Recording saved: {} ({} bytes, {:.1}s)",
            self.output_path.display(),
            bytes,
            duration.as_secs_f64()
        );

        Ok(RecordingInfo {
            path: self.output_path.clone(),
            container: self.container,
            bytes,
            duration,
        })
    }

    /// Block the capture pad, then from the blocked streaming thread send EOS
    /// into the capture queue and watch for it on the muxer output.
    fn request_flush(&self) -> Result<()> {
        let muxer_src = self
            .muxer
            .static_pad("src")
            .ok_or_else(|| PipelineError::Link(format!("{} has no src pad", self.muxer.name())))?;
        let queue_sink = self.capture_queue.static_pad("sink").ok_or_else(|| {
            PipelineError::Link(format!("{} has no sink pad", self.capture_queue.name()))
        })?;
        let teardown = self.teardown.clone();
        let fired = AtomicBool::new(false);

        self.tee_pad
            .add_probe(gst::PadProbeType::BLOCK_DOWNSTREAM, move |pad, _info| {
                if fired.swap(true, Ordering::SeqCst) {
                    return gst::PadProbeReturn::Remove;
                }
                log::debug!("Capture branch blocked at {}", pad.name());

                let teardown = teardown.clone();
                muxer_src.add_probe(gst::PadProbeType::EVENT_DOWNSTREAM, move |_pad, info| {
                    if let Some(gst::PadProbeData::Event(ref event)) = info.data {
                        if event.type_() == gst::EventType::Eos {
                            log::debug!("End-of-stream reached muxer output");
                            teardown.transition(
                                TeardownState::FlushRequested,
                                TeardownState::FlushConfirmed,
                            );
                            return gst::PadProbeReturn::Remove;
                        }
                    }
                    gst::PadProbeReturn::Ok
                });

                if !queue_sink.send_event(gst::event::Eos::new()) {
                    log::warn!("Capture queue refused end-of-stream");
                }
                gst::PadProbeReturn::Remove
            })
            .ok_or_else(|| PipelineError::Link("failed to block capture branch".into()))?;

        Ok(())
    }

    fn shutdown(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
        self.teardown.force(TeardownState::Stopped);
    }
}

impl Drop for RecordPipeline {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
