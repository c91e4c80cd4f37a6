//! Per-stream encode loop.
//!
//! A pipeline owns one encoder context at a time. Each frame first drains the
//! reconfiguration mailbox, then (re)configures when the stream description changed,
//! converts, submits and drains every packet the backend has ready.

use std::sync::mpsc::Receiver;
use std::time::Instant;

use super::error::{EngineError, EngineResult};
use super::metadata::{embed_orig_format, extradata_prefix};
use super::monitor::{MonitorContext, PerformanceMonitor, PerformanceReport};
use super::negotiate::{ConversionPath, negotiate};
use super::reconfig::{ReconfigHandle, ReconfigMessage, ReconfigResponse, apply_config, mailbox};
use super::request::CompressionRequest;
use super::selector::{SelectedEncoder, select_encoder};
use super::settings::{EncoderSettings, EngineParams, HwFrames};
use super::tuner::{TuneInput, apply_colour_defaults, configure};
use super::types::{Codec, CompressedFrame, PixelFormat, RawFrame, StreamDescription};
use crate::engine::backend::{
    EncoderCatalog, EncoderSession, FramePoolSpec, HwAllocator, HwDeviceKind, HwFramePool,
    PixelConverter, Received,
};

/// Default surface count of a VA-API frame pool
pub const VAAPI_POOL_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Unconfigured,
    Configured,
    Encoding,
}

/// An opened encoder context and how frames reach it
pub struct ActiveEncoder {
    pub session: Box<dyn EncoderSession>,
    pub selected: SelectedEncoder,
    pub settings: EncoderSettings,
    /// Negotiated format as seen by the encoder
    pub format: PixelFormat,
    /// Software format frames are converted to (NV12 behind a VA-API pool)
    pub sw_format: PixelFormat,
    pub path: ConversionPath,
    pub hw_pool: Option<Box<dyn HwFramePool>>,
}

/// Result of one successful trial open
struct Trial {
    session: Box<dyn EncoderSession>,
    settings: EncoderSettings,
    sw_format: PixelFormat,
    hw_pool: Option<Box<dyn HwFramePool>>,
}

pub struct EncodePipeline {
    catalog: Box<dyn EncoderCatalog>,
    converter: Box<dyn PixelConverter>,
    hw: Option<Box<dyn HwAllocator>>,
    engine: EngineParams,
    request: CompressionRequest,
    saved_desc: Option<StreamDescription>,
    active: Option<ActiveEncoder>,
    state: PipelineState,
    monitor: PerformanceMonitor,
    last_report: Option<PerformanceReport>,
    mailbox: Receiver<ReconfigMessage>,
    handle: ReconfigHandle,
    pts: i64,
}

impl EncodePipeline {
    pub fn new(
        catalog: Box<dyn EncoderCatalog>,
        converter: Box<dyn PixelConverter>,
        request: CompressionRequest,
        engine: EngineParams,
    ) -> Self {
        let (handle, mailbox) = mailbox();
        Self {
            catalog,
            converter,
            hw: None,
            engine,
            request,
            saved_desc: None,
            active: None,
            state: PipelineState::Unconfigured,
            monitor: PerformanceMonitor::new(),
            last_report: None,
            mailbox,
            handle,
            pts: 0,
        }
    }

    pub fn with_hw_allocator(mut self, hw: Box<dyn HwAllocator>) -> Self {
        self.hw = Some(hw);
        self
    }

    /// Sending side of the reconfiguration mailbox
    pub fn handle(&self) -> ReconfigHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn request(&self) -> &CompressionRequest {
        &self.request
    }

    pub fn active(&self) -> Option<&ActiveEncoder> {
        self.active.as_ref()
    }

    pub fn settings(&self) -> Option<&EncoderSettings> {
        self.active.as_ref().map(|a| &a.settings)
    }

    /// Performance report produced since the last call, if any
    pub fn take_report(&mut self) -> Option<PerformanceReport> {
        self.last_report.take()
    }

    /// Configure for `desc` unless already configured for it
    pub fn prepare(&mut self, desc: &StreamDescription) -> EngineResult<&ActiveEncoder> {
        self.process_messages();
        self.ensure_configured(desc)?;
        self.active
            .as_ref()
            .ok_or_else(|| EngineError::Internal("encoder context missing after configuration"))
    }

    /// Encode one frame. `Ok(None)` means the backend produced nothing this time.
    pub fn compress_frame(&mut self, frame: &RawFrame) -> EngineResult<Option<CompressedFrame>> {
        self.process_messages();
        self.ensure_configured(&frame.desc)?;
        let Some(active) = self.active.as_mut() else {
            return Ok(None);
        };

        let t0 = Instant::now();
        let converted = match active.path {
            ConversionPath::Direct => self.converter.convert(frame, active.sw_format),
            ConversionPath::Fallback { convert_to } => self
                .converter
                .convert(frame, convert_to)
                .and_then(|f| self.converter.reformat(f, active.sw_format)),
        };
        let mut native = converted.map_err(|e| EngineError::ConversionFailure(e.to_string()))?;
        let t1 = Instant::now();

        native.pts = self.pts;
        self.pts += 1;
        if let Some(pool) = active.hw_pool.as_mut() {
            native = pool.upload(native)?;
        }

        let codec = active.settings.codec;
        let mut data = if codec.has_extradata() {
            extradata_prefix(active.session.extradata())
        } else {
            Vec::new()
        };
        let prefix_len = data.len();

        active.session.send_frame(Some(&native)).map_err(|e| {
            tracing::warn!("Error sending frame to encoder: {}", e);
            EngineError::Backend(e)
        })?;
        loop {
            match active.session.receive_packet() {
                Ok(Received::Packet(packet)) => data.extend_from_slice(&packet.data),
                Ok(Received::Again) | Ok(Received::Eof) => break,
                // keep what was already drained
                Err(e) => {
                    tracing::warn!("Receive packet error: {}", e);
                    break;
                }
            }
        }
        let t2 = Instant::now();
        self.state = PipelineState::Encoding;

        let ctx = MonitorContext {
            family: active.selected.family,
            capabilities: active.selected.info.capabilities,
            thread_type: active.settings.thread_type,
            thread_count: active.settings.thread_count,
            user_delay: self.request.options.contains_key("delay"),
            fps: frame.desc.fps,
            source_rgb: frame.desc.source.is_rgb(),
            target_rgb: active.format.is_rgb(),
        };
        if let Some(report) = self.monitor.observe(&ctx, t1 - t0, t2 - t0) {
            self.last_report = Some(report);
        }

        if data.len() == prefix_len {
            return Ok(None);
        }

        let metadata_embedded =
            self.engine.keep_pixfmt && embed_orig_format(codec, frame.desc.source, &mut data);
        let fourcc = match codec {
            Codec::Prores => active.session.codec_tag().unwrap_or(codec.fourcc()),
            _ => codec.fourcc(),
        };

        Ok(Some(CompressedFrame {
            codec,
            fourcc,
            width: frame.desc.width,
            height: frame.desc.height,
            fps: frame.desc.fps,
            data,
            metadata_embedded,
        }))
    }

    /// Flush and release the current encoder context
    pub fn teardown(&mut self) {
        if let Some(mut active) = self.active.take() {
            let dropped = flush(active.session.as_mut());
            tracing::debug!(
                "Released {} ({} buffered packets discarded)",
                active.selected.info.name,
                dropped
            );
        }
        self.state = PipelineState::Unconfigured;
    }

    fn process_messages(&mut self) {
        while let Ok(message) = self.mailbox.try_recv() {
            let response = apply_config(&mut self.request, &message.config);
            if response == ReconfigResponse::Ok {
                // forces reconfiguration on the next frame
                self.saved_desc = None;
            }
            let _ = message.reply.send(response);
        }
    }

    fn ensure_configured(&mut self, desc: &StreamDescription) -> EngineResult<()> {
        if self.saved_desc.is_some_and(|saved| saved.same_stream(desc)) {
            return Ok(());
        }
        self.teardown();
        match self.configure_with(desc) {
            Ok(active) => {
                self.active = Some(active);
                self.saved_desc = Some(*desc);
                self.state = PipelineState::Configured;
                self.monitor.reset();
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to configure compression: {}", e);
                self.saved_desc = None;
                Err(e)
            }
        }
    }

    fn configure_with(&mut self, desc: &StreamDescription) -> EngineResult<ActiveEncoder> {
        let selected = select_encoder(self.catalog.as_ref(), &self.request, desc.source.is_rgb())?;
        let targets = self.converter.targets(desc.source);

        let catalog = self.catalog.as_ref();
        let hw = self.hw.as_deref();
        let input = TuneInput {
            info: &selected.info,
            family: selected.family,
            desc,
            request: &self.request,
            engine: &self.engine,
        };
        let negotiated = negotiate(
            &selected.info.name,
            &selected.info.pixel_formats,
            desc,
            &self.request.conversion,
            self.engine.force_pix_fmt,
            &targets,
            |format| try_open(catalog, hw, input, format),
        )?;

        self.converter.set_threads(self.request.conv_threads);
        let trial = negotiated.opened;
        tracing::debug!(
            "Encoder {} thread type {:?}, count {:?}",
            selected.info.name,
            trial.settings.thread_type,
            trial.settings.thread_count
        );

        Ok(ActiveEncoder {
            session: trial.session,
            settings: trial.settings,
            format: negotiated.format,
            sw_format: trial.sw_format,
            path: negotiated.path,
            hw_pool: trial.hw_pool,
            selected,
        })
    }
}

impl Drop for EncodePipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Signal end of stream and drain until the backend reports EOF
fn flush(session: &mut dyn EncoderSession) -> usize {
    if let Err(e) = session.send_frame(None) {
        tracing::debug!("Flush not accepted: {}", e);
        return 0;
    }
    let mut packets = 0;
    loop {
        match session.receive_packet() {
            Ok(Received::Packet(_)) => packets += 1,
            Ok(Received::Again) | Ok(Received::Eof) => break,
            Err(e) => {
                tracing::warn!("Error while flushing encoder: {}", e);
                break;
            }
        }
    }
    packets
}

/// Open a context for one candidate format. `Ok(None)` rejects the format; errors
/// abort negotiation.
fn try_open(
    catalog: &dyn EncoderCatalog,
    hw: Option<&dyn HwAllocator>,
    input: TuneInput<'_>,
    format: PixelFormat,
) -> EngineResult<Option<Trial>> {
    let mut session = match catalog.open_session(input.info) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("Could not allocate encoder context: {}", e);
            return Ok(None);
        }
    };
    let mut settings = configure(session.as_mut(), input, format)?;

    let mut sw_format = format;
    let mut hw_pool = None;
    if format == PixelFormat::Vaapi {
        match vaapi_init(hw, &settings) {
            Ok(pool) => {
                let spec = pool.spec();
                settings.hw_frames = Some(HwFrames {
                    sw_format: spec.sw_format,
                    pool_size: spec.pool_size,
                });
                sw_format = spec.sw_format;
                apply_colour_defaults(&mut settings, sw_format);
                hw_pool = Some(pool);
                tracing::info!("Using VA-API with sw format {}", sw_format);
            }
            Err(e) => {
                tracing::warn!("VA-API initialization failed: {}", e);
                return Ok(None);
            }
        }
    }

    if let Err(e) = session.open(&settings) {
        tracing::error!("Could not open encoder for pixel format {}: {}", format, e);
        return Ok(None);
    }
    Ok(Some(Trial {
        session,
        settings,
        sw_format,
        hw_pool,
    }))
}

fn vaapi_init(
    hw: Option<&dyn HwAllocator>,
    settings: &EncoderSettings,
) -> EngineResult<Box<dyn HwFramePool>> {
    let hw = hw.ok_or_else(|| EngineError::Hardware("no hardware allocator configured".into()))?;
    let device = hw
        .create_device_context(HwDeviceKind::Vaapi)
        .map_err(|e| EngineError::Hardware(e.to_string()))?;

    let mut pool_size = VAAPI_POOL_SIZE;
    if settings.thread_type.frame {
        pool_size += settings.thread_count.unwrap_or(0);
    }
    let spec = FramePoolSpec {
        width: settings.width,
        height: settings.height,
        sw_format: PixelFormat::Nv12,
        hw_format: PixelFormat::Vaapi,
        pool_size,
    };
    hw.create_frame_pool(&device, spec)
        .map_err(|e| EngineError::Hardware(e.to_string()))
}
