//! Dry-run backend: an encoder catalog whose sessions validate their configuration and
//! emit synthetic packets, a table-driven pixel converter and a VA-API style frame pool
//! allocator. Used by `rtenc simulate` and by the pipeline tests.

use std::collections::VecDeque;
use std::time::Duration;

use crate::engine::backend::{
    BackendError, EncoderCatalog, EncoderInfo, EncoderSession, FramePoolSpec, HwAllocator,
    HwDevice, HwDeviceKind, HwFramePool, PixelConverter, Received,
};
use crate::engine::core::{
    Codec, EncoderSettings, NativeFrame, Packet, PixelFormat, RawFrame, SourceFormat,
    Subsampling,
};
use crate::engine::hardware::{builtin_encoders, detect_render_device, probe_ffmpeg_encoders};

/// Failure injection and timing of simulated sessions
#[derive(Debug, Clone, Default)]
pub struct SessionBehaviour {
    /// Private options reported as unknown
    pub rejected_options: Vec<String>,
    /// Formats `open` refuses even though the encoder advertises them
    pub rejected_formats: Vec<PixelFormat>,
    /// Time spent in every `send_frame`
    pub latency: Duration,
    /// Frames held back before the first packet comes out
    pub delay_frames: usize,
}

pub struct SimulatedCatalog {
    encoders: Vec<EncoderInfo>,
    behaviour: SessionBehaviour,
}

impl SimulatedCatalog {
    pub fn new(encoders: Vec<EncoderInfo>) -> Self {
        Self {
            encoders,
            behaviour: SessionBehaviour::default(),
        }
    }

    /// Catalog of a typical full FFmpeg build
    pub fn builtin() -> Self {
        Self::new(builtin_encoders())
    }

    /// Catalog of the local `ffmpeg` binary
    pub fn from_ffmpeg() -> Self {
        Self::new(probe_ffmpeg_encoders().to_vec())
    }

    pub fn with_behaviour(mut self, behaviour: SessionBehaviour) -> Self {
        self.behaviour = behaviour;
        self
    }
}

impl EncoderCatalog for SimulatedCatalog {
    fn encoders(&self) -> Vec<EncoderInfo> {
        self.encoders.clone()
    }

    fn open_session(&self, info: &EncoderInfo) -> Result<Box<dyn EncoderSession>, BackendError> {
        Ok(Box::new(SimulatedSession::new(info.clone(), self.behaviour.clone())))
    }
}

pub struct SimulatedSession {
    info: EncoderInfo,
    behaviour: SessionBehaviour,
    options: Vec<(String, String)>,
    opened: Option<EncoderSettings>,
    pending: VecDeque<Packet>,
    ready: VecDeque<Packet>,
    flushed: bool,
    extradata: Vec<u8>,
    codec_tag: Option<[u8; 4]>,
}

impl SimulatedSession {
    pub fn new(info: EncoderInfo, behaviour: SessionBehaviour) -> Self {
        Self {
            info,
            behaviour,
            options: Vec::new(),
            opened: None,
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            flushed: false,
            extradata: Vec::new(),
            codec_tag: None,
        }
    }

    /// Options accepted so far, in order
    pub fn options(&self) -> &[(String, String)] {
        &self.options
    }

    fn packet_size(settings: &EncoderSettings, frame: &NativeFrame) -> usize {
        let fps = settings.time_base.1.max(1) as u64;
        let size = match settings.bit_rate {
            Some(rate) => rate / 8 / fps,
            None => frame.data.len() as u64 / 8,
        };
        size.max(16) as usize
    }
}

impl EncoderSession for SimulatedSession {
    fn set_option(&mut self, key: &str, value: &str) -> Result<(), BackendError> {
        if self.opened.is_some() {
            return Err(BackendError::InvalidValue);
        }
        if self.behaviour.rejected_options.iter().any(|o| o == key) {
            return Err(BackendError::OptionNotFound);
        }
        if value.is_empty() {
            return Err(BackendError::InvalidValue);
        }
        self.options.push((key.to_string(), value.to_string()));
        Ok(())
    }

    fn open(&mut self, settings: &EncoderSettings) -> Result<(), BackendError> {
        if self.opened.is_some() {
            return Err(BackendError::OpenFailed("already open".into()));
        }
        if !self.info.pixel_formats.contains(&settings.pix_fmt) {
            return Err(BackendError::OpenFailed(format!(
                "{} does not support {}",
                self.info.name, settings.pix_fmt
            )));
        }
        if self.behaviour.rejected_formats.contains(&settings.pix_fmt) {
            return Err(BackendError::OpenFailed(format!(
                "{} refused {}",
                self.info.name, settings.pix_fmt
            )));
        }
        if settings.pix_fmt == PixelFormat::Vaapi && settings.hw_frames.is_none() {
            return Err(BackendError::OpenFailed("missing hardware frames context".into()));
        }

        if settings.codec.has_extradata() {
            self.extradata = format!("{}:{}x{}", settings.encoder, settings.width, settings.height)
                .into_bytes();
        }
        if settings.codec == Codec::Prores {
            self.codec_tag = Some(match settings.pix_fmt.desc().subsampling {
                Subsampling::S444 => *b"ap4h",
                _ => *b"apcn",
            });
        }
        tracing::debug!(
            "Opened simulated {} ({}x{} {}, {} options)",
            self.info.name,
            settings.width,
            settings.height,
            settings.pix_fmt,
            self.options.len()
        );
        self.opened = Some(settings.clone());
        Ok(())
    }

    fn send_frame(&mut self, frame: Option<&NativeFrame>) -> Result<(), BackendError> {
        let settings = self.opened.as_ref().ok_or(BackendError::NotOpen)?;
        if self.flushed {
            return Err(BackendError::Flushed);
        }
        let Some(frame) = frame else {
            self.flushed = true;
            self.ready.extend(self.pending.drain(..));
            return Ok(());
        };
        if frame.format != settings.pix_fmt {
            return Err(BackendError::Encode(format!(
                "expected {} frame, got {}",
                settings.pix_fmt, frame.format
            )));
        }
        if !self.behaviour.latency.is_zero() {
            std::thread::sleep(self.behaviour.latency);
        }

        let fourcc = settings.codec.fourcc();
        let mut data = vec![0u8; Self::packet_size(settings, frame)];
        data[..4].copy_from_slice(&fourcc);
        let gop = settings.gop_size.max(1) as i64;
        self.pending.push_back(Packet {
            data,
            pts: frame.pts,
            keyframe: frame.pts % gop == 0,
        });
        while self.pending.len() > self.behaviour.delay_frames {
            if let Some(packet) = self.pending.pop_front() {
                self.ready.push_back(packet);
            }
        }
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Received, BackendError> {
        if self.opened.is_none() {
            return Err(BackendError::NotOpen);
        }
        Ok(match self.ready.pop_front() {
            Some(packet) => Received::Packet(packet),
            None if self.flushed => Received::Eof,
            None => Received::Again,
        })
    }

    fn extradata(&self) -> &[u8] {
        &self.extradata
    }

    fn codec_tag(&self) -> Option<[u8; 4]> {
        self.codec_tag
    }
}

/// Bytes of one frame in a backend format; hardware surfaces are sized as NV12
pub fn native_frame_size(format: PixelFormat, width: u32, height: u32) -> usize {
    let pixels = width as usize * height as usize;
    let desc = format.desc();
    let bytes = if desc.depth > 8 { 2 } else { 1 };
    let samples = match (format, desc.subsampling) {
        (PixelFormat::Bgr0 | PixelFormat::X2rgb10, _) => return pixels * 4,
        (PixelFormat::Xv30, _) => return pixels * 4,
        (_, Subsampling::S420) => pixels * 3 / 2,
        (_, Subsampling::S422) => pixels * 2,
        (_, Subsampling::S444) => pixels * 3,
    };
    samples * bytes
}

/// Table-driven converter with the conversions a capture pipeline usually ships
#[derive(Debug, Clone, Default)]
pub struct SimulatedConverter {
    threads: usize,
}

impl SimulatedConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

fn conversion_table(source: SourceFormat) -> &'static [PixelFormat] {
    use PixelFormat::*;
    match source {
        SourceFormat::Uyvy => &[
            Uyvy422, Yuv422p, Yuvj422p, Yuv420p, Yuvj420p, Nv12, Yuv444p, Yuvj444p, Yuv422p10,
            Yuv420p10, P010, Yuv444p10, Gbrp, Rgb24, Bgr0,
        ],
        SourceFormat::Yuyv => &[Yuyv422, Yuv422p, Yuv420p, Nv12],
        SourceFormat::V210 => &[
            Yuv422p10, P210, Yuv420p10, P010, Yuv444p10, Yuv422p, Yuv420p, Nv12,
        ],
        SourceFormat::Y216 => &[Y210, Yuv422p10, P010, Yuv420p10, Yuv444p16],
        SourceFormat::Y416 => &[Yuv444p16, Yuv444p12, Yuv444p10, Xv30],
        SourceFormat::I420 => &[Yuv420p, Yuvj420p, Nv12],
        SourceFormat::Rgb => &[Rgb24, Gbrp, Bgr0, Yuv444p, Yuv420p, Nv12],
        SourceFormat::Rgba => &[Bgr0, Gbrp, Rgb24, Yuv444p, Yuv420p],
        SourceFormat::Bgr => &[Bgr0, Rgb24, Gbrp],
        SourceFormat::R10k => &[Gbrp10, X2rgb10, Gbrp16, Yuv444p10, Yuv422p10, Yuv420p10],
        SourceFormat::R12l => &[Gbrp12, Gbrp16, Yuv444p12, Yuv444p16],
        SourceFormat::Rg48 => &[Gbrp16, Gbrp12, Yuv444p16],
    }
}

impl PixelConverter for SimulatedConverter {
    fn targets(&self, source: SourceFormat) -> Vec<PixelFormat> {
        let mut targets = conversion_table(source).to_vec();
        // VA-API surfaces are uploaded from NV12
        if targets.contains(&PixelFormat::Nv12) {
            targets.push(PixelFormat::Vaapi);
        }
        targets
    }

    fn convert(&mut self, frame: &RawFrame, target: PixelFormat) -> Result<NativeFrame, BackendError> {
        let desc = frame.desc;
        if !conversion_table(desc.source).contains(&target) {
            return Err(BackendError::Conversion(format!(
                "no conversion from {} to {}",
                desc.source, target
            )));
        }
        let expected = desc.source.frame_size(desc.width, desc.height);
        if frame.data.len() < expected {
            return Err(BackendError::Conversion(format!(
                "short {} frame: {} bytes, expected {}",
                desc.source,
                frame.data.len(),
                expected
            )));
        }
        let mut data = frame.data[..expected].to_vec();
        data.resize(native_frame_size(target, desc.width, desc.height), 0);
        Ok(NativeFrame {
            format: target,
            width: desc.width,
            height: desc.height,
            data,
            pts: 0,
        })
    }

    fn reformat(&mut self, mut frame: NativeFrame, target: PixelFormat) -> Result<NativeFrame, BackendError> {
        if frame.format.is_hwaccel() || target.is_hwaccel() {
            return Err(BackendError::Conversion(format!(
                "cannot scale {} to {}",
                frame.format, target
            )));
        }
        frame
            .data
            .resize(native_frame_size(target, frame.width, frame.height), 0);
        frame.format = target;
        Ok(frame)
    }

    fn set_threads(&mut self, threads: usize) {
        self.threads = threads;
    }
}

/// Allocator handing out in-memory frame pools
#[derive(Debug, Clone, Default)]
pub struct SimulatedHwAllocator {
    fail: bool,
}

impl SimulatedHwAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocator whose device creation always fails
    pub fn unavailable() -> Self {
        Self { fail: true }
    }
}

impl HwAllocator for SimulatedHwAllocator {
    fn create_device_context(&self, kind: HwDeviceKind) -> Result<HwDevice, BackendError> {
        if self.fail {
            return Err(BackendError::Device(format!("{:?} device unavailable", kind)));
        }
        let path = match kind {
            HwDeviceKind::Vaapi => detect_render_device(),
            HwDeviceKind::Cuda | HwDeviceKind::Qsv => None,
        };
        Ok(HwDevice { kind, path })
    }

    fn create_frame_pool(
        &self,
        device: &HwDevice,
        spec: FramePoolSpec,
    ) -> Result<Box<dyn HwFramePool>, BackendError> {
        if spec.pool_size == 0 {
            return Err(BackendError::Device("empty frame pool".into()));
        }
        tracing::debug!(
            "Frame pool on {:?} ({}): {} surfaces of {}x{} {}",
            device.kind,
            device.path.as_deref().unwrap_or("default device"),
            spec.pool_size,
            spec.width,
            spec.height,
            spec.sw_format
        );
        Ok(Box::new(SimulatedFramePool { spec }))
    }
}

struct SimulatedFramePool {
    spec: FramePoolSpec,
}

impl HwFramePool for SimulatedFramePool {
    fn spec(&self) -> FramePoolSpec {
        self.spec
    }

    fn upload(&mut self, mut frame: NativeFrame) -> Result<NativeFrame, BackendError> {
        if frame.format != self.spec.sw_format {
            return Err(BackendError::Device(format!(
                "pool expects {} surfaces, got {}",
                self.spec.sw_format, frame.format
            )));
        }
        frame.format = self.spec.hw_format;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::core::StreamDescription;

    fn opened(name: &str, behaviour: SessionBehaviour) -> (Box<dyn EncoderSession>, EncoderSettings) {
        let catalog = SimulatedCatalog::builtin().with_behaviour(behaviour);
        let info = catalog.find_encoder(name).unwrap();
        let desc = StreamDescription::new(64, 32, 25.0, SourceFormat::Uyvy);
        let mut settings = EncoderSettings::new(&info.name, info.codec, &desc, info.pixel_formats[0]);
        settings.gop_size = 10;
        let mut session = catalog.open_session(&info).unwrap();
        session.open(&settings).unwrap();
        (session, settings)
    }

    fn native(settings: &EncoderSettings, pts: i64) -> NativeFrame {
        NativeFrame {
            format: settings.pix_fmt,
            width: settings.width,
            height: settings.height,
            data: vec![0; native_frame_size(settings.pix_fmt, settings.width, settings.height)],
            pts,
        }
    }

    #[test]
    fn test_delayed_packets_come_out_on_flush() {
        let behaviour = SessionBehaviour {
            delay_frames: 2,
            ..Default::default()
        };
        let (mut session, settings) = opened("libx264", behaviour);
        for pts in 0..3 {
            session.send_frame(Some(&native(&settings, pts))).unwrap();
        }
        let Received::Packet(first) = session.receive_packet().unwrap() else {
            panic!("expected a packet");
        };
        assert_eq!(first.pts, 0);
        assert!(first.keyframe);
        assert_eq!(&first.data[..4], b"AVC1");
        assert_eq!(session.receive_packet().unwrap(), Received::Again);

        session.send_frame(None).unwrap();
        let mut rest = 0;
        while let Received::Packet(_) = session.receive_packet().unwrap() {
            rest += 1;
        }
        assert_eq!(rest, 2);
        assert_eq!(session.receive_packet().unwrap(), Received::Eof);
        assert_eq!(
            session.send_frame(Some(&native(&settings, 3))),
            Err(BackendError::Flushed)
        );
    }

    #[test]
    fn test_open_rejects_formats() {
        let catalog = SimulatedCatalog::builtin().with_behaviour(SessionBehaviour {
            rejected_formats: vec![PixelFormat::Yuv420p],
            ..Default::default()
        });
        let info = catalog.find_encoder("libx264").unwrap();
        let desc = StreamDescription::new(64, 32, 25.0, SourceFormat::Uyvy);
        for format in [PixelFormat::Yuv420p, PixelFormat::Gbrp] {
            let settings = EncoderSettings::new(&info.name, info.codec, &desc, format);
            let mut session = catalog.open_session(&info).unwrap();
            assert!(matches!(session.open(&settings), Err(BackendError::OpenFailed(_))));
        }
    }

    #[test]
    fn test_rejected_option() {
        let catalog = SimulatedCatalog::builtin().with_behaviour(SessionBehaviour {
            rejected_options: vec!["tune".into()],
            ..Default::default()
        });
        let info = catalog.find_encoder("libx264").unwrap();
        let mut session = catalog.open_session(&info).unwrap();
        assert_eq!(session.set_option("tune", "zerolatency"), Err(BackendError::OptionNotFound));
        assert_eq!(session.set_option("preset", "ultrafast"), Ok(()));
    }

    #[test]
    fn test_prores_codec_tag() {
        let (session, _) = opened("prores_ks", SessionBehaviour::default());
        assert_eq!(session.codec_tag(), Some(*b"apcn"));
        assert!(session.extradata().is_empty());
        let (session, _) = opened("ffv1", SessionBehaviour::default());
        assert!(!session.extradata().is_empty());
    }

    #[test]
    fn test_converter_targets_and_checks() {
        let mut conv = SimulatedConverter::new();
        let targets = conv.targets(SourceFormat::Uyvy);
        assert_eq!(targets.last(), Some(&PixelFormat::Vaapi));
        assert!(!conv.targets(SourceFormat::Rg48).contains(&PixelFormat::Vaapi));

        let desc = StreamDescription::new(16, 8, 25.0, SourceFormat::Uyvy);
        let frame = RawFrame {
            desc,
            data: vec![0; desc.source.frame_size(16, 8)],
        };
        let out = conv.convert(&frame, PixelFormat::Yuv420p).unwrap();
        assert_eq!(out.data.len(), 16 * 8 * 3 / 2);
        assert!(conv.convert(&frame, PixelFormat::Gbrp16).is_err());
        assert!(conv.convert(&frame, PixelFormat::Vaapi).is_err());

        let short = RawFrame {
            desc,
            data: vec![0; 10],
        };
        assert!(matches!(
            conv.convert(&short, PixelFormat::Yuv422p),
            Err(BackendError::Conversion(_))
        ));
    }

    #[test]
    fn test_frame_pool_upload() {
        let hw = SimulatedHwAllocator::new();
        let device = hw.create_device_context(HwDeviceKind::Vaapi).unwrap();
        let spec = FramePoolSpec {
            width: 16,
            height: 16,
            sw_format: PixelFormat::Nv12,
            hw_format: PixelFormat::Vaapi,
            pool_size: 20,
        };
        let mut pool = hw.create_frame_pool(&device, spec).unwrap();
        let frame = NativeFrame {
            format: PixelFormat::Nv12,
            width: 16,
            height: 16,
            data: vec![0; native_frame_size(PixelFormat::Nv12, 16, 16)],
            pts: 0,
        };
        assert_eq!(pool.upload(frame.clone()).unwrap().format, PixelFormat::Vaapi);
        let wrong = NativeFrame {
            format: PixelFormat::Yuv420p,
            ..frame
        };
        assert!(pool.upload(wrong).is_err());
        assert!(SimulatedHwAllocator::unavailable()
            .create_device_context(HwDeviceKind::Vaapi)
            .is_err());
    }
}
