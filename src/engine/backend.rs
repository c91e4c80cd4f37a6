//! Interfaces of the collaborators the engine drives: the encoder catalog and its
//! sessions, the pixel conversion stage and hardware frame pools.
//!
//! Nothing here talks to a codec library. Implementations live in
//! [`crate::engine::hardware`] (catalogs) and [`crate::engine::simulate`] (dry-run
//! sessions, converter and allocator).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::core::{
    Codec, EncoderSettings, NativeFrame, Packet, PixelFormat, RawFrame, SourceFormat,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("option not found")]
    OptionNotFound,

    #[error("invalid value")]
    InvalidValue,

    #[error("could not open encoder: {0}")]
    OpenFailed(String),

    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("encoder is not open")]
    NotOpen,

    #[error("end of stream already signalled")]
    Flushed,

    #[error("hardware device unavailable: {0}")]
    Device(String),

    #[error("conversion failed: {0}")]
    Conversion(String),
}

/// Threading and misc capability flags advertised by an encoder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub slice_threads: bool,
    pub frame_threads: bool,
    /// Encoder manages its own threads (x264, libvpx, ...)
    pub other_threads: bool,
    pub experimental: bool,
    pub hardware: bool,
}

/// One concrete encoder implementation known to a catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderInfo {
    pub name: String,
    pub codec: Codec,
    pub description: String,
    /// Supported pixel formats in the encoder's own preference order
    pub pixel_formats: Vec<PixelFormat>,
    pub capabilities: Capabilities,
}

/// Result of one drain call
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Packet(Packet),
    /// Needs more input before it can produce output
    Again,
    /// Fully flushed
    Eof,
}

/// An allocated encoder context. Options are set before `open`; frames are submitted
/// and packets drained after it.
pub trait EncoderSession: Send {
    fn set_option(&mut self, key: &str, value: &str) -> Result<(), BackendError>;

    fn open(&mut self, settings: &EncoderSettings) -> Result<(), BackendError>;

    /// `None` signals end of stream
    fn send_frame(&mut self, frame: Option<&NativeFrame>) -> Result<(), BackendError>;

    fn receive_packet(&mut self) -> Result<Received, BackendError>;

    /// Global header produced by `open`
    fn extradata(&self) -> &[u8] {
        &[]
    }

    /// Container tag chosen by the encoder (ProRes profiles)
    fn codec_tag(&self) -> Option<[u8; 4]> {
        None
    }
}

/// Backend capability query
pub trait EncoderCatalog {
    /// Every encoder, in registration order
    fn encoders(&self) -> Vec<EncoderInfo>;

    fn open_session(&self, info: &EncoderInfo) -> Result<Box<dyn EncoderSession>, BackendError>;

    fn find_encoder(&self, name: &str) -> Option<EncoderInfo> {
        self.encoders().into_iter().find(|e| e.name == name)
    }

    /// First non-experimental encoder for the codec, else the first experimental one
    fn default_encoder(&self, codec: Codec) -> Option<EncoderInfo> {
        let matching: Vec<_> = self
            .encoders()
            .into_iter()
            .filter(|e| e.codec == codec)
            .collect();
        matching
            .iter()
            .find(|e| !e.capabilities.experimental)
            .or_else(|| matching.first())
            .cloned()
    }
}

/// Pixel format conversion stage
pub trait PixelConverter {
    /// Formats reachable from `source` without going through an intermediate format
    fn targets(&self, source: SourceFormat) -> Vec<PixelFormat>;

    fn convert(&mut self, frame: &RawFrame, target: PixelFormat) -> Result<NativeFrame, BackendError>;

    /// Generic (scaler) conversion between two backend formats
    fn reformat(&mut self, frame: NativeFrame, target: PixelFormat) -> Result<NativeFrame, BackendError>;

    fn set_threads(&mut self, _threads: usize) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HwDeviceKind {
    Vaapi,
    Cuda,
    Qsv,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwDevice {
    pub kind: HwDeviceKind,
    pub path: Option<String>,
}

/// Geometry and formats of a hardware frame pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePoolSpec {
    pub width: u32,
    pub height: u32,
    pub sw_format: PixelFormat,
    pub hw_format: PixelFormat,
    pub pool_size: usize,
}

pub trait HwFramePool: Send {
    fn spec(&self) -> FramePoolSpec;

    /// Transfer a software frame into a pool surface
    fn upload(&mut self, frame: NativeFrame) -> Result<NativeFrame, BackendError>;
}

/// Hardware device and frame context allocation
pub trait HwAllocator {
    fn create_device_context(&self, kind: HwDeviceKind) -> Result<HwDevice, BackendError>;

    fn create_frame_pool(
        &self,
        device: &HwDevice,
        spec: FramePoolSpec,
    ) -> Result<Box<dyn HwFramePool>, BackendError>;
}
