//! Stream, codec and pixel format vocabulary shared by the whole engine.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Compressed codecs
// ============================================================================

/// Output codecs the engine knows how to configure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Codec {
    H264,
    H265,
    Mjpg,
    J2k,
    Vp8,
    Vp9,
    Hfyu,
    Ffv1,
    Av1,
    Prores,
}

impl Codec {
    pub const ALL: [Codec; 10] = [
        Codec::H264,
        Codec::H265,
        Codec::Mjpg,
        Codec::J2k,
        Codec::Vp8,
        Codec::Vp9,
        Codec::Hfyu,
        Codec::Ffv1,
        Codec::Av1,
        Codec::Prores,
    ];

    /// User-facing codec name (also accepted by `codec=`)
    pub fn name(&self) -> &'static str {
        match self {
            Self::H264 => "H.264",
            Self::H265 => "H.265",
            Self::Mjpg => "MJPEG",
            Self::J2k => "J2K",
            Self::Vp8 => "VP8",
            Self::Vp9 => "VP9",
            Self::Hfyu => "HFYU",
            Self::Ffv1 => "FFV1",
            Self::Av1 => "AV1",
            Self::Prores => "ProRes",
        }
    }

    /// Parse a codec name, case-insensitive, with the common aliases
    pub fn from_name(name: &str) -> Option<Codec> {
        let lower = name.trim().to_ascii_lowercase();
        let codec = match lower.as_str() {
            "h264" | "h.264" | "avc" => Self::H264,
            "h265" | "h.265" | "hevc" => Self::H265,
            "mjpg" | "mjpeg" | "jpeg" => Self::Mjpg,
            "j2k" | "jpeg2000" => Self::J2k,
            "vp8" => Self::Vp8,
            "vp9" => Self::Vp9,
            "hfyu" | "huffyuv" => Self::Hfyu,
            "ffv1" => Self::Ffv1,
            "av1" => Self::Av1,
            "prores" => Self::Prores,
            _ => return None,
        };
        Some(codec)
    }

    /// FFmpeg codec identifier, as printed in `(codec xyz)` by `ffmpeg -encoders`
    pub fn ffmpeg_id(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::H265 => "hevc",
            Self::Mjpg => "mjpeg",
            Self::J2k => "jpeg2000",
            Self::Vp8 => "vp8",
            Self::Vp9 => "vp9",
            Self::Hfyu => "huffyuv",
            Self::Ffv1 => "ffv1",
            Self::Av1 => "av1",
            Self::Prores => "prores",
        }
    }

    pub fn from_ffmpeg_id(id: &str) -> Option<Codec> {
        Self::ALL.into_iter().find(|c| c.ffmpeg_id() == id)
    }

    /// Tag carried by compressed frames on the wire
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            Self::H264 => *b"AVC1",
            Self::H265 => *b"HEVC",
            Self::Mjpg => *b"MJPG",
            Self::J2k => *b"MJ2C",
            Self::Vp8 => *b"VP80",
            Self::Vp9 => *b"VP90",
            Self::Hfyu => *b"HFYU",
            Self::Ffv1 => *b"FFV1",
            Self::Av1 => *b"AV01",
            Self::Prores => *b"apcn",
        }
    }

    /// Highest component depth the codec carries
    pub fn native_depth(&self) -> u8 {
        match self {
            Self::Mjpg | Self::Vp8 | Self::Hfyu => 8,
            Self::J2k | Self::Ffv1 => 16,
            Self::H264 | Self::H265 | Self::Vp9 | Self::Av1 | Self::Prores => 10,
        }
    }

    /// Codecs whose decoders need the encoder's global header in-band
    pub fn has_extradata(&self) -> bool {
        matches!(self, Self::Hfyu | Self::Ffv1)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Chroma subsampling
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Subsampling {
    S420,
    S422,
    S444,
}

impl Subsampling {
    /// Accepts `444`/`422`/`420` and the four-digit `4440`/`4220`/`4200` forms
    pub fn from_digits(value: u32) -> Option<Subsampling> {
        let value = if value < 1000 { value * 10 } else { value };
        match value {
            4440 => Some(Self::S444),
            4220 => Some(Self::S422),
            4200 => Some(Self::S420),
            _ => None,
        }
    }

    /// J:a:b notation
    pub fn jab(&self) -> (u8, u8, u8) {
        match self {
            Self::S444 => (4, 4, 4),
            Self::S422 => (4, 2, 2),
            Self::S420 => (4, 2, 0),
        }
    }
}

impl fmt::Display for Subsampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (j, a, b) = self.jab();
        write!(f, "{}:{}:{}", j, a, b)
    }
}

/// Depth, subsampling and colour model of a pixel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelDesc {
    pub depth: u8,
    pub subsampling: Subsampling,
    pub rgb: bool,
}

const fn desc(depth: u8, subsampling: Subsampling, rgb: bool) -> PixelDesc {
    PixelDesc {
        depth,
        subsampling,
        rgb,
    }
}

// ============================================================================
// Source (uncompressed capture) formats
// ============================================================================

/// Uncompressed formats delivered by capture sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceFormat {
    Uyvy,
    Yuyv,
    V210,
    Y216,
    Y416,
    I420,
    Rgb,
    Rgba,
    Bgr,
    R10k,
    R12l,
    Rg48,
}

impl SourceFormat {
    pub const ALL: [SourceFormat; 12] = [
        Self::Uyvy,
        Self::Yuyv,
        Self::V210,
        Self::Y216,
        Self::Y416,
        Self::I420,
        Self::Rgb,
        Self::Rgba,
        Self::Bgr,
        Self::R10k,
        Self::R12l,
        Self::Rg48,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Uyvy => "UYVY",
            Self::Yuyv => "YUYV",
            Self::V210 => "v210",
            Self::Y216 => "Y216",
            Self::Y416 => "Y416",
            Self::I420 => "I420",
            Self::Rgb => "RGB",
            Self::Rgba => "RGBA",
            Self::Bgr => "BGR",
            Self::R10k => "R10k",
            Self::R12l => "R12L",
            Self::Rg48 => "RG48",
        }
    }

    pub fn from_name(name: &str) -> Option<SourceFormat> {
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(name.trim()))
    }

    pub fn desc(&self) -> PixelDesc {
        use Subsampling::*;
        match self {
            Self::Uyvy | Self::Yuyv => desc(8, S422, false),
            Self::V210 => desc(10, S422, false),
            Self::Y216 => desc(16, S422, false),
            Self::Y416 => desc(16, S444, false),
            Self::I420 => desc(8, S420, false),
            Self::Rgb | Self::Rgba | Self::Bgr => desc(8, S444, true),
            Self::R10k => desc(10, S444, true),
            Self::R12l => desc(12, S444, true),
            Self::Rg48 => desc(16, S444, true),
        }
    }

    pub fn is_rgb(&self) -> bool {
        self.desc().rgb
    }

    /// Bytes needed for one frame (rounded up for packed 10/12-bit layouts)
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::Uyvy | Self::Yuyv => pixels * 2,
            Self::V210 => (width as usize).div_ceil(48) * 128 * height as usize,
            Self::Y216 => pixels * 4,
            Self::Y416 | Self::Rg48 => pixels * 8,
            Self::I420 => pixels * 3 / 2,
            Self::Rgb | Self::Bgr => pixels * 3,
            Self::Rgba | Self::R10k => pixels * 4,
            Self::R12l => pixels * 36 / 8,
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Backend pixel formats
// ============================================================================

/// Pixel formats an encoder backend may accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PixelFormat {
    Yuv420p,
    Yuvj420p,
    Nv12,
    Yuv422p,
    Yuvj422p,
    Yuv444p,
    Yuvj444p,
    Uyvy422,
    Yuyv422,
    P010,
    Yuv420p10,
    Yuv422p10,
    P210,
    Y210,
    Yuv444p10,
    Xv30,
    Yuv420p12,
    Yuv422p12,
    Yuv444p12,
    Yuv444p16,
    Gbrp,
    Rgb24,
    Bgr0,
    Gbrp10,
    X2rgb10,
    Gbrp12,
    Gbrp16,
    Vaapi,
    Cuda,
    Qsv,
    Videotoolbox,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 31] = [
        Self::Yuv420p,
        Self::Yuvj420p,
        Self::Nv12,
        Self::Yuv422p,
        Self::Yuvj422p,
        Self::Yuv444p,
        Self::Yuvj444p,
        Self::Uyvy422,
        Self::Yuyv422,
        Self::P010,
        Self::Yuv420p10,
        Self::Yuv422p10,
        Self::P210,
        Self::Y210,
        Self::Yuv444p10,
        Self::Xv30,
        Self::Yuv420p12,
        Self::Yuv422p12,
        Self::Yuv444p12,
        Self::Yuv444p16,
        Self::Gbrp,
        Self::Rgb24,
        Self::Bgr0,
        Self::Gbrp10,
        Self::X2rgb10,
        Self::Gbrp12,
        Self::Gbrp16,
        Self::Vaapi,
        Self::Cuda,
        Self::Qsv,
        Self::Videotoolbox,
    ];

    /// FFmpeg name of the format
    pub fn name(&self) -> &'static str {
        match self {
            Self::Yuv420p => "yuv420p",
            Self::Yuvj420p => "yuvj420p",
            Self::Nv12 => "nv12",
            Self::Yuv422p => "yuv422p",
            Self::Yuvj422p => "yuvj422p",
            Self::Yuv444p => "yuv444p",
            Self::Yuvj444p => "yuvj444p",
            Self::Uyvy422 => "uyvy422",
            Self::Yuyv422 => "yuyv422",
            Self::P010 => "p010le",
            Self::Yuv420p10 => "yuv420p10le",
            Self::Yuv422p10 => "yuv422p10le",
            Self::P210 => "p210le",
            Self::Y210 => "y210le",
            Self::Yuv444p10 => "yuv444p10le",
            Self::Xv30 => "xv30le",
            Self::Yuv420p12 => "yuv420p12le",
            Self::Yuv422p12 => "yuv422p12le",
            Self::Yuv444p12 => "yuv444p12le",
            Self::Yuv444p16 => "yuv444p16le",
            Self::Gbrp => "gbrp",
            Self::Rgb24 => "rgb24",
            Self::Bgr0 => "bgr0",
            Self::Gbrp10 => "gbrp10le",
            Self::X2rgb10 => "x2rgb10le",
            Self::Gbrp12 => "gbrp12le",
            Self::Gbrp16 => "gbrp16le",
            Self::Vaapi => "vaapi",
            Self::Cuda => "cuda",
            Self::Qsv => "qsv",
            Self::Videotoolbox => "videotoolbox_vld",
        }
    }

    /// Parse an FFmpeg pixel format name; the `le` suffix is optional
    pub fn from_name(name: &str) -> Option<PixelFormat> {
        let lower = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|f| {
            let n = f.name();
            n == lower || n.strip_suffix("le") == Some(lower.as_str())
        })
    }

    pub fn desc(&self) -> PixelDesc {
        use Subsampling::*;
        match self {
            Self::Yuv420p | Self::Yuvj420p | Self::Nv12 => desc(8, S420, false),
            Self::Yuv422p | Self::Yuvj422p | Self::Uyvy422 | Self::Yuyv422 => desc(8, S422, false),
            Self::Yuv444p | Self::Yuvj444p => desc(8, S444, false),
            Self::P010 | Self::Yuv420p10 => desc(10, S420, false),
            Self::Yuv422p10 | Self::P210 | Self::Y210 => desc(10, S422, false),
            Self::Yuv444p10 | Self::Xv30 => desc(10, S444, false),
            Self::Yuv420p12 => desc(12, S420, false),
            Self::Yuv422p12 => desc(12, S422, false),
            Self::Yuv444p12 => desc(12, S444, false),
            Self::Yuv444p16 => desc(16, S444, false),
            Self::Gbrp | Self::Rgb24 | Self::Bgr0 => desc(8, S444, true),
            Self::Gbrp10 | Self::X2rgb10 => desc(10, S444, true),
            Self::Gbrp12 => desc(12, S444, true),
            Self::Gbrp16 => desc(16, S444, true),
            // surfaces are described by their usual software upload format
            Self::Vaapi | Self::Cuda | Self::Qsv | Self::Videotoolbox => desc(8, S420, false),
        }
    }

    pub fn is_rgb(&self) -> bool {
        self.desc().rgb
    }

    /// Opaque hardware surface (not addressable by software conversion)
    pub fn is_hwaccel(&self) -> bool {
        matches!(self, Self::Vaapi | Self::Cuda | Self::Qsv | Self::Videotoolbox)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<String> for PixelFormat {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::from_name(&name).ok_or_else(|| format!("unknown pixel format \"{}\"", name))
    }
}

impl From<PixelFormat> for String {
    fn from(format: PixelFormat) -> Self {
        format.name().to_string()
    }
}

/// Space-separated list of format names, used in diagnostics
pub fn format_list(formats: &[PixelFormat]) -> String {
    if formats.is_empty() {
        return "(none)".to_string();
    }
    formats
        .iter()
        .map(|f| f.name())
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Stream description and frames
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Interlacing {
    #[default]
    Progressive,
    /// Both fields interleaved in one frame
    InterlacedMerged,
    UpperFieldFirst,
    LowerFieldFirst,
    SegmentedFrame,
}

impl Interlacing {
    pub fn is_interlaced(&self) -> bool {
        !matches!(self, Self::Progressive)
    }
}

/// Geometry, timing and source layout of one captured stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamDescription {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub interlacing: Interlacing,
    pub source: SourceFormat,
    pub tile_count: u32,
}

impl StreamDescription {
    pub fn new(width: u32, height: u32, fps: f64, source: SourceFormat) -> Self {
        Self {
            width,
            height,
            fps,
            interlacing: Interlacing::Progressive,
            source,
            tile_count: 1,
        }
    }

    /// Equality that ignores the tile count
    pub fn same_stream(&self, other: &StreamDescription) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.fps == other.fps
            && self.interlacing == other.interlacing
            && self.source == other.source
    }
}

/// A captured frame as delivered by the source
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub desc: StreamDescription,
    pub data: Vec<u8>,
}

/// A frame in a backend pixel format, ready for submission
#[derive(Debug, Clone, PartialEq)]
pub struct NativeFrame {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub pts: i64,
}

/// One compressed unit returned by a backend
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub data: Vec<u8>,
    pub pts: i64,
    pub keyframe: bool,
}

/// Output of one encode iteration
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedFrame {
    pub codec: Codec,
    pub fourcc: [u8; 4],
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub data: Vec<u8>,
    pub metadata_embedded: bool,
}
