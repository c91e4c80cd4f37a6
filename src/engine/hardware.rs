//! Encoder discovery: a builtin table of well-known FFmpeg encoders, probing of the local
//! `ffmpeg` binary, and GPU/render node detection.

use anyhow::{Context, Result};
use std::process::Command;
use std::sync::OnceLock;

use crate::engine::backend::{Capabilities, EncoderInfo};
use crate::engine::core::{Codec, PixelFormat};

// ============================================================================
// Builtin encoder table
// ============================================================================

struct KnownEncoder {
    name: &'static str,
    codec: Codec,
    description: &'static str,
    formats: &'static [PixelFormat],
    caps: Capabilities,
}

const fn caps(slice: bool, frame: bool, other: bool, hardware: bool) -> Capabilities {
    Capabilities {
        slice_threads: slice,
        frame_threads: frame,
        other_threads: other,
        experimental: false,
        hardware,
    }
}

const SOFTWARE_OTHER: Capabilities = caps(false, false, true, false);
const SOFTWARE_FRAME: Capabilities = caps(false, true, false, false);
const SOFTWARE_FRAME_SLICE: Capabilities = caps(true, true, false, false);
const HARDWARE: Capabilities = caps(false, false, false, true);

use PixelFormat::*;

const NVENC_FORMATS: &[PixelFormat] = &[
    Yuv420p, Nv12, P010, Yuv444p, Yuv444p16, Bgr0, X2rgb10, Gbrp, Gbrp16, Cuda,
];

/// Registration order matters: the first non-experimental entry is a codec's default
const KNOWN_ENCODERS: &[KnownEncoder] = &[
    KnownEncoder {
        name: "libx264",
        codec: Codec::H264,
        description: "libx264 H.264 / AVC / MPEG-4 AVC / MPEG-4 part 10",
        formats: &[
            Yuv420p, Yuvj420p, Yuv422p, Yuvj422p, Yuv444p, Yuvj444p, Nv12, Yuv420p10, Yuv422p10,
            Yuv444p10,
        ],
        caps: SOFTWARE_OTHER,
    },
    KnownEncoder {
        name: "libx264rgb",
        codec: Codec::H264,
        description: "libx264 H.264 / AVC / MPEG-4 AVC / MPEG-4 part 10 RGB",
        formats: &[Bgr0, Rgb24],
        caps: SOFTWARE_OTHER,
    },
    KnownEncoder {
        name: "h264_amf",
        codec: Codec::H264,
        description: "AMD AMF H.264 Encoder",
        formats: &[Nv12, Yuv420p],
        caps: HARDWARE,
    },
    KnownEncoder {
        name: "h264_nvenc",
        codec: Codec::H264,
        description: "NVIDIA NVENC H.264 encoder",
        formats: NVENC_FORMATS,
        caps: HARDWARE,
    },
    KnownEncoder {
        name: "h264_qsv",
        codec: Codec::H264,
        description: "H264 (Intel Quick Sync Video acceleration)",
        formats: &[Nv12, P010, Qsv],
        caps: HARDWARE,
    },
    KnownEncoder {
        name: "h264_vaapi",
        codec: Codec::H264,
        description: "H.264/AVC (VAAPI)",
        formats: &[Vaapi],
        caps: HARDWARE,
    },
    KnownEncoder {
        name: "libx265",
        codec: Codec::H265,
        description: "libx265 H.265 / HEVC",
        formats: &[
            Yuv420p, Yuvj420p, Yuv422p, Yuvj422p, Yuv444p, Yuvj444p, Gbrp, Yuv420p10, Yuv422p10,
            Yuv444p10, Gbrp10, Yuv420p12, Yuv422p12, Yuv444p12, Gbrp12,
        ],
        caps: SOFTWARE_OTHER,
    },
    KnownEncoder {
        name: "hevc_amf",
        codec: Codec::H265,
        description: "AMD AMF HEVC encoder",
        formats: &[Nv12, Yuv420p, P010],
        caps: HARDWARE,
    },
    KnownEncoder {
        name: "hevc_nvenc",
        codec: Codec::H265,
        description: "NVIDIA NVENC hevc encoder",
        formats: NVENC_FORMATS,
        caps: HARDWARE,
    },
    KnownEncoder {
        name: "hevc_qsv",
        codec: Codec::H265,
        description: "HEVC (Intel Quick Sync Video acceleration)",
        formats: &[Nv12, P010, Yuyv422, Y210, Qsv],
        caps: HARDWARE,
    },
    KnownEncoder {
        name: "hevc_vaapi",
        codec: Codec::H265,
        description: "H.265/HEVC (VAAPI)",
        formats: &[Vaapi],
        caps: HARDWARE,
    },
    KnownEncoder {
        name: "libsvt_hevc",
        codec: Codec::H265,
        description: "SVT-HEVC(Scalable Video Technology for HEVC) encoder",
        formats: &[Yuv420p, Yuv420p10],
        caps: SOFTWARE_OTHER,
    },
    KnownEncoder {
        name: "mjpeg",
        codec: Codec::Mjpg,
        description: "MJPEG (Motion JPEG)",
        formats: &[Yuvj420p, Yuvj422p, Yuvj444p, Yuv420p, Yuv422p, Yuv444p],
        caps: SOFTWARE_FRAME_SLICE,
    },
    KnownEncoder {
        name: "mjpeg_qsv",
        codec: Codec::Mjpg,
        description: "MJPEG (Intel Quick Sync Video acceleration)",
        formats: &[Nv12, Qsv],
        caps: HARDWARE,
    },
    KnownEncoder {
        name: "mjpeg_vaapi",
        codec: Codec::Mjpg,
        description: "MJPEG (VAAPI)",
        formats: &[Vaapi],
        caps: HARDWARE,
    },
    KnownEncoder {
        name: "jpeg2000",
        codec: Codec::J2k,
        description: "JPEG 2000",
        formats: &[Rgb24, Yuv444p, Gbrp, Yuv420p, Yuv422p, Yuv444p16, Gbrp16],
        caps: SOFTWARE_FRAME,
    },
    KnownEncoder {
        name: "libvpx",
        codec: Codec::Vp8,
        description: "libvpx VP8",
        formats: &[Yuv420p],
        caps: SOFTWARE_OTHER,
    },
    KnownEncoder {
        name: "vp8_vaapi",
        codec: Codec::Vp8,
        description: "VP8 (VAAPI)",
        formats: &[Vaapi],
        caps: HARDWARE,
    },
    KnownEncoder {
        name: "libvpx-vp9",
        codec: Codec::Vp9,
        description: "libvpx VP9",
        formats: &[
            Yuv420p, Yuv422p, Yuv444p, Yuv420p10, Yuv422p10, Yuv444p10, Gbrp, Gbrp10,
        ],
        caps: SOFTWARE_OTHER,
    },
    KnownEncoder {
        name: "vp9_vaapi",
        codec: Codec::Vp9,
        description: "VP9 (VAAPI)",
        formats: &[Vaapi],
        caps: HARDWARE,
    },
    KnownEncoder {
        name: "huffyuv",
        codec: Codec::Hfyu,
        description: "Huffyuv / HuffYUV",
        formats: &[Yuv422p, Rgb24],
        caps: SOFTWARE_FRAME,
    },
    KnownEncoder {
        name: "ffv1",
        codec: Codec::Ffv1,
        description: "FFmpeg video codec #1",
        formats: &[
            Yuv420p, Yuv422p, Yuv444p, Yuv420p10, Yuv422p10, Yuv444p10, Yuv444p12, Yuv444p16,
            Gbrp, Gbrp10, Gbrp12, Gbrp16,
        ],
        caps: SOFTWARE_FRAME_SLICE,
    },
    KnownEncoder {
        name: "libaom-av1",
        codec: Codec::Av1,
        description: "libaom AV1",
        formats: &[Yuv420p, Yuv422p, Yuv444p, Gbrp, Yuv420p10, Yuv422p10, Yuv444p10, Gbrp10],
        caps: SOFTWARE_OTHER,
    },
    KnownEncoder {
        name: "libsvtav1",
        codec: Codec::Av1,
        description: "SVT-AV1(Scalable Video Technology for AV1) encoder",
        formats: &[Yuv420p, Yuv420p10],
        caps: SOFTWARE_OTHER,
    },
    KnownEncoder {
        name: "av1_nvenc",
        codec: Codec::Av1,
        description: "NVIDIA NVENC av1 encoder",
        formats: &[Yuv420p, Nv12, P010, Cuda],
        caps: HARDWARE,
    },
    KnownEncoder {
        name: "av1_qsv",
        codec: Codec::Av1,
        description: "AV1 (Intel Quick Sync Video acceleration)",
        formats: &[Nv12, P010, Qsv],
        caps: HARDWARE,
    },
    KnownEncoder {
        name: "av1_amf",
        codec: Codec::Av1,
        description: "AMD AMF AV1 encoder",
        formats: &[Nv12, Yuv420p, P010],
        caps: HARDWARE,
    },
    KnownEncoder {
        name: "av1_vaapi",
        codec: Codec::Av1,
        description: "AV1 (VAAPI)",
        formats: &[Vaapi],
        caps: HARDWARE,
    },
    KnownEncoder {
        name: "prores",
        codec: Codec::Prores,
        description: "Apple ProRes",
        formats: &[Yuv422p10, Yuv444p10],
        caps: SOFTWARE_FRAME,
    },
    KnownEncoder {
        name: "prores_ks",
        codec: Codec::Prores,
        description: "Apple ProRes (iCodec Pro)",
        formats: &[Yuv422p10, Yuv444p10],
        caps: SOFTWARE_FRAME_SLICE,
    },
];

/// Encoders of a typical full FFmpeg build
pub fn builtin_encoders() -> Vec<EncoderInfo> {
    KNOWN_ENCODERS
        .iter()
        .map(|k| EncoderInfo {
            name: k.name.to_string(),
            codec: k.codec,
            description: k.description.to_string(),
            pixel_formats: k.formats.to_vec(),
            capabilities: k.caps,
        })
        .collect()
}

// ============================================================================
// FFmpeg probing
// ============================================================================

/// Check if ffmpeg is available and return its version
pub fn ffmpeg_version() -> Result<String> {
    let output = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .context("Failed to execute ffmpeg. Is ffmpeg installed and in PATH?")?;

    if !output.status.success() {
        anyhow::bail!("ffmpeg command failed with status: {}", output.status);
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    let first_line = version_output.lines().next().unwrap_or("Unknown version");

    Ok(first_line.to_string())
}

/// Cache for the output of `ffmpeg -encoders`.
static FFMPEG_ENCODERS_OUTPUT_CACHE: OnceLock<String> = OnceLock::new();

fn ffmpeg_encoders_output() -> &'static str {
    FFMPEG_ENCODERS_OUTPUT_CACHE.get_or_init(|| {
        Command::new("ffmpeg")
            .args(["-hide_banner", "-encoders"])
            .output()
            .ok()
            .map(|o| String::from_utf8_lossy(&o.stdout).to_string())
            .unwrap_or_default()
    })
}

fn ffmpeg_encoder_help(name: &str) -> String {
    Command::new("ffmpeg")
        .args(["-hide_banner", "-h", &format!("encoder={}", name)])
        .output()
        .ok()
        .map(|o| String::from_utf8_lossy(&o.stdout).to_string())
        .unwrap_or_default()
}

/// One video line of `ffmpeg -encoders`
#[derive(Debug, Clone, PartialEq)]
pub struct ListedEncoder {
    pub name: String,
    pub codec: Codec,
    pub description: String,
    pub capabilities: Capabilities,
}

/// Parse `ffmpeg -encoders`, keeping video encoders of known codecs
pub fn parse_encoders_list(output: &str) -> Vec<ListedEncoder> {
    output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(parse_encoder_line)
        .collect()
}

fn parse_encoder_line(line: &str) -> Option<ListedEncoder> {
    let line = line.trim_start();
    let (flags, rest) = line.split_once(char::is_whitespace)?;
    let flags: Vec<char> = flags.chars().collect();
    if flags.len() != 6 || flags[0] != 'V' {
        return None;
    }
    let rest = rest.trim_start();
    let (name, description) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let description = description.trim();

    // "(codec h264)" names the codec when it differs from the encoder name
    let codec_id = description
        .rsplit_once("(codec ")
        .and_then(|(_, id)| id.strip_suffix(')'))
        .unwrap_or(name);
    let codec = Codec::from_ffmpeg_id(codec_id)?;

    let description = match description.rsplit_once(" (codec ") {
        Some((d, _)) => d,
        None => description,
    };

    Some(ListedEncoder {
        name: name.to_string(),
        codec,
        description: description.to_string(),
        capabilities: Capabilities {
            frame_threads: flags[1] == 'F',
            slice_threads: flags[2] == 'S',
            experimental: flags[3] == 'X',
            ..Default::default()
        },
    })
}

/// Details from `ffmpeg -h encoder=<name>`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncoderHelp {
    pub pixel_formats: Vec<PixelFormat>,
    pub other_threads: bool,
    pub hardware: bool,
}

pub fn parse_encoder_help(output: &str) -> EncoderHelp {
    let mut help = EncoderHelp::default();
    for line in output.lines().map(str::trim) {
        if let Some(formats) = line.strip_prefix("Supported pixel formats:") {
            help.pixel_formats = formats
                .split_whitespace()
                .filter_map(PixelFormat::from_name)
                .collect();
        } else if let Some(threading) = line.strip_prefix("Threading capabilities:") {
            help.other_threads = threading.trim() == "other";
        } else if let Some(general) = line.strip_prefix("General capabilities:") {
            help.hardware = general.split_whitespace().any(|c| c == "hardware");
        }
    }
    help
}

static FFMPEG_CATALOG_CACHE: OnceLock<Vec<EncoderInfo>> = OnceLock::new();

/// Encoders of the local `ffmpeg` build (cached). Encoders whose pixel formats can't be
/// determined are skipped.
pub fn probe_ffmpeg_encoders() -> &'static [EncoderInfo] {
    FFMPEG_CATALOG_CACHE.get_or_init(|| {
        parse_encoders_list(ffmpeg_encoders_output())
            .into_iter()
            .filter_map(|listed| {
                let help = parse_encoder_help(&ffmpeg_encoder_help(&listed.name));
                if help.pixel_formats.is_empty() {
                    tracing::debug!("Skipping {}: no usable pixel formats", listed.name);
                    return None;
                }
                Some(EncoderInfo {
                    name: listed.name,
                    codec: listed.codec,
                    description: listed.description,
                    pixel_formats: help.pixel_formats,
                    capabilities: Capabilities {
                        other_threads: help.other_threads,
                        hardware: help.hardware,
                        ..listed.capabilities
                    },
                })
            })
            .collect()
    })
}

// ============================================================================
// GPU detection
// ============================================================================

/// Detected GPU vendor for hardware encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuVendor {
    #[default]
    Unknown,
    Intel,
    Nvidia,
    Amd,
}

impl GpuVendor {
    /// Encoder families this vendor's hardware typically provides
    pub fn encoder_suffixes(&self) -> &'static [&'static str] {
        match self {
            Self::Intel => &["_qsv", "_vaapi"],
            Self::Nvidia => &["_nvenc"],
            Self::Amd => &["_amf", "_vaapi"],
            Self::Unknown => &[],
        }
    }

    /// Whether this GPU can drive the encoder. Software encoders always pass, and an
    /// undetected vendor filters nothing.
    pub fn can_run(&self, encoder: &EncoderInfo) -> bool {
        if !encoder.capabilities.hardware || *self == Self::Unknown {
            return true;
        }
        self.encoder_suffixes()
            .iter()
            .any(|suffix| encoder.name.ends_with(suffix))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Intel => "Intel",
            Self::Nvidia => "NVIDIA",
            Self::Amd => "AMD",
            Self::Unknown => "unknown",
        }
    }
}

/// Detect NVIDIA GPU using nvidia-smi
pub fn detect_nvidia_gpu() -> Option<String> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=name", "--format=csv,noheader"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let name = stdout.lines().next()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Vendor of a `lspci` display controller line
pub fn vendor_from_lspci_line(line: &str) -> Option<GpuVendor> {
    let lower = line.to_lowercase();
    if !(lower.contains("vga") || lower.contains("display") || lower.contains("3d")) {
        return None;
    }
    if lower.contains("intel") {
        Some(GpuVendor::Intel)
    } else if lower.contains("amd") || lower.contains("radeon") || lower.contains("advanced micro devices") {
        Some(GpuVendor::Amd)
    } else if lower.contains("nvidia") {
        Some(GpuVendor::Nvidia)
    } else {
        None
    }
}

/// Detect the primary GPU vendor and model
pub fn detect_gpu() -> (GpuVendor, Option<String>) {
    // nvidia-smi gives a cleaner model name than lspci
    if let Some(model) = detect_nvidia_gpu() {
        return (GpuVendor::Nvidia, Some(model));
    }

    let Ok(output) = Command::new("lspci").output() else {
        return (GpuVendor::Unknown, None);
    };
    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if let Some(vendor) = vendor_from_lspci_line(line) {
            let model = line.split(':').next_back().map(|m| m.trim().to_string());
            return (vendor, model);
        }
    }
    (GpuVendor::Unknown, None)
}

/// First DRM render node, used as the VA-API device
pub fn detect_render_device() -> Option<String> {
    use std::path::Path;
    let dri_path = Path::new("/dev/dri");

    if !dri_path.exists() {
        return None;
    }

    let mut devices: Vec<_> = std::fs::read_dir(dri_path)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.starts_with("renderD"))
                .unwrap_or(false)
        })
        .map(|e| e.path())
        .collect();

    // Sort to get renderD128 before renderD129, etc.
    devices.sort();

    devices.first().map(|p| p.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENCODERS: &str = "Encoders:
 V..... = Video
 A..... = Audio
 S..... = Subtitle
 .F.... = Frame-level multithreading
 ..S... = Slice-level multithreading
 ...X.. = Codec is experimental
 ....B. = Supports draw_horiz_band
 .....D = Supports direct rendering method 1
 ------
 V....D a64multi             Multicolor charset for Commodore 64 (codec a64_multicolor)
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC / MPEG-4 part 10 (codec h264)
 V....D h264_nvenc           NVIDIA NVENC H.264 encoder (codec h264)
 VFS... mjpeg                MJPEG (Motion JPEG)
 VF.... prores_aw            Apple ProRes (codec prores)
 V..X.D libaom-av1           libaom AV1 (codec av1)
 A....D aac                  AAC (Advanced Audio Coding)
";

    #[test]
    fn test_parse_encoders_list() {
        let list = parse_encoders_list(ENCODERS);
        let names: Vec<_> = list.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["libx264", "h264_nvenc", "mjpeg", "prores_aw", "libaom-av1"]);

        let mjpeg = &list[2];
        assert_eq!(mjpeg.codec, Codec::Mjpg);
        assert!(mjpeg.capabilities.frame_threads && mjpeg.capabilities.slice_threads);
        assert_eq!(list[0].description, "libx264 H.264 / AVC / MPEG-4 AVC / MPEG-4 part 10");
        assert!(list[4].capabilities.experimental);
    }

    #[test]
    fn test_parse_encoder_help() {
        let help = parse_encoder_help(
            "Encoder h264_vaapi [H.264/AVC (VAAPI)]:
    General capabilities: dr1 delay hardware
    Threading capabilities: none
    Supported hardware devices: vaapi
    Supported pixel formats: vaapi
h264_vaapi AVOptions:
",
        );
        assert_eq!(help.pixel_formats, vec![PixelFormat::Vaapi]);
        assert!(help.hardware);
        assert!(!help.other_threads);

        let help = parse_encoder_help(
            "    Threading capabilities: other
    Supported pixel formats: yuv420p yuvj420p bogus yuv444p10le",
        );
        assert!(help.other_threads);
        assert_eq!(
            help.pixel_formats,
            vec![PixelFormat::Yuv420p, PixelFormat::Yuvj420p, PixelFormat::Yuv444p10]
        );
    }

    #[test]
    fn test_builtin_table() {
        let encoders = builtin_encoders();
        for codec in Codec::ALL {
            assert!(
                encoders.iter().any(|e| e.codec == codec),
                "no builtin encoder for {}",
                codec
            );
        }
        let nvenc = encoders.iter().find(|e| e.name == "hevc_nvenc").unwrap();
        assert!(nvenc.capabilities.hardware);
        assert!(nvenc.pixel_formats.contains(&PixelFormat::X2rgb10));
    }

    #[test]
    fn test_lspci_vendor() {
        assert_eq!(
            vendor_from_lspci_line("00:02.0 VGA compatible controller: Intel Corporation Alder Lake-P GT2"),
            Some(GpuVendor::Intel)
        );
        assert_eq!(
            vendor_from_lspci_line("03:00.0 Display controller: Advanced Micro Devices, Inc. [AMD/ATI] Navi"),
            Some(GpuVendor::Amd)
        );
        assert_eq!(vendor_from_lspci_line("00:1f.3 Audio device: Intel Corporation"), None);
    }

    #[test]
    fn test_vendor_filters_hardware_encoders() {
        let encoders = builtin_encoders();
        let usable = |vendor: GpuVendor| -> Vec<String> {
            encoders
                .iter()
                .filter(|e| e.codec == Codec::H264 && vendor.can_run(e))
                .map(|e| e.name.clone())
                .collect()
        };
        assert_eq!(usable(GpuVendor::Nvidia), vec!["libx264", "libx264rgb", "h264_nvenc"]);
        assert_eq!(
            usable(GpuVendor::Intel),
            vec!["libx264", "libx264rgb", "h264_qsv", "h264_vaapi"]
        );
        assert_eq!(usable(GpuVendor::Unknown).len(), 6);
    }
}
