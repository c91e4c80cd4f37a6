//! Encoder families and their vendor-specific tuning.
//!
//! The family is resolved once from the encoder name when the encoder is selected and
//! carried with the context; tuning dispatches on the enum rather than on names.

use serde::Serialize;
use std::fmt;

use super::error::{EngineError, EngineResult};
use super::tuner::TuneContext;
use super::types::{Codec, Interlacing};
use crate::engine::backend::BackendError;

/// Rate-control buffer multiplier for x264/x265
pub const DEFAULT_X26X_RC_BUF_SIZE_FACTOR: f64 = 2.5;

pub const DEFAULT_AMF_USAGE: &str = "lowlatency";
pub const DEFAULT_NVENC_PRESET: &str = "p4";
pub const DEFAULT_NVENC_RC: &str = "cbr";
pub const DEFAULT_NVENC_TUNE: &str = "ull";
/// Used when the NVENC headers predate the `tune` option
pub const FALLBACK_NVENC_PRESET: &str = "llhq";
pub const DEFAULT_QSV_RC: &str = "vbr";
pub const DEFAULT_QSV_QUALITY: i32 = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EncoderFamily {
    /// `*_amf`
    Amf,
    /// `*_vaapi`
    Vaapi,
    /// `libx264`, `libx264rgb`, `libx265`
    X26x,
    /// `*nvenc*`
    Nvenc,
    /// `h264_qsv`, `hevc_qsv`
    Qsv,
    /// `libsvt*`
    Svt,
    /// `libvpx*`
    Libvpx,
    /// native `mjpeg`
    Mjpeg,
    MjpegQsv,
    Generic,
}

impl EncoderFamily {
    /// Classify an encoder by name. Patterns are tried in a fixed order, so a name
    /// matching several (e.g. a hypothetical `nvenc_vaapi`) takes the first.
    pub fn from_encoder_name(name: &str) -> Self {
        if name.ends_with("_amf") {
            Self::Amf
        } else if name.ends_with("_vaapi") {
            Self::Vaapi
        } else if name.starts_with("libx264") || name == "libx265" {
            Self::X26x
        } else if name.contains("nvenc") {
            Self::Nvenc
        } else if name == "h264_qsv" || name == "hevc_qsv" {
            Self::Qsv
        } else if name.starts_with("libsvt") {
            Self::Svt
        } else if name.starts_with("libvpx") {
            Self::Libvpx
        } else if name == "mjpeg" {
            Self::Mjpeg
        } else if name == "mjpeg_qsv" {
            Self::MjpegQsv
        } else {
            Self::Generic
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Amf => "AMD AMF",
            Self::Vaapi => "VA-API",
            Self::X26x => "x264/x265",
            Self::Nvenc => "NVIDIA NVENC",
            Self::Qsv => "Intel Quick Sync",
            Self::Svt => "SVT",
            Self::Libvpx => "libvpx",
            Self::Mjpeg => "FFmpeg MJPEG",
            Self::MjpegQsv => "Intel Quick Sync MJPEG",
            Self::Generic => "generic",
        }
    }

    /// Short description of what tuning does for this family
    pub fn notes(&self) -> &'static [&'static str] {
        match self {
            Self::Amf => &["usage=lowlatency; header_insertion_mode=gop (HEVC) or header_spacing=1 (H.264)"],
            Self::Vaapi => &[
                "threading disabled (driver does not support it)",
                "constant QP unless bitrate, bpp or crf is given",
            ],
            Self::X26x => &[
                "tune zerolatency (plus fastdecode for H.264), CRF 22 unless a rate is given",
                "periodic intra refresh unless disable_intra_refresh",
                "keyint merged into x264-params/x265-params; escape inner colons as \\:",
            ],
            Self::Nvenc => &[
                "tune ull, preset p4 (llhq with old headers), rc cbr, zerolatency, delay=0",
                "intra refresh only with intra_refresh",
            ],
            Self::Qsv => &[
                "scenario livestreaming, async_depth 1, vertical intra refresh",
                "rc - rate control mode: cbr, cqp, icq, qvbr or vbr (default vbr)",
            ],
            Self::Svt => &["forced IDR; low-latency prediction structure and tiling"],
            Self::Libvpx => &["deadline realtime, cpu-used 8, no lookahead"],
            Self::Mjpeg => &["default Huffman tables, constant QP"],
            Self::MjpegQsv => &["async_depth 1, constant QP (default 80)"],
            Self::Generic => &["no family-specific tuning"],
        }
    }
}

impl fmt::Display for EncoderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Colon-separated `key=value` list as used by `x265-params` and friends.
/// Keys already present are never appended again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamString {
    entries: Vec<(String, Option<String>)>,
}

impl ParamString {
    pub fn parse(value: &str) -> Self {
        let entries = value
            .split(':')
            .filter(|e| !e.is_empty())
            .map(|e| match e.split_once('=') {
                Some((k, v)) => (k.to_string(), Some(v.to_string())),
                None => (e.to_string(), None),
            })
            .collect();
        Self { entries }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Returns false when the key was already present
    pub fn append(&mut self, key: &str, value: impl fmt::Display) -> bool {
        if self.contains(key) {
            return false;
        }
        self.entries.push((key.to_string(), Some(value.to_string())));
        true
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for ParamString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            match value {
                Some(v) => write!(f, "{}={}", key, v)?,
                None => f.write_str(key)?,
            }
        }
        Ok(())
    }
}

// ============================================================================
// Codec-level setters
// ============================================================================

/// H.264, HEVC and AV1: per-family vendor tuning
pub fn tune_h26x_av1(ctx: &mut TuneContext) -> EngineResult<()> {
    match ctx.family {
        EncoderFamily::Amf => configure_amf(ctx),
        EncoderFamily::Vaapi => configure_vaapi(ctx),
        EncoderFamily::X26x => configure_x264_x265(ctx),
        EncoderFamily::Nvenc => configure_nvenc(ctx),
        EncoderFamily::Qsv => configure_qsv(ctx)?,
        EncoderFamily::Svt => configure_svt(ctx),
        _ => tracing::warn!(
            encoder = %ctx.info.name,
            "Unknown encoder, using default configuration values"
        ),
    }
    Ok(())
}

pub fn tune_jpeg(ctx: &mut TuneContext) {
    match ctx.family {
        EncoderFamily::Mjpeg => {
            ctx.set_opt("huffman", "default");
        }
        EncoderFamily::MjpegQsv => {
            ctx.set_opt("async_depth", 1);
        }
        _ => {}
    }
}

pub fn tune_vpx(ctx: &mut TuneContext) {
    let fps = ctx.desc.fps;
    ctx.settings.rc_buffer_size = ctx.settings.bit_rate.map(|rate| (rate as f64 / fps) as u64);
    ctx.set_opt("deadline", "realtime");
    ctx.set_opt("cpu-used", 8);
    ctx.set_opt("rc_lookahead", 0);
}

pub fn tune_default(ctx: &mut TuneContext) {
    if ctx.settings.codec == Codec::J2k {
        tracing::warn!("J2K support is experimental and may be broken");
    }
}

// ============================================================================
// Vendor families
// ============================================================================

fn interlaced_merged(ctx: &TuneContext) -> bool {
    ctx.desc.interlacing == Interlacing::InterlacedMerged
}

fn configure_amf(ctx: &mut TuneContext) {
    ctx.set_opt("usage", DEFAULT_AMF_USAGE);
    match ctx.info.name.as_str() {
        "hevc_amf" => {
            ctx.set_opt("header_insertion_mode", "gop");
        }
        "h264_amf" => {
            ctx.set_opt("header_spacing", 1);
        }
        _ => {}
    }
}

fn configure_vaapi(ctx: &mut TuneContext) {
    // the driver does not support threads
    ctx.thread_mode = super::request::ThreadSpec::Off;
}

fn configure_x264_x265(ctx: &mut TuneContext) {
    let tune = if ctx.settings.codec == Codec::H264 {
        "zerolatency,fastdecode"
    } else {
        // x265 accepts a single tune
        "zerolatency"
    };
    ctx.set_opt("tune", tune);

    // keep frame sizes as even as possible
    let factor = ctx
        .engine
        .rc_buffer_size_factor
        .unwrap_or(DEFAULT_X26X_RC_BUF_SIZE_FACTOR);
    let fps = ctx.desc.fps;
    let settings = &mut ctx.settings;
    settings.rc_max_rate = settings.bit_rate;
    settings.rc_buffer_size = settings
        .rc_max_rate
        .map(|rate| (rate as f64 / fps * factor) as u64);
    settings.qcompress = Some(if settings.codec == Codec::H265 { 0.5 } else { 0.0 });
    settings.qmin = settings.qmin.or(Some(0));
    settings.qmax = settings.qmax.or(Some(69));
    settings.max_qdiff = Some(69);

    if interlaced_merged(ctx) && !ctx.request.interlaced_dct.is_disabled() {
        ctx.settings.interlaced_dct = true;
    }

    let is_x265 = ctx.info.name == "libx265";
    let params_key = if is_x265 { "x265-params" } else { "x264-params" };
    let mut params = ParamString::parse(ctx.take_user_option(params_key).unwrap_or_default());
    params.append("keyint", ctx.settings.gop_size);

    // periodic intra refresh unless explicitly disabled
    if !ctx.request.intra_refresh.is_disabled() {
        ctx.settings.refs = Some(1);
        if is_x265 {
            params.append("intra-refresh", 1);
            params.append("constrained-intra", 1);
            params.append("no-open-gop", 1);
        } else {
            ctx.set_opt("intra-refresh", 1);
        }
    }

    ctx.set_opt(params_key, params);
}

fn configure_qsv(ctx: &mut TuneContext) -> EngineResult<()> {
    ctx.set_opt("scenario", "livestreaming");
    ctx.set_opt("async_depth", 1);

    if !ctx.request.intra_refresh.is_disabled() {
        ctx.set_opt("int_ref_type", "vertical");
        ctx.set_opt("int_ref_cycle_size", 20);
    }

    if interlaced_merged(ctx) && !ctx.request.interlaced_dct.is_disabled() {
        ctx.settings.interlaced_dct = true;
    }

    let rc = ctx.take_user_option("rc").unwrap_or(DEFAULT_QSV_RC);
    let settings = &mut ctx.settings;
    match rc.to_ascii_lowercase().as_str() {
        "help" => {
            return Err(EngineError::RateControlHelp {
                encoder: ctx.info.name.clone(),
            });
        }
        // no look-ahead and max rate == bit rate selects CBR
        "cbr" => settings.rc_max_rate = settings.bit_rate,
        "cqp" => settings.qscale = true,
        mode @ ("icq" | "qvbr") => {
            settings.global_quality = match settings.global_quality {
                Some(q) if q > 0 => Some(q),
                _ => Some(DEFAULT_QSV_QUALITY),
            };
            settings.qscale = false;
            if mode == "qvbr" {
                let Some(rate) = settings.bit_rate.filter(|r| *r > 0) else {
                    return Err(EngineError::InvalidBackendOption {
                        key: "rc".into(),
                        value: rc.into(),
                        reason: BackendError::InvalidValue,
                    });
                };
                // 115%; equal max rate would select CBR
                settings.rc_max_rate = Some(23 * rate / 20);
            }
        }
        "vbr" => {}
        _ => {
            return Err(EngineError::UnsupportedRateControl {
                encoder: ctx.info.name.clone(),
                mode: rc.into(),
            });
        }
    }
    Ok(())
}

fn configure_nvenc(ctx: &mut TuneContext) {
    let mut preset = DEFAULT_NVENC_PRESET;
    // preset names depend on whether `tune` exists
    if !ctx.set_opt("tune", DEFAULT_NVENC_TUNE) {
        tracing::warn!("Possibly old FFmpeg or built with old NVENC headers");
        preset = FALLBACK_NVENC_PRESET;
    }
    if !ctx.have_preset && ctx.set_opt("preset", preset) {
        tracing::info!("Setting NVENC preset to {}", preset);
    }

    ctx.set_opt("forced-idr", 1);
    match ctx.request.intra_refresh {
        super::request::Toggle::Enabled => {
            ctx.set_opt("intra-refresh", 1);
        }
        super::request::Toggle::Unset => {
            tracing::warn!("Intra refresh stays off for NVENC unless requested with intra_refresh")
        }
        super::request::Toggle::Disabled => {}
    }

    ctx.set_opt("rc", DEFAULT_NVENC_RC);
    ctx.set_opt("spatial_aq", 0);
    let gpu = ctx.engine.cuda_device;
    ctx.set_opt("gpu", gpu);
    ctx.set_opt("delay", 0);
    ctx.set_opt("zerolatency", 1);
    ctx.set_opt("b_ref_mode", "disabled");

    let factor = match ctx.engine.rc_buffer_size_factor {
        Some(f) => f,
        None => {
            tracing::warn!(
                "To reduce NVENC pulsation, try rc_buffer_size_factor = 0 or a small number; 0 or values above the default 1 may cause frame drops on the receiver"
            );
            1.0
        }
    };
    let fps = ctx.desc.fps;
    let settings = &mut ctx.settings;
    settings.rc_max_rate = settings.bit_rate;
    settings.rc_buffer_size = settings
        .rc_max_rate
        .map(|rate| (rate as f64 / fps * factor) as u64);

    if interlaced_merged(ctx) && ctx.request.interlaced_dct.is_enabled() {
        ctx.settings.interlaced_dct = true;
    }
}

/// Tile columns and rows for SVT-HEVC
pub fn svt_hevc_tiles(width: u32, height: u32) -> Option<(u32, u32)> {
    let cols = if width >= 1024 {
        4
    } else if width >= 512 {
        2
    } else {
        1
    };
    let rows = if height >= 256 {
        4
    } else if height >= 128 {
        2
    } else {
        1
    };
    (cols * rows > 1 && width >= 256 && height >= 64).then_some((cols, rows))
}

fn configure_svt(ctx: &mut TuneContext) {
    let is_hevc = ctx.info.name == "libsvt_hevc";
    ctx.set_opt("forced-idr", if is_hevc { 0 } else { 1 });

    if is_hevc {
        ctx.set_opt("la_depth", 0);
        ctx.set_opt("pred_struct", 0);
        if let Some((cols, rows)) = svt_hevc_tiles(ctx.desc.width, ctx.desc.height) {
            ctx.set_opt("tile_row_cnt", rows);
            ctx.set_opt("tile_col_cnt", cols);
            ctx.set_opt("tile_slice_mode", 1);
            ctx.set_opt("umv", 0);
        }
    } else if ctx.info.name == "libsvtav1" {
        let mut params =
            ParamString::parse(ctx.take_user_option("svtav1-params").unwrap_or_default());
        // pred-struct=1 is the low-delay structure
        params.append("pred-struct", 1);
        params.append("tile-columns", 2);
        params.append("tile-rows", 2);
        ctx.set_opt("svtav1-params", params);
    }
}
