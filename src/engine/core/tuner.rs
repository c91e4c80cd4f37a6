//! Populates an encoder context from the request, the stream and the encoder family.
//!
//! Order matters: generic fields first, then rate control, codec/family tuning,
//! threading, slices, preset, the user's passthrough options and finally colour
//! defaults. Tuned options that the backend rejects only warn; a rejected user
//! option is an error.

use std::collections::BTreeSet;
use std::fmt;

use super::error::{EngineError, EngineResult};
use super::family::{self, EncoderFamily};
use super::registry::{ParamSetter, PresetChoice, registry};
use super::request::{CompressionRequest, ThreadSpec};
use super::settings::{ColorRange, ColorSpace, EncoderSettings, EngineParams, RateControl, ThreadType};
use super::types::{Codec, PixelFormat, StreamDescription};
use crate::engine::backend::{Capabilities, EncoderInfo, EncoderSession};

/// CRF used for x264/x265 when no rate hint is given
pub const DEFAULT_CRF: f64 = 22.0;
pub const DEFAULT_CQP: i32 = 21;
pub const DEFAULT_CQP_MJPEG_QSV: i32 = 80;
/// QSV `global_quality` scale differs from QP
pub const DEFAULT_CQP_QSV: i32 = 5000;
/// Bitrate tolerance expressed in frames
const BITRATE_TOLERANCE_FRAMES: f64 = 6.0;

/// Everything fixed for one configuration attempt
#[derive(Debug, Clone, Copy)]
pub struct TuneInput<'a> {
    pub info: &'a EncoderInfo,
    pub family: EncoderFamily,
    pub desc: &'a StreamDescription,
    pub request: &'a CompressionRequest,
    pub engine: &'a EngineParams,
}

/// Mutable state threaded through the tuning steps
pub struct TuneContext<'a> {
    pub session: &'a mut dyn EncoderSession,
    pub settings: EncoderSettings,
    pub info: &'a EncoderInfo,
    pub family: EncoderFamily,
    pub desc: &'a StreamDescription,
    pub request: &'a CompressionRequest,
    pub engine: &'a EngineParams,
    /// Passthrough keys consumed by family tuning
    pub handled: BTreeSet<String>,
    pub thread_mode: ThreadSpec,
    /// The user supplied `preset` explicitly
    pub have_preset: bool,
}

impl<'a> TuneContext<'a> {
    /// Set a private option; failure is logged and reported as `false`
    pub fn set_opt(&mut self, key: &str, value: impl fmt::Display) -> bool {
        let value = value.to_string();
        match self.session.set_option(key, &value) {
            Ok(()) => {
                tracing::debug!("Set {} to {}", key, value);
                self.settings.record_option(key, &value);
                true
            }
            Err(e) => {
                tracing::warn!("Unable to set {} to {} ({})", key, value, e);
                false
            }
        }
    }

    /// Take a user passthrough option so the final passthrough pass skips it
    pub fn take_user_option(&mut self, key: &str) -> Option<&'a str> {
        let request: &'a CompressionRequest = self.request;
        let value = request.options.get(key).map(String::as_str)?;
        self.handled.insert(key.to_string());
        Some(value)
    }
}

/// Quality mode for an encoder; CQP, CRF and bitrate are mutually exclusive
pub fn resolve_rate_control(
    info: &EncoderInfo,
    family: EncoderFamily,
    request: &CompressionRequest,
    desc: &StreamDescription,
) -> RateControl {
    let jpeg_like = info.name.contains("mjpeg");
    if let Some(cqp) = request.cqp {
        return RateControl::ConstantQp(cqp);
    }
    if (family == EncoderFamily::Vaapi || jpeg_like) && request.lacks_rate_hint() {
        return RateControl::ConstantQp(default_cqp(&info.name));
    }
    if let Some(crf) = request.crf {
        return RateControl::ConstantRateFactor(crf);
    }
    if info.name.starts_with("libx26") && request.bitrate.is_none() && request.bpp.is_none() {
        return RateControl::ConstantRateFactor(DEFAULT_CRF);
    }
    RateControl::Bitrate(
        request
            .bitrate
            .unwrap_or_else(|| target_bitrate(info.codec, request.bpp, desc)),
    )
}

pub fn default_cqp(encoder: &str) -> i32 {
    if encoder == "mjpeg_qsv" {
        DEFAULT_CQP_MJPEG_QSV
    } else if encoder.ends_with("_qsv") {
        DEFAULT_CQP_QSV
    } else {
        DEFAULT_CQP
    }
}

/// width * height * bpp * fps, with the codec's default bpp when none is given
pub fn target_bitrate(codec: Codec, bpp: Option<f64>, desc: &StreamDescription) -> u64 {
    let bpp = bpp.unwrap_or(registry().profile(codec).default_bpp);
    (desc.width as f64 * desc.height as f64 * bpp * desc.fps) as u64
}

/// Build and apply the full context for one candidate pixel format
pub fn configure(
    session: &mut dyn EncoderSession,
    input: TuneInput<'_>,
    pix_fmt: PixelFormat,
) -> EngineResult<EncoderSettings> {
    let TuneInput {
        info,
        family,
        desc,
        request,
        engine,
    } = input;
    let mut settings = EncoderSettings::new(&info.name, info.codec, desc, pix_fmt);
    settings.gop_size = request.gop;

    let mut ctx = TuneContext {
        session,
        settings,
        info,
        family,
        desc,
        request,
        engine,
        handled: BTreeSet::new(),
        thread_mode: request.threads,
        have_preset: request.options.contains_key("preset"),
    };

    apply_rate_control(&mut ctx, resolve_rate_control(info, family, request, desc));

    let profile = registry().profile(info.codec);
    match profile.setter {
        ParamSetter::H26xAv1 => family::tune_h26x_av1(&mut ctx)?,
        ParamSetter::Jpeg => family::tune_jpeg(&mut ctx),
        ParamSetter::Vpx => family::tune_vpx(&mut ctx),
        ParamSetter::Default => family::tune_default(&mut ctx),
    }

    let thread_mode = ctx.thread_mode;
    apply_thread_mode(&mut ctx.settings, &info.capabilities, &info.name, thread_mode);
    ctx.settings.slices = request
        .slices
        .unwrap_or(if info.codec == Codec::Ffv1 { 16 } else { 32 });

    if !ctx.have_preset {
        if let Some(resolve) = profile.preset {
            match resolve(&info.name, desc.width, desc.height, desc.fps) {
                Some(PresetChoice::Named(preset)) => {
                    if ctx.set_opt("preset", preset) {
                        tracing::info!("Setting preset to {}", preset);
                    }
                }
                Some(PresetChoice::Deferred) => {}
                None => tracing::warn!("Unable to find suitable preset for encoder {}", info.name),
            }
        }
    }

    apply_passthrough(&mut ctx)?;
    apply_colour_defaults(&mut ctx.settings, pix_fmt);
    Ok(ctx.settings)
}

fn apply_rate_control(ctx: &mut TuneContext, rc: RateControl) {
    match rc {
        RateControl::ConstantQp(cqp) => {
            ctx.settings.qscale = true;
            if ctx.info.name == "mjpeg" {
                ctx.settings.qmin = Some(cqp);
                ctx.settings.qmax = Some(cqp);
                tracing::info!("Setting mjpeg qmin/qmax to {}", cqp);
            } else if ctx.info.name.contains("_qsv") {
                ctx.settings.global_quality = Some(cqp);
                tracing::info!("Setting QSV global_quality to {}", cqp);
            } else if ctx.set_opt("qp", cqp) {
                tracing::info!("Setting CQP to {}", cqp);
            }
        }
        RateControl::ConstantRateFactor(crf) => {
            if ctx.set_opt("crf", crf) {
                tracing::info!("Setting CRF to {:.2}", crf);
            }
        }
        RateControl::Bitrate(rate) => {
            let fps = ctx.desc.fps;
            ctx.settings.bit_rate = Some(rate);
            ctx.settings.bit_rate_tolerance =
                Some((rate as f64 / fps * BITRATE_TOLERANCE_FRAMES) as u64);
            tracing::info!("Setting bitrate to {} bps", super::request::format_si(rate));
        }
    }
    ctx.settings.rate_control = Some(rc);
}

fn hardware_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Resolve thread type and count against the encoder's capabilities
pub fn apply_thread_mode(
    settings: &mut EncoderSettings,
    caps: &Capabilities,
    encoder: &str,
    spec: ThreadSpec,
) {
    let (count, mut requested, none) = match spec {
        ThreadSpec::Off => {
            settings.thread_type = ThreadType::NONE;
            settings.thread_count = Some(1);
            return;
        }
        ThreadSpec::Auto => (None, ThreadType::NONE, false),
        ThreadSpec::Custom {
            count,
            frame,
            slice,
            none,
        } => (count, ThreadType { frame, slice }, none),
    };

    if none {
        requested = ThreadType::NONE;
    } else if requested.is_none() {
        if caps.slice_threads {
            requested.slice = true;
        } else if !caps.other_threads && caps.frame_threads {
            tracing::warn!(
                "Slice-based or external multithreading not available, encoding won't be parallel. You may select frame-based parallelism if needed."
            );
        }
    }

    if (requested.slice && !caps.slice_threads) || (requested.frame && !caps.frame_threads) {
        tracing::error!("Encoder {} doesn't support the specified thread mode", encoder);
    } else {
        settings.thread_type = requested;
    }

    settings.thread_count = match count {
        Some(n) => Some(n),
        None if caps.other_threads => encoder.starts_with("libvpx").then_some(0),
        None if !settings.thread_type.is_none() => Some(hardware_threads()),
        None => None,
    };
}

fn apply_passthrough(ctx: &mut TuneContext) -> EngineResult<()> {
    let request = ctx.request;
    for (key, value) in &request.options {
        if ctx.handled.contains(key) {
            continue;
        }
        ctx.session
            .set_option(key, value)
            .map_err(|reason| {
                tracing::error!("Unable to set {} to {}: {}", key, value, reason);
                EngineError::InvalidBackendOption {
                    key: key.clone(),
                    value: value.clone(),
                    reason,
                }
            })?;
        tracing::info!("Successfully set {} to {}", key, value);
        ctx.settings.record_option(key, value);
    }
    Ok(())
}

/// RGB formats are full range with an RGB matrix; everything else BT.709 limited
pub fn apply_colour_defaults(settings: &mut EncoderSettings, pix_fmt: PixelFormat) {
    if pix_fmt.is_rgb() {
        settings.colorspace = ColorSpace::Rgb;
        settings.color_range = ColorRange::Full;
    } else {
        settings.colorspace = ColorSpace::Bt709;
        settings.color_range = ColorRange::Limited;
    }
}
