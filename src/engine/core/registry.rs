//! Static per-codec capability table: default quality target, preferred encoder,
//! preset resolver, parameter setter and listing priority.

use std::sync::OnceLock;

use super::types::Codec;

/// Codec used when the request does not name one
pub const DEFAULT_CODEC: Codec = Codec::Mjpg;

/// Resolves the preferred encoder by source colour model (`true` = RGB source)
pub type PreferredEncoder = fn(bool) -> &'static str;

/// Resolves a preset from encoder name, width, height and fps
pub type PresetResolver = fn(&str, u32, u32, f64) -> Option<PresetChoice>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetChoice {
    Named(&'static str),
    /// The encoder family picks its own preset (NVENC) or has none (AMF, VA-API)
    Deferred,
}

/// Codec-level parameter setter; H.264/HEVC/AV1 dispatch further by encoder family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSetter {
    H26xAv1,
    Jpeg,
    Vpx,
    Default,
}

#[derive(Debug, Clone, Copy)]
pub struct CodecProfile {
    pub codec: Codec,
    /// Compressed bits per pixel used to derive a bitrate
    pub default_bpp: f64,
    pub preferred_encoder: Option<PreferredEncoder>,
    pub preset: Option<PresetResolver>,
    pub setter: ParamSetter,
    /// Lower sorts first when listing codecs
    pub priority: u32,
}

pub struct Registry {
    profiles: [CodecProfile; Codec::ALL.len()],
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// The process-wide registry, built on first use
pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::build)
}

impl Registry {
    fn build() -> Self {
        Self {
            profiles: Codec::ALL.map(profile_for),
        }
    }

    pub fn profile(&self, codec: Codec) -> &CodecProfile {
        &self.profiles[codec as usize]
    }

    /// Profiles in listing order
    pub fn by_priority(&self) -> Vec<&CodecProfile> {
        let mut profiles: Vec<_> = self.profiles.iter().collect();
        profiles.sort_by_key(|p| p.priority);
        profiles
    }
}

fn profile_for(codec: Codec) -> CodecProfile {
    let (default_bpp, preferred_encoder, preset, setter, priority): (
        f64,
        Option<PreferredEncoder>,
        Option<PresetResolver>,
        ParamSetter,
        u32,
    ) = match codec {
        // 0.07 bpp for medium motion, doubled for the low-latency tune
        Codec::H264 => (
            0.07 * 2.0 * 2.0,
            Some(h264_encoder as PreferredEncoder),
            Some(h26x_preset as PresetResolver),
            ParamSetter::H26xAv1,
            100,
        ),
        Codec::H265 => (
            0.04 * 2.0 * 2.0,
            Some(h265_encoder as PreferredEncoder),
            Some(h26x_preset as PresetResolver),
            ParamSetter::H26xAv1,
            101,
        ),
        Codec::Mjpg => (1.2, None, None, ParamSetter::Jpeg, 102),
        Codec::J2k => (1.0, None, None, ParamSetter::Default, 500),
        Codec::Vp8 => (0.4, None, None, ParamSetter::Vpx, 103),
        Codec::Vp9 => (0.4, None, None, ParamSetter::Vpx, 104),
        Codec::Hfyu => (0.0, None, None, ParamSetter::Default, 501),
        Codec::Ffv1 => (0.0, None, None, ParamSetter::Default, 502),
        Codec::Av1 => (
            0.1,
            Some(av1_encoder as PreferredEncoder),
            Some(av1_preset as PresetResolver),
            ParamSetter::H26xAv1,
            600,
        ),
        Codec::Prores => (0.5, None, None, ParamSetter::Default, 300),
    };

    CodecProfile {
        codec,
        default_bpp,
        preferred_encoder,
        preset,
        setter,
        priority,
    }
}

fn h264_encoder(rgb: bool) -> &'static str {
    if rgb { "libx264rgb" } else { "libx264" }
}

fn h265_encoder(_rgb: bool) -> &'static str {
    "libx265"
}

fn av1_encoder(_rgb: bool) -> &'static str {
    "libsvtav1"
}

fn fits_1080p30(width: u32, height: u32, fps: f64) -> bool {
    width <= 1920 && height <= 1080 && fps <= 30.0
}

pub fn h26x_preset(encoder: &str, width: u32, height: u32, fps: f64) -> Option<PresetChoice> {
    match encoder {
        "libx264" | "libx264rgb" => Some(PresetChoice::Named(if fits_1080p30(width, height, fps) {
            "veryfast"
        } else {
            "ultrafast"
        })),
        "libx265" => Some(PresetChoice::Named("ultrafast")),
        // AMF uses "usage", NVENC sets its own, VA-API has none
        n if n.ends_with("_amf") || n.contains("nvenc") || n.ends_with("_vaapi") => {
            Some(PresetChoice::Deferred)
        }
        n if n.ends_with("_qsv") => Some(PresetChoice::Named("medium")),
        _ => None,
    }
}

pub fn av1_preset(encoder: &str, width: u32, height: u32, fps: f64) -> Option<PresetChoice> {
    if encoder != "libsvtav1" {
        return None;
    }
    Some(PresetChoice::Named(if fits_1080p30(width, height, fps) {
        "9"
    } else {
        "11"
    }))
}
