//! Configuration string parsing into a typed [`CompressionRequest`].
//!
//! Grammar: colon-separated tokens, `\:` escapes a colon inside a value.
//!
//! ```text
//! codec=<name> | encoder=<name> | bitrate=<rate> | bpp=<float> | crf=<float> | cqp=<int>
//! subsampling={444|422|420} | depth=<int> | rgb | yuv | gop=<int>
//! threads=<spec>[,<conv_threads>] | slices=<int> | [disable_]intra_refresh
//! [disable_]interlaced_dct | help | <key>=<value>
//! ```

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::error::ConfigParseError;
use super::registry::{DEFAULT_CODEC, registry};
use super::types::{Codec, Subsampling};

pub const DEFAULT_GOP_SIZE: u32 = 20;

const ESCAPED_COLON: &str = "\\:";
const COLON_PLACEHOLDER: &str = "\u{7f}\u{7f}";

/// Three-state switch for features that default per encoder family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Toggle {
    #[default]
    Unset,
    Disabled,
    Enabled,
}

impl Toggle {
    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled)
    }
}

/// Requested threading: `no`, or `<count>[F][S][n]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ThreadSpec {
    /// Slice threading when available, backend thread count
    #[default]
    Auto,
    /// `threads=no`
    Off,
    Custom {
        count: Option<usize>,
        frame: bool,
        slice: bool,
        /// `n`: explicitly no thread type
        none: bool,
    },
}

impl ThreadSpec {
    pub fn parse(spec: &str) -> Result<ThreadSpec, ConfigParseError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Ok(Self::Auto);
        }
        if spec.eq_ignore_ascii_case("no") {
            return Ok(Self::Off);
        }

        let digits = spec.chars().take_while(|c| c.is_ascii_digit()).count();
        let count = if digits > 0 {
            Some(spec[..digits].parse::<usize>().map_err(|_| {
                ConfigParseError::InvalidValue {
                    key: "threads".into(),
                    value: spec.into(),
                }
            })?)
        } else {
            None
        };

        let (mut frame, mut slice, mut none) = (false, false, false);
        for c in spec[digits..].chars() {
            match c.to_ascii_uppercase() {
                'F' => frame = true,
                'S' => slice = true,
                'N' => none = true,
                _ => return Err(ConfigParseError::InvalidThreadMode(c)),
            }
        }

        Ok(Self::Custom {
            count,
            frame,
            slice,
            none,
        })
    }
}

impl fmt::Display for ThreadSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Off => f.write_str("no"),
            Self::Custom {
                count,
                frame,
                slice,
                none,
            } => {
                if let Some(n) = count {
                    write!(f, "{}", n)?;
                }
                if *frame {
                    f.write_str("F")?;
                }
                if *slice {
                    f.write_str("S")?;
                }
                if *none {
                    f.write_str("n")?;
                }
                Ok(())
            }
        }
    }
}

/// Subsampling, depth and colour model the user forces on the conversion stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConversionProps {
    pub subsampling: Option<Subsampling>,
    pub depth: Option<u8>,
    pub rgb: Option<bool>,
}

impl ConversionProps {
    pub fn is_forced(&self) -> bool {
        self.subsampling.is_some() || self.depth.is_some() || self.rgb.is_some()
    }
}

impl fmt::Display for ConversionProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(s) = self.subsampling {
            parts.push(format!("subsampling {}", s));
        }
        if let Some(d) = self.depth {
            parts.push(format!("depth {}", d));
        }
        if let Some(rgb) = self.rgb {
            parts.push(if rgb { "RGB".to_string() } else { "YUV".to_string() });
        }
        if parts.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

/// Everything the user asked for in a configuration string
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionRequest {
    /// `None` means [`DEFAULT_CODEC`]
    pub codec: Option<Codec>,
    pub encoder: Option<String>,
    pub bitrate: Option<u64>,
    pub bpp: Option<f64>,
    pub crf: Option<f64>,
    pub cqp: Option<i32>,
    pub conversion: ConversionProps,
    pub gop: u32,
    pub threads: ThreadSpec,
    pub conv_threads: usize,
    pub slices: Option<u32>,
    pub intra_refresh: Toggle,
    pub interlaced_dct: Toggle,
    /// Passthrough options, applied in key order
    pub options: BTreeMap<String, String>,
    pub show_help: bool,
}

impl Default for CompressionRequest {
    fn default() -> Self {
        Self {
            codec: None,
            encoder: None,
            bitrate: None,
            bpp: None,
            crf: None,
            cqp: None,
            conversion: ConversionProps::default(),
            gop: DEFAULT_GOP_SIZE,
            threads: ThreadSpec::Auto,
            conv_threads: default_conv_threads(),
            slices: None,
            intra_refresh: Toggle::Unset,
            interlaced_dct: Toggle::Unset,
            options: BTreeMap::new(),
            show_help: false,
        }
    }
}

fn default_conv_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl CompressionRequest {
    pub fn parse(config: &str) -> Result<Self, ConfigParseError> {
        let mut request = Self::default();
        request.apply(config)?;
        Ok(request)
    }

    /// Codec the request resolves to when no encoder pins it
    pub fn resolved_codec(&self) -> Codec {
        self.codec.unwrap_or(DEFAULT_CODEC)
    }

    /// True when none of bitrate, bpp or CRF was given
    pub fn lacks_rate_hint(&self) -> bool {
        self.crf.is_none() && self.bitrate.is_none() && self.bpp.is_none()
    }

    /// Parse `config` on top of the current values. On error `self` may be partially
    /// updated; callers that need atomicity parse into a clone.
    pub fn apply(&mut self, config: &str) -> Result<(), ConfigParseError> {
        let escaped = config.replace(ESCAPED_COLON, COLON_PLACEHOLDER);

        for item in escaped.split(':').filter(|t| !t.is_empty()) {
            self.apply_token(item)?;
        }
        Ok(())
    }

    fn apply_token(&mut self, item: &str) -> Result<(), ConfigParseError> {
        let lower = item.to_ascii_lowercase();
        let value_of = |prefix: &str| item[prefix.len()..].to_string();

        if lower == "help" {
            self.show_help = true;
        } else if lower.starts_with("codec=") {
            let name = value_of("codec=");
            let codec =
                Codec::from_name(&name).ok_or(ConfigParseError::UnknownCodec(name))?;
            self.codec = Some(codec);
        } else if lower.starts_with("bitrate=") {
            let value = value_of("bitrate=");
            let rate = parse_si(&value).filter(|r| *r >= 0.0).ok_or_else(|| {
                ConfigParseError::InvalidValue {
                    key: "bitrate".into(),
                    value: value.clone(),
                }
            })?;
            // 0 keeps the codec default
            self.bitrate = (rate >= 1.0).then_some(rate as u64);
        } else if lower.starts_with("bpp=") {
            let value = value_of("bpp=");
            let bpp = parse_si(&value).ok_or_else(|| ConfigParseError::InvalidValue {
                key: "bpp".into(),
                value: value.clone(),
            })?;
            self.bpp = (bpp > 0.0).then_some(bpp);
        } else if lower.starts_with("crf=") {
            self.crf = Some(parse_number("crf", &value_of("crf="))?);
        } else if lower.starts_with("cqp=") {
            self.cqp = Some(parse_number("cqp", &value_of("cqp="))?);
        } else if lower.starts_with("q=") {
            tracing::warn!("Option \"q=\" is deprecated, use \"cqp=\" instead");
            self.cqp = Some(parse_number("cqp", &value_of("q="))?);
        } else if lower.starts_with("subsampling=") {
            let value = value_of("subsampling=");
            let subsampling = value
                .trim()
                .parse::<u32>()
                .ok()
                .and_then(Subsampling::from_digits)
                .ok_or(ConfigParseError::InvalidSubsampling(value))?;
            self.conversion.subsampling = Some(subsampling);
        } else if lower.starts_with("depth=") {
            self.conversion.depth = Some(parse_number("depth", &value_of("depth="))?);
        } else if lower == "rgb" || lower == "yuv" {
            self.conversion.rgb = Some(lower == "rgb");
        } else if lower == "intra_refresh" || lower == "disable_intra_refresh" {
            self.intra_refresh = toggle_for(&lower);
        } else if lower == "interlaced_dct" || lower == "disable_interlaced_dct" {
            self.interlaced_dct = toggle_for(&lower);
        } else if lower.starts_with("threads=") {
            let value = value_of("threads=");
            let (mode, conv) = match value.split_once(',') {
                Some((mode, conv)) => (mode, Some(conv)),
                None => (value.as_str(), None),
            };
            if let Some(conv) = conv {
                self.conv_threads = parse_number("threads", conv)?;
            }
            self.threads = ThreadSpec::parse(mode)?;
        } else if lower.starts_with("slices=") {
            self.slices = Some(parse_number("slices", &value_of("slices="))?);
        } else if lower.starts_with("encoder=") {
            self.encoder = Some(value_of("encoder="));
        } else if lower.starts_with("gop=") {
            self.gop = parse_number("gop", &value_of("gop="))?;
        } else if let Some((key, value)) = item.split_once('=') {
            self.options.insert(
                key.to_string(),
                value.replace(COLON_PLACEHOLDER, ":"),
            );
        } else {
            return Err(ConfigParseError::UnknownOption(
                item.replace(COLON_PLACEHOLDER, ESCAPED_COLON),
            ));
        }
        Ok(())
    }
}

fn toggle_for(token: &str) -> Toggle {
    if token.starts_with("disable_") {
        Toggle::Disabled
    } else {
        Toggle::Enabled
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigParseError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigParseError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}

/// Parses a number with an optional `k`, `M` or `G` suffix
pub fn parse_si(value: &str) -> Option<f64> {
    let value = value.trim();
    let (number, multiplier) = match value.chars().last()? {
        'k' | 'K' => (&value[..value.len() - 1], 1e3),
        'm' | 'M' => (&value[..value.len() - 1], 1e6),
        'g' | 'G' => (&value[..value.len() - 1], 1e9),
        _ => (value, 1.0),
    };
    let parsed = number.trim().parse::<f64>().ok()?;
    let result = parsed * multiplier;
    result.is_finite().then_some(result)
}

/// Formats a rate with SI units, e.g. `2.00 M`
pub fn format_si(value: u64) -> String {
    let v = value as f64;
    if v >= 1e9 {
        format!("{:.2} G", v / 1e9)
    } else if v >= 1e6 {
        format!("{:.2} M", v / 1e6)
    } else if v >= 1e3 {
        format!("{:.2} k", v / 1e3)
    } else {
        format!("{}", value)
    }
}

/// Usage text shown for `help`
pub fn usage() -> String {
    let mut out = String::new();
    out.push_str("Encoder configuration:\n");
    out.push_str("\t[codec=<codec_name>|encoder=<encoder>][:bitrate=<bits_per_sec>|:bpp=<bits_per_pixel>|:crf=<crf>|:cqp=<cqp>]\n");
    out.push_str("\t[:subsampling=<subsampling>][:depth=<depth>][:rgb|:yuv][:gop=<gop>]\n");
    out.push_str("\t[:[disable_]intra_refresh][:[disable_]interlaced_dct][:threads=<threads>][:slices=<slices>][:<opt>=<val>]*\n\n");
    out.push_str("where\n");
    out.push_str("\t<encoder>        encoder backend (eg. h264_nvenc or libx264 for H.264)\n");
    out.push_str(&format!(
        "\t<codec_name>     codec name (default {}) if encoder name is not specified\n",
        DEFAULT_CODEC
    ));
    out.push_str("\t<bits_per_sec>   requested bitrate, 0 means codec default\n");
    out.push_str("\t<bits_per_pixel> bitrate as width * height * bits_per_pixel * fps\n");
    out.push_str("\t<cqp>            constant QP; the only quality option for some codecs such as MJPEG\n");
    out.push_str("\t<crf>            constant rate factor (libx264/libx265)\n");
    out.push_str("\t<subsampling>    444, 422 or 420; default 420 progressive, 422 interlaced\n");
    out.push_str("\t<depth>          enforce compression bit depth\n");
    out.push_str("\trgb|yuv          enforce colour model\n");
    out.push_str("\t<threads>        \"no\" or \"<number>[F][S][n]\" (frame/slice/none), optionally \",<conversion threads>\"\n");
    out.push_str(&format!(
        "\t<gop>            GOP size (default {})\n",
        DEFAULT_GOP_SIZE
    ));
    out.push_str("\t<opt>=<val>      passed to the encoder verbatim; escape colons as \\:\n\n");
    out.push_str("Supported codecs:\n");
    for profile in registry().by_priority() {
        out.push_str(&format!("\t{}\n", profile.codec));
    }
    out
}
