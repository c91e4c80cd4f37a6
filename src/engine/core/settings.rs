//! Resolved encoder context fields and global engine parameters.

use serde::{Deserialize, Serialize};

use super::types::{Codec, PixelFormat, StreamDescription};

/// Compliance level that lets experimental encoders open
pub const STRICT_EXPERIMENTAL: i32 = -2;

/// Global engine parameters (not part of the per-stream configuration string)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineParams {
    /// Frame size overshoot multiplier for rate-control buffers
    pub rc_buffer_size_factor: Option<f64>,
    /// Restrict negotiation to exactly this pixel format
    pub force_pix_fmt: Option<PixelFormat>,
    /// Append the original source format to H.264/HEVC output
    pub keep_pixfmt: bool,
    pub cuda_device: u32,
}

/// Quality mode; exactly one applies per context
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum RateControl {
    ConstantQp(i32),
    ConstantRateFactor(f64),
    Bitrate(u64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ThreadType {
    pub frame: bool,
    pub slice: bool,
}

impl ThreadType {
    pub const NONE: ThreadType = ThreadType {
        frame: false,
        slice: false,
    };

    pub fn is_none(&self) -> bool {
        !self.frame && !self.slice
    }

    fn ffmpeg_name(&self) -> Option<&'static str> {
        match (self.frame, self.slice) {
            (true, true) => Some("frame+slice"),
            (true, false) => Some("frame"),
            (false, true) => Some("slice"),
            (false, false) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ColorSpace {
    Rgb,
    #[default]
    Bt709,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ColorRange {
    Full,
    #[default]
    Limited,
}

/// Hardware frame pool attached to the context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HwFrames {
    pub sw_format: PixelFormat,
    pub pool_size: usize,
}

/// Every field set on an encoder context before it is opened
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncoderSettings {
    pub encoder: String,
    pub codec: Codec,
    pub width: u32,
    pub height: u32,
    /// Frame duration as num/den seconds
    pub time_base: (u32, u32),
    pub gop_size: u32,
    pub max_b_frames: u32,
    pub pix_fmt: PixelFormat,
    pub bits_per_raw_sample: u8,
    pub strict: i32,
    pub rate_control: Option<RateControl>,
    pub bit_rate: Option<u64>,
    pub bit_rate_tolerance: Option<u64>,
    pub rc_max_rate: Option<u64>,
    pub rc_buffer_size: Option<u64>,
    pub qmin: Option<i32>,
    pub qmax: Option<i32>,
    pub max_qdiff: Option<i32>,
    pub qcompress: Option<f32>,
    pub global_quality: Option<i32>,
    pub qscale: bool,
    pub interlaced_dct: bool,
    pub refs: Option<u32>,
    pub thread_type: ThreadType,
    /// `None` keeps the backend default, `Some(0)` means automatic
    pub thread_count: Option<usize>,
    pub slices: u32,
    pub colorspace: ColorSpace,
    pub color_range: ColorRange,
    pub hw_frames: Option<HwFrames>,
    /// Private options accepted by the backend, in the order they were set
    pub options: Vec<(String, String)>,
}

impl EncoderSettings {
    pub fn new(encoder: &str, codec: Codec, desc: &StreamDescription, pix_fmt: PixelFormat) -> Self {
        Self {
            encoder: encoder.to_string(),
            codec,
            width: desc.width,
            height: desc.height,
            time_base: (1, desc.fps as u32),
            gop_size: 0,
            max_b_frames: 0,
            pix_fmt,
            bits_per_raw_sample: codec.native_depth().min(pix_fmt.desc().depth),
            strict: STRICT_EXPERIMENTAL,
            rate_control: None,
            bit_rate: None,
            bit_rate_tolerance: None,
            rc_max_rate: None,
            rc_buffer_size: None,
            qmin: None,
            qmax: None,
            max_qdiff: None,
            qcompress: None,
            global_quality: None,
            qscale: false,
            interlaced_dct: false,
            refs: None,
            thread_type: ThreadType::NONE,
            thread_count: None,
            slices: 0,
            colorspace: ColorSpace::default(),
            color_range: ColorRange::default(),
            hw_frames: None,
            options: Vec::new(),
        }
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Record an accepted option; a repeated key keeps its first position
    pub fn record_option(&mut self, key: &str, value: &str) {
        match self.options.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.options.push((key.to_string(), value.to_string())),
        }
    }

    /// Equivalent `ffmpeg` output arguments
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        let mut push = |k: &str, v: String| {
            args.push(k.to_string());
            args.push(v);
        };

        push("-c:v", self.encoder.clone());
        let pix_fmt = match self.hw_frames {
            Some(hw) => hw.sw_format,
            None => self.pix_fmt,
        };
        push("-pix_fmt", pix_fmt.to_string());
        push("-s", format!("{}x{}", self.width, self.height));
        push("-r", format!("{}/{}", self.time_base.1, self.time_base.0));
        push("-g", self.gop_size.to_string());
        push("-bf", self.max_b_frames.to_string());
        push("-strict", self.strict.to_string());

        if let Some(rate) = self.bit_rate {
            push("-b:v", rate.to_string());
        }
        if let Some(tolerance) = self.bit_rate_tolerance {
            push("-bt", tolerance.to_string());
        }
        if let Some(max) = self.rc_max_rate {
            push("-maxrate", max.to_string());
        }
        if let Some(buf) = self.rc_buffer_size {
            push("-bufsize", buf.to_string());
        }
        if let Some(q) = self.qmin {
            push("-qmin", q.to_string());
        }
        if let Some(q) = self.qmax {
            push("-qmax", q.to_string());
        }
        if let Some(q) = self.max_qdiff {
            push("-qdiff", q.to_string());
        }
        if let Some(q) = self.qcompress {
            push("-qcomp", q.to_string());
        }
        if let Some(q) = self.global_quality {
            push("-global_quality", q.to_string());
        }

        let mut flags = Vec::new();
        if self.qscale {
            flags.push("+qscale");
        }
        if self.interlaced_dct {
            flags.push("+ildct");
        }
        if !flags.is_empty() {
            push("-flags", flags.concat());
        }

        if let Some(refs) = self.refs {
            push("-refs", refs.to_string());
        }
        if let Some(name) = self.thread_type.ffmpeg_name() {
            push("-thread_type", name.to_string());
        }
        if let Some(count) = self.thread_count {
            push("-threads", count.to_string());
        }
        push("-slices", self.slices.to_string());
        push(
            "-colorspace",
            match self.colorspace {
                ColorSpace::Rgb => "rgb",
                ColorSpace::Bt709 => "bt709",
            }
            .to_string(),
        );
        push(
            "-color_range",
            match self.color_range {
                ColorRange::Full => "pc",
                ColorRange::Limited => "tv",
            }
            .to_string(),
        );

        for (key, value) in &self.options {
            push(&format!("-{}", key), value.clone());
        }
        args
    }
}

/// Render a command line, quoting arguments the shell would split
pub fn format_command(program: &str, args: &[String]) -> String {
    let mut parts = vec![program.to_string()];
    parts.extend(args.iter().map(|arg| match shlex::try_quote(arg) {
        Ok(quoted) => quoted.into_owned(),
        Err(_) => format!("\"{}\"", arg),
    }));
    parts.join(" ")
}
