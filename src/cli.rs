use clap::{Args, Parser, Subcommand, ValueEnum};

use rtenc::config::CatalogKind;

#[derive(Parser)]
#[command(name = "rtenc")]
#[command(
    about = "Encoder negotiation and tuning for low-latency video transport",
    long_about = None
)]
pub struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List codecs by capability priority with their encoders
    Codecs {
        #[arg(long, value_enum)]
        catalog: Option<CatalogArg>,

        /// Also list hardware encoders the detected GPU cannot drive
        #[arg(long)]
        all: bool,
    },

    /// Show tuning notes and pixel formats of one encoder
    EncoderHelp {
        /// Encoder name, e.g. hevc_nvenc
        name: String,

        #[arg(long, value_enum)]
        catalog: Option<CatalogArg>,
    },

    /// Select, negotiate and tune an encoder without encoding (dry run)
    Plan(PlanArgs),

    /// Drive the encode pipeline with simulated encoder sessions
    Simulate {
        #[command(flatten)]
        plan: PlanArgs,

        /// Number of frames to encode
        #[arg(long, default_value_t = 100)]
        frames: u64,

        /// Post a reconfiguration before a frame, as FRAME=CONFIG (repeatable)
        #[arg(long = "reconfigure", value_name = "FRAME=CONFIG")]
        reconfigure: Vec<String>,

        /// Pixel format the simulated encoder refuses to open with (repeatable)
        #[arg(long = "reject-format", value_name = "PIX_FMT")]
        reject_format: Vec<String>,

        /// Simulated encode time per frame in milliseconds
        #[arg(long, default_value_t = 0)]
        latency_ms: u64,

        /// Frames the simulated encoder holds back before emitting packets
        #[arg(long, default_value_t = 0)]
        delay_frames: usize,
    },

    /// Create default config file (or show path if exists)
    InitConfig,
}

#[derive(Args, Clone)]
pub struct PlanArgs {
    /// Configuration string, e.g. "codec=HEVC:bitrate=8M" ("help" lists options)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Frame size as WIDTHxHEIGHT
    #[arg(long, default_value = "1920x1080")]
    pub size: String,

    #[arg(long, default_value_t = 30.0)]
    pub fps: f64,

    /// Source is interlaced (merged fields)
    #[arg(long)]
    pub interlaced: bool,

    /// Source pixel format, e.g. UYVY, v210, R10k
    #[arg(long)]
    pub source: Option<String>,

    #[arg(long, value_enum)]
    pub catalog: Option<CatalogArg>,

    /// Emit machine-readable JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum CatalogArg {
    Builtin,
    Ffmpeg,
}

impl From<CatalogArg> for CatalogKind {
    fn from(arg: CatalogArg) -> Self {
        match arg {
            CatalogArg::Builtin => CatalogKind::Builtin,
            CatalogArg::Ffmpeg => CatalogKind::Ffmpeg,
        }
    }
}

/// Parse "WIDTHxHEIGHT"
pub fn parse_size(size: &str) -> Option<(u32, u32)> {
    let (w, h) = size.trim().split_once(['x', 'X'])?;
    let (w, h) = (w.parse().ok()?, h.parse().ok()?);
    (w > 0 && h > 0).then_some((w, h))
}

/// Parse "FRAME=CONFIG"; the config itself may contain '='
pub fn parse_reconfigure(spec: &str) -> Option<(u64, String)> {
    let (frame, config) = spec.split_once('=')?;
    Some((frame.trim().parse().ok()?, config.to_string()))
}
