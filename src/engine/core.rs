pub mod error;
pub mod family;
pub mod metadata;
pub mod monitor;
pub mod negotiate;
pub mod pipeline;
pub mod reconfig;
pub mod registry;
pub mod request;
pub mod selector;
pub mod settings;
pub mod tuner;
pub mod types;

pub use error::{ConfigParseError, EngineError, EngineResult};
pub use family::EncoderFamily;
pub use metadata::{embed_orig_format, extradata_prefix};
pub use monitor::{PerformanceMonitor, PerformanceReport};
pub use negotiate::{ConversionPath, Negotiated, candidate_formats, negotiate};
pub use pipeline::{ActiveEncoder, EncodePipeline, PipelineState};
pub use reconfig::{ReconfigHandle, ReconfigResponse};
pub use registry::{CodecProfile, registry};
pub use request::{CompressionRequest, ConversionProps, ThreadSpec, Toggle, usage};
pub use selector::{SelectedEncoder, select_encoder};
pub use settings::{EncoderSettings, EngineParams, RateControl, format_command};
pub use tuner::{TuneInput, configure};
pub use types::{
    Codec, CompressedFrame, Interlacing, NativeFrame, Packet, PixelFormat, RawFrame,
    SourceFormat, StreamDescription, Subsampling,
};
