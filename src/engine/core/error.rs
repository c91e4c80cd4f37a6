use thiserror::Error;

use super::types::{Codec, SourceFormat};
use crate::engine::backend::BackendError;

pub type EngineResult<T> = Result<T, EngineError>;

/// Malformed configuration string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigParseError {
    #[error("Unable to find codec: \"{0}\"")]
    UnknownCodec(String),

    #[error("Invalid value \"{value}\" for option \"{key}\"")]
    InvalidValue { key: String, value: String },

    #[error("Supported subsampling is 444, 422, or 420 (got \"{0}\")")]
    InvalidSubsampling(String),

    #[error("Unknown thread mode '{0}' (use F, S or n)")]
    InvalidThreadMode(char),

    #[error("Unknown option \"{0}\"")]
    UnknownOption(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigParseError),

    #[error("Requested encoder \"{0}\" not found")]
    EncoderNotFound(String),

    #[error("No encoder available for {0}")]
    NoEncoderAvailable(Codec),

    #[error("Encoder \"{encoder}\" produces {native}, not the requested {requested}")]
    EncoderCodecMismatch {
        encoder: String,
        requested: Codec,
        native: Codec,
    },

    #[error(
        "Unable to find suitable pixel format for {source_format} (candidates: {candidates}; encoder supports: {supported}){hint}"
    )]
    NoCompatiblePixelFormat {
        source_format: SourceFormat,
        candidates: String,
        supported: String,
        hint: String,
    },

    #[error("Unable to set '{key}' to '{value}': {reason}")]
    InvalidBackendOption {
        key: String,
        value: String,
        reason: BackendError,
    },

    #[error("Pixel format conversion failed: {0}")]
    ConversionFailure(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(
        "Unknown/unsupported rate control \"{mode}\" for {encoder}. Please report it if you need this mode added."
    )]
    UnsupportedRateControl { encoder: String, mode: String },

    #[error("Rate control modes for {encoder}: cbr, cqp, icq, qvbr or vbr")]
    RateControlHelp { encoder: String },

    #[error("Hardware setup failed: {0}")]
    Hardware(String),

    #[error("Internal error: {0}")]
    Internal(&'static str),
}

impl EngineError {
    /// Process exit status for errors that have no safe default
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::UnsupportedRateControl { .. } => Some(1),
            Self::RateControlHelp { .. } => Some(0),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.exit_code().is_some()
    }
}
