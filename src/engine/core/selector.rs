//! Encoder selection: explicit name, then the codec's preferred encoder, then any
//! encoder for the codec.

use super::error::{EngineError, EngineResult};
use super::family::EncoderFamily;
use super::registry::registry;
use super::request::CompressionRequest;
use super::types::Codec;
use crate::engine::backend::{EncoderCatalog, EncoderInfo};

/// The chosen backend and everything derived from it once
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedEncoder {
    pub info: EncoderInfo,
    pub codec: Codec,
    pub family: EncoderFamily,
}

impl SelectedEncoder {
    fn new(info: EncoderInfo) -> Self {
        let family = EncoderFamily::from_encoder_name(&info.name);
        Self {
            codec: info.codec,
            info,
            family,
        }
    }
}

pub fn select_encoder(
    catalog: &dyn EncoderCatalog,
    request: &CompressionRequest,
    source_rgb: bool,
) -> EngineResult<SelectedEncoder> {
    let selected = pick(catalog, request, source_rgb)?;
    tracing::info!(
        "Using codec: {}, encoder: {} ({})",
        selected.codec,
        selected.info.name,
        selected.family
    );
    Ok(selected)
}

fn pick(
    catalog: &dyn EncoderCatalog,
    request: &CompressionRequest,
    source_rgb: bool,
) -> EngineResult<SelectedEncoder> {
    if let Some(name) = &request.encoder {
        let info = catalog
            .find_encoder(name)
            .ok_or_else(|| EngineError::EncoderNotFound(name.clone()))?;
        if let Some(requested) = request.codec {
            if requested != info.codec {
                return Err(EngineError::EncoderCodecMismatch {
                    encoder: name.clone(),
                    requested,
                    native: info.codec,
                });
            }
        }
        return Ok(SelectedEncoder::new(info));
    }

    let codec = request.resolved_codec();
    if let Some(preferred) = registry().profile(codec).preferred_encoder {
        let name = preferred(source_rgb);
        match catalog.find_encoder(name) {
            Some(info) => return Ok(SelectedEncoder::new(info)),
            None => tracing::warn!(
                "Preferred encoder \"{}\" not found, trying the default encoder",
                name
            ),
        }
    }

    catalog
        .default_encoder(codec)
        .map(SelectedEncoder::new)
        .ok_or(EngineError::NoEncoderAvailable(codec))
}
