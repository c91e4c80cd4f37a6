//! In-band framing: extradata prefix for codecs with global headers, and the trailing
//! SEI message carrying the original source format for H.264/HEVC.

use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use uuid::Uuid;

use super::types::{Codec, SourceFormat};

pub const START_CODE: [u8; 3] = [0x00, 0x00, 0x01];
/// NAL header + payload type 5 (user data unregistered)
pub const H264_SEI_PREFIX: [u8; 2] = [0x06, 0x05];
pub const HEVC_SEI_PREFIX: [u8; 3] = [0x4E, 0x01, 0x05];
/// Identifies the payload as an original-format record
pub const ORIG_FORMAT_UUID: Uuid = Uuid::from_u128(0x8d3c_6f1e_42a7_4b8e_9c51_7e2f_0a6d_b493);
/// UUID plus the format byte
pub const SEI_PAYLOAD_SIZE: u8 = 17;
/// Trailing marker after the payload; decoders drop the message without it
pub const END_OF_BYTESTREAM: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Cannot store the input format in a {0} stream, only H.264/HEVC")]
pub struct UnsupportedMetadataEmbedding(pub Codec);

static WARNED_UNSUPPORTED: AtomicBool = AtomicBool::new(false);

/// `((depth - 8) / 2) << 4 | (a - 1) << 2 | (b != 0) << 1 | rgb` for a J:a:b source
pub fn format_byte(source: SourceFormat) -> u8 {
    let desc = source.desc();
    let (_, a, b) = desc.subsampling.jab();
    (desc.depth.saturating_sub(8) / 2) << 4 | (a - 1) << 2 | u8::from(b != 0) << 1 | u8::from(desc.rgb)
}

/// Append the original-format SEI message
pub fn append_orig_format(
    codec: Codec,
    source: SourceFormat,
    data: &mut Vec<u8>,
) -> Result<(), UnsupportedMetadataEmbedding> {
    data.extend_from_slice(&START_CODE);
    match codec {
        Codec::H264 => data.extend_from_slice(&H264_SEI_PREFIX),
        Codec::H265 => data.extend_from_slice(&HEVC_SEI_PREFIX),
        other => {
            data.truncate(data.len() - START_CODE.len());
            return Err(UnsupportedMetadataEmbedding(other));
        }
    }
    data.push(SEI_PAYLOAD_SIZE);
    data.extend_from_slice(ORIG_FORMAT_UUID.as_bytes());
    data.push(format_byte(source));
    data.push(END_OF_BYTESTREAM);
    Ok(())
}

/// Like [`append_orig_format`] but logs an unsupported codec once per process
pub fn embed_orig_format(codec: Codec, source: SourceFormat, data: &mut Vec<u8>) -> bool {
    match append_orig_format(codec, source, data) {
        Ok(()) => true,
        Err(e) => {
            if !WARNED_UNSUPPORTED.swap(true, Ordering::Relaxed) {
                tracing::error!("{}", e);
            }
            false
        }
    }
}

/// `[u32 LE length][extradata]`
pub fn extradata_prefix(extradata: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + extradata.len());
    out.extend_from_slice(&(extradata.len() as u32).to_le_bytes());
    out.extend_from_slice(extradata);
    out
}
