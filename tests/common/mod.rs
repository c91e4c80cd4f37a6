#![allow(dead_code)]

pub mod recording;

use rtenc::engine::{
    CompressionRequest, EncodePipeline, EngineParams, RawFrame, SourceFormat, StreamDescription,
    backend::{Capabilities, EncoderInfo},
    simulate::{SimulatedCatalog, SimulatedConverter, SimulatedHwAllocator},
};

pub fn desc(width: u32, height: u32, fps: f64) -> StreamDescription {
    StreamDescription::new(width, height, fps, SourceFormat::Uyvy)
}

/// A grey frame of the right size for `desc`
pub fn frame(desc: StreamDescription) -> RawFrame {
    RawFrame {
        desc,
        data: vec![0x80; desc.source.frame_size(desc.width, desc.height)],
    }
}

pub fn encoder(name: &str, codec: rtenc::engine::Codec, formats: &[rtenc::engine::PixelFormat]) -> EncoderInfo {
    EncoderInfo {
        name: name.to_string(),
        codec,
        description: format!("{} (test)", name),
        pixel_formats: formats.to_vec(),
        capabilities: Capabilities {
            frame_threads: true,
            ..Default::default()
        },
    }
}

/// Pipeline over the builtin catalog with simulated sessions
pub fn builtin_pipeline(config: &str) -> EncodePipeline {
    pipeline_with(SimulatedCatalog::builtin(), config)
}

pub fn pipeline_with(catalog: SimulatedCatalog, config: &str) -> EncodePipeline {
    EncodePipeline::new(
        Box::new(catalog),
        Box::new(SimulatedConverter::new()),
        CompressionRequest::parse(config).expect("valid test configuration"),
        EngineParams::default(),
    )
    .with_hw_allocator(Box::new(SimulatedHwAllocator::new()))
}
