//! Pixel format negotiation through the pipeline

use rtenc::engine::{
    Codec, CompressionRequest, ConversionPath, EncodePipeline, EngineError, EngineParams,
    PixelFormat, SourceFormat, StreamDescription,
    core::negotiate::{candidate_formats, negotiate},
    core::request::ConversionProps,
    simulate::{SessionBehaviour, SimulatedCatalog, SimulatedConverter},
};

use crate::common::{desc, encoder, frame, pipeline_with};

fn single_encoder_catalog(formats: &[PixelFormat], rejected: &[PixelFormat]) -> SimulatedCatalog {
    SimulatedCatalog::new(vec![encoder("h264_test", Codec::H264, formats)]).with_behaviour(
        SessionBehaviour {
            rejected_formats: rejected.to_vec(),
            ..Default::default()
        },
    )
}

#[test]
fn failed_trial_falls_back_to_backend_format() {
    // the only common format fails to open; xv30 is not a conversion target for UYVY
    let catalog = single_encoder_catalog(
        &[PixelFormat::Yuv420p, PixelFormat::Xv30],
        &[PixelFormat::Yuv420p],
    );
    let mut pipeline = pipeline_with(catalog, "encoder=h264_test:bitrate=1M");
    let d = desc(64, 32, 25.0);

    let active = pipeline.prepare(&d).unwrap();
    assert_eq!(active.format, PixelFormat::Xv30);
    let ConversionPath::Fallback { convert_to } = active.path else {
        panic!("expected the fallback path, got {:?}", active.path);
    };
    assert_eq!(convert_to, PixelFormat::Yuv420p);

    let out = pipeline.compress_frame(&frame(d)).unwrap();
    assert!(out.is_some());
}

#[test]
fn forced_format_disables_fallback() {
    let catalog = single_encoder_catalog(
        &[PixelFormat::Yuv420p, PixelFormat::Xv30],
        &[PixelFormat::Yuv420p],
    );
    let engine = EngineParams {
        force_pix_fmt: Some(PixelFormat::Yuv420p),
        ..Default::default()
    };
    let mut pipeline = EncodePipeline::new(
        Box::new(catalog),
        Box::new(SimulatedConverter::new()),
        CompressionRequest::parse("encoder=h264_test").unwrap(),
        engine,
    );
    match pipeline.prepare(&desc(64, 32, 25.0)) {
        Err(EngineError::NoCompatiblePixelFormat { hint, .. }) => {
            assert!(hint.to_lowercase().contains("force"), "hint: {}", hint);
        }
        other => panic!("expected NoCompatiblePixelFormat, got {:?}", other.map(|a| a.format)),
    }
}

#[test]
fn depth_override_restricts_candidates() {
    let mut pipeline = crate::common::builtin_pipeline("codec=H265:bitrate=8M:depth=10");
    let d = StreamDescription::new(64, 32, 25.0, SourceFormat::V210);
    let active = pipeline.prepare(&d).unwrap();
    assert_eq!(active.format.desc().depth, 10);
    assert_eq!(active.path, ConversionPath::Direct);
}

#[test]
fn unknown_encoder_is_reported() {
    let mut pipeline = crate::common::builtin_pipeline("encoder=h264_nonexistent");
    assert!(matches!(
        pipeline.prepare(&desc(64, 32, 25.0)),
        Err(EngineError::EncoderNotFound(name)) if name == "h264_nonexistent"
    ));
}

#[test]
fn candidate_order_follows_source_properties() {
    let targets = SimulatedConverter::new();
    let targets = rtenc::engine::backend::PixelConverter::targets(&targets, SourceFormat::V210);
    let d = StreamDescription::new(64, 32, 25.0, SourceFormat::V210);
    let candidates = candidate_formats(&d, &ConversionProps::default(), &targets);
    assert_eq!(candidates[0], PixelFormat::Yuv420p10);
    // 8-bit formats come after every 10-bit one
    let first_8bit = candidates.iter().position(|f| f.desc().depth == 8).unwrap();
    assert!(candidates[..first_8bit].iter().all(|f| f.desc().depth == 10));
}

#[test]
fn negotiation_trials_only_supported_formats() {
    let d = StreamDescription::new(64, 32, 25.0, SourceFormat::Uyvy);
    let targets = [PixelFormat::Yuv444p, PixelFormat::Yuv422p, PixelFormat::Yuv420p];
    let supported = [PixelFormat::Yuv422p];
    let mut tried = Vec::new();
    let negotiated = negotiate(
        "libx264",
        &supported,
        &d,
        &ConversionProps::default(),
        None,
        &targets,
        |format| {
            tried.push(format);
            Ok(Some(()))
        },
    )
    .unwrap();
    assert_eq!(negotiated.format, PixelFormat::Yuv422p);
    assert_eq!(tried, vec![PixelFormat::Yuv422p]);
}
