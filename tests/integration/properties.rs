//! Property-based tests for negotiation, tuning and reconfiguration
//!
//! Uses proptest to generate stream descriptions, capability lists and configuration
//! strings.

use proptest::prelude::*;

use rtenc::engine::{
    CompressionRequest, ConversionPath, PixelFormat, RateControl, ReconfigResponse, SourceFormat,
    StreamDescription,
    core::negotiate::negotiate,
    core::reconfig::apply_config,
    core::request::ConversionProps,
    core::tuner::DEFAULT_CRF,
};

use crate::common::builtin_pipeline;

fn any_pixel_format() -> impl Strategy<Value = PixelFormat> {
    prop::sample::select(PixelFormat::ALL.to_vec())
}

fn any_source() -> impl Strategy<Value = SourceFormat> {
    prop::sample::select(SourceFormat::ALL.to_vec())
}

/// Outcome of one negotiation run, comparable across runs
fn negotiation_outcome(
    desc: &StreamDescription,
    supported: &[PixelFormat],
    targets: &[PixelFormat],
    failing: &[PixelFormat],
) -> Result<(PixelFormat, ConversionPath), String> {
    negotiate(
        "testenc",
        supported,
        desc,
        &ConversionProps::default(),
        None,
        targets,
        |format| Ok((!failing.contains(&format)).then_some(())),
    )
    .map(|n| (n.format, n.path))
    .map_err(|e| e.to_string())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn negotiation_is_deterministic(
        source in any_source(),
        supported in prop::collection::vec(any_pixel_format(), 1..8),
        targets in prop::collection::vec(any_pixel_format(), 0..10),
        failing in prop::collection::vec(any_pixel_format(), 0..4),
        interlaced in any::<bool>(),
    ) {
        let mut desc = StreamDescription::new(1280, 720, 50.0, source);
        if interlaced {
            desc.interlacing = rtenc::engine::Interlacing::InterlacedMerged;
        }
        let first = negotiation_outcome(&desc, &supported, &targets, &failing);
        let second = negotiation_outcome(&desc, &supported, &targets, &failing);
        prop_assert_eq!(&first, &second);

        if let Ok((format, _)) = first {
            prop_assert!(supported.contains(&format));
            prop_assert!(!failing.contains(&format));
        }
    }

    #[test]
    fn same_stream_never_reconfigures(
        width in 1u32..64,
        height in 1u32..64,
        fps in prop::sample::select(vec![24.0, 25.0, 30.0, 50.0, 59.94, 60.0]),
        tiles in 1u32..8,
    ) {
        let mut pipeline = builtin_pipeline("codec=H264:bitrate=1M");
        let d1 = StreamDescription::new(width * 2, height * 2, fps, SourceFormat::Uyvy);
        let mut d2 = d1;
        d2.tile_count = tiles;

        pipeline.prepare(&d1).unwrap();
        let first = pipeline.active().map(|a| a.settings.clone());
        pipeline.prepare(&d2).unwrap();
        let second = pipeline.active().map(|a| a.settings.clone());
        prop_assert_eq!(first, second);
        prop_assert_eq!(pipeline.state(), rtenc::engine::PipelineState::Configured);
    }

    #[test]
    fn explicit_cqp_never_sets_bitrate(
        cqp in 0i32..52,
        bitrate in prop::option::of(100_000u64..50_000_000),
        encoder in prop::sample::select(vec!["libx264", "libx265", "libvpx-vp9", "mjpeg", "libaom-av1"]),
    ) {
        let mut config = format!("encoder={}:cqp={}", encoder, cqp);
        if let Some(rate) = bitrate {
            config.push_str(&format!(":bitrate={}", rate));
        }
        let mut pipeline = builtin_pipeline(&config);
        let active = pipeline
            .prepare(&StreamDescription::new(64, 32, 25.0, SourceFormat::Uyvy))
            .unwrap();
        prop_assert_eq!(active.settings.rate_control, Some(RateControl::ConstantQp(cqp)));
        prop_assert_eq!(active.settings.bit_rate, None);
    }

    #[test]
    fn crf_family_defaults_to_crf(
        encoder in prop::sample::select(vec!["libx264", "libx265"]),
        gop in 1u32..300,
    ) {
        let mut pipeline = builtin_pipeline(&format!("encoder={}:gop={}", encoder, gop));
        let active = pipeline
            .prepare(&StreamDescription::new(64, 32, 25.0, SourceFormat::Uyvy))
            .unwrap();
        prop_assert_eq!(
            active.settings.rate_control,
            Some(RateControl::ConstantRateFactor(DEFAULT_CRF))
        );
        prop_assert_eq!(active.settings.bit_rate, None);
        prop_assert!(active.settings.option("crf").is_some());
    }

    #[test]
    fn invalid_reconfiguration_leaves_request_unchanged(
        gop in 1u32..500,
        bitrate in 1u64..100,
        garbage in "[a-z]{3,8}",
    ) {
        let mut request =
            CompressionRequest::parse(&format!("codec=H264:gop={}:bitrate={}M", gop, bitrate)).unwrap();
        let before = request.clone();
        // valid prefix, invalid number
        let config = format!("gop={}:bitrate={}", gop + 1, garbage);
        prop_assert_eq!(apply_config(&mut request, &config), ReconfigResponse::InternalError);
        prop_assert_eq!(request, before);
    }
}
