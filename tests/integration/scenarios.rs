//! End-to-end behaviour of selection, tuning and monitoring

use std::time::Duration;

use rtenc::engine::{
    Codec, PixelFormat, RateControl,
    core::family::EncoderFamily,
    core::monitor::{MonitorContext, PerformanceMonitor, WARMUP_FRAMES},
    core::settings::ThreadType,
    core::tuner::{DEFAULT_CQP, DEFAULT_CRF},
};

use crate::common::{builtin_pipeline, desc, frame};

#[test]
fn bitrate_request_sets_only_bitrate() {
    let mut pipeline = builtin_pipeline("codec=H264:bitrate=2000000");
    let active = pipeline.prepare(&desc(1920, 1080, 30.0)).unwrap();

    assert_eq!(active.selected.codec, Codec::H264);
    assert_eq!(active.selected.info.name, "libx264");
    let settings = &active.settings;
    assert_eq!(settings.bit_rate, Some(2_000_000));
    assert_eq!(settings.rate_control, Some(RateControl::Bitrate(2_000_000)));
    assert_eq!(settings.option("crf"), None);
    assert_eq!(settings.option("qp"), None);
    assert!(!settings.qscale);
}

#[test]
fn mjpeg_without_hint_uses_default_qp() {
    let mut pipeline = builtin_pipeline("codec=MJPG");
    let active = pipeline.prepare(&desc(1280, 720, 25.0)).unwrap();

    assert_eq!(active.selected.info.name, "mjpeg");
    let settings = &active.settings;
    assert_eq!(settings.rate_control, Some(RateControl::ConstantQp(DEFAULT_CQP)));
    assert_eq!(settings.qmin, Some(DEFAULT_CQP));
    assert_eq!(settings.qmax, Some(DEFAULT_CQP));
    assert_eq!(settings.bit_rate, None);
}

#[test]
fn gop_is_written_once_into_param_string() {
    let mut pipeline = builtin_pipeline("encoder=libx264:crf=18:gop=50:x264-params=keyint=50");
    let active = pipeline.prepare(&desc(1920, 1080, 30.0)).unwrap();

    let settings = &active.settings;
    assert_eq!(settings.gop_size, 50);
    assert_eq!(settings.rate_control, Some(RateControl::ConstantRateFactor(18.0)));
    let params = settings.option("x264-params").unwrap();
    assert_eq!(params.matches("keyint").count(), 1);
    assert_eq!(
        settings
            .options
            .iter()
            .filter(|(k, _)| k == "x264-params")
            .count(),
        1
    );
}

#[test]
fn gop_without_passthrough_is_added() {
    let mut pipeline = builtin_pipeline("encoder=libx265:gop=30");
    let active = pipeline.prepare(&desc(1920, 1080, 30.0)).unwrap();
    let params = active.settings.option("x265-params").unwrap();
    assert!(params.starts_with("keyint=30"));
    assert_eq!(
        active.settings.rate_control,
        Some(RateControl::ConstantRateFactor(DEFAULT_CRF))
    );
}

#[test]
fn monitor_reports_exactly_once() {
    let ctx = MonitorContext {
        family: EncoderFamily::X26x,
        capabilities: Default::default(),
        thread_type: ThreadType::NONE,
        thread_count: None,
        user_delay: false,
        fps: 30.0,
        source_rgb: false,
        target_rgb: false,
    };
    // twice the per-frame budget
    let slow = Duration::from_secs_f64(2.0 / 30.0);
    let mut monitor = PerformanceMonitor::new();

    let first: Vec<_> = (0..WARMUP_FRAMES)
        .filter_map(|_| monitor.observe(&ctx, Duration::ZERO, slow))
        .collect();
    assert_eq!(first.len(), 1);
    assert!(first[0].average > first[0].budget);

    let later = (0..800)
        .filter_map(|_| monitor.observe(&ctx, Duration::ZERO, slow))
        .count();
    assert_eq!(later, 0);
}

#[test]
fn rgb_source_picks_rgb_encoder() {
    let mut pipeline = builtin_pipeline("codec=H264:bitrate=4M");
    let mut d = desc(640, 360, 30.0);
    d.source = rtenc::engine::SourceFormat::Rgb;
    let active = pipeline.prepare(&d).unwrap();
    assert_eq!(active.selected.info.name, "libx264rgb");
    assert!(active.format.is_rgb());
}

#[test]
fn prores_output_uses_profile_tag() {
    let mut pipeline = builtin_pipeline("codec=ProRes:bitrate=50M");
    let mut d = desc(64, 32, 25.0);
    d.source = rtenc::engine::SourceFormat::V210;
    let out = pipeline.compress_frame(&frame(d)).unwrap().unwrap();
    assert_eq!(out.codec, Codec::Prores);
    assert_eq!(&out.fourcc, b"apcn");
    assert_eq!(
        pipeline.active().map(|a| a.format),
        Some(PixelFormat::Yuv422p10)
    );
}
