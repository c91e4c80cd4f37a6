//! Live reconfiguration and stream change handling

use rtenc::engine::{
    PipelineState, ReconfigResponse, SourceFormat,
    simulate::{SessionBehaviour, SimulatedCatalog},
};

use crate::common::recording::RecordingCatalog;
use crate::common::{desc, frame, pipeline_with};
use rtenc::engine::{CompressionRequest, EncodePipeline, EngineParams, simulate::SimulatedConverter};

fn recorded(config: &str) -> (EncodePipeline, crate::common::recording::EventLog) {
    let (catalog, log) = RecordingCatalog::new(SimulatedCatalog::builtin());
    let pipeline = EncodePipeline::new(
        Box::new(catalog),
        Box::new(SimulatedConverter::new()),
        CompressionRequest::parse(config).unwrap(),
        EngineParams::default(),
    );
    (pipeline, log)
}

#[test]
fn valid_reconfiguration_flushes_and_reopens() {
    let (mut pipeline, log) = recorded("codec=H264:bitrate=2M");
    let d = desc(320, 240, 30.0);
    let f = frame(d);

    pipeline.compress_frame(&f).unwrap();
    pipeline.compress_frame(&f).unwrap();
    assert_eq!(log.snapshot().opened.len(), 1);

    let reply = pipeline.handle().post("bitrate=4M");
    // nothing happens until the next frame
    assert!(reply.try_recv().is_err());

    pipeline.compress_frame(&f).unwrap();
    assert_eq!(reply.try_recv().unwrap(), ReconfigResponse::Ok);

    let events = log.snapshot();
    assert_eq!(events.flushes, 1);
    assert_eq!(events.opened.len(), 2);
    assert_eq!(events.opened[1].bit_rate, Some(4_000_000));
    assert_eq!(pipeline.settings().unwrap().bit_rate, Some(4_000_000));
    assert_eq!(events.frames, 3);
}

#[test]
fn invalid_reconfiguration_keeps_encoder() {
    let (mut pipeline, log) = recorded("codec=H264:bitrate=2M");
    let f = frame(desc(320, 240, 30.0));
    pipeline.compress_frame(&f).unwrap();
    let before = pipeline.request().clone();

    let bad = pipeline.handle().post("bitrate=fast");
    let help = pipeline.handle().post("help");
    pipeline.compress_frame(&f).unwrap();

    assert_eq!(bad.recv().unwrap(), ReconfigResponse::InternalError);
    assert_eq!(help.recv().unwrap(), ReconfigResponse::InternalError);
    assert_eq!(pipeline.request(), &before);
    let events = log.snapshot();
    assert_eq!(events.flushes, 0);
    assert_eq!(events.opened.len(), 1);
}

#[test]
fn messages_apply_in_order_before_the_frame() {
    let (mut pipeline, log) = recorded("codec=H264:bitrate=2M");
    let f = frame(desc(320, 240, 30.0));
    pipeline.compress_frame(&f).unwrap();

    let handle = pipeline.handle();
    let first = handle.post("gop=10");
    let second = std::thread::spawn(move || handle.post("gop=40")).join().unwrap();
    pipeline.compress_frame(&f).unwrap();

    assert_eq!(first.recv().unwrap(), ReconfigResponse::Ok);
    assert_eq!(second.recv().unwrap(), ReconfigResponse::Ok);
    assert_eq!(pipeline.settings().unwrap().gop_size, 40);
    // both changes land in a single reopen
    assert_eq!(log.snapshot().opened.len(), 2);
}

#[test]
fn tile_count_change_does_not_reconfigure() {
    let (mut pipeline, log) = recorded("codec=H264");
    let d = desc(320, 240, 30.0);
    pipeline.compress_frame(&frame(d)).unwrap();

    let mut tiled = d;
    tiled.tile_count = 4;
    pipeline.compress_frame(&frame(tiled)).unwrap();
    assert_eq!(log.snapshot().opened.len(), 1);

    let mut other = d;
    other.source = SourceFormat::V210;
    pipeline.compress_frame(&frame(other)).unwrap();
    let events = log.snapshot();
    assert_eq!(events.opened.len(), 2);
    assert_eq!(events.flushes, 1);
}

#[test]
fn failed_configuration_retries_on_next_frame() {
    let behaviour = SessionBehaviour {
        rejected_options: vec!["tune".into()],
        ..Default::default()
    };
    // a rejected passthrough option is an error, the rejected tuned option is not
    let catalog = SimulatedCatalog::builtin().with_behaviour(behaviour);
    let mut pipeline = pipeline_with(catalog, "codec=H264:tune=film");
    let f = frame(desc(320, 240, 30.0));

    assert!(pipeline.compress_frame(&f).is_err());
    assert_eq!(pipeline.state(), PipelineState::Unconfigured);

    let reply = pipeline.handle().post("codec=H264");
    assert!(pipeline.compress_frame(&f).is_err());
    assert_eq!(reply.recv().unwrap(), ReconfigResponse::Ok);
}

#[test]
fn delayed_encoder_output_is_discarded_on_teardown() {
    let behaviour = SessionBehaviour {
        delay_frames: 3,
        ..Default::default()
    };
    let (catalog, log) = RecordingCatalog::new(SimulatedCatalog::builtin().with_behaviour(behaviour));
    let mut pipeline = EncodePipeline::new(
        Box::new(catalog),
        Box::new(SimulatedConverter::new()),
        CompressionRequest::parse("codec=H264:bitrate=1M").unwrap(),
        EngineParams::default(),
    );
    let f = frame(desc(320, 240, 30.0));
    let outputs: Vec<_> = (0..5).map(|_| pipeline.compress_frame(&f).unwrap()).collect();
    assert!(outputs[..3].iter().all(Option::is_none));
    assert!(outputs[3..].iter().all(Option::is_some));

    drop(pipeline);
    assert_eq!(log.snapshot().flushes, 1);
}

#[test]
fn receive_error_keeps_drained_packets() {
    let (catalog, log) = RecordingCatalog::new(SimulatedCatalog::builtin());
    let mut pipeline = EncodePipeline::new(
        Box::new(catalog.with_receive_errors()),
        Box::new(SimulatedConverter::new()),
        CompressionRequest::parse("codec=H264:bitrate=1M").unwrap(),
        EngineParams::default(),
    );
    let f = frame(desc(320, 240, 30.0));

    for _ in 0..3 {
        let out = pipeline.compress_frame(&f).unwrap().expect("packet drained before the error");
        assert_eq!(&out.data[..4], b"AVC1");
    }
    assert_eq!(pipeline.state(), PipelineState::Encoding);
    assert_eq!(log.snapshot().opened.len(), 1);
}
