//! Configuration file loading and its effect on the engine

use std::fs;

use rtenc::config::{CatalogKind, Config};
use rtenc::engine::{
    CompressionRequest, EncodePipeline, PixelFormat, simulate::SimulatedCatalog,
    simulate::SimulatedConverter,
};
use tempfile::TempDir;

use crate::common::desc;

fn write_config(contents: &str) -> (TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, contents).unwrap();
    (dir, path)
}

#[test]
fn empty_file_yields_defaults() {
    let (_dir, path) = write_config("");
    let config = Config::load_from(&path).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn malformed_file_is_an_error() {
    let (_dir, path) = write_config("[engine\nkeep_pixfmt = yes");
    let err = Config::load_from(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse config file"));
}

#[test]
fn forced_format_from_file_drives_negotiation() {
    let (_dir, path) = write_config(
        r#"
[engine]
force_pix_fmt = "yuv422p"

[defaults]
config = "codec=H264:bitrate=3M"
catalog = "builtin"
"#,
    );
    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.defaults.catalog, CatalogKind::Builtin);

    let mut pipeline = EncodePipeline::new(
        Box::new(SimulatedCatalog::builtin()),
        Box::new(SimulatedConverter::new()),
        CompressionRequest::parse(&config.defaults.config).unwrap(),
        config.engine.clone(),
    );
    let active = pipeline.prepare(&desc(64, 32, 25.0)).unwrap();
    assert_eq!(active.format, PixelFormat::Yuv422p);
    assert_eq!(active.settings.bit_rate, Some(3_000_000));
}

#[test]
fn rc_buffer_factor_from_file_scales_buffer() {
    let (_dir, path) = write_config("[engine]\nrc_buffer_size_factor = 1.0\n");
    let config = Config::load_from(&path).unwrap();
    let mut pipeline = EncodePipeline::new(
        Box::new(SimulatedCatalog::builtin()),
        Box::new(SimulatedConverter::new()),
        CompressionRequest::parse("encoder=libx264:bitrate=2500000").unwrap(),
        config.engine,
    );
    let active = pipeline.prepare(&desc(64, 32, 25.0)).unwrap();
    // one frame worth of bits
    assert_eq!(active.settings.rc_buffer_size, Some(100_000));
}

#[test]
fn saved_file_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rtenc").join("config.toml");
    let mut config = Config::default();
    config.engine.cuda_device = 1;
    config.defaults.catalog = CatalogKind::Ffmpeg;
    config.save_to(&path).unwrap();

    assert_eq!(Config::load_from(&path).unwrap(), config);
}
