use crate::cli::{CatalogArg, Cli, Commands, PlanArgs, parse_reconfigure, parse_size};
use anyhow::{Context, Result, bail};
use rtenc::config::{self, CatalogKind};
use rtenc::engine::{
    self, Codec, CompressedFrame, CompressionRequest, ConversionPath, EncodePipeline,
    EncoderSettings, EngineError, EngineParams, PixelFormat, RawFrame, ReconfigResponse,
    SourceFormat, StreamDescription,
    backend::EncoderCatalog,
    core::types::format_list,
    hardware,
    simulate::{SessionBehaviour, SimulatedCatalog, SimulatedConverter, SimulatedHwAllocator},
};
use serde::Serialize;
use std::process;
use std::sync::mpsc::Receiver;
use std::time::Duration;

pub fn run(cli: Cli) {
    let result = match cli.command {
        Commands::Codecs { catalog, all } => handle_codecs(catalog, all),
        Commands::EncoderHelp { name, catalog } => handle_encoder_help(&name, catalog),
        Commands::Plan(args) => handle_plan(&args),
        Commands::Simulate {
            plan,
            frames,
            reconfigure,
            reject_format,
            latency_ms,
            delay_frames,
        } => {
            let behaviour = match session_behaviour(&reject_format, latency_ms, delay_frames) {
                Ok(b) => b,
                Err(e) => exit_with(e),
            };
            handle_simulate(&plan, frames, &reconfigure, behaviour)
        }
        Commands::InitConfig => {
            handle_init_config();
            Ok(())
        }
    };

    if let Err(e) = result {
        exit_with(e);
    }
}

/// Print an error and exit; engine errors with their own exit status keep it
fn exit_with(e: anyhow::Error) -> ! {
    let code = e
        .downcast_ref::<EngineError>()
        .and_then(EngineError::exit_code)
        .unwrap_or(1);
    if code == 0 {
        println!("{}", e);
    } else {
        eprintln!("Error: {:#}", e);
    }
    process::exit(code);
}

fn load_config() -> config::Config {
    config::Config::load().unwrap_or_else(|e| {
        tracing::warn!("Using default configuration: {:#}", e);
        config::Config::default()
    })
}

fn make_catalog(arg: Option<CatalogArg>, cfg: &config::Config) -> SimulatedCatalog {
    match arg.map(CatalogKind::from).unwrap_or(cfg.defaults.catalog) {
        CatalogKind::Builtin => SimulatedCatalog::builtin(),
        CatalogKind::Ffmpeg => {
            match hardware::ffmpeg_version() {
                Ok(version) => tracing::info!("Probing encoders of {}", version),
                Err(e) => tracing::warn!("{:#}", e),
            }
            SimulatedCatalog::from_ffmpeg()
        }
    }
}

fn handle_codecs(catalog: Option<CatalogArg>, all: bool) -> Result<()> {
    let cfg = load_config();
    let catalog = make_catalog(catalog, &cfg);
    let vendor = if all {
        hardware::GpuVendor::Unknown
    } else {
        let (vendor, model) = hardware::detect_gpu();
        match model {
            Some(model) => println!("GPU: {} ({})", vendor.name(), model),
            None => println!("GPU: {}", vendor.name()),
        }
        vendor
    };

    println!("Supported codecs (by priority, * = default encoder):");
    for profile in engine::registry().by_priority() {
        let default = catalog.default_encoder(profile.codec).map(|e| e.name);
        let encoders: Vec<String> = catalog
            .encoders()
            .into_iter()
            .filter(|e| e.codec == profile.codec && vendor.can_run(e))
            .map(|e| {
                if default.as_deref() == Some(e.name.as_str()) {
                    format!("{}*", e.name)
                } else {
                    e.name
                }
            })
            .collect();
        let listed = if encoders.is_empty() {
            "(no encoder available)".to_string()
        } else {
            encoders.join(", ")
        };
        println!("  {:<7} {}", profile.codec.name(), listed);
    }
    Ok(())
}

fn handle_encoder_help(name: &str, catalog: Option<CatalogArg>) -> Result<()> {
    let cfg = load_config();
    let catalog = make_catalog(catalog, &cfg);
    let info = catalog
        .find_encoder(name)
        .ok_or_else(|| EngineError::EncoderNotFound(name.to_string()))?;
    let family = engine::EncoderFamily::from_encoder_name(&info.name);
    let caps = info.capabilities;

    println!("{} - {}", info.name, info.description);
    println!("  Codec:         {}", info.codec);
    println!("  Family:        {}", family.display_name());
    println!(
        "  Threading:     frame={} slice={} other={}",
        caps.frame_threads, caps.slice_threads, caps.other_threads
    );
    println!(
        "  Hardware:      {}{}",
        caps.hardware,
        if caps.experimental { " (experimental)" } else { "" }
    );
    println!("  Pixel formats: {}", format_list(&info.pixel_formats));

    let notes = family.notes();
    if !notes.is_empty() {
        println!("\nLow-latency defaults:");
        for note in notes {
            println!("  - {}", note);
        }
    }
    Ok(())
}

/// Request and stream description shared by `plan` and `simulate`. `None` means the
/// user asked for help and it has been printed.
fn plan_inputs(
    args: &PlanArgs,
    cfg: &config::Config,
) -> Result<Option<(CompressionRequest, StreamDescription)>> {
    let config_string = args.config.as_deref().unwrap_or(&cfg.defaults.config);
    let request = CompressionRequest::parse(config_string)
        .with_context(|| format!("Invalid configuration \"{}\"", config_string))?;
    if request.show_help {
        print!("{}", engine::usage());
        return Ok(None);
    }

    let (width, height) = parse_size(&args.size)
        .with_context(|| format!("Invalid frame size \"{}\" (expected WIDTHxHEIGHT)", args.size))?;
    if args.fps.is_nan() || args.fps <= 0.0 {
        bail!("Frame rate must be positive, got {}", args.fps);
    }
    let source_name = args.source.as_deref().unwrap_or(&cfg.defaults.source);
    let source = SourceFormat::from_name(source_name)
        .with_context(|| format!("Unknown source format \"{}\"", source_name))?;

    let mut desc = StreamDescription::new(width, height, args.fps, source);
    if args.interlaced {
        desc.interlacing = engine::Interlacing::InterlacedMerged;
    }
    Ok(Some((request, desc)))
}

fn build_pipeline(
    catalog: SimulatedCatalog,
    request: CompressionRequest,
    engine_params: EngineParams,
) -> EncodePipeline {
    EncodePipeline::new(
        Box::new(catalog),
        Box::new(SimulatedConverter::new()),
        request,
        engine_params,
    )
    .with_hw_allocator(Box::new(SimulatedHwAllocator::new()))
}

#[derive(Serialize)]
struct PlanReport<'a> {
    encoder: &'a str,
    codec: Codec,
    family: &'static str,
    pix_fmt: PixelFormat,
    sw_format: PixelFormat,
    conversion: String,
    settings: &'a EncoderSettings,
    ffmpeg_command: String,
}

/// Encode one frame, dropping it on recoverable errors. Only fatal errors propagate.
fn encode_or_drop(
    pipeline: &mut EncodePipeline,
    frame: &RawFrame,
    index: u64,
) -> std::result::Result<Option<CompressedFrame>, FrameDropped> {
    match pipeline.compress_frame(frame) {
        Ok(compressed) => Ok(compressed),
        Err(e) if e.is_fatal() => Err(FrameDropped::Fatal(e)),
        Err(e) => {
            tracing::warn!("Frame {} dropped: {}", index, e);
            Err(FrameDropped::Recoverable)
        }
    }
}

enum FrameDropped {
    Recoverable,
    Fatal(EngineError),
}

fn describe_path(path: ConversionPath) -> String {
    match path {
        ConversionPath::Direct => "direct".to_string(),
        ConversionPath::Fallback { convert_to } => format!("via {} (generic reformat)", convert_to),
    }
}

fn handle_plan(args: &PlanArgs) -> Result<()> {
    let cfg = load_config();
    let Some((request, desc)) = plan_inputs(args, &cfg)? else {
        return Ok(());
    };
    let catalog = make_catalog(args.catalog, &cfg);
    let mut pipeline = build_pipeline(catalog, request, cfg.engine.clone());
    let active = pipeline.prepare(&desc)?;

    let settings = &active.settings;
    let report = PlanReport {
        encoder: &active.selected.info.name,
        codec: active.selected.codec,
        family: active.selected.family.display_name(),
        pix_fmt: active.format,
        sw_format: active.sw_format,
        conversion: describe_path(active.path),
        settings,
        ffmpeg_command: engine::format_command("ffmpeg", &settings.to_ffmpeg_args()),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Stream:        {}x{} @ {} fps, {}", desc.width, desc.height, desc.fps, desc.source);
    println!("Encoder:       {} ({}, {})", report.encoder, report.codec, report.family);
    println!("Pixel format:  {} ({})", report.pix_fmt, report.conversion);
    if report.sw_format != report.pix_fmt {
        println!("Upload from:   {}", report.sw_format);
    }
    if let Some(rc) = settings.rate_control {
        println!("Rate control:  {:?}", rc);
    }
    println!(
        "Threads:       {:?} x {}",
        settings.thread_type,
        settings
            .thread_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "auto".to_string())
    );
    if !settings.options.is_empty() {
        println!("Options:");
        for (key, value) in &settings.options {
            println!("  {} = {}", key, value);
        }
    }
    println!("\n{}", report.ffmpeg_command);
    Ok(())
}

fn session_behaviour(
    reject_format: &[String],
    latency_ms: u64,
    delay_frames: usize,
) -> Result<SessionBehaviour> {
    let rejected_formats = reject_format
        .iter()
        .map(|name| {
            PixelFormat::from_name(name).with_context(|| format!("Unknown pixel format \"{}\"", name))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(SessionBehaviour {
        rejected_formats,
        latency: Duration::from_millis(latency_ms),
        delay_frames,
        ..Default::default()
    })
}

fn handle_simulate(
    args: &PlanArgs,
    frames: u64,
    reconfigure: &[String],
    behaviour: SessionBehaviour,
) -> Result<()> {
    let cfg = load_config();
    let Some((request, desc)) = plan_inputs(args, &cfg)? else {
        return Ok(());
    };

    let mut schedule = reconfigure
        .iter()
        .map(|spec| {
            parse_reconfigure(spec)
                .with_context(|| format!("Invalid reconfiguration \"{}\" (expected FRAME=CONFIG)", spec))
        })
        .collect::<Result<Vec<_>>>()?;
    schedule.sort_by_key(|(frame, _)| *frame);

    let catalog = make_catalog(args.catalog, &cfg).with_behaviour(behaviour);
    let mut pipeline = build_pipeline(catalog, request, cfg.engine.clone());
    let handle = pipeline.handle();
    let frame = RawFrame {
        desc,
        data: vec![0x80; desc.source.frame_size(desc.width, desc.height)],
    };

    let mut pending: Vec<(u64, String, Receiver<ReconfigResponse>)> = Vec::new();
    let mut outputs = 0u64;
    let mut dropped = 0u64;
    let mut bytes = 0usize;
    let mut encoder = String::new();

    for index in 0..frames {
        for (_, config) in schedule.iter().filter(|(at, _)| *at == index) {
            pending.push((index, config.clone(), handle.post(config.as_str())));
        }

        let compressed = match encode_or_drop(&mut pipeline, &frame, index) {
            Ok(compressed) => compressed,
            Err(FrameDropped::Fatal(e)) => return Err(e.into()),
            Err(FrameDropped::Recoverable) => {
                dropped += 1;
                None
            }
        };
        if let Some(active) = pipeline.active() {
            if active.selected.info.name != encoder {
                encoder = active.selected.info.name.clone();
                println!(
                    "frame {:>5}: {} with {} ({})",
                    index,
                    encoder,
                    active.format,
                    describe_path(active.path)
                );
            }
        }

        pending.retain(|(at, config, reply)| match reply.try_recv() {
            Ok(response) => {
                println!("frame {:>5}: reconfigure \"{}\" (posted at {}) -> {:?}", index, config, at, response);
                false
            }
            Err(_) => true,
        });

        if let Some(out) = compressed {
            outputs += 1;
            bytes += out.data.len();
        }
        if let Some(report) = pipeline.take_report() {
            println!(
                "frame {:>5}: average {:.3} ms exceeds {:.3} ms per frame",
                index,
                report.average.as_secs_f64() * 1000.0,
                report.budget.as_secs_f64() * 1000.0
            );
            for hint in report.hint.iter().chain(report.conversion_hint.iter()) {
                println!("             hint: {}", hint);
            }
        }
    }

    pipeline.teardown();
    println!(
        "\n{} frames in, {} compressed frames out, {} dropped, {} bytes total",
        frames, outputs, dropped, bytes
    );
    Ok(())
}

fn handle_init_config() {
    match config::Config::load() {
        Ok(cfg) => {
            match config::Config::config_path() {
                Ok(path) => println!("Config loaded successfully from {}", path.display()),
                Err(e) => println!("Config loaded, but config path unknown: {:#}", e),
            }
            match toml::to_string_pretty(&cfg) {
                Ok(contents) => println!("\n{}", contents),
                Err(_) => println!("{:#?}", cfg),
            }
        }
        Err(e) => {
            println!("Config missing or invalid: {:#}", e);
            println!("Creating default config...");

            let cfg = config::Config::default();
            if let Err(err) = cfg.save() {
                eprintln!("Failed to save default config: {:#}", err);
                process::exit(1);
            } else {
                match config::Config::config_path() {
                    Ok(path) => println!("Default config saved to {}", path.display()),
                    Err(e) => println!("Default config saved (path unknown): {:#}", e),
                }
            }
        }
    }
}
