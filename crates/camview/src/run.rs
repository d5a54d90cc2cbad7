use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use camconfig::PipelineConfig;
use camrender::sim::{SimCamera, SimGpu, SimHardware};
use camrender::{find_optimal_buffer_size, CameraPipeline, DisplayTarget, PipelineSignal};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::cli::{NegotiateArgs, RunArgs};
use crate::paths::AppPaths;

const DISPLAY_WINDOW_ID: u64 = 0;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub opens: Vec<String>,
    pub capture_size: Option<String>,
    pub frames_delivered: u64,
    pub frames_drawn: u64,
    pub fps_reports: Vec<u32>,
    pub failures: Vec<String>,
    pub final_state: Option<String>,
    pub leaked_resources: usize,
}

impl RunSummary {
    fn record(&mut self, signal: PipelineSignal) {
        match signal {
            PipelineSignal::Fps(count) => {
                tracing::info!(fps = count, "preview rate");
                self.fps_reports.push(count);
            }
            PipelineSignal::StateChanged(state) => {
                tracing::debug!(?state, "capture state changed");
                self.final_state = Some(format!("{state:?}"));
            }
            PipelineSignal::CameraFailure(failure) => {
                tracing::warn!(%failure, "camera failure");
                self.failures.push(failure.to_string());
            }
            PipelineSignal::ConfigureFailed => {
                tracing::warn!("capture session configuration failed");
                self.failures.push("capture session configuration failed".into());
            }
            PipelineSignal::Fatal(message) => {
                tracing::error!(%message, "render loop stopped");
                self.failures.push(message);
            }
            PipelineSignal::Stopped => tracing::debug!("render loop stopped"),
        }
    }
}

pub fn load_config(explicit: Option<&Path>) -> Result<PipelineConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = AppPaths::discover()?.config_file();
            if !path.exists() {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                return Ok(PipelineConfig::default());
            }
            path
        }
    };

    let text = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config = PipelineConfig::from_toml_str(&text)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    tracing::info!(path = %path.display(), "loaded pipeline config");
    Ok(config)
}

fn apply_overrides(config: &mut PipelineConfig, args: &RunArgs) -> Result<()> {
    if let Some(size) = args.size {
        config.capture.width = size.width;
        config.capture.height = size.height;
    }
    if let Some(camera) = args.camera {
        config.capture.camera = camera;
    }
    if let Some(fps) = args.fps {
        config.capture.fps = fps;
    }
    config.validate().context("invalid command line overrides")?;
    Ok(())
}

pub fn run(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&mut config, &args)?;

    let mut hardware = SimHardware::new();
    if !args.sizes.is_empty() {
        hardware = hardware.with_output_sizes(args.sizes.clone());
    }
    if args.deny_permission {
        hardware = hardware.deny_permission();
    }

    let mut options = config.to_pipeline_options();
    options.permission_granted = true;
    tracing::info!(
        size = %options.capture_size,
        camera = %options.identity,
        pacing = ?options.pacing,
        "starting preview"
    );

    let pipeline: CameraPipeline<SimGpu, SimCamera> =
        CameraPipeline::spawn(options, hardware.factory()).context("failed to start render loop")?;

    let mut summary = RunSummary::default();
    let outcome = drive(&pipeline, &hardware, &args, &mut summary);

    pipeline.release();
    let signals = pipeline.signals().clone();
    pipeline.join().context("render loop did not shut down cleanly")?;
    for signal in signals.try_iter() {
        summary.record(signal);
    }
    outcome?;

    let gpu = hardware.gpu_report();
    let camera = hardware.camera_report();
    summary.opens = camera.opens.iter().map(ToString::to_string).collect();
    summary.capture_size = gpu.producer_sizes.last().map(ToString::to_string);
    summary.frames_delivered = camera.frames_delivered;
    summary.frames_drawn = gpu.draws;
    summary.leaked_resources = gpu.live_surfaces
        + gpu.live_textures
        + gpu.live_programs
        + gpu.live_framebuffers
        + gpu.live_producers
        + camera.open_devices
        + camera.live_sessions;

    if summary.leaked_resources > 0 {
        tracing::warn!(count = summary.leaked_resources, "resources left alive after release");
    }
    print_summary(&summary, args.json)?;

    if gpu.contexts_created > 0 && gpu.contexts_destroyed == 0 {
        bail!("graphics context was not destroyed");
    }
    Ok(())
}

fn drive(
    pipeline: &CameraPipeline<SimGpu, SimCamera>,
    hardware: &SimHardware,
    args: &RunArgs,
    summary: &mut RunSummary,
) -> Result<()> {
    let target = DisplayTarget::new(
        hardware.window(DISPLAY_WINDOW_ID),
        args.display.width,
        args.display.height,
    )
    .with_rotation(args.rotation);
    pipeline.set_display_target(Some(target));
    pipeline.open_camera(None);
    pipeline.start_preview();
    pipeline.wait_idle()?;

    let interval = Duration::from_millis(args.frame_interval_ms);
    for frame in 0..args.frames {
        if args.switch_after == Some(frame) {
            tracing::info!(frame, "switching camera");
            pipeline.switch_camera();
            pipeline.wait_idle()?;
        }

        hardware.pump_frames(1);
        pipeline.wait_idle()?;
        for signal in pipeline.signals().try_iter() {
            summary.record(signal);
        }

        if !pipeline.is_alive() {
            bail!("render loop exited before the preview finished");
        }
        if !interval.is_zero() {
            thread::sleep(interval);
        }
    }
    Ok(())
}

fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("Cameras opened: {}", summary.opens.join(", "));
    match &summary.capture_size {
        Some(size) => println!("Capture size: {size}"),
        None => println!("Capture size: (never configured)"),
    }
    println!(
        "Frames: {} delivered, {} drawn",
        summary.frames_delivered, summary.frames_drawn
    );
    if !summary.fps_reports.is_empty() {
        let reports: Vec<String> = summary.fps_reports.iter().map(u32::to_string).collect();
        println!("FPS reports: {}", reports.join(" "));
    }
    for failure in &summary.failures {
        println!("Failure: {failure}");
    }
    if let Some(state) = &summary.final_state {
        println!("Final state: {state}");
    }
    println!("Leaked resources: {}", summary.leaked_resources);
    Ok(())
}

#[derive(Debug, Serialize)]
struct Negotiation {
    requested: String,
    advertised: Vec<String>,
    selected: String,
}

pub fn negotiate(args: NegotiateArgs) -> Result<()> {
    let selected = find_optimal_buffer_size(args.requested, &args.sizes);
    if args.json {
        let negotiation = Negotiation {
            requested: args.requested.to_string(),
            advertised: args.sizes.iter().map(ToString::to_string).collect(),
            selected: selected.to_string(),
        };
        println!("{}", serde_json::to_string_pretty(&negotiation)?);
    } else {
        println!("{selected}");
    }
    Ok(())
}

pub fn print_paths() -> Result<()> {
    let paths = AppPaths::discover()?;
    println!("Config directory: {}", paths.config_dir().display());
    println!("Config file: {}", paths.config_file().display());
    Ok(())
}
