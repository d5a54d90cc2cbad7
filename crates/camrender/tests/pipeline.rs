#![cfg(feature = "sim")]

use std::thread;
use std::time::Duration;

use camrender::sim::{SimCamera, SimGpu, SimHardware};
use camrender::{
    BufferSize, CameraFailure, CameraIdentity, CameraPipeline, CapturePacing, CaptureSessionState,
    DisplayTarget, LoopError, PipelineOptions, PipelineSignal, Rotation,
};

type SimPipeline = CameraPipeline<SimGpu, SimCamera>;

fn options(width: u32, height: u32) -> PipelineOptions {
    PipelineOptions {
        capture_size: BufferSize::new(width, height),
        permission_granted: true,
        ..PipelineOptions::default()
    }
}

fn spawn(hardware: &SimHardware, options: PipelineOptions) -> SimPipeline {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    CameraPipeline::spawn(options, hardware.factory()).unwrap()
}

fn display(hardware: &SimHardware, id: u64) -> DisplayTarget {
    DisplayTarget::new(hardware.window(id), 720, 1280)
}

fn preview(hardware: &SimHardware, options: PipelineOptions) -> SimPipeline {
    let pipeline = spawn(hardware, options);
    pipeline.set_display_target(Some(display(hardware, 1)));
    pipeline.open_camera(None);
    pipeline.start_preview();
    pipeline.wait_idle().unwrap();
    pipeline
}

fn pump(hardware: &SimHardware, pipeline: &SimPipeline, frames: usize) {
    for _ in 0..frames {
        hardware.pump_frames(1);
        pipeline.wait_idle().unwrap();
    }
}

fn drain(pipeline: &SimPipeline) -> Vec<PipelineSignal> {
    pipeline.signals().try_iter().collect()
}

fn last_state(signals: &[PipelineSignal]) -> Option<CaptureSessionState> {
    signals.iter().rev().find_map(|signal| match signal {
        PipelineSignal::StateChanged(state) => Some(*state),
        _ => None,
    })
}

#[test]
fn selects_exact_advertised_size() {
    let hardware = SimHardware::new();
    let pipeline = preview(&hardware, options(1280, 720));
    assert_eq!(hardware.gpu_report().producer_sizes, vec![BufferSize::new(1280, 720)]);
    pipeline.release();
    pipeline.join().unwrap();
}

#[test]
fn selects_smallest_covering_size() {
    let hardware = SimHardware::new()
        .with_output_sizes(vec![BufferSize::new(640, 480), BufferSize::new(1920, 1080)]);
    let pipeline = preview(&hardware, options(1280, 720));
    assert_eq!(hardware.gpu_report().producer_sizes, vec![BufferSize::new(1920, 1080)]);
    pipeline.release();
    pipeline.join().unwrap();
}

#[test]
fn preview_draws_latest_frame_into_display() {
    let hardware = SimHardware::new();
    let pipeline = preview(&hardware, options(1280, 720));
    assert_eq!(last_state(&drain(&pipeline)), Some(CaptureSessionState::Capturing));

    pump(&hardware, &pipeline, 3);
    let report = hardware.gpu_report();
    assert_eq!(report.draws_by_window.get(&1), Some(&3));
    assert_eq!(report.swaps, 3);
    assert!(report.violations.is_empty(), "{:?}", report.violations);
    pipeline.release();
    pipeline.join().unwrap();
}

#[test]
fn restarting_preview_keeps_device_open() {
    let hardware = SimHardware::new();
    let pipeline = preview(&hardware, options(1280, 720));
    pipeline.stop_capture(false, false);
    pipeline.start_preview();
    pipeline.wait_idle().unwrap();

    let camera = hardware.camera_report();
    assert_eq!(camera.opens, vec![CameraIdentity::Back]);
    assert_eq!(camera.device_closes, 0);
    assert_eq!(camera.sessions_created, 2);
    assert_eq!(last_state(&drain(&pipeline)), Some(CaptureSessionState::Capturing));

    pump(&hardware, &pipeline, 1);
    assert_eq!(hardware.gpu_report().draws_by_window.get(&1), Some(&1));
    pipeline.release();
    pipeline.join().unwrap();
}

#[test]
fn switching_toggles_identity_with_one_reopen_each_time() {
    let hardware = SimHardware::new();
    let pipeline = preview(&hardware, options(1280, 720));

    pipeline.switch_camera();
    pipeline.wait_idle().unwrap();
    let camera = hardware.camera_report();
    assert_eq!(camera.opens, vec![CameraIdentity::Back, CameraIdentity::Front]);
    assert_eq!(camera.device_closes, 1);
    assert_eq!(camera.open_devices, 1);
    assert_eq!(last_state(&drain(&pipeline)), Some(CaptureSessionState::Capturing));

    pipeline.switch_camera();
    pipeline.wait_idle().unwrap();
    let camera = hardware.camera_report();
    assert_eq!(
        camera.opens,
        vec![CameraIdentity::Back, CameraIdentity::Front, CameraIdentity::Back]
    );
    assert_eq!(camera.device_closes, 2);

    pump(&hardware, &pipeline, 2);
    let report = hardware.gpu_report();
    assert_eq!(report.draws_by_window.get(&1), Some(&2));
    // one producer per session, old ones released on close
    assert_eq!(report.live_producers, 1);
    pipeline.release();
    pipeline.join().unwrap();
}

#[test]
fn configure_while_capturing_is_ignored() {
    let hardware = SimHardware::new();
    let pipeline = preview(&hardware, options(1280, 720));
    pipeline.configure(1920, 1080);
    pipeline.stop_capture(false, false);
    pipeline.start_preview();
    pipeline.wait_idle().unwrap();
    assert_eq!(
        hardware.gpu_report().producer_sizes,
        vec![BufferSize::new(1280, 720), BufferSize::new(1280, 720)]
    );

    // once stopped, the new size applies to the next preview
    pipeline.stop_capture(false, false);
    pipeline.wait_idle().unwrap();
    pipeline.configure(1920, 1080);
    pipeline.start_preview();
    pipeline.wait_idle().unwrap();
    assert_eq!(
        hardware.gpu_report().producer_sizes.last(),
        Some(&BufferSize::new(1920, 1080))
    );
    pipeline.release();
    pipeline.join().unwrap();
}

#[test]
fn latest_display_target_wins_and_none_drops_frames() {
    let hardware = SimHardware::new();
    let pipeline = preview(&hardware, options(1280, 720));
    pump(&hardware, &pipeline, 1);

    pipeline.set_display_target(Some(display(&hardware, 2)));
    pump(&hardware, &pipeline, 2);
    let report = hardware.gpu_report();
    assert_eq!(report.draws_by_window.get(&1), Some(&1));
    assert_eq!(report.draws_by_window.get(&2), Some(&2));
    // the first window's surface was released when it was replaced
    assert_eq!(report.live_surfaces, 2);

    pipeline.set_display_target(None);
    pump(&hardware, &pipeline, 2);
    let report = hardware.gpu_report();
    assert_eq!(report.draws, 3);
    assert_eq!(report.live_surfaces, 1);
    assert_eq!(report.images_dropped, 0);
    assert!(!drain(&pipeline)
        .iter()
        .any(|signal| matches!(signal, PipelineSignal::Fatal(_))));
    pipeline.release();
    pipeline.join().unwrap();
}

#[test]
fn rotation_drives_mvp_and_crop() {
    let hardware = SimHardware::new();
    let pipeline = preview(&hardware, options(1280, 720));
    let target = DisplayTarget::new(hardware.window(1), 1280, 720).with_rotation(Rotation::Deg90);
    pipeline.set_display_target(Some(target));
    pump(&hardware, &pipeline, 1);
    let draw = hardware.gpu_report().last_draw.expect("frame drawn");
    assert_eq!(draw.viewport.width, 1280);
    assert!(draw.mvp[0].abs() < 1e-6);
    assert!((draw.mvp[1] - 1.0).abs() < 1e-6);
    assert_eq!(draw.tex_coords, camrender::gpu::TexCoords::FULL);
    pipeline.release();
    pipeline.join().unwrap();
}

#[test]
fn release_twice_destroys_context_once() {
    let hardware = SimHardware::new();
    let pipeline = preview(&hardware, options(1280, 720));
    let signals = pipeline.signals().clone();
    pipeline.release();
    pipeline.release();
    pipeline.join().unwrap();

    let gpu = hardware.gpu_report();
    assert_eq!(gpu.contexts_created, 1);
    assert_eq!(gpu.contexts_destroyed, 1);
    assert_eq!(gpu.terminations, 1);
    assert_eq!(gpu.live_surfaces, 0);
    assert_eq!(gpu.live_programs, 0);
    assert_eq!(gpu.live_textures, 0);
    assert_eq!(gpu.live_producers, 0);
    assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);

    let camera = hardware.camera_report();
    assert_eq!(camera.open_devices, 0);
    assert_eq!(camera.live_sessions, 0);

    let stopped = signals
        .try_iter()
        .filter(|signal| *signal == PipelineSignal::Stopped)
        .count();
    assert_eq!(stopped, 1);
}

#[test]
fn quit_twice_tears_down_once_and_closes_camera() {
    let hardware = SimHardware::new();
    let pipeline = preview(&hardware, options(1280, 720));
    pipeline.quit();
    pipeline.quit();
    assert!(!pipeline.is_alive());
    pipeline.set_display_target(Some(display(&hardware, 3)));
    pipeline.join().unwrap();

    let gpu = hardware.gpu_report();
    assert_eq!(gpu.contexts_destroyed, 1);
    assert_eq!(gpu.terminations, 1);
    assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);
    assert_eq!(hardware.camera_report().open_devices, 0);
}

#[test]
fn dropping_the_pipeline_tears_down() {
    let hardware = SimHardware::new();
    let pipeline = preview(&hardware, options(1280, 720));
    drop(pipeline);
    assert_eq!(hardware.gpu_report().contexts_destroyed, 1);
    assert_eq!(hardware.camera_report().open_devices, 0);
}

#[test]
fn permission_must_be_granted_before_open() {
    let hardware = SimHardware::new();
    let pipeline = spawn(
        &hardware,
        PipelineOptions {
            permission_granted: false,
            ..PipelineOptions::default()
        },
    );
    pipeline.open_camera(Some(CameraIdentity::Front));
    pipeline.wait_idle().unwrap();
    assert!(drain(&pipeline)
        .contains(&PipelineSignal::CameraFailure(CameraFailure::PermissionDenied)));
    assert!(hardware.camera_report().opens.is_empty());

    pipeline.grant_permission(true);
    pipeline.open_camera(Some(CameraIdentity::Front));
    pipeline.wait_idle().unwrap();
    assert_eq!(hardware.camera_report().opens, vec![CameraIdentity::Front]);
    assert_eq!(last_state(&drain(&pipeline)), Some(CaptureSessionState::CameraOpen));
    pipeline.release();
    pipeline.join().unwrap();
}

#[test]
fn hardware_permission_refusal_is_reported() {
    let hardware = SimHardware::new().deny_permission();
    let pipeline = spawn(&hardware, options(640, 480));
    pipeline.open_camera(None);
    pipeline.wait_idle().unwrap();
    assert!(drain(&pipeline)
        .contains(&PipelineSignal::CameraFailure(CameraFailure::PermissionDenied)));
    pipeline.quit();
    pipeline.join().unwrap();
}

#[test]
fn disconnect_reverts_to_idle_until_reopened() {
    let hardware = SimHardware::new();
    let pipeline = preview(&hardware, options(1280, 720));
    pump(&hardware, &pipeline, 1);
    drain(&pipeline);

    hardware.disconnect();
    pipeline.wait_idle().unwrap();
    let signals = drain(&pipeline);
    assert!(signals.contains(&PipelineSignal::CameraFailure(CameraFailure::Disconnected)));
    assert_eq!(last_state(&signals), Some(CaptureSessionState::Idle));
    assert_eq!(hardware.pump_frames(1), 0);

    pipeline.open_camera(None);
    pipeline.start_preview();
    pipeline.wait_idle().unwrap();
    assert_eq!(last_state(&drain(&pipeline)), Some(CaptureSessionState::Capturing));
    pipeline.release();
    pipeline.join().unwrap();
}

#[test]
fn configure_failure_is_signalled_without_retry() {
    let hardware = SimHardware::new();
    let pipeline = spawn(&hardware, options(1280, 720));
    hardware.fail_next_configure();
    pipeline.open_camera(None);
    pipeline.start_preview();
    pipeline.wait_idle().unwrap();
    let signals = drain(&pipeline);
    assert!(signals.contains(&PipelineSignal::ConfigureFailed));
    assert_eq!(last_state(&signals), Some(CaptureSessionState::CameraOpen));
    assert_eq!(hardware.camera_report().sessions_created, 1);
    pipeline.release();
    pipeline.join().unwrap();
}

#[test]
fn pause_stops_frames_until_resumed() {
    let hardware = SimHardware::new();
    let pipeline = preview(&hardware, options(1280, 720));
    pump(&hardware, &pipeline, 1);

    pipeline.pause_capture();
    pipeline.wait_idle().unwrap();
    assert_eq!(hardware.pump_frames(1), 0);

    pipeline.resume_capture();
    pipeline.wait_idle().unwrap();
    pump(&hardware, &pipeline, 1);
    assert_eq!(hardware.gpu_report().draws, 2);
    pipeline.release();
    pipeline.join().unwrap();
}

#[test]
fn throttled_pacing_issues_single_captures() {
    let hardware = SimHardware::new();
    let pipeline = preview(
        &hardware,
        PipelineOptions {
            pacing: CapturePacing::Throttled { fps: 30 },
            ..options(1280, 720)
        },
    );
    thread::sleep(Duration::from_millis(250));
    pipeline.wait_idle().unwrap();
    let camera = hardware.camera_report();
    assert!(camera.captures >= 3, "captures {}", camera.captures);
    assert!(hardware.gpu_report().draws >= 2);

    pipeline.release();
    pipeline.join().unwrap();
    let after = hardware.camera_report().captures;
    thread::sleep(Duration::from_millis(100));
    assert_eq!(hardware.camera_report().captures, after);
}

#[test]
fn fps_is_reported_per_interval() {
    let hardware = SimHardware::new();
    let pipeline = preview(
        &hardware,
        PipelineOptions {
            fps_report_interval: Duration::from_millis(40),
            ..options(1280, 720)
        },
    );
    drain(&pipeline);
    for _ in 0..4 {
        pump(&hardware, &pipeline, 1);
        thread::sleep(Duration::from_millis(25));
    }
    let reports: Vec<u32> = drain(&pipeline)
        .into_iter()
        .filter_map(|signal| match signal {
            PipelineSignal::Fps(count) => Some(count),
            _ => None,
        })
        .collect();
    // four frames spread over more than one interval
    assert!(!reports.is_empty());
    pipeline.release();
    pipeline.join().unwrap();
}

#[test]
fn display_init_failure_aborts_start() {
    let hardware = SimHardware::new().fail_display_init();
    let result = CameraPipeline::spawn(options(640, 480), hardware.factory());
    assert!(matches!(result, Err(LoopError::Startup(_))));
}

fn fatal_and_fps(signals: &[PipelineSignal]) -> (usize, usize) {
    let fatal = signals
        .iter()
        .filter(|signal| matches!(signal, PipelineSignal::Fatal(_)))
        .count();
    let fps = signals
        .iter()
        .filter(|signal| matches!(signal, PipelineSignal::Fps(_)))
        .count();
    (fatal, fps)
}

#[test]
fn program_link_failure_stops_rendering() {
    let hardware = SimHardware::new().fail_program_link();
    let pipeline = preview(&hardware, options(1280, 720));
    pump(&hardware, &pipeline, 3);

    assert_eq!(fatal_and_fps(&drain(&pipeline)), (1, 0));
    assert_eq!(hardware.gpu_report().draws, 0);

    pipeline.release();
    pipeline.join().unwrap();
    let gpu = hardware.gpu_report();
    assert_eq!(gpu.contexts_destroyed, 1);
    assert_eq!(hardware.camera_report().open_devices, 0);
}

#[test]
fn draw_failure_latches_and_silences_fps() {
    let hardware = SimHardware::new();
    let pipeline = preview(
        &hardware,
        PipelineOptions {
            fps_report_interval: Duration::from_millis(1),
            ..options(1280, 720)
        },
    );
    for _ in 0..2 {
        pump(&hardware, &pipeline, 1);
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(hardware.gpu_report().draws, 2);
    drain(&pipeline);

    hardware.fail_draws();
    for _ in 0..3 {
        pump(&hardware, &pipeline, 1);
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(hardware.gpu_report().draws, 2);
    assert_eq!(fatal_and_fps(&drain(&pipeline)), (1, 0));

    pipeline.release();
    pipeline.join().unwrap();
    assert_eq!(hardware.gpu_report().live_programs, 0);
}
