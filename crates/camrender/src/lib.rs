//! Camera preview pipeline: capture frames from a camera device into an
//! external GPU texture and draw them, center-cropped, into a display surface.
//!
//! The overall flow is:
//!
//! ```text
//!   UI thread                       render loop thread
//!   ─────────                       ──────────────────────────────────────────
//!   CameraPipeline::open_camera ──▶ CaptureSession ──▶ CameraBackend::open
//!   CameraPipeline::start_preview   │                      │ CameraEvent (posted)
//!                                   ▼                      ▼
//!                                 FrameSink ◀── camera writes latest image
//!                                   │ latest_frame()
//!                                   ▼
//!                                 TextureProgram::draw_viewport_fit ─▶ display surface
//! ```
//!
//! Everything GPU- or camera-related runs on the single [`RenderLoop`] worker
//! owned by a [`CameraPipeline`]; callers only post requests. The platform
//! APIs sit behind [`EglPlatform`], [`Gles`] and [`CameraBackend`] so the
//! core is hardware-agnostic. The `sim` feature provides an in-process
//! implementation of all three.

pub mod camera;
pub mod error;
pub mod fps;
pub mod frame_sink;
pub mod gpu;
pub mod pipeline;
pub mod render_loop;
#[cfg(feature = "sim")]
pub mod sim;
pub mod types;

pub use camera::{
    find_optimal_buffer_size, CameraBackend, CameraCharacteristics, CameraEvent, CameraEventSink,
    CapturePacing, CaptureSession, CaptureSessionState, CloseIntent,
};
pub use error::{CameraFailure, GraphicsError, LoopError, PlatformError};
pub use fps::{FpsCounter, FramePacer};
pub use frame_sink::FrameSink;
pub use gpu::{center_crop, EglPlatform, Gles, GpuBackend, GraphicsContext, TextureProgram};
pub use pipeline::{CameraPipeline, PipelineOptions, PipelineSignal, DEFAULT_THREAD_NAME};
pub use render_loop::{Lifecycle, LoopHandle, RenderLoop};
pub use types::{
    BufferSize, CameraIdentity, DisplayTarget, NativeWindow, Rotation, DEFAULT_CAPTURE_SIZE,
};
