use crate::gpu::SurfaceSlot;

/// A platform (EGL/GLES) call that reported failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{call} failed (0x{code:04x})")]
pub struct PlatformError {
    pub call: &'static str,
    pub code: u32,
}

impl PlatformError {
    pub fn new(call: &'static str, code: u32) -> Self {
        Self { call, code }
    }
}

/// Unrecoverable graphics failures. Any of these stops the pipeline from
/// rendering further frames.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GraphicsError {
    #[error("unable to initialise the display: {0}")]
    DisplayInit(#[source] PlatformError),
    #[error("no RGBA8888 config renders GL version {0}")]
    NoConfig(u32),
    #[error("unable to create rendering context: {0}")]
    ContextCreation(#[source] PlatformError),
    #[error("unable to create {slot:?} surface: {source}")]
    SurfaceCreation {
        slot: SurfaceSlot,
        #[source]
        source: PlatformError,
    },
    #[error("{0:?} surface already created and not yet released")]
    SlotOccupied(SurfaceSlot),
    #[error("{0:?} surface has not been created")]
    NoSurface(SurfaceSlot),
    #[error("rendering context is not current")]
    NotCurrent,
    #[error("unable to link texture program: {0}")]
    ProgramLink(#[source] PlatformError),
    #[error("rendering context used after it was destroyed")]
    Destroyed,
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Recoverable camera failures. They never cross the worker boundary as
/// errors; the pipeline reports them as signals and reverts its state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraFailure {
    #[error("camera permission has not been granted")]
    PermissionDenied,
    #[error("camera device disconnected")]
    Disconnected,
    #[error("camera device error {0}")]
    Device(i32),
    #[error("capture session could not be configured")]
    ConfigureFailed,
    #[error("camera backend error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("failed to spawn render loop thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("render loop failed to start: {0}")]
    Startup(String),
    #[error("render loop is no longer running")]
    Disconnected,
    #[error("render loop thread panicked")]
    Panicked,
}
