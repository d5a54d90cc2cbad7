pub mod backend;
pub mod buffer_size;
pub mod pacing;
pub mod session;

pub use backend::{
    CameraBackend, CameraCharacteristics, CameraEvent, CameraEventSink, DeviceId, RequestTemplate,
    SessionId,
};
pub use buffer_size::find_optimal_buffer_size;
pub use pacing::CapturePacing;
pub use session::{
    CaptureSession, CaptureSessionState, CloseIntent, PreviewTargets, ScheduledCapture,
    SessionOutcome,
};
