//! Asynchronous camera subsystem interface. Requests return immediately and
//! their outcomes come back as [`CameraEvent`]s through a [`CameraEventSink`].

use std::fmt;
use std::sync::Arc;

use crate::error::CameraFailure;
use crate::gpu::ProducerId;
use crate::types::{BufferSize, CameraIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CameraCharacteristics {
    /// Output sizes for the preview-texture format, landscape oriented.
    pub output_sizes: Vec<BufferSize>,
    pub sensor_orientation: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraEvent {
    Opened {
        device: DeviceId,
        identity: CameraIdentity,
    },
    Disconnected {
        device: DeviceId,
    },
    Error {
        device: DeviceId,
        code: i32,
    },
    SessionConfigured {
        session: SessionId,
    },
    SessionConfigureFailed {
        session: SessionId,
    },
    SessionActive {
        session: SessionId,
    },
    SessionClosed {
        session: SessionId,
    },
    CaptureCompleted {
        session: SessionId,
        frame: u64,
    },
}

/// Kind of capture request submitted to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    Preview,
}

pub trait CameraBackend {
    fn characteristics(
        &mut self,
        identity: CameraIdentity,
    ) -> Result<CameraCharacteristics, CameraFailure>;
    /// Starts opening the device. Success arrives as `Opened`, failure as
    /// `Error` or `Disconnected`.
    fn open(&mut self, identity: CameraIdentity) -> Result<(), CameraFailure>;
    fn create_session(
        &mut self,
        device: DeviceId,
        targets: &[ProducerId],
    ) -> Result<SessionId, CameraFailure>;
    fn set_repeating_request(
        &mut self,
        session: SessionId,
        template: RequestTemplate,
    ) -> Result<(), CameraFailure>;
    fn stop_repeating(&mut self, session: SessionId) -> Result<(), CameraFailure>;
    fn capture(&mut self, session: SessionId, template: RequestTemplate)
        -> Result<(), CameraFailure>;
    fn abort_captures(&mut self, session: SessionId) -> Result<(), CameraFailure>;
    /// Starts closing the session. Completion arrives as `SessionClosed`.
    fn close_session(&mut self, session: SessionId);
    fn close_device(&mut self, device: DeviceId);
}

/// Delivery point for camera callbacks. Cloned into the backend; every event
/// is posted onto the render loop.
#[derive(Clone)]
pub struct CameraEventSink {
    deliver: Arc<dyn Fn(CameraEvent) -> bool + Send + Sync>,
}

impl CameraEventSink {
    /// `deliver` returns false once nobody is listening any more.
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(CameraEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Returns false when the event could not be delivered. A backend that
    /// fails to deliver `Opened` owns the device and must close it.
    pub fn send(&self, event: CameraEvent) -> bool {
        (self.deliver)(event)
    }
}

impl fmt::Debug for CameraEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraEventSink").finish_non_exhaustive()
    }
}
