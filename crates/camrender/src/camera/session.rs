//! Camera device and capture-session state machine.
//!
//! Everything here runs on the render loop. Requests to the backend return
//! immediately; their completions come back through [`CaptureSession::handle_event`].
//! Anything that must happen after an asynchronous close is carried in a
//! [`CloseIntent`] tied to the session being closed, and consumed by the
//! matching `SessionClosed` event only.

use std::time::Duration;

use crate::camera::backend::{CameraBackend, CameraEvent, DeviceId, RequestTemplate, SessionId};
use crate::camera::buffer_size::find_optimal_buffer_size;
use crate::camera::pacing::CapturePacing;
use crate::error::{CameraFailure, GraphicsError};
use crate::gpu::ProducerId;
use crate::types::{BufferSize, CameraIdentity, DEFAULT_CAPTURE_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureSessionState {
    #[default]
    Idle,
    CameraOpening,
    CameraOpen,
    SessionConfiguring,
    SessionConfigured,
    Capturing,
    Closing,
    Closed,
}

/// What to do once an asynchronous close completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CloseIntent {
    pub close_camera: bool,
    pub reopen_camera: bool,
    pub quit_loop: bool,
}

impl CloseIntent {
    fn merge(self, other: CloseIntent) -> CloseIntent {
        CloseIntent {
            close_camera: self.close_camera || other.close_camera,
            reopen_camera: self.reopen_camera || other.reopen_camera,
            quit_loop: self.quit_loop || other.quit_loop,
        }
    }
}

/// Output targets the session captures into. Implemented by the render side,
/// which owns the GPU objects.
pub trait PreviewTargets {
    /// Allocates capture targets at `size` and returns the producer to hand
    /// to the camera.
    fn prepare(&mut self, size: BufferSize) -> Result<ProducerId, GraphicsError>;
    /// Drops the targets allocated by `prepare`.
    fn release(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledCapture {
    pub delay: Duration,
    pub generation: u64,
}

/// Follow-up work for the owner of the session.
#[derive(Debug, Default)]
pub struct SessionOutcome {
    pub draw_frame: bool,
    pub quit_loop: bool,
    pub failure: Option<CameraFailure>,
    pub graphics_error: Option<GraphicsError>,
    pub schedule_capture: Option<ScheduledCapture>,
}

pub struct CaptureSession<C: CameraBackend> {
    backend: C,
    state: CaptureSessionState,
    identity: CameraIdentity,
    requested: BufferSize,
    output_sizes: Vec<BufferSize>,
    negotiated: BufferSize,
    device: Option<DeviceId>,
    session: Option<SessionId>,
    preview_pending: bool,
    pending_close: Option<(SessionId, CloseIntent)>,
    opening_intent: Option<CloseIntent>,
    pacing: CapturePacing,
    generation: u64,
    paused: bool,
    permission_granted: bool,
}

impl<C: CameraBackend> CaptureSession<C> {
    pub fn new(backend: C, identity: CameraIdentity, requested: BufferSize, pacing: CapturePacing) -> Self {
        Self {
            backend,
            state: CaptureSessionState::Idle,
            identity,
            requested,
            output_sizes: Vec::new(),
            negotiated: DEFAULT_CAPTURE_SIZE,
            device: None,
            session: None,
            preview_pending: false,
            pending_close: None,
            opening_intent: None,
            pacing,
            generation: 0,
            paused: false,
            permission_granted: false,
        }
    }

    pub fn state(&self) -> CaptureSessionState {
        self.state
    }

    pub fn identity(&self) -> CameraIdentity {
        self.identity
    }

    pub fn requested_size(&self) -> BufferSize {
        self.requested
    }

    pub fn negotiated_size(&self) -> BufferSize {
        self.negotiated
    }

    pub fn is_preview_pending(&self) -> bool {
        self.preview_pending
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session
    }

    pub fn backend(&self) -> &C {
        &self.backend
    }

    /// True from session configuration until the close request.
    pub fn is_capturing(&self) -> bool {
        matches!(
            self.state,
            CaptureSessionState::SessionConfiguring
                | CaptureSessionState::SessionConfigured
                | CaptureSessionState::Capturing
        )
    }

    pub fn grant_permission(&mut self, granted: bool) {
        self.permission_granted = granted;
    }

    /// Sets the desired capture size. Rejected while capturing.
    pub fn configure(&mut self, width: u32, height: u32) -> bool {
        if self.is_capturing() {
            tracing::warn!(width, height, current = %self.requested, "configure rejected while capturing");
            return false;
        }
        self.requested = BufferSize::new(width, height);
        if !self.output_sizes.is_empty() {
            self.negotiated = find_optimal_buffer_size(self.requested, &self.output_sizes);
        }
        tracing::debug!(requested = %self.requested, "capture size configured");
        true
    }

    pub fn open(&mut self, identity: Option<CameraIdentity>) -> SessionOutcome {
        let mut out = SessionOutcome::default();
        self.open_into(identity, &mut out);
        out
    }

    fn open_into(&mut self, identity: Option<CameraIdentity>, out: &mut SessionOutcome) {
        match self.state {
            CaptureSessionState::Idle | CaptureSessionState::Closed => {}
            CaptureSessionState::Closing => {
                self.queue_reopen(identity);
                return;
            }
            state => {
                tracing::debug!(?state, "camera already opening or open");
                return;
            }
        }
        if !self.permission_granted {
            tracing::warn!("camera permission not granted");
            self.state = CaptureSessionState::Idle;
            out.failure = Some(CameraFailure::PermissionDenied);
            return;
        }
        if let Some(identity) = identity {
            self.identity = identity;
        }
        match self.backend.characteristics(self.identity) {
            Ok(characteristics) => {
                self.output_sizes = characteristics.output_sizes;
                self.negotiated = find_optimal_buffer_size(self.requested, &self.output_sizes);
            }
            Err(failure) => {
                tracing::warn!(identity = %self.identity, %failure, "unable to query camera");
                self.state = CaptureSessionState::Idle;
                out.failure = Some(failure);
                return;
            }
        }
        match self.backend.open(self.identity) {
            Ok(()) => {
                tracing::debug!(identity = %self.identity, size = %self.negotiated, "opening camera");
                self.state = CaptureSessionState::CameraOpening;
            }
            Err(failure) => {
                tracing::warn!(identity = %self.identity, %failure, "unable to open camera");
                self.state = CaptureSessionState::Idle;
                out.failure = Some(failure);
            }
        }
    }

    /// An open requested while the device is about to be closed runs once
    /// the close has completed.
    fn queue_reopen(&mut self, identity: Option<CameraIdentity>) {
        match self.pending_close.as_mut() {
            Some((session, intent)) if intent.close_camera => {
                if let Some(identity) = identity {
                    self.identity = identity;
                }
                intent.reopen_camera = true;
                tracing::debug!(?session, identity = %self.identity, "open queued behind camera close");
            }
            _ => tracing::debug!("camera stays open after the pending close"),
        }
    }

    /// Starts preview now if the device is open, otherwise remembers the
    /// request until it is.
    pub fn start_preview(&mut self, targets: &mut dyn PreviewTargets) -> SessionOutcome {
        let mut out = SessionOutcome::default();
        match self.state {
            CaptureSessionState::CameraOpen => self.configure_session(targets, &mut out),
            CaptureSessionState::Idle
            | CaptureSessionState::Closed
            | CaptureSessionState::CameraOpening
            | CaptureSessionState::Closing => {
                tracing::debug!(state = ?self.state, "preview deferred until camera is open");
                self.preview_pending = true;
            }
            _ => tracing::debug!("preview already running"),
        }
        out
    }

    fn configure_session(&mut self, targets: &mut dyn PreviewTargets, out: &mut SessionOutcome) {
        let Some(device) = self.device else {
            return;
        };
        self.preview_pending = false;
        let producer = match targets.prepare(self.negotiated) {
            Ok(producer) => producer,
            Err(err) => {
                out.graphics_error = Some(err);
                return;
            }
        };
        match self.backend.create_session(device, &[producer]) {
            Ok(session) => {
                tracing::debug!(?session, size = %self.negotiated, "configuring capture session");
                self.session = Some(session);
                self.paused = false;
                self.state = CaptureSessionState::SessionConfiguring;
            }
            Err(failure) => {
                tracing::warn!(%failure, "unable to create capture session");
                targets.release();
                out.failure = Some(failure);
            }
        }
    }

    /// Stops capturing. What happens once the session has closed is decided by
    /// `close_camera` and `quit_loop`.
    pub fn stop_capture(&mut self, close_camera: bool, quit_loop: bool) -> SessionOutcome {
        let mut out = SessionOutcome::default();
        self.preview_pending = false;
        let intent = CloseIntent {
            close_camera,
            reopen_camera: false,
            quit_loop,
        };
        self.request_close(intent, &mut out);
        out
    }

    /// Toggles the lens. An open camera is closed and reopened with the new
    /// identity once its session close has been observed.
    pub fn switch_camera(&mut self) -> SessionOutcome {
        let mut out = SessionOutcome::default();
        let previous = self.identity;
        self.identity = previous.toggled();
        tracing::info!(from = %previous, to = %self.identity, "switching camera");
        // the reopened camera previews only if this one was
        if self.is_capturing() {
            self.preview_pending = true;
        }
        match self.state {
            CaptureSessionState::Idle | CaptureSessionState::Closed => {}
            _ => {
                let intent = CloseIntent {
                    close_camera: true,
                    reopen_camera: true,
                    quit_loop: false,
                };
                self.request_close(intent, &mut out);
            }
        }
        out
    }

    fn request_close(&mut self, intent: CloseIntent, out: &mut SessionOutcome) {
        match self.state {
            CaptureSessionState::Idle | CaptureSessionState::Closed => {
                if intent.quit_loop {
                    out.quit_loop = true;
                }
            }
            CaptureSessionState::CameraOpening => {
                let merged = match self.opening_intent {
                    Some(previous) => {
                        tracing::debug!(?previous, ?intent, "merging close requested while opening");
                        previous.merge(intent)
                    }
                    None => intent,
                };
                self.opening_intent = Some(merged);
            }
            CaptureSessionState::CameraOpen => self.apply_intent(intent, out),
            CaptureSessionState::SessionConfiguring
            | CaptureSessionState::SessionConfigured
            | CaptureSessionState::Capturing => {
                let Some(session) = self.session else {
                    self.apply_intent(intent, out);
                    return;
                };
                // Recorded before the close is issued; the completion may be
                // delivered on any later turn of the loop.
                self.pending_close = Some((session, intent));
                self.generation += 1;
                self.paused = false;
                if let Err(failure) = self.backend.abort_captures(session) {
                    tracing::debug!(%failure, "abort captures failed");
                }
                self.state = CaptureSessionState::Closing;
                tracing::debug!(?session, ?intent, "closing capture session");
                self.backend.close_session(session);
            }
            CaptureSessionState::Closing => match self.pending_close {
                Some((session, previous)) => {
                    tracing::warn!(?session, ?previous, ?intent, "close already pending, merging intents");
                    self.pending_close = Some((session, previous.merge(intent)));
                }
                None => self.apply_intent(intent, out),
            },
        }
    }

    fn apply_intent(&mut self, intent: CloseIntent, out: &mut SessionOutcome) {
        if intent.close_camera {
            self.close_device();
        }
        if intent.reopen_camera {
            self.open_into(None, out);
        }
        if intent.quit_loop {
            out.quit_loop = true;
        }
    }

    fn close_device(&mut self) {
        if let Some(device) = self.device.take() {
            tracing::debug!(?device, "closing camera");
            self.backend.close_device(device);
        }
        self.state = CaptureSessionState::Closed;
    }

    /// Pauses an active capture. No-op unless a session is capturing.
    pub fn pause(&mut self) -> SessionOutcome {
        let out = SessionOutcome::default();
        let active = matches!(
            self.state,
            CaptureSessionState::SessionConfigured | CaptureSessionState::Capturing
        );
        let (Some(session), true, false) = (self.session, active, self.paused) else {
            tracing::debug!(state = ?self.state, "nothing to pause");
            return out;
        };
        self.paused = true;
        self.generation += 1;
        if self.pacing == CapturePacing::Repeating {
            if let Err(failure) = self.backend.stop_repeating(session) {
                tracing::debug!(%failure, "stop repeating failed");
            }
        }
        if let Err(failure) = self.backend.abort_captures(session) {
            tracing::debug!(%failure, "abort captures failed");
        }
        tracing::debug!(?session, "capture paused");
        out
    }

    pub fn resume(&mut self) -> SessionOutcome {
        let mut out = SessionOutcome::default();
        if !self.paused {
            return out;
        }
        self.paused = false;
        let active = matches!(
            self.state,
            CaptureSessionState::SessionConfigured | CaptureSessionState::Capturing
        );
        if let (Some(session), true) = (self.session, active) {
            tracing::debug!(?session, "capture resumed");
            self.submit_capture(session, &mut out);
        }
        out
    }

    fn submit_capture(&mut self, session: SessionId, out: &mut SessionOutcome) {
        let result = match self.pacing.interval() {
            None => self
                .backend
                .set_repeating_request(session, RequestTemplate::Preview),
            Some(delay) => {
                out.schedule_capture = Some(ScheduledCapture {
                    delay,
                    generation: self.generation,
                });
                self.backend.capture(session, RequestTemplate::Preview)
            }
        };
        if let Err(failure) = result {
            tracing::warn!(%failure, "unable to submit capture request");
            out.schedule_capture = None;
            out.failure = Some(failure);
        }
    }

    /// Software pacing tick. Ticks from an older generation are ignored.
    pub fn capture_tick(&mut self, generation: u64) -> SessionOutcome {
        let mut out = SessionOutcome::default();
        let active = matches!(
            self.state,
            CaptureSessionState::SessionConfigured | CaptureSessionState::Capturing
        );
        if generation != self.generation || self.paused || !active {
            tracing::trace!(generation, current = self.generation, "stale capture tick");
            return out;
        }
        if let Some(session) = self.session {
            self.submit_capture(session, &mut out);
        }
        out
    }

    pub fn handle_event(&mut self, event: CameraEvent, targets: &mut dyn PreviewTargets) -> SessionOutcome {
        let mut out = SessionOutcome::default();
        match event {
            CameraEvent::Opened { device, identity } => {
                self.on_opened(device, identity, targets, &mut out)
            }
            CameraEvent::Disconnected { device } => {
                self.on_device_lost(device, CameraFailure::Disconnected, targets, &mut out)
            }
            CameraEvent::Error { device, code } => {
                self.on_device_lost(device, CameraFailure::Device(code), targets, &mut out)
            }
            CameraEvent::SessionConfigured { session } => {
                if self.session != Some(session)
                    || self.state != CaptureSessionState::SessionConfiguring
                {
                    tracing::debug!(?session, "ignoring configured event for stale session");
                    return out;
                }
                self.state = CaptureSessionState::SessionConfigured;
                if !self.paused {
                    self.submit_capture(session, &mut out);
                }
            }
            CameraEvent::SessionConfigureFailed { session } => {
                if matches!(self.pending_close, Some((pending, _)) if pending == session) {
                    self.on_session_closed(session, targets, &mut out);
                } else if self.session == Some(session) {
                    tracing::warn!(?session, "capture session configuration failed");
                    self.session = None;
                    self.state = CaptureSessionState::CameraOpen;
                    targets.release();
                    out.failure = Some(CameraFailure::ConfigureFailed);
                }
            }
            CameraEvent::SessionActive { session } => {
                if self.session == Some(session)
                    && self.state == CaptureSessionState::SessionConfigured
                {
                    tracing::debug!(?session, "capturing");
                    self.state = CaptureSessionState::Capturing;
                }
            }
            CameraEvent::SessionClosed { session } => self.on_session_closed(session, targets, &mut out),
            CameraEvent::CaptureCompleted { session, frame } => {
                if self.session == Some(session)
                    && self.state == CaptureSessionState::Capturing
                    && !self.paused
                {
                    tracing::trace!(frame, "capture completed");
                    out.draw_frame = true;
                }
            }
        }
        out
    }

    fn on_opened(
        &mut self,
        device: DeviceId,
        identity: CameraIdentity,
        targets: &mut dyn PreviewTargets,
        out: &mut SessionOutcome,
    ) {
        if self.state != CaptureSessionState::CameraOpening {
            tracing::warn!(?device, state = ?self.state, "unexpected camera open, closing device");
            self.backend.close_device(device);
            return;
        }
        tracing::info!(%identity, ?device, "camera opened");
        self.device = Some(device);
        self.state = CaptureSessionState::CameraOpen;
        if let Some(intent) = self.opening_intent.take() {
            tracing::debug!(?intent, "applying close requested while opening");
            self.apply_intent(intent, out);
        }
        if self.state == CaptureSessionState::CameraOpen && self.preview_pending && !out.quit_loop {
            self.configure_session(targets, out);
        }
    }

    fn on_device_lost(
        &mut self,
        device: DeviceId,
        failure: CameraFailure,
        targets: &mut dyn PreviewTargets,
        out: &mut SessionOutcome,
    ) {
        let ours = self.device == Some(device)
            || (self.device.is_none() && self.state == CaptureSessionState::CameraOpening);
        if !ours {
            tracing::debug!(?device, "ignoring event for stale device");
            return;
        }
        tracing::warn!(?device, %failure, "camera lost");
        if self.session.take().is_some() {
            targets.release();
        }
        self.backend.close_device(device);
        self.device = None;
        self.state = CaptureSessionState::Idle;
        self.paused = false;
        self.preview_pending = false;
        self.generation += 1;
        let closing = self.pending_close.take().map(|(_, intent)| intent);
        let opening = self.opening_intent.take();
        // reopen intents are dropped; a lost device is never reopened automatically
        if [closing, opening].iter().flatten().any(|intent| intent.quit_loop) {
            out.quit_loop = true;
        }
        out.failure = Some(failure);
    }

    fn on_session_closed(
        &mut self,
        session: SessionId,
        targets: &mut dyn PreviewTargets,
        out: &mut SessionOutcome,
    ) {
        let intent = match self.pending_close {
            Some((pending, intent)) if pending == session => {
                self.pending_close = None;
                Some(intent)
            }
            _ => None,
        };
        if intent.is_none() && self.session != Some(session) {
            tracing::debug!(?session, "ignoring close of stale session");
            return;
        }
        tracing::debug!(?session, ?intent, "capture session closed");
        if self.session == Some(session) {
            self.session = None;
            targets.release();
        }
        self.paused = false;
        self.state = if self.device.is_some() {
            CaptureSessionState::CameraOpen
        } else {
            CaptureSessionState::Closed
        };
        if let Some(intent) = intent {
            self.apply_intent(intent, out);
        }
        if self.state == CaptureSessionState::CameraOpen && self.preview_pending && !out.quit_loop {
            self.configure_session(targets, out);
        }
    }

    /// Closes whatever is still open without waiting for completions. Used
    /// when the loop is torn down.
    pub fn shutdown(&mut self, targets: &mut dyn PreviewTargets) {
        self.generation += 1;
        if let Some(session) = self.session.take() {
            if let Err(failure) = self.backend.abort_captures(session) {
                tracing::debug!(%failure, "abort captures failed");
            }
            self.backend.close_session(session);
            targets.release();
        }
        if let Some(device) = self.device.take() {
            self.backend.close_device(device);
        }
        self.pending_close = None;
        self.opening_intent = None;
        self.preview_pending = false;
        self.paused = false;
        if self.state != CaptureSessionState::Idle {
            self.state = CaptureSessionState::Closed;
        }
        tracing::debug!("capture session shut down");
    }
}
