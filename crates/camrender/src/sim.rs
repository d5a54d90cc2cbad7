//! In-process stand-in for the EGL/GLES stack and the camera service.
//!
//! [`SimHardware`] is the shared world; [`SimGpu`] and [`SimCamera`] are the
//! backend halves handed to a pipeline. Tests and the CLI drive frames and
//! faults through the hardware handle and read back what the pipeline did.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use raw_window_handle::{AndroidNdkWindowHandle, RawWindowHandle};

use crate::camera::{
    CameraBackend, CameraCharacteristics, CameraEvent, CameraEventSink, DeviceId, RequestTemplate,
    SessionId,
};
use crate::error::{CameraFailure, PlatformError};
use crate::gpu::{
    ConfigId, ConfigRequest, ContextId, DrawCall, EglPlatform, FramebufferId, Gles, ProducerId,
    ProgramId, SurfaceId, TextureId, TextureTarget,
};
use crate::types::{BufferSize, CameraIdentity, Mat4, NativeWindow};

const EGL_BAD_ACCESS: u32 = 0x3002;
const EGL_BAD_MATCH: u32 = 0x3009;
const EGL_NOT_INITIALIZED: u32 = 0x3001;
const GL_INVALID_OPERATION: u32 = 0x0502;
const GL_OUT_OF_MEMORY: u32 = 0x0505;

/// Sampling transform the simulated producer reports: a vertical flip, as
/// camera producers commonly do.
pub const SIM_TEX_MATRIX: Mat4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, -1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 1.0, 0.0, 1.0,
];

/// GPU-side counters and leak checks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuReport {
    pub contexts_created: u32,
    pub contexts_destroyed: u32,
    pub terminations: u32,
    pub live_surfaces: usize,
    pub live_textures: usize,
    pub live_programs: usize,
    pub live_framebuffers: usize,
    pub live_producers: usize,
    pub draws: u64,
    pub swaps: u64,
    pub images_dropped: u64,
    /// Buffer size of every producer created, in order.
    pub producer_sizes: Vec<BufferSize>,
    /// Draws that landed on each window, keyed by the id passed to
    /// [`SimHardware::window`].
    pub draws_by_window: BTreeMap<u64, u64>,
    pub last_draw: Option<DrawCall>,
    /// Calls made against a missing or destroyed context.
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraReport {
    /// Identities passed to each successful open, in order.
    pub opens: Vec<CameraIdentity>,
    pub open_devices: usize,
    pub device_closes: u32,
    pub sessions_created: u32,
    pub session_closes: u32,
    pub live_sessions: usize,
    pub captures: u64,
    pub frames_delivered: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SurfaceKind {
    Pbuffer,
    Window(u64),
}

#[derive(Debug, Default)]
struct Producer {
    pending: bool,
}

#[derive(Debug)]
struct SimSession {
    device: DeviceId,
    targets: Vec<ProducerId>,
    repeating: bool,
    active: bool,
}

#[derive(Debug, Default)]
struct SimWorld {
    next_id: u64,

    fail_display_init: bool,
    fail_program_link: bool,
    fail_draws: bool,
    without_gles3: bool,
    single_buffered: bool,
    initialized: bool,
    contexts: HashSet<ContextId>,
    surfaces: HashMap<SurfaceId, SurfaceKind>,
    current: Option<(ContextId, SurfaceId)>,
    textures: HashSet<TextureId>,
    programs: HashSet<ProgramId>,
    framebuffers: HashSet<FramebufferId>,
    producers: HashMap<ProducerId, Producer>,
    gpu: GpuReport,

    sink: Option<CameraEventSink>,
    output_sizes: Vec<BufferSize>,
    deny_permission: bool,
    fail_next_configure: bool,
    devices: HashMap<DeviceId, CameraIdentity>,
    sessions: HashMap<SessionId, SimSession>,
    frame: u64,
    camera: CameraReport,
}

impl SimWorld {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn violation(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%message, "simulated GPU misuse");
        self.gpu.violations.push(message);
    }

    fn require_current(&mut self, call: &'static str) -> Result<(), PlatformError> {
        if self.current.is_some() {
            Ok(())
        } else {
            self.violation(format!("{call} without a current context"));
            Err(PlatformError::new(call, GL_INVALID_OPERATION))
        }
    }

    fn write_image(&mut self, producer: ProducerId) -> bool {
        match self.producers.get_mut(&producer) {
            Some(state) => {
                if state.pending {
                    self.gpu.images_dropped += 1;
                }
                state.pending = true;
                true
            }
            None => false,
        }
    }

    /// Writes one image for `session` and returns the completion event.
    fn deliver_frame(&mut self, session: SessionId) -> Option<CameraEvent> {
        let targets = self.sessions.get(&session)?.targets.clone();
        for producer in targets {
            self.write_image(producer);
        }
        self.frame += 1;
        self.camera.frames_delivered += 1;
        Some(CameraEvent::CaptureCompleted {
            session,
            frame: self.frame,
        })
    }

    fn report(&self) -> GpuReport {
        GpuReport {
            live_surfaces: self.surfaces.len(),
            live_textures: self.textures.len(),
            live_programs: self.programs.len(),
            live_framebuffers: self.framebuffers.len(),
            live_producers: self.producers.len(),
            ..self.gpu.clone()
        }
    }
}

fn lock(world: &Mutex<SimWorld>) -> MutexGuard<'_, SimWorld> {
    world.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the simulated world. Cheap to clone.
#[derive(Clone, Default)]
pub struct SimHardware {
    world: Arc<Mutex<SimWorld>>,
}

impl SimHardware {
    /// Hardware advertising 640x480, 1280x720 and 1920x1080.
    pub fn new() -> Self {
        Self::default().with_output_sizes(vec![
            BufferSize::new(640, 480),
            BufferSize::new(1280, 720),
            BufferSize::new(1920, 1080),
        ])
    }

    pub fn with_output_sizes(self, sizes: Vec<BufferSize>) -> Self {
        lock(&self.world).output_sizes = sizes;
        self
    }

    pub fn single_buffered(self) -> Self {
        lock(&self.world).single_buffered = true;
        self
    }

    pub fn without_gles3(self) -> Self {
        lock(&self.world).without_gles3 = true;
        self
    }

    pub fn fail_display_init(self) -> Self {
        lock(&self.world).fail_display_init = true;
        self
    }

    pub fn fail_program_link(self) -> Self {
        lock(&self.world).fail_program_link = true;
        self
    }

    /// Every draw from now on fails, as on a lost GPU.
    pub fn fail_draws(&self) {
        lock(&self.world).fail_draws = true;
    }

    /// Makes every open fail as if the user refused camera access.
    pub fn deny_permission(self) -> Self {
        lock(&self.world).deny_permission = true;
        self
    }

    pub fn gpu(&self) -> SimGpu {
        SimGpu {
            world: self.world.clone(),
        }
    }

    /// Camera backend delivering its events through `sink`.
    pub fn camera(&self, sink: CameraEventSink) -> SimCamera {
        lock(&self.world).sink = Some(sink);
        SimCamera {
            world: self.world.clone(),
        }
    }

    /// Backend factory for [`crate::CameraPipeline::spawn`].
    pub fn factory(
        &self,
    ) -> impl FnOnce(CameraEventSink) -> Result<(SimGpu, SimCamera), String> + Send + 'static {
        let hardware = self.clone();
        move |sink| Ok((hardware.gpu(), hardware.camera(sink)))
    }

    /// Native window handle with a stable identity.
    pub fn window(&self, id: u64) -> NativeWindow {
        let address = (id as usize + 1) * 16;
        let pointer = NonNull::new(address as *mut c_void).unwrap_or(NonNull::dangling());
        NativeWindow::new(RawWindowHandle::AndroidNdk(AndroidNdkWindowHandle::new(pointer)))
    }

    fn window_id(window: &NativeWindow) -> Option<u64> {
        match window.raw() {
            RawWindowHandle::AndroidNdk(handle) => (handle.a_native_window.as_ptr() as usize / 16)
                .checked_sub(1)
                .map(|id| id as u64),
            _ => None,
        }
    }

    /// The next session configuration fails.
    pub fn fail_next_configure(&self) {
        lock(&self.world).fail_next_configure = true;
    }

    /// Writes an image into `producer` without a completion event.
    pub fn write_image(&self, producer: ProducerId) {
        lock(&self.world).write_image(producer);
    }

    /// Produces `count` frames on every repeating session. Returns the number
    /// of completion events delivered.
    pub fn pump_frames(&self, count: usize) -> usize {
        let mut delivered = 0;
        for _ in 0..count {
            let (sink, events) = {
                let mut world = lock(&self.world);
                let mut sessions: Vec<SessionId> = world
                    .sessions
                    .iter()
                    .filter(|(_, session)| session.repeating)
                    .map(|(id, _)| *id)
                    .collect();
                sessions.sort();
                let events: Vec<CameraEvent> = sessions
                    .into_iter()
                    .filter_map(|session| world.deliver_frame(session))
                    .collect();
                (world.sink.clone(), events)
            };
            let Some(sink) = sink else {
                return delivered;
            };
            for event in events {
                if sink.send(event) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Disconnects every open device.
    pub fn disconnect(&self) {
        let (sink, devices) = {
            let world = lock(&self.world);
            let devices: Vec<DeviceId> = world.devices.keys().copied().collect();
            (world.sink.clone(), devices)
        };
        if let Some(sink) = sink {
            for device in devices {
                sink.send(CameraEvent::Disconnected { device });
            }
        }
    }

    pub fn gpu_report(&self) -> GpuReport {
        lock(&self.world).report()
    }

    pub fn camera_report(&self) -> CameraReport {
        let world = lock(&self.world);
        CameraReport {
            open_devices: world.devices.len(),
            live_sessions: world.sessions.len(),
            ..world.camera.clone()
        }
    }
}

/// Simulated EGL display and GLES entry points.
pub struct SimGpu {
    world: Arc<Mutex<SimWorld>>,
}

impl EglPlatform for SimGpu {
    fn initialize(&mut self) -> Result<(), PlatformError> {
        let mut world = lock(&self.world);
        if world.fail_display_init {
            return Err(PlatformError::new("eglInitialize", EGL_NOT_INITIALIZED));
        }
        world.initialized = true;
        Ok(())
    }

    fn choose_config(&mut self, request: &ConfigRequest) -> Result<Option<ConfigId>, PlatformError> {
        let mut world = lock(&self.world);
        if !world.initialized {
            return Err(PlatformError::new("eglChooseConfig", EGL_NOT_INITIALIZED));
        }
        let supported = request.client_version == 2
            || (request.client_version == 3 && !world.without_gles3);
        Ok(supported.then(|| ConfigId(world.next_id())))
    }

    fn create_context(&mut self, _config: ConfigId, _client_version: u32) -> Result<ContextId, PlatformError> {
        let mut world = lock(&self.world);
        let context = ContextId(world.next_id());
        world.contexts.insert(context);
        world.gpu.contexts_created += 1;
        Ok(context)
    }

    fn create_window_surface(
        &mut self,
        _config: ConfigId,
        window: &NativeWindow,
    ) -> Result<SurfaceId, PlatformError> {
        let id = SimHardware::window_id(window)
            .ok_or_else(|| PlatformError::new("eglCreateWindowSurface", EGL_BAD_MATCH))?;
        let mut world = lock(&self.world);
        let surface = SurfaceId(world.next_id());
        world.surfaces.insert(surface, SurfaceKind::Window(id));
        Ok(surface)
    }

    fn create_pbuffer_surface(
        &mut self,
        _config: ConfigId,
        _width: u32,
        _height: u32,
    ) -> Result<SurfaceId, PlatformError> {
        let mut world = lock(&self.world);
        let surface = SurfaceId(world.next_id());
        world.surfaces.insert(surface, SurfaceKind::Pbuffer);
        Ok(surface)
    }

    fn make_current(&mut self, context: ContextId, surface: SurfaceId) -> Result<(), PlatformError> {
        let mut world = lock(&self.world);
        if !world.contexts.contains(&context) || !world.surfaces.contains_key(&surface) {
            world.violation("eglMakeCurrent with a dead context or surface");
            return Err(PlatformError::new("eglMakeCurrent", EGL_BAD_ACCESS));
        }
        world.current = Some((context, surface));
        Ok(())
    }

    fn make_nothing_current(&mut self) -> Result<(), PlatformError> {
        lock(&self.world).current = None;
        Ok(())
    }

    fn is_current(&self, context: ContextId, surface: SurfaceId) -> bool {
        lock(&self.world).current == Some((context, surface))
    }

    fn is_single_buffered(&self, _context: ContextId) -> bool {
        lock(&self.world).single_buffered
    }

    fn swap_buffers(&mut self, surface: SurfaceId) -> Result<(), PlatformError> {
        let mut world = lock(&self.world);
        if !world.surfaces.contains_key(&surface) {
            world.violation("eglSwapBuffers on a destroyed surface");
            return Err(PlatformError::new("eglSwapBuffers", EGL_BAD_ACCESS));
        }
        world.gpu.swaps += 1;
        Ok(())
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        let mut world = lock(&self.world);
        if world.surfaces.remove(&surface).is_none() {
            world.violation(format!("surface {surface:?} destroyed twice"));
        }
        if matches!(world.current, Some((_, current)) if current == surface) {
            world.current = None;
        }
    }

    fn destroy_context(&mut self, context: ContextId) {
        let mut world = lock(&self.world);
        if !world.contexts.remove(&context) {
            world.violation(format!("context {context:?} destroyed twice"));
            return;
        }
        world.gpu.contexts_destroyed += 1;
    }

    fn terminate(&mut self) {
        let mut world = lock(&self.world);
        world.initialized = false;
        world.current = None;
        world.gpu.terminations += 1;
    }
}

impl Gles for SimGpu {
    fn create_external_texture(&mut self) -> Result<TextureId, PlatformError> {
        let mut world = lock(&self.world);
        world.require_current("glGenTextures")?;
        let texture = TextureId(world.next_id() as u32);
        world.textures.insert(texture);
        Ok(texture)
    }

    fn create_texture_2d(&mut self, _width: u32, _height: u32) -> Result<TextureId, PlatformError> {
        self.create_external_texture()
    }

    fn delete_texture(&mut self, texture: TextureId) {
        let mut world = lock(&self.world);
        if world.current.is_none() {
            world.violation("glDeleteTextures without a current context");
        }
        world.textures.remove(&texture);
    }

    fn link_program(&mut self, _sampler: TextureTarget) -> Result<ProgramId, PlatformError> {
        let mut world = lock(&self.world);
        world.require_current("glLinkProgram")?;
        if world.fail_program_link {
            return Err(PlatformError::new("glLinkProgram", GL_INVALID_OPERATION));
        }
        let program = ProgramId(world.next_id() as u32);
        world.programs.insert(program);
        Ok(program)
    }

    fn delete_program(&mut self, program: ProgramId) {
        let mut world = lock(&self.world);
        if world.current.is_none() {
            world.violation("glDeleteProgram without a current context");
        }
        if !world.programs.remove(&program) {
            world.violation(format!("program {program:?} deleted twice"));
        }
    }

    fn create_framebuffer(&mut self, color: TextureId) -> Result<FramebufferId, PlatformError> {
        let mut world = lock(&self.world);
        world.require_current("glGenFramebuffers")?;
        if !world.textures.contains(&color) {
            return Err(PlatformError::new("glFramebufferTexture2D", GL_INVALID_OPERATION));
        }
        let framebuffer = FramebufferId(world.next_id() as u32);
        world.framebuffers.insert(framebuffer);
        Ok(framebuffer)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        lock(&self.world).framebuffers.remove(&framebuffer);
    }

    fn draw(&mut self, call: &DrawCall) -> Result<(), PlatformError> {
        let mut world = lock(&self.world);
        world.require_current("glDrawArrays")?;
        if world.fail_draws {
            return Err(PlatformError::new("glDrawArrays", GL_OUT_OF_MEMORY));
        }
        if !world.programs.contains(&call.program) {
            world.violation("glDrawArrays with a released program");
            return Err(PlatformError::new("glUseProgram", GL_INVALID_OPERATION));
        }
        world.gpu.draws += 1;
        if call.framebuffer.is_none() {
            let target = world
                .current
                .and_then(|(_, surface)| world.surfaces.get(&surface).copied());
            if let Some(SurfaceKind::Window(id)) = target {
                *world.gpu.draws_by_window.entry(id).or_default() += 1;
            }
        }
        world.gpu.last_draw = Some(call.clone());
        Ok(())
    }

    fn create_producer(&mut self, texture: TextureId, size: BufferSize) -> Result<ProducerId, PlatformError> {
        let mut world = lock(&self.world);
        world.require_current("SurfaceTexture")?;
        if !world.textures.contains(&texture) {
            return Err(PlatformError::new("SurfaceTexture", GL_INVALID_OPERATION));
        }
        let producer = ProducerId(world.next_id());
        world.producers.insert(producer, Producer::default());
        world.gpu.producer_sizes.push(size);
        tracing::trace!(?producer, %size, "producer created");
        Ok(producer)
    }

    fn latest_image(&mut self, producer: ProducerId) -> Result<Option<Mat4>, PlatformError> {
        let mut world = lock(&self.world);
        world.require_current("updateTexImage")?;
        match world.producers.get_mut(&producer) {
            Some(state) if state.pending => {
                state.pending = false;
                Ok(Some(SIM_TEX_MATRIX))
            }
            Some(_) => Ok(None),
            None => Err(PlatformError::new("updateTexImage", GL_INVALID_OPERATION)),
        }
    }

    fn release_producer(&mut self, producer: ProducerId) {
        lock(&self.world).producers.remove(&producer);
    }
}

/// Simulated camera service. Results are delivered through the event sink
/// as soon as each request is made.
pub struct SimCamera {
    world: Arc<Mutex<SimWorld>>,
}

impl SimCamera {
    fn send(&self, events: Vec<CameraEvent>) -> Vec<bool> {
        let sink = lock(&self.world).sink.clone();
        match sink {
            Some(sink) => events.into_iter().map(|event| sink.send(event)).collect(),
            None => Vec::new(),
        }
    }
}

impl CameraBackend for SimCamera {
    fn characteristics(&mut self, _identity: CameraIdentity) -> Result<CameraCharacteristics, CameraFailure> {
        let world = lock(&self.world);
        Ok(CameraCharacteristics {
            output_sizes: world.output_sizes.clone(),
            sensor_orientation: 90,
        })
    }

    fn open(&mut self, identity: CameraIdentity) -> Result<(), CameraFailure> {
        let device = {
            let mut world = lock(&self.world);
            if world.deny_permission {
                return Err(CameraFailure::PermissionDenied);
            }
            let device = DeviceId(world.next_id());
            world.devices.insert(device, identity);
            world.camera.opens.push(identity);
            device
        };
        let delivered = self.send(vec![CameraEvent::Opened { device, identity }]);
        if delivered.first() != Some(&true) {
            tracing::debug!(?device, "open result undeliverable, closing device");
            self.close_device(device);
        }
        Ok(())
    }

    fn create_session(&mut self, device: DeviceId, targets: &[ProducerId]) -> Result<SessionId, CameraFailure> {
        let (session, event) = {
            let mut world = lock(&self.world);
            if !world.devices.contains_key(&device) {
                return Err(CameraFailure::Backend(format!("device {} is not open", device.0)));
            }
            let session = SessionId(world.next_id());
            world.camera.sessions_created += 1;
            if std::mem::take(&mut world.fail_next_configure) {
                (session, CameraEvent::SessionConfigureFailed { session })
            } else {
                world.sessions.insert(
                    session,
                    SimSession {
                        device,
                        targets: targets.to_vec(),
                        repeating: false,
                        active: false,
                    },
                );
                (session, CameraEvent::SessionConfigured { session })
            }
        };
        self.send(vec![event]);
        Ok(session)
    }

    fn set_repeating_request(&mut self, session: SessionId, _template: RequestTemplate) -> Result<(), CameraFailure> {
        let activated = {
            let mut world = lock(&self.world);
            let state = world
                .sessions
                .get_mut(&session)
                .ok_or_else(|| CameraFailure::Backend("session closed".into()))?;
            state.repeating = true;
            !std::mem::replace(&mut state.active, true)
        };
        if activated {
            self.send(vec![CameraEvent::SessionActive { session }]);
        }
        Ok(())
    }

    fn stop_repeating(&mut self, session: SessionId) -> Result<(), CameraFailure> {
        let mut world = lock(&self.world);
        if let Some(state) = world.sessions.get_mut(&session) {
            state.repeating = false;
        }
        Ok(())
    }

    fn capture(&mut self, session: SessionId, _template: RequestTemplate) -> Result<(), CameraFailure> {
        let events = {
            let mut world = lock(&self.world);
            let state = world
                .sessions
                .get_mut(&session)
                .ok_or_else(|| CameraFailure::Backend("session closed".into()))?;
            let activated = !std::mem::replace(&mut state.active, true);
            world.camera.captures += 1;
            let mut events = Vec::new();
            if activated {
                events.push(CameraEvent::SessionActive { session });
            }
            events.extend(world.deliver_frame(session));
            events
        };
        self.send(events);
        Ok(())
    }

    fn abort_captures(&mut self, _session: SessionId) -> Result<(), CameraFailure> {
        Ok(())
    }

    fn close_session(&mut self, session: SessionId) {
        let removed = {
            let mut world = lock(&self.world);
            let removed = world.sessions.remove(&session).is_some();
            if removed {
                world.camera.session_closes += 1;
            }
            removed
        };
        if removed {
            self.send(vec![CameraEvent::SessionClosed { session }]);
        }
    }

    fn close_device(&mut self, device: DeviceId) {
        let mut world = lock(&self.world);
        if world.devices.remove(&device).is_some() {
            world.camera.device_closes += 1;
            world.sessions.retain(|_, session| session.device != device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_round_trip_their_ids() {
        let hardware = SimHardware::new();
        for id in [0, 1, 42] {
            assert_eq!(SimHardware::window_id(&hardware.window(id)), Some(id));
        }
        assert_ne!(hardware.window(1), hardware.window(2));
    }

    #[test]
    fn undeliverable_open_closes_the_device() {
        let hardware = SimHardware::new();
        let mut camera = hardware.camera(CameraEventSink::new(|_| false));
        camera.open(CameraIdentity::Back).unwrap();
        let report = hardware.camera_report();
        assert_eq!(report.open_devices, 0);
        assert_eq!(report.device_closes, 1);
    }
}
