//! Cross-thread facade over one camera preview pipeline.
//!
//! Every public call is posted to the pipeline's render loop and returns
//! immediately. Results are observed through [`CameraPipeline::signals`].

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::camera::{
    CameraBackend, CameraEvent, CameraEventSink, CaptureSession, CaptureSessionState,
    CapturePacing, PreviewTargets, SessionOutcome,
};
use crate::error::{CameraFailure, GraphicsError, LoopError};
use crate::fps::{FpsCounter, FramePacer, DEFAULT_REPORT_INTERVAL};
use crate::frame_sink::FrameSink;
use crate::gpu::{GpuBackend, GraphicsContext, ProducerId, SurfaceSlot, TextureProgram, TextureTarget};
use crate::render_loop::{Lifecycle, LoopHandle, RenderLoop};
use crate::types::{rotation_z, BufferSize, CameraIdentity, DisplayTarget, DEFAULT_CAPTURE_SIZE};

pub const DEFAULT_THREAD_NAME: &str = "camera-render";

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub thread_name: String,
    pub identity: CameraIdentity,
    pub capture_size: BufferSize,
    pub pacing: CapturePacing,
    /// Preferred GLES tier; 3 falls back to 2 when unavailable.
    pub gl_version: u32,
    /// Upper bound on drawn frames per second. Zero leaves draws uncapped.
    pub max_draw_fps: u32,
    pub fps_report_interval: Duration,
    pub permission_granted: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            identity: CameraIdentity::default(),
            capture_size: DEFAULT_CAPTURE_SIZE,
            pacing: CapturePacing::default(),
            gl_version: 3,
            max_draw_fps: 0,
            fps_report_interval: DEFAULT_REPORT_INTERVAL,
            permission_granted: false,
        }
    }
}

/// Notifications emitted by the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineSignal {
    /// Frames drawn in the last reporting interval.
    Fps(u32),
    StateChanged(CaptureSessionState),
    CameraFailure(CameraFailure),
    ConfigureFailed,
    /// Rendering has stopped for good.
    Fatal(String),
    /// The worker has torn down; nothing follows.
    Stopped,
}

struct RenderTargets<G: GpuBackend> {
    ctx: GraphicsContext<G>,
    sink: FrameSink,
    program: Option<TextureProgram>,
}

impl<G: GpuBackend> RenderTargets<G> {
    fn ensure_current(&mut self) -> Result<(), GraphicsError> {
        if !self.ctx.is_any_current() {
            self.ctx.make_current(SurfaceSlot::Anchor)?;
        }
        Ok(())
    }

    fn release_display(&mut self) {
        if let Err(err) = self.ctx.release_surface(SurfaceSlot::Display) {
            tracing::warn!(error = %err, "unable to release display surface");
        }
    }

    /// Drops GPU objects in dependency order and destroys the context.
    fn teardown(&mut self) {
        if self.ensure_current().is_ok() {
            self.sink.release(&mut self.ctx);
            if let Some(program) = self.program.take() {
                if let Ok(gl) = self.ctx.gl() {
                    program.release(gl);
                }
            }
        }
        self.release_display();
        self.ctx.destroy();
    }
}

impl<G: GpuBackend> PreviewTargets for RenderTargets<G> {
    fn prepare(&mut self, size: BufferSize) -> Result<ProducerId, GraphicsError> {
        self.ensure_current()?;
        self.sink.prepare(&mut self.ctx, size)
    }

    fn release(&mut self) {
        if self.ensure_current().is_ok() {
            self.sink.release(&mut self.ctx);
        }
    }
}

/// State owned by the render loop thread.
struct PipelineWorker<G: GpuBackend, C: CameraBackend> {
    gpu: Option<G>,
    gl_version: u32,
    render: Option<RenderTargets<G>>,
    session: CaptureSession<C>,
    display: Option<DisplayTarget>,
    fps: FpsCounter,
    pacer: FramePacer,
    signals: Sender<PipelineSignal>,
    handle: Option<LoopHandle<Self>>,
    last_state: CaptureSessionState,
    fatal: bool,
    frames_drawn: u64,
}

impl<G: GpuBackend + 'static, C: CameraBackend + 'static> PipelineWorker<G, C> {
    fn emit(&self, signal: PipelineSignal) {
        let _ = self.signals.send(signal);
    }

    fn publish_state(&mut self) {
        let state = self.session.state();
        if state == self.last_state {
            return;
        }
        tracing::debug!(from = ?self.last_state, to = ?state, "capture state changed");
        if self.last_state == CaptureSessionState::Capturing {
            self.fps.reset();
            self.pacer.reset();
        }
        self.last_state = state;
        self.emit(PipelineSignal::StateChanged(state));
    }

    fn fail(&mut self, err: GraphicsError) {
        if self.fatal {
            return;
        }
        tracing::error!(error = %err, "graphics failure, rendering stopped");
        self.fatal = true;
        self.emit(PipelineSignal::Fatal(err.to_string()));
    }

    fn apply(&mut self, out: SessionOutcome) {
        match out.failure {
            Some(CameraFailure::ConfigureFailed) => self.emit(PipelineSignal::ConfigureFailed),
            Some(failure) => self.emit(PipelineSignal::CameraFailure(failure)),
            None => {}
        }
        if let Some(err) = out.graphics_error {
            self.fail(err);
        }
        if let (Some(tick), Some(handle)) = (out.schedule_capture, self.handle.as_ref()) {
            handle.post_delayed(tick.delay, move |worker: &mut Self| {
                let out = worker.session.capture_tick(tick.generation);
                worker.apply(out);
            });
        }
        if out.draw_frame {
            self.draw_frame();
        }
        self.publish_state();
        if out.quit_loop {
            if let Some(handle) = self.handle.as_ref() {
                tracing::debug!("quitting render loop after session close");
                handle.quit();
            }
        }
    }

    fn on_camera_event(&mut self, event: CameraEvent) {
        let Some(render) = self.render.as_mut() else {
            return;
        };
        let out = self.session.handle_event(event, render);
        self.apply(out);
    }

    fn start_preview(&mut self) {
        let Some(render) = self.render.as_mut() else {
            return;
        };
        let out = self.session.start_preview(render);
        self.apply(out);
    }

    fn set_display_target(&mut self, target: Option<DisplayTarget>) {
        let replaced = match (self.display, target) {
            (Some(current), Some(next)) => current.window != next.window,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if replaced {
            if let Some(render) = self.render.as_mut() {
                render.release_display();
            }
        }
        tracing::debug!(?target, "display target set");
        self.display = target;
    }

    fn resize_display_target(&mut self, width: u32, height: u32) {
        match self.display.as_mut() {
            Some(display) => {
                display.width = width;
                display.height = height;
            }
            None => tracing::debug!(width, height, "resize without display target ignored"),
        }
    }

    fn draw_frame(&mut self) {
        if self.fatal {
            return;
        }
        match self.try_draw() {
            Ok(true) => {
                self.frames_drawn += 1;
                if let Some(fps) = self.fps.record() {
                    tracing::trace!(fps, "frame rate");
                    self.emit(PipelineSignal::Fps(fps));
                }
            }
            Ok(false) => {}
            Err(err) => self.fail(err),
        }
    }

    fn try_draw(&mut self) -> Result<bool, GraphicsError> {
        let Some(RenderTargets { ctx, sink, program }) = self.render.as_mut() else {
            return Ok(false);
        };
        if !ctx.is_any_current() {
            ctx.make_current(SurfaceSlot::Anchor)?;
        }
        // Latch even without a display so stale images never pile up.
        let Some(tex_matrix) = sink.latest_frame(ctx)? else {
            return Ok(false);
        };
        let Some(target) = self.display else {
            tracing::trace!("no display target, frame dropped");
            return Ok(false);
        };
        if self.pacer.is_limited() && !self.pacer.should_render() {
            return Ok(false);
        }
        let (Some(texture), Some(source)) = (sink.texture(), sink.size()) else {
            return Ok(false);
        };

        if !ctx.has_surface(SurfaceSlot::Display) {
            ctx.create_display_surface(&target.window)?;
        }
        ctx.make_current(SurfaceSlot::Display)?;
        if program.is_none() {
            *program = Some(TextureProgram::new(ctx.gl()?, TextureTarget::External)?);
        }
        let Some(program) = program.as_ref() else {
            return Ok(false);
        };

        let mvp = rotation_z(target.rotation.degrees() as f32);
        program.draw_viewport_fit(
            ctx.gl()?,
            &mvp,
            &tex_matrix,
            texture,
            source,
            target.width,
            target.height,
            target.rotation,
        )?;
        ctx.swap(SurfaceSlot::Display)?;
        Ok(true)
    }
}

impl<G: GpuBackend + 'static, C: CameraBackend + 'static> Lifecycle for PipelineWorker<G, C> {
    fn on_start(&mut self, handle: &LoopHandle<Self>) -> Result<(), String> {
        let gpu = self
            .gpu
            .take()
            .ok_or_else(|| "graphics backend missing".to_string())?;
        let mut ctx = GraphicsContext::create(gpu, self.gl_version).map_err(|err| err.to_string())?;
        ctx.create_anchor_surface().map_err(|err| err.to_string())?;
        ctx.make_current(SurfaceSlot::Anchor)
            .map_err(|err| err.to_string())?;
        self.render = Some(RenderTargets {
            ctx,
            sink: FrameSink::new(),
            program: None,
        });
        self.handle = Some(handle.clone());
        Ok(())
    }

    fn on_stop(&mut self) {
        if let Some(render) = self.render.as_mut() {
            self.session.shutdown(render);
            render.teardown();
        }
        self.render = None;
        self.handle = None;
        self.publish_state();
        tracing::info!(frames = self.frames_drawn, "camera pipeline stopped");
        self.emit(PipelineSignal::Stopped);
    }
}

/// Handle to a running pipeline. Dropping it quits and joins the worker.
pub struct CameraPipeline<G: GpuBackend + 'static, C: CameraBackend + 'static> {
    render_loop: RenderLoop<PipelineWorker<G, C>>,
    signals: Receiver<PipelineSignal>,
}

impl<G: GpuBackend + 'static, C: CameraBackend + 'static> CameraPipeline<G, C> {
    /// Starts the render loop. `factory` runs on the loop thread and builds
    /// both backends; the camera backend delivers its events through the sink
    /// it is given.
    pub fn spawn<F>(options: PipelineOptions, factory: F) -> Result<Self, LoopError>
    where
        F: FnOnce(CameraEventSink) -> Result<(G, C), String> + Send + 'static,
    {
        let (signal_tx, signal_rx) = unbounded();
        let name = options.thread_name.clone();
        let render_loop = RenderLoop::spawn(&name, move |handle: LoopHandle<PipelineWorker<G, C>>| {
            let events = handle.clone();
            let sink = CameraEventSink::new(move |event| {
                events.post(move |worker: &mut PipelineWorker<G, C>| worker.on_camera_event(event))
            });
            let (gpu, camera) = factory(sink)?;
            let mut session = CaptureSession::new(
                camera,
                options.identity,
                options.capture_size,
                options.pacing,
            );
            session.grant_permission(options.permission_granted);
            Ok(PipelineWorker {
                gpu: Some(gpu),
                gl_version: options.gl_version,
                render: None,
                session,
                display: None,
                fps: FpsCounter::new(options.fps_report_interval),
                pacer: FramePacer::new(options.max_draw_fps),
                signals: signal_tx,
                handle: None,
                last_state: CaptureSessionState::Idle,
                fatal: false,
                frames_drawn: 0,
            })
        })?;
        tracing::info!(thread = %name, "camera pipeline started");
        Ok(Self {
            render_loop,
            signals: signal_rx,
        })
    }

    fn post<F>(&self, task: F)
    where
        F: FnOnce(&mut PipelineWorker<G, C>) + Send + 'static,
    {
        if !self.render_loop.handle().post(task) {
            tracing::debug!("pipeline call ignored after quit");
        }
    }

    pub fn grant_permission(&self, granted: bool) {
        self.post(move |worker| worker.session.grant_permission(granted));
    }

    /// Sets the capture size used by the next preview. Ignored while capturing.
    pub fn configure(&self, width: u32, height: u32) {
        self.post(move |worker| {
            worker.session.configure(width, height);
        });
    }

    pub fn open_camera(&self, identity: Option<CameraIdentity>) {
        self.post(move |worker| {
            let out = worker.session.open(identity);
            worker.apply(out);
        });
    }

    pub fn start_preview(&self) {
        self.post(|worker| worker.start_preview());
    }

    pub fn stop_capture(&self, close_camera: bool, quit_loop: bool) {
        self.post(move |worker| {
            let out = worker.session.stop_capture(close_camera, quit_loop);
            worker.apply(out);
        });
    }

    pub fn switch_camera(&self) {
        self.post(|worker| {
            let out = worker.session.switch_camera();
            worker.apply(out);
        });
    }

    pub fn pause_capture(&self) {
        self.post(|worker| {
            let out = worker.session.pause();
            worker.apply(out);
        });
    }

    pub fn resume_capture(&self) {
        self.post(|worker| {
            let out = worker.session.resume();
            worker.apply(out);
        });
    }

    /// Supplies (`Some`) or withdraws (`None`) the display target.
    pub fn set_display_target(&self, target: Option<DisplayTarget>) {
        if !self.is_alive() {
            tracing::debug!("display target ignored, pipeline is shutting down");
            return;
        }
        self.post(move |worker| worker.set_display_target(target));
    }

    pub fn resize_display_target(&self, width: u32, height: u32) {
        self.post(move |worker| worker.resize_display_target(width, height));
    }

    /// Closes session and camera, then quits the loop once the close has
    /// completed.
    pub fn release(&self) {
        self.stop_capture(true, true);
    }

    /// Tears down immediately, closing whatever is still open.
    pub fn quit(&self) {
        self.render_loop.handle().quit();
    }

    pub fn is_alive(&self) -> bool {
        self.render_loop.handle().is_alive()
    }

    pub fn signals(&self) -> &Receiver<PipelineSignal> {
        &self.signals
    }

    /// Blocks until the worker has drained its queue.
    pub fn wait_idle(&self) -> Result<(), LoopError> {
        self.render_loop.handle().wait_idle()
    }

    /// Waits for the worker to exit. Call after `release` or `quit`.
    pub fn join(self) -> Result<(), LoopError> {
        self.render_loop.join()
    }
}
