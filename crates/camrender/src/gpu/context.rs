use crate::error::GraphicsError;
use crate::gpu::platform::{ConfigId, ConfigRequest, ContextId, GpuBackend, SurfaceId};
use crate::types::NativeWindow;

/// Side length of the offscreen pbuffer that keeps the context bindable
/// before any display target exists.
pub const ANCHOR_SURFACE_SIZE: u32 = 16;

/// Logical surface slots. Each holds at most one live surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceSlot {
    /// Offscreen pbuffer created with the context.
    Anchor,
    /// Window surface for the current display target.
    Display,
}

/// The single rendering context owned by a render loop, together with the
/// backend it was created on.
pub struct GraphicsContext<G: GpuBackend> {
    backend: G,
    config: ConfigId,
    context: ContextId,
    gl_version: u32,
    anchor: Option<SurfaceId>,
    display: Option<SurfaceId>,
    destroyed: bool,
}

impl<G: GpuBackend> GraphicsContext<G> {
    /// Initialises the display and creates an RGBA8888 context at
    /// `gl_version`, falling back from GLES 3 to GLES 2 when the former has no
    /// matching config.
    pub fn create(mut backend: G, gl_version: u32) -> Result<Self, GraphicsError> {
        backend.initialize().map_err(GraphicsError::DisplayInit)?;

        let mut version = gl_version;
        let config = loop {
            let request = ConfigRequest::rgba8888(version);
            match backend.choose_config(&request)? {
                Some(config) => break config,
                None if version > 2 => {
                    tracing::warn!(requested = version, "no config for GL tier, trying GLES 2");
                    version = 2;
                }
                None => {
                    backend.terminate();
                    return Err(GraphicsError::NoConfig(gl_version));
                }
            }
        };

        let context = match backend.create_context(config, version) {
            Ok(context) => context,
            Err(err) => {
                backend.terminate();
                return Err(GraphicsError::ContextCreation(err));
            }
        };
        tracing::debug!(gl_version = version, ?context, "rendering context created");

        Ok(Self {
            backend,
            config,
            context,
            gl_version: version,
            anchor: None,
            display: None,
            destroyed: false,
        })
    }

    pub fn gl_version(&self) -> u32 {
        self.gl_version
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn ensure_alive(&self) -> Result<(), GraphicsError> {
        if self.destroyed {
            Err(GraphicsError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn slot(&self, slot: SurfaceSlot) -> Option<SurfaceId> {
        match slot {
            SurfaceSlot::Anchor => self.anchor,
            SurfaceSlot::Display => self.display,
        }
    }

    fn slot_mut(&mut self, slot: SurfaceSlot) -> &mut Option<SurfaceId> {
        match slot {
            SurfaceSlot::Anchor => &mut self.anchor,
            SurfaceSlot::Display => &mut self.display,
        }
    }

    pub fn has_surface(&self, slot: SurfaceSlot) -> bool {
        self.slot(slot).is_some()
    }

    /// Creates the offscreen anchor surface.
    pub fn create_anchor_surface(&mut self) -> Result<(), GraphicsError> {
        self.ensure_alive()?;
        if self.anchor.is_some() {
            return Err(GraphicsError::SlotOccupied(SurfaceSlot::Anchor));
        }
        let surface = self
            .backend
            .create_pbuffer_surface(self.config, ANCHOR_SURFACE_SIZE, ANCHOR_SURFACE_SIZE)
            .map_err(|source| GraphicsError::SurfaceCreation {
                slot: SurfaceSlot::Anchor,
                source,
            })?;
        self.anchor = Some(surface);
        Ok(())
    }

    /// Wraps `window` as the display surface.
    pub fn create_display_surface(&mut self, window: &NativeWindow) -> Result<(), GraphicsError> {
        self.ensure_alive()?;
        if self.display.is_some() {
            return Err(GraphicsError::SlotOccupied(SurfaceSlot::Display));
        }
        let surface = self
            .backend
            .create_window_surface(self.config, window)
            .map_err(|source| GraphicsError::SurfaceCreation {
                slot: SurfaceSlot::Display,
                source,
            })?;
        tracing::debug!(?surface, "display surface created");
        self.display = Some(surface);
        Ok(())
    }

    pub fn make_current(&mut self, slot: SurfaceSlot) -> Result<(), GraphicsError> {
        self.ensure_alive()?;
        let surface = self.slot(slot).ok_or(GraphicsError::NoSurface(slot))?;
        if !self.backend.is_current(self.context, surface) {
            self.backend.make_current(self.context, surface)?;
        }
        Ok(())
    }

    pub fn is_current(&self, slot: SurfaceSlot) -> bool {
        if self.destroyed {
            return false;
        }
        self.slot(slot)
            .map(|surface| self.backend.is_current(self.context, surface))
            .unwrap_or(false)
    }

    /// True when any of this context's surfaces is bound.
    pub fn is_any_current(&self) -> bool {
        self.is_current(SurfaceSlot::Anchor) || self.is_current(SurfaceSlot::Display)
    }

    /// Presents `slot`. Returns `false` without error when the surface is not
    /// current or the context is single-buffered.
    pub fn swap(&mut self, slot: SurfaceSlot) -> Result<bool, GraphicsError> {
        self.ensure_alive()?;
        let Some(surface) = self.slot(slot) else {
            return Ok(false);
        };
        if self.backend.is_single_buffered(self.context)
            || !self.backend.is_current(self.context, surface)
        {
            return Ok(false);
        }
        self.backend.swap_buffers(surface)?;
        Ok(true)
    }

    /// Destroys the surface in `slot`, unbinding it first if it is current.
    /// Empty slots are ignored.
    pub fn release_surface(&mut self, slot: SurfaceSlot) -> Result<(), GraphicsError> {
        self.ensure_alive()?;
        let Some(surface) = self.slot_mut(slot).take() else {
            return Ok(());
        };
        if self.backend.is_current(self.context, surface) {
            self.backend.make_nothing_current()?;
        }
        self.backend.destroy_surface(surface);
        tracing::debug!(?slot, ?surface, "surface released");
        Ok(())
    }

    /// GLES entry points, available while the context is alive.
    pub fn gl(&mut self) -> Result<&mut G, GraphicsError> {
        self.ensure_alive()?;
        Ok(&mut self.backend)
    }

    /// Read-only access to the backend, e.g. for reporting.
    pub fn backend(&self) -> &G {
        &self.backend
    }

    /// Tears down every surface and the context. Later calls are no-ops.
    pub fn destroy(&mut self) {
        if self.destroyed {
            tracing::debug!("rendering context already destroyed");
            return;
        }
        if let Err(err) = self.backend.make_nothing_current() {
            tracing::warn!(error = %err, "unable to unbind context before destroy");
        }
        for slot in [SurfaceSlot::Display, SurfaceSlot::Anchor] {
            if let Some(surface) = self.slot_mut(slot).take() {
                self.backend.destroy_surface(surface);
            }
        }
        self.backend.destroy_context(self.context);
        self.backend.terminate();
        self.destroyed = true;
        tracing::debug!(context = ?self.context, "rendering context destroyed");
    }
}

impl<G: GpuBackend> Drop for GraphicsContext<G> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::sim::SimHardware;

    fn context() -> (SimHardware, GraphicsContext<crate::sim::SimGpu>) {
        let hardware = SimHardware::new();
        let ctx = GraphicsContext::create(hardware.gpu(), 3).expect("context");
        (hardware, ctx)
    }

    #[test]
    fn occupied_slot_is_rejected() {
        let (_hw, mut ctx) = context();
        ctx.create_anchor_surface().unwrap();
        assert!(matches!(
            ctx.create_anchor_surface(),
            Err(GraphicsError::SlotOccupied(SurfaceSlot::Anchor))
        ));
        ctx.release_surface(SurfaceSlot::Anchor).unwrap();
        ctx.create_anchor_surface().unwrap();
    }

    #[test]
    fn swap_is_noop_when_not_current() {
        let (hardware, mut ctx) = context();
        ctx.create_anchor_surface().unwrap();
        ctx.create_display_surface(&hardware.window(1)).unwrap();
        ctx.make_current(SurfaceSlot::Anchor).unwrap();
        assert!(!ctx.swap(SurfaceSlot::Display).unwrap());
        ctx.make_current(SurfaceSlot::Display).unwrap();
        assert!(ctx.swap(SurfaceSlot::Display).unwrap());
        assert_eq!(hardware.gpu_report().swaps, 1);
    }

    #[test]
    fn swap_is_noop_when_single_buffered() {
        let hardware = SimHardware::new().single_buffered();
        let mut ctx = GraphicsContext::create(hardware.gpu(), 3).unwrap();
        ctx.create_anchor_surface().unwrap();
        ctx.make_current(SurfaceSlot::Anchor).unwrap();
        assert!(!ctx.swap(SurfaceSlot::Anchor).unwrap());
    }

    #[test]
    fn destroy_runs_once_and_blocks_further_use() {
        let (hardware, mut ctx) = context();
        ctx.create_anchor_surface().unwrap();
        ctx.destroy();
        ctx.destroy();
        assert!(matches!(ctx.make_current(SurfaceSlot::Anchor), Err(GraphicsError::Destroyed)));
        drop(ctx);
        let report = hardware.gpu_report();
        assert_eq!(report.contexts_destroyed, 1);
        assert_eq!(report.terminations, 1);
        assert_eq!(report.live_surfaces, 0);
    }

    #[test]
    fn falls_back_to_gles2_without_gles3_config() {
        let hardware = SimHardware::new().without_gles3();
        let ctx = GraphicsContext::create(hardware.gpu(), 3).unwrap();
        assert_eq!(ctx.gl_version(), 2);
    }

    #[test]
    fn display_init_failure_is_reported() {
        let hardware = SimHardware::new().fail_display_init();
        let err = GraphicsContext::create(hardware.gpu(), 3).err().expect("init error");
        assert!(matches!(err, GraphicsError::DisplayInit(_)));
    }
}
