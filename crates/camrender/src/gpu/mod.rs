//! Graphics side of the pipeline: the EGL/GLES capability traits, the single
//! rendering context, and the textured-quad program.

pub mod context;
pub mod crop;
pub mod platform;
pub mod program;

pub use context::{GraphicsContext, SurfaceSlot, ANCHOR_SURFACE_SIZE};
pub use crop::{center_crop, TexCoords};
pub use platform::{
    ConfigId, ConfigRequest, ContextId, DrawCall, EglPlatform, FramebufferId, Gles, GpuBackend,
    ProducerId, ProgramId, SurfaceId, TextureId, TextureTarget, Viewport,
};
pub use program::TextureProgram;
