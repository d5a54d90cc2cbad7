//! Capability traits over the EGL display and the GLES entry points the
//! pipeline needs. Handles are opaque to the core and never dereferenced.

use crate::error::PlatformError;
use crate::gpu::crop::TexCoords;
use crate::types::{BufferSize, Mat4, NativeWindow};

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub $inner);
    };
}

opaque_id!(ConfigId(u64));
opaque_id!(ContextId(u64));
opaque_id!(SurfaceId(u64));
opaque_id!(TextureId(u32));
opaque_id!(ProgramId(u32));
opaque_id!(FramebufferId(u32));
opaque_id!(
    /// Producer side of an external texture; the camera writes into it.
    ProducerId(u64)
);

/// Sampler kind a texture (and the program drawing it) is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    /// Camera-backed external image (`GL_TEXTURE_EXTERNAL_OES`).
    External,
    Texture2d,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigRequest {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
    pub client_version: u32,
    pub recordable: bool,
}

impl ConfigRequest {
    pub fn rgba8888(client_version: u32) -> Self {
        Self {
            red: 8,
            green: 8,
            blue: 8,
            alpha: 8,
            client_version,
            recordable: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// One textured-quad draw. `framebuffer` of `None` targets the current surface.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub program: ProgramId,
    pub sampler: TextureTarget,
    pub texture: TextureId,
    pub mvp: Mat4,
    pub tex_matrix: Mat4,
    pub tex_coords: TexCoords,
    pub viewport: Viewport,
    pub framebuffer: Option<FramebufferId>,
}

pub trait EglPlatform {
    fn initialize(&mut self) -> Result<(), PlatformError>;
    fn choose_config(&mut self, request: &ConfigRequest) -> Result<Option<ConfigId>, PlatformError>;
    fn create_context(
        &mut self,
        config: ConfigId,
        client_version: u32,
    ) -> Result<ContextId, PlatformError>;
    fn create_window_surface(
        &mut self,
        config: ConfigId,
        window: &NativeWindow,
    ) -> Result<SurfaceId, PlatformError>;
    fn create_pbuffer_surface(
        &mut self,
        config: ConfigId,
        width: u32,
        height: u32,
    ) -> Result<SurfaceId, PlatformError>;
    fn make_current(&mut self, context: ContextId, surface: SurfaceId)
        -> Result<(), PlatformError>;
    fn make_nothing_current(&mut self) -> Result<(), PlatformError>;
    fn is_current(&self, context: ContextId, surface: SurfaceId) -> bool;
    fn is_single_buffered(&self, context: ContextId) -> bool;
    fn swap_buffers(&mut self, surface: SurfaceId) -> Result<(), PlatformError>;
    fn destroy_surface(&mut self, surface: SurfaceId);
    fn destroy_context(&mut self, context: ContextId);
    fn terminate(&mut self);
}

/// GLES calls. Every method assumes the owning context is current.
pub trait Gles {
    fn create_external_texture(&mut self) -> Result<TextureId, PlatformError>;
    fn create_texture_2d(&mut self, width: u32, height: u32) -> Result<TextureId, PlatformError>;
    fn delete_texture(&mut self, texture: TextureId);
    fn link_program(&mut self, sampler: TextureTarget) -> Result<ProgramId, PlatformError>;
    fn delete_program(&mut self, program: ProgramId);
    fn create_framebuffer(&mut self, color: TextureId) -> Result<FramebufferId, PlatformError>;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);
    fn draw(&mut self, call: &DrawCall) -> Result<(), PlatformError>;
    fn create_producer(
        &mut self,
        texture: TextureId,
        size: BufferSize,
    ) -> Result<ProducerId, PlatformError>;
    /// Latches the newest image into the producer's texture. `None` until the
    /// first image has been written.
    fn latest_image(&mut self, producer: ProducerId) -> Result<Option<Mat4>, PlatformError>;
    fn release_producer(&mut self, producer: ProducerId);
}

pub trait GpuBackend: EglPlatform + Gles {}

impl<T: EglPlatform + Gles> GpuBackend for T {}
