use crate::error::GraphicsError;
use crate::gpu::crop::{center_crop, TexCoords};
use crate::gpu::platform::{
    DrawCall, FramebufferId, Gles, ProgramId, TextureId, TextureTarget, Viewport,
};
use crate::types::{BufferSize, Mat4, Rotation, IDENTITY};

struct OffscreenTarget {
    framebuffer: FramebufferId,
    texture: TextureId,
    size: Viewport,
}

/// Linked textured-quad program for one sampler kind.
pub struct TextureProgram {
    program: ProgramId,
    sampler: TextureTarget,
    offscreen: Option<OffscreenTarget>,
}

impl TextureProgram {
    /// Links the program. The owning context must be current.
    pub fn new<G: Gles>(gl: &mut G, sampler: TextureTarget) -> Result<Self, GraphicsError> {
        let program = gl.link_program(sampler).map_err(GraphicsError::ProgramLink)?;
        tracing::debug!(?program, ?sampler, "texture program linked");
        Ok(Self {
            program,
            sampler,
            offscreen: None,
        })
    }

    pub fn id(&self) -> ProgramId {
        self.program
    }

    pub fn sampler(&self) -> TextureTarget {
        self.sampler
    }

    /// Full-viewport draw of `texture`.
    pub fn draw<G: Gles>(
        &self,
        gl: &mut G,
        mvp: &Mat4,
        tex_matrix: &Mat4,
        texture: TextureId,
        width: u32,
        height: u32,
    ) -> Result<(), GraphicsError> {
        self.submit(gl, mvp, tex_matrix, texture, Viewport { width, height }, TexCoords::FULL, None)
    }

    /// Draws `texture` filling the viewport, center-cropping the landscape
    /// `source` image. At 0 and 180 degrees the crop is computed against the
    /// transposed viewport.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_viewport_fit<G: Gles>(
        &self,
        gl: &mut G,
        mvp: &Mat4,
        tex_matrix: &Mat4,
        texture: TextureId,
        source: BufferSize,
        width: u32,
        height: u32,
        rotation: Rotation,
    ) -> Result<(), GraphicsError> {
        let (crop_w, crop_h) = if rotation.transposes_viewport() {
            (height, width)
        } else {
            (width, height)
        };
        let coords = center_crop(source.width, source.height, crop_w, crop_h);
        self.submit(gl, mvp, tex_matrix, texture, Viewport { width, height }, coords, None)
    }

    /// Renders `texture` with identity transforms into a lazily created
    /// framebuffer and returns the backing 2D texture.
    pub fn draw_to_framebuffer<G: Gles>(
        &mut self,
        gl: &mut G,
        texture: TextureId,
        width: u32,
        height: u32,
    ) -> Result<TextureId, GraphicsError> {
        let size = Viewport { width, height };
        let target = match self.offscreen.take() {
            Some(target) if target.size == size => target,
            stale => {
                if let Some(stale) = stale {
                    tracing::debug!(?size, "offscreen target resized");
                    gl.delete_framebuffer(stale.framebuffer);
                    gl.delete_texture(stale.texture);
                }
                let color = gl.create_texture_2d(width, height)?;
                let framebuffer = match gl.create_framebuffer(color) {
                    Ok(framebuffer) => framebuffer,
                    Err(err) => {
                        gl.delete_texture(color);
                        return Err(err.into());
                    }
                };
                OffscreenTarget {
                    framebuffer,
                    texture: color,
                    size,
                }
            }
        };
        let (framebuffer, color) = (target.framebuffer, target.texture);
        self.offscreen = Some(target);
        self.submit(gl, &IDENTITY, &IDENTITY, texture, size, TexCoords::FULL, Some(framebuffer))?;
        Ok(color)
    }

    #[allow(clippy::too_many_arguments)]
    fn submit<G: Gles>(
        &self,
        gl: &mut G,
        mvp: &Mat4,
        tex_matrix: &Mat4,
        texture: TextureId,
        viewport: Viewport,
        tex_coords: TexCoords,
        framebuffer: Option<FramebufferId>,
    ) -> Result<(), GraphicsError> {
        let call = DrawCall {
            program: self.program,
            sampler: self.sampler,
            texture,
            mvp: *mvp,
            tex_matrix: *tex_matrix,
            tex_coords,
            viewport,
            framebuffer,
        };
        gl.draw(&call)?;
        Ok(())
    }

    fn release_offscreen<G: Gles>(&mut self, gl: &mut G) {
        if let Some(target) = self.offscreen.take() {
            gl.delete_framebuffer(target.framebuffer);
            gl.delete_texture(target.texture);
        }
    }

    /// Deletes the program and any offscreen target. The owning context must
    /// be current.
    pub fn release<G: Gles>(mut self, gl: &mut G) {
        self.release_offscreen(gl);
        gl.delete_program(self.program);
        tracing::debug!(program = ?self.program, "texture program released");
    }
}
