use crate::error::GraphicsError;
use crate::gpu::{GpuBackend, GraphicsContext, ProducerId, TextureId};
use crate::types::{BufferSize, Mat4};

/// External texture the camera writes into, plus its producer handle.
///
/// Buffering is latest-wins: an image not pulled before the next one arrives
/// is lost.
#[derive(Debug, Default)]
pub struct FrameSink {
    texture: Option<TextureId>,
    producer: Option<ProducerId>,
    size: Option<BufferSize>,
}

impl FrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh texture and producer at `size`, releasing any
    /// previous pair. The context must be current.
    pub fn prepare<G: GpuBackend>(
        &mut self,
        ctx: &mut GraphicsContext<G>,
        size: BufferSize,
    ) -> Result<ProducerId, GraphicsError> {
        if !ctx.is_any_current() {
            return Err(GraphicsError::NotCurrent);
        }
        self.release(ctx);
        let gl = ctx.gl()?;
        let texture = gl.create_external_texture()?;
        let producer = match gl.create_producer(texture, size) {
            Ok(producer) => producer,
            Err(err) => {
                gl.delete_texture(texture);
                return Err(err.into());
            }
        };
        tracing::debug!(?texture, ?producer, %size, "frame sink prepared");
        self.texture = Some(texture);
        self.producer = Some(producer);
        self.size = Some(size);
        Ok(producer)
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn producer(&self) -> Option<ProducerId> {
        self.producer
    }

    pub fn size(&self) -> Option<BufferSize> {
        self.size
    }

    pub fn is_prepared(&self) -> bool {
        self.producer.is_some()
    }

    /// Latches the newest image into the texture and returns its sampling
    /// transform. `None` when unprepared or nothing has been written yet.
    pub fn latest_frame<G: GpuBackend>(
        &mut self,
        ctx: &mut GraphicsContext<G>,
    ) -> Result<Option<Mat4>, GraphicsError> {
        let Some(producer) = self.producer else {
            return Ok(None);
        };
        Ok(ctx.gl()?.latest_image(producer)?)
    }

    /// Drops the texture and producer. Safe to call when unprepared.
    pub fn release<G: GpuBackend>(&mut self, ctx: &mut GraphicsContext<G>) {
        let producer = self.producer.take();
        let texture = self.texture.take();
        self.size = None;
        let Ok(gl) = ctx.gl() else {
            return;
        };
        if let Some(producer) = producer {
            gl.release_producer(producer);
        }
        if let Some(texture) = texture {
            gl.delete_texture(texture);
        }
    }
}
