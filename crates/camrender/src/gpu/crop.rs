/// Texture coordinates for a triangle-strip quad: bottom-left, bottom-right,
/// top-left, top-right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexCoords(pub [f32; 8]);

impl TexCoords {
    pub const FULL: TexCoords = TexCoords([
        0.0, 0.0, //
        1.0, 0.0, //
        0.0, 1.0, //
        1.0, 1.0,
    ]);

    fn inset(du: f32, dv: f32) -> Self {
        TexCoords([
            du,
            dv,
            1.0 - du,
            dv,
            du,
            1.0 - dv,
            1.0 - du,
            1.0 - dv,
        ])
    }

    /// Visible `(u, v)` extents.
    pub fn span(&self) -> (f32, f32) {
        (self.0[2] - self.0[0], self.0[5] - self.0[1])
    }
}

/// Texture coordinates that fill a `dst_width x dst_height` viewport with a
/// `src_width x src_height` image, cropping the oversized axis about its centre.
pub fn center_crop(src_width: u32, src_height: u32, dst_width: u32, dst_height: u32) -> TexCoords {
    if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
        return TexCoords::FULL;
    }
    let src = src_width as f32 / src_height as f32;
    let dst = dst_width as f32 / dst_height as f32;
    if (src - dst).abs() <= f32::EPSILON {
        TexCoords::FULL
    } else if src > dst {
        let visible = dst / src;
        TexCoords::inset((1.0 - visible) / 2.0, 0.0)
    } else {
        let visible = src / dst;
        TexCoords::inset(0.0, (1.0 - visible) / 2.0)
    }
}
