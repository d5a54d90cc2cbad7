use std::fmt;

use raw_window_handle::RawWindowHandle;

/// Column-major 4x4 matrix as consumed by the GLES uniform upload.
pub type Mat4 = [f32; 16];

/// Identity transform.
pub const IDENTITY: Mat4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Rotation about the Z axis by `degrees`, counter-clockwise.
pub fn rotation_z(degrees: f32) -> Mat4 {
    let radians = degrees.to_radians();
    let (sin, cos) = radians.sin_cos();
    let mut m = IDENTITY;
    m[0] = cos;
    m[1] = sin;
    m[4] = -sin;
    m[5] = cos;
    m
}

/// Capture resolution used when the hardware advertises nothing that covers
/// the requested size.
pub const DEFAULT_CAPTURE_SIZE: BufferSize = BufferSize::new(640, 480);

/// Lens facing of the active camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CameraIdentity {
    Front,
    #[default]
    Back,
}

impl CameraIdentity {
    /// The opposite lens.
    pub fn toggled(self) -> Self {
        match self {
            CameraIdentity::Front => CameraIdentity::Back,
            CameraIdentity::Back => CameraIdentity::Front,
        }
    }
}

impl fmt::Display for CameraIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraIdentity::Front => f.write_str("front"),
            CameraIdentity::Back => f.write_str("back"),
        }
    }
}

/// A capture resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferSize {
    pub width: u32,
    pub height: u32,
}

impl BufferSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when both dimensions are at least as large as `other`'s.
    pub fn covers(&self, other: &BufferSize) -> bool {
        self.width >= other.width && self.height >= other.height
    }

    /// Returns the size with width >= height.
    pub fn landscape(self) -> Self {
        if self.width < self.height {
            Self::new(self.height, self.width)
        } else {
            self
        }
    }
}

impl fmt::Display for BufferSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Orientation of the display relative to its natural orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees % 360 {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Captured images are always landscape; at 0 and 180 degrees the device
    /// is held upright, so the viewport must be compared transposed.
    pub fn transposes_viewport(self) -> bool {
        matches!(self, Rotation::Deg0 | Rotation::Deg180)
    }
}

/// Platform window a display surface can be created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeWindow(RawWindowHandle);

impl NativeWindow {
    pub fn new(raw: RawWindowHandle) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> RawWindowHandle {
        self.0
    }
}

// SAFETY: the handle is an opaque token while it travels between threads. It
// is only handed to the graphics platform on the render loop worker, which is
// the sole owner of every surface created from it.
unsafe impl Send for NativeWindow {}

/// Output surface supplied by the UI layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayTarget {
    pub window: NativeWindow,
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
}

impl DisplayTarget {
    pub fn new(window: NativeWindow, width: u32, height: u32) -> Self {
        Self {
            window,
            width,
            height,
            rotation: Rotation::default(),
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }
}
