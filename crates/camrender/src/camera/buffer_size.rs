use crate::types::{BufferSize, DEFAULT_CAPTURE_SIZE};

/// Picks the capture size for a requested resolution.
///
/// The request is normalised to landscape. A single scan keeps the first
/// advertised size that covers the target and replaces it whenever a later
/// covering size is itself covered by the current pick. With nothing covering
/// the target, [`DEFAULT_CAPTURE_SIZE`] is returned.
pub fn find_optimal_buffer_size(requested: BufferSize, sizes: &[BufferSize]) -> BufferSize {
    let target = requested.landscape();
    let mut best: Option<BufferSize> = None;
    for size in sizes {
        if !size.covers(&target) {
            continue;
        }
        match best {
            Some(current) if !current.covers(size) => {}
            _ => best = Some(*size),
        }
    }
    match best {
        Some(size) => size,
        None => {
            tracing::debug!(%target, "no advertised size covers target, using default");
            DEFAULT_CAPTURE_SIZE
        }
    }
}
