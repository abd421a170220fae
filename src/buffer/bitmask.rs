// SPDX-License-Identifier: GPL-3.0-only

//! Rasterized static-mask bitmask held in a pooled buffer

use super::pool::{BufferPool, PooledBuffer};
use crate::errors::MaskResult;
use crate::geometry::{BitmaskLayout, Polygon, Roi, rasterize_into};
use tracing::debug;

/// Packed 1-bit raster of all enabled static masks
///
/// The backing buffer returns to its pool when the last handle is dropped.
#[derive(Debug)]
pub struct Bitmask {
    buffer: PooledBuffer,
}

impl Bitmask {
    /// Acquire a buffer from `pool` and rasterize `polygons` into it
    pub fn rasterize(pool: &dyn BufferPool, polygons: &[Polygon]) -> MaskResult<(Self, Vec<Roi>)> {
        let mut buffer = pool.acquire()?;
        let layout = buffer.layout();
        let rois = buffer.write_with(|data| rasterize_into(polygons, &layout, data))?;

        debug!(
            polygons = polygons.len(),
            width = layout.width,
            height = layout.height,
            "Rasterized static masks"
        );
        Ok((Self { buffer }, rois))
    }

    pub fn layout(&self) -> BitmaskLayout {
        self.buffer.layout()
    }

    pub fn data(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Whether raster pixel `(x, y)` is covered by a mask
    pub fn is_set(&self, x: usize, y: usize) -> bool {
        self.layout().is_set(self.data(), x, y)
    }

    pub fn count_set(&self) -> usize {
        self.layout().count_set(self.data())
    }
}
