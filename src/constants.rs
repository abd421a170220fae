// SPDX-License-Identifier: GPL-3.0-only

//! Engine-wide constants

use std::time::Duration;

/// Ratio between full frame resolution and the packed bitmask raster
pub const QUANTIZATION: f32 = 0.25;

/// Maximum number of static masks the blend unit accepts
pub const MAX_STATIC_MASKS: usize = 8;

/// Maximum number of vertices per static mask polygon
pub const MAX_POLYGON_VERTICES: usize = 8;

/// Minimum number of vertices for a polygon to enclose an area
pub const MIN_POLYGON_VERTICES: usize = 3;

/// Smallest allowed pixelization block size
pub const MIN_PIXELIZATION_SIZE: u32 = 2;

/// Largest allowed pixelization block size
pub const MAX_PIXELIZATION_SIZE: u32 = 64;

/// Default pixelization block size
pub const DEFAULT_PIXELIZATION_SIZE: u32 = 16;

/// Maximum number of dynamic (analytics-driven) regions per frame
pub const MAX_DYNAMIC_ROIS: usize = 100;

/// Window used to match a frame timestamp to an analytics entry
pub const DYNAMIC_MASK_QUERY_DELTA: Duration = Duration::from_millis(40);

/// How long a frame waits for a matching analytics entry
pub const DYNAMIC_MASK_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of bitmask buffers held by the default pool
pub const DEFAULT_POOL_DEPTH: usize = 1;

/// Retention used when an analytics config does not declare one
pub const DEFAULT_ANALYTICS_MAX_ENTRIES: usize = 10;

/// Number of raster bits packed into one bitmask byte
pub const BITS_PER_BYTE: usize = 8;

/// Check whether a pixelization size is accepted by the blend unit
pub fn is_valid_pixelization_size(size: u32) -> bool {
    (MIN_PIXELIZATION_SIZE..=MAX_PIXELIZATION_SIZE).contains(&size)
}

/// Scale a full-resolution dimension to bitmask raster resolution
pub fn quantize_dimension(dimension: u32) -> usize {
    (dimension as f32 * QUANTIZATION) as usize
}
