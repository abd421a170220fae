// SPDX-License-Identifier: GPL-3.0-only

//! Polygon geometry and packed bitmask rasterization
//!
//! Static privacy masks are user-drawn polygons in full-resolution frame
//! coordinates. They are rasterized into a 1-bit-per-pixel bitmask at a
//! quarter of the frame resolution, which is the format the blend unit
//! consumes together with one bounding ROI per polygon.

pub mod polygon;
pub mod raster;
pub mod types;

pub use polygon::{Polygon, rotate};
pub use raster::{BitmaskLayout, rasterize, rasterize_into};
pub use types::{PolygonRotation, Roi, Rotation, Vertex};
