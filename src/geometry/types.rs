// SPDX-License-Identifier: GPL-3.0-only

//! Plain geometry types shared by the rasterizer, blender and blend unit

use crate::errors::MaskError;
use serde::{Deserialize, Serialize};

/// A polygon vertex in full-resolution frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vertex {
    pub x: i32,
    pub y: i32,
}

impl Vertex {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<(i32, i32)> for Vertex {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

/// Rectangular region of interest in bitmask raster coordinates
///
/// A zero width or height means "ignore this region"; the rasterizer emits
/// such ROIs for polygons that fall entirely outside the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Check whether this ROI should be skipped by the blend unit
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Check whether a raster coordinate lies inside the ROI
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

/// Output rotation in degrees (clockwise)
///
/// A 90° or 270° rotation swaps the frame width and height, which changes
/// the bitmask raster layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Rotation {
    /// No rotation
    #[default]
    None,
    /// 90 degrees clockwise
    Rotate90,
    /// 180 degrees (upside down)
    Rotate180,
    /// 270 degrees clockwise (90 degrees counter-clockwise)
    Rotate270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::None,
        Rotation::Rotate90,
        Rotation::Rotate180,
        Rotation::Rotate270,
    ];

    /// Create a rotation from one of the four supported degree values
    pub fn from_degrees(degrees: u32) -> Result<Self, MaskError> {
        match degrees {
            0 => Ok(Rotation::None),
            90 => Ok(Rotation::Rotate90),
            180 => Ok(Rotation::Rotate180),
            270 => Ok(Rotation::Rotate270),
            other => Err(MaskError::InvalidArgument(format!(
                "unsupported rotation {}°, expected 0, 90, 180 or 270",
                other
            ))),
        }
    }

    /// Get the rotation in degrees
    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Rotate90 => 90,
            Rotation::Rotate180 => 180,
            Rotation::Rotate270 => 270,
        }
    }

    /// Check if rotation swaps width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, Rotation::Rotate90 | Rotation::Rotate270)
    }
}

impl TryFrom<u32> for Rotation {
    type Error = MaskError;

    fn try_from(degrees: u32) -> Result<Self, Self::Error> {
        Self::from_degrees(degrees)
    }
}

impl From<Rotation> for u32 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

impl std::fmt::Display for Rotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// How stored static-mask polygons relate to the output rotation
///
/// Polygons are always stored as supplied. With `FollowRotation` a rotated
/// copy is derived from the stored polygon each time the bitmask is rebuilt,
/// so repeated rotation changes never accumulate rounding error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolygonRotation {
    /// Polygons are in sensor-native coordinates and rasterized unrotated
    /// against the (possibly swapped) frame size
    #[default]
    SensorNative,
    /// Polygons are rotated about the frame center to match the output
    FollowRotation,
}
