// SPDX-License-Identifier: GPL-3.0-only

//! Static-mask polygons

use super::types::{Rotation, Vertex};
use crate::constants::{MAX_POLYGON_VERTICES, MIN_POLYGON_VERTICES};
use crate::errors::{MaskError, MaskResult};
use serde::{Deserialize, Serialize};

/// A closed polygon identified by a unique id
///
/// Vertices are in full-resolution frame pixels and may describe a convex,
/// concave or self-intersecting outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Polygon {
    pub id: String,
    pub vertices: Vec<Vertex>,
}

impl Polygon {
    /// Create a validated polygon
    pub fn new(id: impl Into<String>, vertices: Vec<Vertex>) -> MaskResult<Self> {
        let polygon = Self {
            id: id.into(),
            vertices,
        };
        polygon.validate()?;
        Ok(polygon)
    }

    /// Create a validated polygon from `(x, y)` pairs
    pub fn from_points(id: impl Into<String>, points: &[(i32, i32)]) -> MaskResult<Self> {
        Self::new(id, points.iter().copied().map(Vertex::from).collect())
    }

    /// Check the id and vertex-count invariants
    ///
    /// Deserialized polygons bypass [`Polygon::new`], so every consumer
    /// re-validates before use.
    pub fn validate(&self) -> MaskResult<()> {
        if self.id.is_empty() {
            return Err(MaskError::InvalidArgument(
                "polygon id must not be empty".into(),
            ));
        }

        let count = self.vertices.len();
        if !(MIN_POLYGON_VERTICES..=MAX_POLYGON_VERTICES).contains(&count) {
            return Err(MaskError::InvalidArgument(format!(
                "polygon '{}' has {} vertices, expected {} to {}",
                self.id, count, MIN_POLYGON_VERTICES, MAX_POLYGON_VERTICES
            )));
        }

        Ok(())
    }

    /// Derive the polygon as seen after rotating the output frame
    ///
    /// Vertices are rotated about the center of the unrotated frame and then
    /// translated so that center lands on the center of the rotated frame,
    /// whose axes are swapped for 90° and 270°.
    pub fn rotated_into_frame(
        &self,
        rotation: Rotation,
        frame_width: u32,
        frame_height: u32,
    ) -> Polygon {
        let mut rotated = self.clone();
        if rotation == Rotation::None {
            return rotated;
        }

        // Clockwise output rotation is a negative angle in the y-up convention
        rotate(
            &mut rotated,
            -f64::from(rotation.degrees()),
            frame_width,
            frame_height,
        );

        if rotation.swaps_dimensions() {
            let shift_x = (f64::from(frame_height) - f64::from(frame_width)) / 2.0;
            let shift_y = (f64::from(frame_width) - f64::from(frame_height)) / 2.0;
            for vertex in &mut rotated.vertices {
                vertex.x = (f64::from(vertex.x) + shift_x).round() as i32;
                vertex.y = (f64::from(vertex.y) + shift_y).round() as i32;
            }
        }

        rotated
    }
}

/// Rotate every vertex of a polygon about the frame center, in place
///
/// Image-space y grows downwards, so y is flipped around the center before
/// applying the standard counter-clockwise rotation and flipped back after.
/// Results are rounded to the nearest pixel; composing rotations is exact
/// only for multiples of 90° on even frame sizes.
pub fn rotate(polygon: &mut Polygon, angle_degrees: f64, frame_width: u32, frame_height: u32) {
    let center_x = f64::from(frame_width) / 2.0;
    let center_y = f64::from(frame_height) / 2.0;
    let (sin, cos) = angle_degrees.to_radians().sin_cos();

    for vertex in &mut polygon.vertices {
        let dx = f64::from(vertex.x) - center_x;
        let dy = center_y - f64::from(vertex.y);

        let rx = dx * cos - dy * sin;
        let ry = dx * sin + dy * cos;

        vertex.x = (center_x + rx).round() as i32;
        vertex.y = (center_y - ry).round() as i32;
    }
}
