// SPDX-License-Identifier: GPL-3.0-only

//! Scanline rasterization of polygons into a packed 1-bit bitmask
//!
//! Each polygon is filled with the classic active-edge-table algorithm using
//! the even-odd rule, sampling at pixel centers. Polygons are OR-ed into the
//! destination, so overlapping masks produce their union.
//!
//! Bits are packed MSB-first: raster pixel `x` of a row lives in byte `x / 8`
//! at bit `7 - x % 8`.

use super::polygon::Polygon;
use super::types::Roi;
use crate::constants::{BITS_PER_BYTE, QUANTIZATION, quantize_dimension};
use crate::errors::{MaskError, MaskResult};
use std::cmp::Ordering;

/// Dimensions of a packed bitmask raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BitmaskLayout {
    /// Raster width in pixels (bits)
    pub width: usize,
    /// Raster height in rows
    pub height: usize,
    /// Bytes per row, padded to a whole number of bytes
    pub stride: usize,
}

impl BitmaskLayout {
    /// Layout of the quantized bitmask for a full-resolution frame
    pub fn for_frame(frame_width: u32, frame_height: u32) -> Self {
        Self::new(
            quantize_dimension(frame_width),
            quantize_dimension(frame_height),
        )
    }

    /// Layout for an explicit raster size
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            stride: width.div_ceil(BITS_PER_BYTE),
        }
    }

    /// Total size of the packed buffer in bytes
    pub fn size(&self) -> usize {
        self.stride * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Read one raster bit from a packed buffer laid out with `self`
    pub fn is_set(&self, data: &[u8], x: usize, y: usize) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        data.get(y * self.stride + x / BITS_PER_BYTE)
            .is_some_and(|byte| byte & (0x80 >> (x % BITS_PER_BYTE)) != 0)
    }

    /// Count set bits, ignoring row padding
    pub fn count_set(&self, data: &[u8]) -> usize {
        (0..self.height)
            .map(|y| (0..self.width).filter(|&x| self.is_set(data, x, y)).count())
            .sum()
    }
}

/// Rasterize polygons for a full-resolution frame into a new buffer
///
/// Returns the packed bitmask and one ROI per polygon, in input order.
pub fn rasterize(
    polygons: &[Polygon],
    frame_width: u32,
    frame_height: u32,
) -> MaskResult<(Vec<u8>, Vec<Roi>)> {
    let layout = BitmaskLayout::for_frame(frame_width, frame_height);
    let mut bits = vec![0u8; layout.size()];
    let rois = rasterize_into(polygons, &layout, &mut bits)?;
    Ok((bits, rois))
}

/// Rasterize polygons into a caller-provided packed buffer
///
/// The buffer is cleared first. Its length must equal `layout.size()`;
/// a mismatch means the buffer was allocated for a different layout and is
/// reported as a configuration error.
pub fn rasterize_into(
    polygons: &[Polygon],
    layout: &BitmaskLayout,
    dest: &mut [u8],
) -> MaskResult<Vec<Roi>> {
    if dest.len() != layout.size() {
        return Err(MaskError::Configuration(format!(
            "bitmask buffer is {} bytes but layout {}x{} (stride {}) needs {}",
            dest.len(),
            layout.width,
            layout.height,
            layout.stride,
            layout.size()
        )));
    }

    dest.fill(0);

    let mut rois = Vec::with_capacity(polygons.len());
    for polygon in polygons {
        polygon.validate()?;

        let points: Vec<(f32, f32)> = polygon
            .vertices
            .iter()
            .map(|v| (v.x as f32 * QUANTIZATION, v.y as f32 * QUANTIZATION))
            .collect();

        let roi = bounding_roi(&points, layout);
        if !roi.is_empty() {
            fill_polygon(&points, layout, dest);
        }
        rois.push(roi);
    }

    Ok(rois)
}

/// Clamped, integer bounding box of scaled points
fn bounding_roi(points: &[(f32, f32)], layout: &BitmaskLayout) -> Roi {
    let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
    let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
    for &(x, y) in points {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }

    let width = layout.width as f32;
    let height = layout.height as f32;
    if max_x <= 0.0 || max_y <= 0.0 || min_x >= width || min_y >= height {
        return Roi::default();
    }

    let x0 = min_x.max(0.0).floor() as u32;
    let y0 = min_y.max(0.0).floor() as u32;
    let x1 = max_x.min(width).ceil() as u32;
    let y1 = max_y.min(height).ceil() as u32;

    if x1 <= x0 || y1 <= y0 {
        return Roi::default();
    }
    Roi::new(x0, y0, x1 - x0, y1 - y0)
}

/// Non-horizontal polygon edge, oriented top to bottom
#[derive(Debug, Clone, Copy)]
struct Edge {
    y_top: f32,
    y_bottom: f32,
    x_top: f32,
    /// dx per unit of y
    inverse_slope: f32,
}

#[derive(Debug, Clone, Copy)]
struct ActiveEdge {
    x: f32,
    y_bottom: f32,
    inverse_slope: f32,
}

fn build_edge_table(points: &[(f32, f32)]) -> Vec<Edge> {
    let mut edges: Vec<Edge> = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .filter(|((_, ya), (_, yb))| ya != yb)
        .map(|(&a, &b)| {
            let ((x_top, y_top), (x_bottom, y_bottom)) = if a.1 < b.1 { (a, b) } else { (b, a) };
            Edge {
                y_top,
                y_bottom,
                x_top,
                inverse_slope: (x_bottom - x_top) / (y_bottom - y_top),
            }
        })
        .collect();

    edges.sort_by(|a, b| {
        a.y_top
            .total_cmp(&b.y_top)
            .then(a.x_top.total_cmp(&b.x_top))
            .then(a.inverse_slope.total_cmp(&b.inverse_slope))
    });
    edges
}

fn fill_polygon(points: &[(f32, f32)], layout: &BitmaskLayout, dest: &mut [u8]) {
    let edges = build_edge_table(points);
    let Some(first) = edges.first() else {
        return;
    };

    let y_max = edges.iter().map(|e| e.y_bottom).fold(f32::MIN, f32::max);
    let first_row = (first.y_top - 0.5).ceil().max(0.0) as usize;
    let end_row = ((y_max - 0.5).ceil().max(0.0) as usize).min(layout.height);

    let mut next_edge = 0;
    let mut active: Vec<ActiveEdge> = Vec::with_capacity(edges.len());

    for row in first_row..end_row {
        let sample_y = row as f32 + 0.5;

        // Retire edges that ended above this scanline and step the rest
        active.retain(|edge| edge.y_bottom > sample_y);

        while next_edge < edges.len() && edges[next_edge].y_top <= sample_y {
            let edge = edges[next_edge];
            next_edge += 1;
            if edge.y_bottom > sample_y {
                active.push(ActiveEdge {
                    x: edge.x_top + (sample_y - edge.y_top) * edge.inverse_slope,
                    y_bottom: edge.y_bottom,
                    inverse_slope: edge.inverse_slope,
                });
            }
        }

        active.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal));

        let row_bytes = &mut dest[row * layout.stride..(row + 1) * layout.stride];
        for pair in active.chunks_exact(2) {
            let start = span_bound(pair[0].x, layout.width);
            let end = span_bound(pair[1].x, layout.width);
            if start < end {
                fill_span(row_bytes, start, end);
            }
        }

        for edge in &mut active {
            edge.x += edge.inverse_slope;
        }
    }
}

/// First pixel whose center lies at or right of `x`, clamped to the row
fn span_bound(x: f32, width: usize) -> usize {
    (x - 0.5).ceil().clamp(0.0, width as f32) as usize
}

/// Set bits `[start, end)` of a packed row
fn fill_span(row: &mut [u8], start: usize, end: usize) {
    let first_byte = start / BITS_PER_BYTE;
    let last_byte = (end - 1) / BITS_PER_BYTE;
    let head = 0xFFu8 >> (start % BITS_PER_BYTE);
    let tail = 0xFFu8 << (BITS_PER_BYTE - 1 - (end - 1) % BITS_PER_BYTE);

    if first_byte == last_byte {
        row[first_byte] |= head & tail;
        return;
    }

    row[first_byte] |= head;
    row[first_byte + 1..last_byte].fill(0xFF);
    row[last_byte] |= tail;
}
