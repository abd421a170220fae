// SPDX-License-Identifier: GPL-3.0-only

//! CPU blend unit
//!
//! Masks NV12 and RGBA frames in place. Coverage comes from the static
//! bitmask (upscaled from raster resolution) and from analytics regions
//! mapped back from network coordinates onto the frame.

use super::params::{BlendParams, BlendUnit, DynamicLayer, StaticLayer};
use crate::analytics::ScalingMode;
use crate::buffer::{Bitmask, FrameFormat, FrameView, Plane};
use crate::constants::{QUANTIZATION, is_valid_pixelization_size};
use crate::errors::{MaskError, MaskResult};
use crate::geometry::{BitmaskLayout, Roi};
use crate::privacy_mask::{DynamicRoi, MaskInfo};
use tracing::trace;

/// Blend unit running on the CPU
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareBlendUnit;

impl SoftwareBlendUnit {
    pub fn new() -> Self {
        Self
    }
}

impl BlendUnit for SoftwareBlendUnit {
    fn name(&self) -> &str {
        "software"
    }

    fn blend(&self, frame: &mut FrameView<'_>, params: &BlendParams<'_>) -> MaskResult<()> {
        frame.validate().map_err(into_dsp)?;
        if let MaskInfo::Pixelization { size } = params.mode
            && !is_valid_pixelization_size(size)
        {
            return Err(MaskError::DspOperation(format!(
                "pixelization size {} out of range",
                size
            )));
        }

        if let StaticLayer::Present { bitmask, rois } = params.static_layer {
            blend_static(frame, params.mode, bitmask, rois)?;
        }

        if let DynamicLayer::Present {
            rois,
            aspect_ratio_correction,
        } = params.dynamic_layer
        {
            for roi in rois {
                if let Some(region) =
                    DynamicRegion::map(roi, aspect_ratio_correction, frame.width, frame.height)
                {
                    apply(frame, params.mode, region.rect, &|x, y| region.covers(x, y));
                }
            }
        }

        Ok(())
    }
}

fn into_dsp(error: MaskError) -> MaskError {
    match error {
        MaskError::DspOperation(_) => error,
        other => MaskError::DspOperation(other.to_string()),
    }
}

fn blend_static(
    frame: &mut FrameView<'_>,
    mode: MaskInfo,
    bitmask: &Bitmask,
    rois: &[Roi],
) -> MaskResult<()> {
    let expected = BitmaskLayout::for_frame(frame.width, frame.height);
    if bitmask.layout() != expected {
        return Err(MaskError::DspOperation(format!(
            "bitmask raster {}x{} does not match {}x{} frame",
            bitmask.layout().width,
            bitmask.layout().height,
            frame.width,
            frame.height
        )));
    }

    // One pass over the union keeps overlapping masks from averaging twice
    let Some(union) = rois
        .iter()
        .filter(|roi| !roi.is_empty())
        .map(|roi| PixelRect::from_raster(roi, &expected, frame.width, frame.height))
        .reduce(PixelRect::union)
    else {
        return Ok(());
    };

    trace!(
        x = union.x0,
        y = union.y0,
        width = union.x1 - union.x0,
        height = union.y1 - union.y0,
        "Blending static masks"
    );
    apply(frame, mode, union, &|x, y| {
        bitmask.is_set(
            raster_coord(x, expected.width),
            raster_coord(y, expected.height),
        )
    });
    Ok(())
}

/// Raster cell for a frame coordinate; trailing pixels past the last full
/// cell belong to the last cell
fn raster_coord(frame_coord: u32, raster_len: usize) -> usize {
    let coord = (frame_coord as f32 * QUANTIZATION) as usize;
    coord.min(raster_len.saturating_sub(1))
}

/// Half-open pixel rectangle in frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelRect {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl PixelRect {
    fn from_raster(
        roi: &Roi,
        layout: &BitmaskLayout,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        let scale = |v: u32, limit: u32| ((v as f32 / QUANTIZATION) as u32).min(limit);
        // An ROI touching the raster edge extends to the frame edge
        let scale_end = |v: u32, raster_len: usize, limit: u32| {
            if v as usize >= raster_len {
                limit
            } else {
                scale(v, limit)
            }
        };
        Self {
            x0: scale(roi.x, frame_width),
            y0: scale(roi.y, frame_height),
            x1: scale_end(roi.x + roi.width, layout.width, frame_width),
            y1: scale_end(roi.y + roi.height, layout.height, frame_height),
        }
    }

    fn union(self, other: Self) -> Self {
        Self {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// Dynamic region resolved to frame pixels, with dilated coverage
struct DynamicRegion {
    rect: PixelRect,
    coverage: Vec<bool>,
}

impl DynamicRegion {
    fn map(roi: &DynamicRoi, correction: f32, frame_width: u32, frame_height: u32) -> Option<Self> {
        let (sx, sy) = axis_scale(roi.scaling_mode, correction);
        let to_frame = |v: f32, scale: f32| (v - 0.5) * scale + 0.5;

        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let left = to_frame(roi.bbox.xmin, sx) * fw;
        let right = to_frame(roi.bbox.xmax(), sx) * fw;
        let top = to_frame(roi.bbox.ymin, sy) * fh;
        let bottom = to_frame(roi.bbox.ymax(), sy) * fh;
        if !(right > left && bottom > top) {
            return None;
        }

        let dilation = roi.dilation as f32;
        let clamp_x = |v: f32| v.clamp(0.0, fw) as u32;
        let clamp_y = |v: f32| v.clamp(0.0, fh) as u32;
        let rect = PixelRect {
            x0: clamp_x((left - dilation).floor()),
            y0: clamp_y((top - dilation).floor()),
            x1: clamp_x((right + dilation).ceil()),
            y1: clamp_y((bottom + dilation).ceil()),
        };
        if rect.is_empty() {
            return None;
        }

        let width = rect.width() as usize;
        let height = rect.height() as usize;
        let mut coverage = vec![false; width * height];
        for row in 0..height {
            let cy = (rect.y0 as usize + row) as f32 + 0.5;
            if cy < top || cy >= bottom {
                continue;
            }
            for col in 0..width {
                let cx = (rect.x0 as usize + col) as f32 + 0.5;
                if cx < left || cx >= right {
                    continue;
                }
                coverage[row * width + col] = match &roi.mask {
                    Some(mask) => {
                        let u = ((cx - left) / (right - left) * mask.width as f32) as u32;
                        let v = ((cy - top) / (bottom - top) * mask.height as f32) as u32;
                        mask.is_set(u, v)
                    }
                    None => true,
                };
            }
        }

        if roi.dilation > 0 {
            let radius = roi.dilation as usize;
            coverage = dilate(&coverage, width, height, 1, width, radius);
            coverage = dilate(&coverage, height, width, width, 1, radius);
        }

        Some(Self { rect, coverage })
    }

    fn covers(&self, x: u32, y: u32) -> bool {
        if x < self.rect.x0 || x >= self.rect.x1 || y < self.rect.y0 || y >= self.rect.y1 {
            return false;
        }
        let index = (y - self.rect.y0) as usize * self.rect.width() as usize + (x - self.rect.x0) as usize;
        self.coverage[index]
    }
}

/// Per-axis scale from network-normalized to frame-normalized coordinates
fn axis_scale(mode: ScalingMode, correction: f32) -> (f32, f32) {
    if !(correction.is_finite() && correction > 0.0) {
        return (1.0, 1.0);
    }
    match mode {
        ScalingMode::Stretch => (1.0, 1.0),
        // Padding bars shrink the content along the short axis
        ScalingMode::Letterbox if correction >= 1.0 => (1.0, correction),
        ScalingMode::Letterbox => (1.0 / correction, 1.0),
        // The network saw only the central part of the long axis
        ScalingMode::Crop if correction >= 1.0 => (1.0 / correction, 1.0),
        ScalingMode::Crop => (1.0, correction),
    }
}

/// One-dimensional max filter along lines of a row-major grid
fn dilate(
    grid: &[bool],
    len: usize,
    lines: usize,
    step: usize,
    line_step: usize,
    radius: usize,
) -> Vec<bool> {
    let mut out = vec![false; grid.len()];
    let mut prefix = vec![0u32; len + 1];
    for line in 0..lines {
        let base = line * line_step;
        for i in 0..len {
            prefix[i + 1] = prefix[i] + u32::from(grid[base + i * step]);
        }
        for i in 0..len {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(len);
            out[base + i * step] = prefix[hi] > prefix[lo];
        }
    }
    out
}

/// Plane geometry relative to full-resolution frame pixels
#[derive(Debug, Clone, Copy)]
struct PlaneLayout {
    bytes_per_pixel: usize,
    channels: usize,
    subsample: u32,
    width: u32,
    height: u32,
}

impl PlaneLayout {
    /// Plane-space bounds of a frame rectangle
    fn project(&self, rect: PixelRect) -> (u32, u32, u32, u32) {
        let s = self.subsample;
        (
            rect.x0 / s,
            rect.y0 / s,
            rect.x1.div_ceil(s).min(self.width),
            rect.y1.div_ceil(s).min(self.height),
        )
    }

    fn offset(&self, plane: &Plane<'_>, x: u32, y: u32) -> usize {
        y as usize * plane.stride + x as usize * self.bytes_per_pixel
    }
}

fn apply(frame: &mut FrameView<'_>, mode: MaskInfo, rect: PixelRect, covered: &dyn Fn(u32, u32) -> bool) {
    if rect.is_empty() {
        return;
    }
    let (width, height) = (frame.width, frame.height);

    match frame.format {
        FrameFormat::Rgba => {
            let layout = PlaneLayout {
                bytes_per_pixel: 4,
                channels: 3,
                subsample: 1,
                width,
                height,
            };
            match mode {
                MaskInfo::Color(rgb) => {
                    fill(&mut frame.planes[0], layout, rect, covered, &[rgb.r, rgb.g, rgb.b])
                }
                MaskInfo::Pixelization { size } => {
                    pixelate(&mut frame.planes[0], layout, rect, covered, size)
                }
            }
        }
        FrameFormat::Nv12 => {
            let luma = PlaneLayout {
                bytes_per_pixel: 1,
                channels: 1,
                subsample: 1,
                width,
                height,
            };
            let chroma = PlaneLayout {
                bytes_per_pixel: 2,
                channels: 2,
                subsample: 2,
                width: width.div_ceil(2),
                height: height.div_ceil(2),
            };
            match mode {
                MaskInfo::Color(rgb) => {
                    let (y, u, v) = rgb.to_yuv();
                    fill(&mut frame.planes[0], luma, rect, covered, &[y]);
                    fill(&mut frame.planes[1], chroma, rect, covered, &[u, v]);
                }
                MaskInfo::Pixelization { size } => {
                    pixelate(&mut frame.planes[0], luma, rect, covered, size);
                    pixelate(&mut frame.planes[1], chroma, rect, covered, size);
                }
            }
        }
    }
}

fn fill(
    plane: &mut Plane<'_>,
    layout: PlaneLayout,
    rect: PixelRect,
    covered: &dyn Fn(u32, u32) -> bool,
    values: &[u8],
) {
    let s = layout.subsample;
    let (x0, y0, x1, y1) = layout.project(rect);
    for y in y0..y1 {
        for x in x0..x1 {
            if covered(x * s, y * s) {
                let offset = layout.offset(plane, x, y);
                plane.data[offset..offset + layout.channels].copy_from_slice(values);
            }
        }
    }
}

/// Replace covered pixels with the mean of their grid-aligned block
fn pixelate(
    plane: &mut Plane<'_>,
    layout: PlaneLayout,
    rect: PixelRect,
    covered: &dyn Fn(u32, u32) -> bool,
    block_size: u32,
) {
    let s = layout.subsample;
    let block = (block_size / s).max(1);
    let (x0, y0, x1, y1) = layout.project(rect);
    let channels = layout.channels;

    let mut by = y0 / block * block;
    while by < y1 {
        let block_bottom = (by + block).min(layout.height);
        let mut bx = x0 / block * block;
        while bx < x1 {
            let block_right = (bx + block).min(layout.width);

            let mut sums = [0u32; 4];
            let mut count = 0u32;
            for y in by..block_bottom {
                for x in bx..block_right {
                    let offset = layout.offset(plane, x, y);
                    for (c, sum) in sums.iter_mut().enumerate().take(channels) {
                        *sum += u32::from(plane.data[offset + c]);
                    }
                    count += 1;
                }
            }

            if count > 0 {
                let mut mean = [0u8; 4];
                for c in 0..channels {
                    mean[c] = ((sums[c] + count / 2) / count) as u8;
                }
                for y in by.max(y0)..block_bottom.min(y1) {
                    for x in bx.max(x0)..block_right.min(x1) {
                        if covered(x * s, y * s) {
                            let offset = layout.offset(plane, x, y);
                            plane.data[offset..offset + channels].copy_from_slice(&mean[..channels]);
                        }
                    }
                }
            }

            bx += block;
        }
        by += block;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{BoundingBox, InstanceMask};
    use crate::buffer::{BufferPool, HeapBufferPool};
    use crate::geometry::Polygon;
    use crate::privacy_mask::Rgb;

    const RED: Rgb = Rgb::new(255, 0, 0);

    fn rgba_frame(width: u32, height: u32) -> Vec<u8> {
        let mut data = vec![0u8; (width * height * 4) as usize];
        for (i, px) in data.chunks_exact_mut(4).enumerate() {
            let v = (i % 251) as u8;
            px.copy_from_slice(&[v, v, v, 255]);
        }
        data
    }

    fn pixel(data: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let o = ((y * width + x) * 4) as usize;
        [data[o], data[o + 1], data[o + 2], data[o + 3]]
    }

    fn bitmask_for(width: u32, height: u32, polygons: &[Polygon]) -> (Bitmask, Vec<Roi>, HeapBufferPool) {
        let mut pool = HeapBufferPool::new(1);
        pool.reinit(BitmaskLayout::for_frame(width, height)).unwrap();
        let (bitmask, rois) = Bitmask::rasterize(&pool, polygons).unwrap();
        (bitmask, rois, pool)
    }

    fn dynamic_roi(bbox: BoundingBox, dilation: u32) -> DynamicRoi {
        DynamicRoi {
            label: "person".into(),
            bbox,
            mask: None,
            network_width: 64,
            network_height: 64,
            scaling_mode: ScalingMode::Stretch,
            dilation,
        }
    }

    #[test]
    fn test_static_color_fill_rgba() {
        let square = Polygon::from_points("a", &[(8, 8), (24, 8), (24, 24), (8, 24)]).unwrap();
        let (bitmask, rois, _pool) = bitmask_for(32, 32, &[square]);
        let mut data = rgba_frame(32, 32);
        let mut frame = FrameView::rgba(&mut data, 32, 32, 128, None).unwrap();
        let params = BlendParams {
            mode: MaskInfo::Color(RED),
            static_layer: StaticLayer::Present {
                bitmask: &bitmask,
                rois: &rois,
            },
            dynamic_layer: DynamicLayer::Absent,
        };

        SoftwareBlendUnit.blend(&mut frame, &params).unwrap();
        assert_eq!(pixel(&data, 32, 8, 8), [255, 0, 0, 255]);
        assert_eq!(pixel(&data, 32, 23, 23), [255, 0, 0, 255]);
        assert_ne!(pixel(&data, 32, 7, 8), [255, 0, 0, 255]);
        assert_ne!(pixel(&data, 32, 24, 24), [255, 0, 0, 255]);
    }

    #[test]
    fn test_static_color_fill_nv12() {
        let square = Polygon::from_points("a", &[(0, 0), (16, 0), (16, 16), (0, 16)]).unwrap();
        let (bitmask, rois, _pool) = bitmask_for(32, 16, &[square]);
        let mut data = vec![16u8; 32 * 16 + 32 * 8];
        let mut frame = FrameView::nv12(&mut data, 32, 16, 32, 32 * 16, 32, None).unwrap();
        let params = BlendParams {
            mode: MaskInfo::Color(Rgb::new(255, 255, 255)),
            static_layer: StaticLayer::Present {
                bitmask: &bitmask,
                rois: &rois,
            },
            dynamic_layer: DynamicLayer::Absent,
        };

        SoftwareBlendUnit.blend(&mut frame, &params).unwrap();
        assert_eq!(data[0], 255);
        assert_eq!(data[15], 255);
        assert_eq!(data[16], 16);
        let uv = 32 * 16;
        assert_eq!(&data[uv..uv + 2], &[128, 128]);
        assert_eq!(&data[uv + 16..uv + 18], &[16, 16]);
    }

    #[test]
    fn test_full_frame_mask_covers_trailing_pixels() {
        // 30x9 quantizes to a 7x2 raster, leaving two columns and one row past the last cell
        let full = Polygon::from_points("all", &[(0, 0), (30, 0), (30, 9), (0, 9)]).unwrap();
        let (bitmask, rois, _pool) = bitmask_for(30, 9, &[full]);
        let mut data = rgba_frame(30, 9);
        let mut frame = FrameView::rgba(&mut data, 30, 9, 120, None).unwrap();
        let params = BlendParams {
            mode: MaskInfo::Color(RED),
            static_layer: StaticLayer::Present {
                bitmask: &bitmask,
                rois: &rois,
            },
            dynamic_layer: DynamicLayer::Absent,
        };

        SoftwareBlendUnit.blend(&mut frame, &params).unwrap();
        for y in 0..9 {
            for x in 0..30 {
                assert_eq!(pixel(&data, 30, x, y), [255, 0, 0, 255], "pixel ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_raster_coord_clamps_to_last_cell() {
        assert_eq!(raster_coord(27, 7), 6);
        assert_eq!(raster_coord(28, 7), 6);
        assert_eq!(raster_coord(29, 7), 6);
        assert_eq!(raster_coord(3, 7), 0);
    }

    #[test]
    fn test_pixelization_averages_blocks() {
        let full = Polygon::from_points("all", &[(0, 0), (8, 0), (8, 8), (0, 8)]).unwrap();
        let (bitmask, rois, _pool) = bitmask_for(8, 8, &[full]);
        let mut data = vec![0u8; 8 * 8 * 4];
        for y in 0..8u32 {
            for x in 0..8u32 {
                let o = ((y * 8 + x) * 4) as usize;
                let v = if x < 4 { 0 } else { 200 };
                data[o..o + 4].copy_from_slice(&[v, v, v, 255]);
            }
        }
        let mut frame = FrameView::rgba(&mut data, 8, 8, 32, None).unwrap();
        let params = BlendParams {
            mode: MaskInfo::Pixelization { size: 8 },
            static_layer: StaticLayer::Present {
                bitmask: &bitmask,
                rois: &rois,
            },
            dynamic_layer: DynamicLayer::Absent,
        };

        SoftwareBlendUnit.blend(&mut frame, &params).unwrap();
        assert_eq!(pixel(&data, 8, 0, 0), [100, 100, 100, 255]);
        assert_eq!(pixel(&data, 8, 7, 7), [100, 100, 100, 255]);
    }

    #[test]
    fn test_layout_mismatch_is_dsp_error() {
        let square = Polygon::from_points("a", &[(0, 0), (16, 0), (16, 16), (0, 16)]).unwrap();
        let (bitmask, rois, _pool) = bitmask_for(64, 64, &[square]);
        let mut data = rgba_frame(32, 32);
        let mut frame = FrameView::rgba(&mut data, 32, 32, 128, None).unwrap();
        let params = BlendParams {
            mode: MaskInfo::Color(RED),
            static_layer: StaticLayer::Present {
                bitmask: &bitmask,
                rois: &rois,
            },
            dynamic_layer: DynamicLayer::Absent,
        };
        let result = SoftwareBlendUnit.blend(&mut frame, &params);
        assert!(matches!(result, Err(MaskError::DspOperation(_))));
    }

    #[test]
    fn test_invalid_pixelization_rejected() {
        let mut data = rgba_frame(8, 8);
        let mut frame = FrameView::rgba(&mut data, 8, 8, 32, None).unwrap();
        let params = BlendParams {
            mode: MaskInfo::Pixelization { size: 1 },
            static_layer: StaticLayer::Absent,
            dynamic_layer: DynamicLayer::Absent,
        };
        let result = SoftwareBlendUnit.blend(&mut frame, &params);
        assert!(matches!(result, Err(MaskError::DspOperation(_))));
    }

    #[test]
    fn test_dynamic_box_with_dilation() {
        let mut data = rgba_frame(64, 64);
        let mut frame = FrameView::rgba(&mut data, 64, 64, 256, None).unwrap();
        let rois = [dynamic_roi(BoundingBox::new(0.25, 0.25, 0.25, 0.25), 2)];
        let params = BlendParams {
            mode: MaskInfo::Color(RED),
            static_layer: StaticLayer::Absent,
            dynamic_layer: DynamicLayer::Present {
                rois: &rois,
                aspect_ratio_correction: 1.0,
            },
        };

        SoftwareBlendUnit.blend(&mut frame, &params).unwrap();
        // Box covers [16, 32) on both axes, dilated by 2
        assert_eq!(pixel(&data, 64, 14, 14), [255, 0, 0, 255]);
        assert_eq!(pixel(&data, 64, 33, 33), [255, 0, 0, 255]);
        assert_ne!(pixel(&data, 64, 13, 20), [255, 0, 0, 255]);
        assert_ne!(pixel(&data, 64, 34, 20), [255, 0, 0, 255]);
    }

    #[test]
    fn test_dynamic_instance_mask_sampling() {
        let mut data = rgba_frame(16, 16);
        let mut frame = FrameView::rgba(&mut data, 16, 16, 64, None).unwrap();
        // Left half of the instance mask is set
        let mask = InstanceMask::new(2, 1, vec![1u8, 0]).unwrap();
        let mut roi = dynamic_roi(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 0);
        roi.mask = Some(mask);
        let rois = [roi];
        let params = BlendParams {
            mode: MaskInfo::Color(RED),
            static_layer: StaticLayer::Absent,
            dynamic_layer: DynamicLayer::Present {
                rois: &rois,
                aspect_ratio_correction: 1.0,
            },
        };

        SoftwareBlendUnit.blend(&mut frame, &params).unwrap();
        assert_eq!(pixel(&data, 16, 0, 0), [255, 0, 0, 255]);
        assert_eq!(pixel(&data, 16, 7, 15), [255, 0, 0, 255]);
        assert_ne!(pixel(&data, 16, 8, 0), [255, 0, 0, 255]);
    }

    #[test]
    fn test_letterbox_correction_maps_vertical_axis() {
        // 2:1 source letterboxed into a square network: content spans y in [0.25, 0.75)
        let (sx, sy) = axis_scale(ScalingMode::Letterbox, 2.0);
        assert_eq!((sx, sy), (1.0, 2.0));
        let to_frame = |v: f32| (v - 0.5) * sy + 0.5;
        assert_eq!(to_frame(0.25), 0.0);
        assert_eq!(to_frame(0.75), 1.0);

        let (sx, sy) = axis_scale(ScalingMode::Crop, 2.0);
        assert_eq!((sx, sy), (0.5, 1.0));
        assert_eq!(axis_scale(ScalingMode::Stretch, 2.0), (1.0, 1.0));
    }

    #[test]
    fn test_dilate_grows_by_radius() {
        let mut grid = vec![false; 7];
        grid[3] = true;
        let out = dilate(&grid, 7, 1, 1, 7, 2);
        assert_eq!(out, vec![false, true, true, true, true, true, false]);
    }
}
