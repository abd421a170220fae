// SPDX-License-Identifier: GPL-3.0-only

//! Writable view of a raw video frame
//!
//! Frames are blended in place. A [`FrameView`] borrows the frame memory
//! plane by plane, with strides as delivered by the producer.

use crate::errors::{MaskError, MaskResult};
use gstreamer as gst;
use gstreamer_video as gst_video;
use std::time::Duration;

/// Pixel layouts the blend units understand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameFormat {
    /// Y plane followed by an interleaved, 2x2 subsampled UV plane
    Nv12,
    /// Packed 8-bit RGBA (alpha is left untouched)
    Rgba,
}

impl FrameFormat {
    pub fn plane_count(&self) -> usize {
        match self {
            FrameFormat::Nv12 => 2,
            FrameFormat::Rgba => 1,
        }
    }
}

impl std::fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameFormat::Nv12 => write!(f, "NV12"),
            FrameFormat::Rgba => write!(f, "RGBA"),
        }
    }
}

/// One image plane with its row stride in bytes
#[derive(Debug)]
pub struct Plane<'a> {
    pub data: &'a mut [u8],
    pub stride: usize,
}

/// Mutable frame passed to a blend unit
#[derive(Debug)]
pub struct FrameView<'a> {
    pub format: FrameFormat,
    pub width: u32,
    pub height: u32,
    /// Hardware timestamp used to match analytics results
    pub timestamp: Option<Duration>,
    pub planes: Vec<Plane<'a>>,
}

impl<'a> FrameView<'a> {
    /// Wrap packed RGBA memory
    pub fn rgba(
        data: &'a mut [u8],
        width: u32,
        height: u32,
        stride: usize,
        timestamp: Option<Duration>,
    ) -> MaskResult<Self> {
        check_plane("RGBA", data.len(), width as usize * 4, height as usize, stride)?;
        Ok(Self {
            format: FrameFormat::Rgba,
            width,
            height,
            timestamp,
            planes: vec![Plane { data, stride }],
        })
    }

    /// Wrap NV12 memory where the UV plane starts at `uv_offset`
    pub fn nv12(
        data: &'a mut [u8],
        width: u32,
        height: u32,
        y_stride: usize,
        uv_offset: usize,
        uv_stride: usize,
        timestamp: Option<Duration>,
    ) -> MaskResult<Self> {
        if uv_offset > data.len() {
            return Err(MaskError::InvalidArgument(format!(
                "UV offset {} is past the end of a {} byte frame",
                uv_offset,
                data.len()
            )));
        }
        let (y_plane, uv_plane) = data.split_at_mut(uv_offset);
        check_plane("Y", y_plane.len(), width as usize, height as usize, y_stride)?;
        check_plane(
            "UV",
            uv_plane.len(),
            width.div_ceil(2) as usize * 2,
            height.div_ceil(2) as usize,
            uv_stride,
        )?;

        Ok(Self {
            format: FrameFormat::Nv12,
            width,
            height,
            timestamp,
            planes: vec![
                Plane {
                    data: y_plane,
                    stride: y_stride,
                },
                Plane {
                    data: uv_plane,
                    stride: uv_stride,
                },
            ],
        })
    }

    /// Check that planes match the declared format
    pub fn validate(&self) -> MaskResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(MaskError::InvalidArgument("frame has zero size".into()));
        }
        if self.planes.len() != self.format.plane_count() {
            return Err(MaskError::InvalidArgument(format!(
                "{} frame needs {} planes, got {}",
                self.format,
                self.format.plane_count(),
                self.planes.len()
            )));
        }

        let width = self.width as usize;
        let height = self.height as usize;
        match self.format {
            FrameFormat::Rgba => {
                let plane = &self.planes[0];
                check_plane("RGBA", plane.data.len(), width * 4, height, plane.stride)
            }
            FrameFormat::Nv12 => {
                let (y, uv) = (&self.planes[0], &self.planes[1]);
                check_plane("Y", y.data.len(), width, height, y.stride)?;
                check_plane(
                    "UV",
                    uv.data.len(),
                    width.div_ceil(2) * 2,
                    height.div_ceil(2),
                    uv.stride,
                )
            }
        }
    }
}

/// Ensure a plane holds `rows` rows of `row_bytes` at `stride`
fn check_plane(name: &str, len: usize, row_bytes: usize, rows: usize, stride: usize) -> MaskResult<()> {
    if stride < row_bytes {
        return Err(MaskError::InvalidArgument(format!(
            "{} stride {} is smaller than row size {}",
            name, stride, row_bytes
        )));
    }
    let needed = if rows == 0 { 0 } else { stride * (rows - 1) + row_bytes };
    if len < needed {
        return Err(MaskError::InvalidArgument(format!(
            "{} plane is {} bytes, needs {}",
            name, len, needed
        )));
    }
    Ok(())
}

/// Map a GStreamer buffer writable and run `f` on its frame view
///
/// Plane offsets and strides come from `info`; the buffer PTS becomes the
/// frame timestamp.
pub fn with_gst_buffer<R>(
    buffer: &mut gst::BufferRef,
    info: &gst_video::VideoInfo,
    f: impl FnOnce(&mut FrameView<'_>) -> MaskResult<R>,
) -> MaskResult<R> {
    let format = match info.format() {
        gst_video::VideoFormat::Nv12 => FrameFormat::Nv12,
        gst_video::VideoFormat::Rgba | gst_video::VideoFormat::Rgbx => FrameFormat::Rgba,
        other => {
            return Err(MaskError::InvalidArgument(format!(
                "unsupported video format {:?}",
                other
            )));
        }
    };
    let timestamp = buffer.pts().map(|pts| Duration::from_nanos(pts.nseconds()));

    let mut map = buffer
        .map_writable()
        .map_err(|e| MaskError::Other(format!("Failed to map buffer: {}", e)))?;
    let data = map.as_mut_slice();

    let offsets = info.offset();
    let strides = info.stride();
    let mut view = match format {
        FrameFormat::Nv12 => {
            let start = offsets[0];
            let data = data.get_mut(start..).ok_or_else(|| {
                MaskError::InvalidArgument("Y plane offset outside buffer".into())
            })?;
            FrameView::nv12(
                data,
                info.width(),
                info.height(),
                strides[0] as usize,
                offsets[1] - start,
                strides[1] as usize,
                timestamp,
            )?
        }
        FrameFormat::Rgba => {
            let data = data.get_mut(offsets[0]..).ok_or_else(|| {
                MaskError::InvalidArgument("RGBA plane offset outside buffer".into())
            })?;
            FrameView::rgba(data, info.width(), info.height(), strides[0] as usize, timestamp)?
        }
    };

    f(&mut view)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba_size_checked() {
        let mut data = vec![0u8; 4 * 4 * 2];
        assert!(FrameView::rgba(&mut data, 4, 2, 16, None).is_ok());
        assert!(FrameView::rgba(&mut data, 4, 3, 16, None).is_err());
        assert!(FrameView::rgba(&mut data, 4, 2, 8, None).is_err());
    }

    #[test]
    fn test_nv12_planes_split_at_offset() {
        let mut data = vec![0u8; 8 * 4 + 8 * 2];
        let view = FrameView::nv12(&mut data, 8, 4, 8, 32, 8, None).unwrap();
        assert_eq!(view.planes.len(), 2);
        assert_eq!(view.planes[0].data.len(), 32);
        assert_eq!(view.planes[1].data.len(), 16);
        assert!(view.validate().is_ok());
    }

    #[test]
    fn test_nv12_short_uv_plane_rejected() {
        let mut data = vec![0u8; 8 * 4 + 8];
        assert!(FrameView::nv12(&mut data, 8, 4, 8, 32, 8, None).is_err());
    }

    #[test]
    fn test_gst_buffer_mapping() {
        gst::init().unwrap();
        let info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Nv12, 16, 8)
            .build()
            .unwrap();
        let mut buffer = gst::Buffer::with_size(info.size()).unwrap();
        {
            let buffer = buffer.get_mut().unwrap();
            buffer.set_pts(gst::ClockTime::from_mseconds(40));
            with_gst_buffer(buffer, &info, |frame| {
                assert_eq!(frame.format, FrameFormat::Nv12);
                assert_eq!((frame.width, frame.height), (16, 8));
                assert_eq!(frame.timestamp, Some(Duration::from_millis(40)));
                frame.planes[0].data.fill(200);
                Ok(())
            })
            .unwrap();
        }
        let map = buffer.map_readable().unwrap();
        assert_eq!(map.as_slice()[0], 200);
    }

    #[test]
    fn test_gst_unsupported_format() {
        gst::init().unwrap();
        let info = gst_video::VideoInfo::builder(gst_video::VideoFormat::I420, 16, 8)
            .build()
            .unwrap();
        let mut buffer = gst::Buffer::with_size(info.size()).unwrap();
        let result = with_gst_buffer(buffer.get_mut().unwrap(), &info, |_| Ok(()));
        assert!(matches!(result, Err(MaskError::InvalidArgument(_))));
    }
}
