// SPDX-License-Identifier: GPL-3.0-only

//! Privacy-mask blending engine for camera media pipelines
//!
//! Hides regions of live video frames either with a solid color or by
//! pixelization. Regions come from two sources:
//!
//! - static masks: up to eight user-drawn polygons, rasterized into a packed
//!   1-bit bitmask at a quarter of the frame resolution
//! - dynamic masks: instance-segmentation results from an inference stage,
//!   matched to each frame by hardware timestamp
//!
//! # Architecture
//!
//! - [`geometry`]: polygons, rotation and scanline rasterization
//! - [`analytics`]: time-indexed store of detection and segmentation results
//! - [`buffer`]: pooled bitmask buffers and writable frame views
//! - [`blend`]: the blend-unit seam and its CPU implementation
//! - [`privacy_mask`]: the [`PrivacyMaskBlender`] tying everything together
//! - [`config`]: JSON configuration
//!
//! # Example
//!
//! ```no_run
//! use privacy_mask::{AnalyticsStore, FrameView, Polygon, PrivacyMaskBlender, Rgb};
//!
//! let blender = PrivacyMaskBlender::with_software_blend(1920, 1080, AnalyticsStore::global())?;
//! blender.add_static_mask(Polygon::from_points(
//!     "door",
//!     &[(100, 100), (400, 100), (400, 900), (100, 900)],
//! )?)?;
//! blender.set_color(Rgb::new(0, 0, 0));
//!
//! let mut pixels = vec![0u8; 1920 * 1080 * 4];
//! let mut frame = FrameView::rgba(&mut pixels, 1920, 1080, 1920 * 4, None)?;
//! blender.blend(&mut frame)?;
//! # Ok::<(), privacy_mask::MaskError>(())
//! ```

pub mod analytics;
pub mod blend;
pub mod buffer;
pub mod config;
pub mod constants;
pub mod errors;
pub mod geometry;
pub mod privacy_mask;

// Re-export commonly used types
pub use analytics::{AnalyticsConfig, AnalyticsEntry, AnalyticsStore, Detection, Query};
pub use blend::{BlendUnit, SoftwareBlendUnit};
pub use buffer::{FrameFormat, FrameView, HeapBufferPool};
pub use config::{DynamicMaskConfig, PrivacyMaskConfig};
pub use errors::{ErrorKind, MaskError, MaskResult};
pub use geometry::{Polygon, PolygonRotation, Roi, Rotation, Vertex};
pub use privacy_mask::{MaskInfo, MaskType, PrivacyMaskBlender, PrivacyMasks, Rgb};
