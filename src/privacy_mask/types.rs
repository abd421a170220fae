// SPDX-License-Identifier: GPL-3.0-only

//! Mask descriptions handed from the blender to a blend unit

use crate::analytics::{BoundingBox, InstanceMask, ScalingMode};
use crate::buffer::Bitmask;
use crate::geometry::Roi;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 8-bit RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Full-range BT.601 luma and chroma
    pub fn to_yuv(&self) -> (u8, u8, u8) {
        let r = f32::from(self.r);
        let g = f32::from(self.g);
        let b = f32::from(self.b);
        let y = 0.299 * r + 0.587 * g + 0.114 * b;
        let u = -0.169 * r - 0.331 * g + 0.500 * b + 128.0;
        let v = 0.500 * r - 0.419 * g - 0.081 * b + 128.0;
        (clamp_u8(y), clamp_u8(u), clamp_u8(v))
    }
}

fn clamp_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// How masked pixels are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskType {
    /// Solid color fill
    #[default]
    Color,
    /// Block averaging ("blur" on the hardware unit)
    Pixelization,
}

impl std::fmt::Display for MaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaskType::Color => write!(f, "color"),
            MaskType::Pixelization => write!(f, "pixelization"),
        }
    }
}

/// Active mask mode together with its parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaskInfo {
    Color(Rgb),
    Pixelization { size: u32 },
}

impl MaskInfo {
    pub fn mask_type(&self) -> MaskType {
        match self {
            MaskInfo::Color(_) => MaskType::Color,
            MaskInfo::Pixelization { .. } => MaskType::Pixelization,
        }
    }
}

impl Default for MaskInfo {
    fn default() -> Self {
        MaskInfo::Color(Rgb::BLACK)
    }
}

/// Static masks rasterized for the current frame size
///
/// `bitmask` is `None` when no static mask is enabled; `rois` then is empty.
#[derive(Debug, Clone, Default)]
pub struct StaticMaskData {
    pub bitmask: Option<Arc<Bitmask>>,
    /// Bounding box of each polygon in bitmask raster coordinates
    pub rois: Vec<Roi>,
}

impl StaticMaskData {
    pub fn is_empty(&self) -> bool {
        self.bitmask.is_none()
    }
}

/// One analytics-driven region to mask
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicRoi {
    pub label: String,
    /// Bounding box in normalized network coordinates
    pub bbox: BoundingBox,
    /// Instance mask over `bbox`; `None` masks the whole box
    pub mask: Option<InstanceMask>,
    pub network_width: u32,
    pub network_height: u32,
    pub scaling_mode: ScalingMode,
    /// Dilation radius in frame pixels
    pub dilation: u32,
}

/// Dynamic regions matched to one frame
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicMaskData {
    pub rois: Vec<DynamicRoi>,
    /// Source aspect ratio divided by network aspect ratio
    pub aspect_ratio_correction: f32,
}

/// Everything a blend unit needs for one frame
#[derive(Debug, Clone, Default)]
pub struct PrivacyMasks {
    pub info: MaskInfo,
    pub static_data: StaticMaskData,
    pub dynamic_data: Option<DynamicMaskData>,
}

impl PrivacyMasks {
    /// Whether blending would leave the frame untouched
    pub fn is_empty(&self) -> bool {
        self.static_data.is_empty()
            && self
                .dynamic_data
                .as_ref()
                .is_none_or(|dynamic| dynamic.rois.is_empty())
    }
}
