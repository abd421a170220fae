// SPDX-License-Identifier: GPL-3.0-only

//! Blend request passed to a blend unit

use crate::buffer::{Bitmask, FrameView};
use crate::errors::MaskResult;
use crate::geometry::Roi;
use crate::privacy_mask::{DynamicRoi, MaskInfo, PrivacyMasks};

/// Static sub-block of a blend request
#[derive(Debug, Clone, Copy)]
pub enum StaticLayer<'a> {
    Absent,
    Present { bitmask: &'a Bitmask, rois: &'a [Roi] },
}

/// Dynamic sub-block of a blend request
#[derive(Debug, Clone, Copy)]
pub enum DynamicLayer<'a> {
    Absent,
    Present {
        rois: &'a [DynamicRoi],
        aspect_ratio_correction: f32,
    },
}

/// Parameters for one in-place blend
#[derive(Debug, Clone, Copy)]
pub struct BlendParams<'a> {
    pub mode: MaskInfo,
    pub static_layer: StaticLayer<'a>,
    pub dynamic_layer: DynamicLayer<'a>,
}

impl<'a> BlendParams<'a> {
    pub fn from_masks(masks: &'a PrivacyMasks) -> Self {
        let static_layer = match &masks.static_data.bitmask {
            Some(bitmask) => StaticLayer::Present {
                bitmask: bitmask.as_ref(),
                rois: &masks.static_data.rois,
            },
            None => StaticLayer::Absent,
        };
        let dynamic_layer = match &masks.dynamic_data {
            Some(dynamic) if !dynamic.rois.is_empty() => DynamicLayer::Present {
                rois: &dynamic.rois,
                aspect_ratio_correction: dynamic.aspect_ratio_correction,
            },
            _ => DynamicLayer::Absent,
        };

        Self {
            mode: masks.info,
            static_layer,
            dynamic_layer,
        }
    }
}

/// Hardware or software unit that masks a frame in place
pub trait BlendUnit: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Apply `params` to `frame`; failures are reported as
    /// [`MaskError::DspOperation`](crate::errors::MaskError::DspOperation)
    fn blend(&self, frame: &mut FrameView<'_>, params: &BlendParams<'_>) -> MaskResult<()>;
}
