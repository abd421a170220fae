// SPDX-License-Identifier: GPL-3.0-only

//! Privacy-mask orchestration
//!
//! [`PrivacyMaskBlender`] owns the mask configuration, rebuilds the static
//! bitmask only when the configuration changed, pulls per-frame dynamic
//! regions from the analytics store and hands everything to a blend unit.

pub mod blender;
pub mod types;

pub use blender::PrivacyMaskBlender;
pub use types::{
    DynamicMaskData, DynamicRoi, MaskInfo, MaskType, PrivacyMasks, Rgb, StaticMaskData,
};
