// SPDX-License-Identifier: GPL-3.0-only

//! Time-indexed store of detection and instance-segmentation results
//!
//! Inference stages publish results keyed by an analytics stream id and a
//! monotonic timestamp; the privacy-mask stage looks them up by the hardware
//! timestamp of the frame it is about to blend, waiting for late results.

pub mod store;
pub mod types;

pub use store::AnalyticsStore;
pub use types::{
    AnalyticsConfig, AnalyticsEntry, AnalyticsKind, BoundingBox, DeltaSearchPolicy, Detection,
    InstanceMask, NetworkConfig, Query, QueryKind, ScalingMode,
};
