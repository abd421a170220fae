// SPDX-License-Identifier: GPL-3.0-only

//! Blend units apply privacy masks to frames in place
//!
//! The production target offloads this to a DSP; [`SoftwareBlendUnit`]
//! implements the same contract on the CPU.

pub mod params;
pub mod software;

pub use params::{BlendParams, BlendUnit, DynamicLayer, StaticLayer};
pub use software::SoftwareBlendUnit;
