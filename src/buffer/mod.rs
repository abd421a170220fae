// SPDX-License-Identifier: GPL-3.0-only

//! Bitmask buffer pooling and raw video frame access
//!
//! The blend unit reads the static bitmask from pooled device memory and
//! writes masked pixels in place on the frame buffer. This module describes
//! both sides of that contract.

pub mod bitmask;
pub mod frame;
pub mod pool;

pub use bitmask::Bitmask;
pub use frame::{FrameFormat, FrameView, Plane, with_gst_buffer};
pub use pool::{BufferPool, CacheSync, HeapBufferPool, PoolStats, PooledBuffer};
