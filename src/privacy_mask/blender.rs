// SPDX-License-Identifier: GPL-3.0-only

//! Privacy-mask blender
//!
//! All state lives behind one mutex. Configuration calls and per-frame
//! queries serialize on it, so a frame never sees a half-applied edit.
//!
//! The static bitmask and the mask mode are cached in the last output and
//! only rebuilt when a mutation marked them dirty. Dynamic regions are
//! looked up in the analytics store on every query.

use super::types::{DynamicMaskData, DynamicRoi, MaskInfo, MaskType, PrivacyMasks, Rgb, StaticMaskData};
use crate::analytics::{AnalyticsKind, AnalyticsStore, Query};
use crate::blend::{BlendParams, BlendUnit, SoftwareBlendUnit};
use crate::buffer::{Bitmask, BufferPool, FrameView, HeapBufferPool, PoolStats, with_gst_buffer};
use crate::config::{DynamicMaskConfig, PrivacyMaskConfig};
use crate::constants::{
    DEFAULT_PIXELIZATION_SIZE, DEFAULT_POOL_DEPTH, DYNAMIC_MASK_QUERY_DELTA,
    DYNAMIC_MASK_QUERY_TIMEOUT, MAX_DYNAMIC_ROIS, MAX_STATIC_MASKS, is_valid_pixelization_size,
};
use crate::errors::{MaskError, MaskResult};
use crate::geometry::{BitmaskLayout, Polygon, PolygonRotation, Rotation};
use gstreamer as gst;
use gstreamer_video as gst_video;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

#[derive(Debug)]
struct BlenderState {
    /// Polygons exactly as supplied, in insertion order
    static_masks: Vec<Polygon>,
    info: MaskInfo,
    /// Last configured block size, kept while in color mode
    pixelization_size: u32,
    rotation: Rotation,
    polygon_rotation: PolygonRotation,
    /// Output frame size, already swapped for 90° and 270°
    frame_width: u32,
    frame_height: u32,
    static_enabled: bool,
    dynamic: DynamicMaskConfig,
    analytics_timeout: Duration,
    latest: Option<PrivacyMasks>,
    static_dirty: bool,
    info_dirty: bool,
    pool: Box<dyn BufferPool>,
}

impl BlenderState {
    fn mark_static_dirty(&mut self) {
        self.static_dirty = true;
    }

    fn mark_info_dirty(&mut self) {
        self.info_dirty = true;
    }

    fn position(&self, id: &str) -> MaskResult<usize> {
        self.static_masks
            .iter()
            .position(|polygon| polygon.id == id)
            .ok_or_else(|| MaskError::NotFound(format!("static mask '{}'", id)))
    }

    /// Frame size for `rotation`, derived from the current size
    fn frame_size_for(&self, rotation: Rotation) -> (u32, u32) {
        if rotation.swaps_dimensions() == self.rotation.swaps_dimensions() {
            (self.frame_width, self.frame_height)
        } else {
            (self.frame_height, self.frame_width)
        }
    }

    /// Reinitialize the pool when the frame size changes; state is untouched
    fn reinit_pool_for(&mut self, width: u32, height: u32) -> MaskResult<()> {
        if (width, height) == (self.frame_width, self.frame_height) {
            return Ok(());
        }
        self.pool.reinit(BitmaskLayout::for_frame(width, height))
    }

    /// Polygons to rasterize for the current rotation
    fn active_polygons(&self) -> Vec<Polygon> {
        if !self.static_enabled {
            return Vec::new();
        }
        match self.polygon_rotation {
            PolygonRotation::SensorNative => self.static_masks.clone(),
            PolygonRotation::FollowRotation => {
                let (width, height) = self.frame_size_for(Rotation::None);
                self.static_masks
                    .iter()
                    .map(|polygon| polygon.rotated_into_frame(self.rotation, width, height))
                    .collect()
            }
        }
    }
}

/// Per-pipeline privacy-mask state and blending entry point
pub struct PrivacyMaskBlender {
    state: Mutex<BlenderState>,
    analytics: Arc<AnalyticsStore>,
    blend_unit: Arc<dyn BlendUnit>,
}

impl std::fmt::Debug for PrivacyMaskBlender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivacyMaskBlender")
            .field("state", &self.state)
            .field("blend_unit", &self.blend_unit.name())
            .finish_non_exhaustive()
    }
}

impl PrivacyMaskBlender {
    /// Create a blender for frames of `frame_width` x `frame_height`
    ///
    /// The pool is reinitialized for the quantized bitmask of that size.
    pub fn new(
        frame_width: u32,
        frame_height: u32,
        analytics: Arc<AnalyticsStore>,
        mut pool: Box<dyn BufferPool>,
        blend_unit: Arc<dyn BlendUnit>,
    ) -> MaskResult<Self> {
        validate_frame_size(frame_width, frame_height)?;
        pool.reinit(BitmaskLayout::for_frame(frame_width, frame_height))?;

        info!(
            width = frame_width,
            height = frame_height,
            blend_unit = blend_unit.name(),
            "Created privacy mask blender"
        );

        Ok(Self {
            state: Mutex::new(BlenderState {
                static_masks: Vec::with_capacity(MAX_STATIC_MASKS),
                info: MaskInfo::default(),
                pixelization_size: DEFAULT_PIXELIZATION_SIZE,
                rotation: Rotation::None,
                polygon_rotation: PolygonRotation::default(),
                frame_width,
                frame_height,
                static_enabled: true,
                dynamic: DynamicMaskConfig::default(),
                analytics_timeout: DYNAMIC_MASK_QUERY_TIMEOUT,
                latest: None,
                static_dirty: true,
                info_dirty: true,
                pool,
            }),
            analytics,
            blend_unit,
        })
    }

    /// Blender backed by a heap pool and the CPU blend unit
    pub fn with_software_blend(
        frame_width: u32,
        frame_height: u32,
        analytics: Arc<AnalyticsStore>,
    ) -> MaskResult<Self> {
        Self::new(
            frame_width,
            frame_height,
            analytics,
            Box::new(HeapBufferPool::new(DEFAULT_POOL_DEPTH)),
            Arc::new(SoftwareBlendUnit::new()),
        )
    }

    fn lock(&self) -> MutexGuard<'_, BlenderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn analytics(&self) -> &Arc<AnalyticsStore> {
        &self.analytics
    }

    // Static masks

    /// Append a static mask; ids must be unique and at most 8 masks are held
    pub fn add_static_mask(&self, polygon: Polygon) -> MaskResult<()> {
        polygon.validate()?;
        let mut state = self.lock();
        if state.static_masks.len() >= MAX_STATIC_MASKS {
            return Err(MaskError::InvalidArgument(format!(
                "static mask capacity of {} reached",
                MAX_STATIC_MASKS
            )));
        }
        if state.position(&polygon.id).is_ok() {
            return Err(MaskError::InvalidArgument(format!(
                "static mask '{}' already exists",
                polygon.id
            )));
        }

        debug!(id = %polygon.id, vertices = polygon.vertices.len(), "Adding static mask");
        state.static_masks.push(polygon);
        state.mark_static_dirty();
        Ok(())
    }

    /// Replace the static mask with the same id
    pub fn set_static_mask(&self, polygon: Polygon) -> MaskResult<()> {
        polygon.validate()?;
        let mut state = self.lock();
        let index = state.position(&polygon.id)?;

        debug!(id = %polygon.id, vertices = polygon.vertices.len(), "Updating static mask");
        state.static_masks[index] = polygon;
        state.mark_static_dirty();
        Ok(())
    }

    pub fn remove_static_mask(&self, id: &str) -> MaskResult<()> {
        let mut state = self.lock();
        let index = state.position(id)?;

        debug!(id = %id, "Removing static mask");
        state.static_masks.remove(index);
        state.mark_static_dirty();
        Ok(())
    }

    pub fn clear_static_masks(&self) {
        let mut state = self.lock();
        if !state.static_masks.is_empty() {
            debug!(count = state.static_masks.len(), "Clearing static masks");
            state.static_masks.clear();
            state.mark_static_dirty();
        }
    }

    pub fn static_masks(&self) -> Vec<Polygon> {
        self.lock().static_masks.clone()
    }

    pub fn static_mask(&self, id: &str) -> MaskResult<Polygon> {
        let state = self.lock();
        let index = state.position(id)?;
        Ok(state.static_masks[index].clone())
    }

    pub fn set_static_mask_enabled(&self, enabled: bool) {
        let mut state = self.lock();
        if state.static_enabled != enabled {
            debug!(enabled, "Static masks toggled");
            state.static_enabled = enabled;
            state.mark_static_dirty();
        }
    }

    pub fn is_static_mask_enabled(&self) -> bool {
        self.lock().static_enabled
    }

    pub fn set_polygon_rotation(&self, polygon_rotation: PolygonRotation) {
        let mut state = self.lock();
        if state.polygon_rotation != polygon_rotation {
            debug!(?polygon_rotation, "Polygon rotation policy changed");
            state.polygon_rotation = polygon_rotation;
            state.mark_static_dirty();
        }
    }

    pub fn polygon_rotation(&self) -> PolygonRotation {
        self.lock().polygon_rotation
    }

    // Mask mode

    /// Switch to color fill with `color`
    pub fn set_color(&self, color: Rgb) {
        let mut state = self.lock();
        debug!(color = %color, "Mask mode set to color");
        state.info = MaskInfo::Color(color);
        state.mark_info_dirty();
    }

    /// Switch to pixelization with blocks of `size` pixels
    pub fn set_pixelization_size(&self, size: u32) -> MaskResult<()> {
        if !is_valid_pixelization_size(size) {
            return Err(MaskError::InvalidArgument(format!(
                "pixelization size {} out of range",
                size
            )));
        }
        let mut state = self.lock();
        debug!(size, "Mask mode set to pixelization");
        state.info = MaskInfo::Pixelization { size };
        state.pixelization_size = size;
        state.mark_info_dirty();
        Ok(())
    }

    /// Switch mode, keeping the last color or block size
    pub fn set_mask_type(&self, mask_type: MaskType) {
        let mut state = self.lock();
        if state.info.mask_type() == mask_type {
            return;
        }
        state.info = match mask_type {
            MaskType::Color => MaskInfo::Color(Rgb::BLACK),
            MaskType::Pixelization => MaskInfo::Pixelization {
                size: state.pixelization_size,
            },
        };
        debug!(%mask_type, "Mask type changed");
        state.mark_info_dirty();
    }

    pub fn mask_type(&self) -> MaskType {
        self.lock().info.mask_type()
    }

    /// Fill color; fails when the blender is in pixelization mode
    pub fn get_color(&self) -> MaskResult<Rgb> {
        match self.lock().info {
            MaskInfo::Color(color) => Ok(color),
            MaskInfo::Pixelization { .. } => Err(MaskError::Other(
                "mask type is pixelization, no color is set".into(),
            )),
        }
    }

    /// Block size; fails when the blender is in color mode
    pub fn get_pixelization_size(&self) -> MaskResult<u32> {
        match self.lock().info {
            MaskInfo::Pixelization { size } => Ok(size),
            MaskInfo::Color(_) => Err(MaskError::Other(
                "mask type is color, no pixelization size is set".into(),
            )),
        }
    }

    // Frame geometry

    /// Set the output rotation
    ///
    /// For 90° and 270° the frame size swaps and the buffer pool is
    /// reinitialized first; if that fails the rotation is not applied.
    pub fn set_rotation(&self, rotation: Rotation) -> MaskResult<()> {
        let mut state = self.lock();
        if state.rotation == rotation {
            return Ok(());
        }

        let (width, height) = state.frame_size_for(rotation);
        state.reinit_pool_for(width, height)?;

        info!(
            from = %state.rotation,
            to = %rotation,
            width,
            height,
            "Privacy mask rotation changed"
        );
        state.rotation = rotation;
        state.frame_width = width;
        state.frame_height = height;
        state.mark_static_dirty();
        Ok(())
    }

    pub fn rotation(&self) -> Rotation {
        self.lock().rotation
    }

    /// Set the output frame size (post-rotation)
    pub fn set_frame_size(&self, width: u32, height: u32) -> MaskResult<()> {
        validate_frame_size(width, height)?;
        let mut state = self.lock();
        if (width, height) == (state.frame_width, state.frame_height) {
            return Ok(());
        }
        state.reinit_pool_for(width, height)?;

        info!(width, height, "Privacy mask frame size changed");
        state.frame_width = width;
        state.frame_height = height;
        state.mark_static_dirty();
        Ok(())
    }

    pub fn frame_size(&self) -> (u32, u32) {
        let state = self.lock();
        (state.frame_width, state.frame_height)
    }

    // Dynamic masks

    pub fn set_dynamic_mask_enabled(&self, enabled: bool) -> MaskResult<()> {
        let mut state = self.lock();
        if enabled && state.dynamic.analytics_data_id.is_empty() {
            return Err(MaskError::InvalidArgument(
                "configure an analytics_data_id before enabling dynamic masks".into(),
            ));
        }
        debug!(enabled, "Dynamic masks toggled");
        state.dynamic.enabled = enabled;
        Ok(())
    }

    pub fn is_dynamic_mask_enabled(&self) -> bool {
        self.lock().dynamic.enabled
    }

    /// Replace the dynamic mask configuration
    pub fn configure(&self, config: DynamicMaskConfig) -> MaskResult<()> {
        config.validate()?;
        let mut state = self.lock();
        debug!(
            enabled = config.enabled,
            analytics_id = %config.analytics_data_id,
            labels = config.masked_labels.len(),
            dilation = config.dilation_size,
            "Dynamic masks configured"
        );
        state.dynamic = config;
        Ok(())
    }

    pub fn dynamic_mask_config(&self) -> DynamicMaskConfig {
        self.lock().dynamic.clone()
    }

    /// Upper bound on how long a query waits for analytics results
    pub fn set_analytics_timeout(&self, timeout: Duration) {
        self.lock().analytics_timeout = timeout;
    }

    /// Validate a whole configuration and apply it in one step
    pub fn apply_config(&self, config: &PrivacyMaskConfig) -> MaskResult<()> {
        config.validate()?;
        let mut state = self.lock();

        let (width, height) = state.frame_size_for(config.rotation);
        state.reinit_pool_for(width, height)?;

        state.static_masks = config.static_privacy_masks.masks.clone();
        state.static_enabled = config.static_privacy_masks.enabled;
        state.info = config.info();
        if is_valid_pixelization_size(config.pixelization_size) {
            state.pixelization_size = config.pixelization_size;
        }
        state.rotation = config.rotation;
        state.polygon_rotation = config.polygon_rotation;
        state.frame_width = width;
        state.frame_height = height;
        state.dynamic = config.dynamic_privacy_masks.clone();
        state.mark_static_dirty();
        state.mark_info_dirty();

        info!(
            masks = state.static_masks.len(),
            mask_type = %config.mask_type,
            rotation = %config.rotation,
            dynamic = state.dynamic.enabled,
            "Applied privacy mask config"
        );
        Ok(())
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.lock().pool.stats()
    }

    // Per-frame path

    /// Masks for the frame captured at `timestamp`
    ///
    /// The static bitmask and mode are reused from the previous call unless
    /// a mutation invalidated them. A failed static rebuild is retried on the
    /// next call.
    pub fn get_updated_privacy_masks(&self, timestamp: Duration) -> MaskResult<PrivacyMasks> {
        self.updated_masks(Some(timestamp))
    }

    /// Like `get_updated_privacy_masks`, for frames that may lack a timestamp
    ///
    /// A missing timestamp is only an error while dynamic masks are enabled,
    /// decided under the same lock as the refresh.
    fn updated_masks(&self, timestamp: Option<Duration>) -> MaskResult<PrivacyMasks> {
        let mut state = self.lock();
        let timestamp = match timestamp {
            Some(timestamp) => timestamp,
            None if state.dynamic.enabled => {
                return Err(MaskError::InvalidArgument(
                    "frame has no timestamp to match analytics against".into(),
                ));
            }
            None => Duration::ZERO,
        };

        let (mut output, fresh) = match state.latest.take() {
            Some(output) => (output, false),
            None => (PrivacyMasks::default(), true),
        };

        let result = self.refresh(&mut state, &mut output, fresh, timestamp);
        let snapshot = output.clone();
        state.latest = Some(output);
        result.map(|()| snapshot)
    }

    fn refresh(
        &self,
        state: &mut BlenderState,
        output: &mut PrivacyMasks,
        fresh: bool,
        timestamp: Duration,
    ) -> MaskResult<()> {
        if state.info_dirty || fresh {
            output.info = state.info;
            state.info_dirty = false;
        }

        if state.static_dirty || fresh {
            // The pool may hold a single buffer, so release before acquiring
            output.static_data = StaticMaskData::default();

            let polygons = state.active_polygons();
            if !polygons.is_empty() {
                let (bitmask, rois) = Bitmask::rasterize(state.pool.as_ref(), &polygons)
                    .inspect_err(|e| warn!(error = %e, "Static mask rebuild failed"))?;
                output.static_data = StaticMaskData {
                    bitmask: Some(Arc::new(bitmask)),
                    rois,
                };
            }
            debug!(
                rois = output.static_data.rois.len(),
                rotation = %state.rotation,
                "Static masks rebuilt"
            );
            state.static_dirty = false;
        }

        output.dynamic_data = None;
        if state.dynamic.enabled {
            output.dynamic_data = Some(self.dynamic_masks(
                &state.dynamic,
                state.analytics_timeout,
                timestamp,
            )?);
        }

        Ok(())
    }

    fn dynamic_masks(
        &self,
        config: &DynamicMaskConfig,
        timeout: Duration,
        timestamp: Duration,
    ) -> MaskResult<DynamicMaskData> {
        let id = config.analytics_data_id.as_str();
        let query = Query::within_delta(timestamp, DYNAMIC_MASK_QUERY_DELTA, timeout);
        let entry = self.analytics.query_instance_segmentation(id, &query)?;
        let network = self
            .analytics
            .network_config(AnalyticsKind::InstanceSegmentation, id)?;

        let rois: Vec<DynamicRoi> = entry
            .detections
            .iter()
            .filter(|detection| config.masks_label(&detection.label))
            .take(MAX_DYNAMIC_ROIS)
            .map(|detection| DynamicRoi {
                label: detection.label.clone(),
                bbox: detection.bbox,
                mask: detection.mask.clone(),
                network_width: network.network_width,
                network_height: network.network_height,
                scaling_mode: network.scaling_mode,
                dilation: config.dilation_size,
            })
            .collect();

        trace!(
            analytics_id = %id,
            frame_ns = timestamp.as_nanos() as u64,
            entry_ns = entry.timestamp.as_nanos() as u64,
            detections = entry.detections.len(),
            masked = rois.len(),
            "Matched analytics entry"
        );

        Ok(DynamicMaskData {
            rois,
            aspect_ratio_correction: network.aspect_ratio_correction(),
        })
    }

    /// Mask `frame` in place using its hardware timestamp
    pub fn blend(&self, frame: &mut FrameView<'_>) -> MaskResult<()> {
        let masks = self.updated_masks(frame.timestamp)?;
        if masks.is_empty() {
            trace!("No privacy masks active, frame left untouched");
            return Ok(());
        }

        let params = BlendParams::from_masks(&masks);
        self.blend_unit.blend(frame, &params).map_err(|e| {
            warn!(unit = self.blend_unit.name(), error = %e, "Privacy mask blend failed");
            match e {
                MaskError::DspOperation(_) => e,
                other => MaskError::DspOperation(other.to_string()),
            }
        })
    }

    /// Mask a GStreamer buffer in place
    pub fn blend_gst_buffer(
        &self,
        buffer: &mut gst::BufferRef,
        info: &gst_video::VideoInfo,
    ) -> MaskResult<()> {
        with_gst_buffer(buffer, info, |frame| self.blend(frame))
    }
}

fn validate_frame_size(width: u32, height: u32) -> MaskResult<()> {
    if width == 0 || height == 0 {
        return Err(MaskError::InvalidArgument(format!(
            "frame size {}x{} must be non-zero",
            width, height
        )));
    }
    Ok(())
}
