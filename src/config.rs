// SPDX-License-Identifier: GPL-3.0-only

use crate::constants::{DEFAULT_PIXELIZATION_SIZE, MAX_STATIC_MASKS, is_valid_pixelization_size};
use crate::errors::{MaskError, MaskResult};
use crate::geometry::{Polygon, PolygonRotation, Rotation};
use crate::privacy_mask::{MaskInfo, MaskType, Rgb};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use tracing::debug;

/// Static mask section of the configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticMaskConfig {
    /// Whether static masks are blended
    pub enabled: bool,
    /// Polygons in full-resolution frame coordinates
    pub masks: Vec<Polygon>,
}

impl Default for StaticMaskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            masks: Vec::new(),
        }
    }
}

/// Dynamic (analytics-driven) mask section of the configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicMaskConfig {
    pub enabled: bool,
    /// Instance-segmentation stream to query
    pub analytics_data_id: String,
    /// Detection labels to mask; other detections are ignored
    pub masked_labels: BTreeSet<String>,
    /// Dilation radius in frame pixels
    pub dilation_size: u32,
}

impl DynamicMaskConfig {
    pub fn new(analytics_data_id: impl Into<String>) -> Self {
        Self {
            enabled: true,
            analytics_data_id: analytics_data_id.into(),
            ..Default::default()
        }
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.masked_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dilation(mut self, dilation_size: u32) -> Self {
        self.dilation_size = dilation_size;
        self
    }

    pub fn masks_label(&self, label: &str) -> bool {
        self.masked_labels.contains(label)
    }

    pub fn validate(&self) -> MaskResult<()> {
        if self.enabled && self.analytics_data_id.is_empty() {
            return Err(MaskError::InvalidArgument(
                "dynamic masks need an analytics_data_id".into(),
            ));
        }
        Ok(())
    }
}

/// Complete privacy-mask configuration as read from JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyMaskConfig {
    pub mask_type: MaskType,
    /// Block size used when `mask_type` is pixelization
    pub pixelization_size: u32,
    /// Fill color used when `mask_type` is color
    pub color_value: Rgb,
    pub rotation: Rotation,
    pub polygon_rotation: PolygonRotation,
    pub static_privacy_masks: StaticMaskConfig,
    pub dynamic_privacy_masks: DynamicMaskConfig,
}

impl Default for PrivacyMaskConfig {
    fn default() -> Self {
        Self {
            mask_type: MaskType::default(),
            pixelization_size: DEFAULT_PIXELIZATION_SIZE,
            color_value: Rgb::BLACK,
            rotation: Rotation::default(),
            polygon_rotation: PolygonRotation::default(),
            static_privacy_masks: StaticMaskConfig::default(),
            dynamic_privacy_masks: DynamicMaskConfig::default(),
        }
    }
}

impl PrivacyMaskConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> MaskResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> MaskResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        debug!(
            path = %path.display(),
            masks = config.static_privacy_masks.masks.len(),
            "Loaded privacy mask config"
        );
        Ok(config)
    }

    pub fn to_json_string(&self) -> MaskResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Mask mode selected by `mask_type`
    pub fn info(&self) -> MaskInfo {
        match self.mask_type {
            MaskType::Color => MaskInfo::Color(self.color_value),
            MaskType::Pixelization => MaskInfo::Pixelization {
                size: self.pixelization_size,
            },
        }
    }

    /// Check every invariant the blender enforces on individual setters
    pub fn validate(&self) -> MaskResult<()> {
        if self.mask_type == MaskType::Pixelization
            && !is_valid_pixelization_size(self.pixelization_size)
        {
            return Err(MaskError::InvalidArgument(format!(
                "pixelization size {} out of range",
                self.pixelization_size
            )));
        }

        let masks = &self.static_privacy_masks.masks;
        if masks.len() > MAX_STATIC_MASKS {
            return Err(MaskError::InvalidArgument(format!(
                "{} static masks configured, at most {} supported",
                masks.len(),
                MAX_STATIC_MASKS
            )));
        }
        let mut ids = HashSet::with_capacity(masks.len());
        for polygon in masks {
            polygon.validate()?;
            if !ids.insert(polygon.id.as_str()) {
                return Err(MaskError::InvalidArgument(format!(
                    "duplicate static mask id '{}'",
                    polygon.id
                )));
            }
        }

        self.dynamic_privacy_masks.validate()
    }
}
