// SPDX-License-Identifier: GPL-3.0-only

//! Analytics result and configuration types

use crate::constants::DEFAULT_ANALYTICS_MAX_ENTRIES;
use crate::errors::{MaskError, MaskResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Axis-aligned box in normalized network-input coordinates (0.0 to 1.0)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(xmin: f32, ymin: f32, width: f32, height: f32) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
        }
    }

    pub fn xmax(&self) -> f32 {
        self.xmin + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.ymin + self.height
    }
}

/// Per-instance segmentation mask covering its detection's bounding box
///
/// One byte per mask pixel; any non-zero value marks the instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceMask {
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
}

impl InstanceMask {
    /// Create a mask, checking that the data covers `width * height` bytes
    pub fn new(width: u32, height: u32, data: impl Into<Arc<[u8]>>) -> MaskResult<Self> {
        let data = data.into();
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(MaskError::InvalidArgument(format!(
                "instance mask {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Mask covering the whole bounding box
    pub fn filled(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: Arc::from(vec![1u8; width as usize * height as usize]),
        }
    }

    pub fn is_set(&self, x: u32, y: u32) -> bool {
        x < self.width
            && y < self.height
            && self.data[(y * self.width + x) as usize] != 0
    }
}

/// A single detected object, optionally with its instance mask
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub mask: Option<InstanceMask>,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            class_id: 0,
            confidence,
            bbox,
            mask: None,
        }
    }

    pub fn with_class_id(mut self, class_id: u32) -> Self {
        self.class_id = class_id;
        self
    }

    pub fn with_mask(mut self, mask: InstanceMask) -> Self {
        self.mask = Some(mask);
        self
    }
}

/// All results one inference produced for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsEntry {
    /// Monotonic hardware timestamp of the analyzed frame
    pub timestamp: Duration,
    pub detections: Vec<Detection>,
}

impl AnalyticsEntry {
    pub fn new(timestamp: Duration, detections: Vec<Detection>) -> Self {
        Self {
            timestamp,
            detections,
        }
    }
}

/// Which result series an analytics id belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalyticsKind {
    Detection,
    InstanceSegmentation,
}

impl std::fmt::Display for AnalyticsKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalyticsKind::Detection => write!(f, "detection"),
            AnalyticsKind::InstanceSegmentation => write!(f, "instance segmentation"),
        }
    }
}

/// How network input was derived from the source frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    /// Frame was resized to the network input, ignoring aspect ratio
    #[default]
    Stretch,
    /// Frame was resized preserving aspect ratio and padded
    Letterbox,
    /// Frame was resized preserving aspect ratio and center-cropped
    Crop,
}

/// Configuration of one analytics stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Number of results retained; older results are evicted
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    pub network_width: u32,
    pub network_height: u32,
    /// Frame size fed to the network before scaling
    pub source_width: u32,
    pub source_height: u32,
    #[serde(default)]
    pub scaling_mode: ScalingMode,
}

fn default_max_entries() -> usize {
    DEFAULT_ANALYTICS_MAX_ENTRIES
}

impl NetworkConfig {
    pub fn new(network_width: u32, network_height: u32) -> Self {
        Self {
            max_entries: DEFAULT_ANALYTICS_MAX_ENTRIES,
            network_width,
            network_height,
            source_width: network_width,
            source_height: network_height,
            scaling_mode: ScalingMode::default(),
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_source(mut self, width: u32, height: u32, scaling_mode: ScalingMode) -> Self {
        self.source_width = width;
        self.source_height = height;
        self.scaling_mode = scaling_mode;
        self
    }

    pub fn validate(&self) -> MaskResult<()> {
        if self.max_entries == 0 {
            return Err(MaskError::InvalidArgument(
                "max_entries must be at least 1".into(),
            ));
        }
        if self.network_width == 0
            || self.network_height == 0
            || self.source_width == 0
            || self.source_height == 0
        {
            return Err(MaskError::InvalidArgument(
                "network and source dimensions must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Ratio of the source aspect ratio to the network aspect ratio
    ///
    /// 1.0 means no correction is needed when mapping network coordinates
    /// back onto the frame.
    pub fn aspect_ratio_correction(&self) -> f32 {
        let source = self.source_width as f32 / self.source_height as f32;
        let network = self.network_width as f32 / self.network_height as f32;
        source / network
    }
}

/// Application analytics configuration, keyed by analytics id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default)]
    pub detection: HashMap<String, NetworkConfig>,
    #[serde(default)]
    pub instance_segmentation: HashMap<String, NetworkConfig>,
}

impl AnalyticsConfig {
    pub fn with_detection(mut self, id: impl Into<String>, config: NetworkConfig) -> Self {
        self.detection.insert(id.into(), config);
        self
    }

    pub fn with_instance_segmentation(
        mut self,
        id: impl Into<String>,
        config: NetworkConfig,
    ) -> Self {
        self.instance_segmentation.insert(id.into(), config);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.detection.is_empty() && self.instance_segmentation.is_empty()
    }
}

/// Timestamp matching rule for a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Entry at exactly the requested timestamp
    Exact,
    /// Entry nearest to the timestamp across the whole history
    Closest,
    /// Entry nearest to the timestamp within `delta`
    WithinDelta,
}

impl QueryKind {
    /// Parse a query kind name as used by configuration front-ends
    pub fn parse(name: &str) -> MaskResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(QueryKind::Exact),
            "closest" => Ok(QueryKind::Closest),
            "within_delta" | "delta" => Ok(QueryKind::WithinDelta),
            other => Err(MaskError::InvalidArgument(format!(
                "unsupported query type '{}'",
                other
            ))),
        }
    }
}

/// A blocking analytics lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Query {
    pub kind: QueryKind,
    pub timestamp: Duration,
    /// Search half-width for `WithinDelta`, ignored otherwise
    pub delta: Duration,
    /// Upper bound on how long the caller blocks
    pub timeout: Duration,
}

impl Query {
    pub fn exact(timestamp: Duration, timeout: Duration) -> Self {
        Self {
            kind: QueryKind::Exact,
            timestamp,
            delta: Duration::ZERO,
            timeout,
        }
    }

    pub fn closest(timestamp: Duration, timeout: Duration) -> Self {
        Self {
            kind: QueryKind::Closest,
            timestamp,
            delta: Duration::ZERO,
            timeout,
        }
    }

    pub fn within_delta(timestamp: Duration, delta: Duration, timeout: Duration) -> Self {
        Self {
            kind: QueryKind::WithinDelta,
            timestamp,
            delta,
            timeout,
        }
    }
}

/// Candidate selection for `WithinDelta` queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeltaSearchPolicy {
    /// Search `[t - delta, t)` first and only fall back to `[t, t + delta]`
    /// when the past window is empty
    #[default]
    PastFirst,
    /// Nearest entry in `[t - delta, t + delta]`, past wins ties
    Nearest,
}
