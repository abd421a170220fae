// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for offline privacy-mask work
//!
//! This module provides command-line functionality for:
//! - Rasterizing static masks to an image
//! - Blending masks into a still image
//! - Validating configuration files

use image::{GrayImage, Luma};
use privacy_mask::{AnalyticsStore, FrameView, PrivacyMaskBlender, PrivacyMaskConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Blender matching a config, for frames of `width` x `height` after rotation
fn blender_for(
    config: &PrivacyMaskConfig,
    width: u32,
    height: u32,
) -> Result<PrivacyMaskBlender, Box<dyn std::error::Error>> {
    let mut config = config.clone();
    if config.dynamic_privacy_masks.enabled {
        warn!("Dynamic masks need a live analytics source, ignoring them");
        config.dynamic_privacy_masks.enabled = false;
    }

    // The blender starts unrotated; applying the rotation swaps back to width x height
    let (start_width, start_height) = if config.rotation.swaps_dimensions() {
        (height, width)
    } else {
        (width, height)
    };

    let blender = PrivacyMaskBlender::with_software_blend(
        start_width,
        start_height,
        Arc::new(AnalyticsStore::new()),
    )?;
    blender.apply_config(&config)?;
    Ok(blender)
}

/// Rasterize static masks and print their ROIs
pub fn rasterize(
    config_path: &Path,
    width: u32,
    height: u32,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = PrivacyMaskConfig::from_file(config_path)?;
    let blender = blender_for(&config, width, height)?;
    let masks = blender.get_updated_privacy_masks(Duration::ZERO)?;

    let Some(bitmask) = masks.static_data.bitmask.as_ref() else {
        println!("No static masks enabled.");
        return Ok(());
    };

    let layout = bitmask.layout();
    println!(
        "Bitmask: {}x{} (stride {} bytes), {} pixels set",
        layout.width,
        layout.height,
        layout.stride,
        bitmask.count_set()
    );
    for (polygon, roi) in blender.static_masks().iter().zip(&masks.static_data.rois) {
        if roi.is_empty() {
            println!("  {}: outside frame", polygon.id);
        } else {
            println!(
                "  {}: x={} y={} {}x{}",
                polygon.id, roi.x, roi.y, roi.width, roi.height
            );
        }
    }

    if let Some(path) = output {
        let image = GrayImage::from_fn(layout.width as u32, layout.height as u32, |x, y| {
            Luma([if bitmask.is_set(x as usize, y as usize) { 255 } else { 0 }])
        });
        image.save(path)?;
        println!("Bitmask written to {}", path.display());
    }

    Ok(())
}

/// Apply the config's static masks to an image
pub fn blend_image(
    config_path: &Path,
    input: &Path,
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = PrivacyMaskConfig::from_file(config_path)?;
    let mut image = image::open(input)?.to_rgba8();
    let (width, height) = image.dimensions();

    let blender = blender_for(&config, width, height)?;
    {
        let pixels: &mut [u8] = &mut image;
        let mut frame = FrameView::rgba(
            pixels,
            width,
            height,
            width as usize * 4,
            Some(Duration::ZERO),
        )?;
        blender.blend(&mut frame)?;
    }

    image.save(output)?;
    println!(
        "Masked {} ({}x{}, {} static masks) -> {}",
        input.display(),
        width,
        height,
        blender.static_masks().len(),
        output.display()
    );
    Ok(())
}

/// Load a config and report whether it is usable
pub fn validate(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    match PrivacyMaskConfig::from_file(config_path) {
        Ok(config) => {
            println!("{}: OK", config_path.display());
            println!("  mask type: {}", config.mask_type);
            println!("  rotation: {}", config.rotation);
            println!(
                "  static masks: {} ({})",
                config.static_privacy_masks.masks.len(),
                if config.static_privacy_masks.enabled {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            if config.dynamic_privacy_masks.enabled {
                println!(
                    "  dynamic masks: {} labels from '{}'",
                    config.dynamic_privacy_masks.masked_labels.len(),
                    config.dynamic_privacy_masks.analytics_data_id
                );
            }
            Ok(())
        }
        Err(e) => {
            println!("{}: {}", config_path.display(), e);
            Err(e.into())
        }
    }
}
