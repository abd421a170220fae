// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the privacy mask blender

use privacy_mask::analytics::{
    AnalyticsConfig, AnalyticsEntry, BoundingBox, Detection, NetworkConfig,
};
use privacy_mask::buffer::BufferPool;
use privacy_mask::{
    AnalyticsStore, DynamicMaskConfig, FrameView, HeapBufferPool, MaskError, MaskType, Polygon,
    PrivacyMaskBlender, PrivacyMaskConfig, Rgb, Rotation, SoftwareBlendUnit,
};
use std::sync::Arc;
use std::time::Duration;

fn blender(width: u32, height: u32) -> PrivacyMaskBlender {
    PrivacyMaskBlender::with_software_blend(width, height, Arc::new(AnalyticsStore::new()))
        .expect("blender")
}

fn rect(id: &str, x: i32, y: i32, w: i32, h: i32) -> Polygon {
    Polygon::from_points(id, &[(x, y), (x + w, y), (x + w, y + h), (x, y + h)]).expect("polygon")
}

#[test]
fn test_unchanged_query_reuses_static_bitmask() {
    let blender = blender(320, 240);
    blender.add_static_mask(rect("a", 40, 40, 80, 80)).unwrap();

    let first = blender.get_updated_privacy_masks(Duration::ZERO).unwrap();
    let acquired = blender.pool_stats().acquired_total;
    let second = blender.get_updated_privacy_masks(Duration::ZERO).unwrap();

    assert_eq!(acquired, 1);
    assert_eq!(
        blender.pool_stats().acquired_total,
        acquired,
        "second query must not touch the pool"
    );
    let a = first.static_data.bitmask.as_ref().unwrap();
    let b = second.static_data.bitmask.as_ref().unwrap();
    assert_eq!(a.data(), b.data());
    assert_eq!(a.count_set(), 20 * 20);
    assert_eq!(first.static_data.rois, second.static_data.rois);
}

#[test]
fn test_mutation_triggers_rebuild() {
    let blender = blender(320, 240);
    blender.add_static_mask(rect("a", 0, 0, 40, 40)).unwrap();
    let first = blender.get_updated_privacy_masks(Duration::ZERO).unwrap();
    assert_eq!(first.static_data.bitmask.as_ref().unwrap().count_set(), 100);
    drop(first);

    blender.set_static_mask(rect("a", 0, 0, 80, 40)).unwrap();
    let second = blender.get_updated_privacy_masks(Duration::ZERO).unwrap();
    assert_eq!(second.static_data.bitmask.as_ref().unwrap().count_set(), 200);
    assert_eq!(blender.pool_stats().acquired_total, 2);
}

#[test]
fn test_failed_rebuild_retries_on_next_query() {
    let pool = HeapBufferPool::new(1);
    let blender = PrivacyMaskBlender::new(
        64,
        64,
        Arc::new(AnalyticsStore::new()),
        Box::new(pool.clone()),
        Arc::new(SoftwareBlendUnit::new()),
    )
    .unwrap();
    blender.add_static_mask(rect("a", 0, 0, 32, 32)).unwrap();

    let held = pool.acquire().unwrap();
    assert!(matches!(
        blender.get_updated_privacy_masks(Duration::ZERO),
        Err(MaskError::BufferAllocation(_))
    ));
    assert!(matches!(
        blender.get_updated_privacy_masks(Duration::ZERO),
        Err(MaskError::BufferAllocation(_))
    ));
    assert_eq!(blender.pool_stats().acquired_total, 1);

    drop(held);
    let masks = blender.get_updated_privacy_masks(Duration::ZERO).unwrap();
    assert_eq!(masks.static_data.bitmask.as_ref().unwrap().count_set(), 8 * 8);
    assert_eq!(blender.pool_stats().acquired_total, 2);

    let again = blender.get_updated_privacy_masks(Duration::ZERO).unwrap();
    assert!(again.static_data.bitmask.is_some());
    assert_eq!(blender.pool_stats().acquired_total, 2);
}

#[test]
fn test_nine_vertices_rejected_without_change() {
    let blender = blender(320, 240);
    blender.add_static_mask(rect("a", 0, 0, 40, 40)).unwrap();
    let before = blender.static_masks().len();

    let nine = Polygon {
        id: "nine".into(),
        vertices: (0..9)
            .map(|i| privacy_mask::Vertex::new(i * 10, (i % 2) * 10))
            .collect(),
    };
    let result = blender.add_static_mask(nine);

    assert!(matches!(result, Err(MaskError::InvalidArgument(_))));
    assert_eq!(blender.static_masks().len(), before);
}

#[test]
fn test_ninth_mask_rejected() {
    let blender = blender(320, 240);
    for i in 0..8 {
        blender
            .add_static_mask(rect(&format!("m{}", i), i * 20, 0, 10, 10))
            .unwrap();
    }

    let result = blender.add_static_mask(rect("m8", 200, 200, 10, 10));
    assert!(matches!(result, Err(MaskError::InvalidArgument(_))));
    assert_eq!(blender.static_masks().len(), 8);
}

#[test]
fn test_rotation_swaps_frame_and_rebuilds() {
    let blender = blender(640, 480);
    blender.add_static_mask(rect("a", 0, 0, 40, 40)).unwrap();
    let before = blender.get_updated_privacy_masks(Duration::ZERO).unwrap();
    assert_eq!(before.static_data.bitmask.as_ref().unwrap().layout().width, 160);
    drop(before);

    blender.set_rotation(Rotation::Rotate90).unwrap();
    assert_eq!(blender.frame_size(), (480, 640));

    let after = blender.get_updated_privacy_masks(Duration::ZERO).unwrap();
    let layout = after.static_data.bitmask.as_ref().unwrap().layout();
    assert_eq!((layout.width, layout.height), (120, 160));
    assert_eq!(blender.pool_stats().acquired_total, 2);
}

#[test]
fn test_color_and_pixelization_are_exclusive() {
    let blender = blender(320, 240);

    blender.set_color(Rgb::new(10, 20, 30));
    assert_eq!(blender.get_color().unwrap(), Rgb::new(10, 20, 30));
    assert!(matches!(
        blender.get_pixelization_size(),
        Err(MaskError::Other(_))
    ));

    blender.set_pixelization_size(16).unwrap();
    assert_eq!(blender.get_pixelization_size().unwrap(), 16);
    assert!(matches!(blender.get_color(), Err(MaskError::Other(_))));
    assert_eq!(blender.mask_type(), MaskType::Pixelization);
}

#[test]
fn test_apply_config_is_all_or_nothing() {
    let blender = blender(320, 240);
    blender.add_static_mask(rect("keep", 0, 0, 40, 40)).unwrap();

    let mut bad = PrivacyMaskConfig::from_json_str(r#"{"rotation": 90}"#).unwrap();
    bad.mask_type = MaskType::Pixelization;
    bad.pixelization_size = 99;
    assert!(blender.apply_config(&bad).is_err());
    assert_eq!(blender.rotation(), Rotation::None);
    assert_eq!(blender.static_masks()[0].id, "keep");

    let good = PrivacyMaskConfig::from_json_str(
        r#"{
            "mask_type": "pixelization",
            "pixelization_size": 8,
            "rotation": 270,
            "static_privacy_masks": {"masks": [
                {"id": "door", "vertices": [{"x": 0, "y": 0}, {"x": 40, "y": 0}, {"x": 40, "y": 40}]}
            ]}
        }"#,
    )
    .unwrap();
    blender.apply_config(&good).unwrap();
    assert_eq!(blender.rotation(), Rotation::Rotate270);
    assert_eq!(blender.frame_size(), (240, 320));
    assert_eq!(blender.get_pixelization_size().unwrap(), 8);
    assert_eq!(blender.static_mask("door").unwrap().vertices.len(), 3);
    assert!(blender.static_mask("keep").unwrap_err().is_not_found());
}

#[test]
fn test_blend_masks_frame_in_place() {
    let blender = blender(64, 64);
    blender.add_static_mask(rect("a", 16, 16, 16, 16)).unwrap();
    blender.set_color(Rgb::new(255, 0, 0));

    let mut pixels = vec![50u8; 64 * 64 * 4];
    let mut frame = FrameView::rgba(&mut pixels, 64, 64, 256, Some(Duration::ZERO)).unwrap();
    blender.blend(&mut frame).unwrap();

    let at = |x: usize, y: usize| {
        let o = (y * 64 + x) * 4;
        [pixels[o], pixels[o + 1], pixels[o + 2]]
    };
    assert_eq!(at(16, 16), [255, 0, 0]);
    assert_eq!(at(31, 31), [255, 0, 0]);
    assert_eq!(at(15, 16), [50, 50, 50]);
    assert_eq!(at(32, 32), [50, 50, 50]);
}

#[test]
fn test_blend_size_mismatch_is_dsp_error() {
    let blender = blender(64, 64);
    blender.add_static_mask(rect("a", 0, 0, 16, 16)).unwrap();

    let mut pixels = vec![0u8; 32 * 32 * 4];
    let mut frame = FrameView::rgba(&mut pixels, 32, 32, 128, Some(Duration::ZERO)).unwrap();
    let result = blender.blend(&mut frame);
    assert!(matches!(result, Err(MaskError::DspOperation(_))));
}

#[test]
fn test_blend_dynamic_regions() {
    let analytics = Arc::new(AnalyticsStore::new());
    analytics
        .add_configuration(
            &AnalyticsConfig::default()
                .with_instance_segmentation("seg0", NetworkConfig::new(64, 64)),
        )
        .unwrap();
    analytics
        .add_instance_segmentation_entry(
            "seg0",
            AnalyticsEntry::new(
                Duration::from_millis(990),
                vec![Detection::new(
                    "person",
                    0.9,
                    BoundingBox::new(0.5, 0.5, 0.25, 0.25),
                )],
            ),
        )
        .unwrap();

    let blender = PrivacyMaskBlender::with_software_blend(64, 64, analytics).unwrap();
    blender
        .configure(DynamicMaskConfig::new("seg0").with_labels(["person"]))
        .unwrap();
    blender.set_color(Rgb::new(0, 255, 0));

    let mut pixels = vec![0u8; 64 * 64 * 4];
    let mut frame =
        FrameView::rgba(&mut pixels, 64, 64, 256, Some(Duration::from_secs(1))).unwrap();
    blender.blend(&mut frame).unwrap();

    let green = |x: usize, y: usize| pixels[(y * 64 + x) * 4 + 1] == 255;
    assert!(green(32, 32));
    assert!(green(47, 47));
    assert!(!green(48, 48));
    assert!(!green(31, 40));
}

#[test]
fn test_dynamic_blend_needs_timestamp() {
    let blender = blender(64, 64);
    blender.configure(DynamicMaskConfig::new("seg0")).unwrap();

    let mut pixels = vec![0u8; 64 * 64 * 4];
    let mut frame = FrameView::rgba(&mut pixels, 64, 64, 256, None).unwrap();
    assert!(matches!(
        blender.blend(&mut frame),
        Err(MaskError::InvalidArgument(_))
    ));
}

#[test]
fn test_static_blend_without_timestamp() {
    let blender = blender(64, 64);
    blender.add_static_mask(rect("a", 0, 0, 32, 32)).unwrap();
    blender.set_color(Rgb::new(0, 0, 255));

    let mut pixels = vec![0u8; 64 * 64 * 4];
    let mut frame = FrameView::rgba(&mut pixels, 64, 64, 256, None).unwrap();
    blender.blend(&mut frame).unwrap();
    assert_eq!(&pixels[0..3], &[0, 0, 255]);
    assert_eq!(&pixels[(40 * 64 + 40) * 4..(40 * 64 + 40) * 4 + 3], &[0, 0, 0]);
}
