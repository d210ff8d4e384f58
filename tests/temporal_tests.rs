//! Temporal Compositor Tests
//!
//! Tests for:
//! - Frame/sub-frame dimension derivation
//! - Pass-through when collaborators are missing or volumetrics are off
//! - Tile fairness over F² frame windows
//! - History seeding on the first frame and after rebuilds
//! - Static camera converging to a full-resolution render
//! - History reprojection after the camera rotates
//! - Stereo toggling
//! - Allocation failure, fault and reset

use glam::{Mat4, Vec3, Vec4};

use stratus::renderer::headless::{BackendOp, HeadlessBackend};
use stratus::renderer::temporal::wind_offset;
use stratus::renderer::{FrameDimensions, RenderBackend, TargetId};
use stratus::{
    CameraState, CompositeOutcome, EyeState, FrameInputs, ReprojectionQuality, SkyError,
    SkySettings, SkyTimeState, StereoMode, TemporalCompositor, WeatherState,
};

const EPSILON: f32 = 1e-4;

fn approx_vec4(a: Vec4, b: Vec4) -> bool {
    (a - b).abs().max_element() < EPSILON
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn camera(width: u32, height: u32) -> CameraState {
    CameraState::perspective(
        width,
        height,
        60f32.to_radians(),
        Vec3::ZERO,
        Vec3::new(0.0, 0.6, -1.0).normalize(),
    )
}

fn settings(quality: ReprojectionQuality) -> SkySettings {
    SkySettings {
        reprojection: quality,
        ..Default::default()
    }
}

/// Backend with a camera-sized source and destination image.
fn backend_with_frame(width: u32, height: u32) -> (HeadlessBackend, TargetId, TargetId) {
    init_logging();
    let mut backend = HeadlessBackend::new();
    let format = wgpu::TextureFormat::Rgba16Float;
    let source = backend.create_2d("Camera Color", width, height, format).unwrap();
    let destination = backend.create_2d("Camera Output", width, height, format).unwrap();
    backend.fill(source, Vec4::new(0.1, 0.2, 0.3, 1.0)).unwrap();
    (backend, source, destination)
}

struct Frame {
    camera: CameraState,
    settings: SkySettings,
    time: SkyTimeState,
    weather: WeatherState,
}

impl Frame {
    fn new(camera: CameraState, settings: SkySettings) -> Self {
        Self {
            camera,
            settings,
            time: SkyTimeState::default(),
            weather: WeatherState::default(),
        }
    }

    fn inputs(&self) -> FrameInputs<'_> {
        FrameInputs {
            camera: &self.camera,
            settings: Some(&self.settings),
            time: Some(&self.time),
            weather: Some(&self.weather),
        }
    }
}

fn composited(outcome: CompositeOutcome) -> (u32, bool, TargetId) {
    match outcome {
        CompositeOutcome::Composited {
            tile,
            first_frame,
            layer,
            ..
        } => (tile, first_frame, layer),
        CompositeOutcome::PassThrough { reason } => panic!("unexpected pass-through: {reason}"),
    }
}

// ============================================================================
// Dimensions
// ============================================================================

#[test]
fn factor_one_subframe_matches_frame() {
    let (mut backend, source, destination) = backend_with_frame(40, 30);
    let frame = Frame::new(camera(40, 30), settings(ReprojectionQuality::Off));
    let mut compositor = TemporalCompositor::default();

    compositor
        .render(&mut backend, &frame.inputs(), source, destination)
        .unwrap();

    let dims = compositor.dimensions().unwrap();
    assert_eq!(dims.subframe_size(), dims.frame_size());
    assert_eq!(compositor.history_target(), None);
    assert!(!backend
        .ops()
        .iter()
        .any(|op| matches!(op, BackendOp::Reproject { .. })));
}

#[test]
fn full_hd_factor_four_dimensions() {
    let dims = FrameDimensions::compute(1920, 1080, 1, ReprojectionQuality::Medium.factor());
    assert_eq!(dims.frame_size().to_array(), [1920, 1080]);
    assert_eq!(dims.subframe_size().to_array(), [480, 270]);
}

#[test]
fn downsample_rounds_up_to_tile_multiple() {
    for (w, h, ds, f) in [(641, 479, 1, 4), (1280, 720, 3, 8), (1, 1, 4, 2), (333, 200, 2, 1)] {
        let dims = FrameDimensions::compute(w, h, ds, f);
        assert_eq!(dims.frame_width % f, 0);
        assert_eq!(dims.frame_height % f, 0);
        assert!(dims.frame_width >= (w / ds).max(1));
        assert!(dims.frame_width - (w / ds).max(1) < f);
        assert_eq!(dims.subframe_width * f, dims.frame_width);
        assert_eq!(dims.subframe_height * f, dims.frame_height);
    }
}

// ============================================================================
// Pass-through
// ============================================================================

#[test]
fn missing_settings_passes_image_through() {
    let (mut backend, source, destination) = backend_with_frame(16, 16);
    let camera = camera(16, 16);
    let time = SkyTimeState::default();
    let weather = WeatherState::default();
    let mut compositor = TemporalCompositor::default();
    let inputs = FrameInputs {
        camera: &camera,
        settings: None,
        time: Some(&time),
        weather: Some(&weather),
    };

    for _ in 0..3 {
        let outcome = compositor
            .render(&mut backend, &inputs, source, destination)
            .unwrap();
        assert_eq!(
            outcome,
            CompositeOutcome::PassThrough {
                reason: "global settings"
            }
        );
    }

    assert_eq!(backend.live_target_count(), 2);
    assert_eq!(
        backend.texel(destination, 0, 3, 3),
        Some(Vec4::new(0.1, 0.2, 0.3, 1.0))
    );
    assert!(!compositor.is_faulted());
}

#[test]
fn missing_time_or_weather_passes_through() {
    let (mut backend, source, destination) = backend_with_frame(16, 16);
    let camera = camera(16, 16);
    let sky = SkySettings::default();
    let weather = WeatherState::default();
    let time = SkyTimeState::default();
    let mut compositor = TemporalCompositor::default();

    let no_time = FrameInputs {
        camera: &camera,
        settings: Some(&sky),
        time: None,
        weather: Some(&weather),
    };
    assert_eq!(
        compositor.render(&mut backend, &no_time, source, destination).unwrap(),
        CompositeOutcome::PassThrough {
            reason: "time of day"
        }
    );

    let no_weather = FrameInputs {
        camera: &camera,
        settings: Some(&sky),
        time: Some(&time),
        weather: None,
    };
    assert_eq!(
        compositor.render(&mut backend, &no_weather, source, destination).unwrap(),
        CompositeOutcome::PassThrough { reason: "weather" }
    );
}

#[test]
fn disabled_volumetrics_pass_through_and_reseed_history() {
    let (mut backend, source, destination) = backend_with_frame(32, 32);
    let mut frame = Frame::new(camera(32, 32), settings(ReprojectionQuality::Low));
    let mut compositor = TemporalCompositor::default();

    compositor
        .render(&mut backend, &frame.inputs(), source, destination)
        .unwrap();

    frame.settings.volumetrics_enabled = false;
    let outcome = compositor
        .render(&mut backend, &frame.inputs(), source, destination)
        .unwrap();
    assert_eq!(
        outcome,
        CompositeOutcome::PassThrough {
            reason: "volumetrics disabled"
        }
    );

    frame.settings.volumetrics_enabled = true;
    let (_, first_frame, _) = composited(
        compositor
            .render(&mut backend, &frame.inputs(), source, destination)
            .unwrap(),
    );
    assert!(first_frame, "history is stale after skipped frames");
}

// ============================================================================
// Tile Schedule
// ============================================================================

#[test]
fn every_tile_refreshed_once_per_window() {
    for quality in [
        ReprojectionQuality::Low,
        ReprojectionQuality::Medium,
        ReprojectionQuality::High,
    ] {
        let f = quality.factor();
        let tiles = (f * f) as usize;
        let (mut backend, source, destination) = backend_with_frame(32, 32);
        let frame = Frame::new(camera(32, 32), settings(quality));
        let mut compositor = TemporalCompositor::default();

        let sequence: Vec<u32> = (0..tiles * 3)
            .map(|_| {
                composited(
                    compositor
                        .render(&mut backend, &frame.inputs(), source, destination)
                        .unwrap(),
                )
                .0
            })
            .collect();

        for window in sequence.windows(tiles) {
            let mut seen = vec![0u32; tiles];
            for &tile in window {
                seen[tile as usize] += 1;
            }
            assert!(seen.iter().all(|&n| n == 1), "{quality:?}: {window:?}");
        }
    }
}

#[test]
fn tile_order_is_not_a_raster_sweep() {
    let (mut backend, source, destination) = backend_with_frame(32, 32);
    let frame = Frame::new(camera(32, 32), settings(ReprojectionQuality::High));
    let mut compositor = TemporalCompositor::default();

    let sequence: Vec<u32> = (0..64)
        .map(|_| {
            composited(
                compositor
                    .render(&mut backend, &frame.inputs(), source, destination)
                    .unwrap(),
            )
            .0
        })
        .collect();
    let ascending: Vec<u32> = (0..64).collect();
    assert_ne!(sequence, ascending);
}

#[test]
fn rendered_tile_is_recorded() {
    let (mut backend, source, destination) = backend_with_frame(32, 32);
    let frame = Frame::new(camera(32, 32), settings(ReprojectionQuality::Medium));
    let mut compositor = TemporalCompositor::default();

    for expected_frames in 1..=4 {
        let (tile, ..) = composited(
            compositor
                .render(&mut backend, &frame.inputs(), source, destination)
                .unwrap(),
        );
        assert_eq!(compositor.last_tile(), Some(tile));
        assert_eq!(compositor.frame_index(), expected_frames);
        assert!(!compositor.geometry().is_frame_open());
    }
}

// ============================================================================
// History
// ============================================================================

#[test]
fn first_frame_seeds_history_then_blends() {
    let (mut backend, source, destination) = backend_with_frame(32, 32);
    let frame = Frame::new(camera(32, 32), settings(ReprojectionQuality::Medium));
    let mut compositor = TemporalCompositor::default();

    let flags: Vec<bool> = (0..3)
        .map(|_| {
            composited(
                compositor
                    .render(&mut backend, &frame.inputs(), source, destination)
                    .unwrap(),
            )
            .1
        })
        .collect();
    assert_eq!(flags, [true, false, false]);

    let reprojections: Vec<bool> = backend
        .ops()
        .iter()
        .filter_map(|op| match op {
            BackendOp::Reproject { first_frame, .. } => Some(*first_frame),
            _ => None,
        })
        .collect();
    assert_eq!(reprojections, flags);
}

#[test]
fn static_camera_converges_to_full_render() {
    let (width, height) = (48, 32);
    let quality = ReprojectionQuality::Medium;
    let tiles = quality.tile_count();

    let (mut reference_backend, ref_source, ref_destination) = backend_with_frame(width, height);
    let reference_frame = Frame::new(camera(width, height), settings(ReprojectionQuality::Off));
    let mut reference = TemporalCompositor::default();
    let (_, _, reference_layer) = composited(
        reference
            .render(
                &mut reference_backend,
                &reference_frame.inputs(),
                ref_source,
                ref_destination,
            )
            .unwrap(),
    );

    let (mut backend, source, destination) = backend_with_frame(width, height);
    let frame = Frame::new(camera(width, height), settings(quality));
    let mut compositor = TemporalCompositor::default();
    let mut layer = None;
    for _ in 0..tiles {
        layer = Some(
            composited(
                compositor
                    .render(&mut backend, &frame.inputs(), source, destination)
                    .unwrap(),
            )
            .2,
        );
    }
    let layer = layer.unwrap();

    let expected = reference_backend.layer(reference_layer, 0).unwrap();
    let actual = backend.layer(layer, 0).unwrap();
    assert_eq!(expected.len(), actual.len());
    let mismatches = expected
        .iter()
        .zip(actual)
        .filter(|(a, b)| !approx_vec4(**a, **b))
        .count();
    assert_eq!(mismatches, 0);
    assert!(actual.iter().any(|texel| texel.w > 0.0), "cloud layer is empty");

    // History holds the same reconstruction.
    let history = backend.layer(compositor.history_target().unwrap(), 0).unwrap();
    assert!(history.iter().zip(actual).all(|(a, b)| approx_vec4(*a, *b)));
}

#[test]
fn camera_motion_keeps_history() {
    let (mut backend, source, destination) = backend_with_frame(32, 32);
    let mut frame = Frame::new(camera(32, 32), settings(ReprojectionQuality::Medium));
    let mut compositor = TemporalCompositor::default();

    compositor
        .render(&mut backend, &frame.inputs(), source, destination)
        .unwrap();
    let created = backend.created_total();

    let previous_view = frame.camera.primary.view;
    frame.camera.primary.view = previous_view * Mat4::from_rotation_y(0.02);
    let (_, first_frame, _) = composited(
        compositor
            .render(&mut backend, &frame.inputs(), source, destination)
            .unwrap(),
    );

    assert!(!first_frame);
    assert_eq!(backend.created_total(), created);
    let previous = compositor.geometry().previous().unwrap();
    assert_eq!(previous.primary.view, frame.camera.primary.view);
}

#[test]
fn rotated_camera_reprojects_history_with_previous_matrices() {
    // Nearest-texel history lookups differ slightly from a fresh render, so
    // compare cloud coverage with a loose tolerance and allow the sub-pixel
    // misses. Reprojecting with the wrong frame's matrices displaces history
    // by twice the rotation and fails well over a third of the image.
    const COVERAGE_TOLERANCE: f32 = 0.02;
    let (width, height) = (64, 48);
    let quality = ReprojectionQuality::Medium;
    let yaw = 0.03;

    let (mut backend, source, destination) = backend_with_frame(width, height);
    let mut frame = Frame::new(camera(width, height), settings(quality));
    let mut compositor = TemporalCompositor::default();
    for _ in 0..quality.tile_count() {
        compositor
            .render(&mut backend, &frame.inputs(), source, destination)
            .unwrap();
    }
    frame.camera.primary.view *= Mat4::from_rotation_y(yaw);
    let (_, first_frame, layer) = composited(
        compositor
            .render(&mut backend, &frame.inputs(), source, destination)
            .unwrap(),
    );
    assert!(!first_frame);

    let (mut reference_backend, ref_source, ref_destination) = backend_with_frame(width, height);
    let mut reference_frame = Frame::new(camera(width, height), settings(ReprojectionQuality::Off));
    reference_frame.camera.primary.view *= Mat4::from_rotation_y(yaw);
    let (_, _, reference_layer) = composited(
        TemporalCompositor::default()
            .render(
                &mut reference_backend,
                &reference_frame.inputs(),
                ref_source,
                ref_destination,
            )
            .unwrap(),
    );

    let expected = reference_backend.layer(reference_layer, 0).unwrap();
    let actual = backend.layer(layer, 0).unwrap();
    assert_eq!(expected.len(), actual.len());
    let mismatches = expected
        .iter()
        .zip(actual)
        .filter(|(a, b)| (a.w - b.w).abs() >= COVERAGE_TOLERANCE)
        .count();
    assert!(
        mismatches * 5 < actual.len(),
        "{mismatches} of {} texels disagree with a full render",
        actual.len()
    );
}

#[test]
fn resize_rebuilds_targets_and_reseeds() {
    let (mut backend, source, destination) = backend_with_frame(32, 32);
    let mut frame = Frame::new(camera(32, 32), settings(ReprojectionQuality::Medium));
    let mut compositor = TemporalCompositor::default();

    for _ in 0..3 {
        compositor
            .render(&mut backend, &frame.inputs(), source, destination)
            .unwrap();
    }
    let old_subframe = compositor.subframe_target().unwrap();
    let old_history = compositor.history_target().unwrap();

    frame.settings.downsample = 2;
    let outcome = compositor
        .render(&mut backend, &frame.inputs(), source, destination)
        .unwrap();
    let CompositeOutcome::Composited {
        tile,
        dimensions,
        first_frame,
        ..
    } = outcome
    else {
        panic!("expected composite");
    };

    assert!(first_frame);
    assert_eq!(tile, compositor.schedule().order()[0]);
    assert_eq!(dimensions.frame_size().to_array(), [16, 16]);
    assert!(!backend.contains(old_subframe));
    assert!(!backend.contains(old_history));
    // Camera source and destination plus sub-frame, composite and history.
    assert_eq!(backend.live_target_count(), 5);
}

#[test]
fn switching_to_factor_one_drops_history() {
    let (mut backend, source, destination) = backend_with_frame(32, 32);
    let mut frame = Frame::new(camera(32, 32), settings(ReprojectionQuality::Medium));
    let mut compositor = TemporalCompositor::default();

    compositor
        .render(&mut backend, &frame.inputs(), source, destination)
        .unwrap();
    assert_eq!(backend.live_target_count(), 5);

    frame.settings.reprojection = ReprojectionQuality::Off;
    compositor
        .render(&mut backend, &frame.inputs(), source, destination)
        .unwrap();
    assert_eq!(compositor.history_target(), None);
    assert_eq!(backend.live_target_count(), 3);
}

// ============================================================================
// Stereo
// ============================================================================

#[test]
fn stereo_toggle_exposes_and_drops_secondary_eye() {
    let (mut backend, source, destination) = backend_with_frame(32, 32);
    let mono = camera(32, 32);
    let right_eye = EyeState::new(
        Mat4::from_translation(Vec3::new(-0.064, 0.0, 0.0)) * mono.primary.view,
        mono.primary.projection,
    );
    let mut frame = Frame::new(mono.clone(), settings(ReprojectionQuality::Low));
    let mut compositor = TemporalCompositor::default();

    compositor
        .render(&mut backend, &frame.inputs(), source, destination)
        .unwrap();

    frame.camera = mono.clone().with_stereo(StereoMode::SinglePass, right_eye);
    let (_, first_frame, _) = composited(
        compositor
            .render(&mut backend, &frame.inputs(), source, destination)
            .unwrap(),
    );
    assert!(first_frame, "stereo change rebuilds history");
    let geometry = compositor.geometry().current();
    assert!(geometry.secondary.is_some());
    assert!(geometry.single_pass_auxiliary().is_some());

    frame.camera = mono;
    compositor
        .render(&mut backend, &frame.inputs(), source, destination)
        .unwrap();
    let geometry = compositor.geometry().current();
    assert!(geometry.secondary.is_none());
    assert!(geometry.single_pass_auxiliary().is_none());

    let stereo_flags: Vec<bool> = backend
        .ops()
        .iter()
        .filter_map(|op| match op {
            BackendOp::RenderSubframe { stereo, .. } => Some(*stereo),
            _ => None,
        })
        .collect();
    assert_eq!(stereo_flags, [false, true, false]);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn allocation_failure_faults_until_reset() {
    let (mut backend, source, destination) = backend_with_frame(32, 32);
    let frame = Frame::new(camera(32, 32), settings(ReprojectionQuality::Medium));
    let mut compositor = TemporalCompositor::default();

    backend.fail_allocation_after(1);
    let err = compositor
        .render(&mut backend, &frame.inputs(), source, destination)
        .unwrap_err();
    assert!(matches!(err, SkyError::AllocationFailed { .. }), "{err}");
    assert!(compositor.is_faulted());
    assert_eq!(backend.live_target_count(), 2);

    let created = backend.created_total();
    assert!(matches!(
        compositor.render(&mut backend, &frame.inputs(), source, destination),
        Err(SkyError::Faulted(_))
    ));
    assert_eq!(backend.created_total(), created);

    compositor.reset();
    let (_, first_frame, _) = composited(
        compositor
            .render(&mut backend, &frame.inputs(), source, destination)
            .unwrap(),
    );
    assert!(first_frame);
}

#[test]
fn mismatched_destination_is_rejected() {
    let (mut backend, source, _) = backend_with_frame(32, 32);
    let destination = backend
        .create_2d("Wrong Size", 16, 16, wgpu::TextureFormat::Rgba16Float)
        .unwrap();
    let frame = Frame::new(camera(32, 32), settings(ReprojectionQuality::Low));
    let mut compositor = TemporalCompositor::default();

    let err = compositor
        .render(&mut backend, &frame.inputs(), source, destination)
        .unwrap_err();
    assert!(matches!(err, SkyError::DimensionMismatch { .. }));
    assert!(!compositor.is_faulted());
    assert!(!compositor.geometry().is_frame_open());
}

#[test]
fn release_frees_all_targets() {
    let (mut backend, source, destination) = backend_with_frame(32, 32);
    let frame = Frame::new(camera(32, 32), settings(ReprojectionQuality::Medium));
    let mut compositor = TemporalCompositor::default();

    compositor
        .render(&mut backend, &frame.inputs(), source, destination)
        .unwrap();
    compositor.release(&mut backend);
    assert_eq!(backend.live_target_count(), 2);
    assert_eq!(compositor.dimensions(), None);

    let (_, first_frame, _) = composited(
        compositor
            .render(&mut backend, &frame.inputs(), source, destination)
            .unwrap(),
    );
    assert!(first_frame);
}

#[test]
fn wind_scrolls_with_time() {
    let wind = glam::Vec2::new(10.0, -5.0);
    assert_eq!(wind_offset(wind, 0.0), glam::Vec2::ZERO);
    let offset = wind_offset(wind, 100.0);
    assert!((offset.x - 1.0).abs() < EPSILON);
    assert!((offset.y + 0.5).abs() < EPSILON);
}
