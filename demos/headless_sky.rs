//! Drives a reflection probe and the cloud compositor through a short
//! day cycle on the CPU backend and prints what each frame did.
//!
//! ```text
//! RUST_LOG=debug cargo run --example headless_sky -- [settings.json]
//! ```

use glam::{Vec3, Vec4};

use stratus::renderer::RenderBackend;
use stratus::{
    CameraState, CompositeOutcome, CubemapRefresher, FrameInputs, HeadlessBackend, ProbeSettings,
    SkySettings, SkyTimeState, TemporalCompositor, WeatherState,
};

const FRAMES: u32 = 40;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let settings = match std::env::args().nth(1) {
        Some(path) => SkySettings::from_json(&std::fs::read_to_string(path)?)?,
        None => SkySettings {
            reflection_resolution: 32,
            ..Default::default()
        },
    };

    let (width, height) = (160, 90);
    let mut backend = HeadlessBackend::new();
    let format = stratus::renderer::HDR_TEXTURE_FORMAT;
    let source = backend.create_2d("Camera Color", width, height, format)?;
    let destination = backend.create_2d("Camera Output", width, height, format)?;
    backend.fill(source, Vec4::new(0.05, 0.08, 0.1, 1.0))?;

    let mut probe = CubemapRefresher::new(ProbeSettings::default());
    probe.enable(&mut backend, &settings)?;
    let mut compositor = TemporalCompositor::default();

    let weather = WeatherState::default();
    let mut camera = CameraState::perspective(
        width,
        height,
        60f32.to_radians(),
        Vec3::new(0.0, 2.0, 0.0),
        Vec3::new(0.0, 0.4, -1.0).normalize(),
    );

    for frame in 0..FRAMES {
        let t = frame as f32 / FRAMES as f32;
        let angle = t * std::f32::consts::PI;
        let sun = Vec3::new(angle.cos(), angle.sin(), -0.3).normalize();
        let time = SkyTimeState {
            sun_direction: sun,
            solar_altitude: sun.y.max(0.0),
            elapsed_seconds: frame as f32 / 30.0,
            ..Default::default()
        };

        // Re-bake reflections every 10 frames.
        if frame % 10 == 0 {
            probe.request_refresh_with(&settings)?;
        }
        let tick = probe.tick(&mut backend, &settings, Vec3::new(0.0, 2.0, 0.0), &time)?;

        camera.primary.view = glam::Mat4::from_rotation_y(0.01) * camera.primary.view;
        let inputs = FrameInputs {
            camera: &camera,
            settings: Some(&settings),
            time: Some(&time),
            weather: Some(&weather),
        };
        let outcome = compositor.render(&mut backend, &inputs, source, destination)?;

        let tile = match outcome {
            CompositeOutcome::Composited { tile, .. } => format!("tile {tile:>2}"),
            CompositeOutcome::PassThrough { reason } => format!("pass-through ({reason})"),
        };
        let faces: Vec<String> = tick.faces_rendered.iter().map(|f| format!("{f:?}")).collect();
        println!(
            "frame {frame:>3}: clouds {tile}, faces [{}]{}",
            faces.join(", "),
            tick.published
                .map(|p| format!(", published v{}", p.version))
                .unwrap_or_default()
        );
        backend.clear_ops();
    }

    println!(
        "{} live targets on the {} backend",
        backend.live_target_count(),
        backend.name()
    );
    Ok(())
}
