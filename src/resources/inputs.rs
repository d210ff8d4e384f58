//! Per-frame Collaborator Inputs
//!
//! Read-only state the host supplies on every call: camera, time of day and
//! weather. These are plain data snapshots; the simulation that produces
//! them lives outside this crate.

use glam::{Mat4, Vec2, Vec3};

/// How the camera renders stereo views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StereoMode {
    /// Single eye.
    #[default]
    Off,
    /// Each eye rendered in its own pass.
    MultiPass,
    /// Both eyes rendered in one combined pass; the secondary eye's matrices
    /// ride along as auxiliary state.
    SinglePass,
}

impl StereoMode {
    #[inline]
    #[must_use]
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// Matrices for one eye as supplied by the host camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeState {
    /// World → view.
    pub view: Mat4,
    /// View → clip, possibly jittered for TAA.
    pub projection: Mat4,
    /// The same projection without sub-pixel jitter, when the host jitters.
    pub non_jittered_projection: Option<Mat4>,
}

impl EyeState {
    #[must_use]
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        Self {
            view,
            projection,
            non_jittered_projection: None,
        }
    }
}

/// Camera snapshot for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraState {
    /// Render target width in pixels.
    pub width: u32,
    /// Render target height in pixels.
    pub height: u32,
    pub hdr: bool,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
    pub stereo: StereoMode,
    pub primary: EyeState,
    /// Present when `stereo` is active.
    pub secondary: Option<EyeState>,
}

impl CameraState {
    /// A mono perspective camera at `position` looking along `forward`.
    #[must_use]
    pub fn perspective(width: u32, height: u32, fov_y: f32, position: Vec3, forward: Vec3) -> Self {
        let near = 0.1;
        let far = 1000.0;
        let aspect = width.max(1) as f32 / height.max(1) as f32;
        let view = Mat4::look_to_rh(position, forward, Vec3::Y);
        let projection = Mat4::perspective_rh(fov_y, aspect, near, far);
        Self {
            width,
            height,
            hdr: true,
            fov_y,
            near,
            far,
            stereo: StereoMode::Off,
            primary: EyeState::new(view, projection),
            secondary: None,
        }
    }

    /// Enables stereo with the given secondary eye.
    #[must_use]
    pub fn with_stereo(mut self, mode: StereoMode, secondary: EyeState) -> Self {
        self.stereo = mode;
        self.secondary = mode.is_active().then_some(secondary);
        self
    }

    /// Returns the secondary eye only when stereo is active.
    #[inline]
    #[must_use]
    pub fn active_secondary(&self) -> Option<&EyeState> {
        if self.stereo.is_active() {
            self.secondary.as_ref()
        } else {
            None
        }
    }
}

/// Sun and moon state from the time-of-day simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyTimeState {
    /// Unit vector pointing towards the sun.
    pub sun_direction: Vec3,
    /// Unit vector pointing towards the moon.
    pub moon_direction: Vec3,
    /// Linear RGB sun color.
    pub sun_color: Vec3,
    /// Linear RGB moon color.
    pub moon_color: Vec3,
    /// Normalized solar altitude in `[0, 1]`.
    pub solar_altitude: f32,
    /// Normalized lunar altitude in `[0, 1]`.
    pub lunar_altitude: f32,
    /// Seconds since the simulation started; drives wind scrolling.
    pub elapsed_seconds: f32,
}

impl Default for SkyTimeState {
    fn default() -> Self {
        Self {
            sun_direction: Vec3::new(0.0, 0.7, -0.7).normalize(),
            moon_direction: Vec3::new(0.0, -0.7, 0.7).normalize(),
            sun_color: Vec3::new(1.0, 0.95, 0.85),
            moon_color: Vec3::new(0.2, 0.25, 0.35),
            solar_altitude: 0.75,
            lunar_altitude: 0.0,
            elapsed_seconds: 0.0,
        }
    }
}

/// Weather state driving the cloud layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherState {
    /// Cloud coverage in `[0, 1]`.
    pub coverage: f32,
    /// Cloud density in `[0, 1]`.
    pub density: f32,
    /// Horizontal wind in world units per second.
    pub wind: Vec2,
    /// Precipitation-driven surface wetness in `[0, 1]`.
    pub wetness: f32,
}

impl Default for WeatherState {
    fn default() -> Self {
        Self {
            coverage: 0.5,
            density: 0.5,
            wind: Vec2::new(1.0, 0.0),
            wetness: 0.0,
        }
    }
}
