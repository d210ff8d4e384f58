//! Cubemap Reflection Refresher
//!
//! Bakes the six faces of a reflection probe's cubemap, either all within
//! one tick ([`ScheduleMode::Instant`]) or one face per tick
//! ([`ScheduleMode::TimeSliced`]).
//!
//! # State Machine
//!
//! ```text
//!            request_refresh()                 6th face done
//!   Idle ───────────────────────▶ Rendering ─────────────────▶ Idle
//!    ▲                              │   │      (mips + publish)
//!    │          cancel()/disable()  │   │ request_refresh()
//!    └──────────────────────────────┘   └──▶ coalesced (dropped)
//! ```
//!
//! # Per-face Work
//!
//! 1. Clear the staging and mirror targets.
//! 2. Render the sky from the probe position with the face's fixed rotation.
//! 3. Mirror pass (optional tone mapping) from staging into mirror.
//! 4. Copy the mirror target into the face's cubemap layer.
//!
//! Mipmaps are regenerated once per cycle, after the last face, and only
//! then is the cubemap published. Consumers read [`CubemapRefresher::published`];
//! its target handle stays the same across cycles unless the probe
//! resolution or format changes.

use std::f32::consts::FRAC_PI_2;

use glam::{Mat4, Vec3};
use smallvec::SmallVec;

use crate::errors::{Result, SkyError};
use crate::renderer::backend::{RenderBackend, ViewParams};
use crate::renderer::schedule::{ScheduleMode, UnitOrder, WorkSchedule};
use crate::renderer::settings::SkySettings;
use crate::renderer::targets::{RenderTargetSet, TargetId, TargetShape, TargetSlot};
use crate::resources::inputs::SkyTimeState;

const STAGING: usize = 0;
const MIRROR: usize = 1;

// ============================================================================
// Cube Faces
// ============================================================================

/// The six cubemap faces in layer order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        Self::PositiveX,
        Self::NegativeX,
        Self::PositiveY,
        Self::NegativeY,
        Self::PositiveZ,
        Self::NegativeZ,
    ];

    /// Returns the face for a layer index in `0..6`.
    #[inline]
    #[must_use]
    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Array layer of this face.
    #[inline]
    #[must_use]
    pub fn index(self) -> u32 {
        self as u32
    }

    /// Direction the baking camera looks along.
    #[must_use]
    pub fn look_direction(self) -> Vec3 {
        match self {
            Self::PositiveX => Vec3::X,
            Self::NegativeX => Vec3::NEG_X,
            Self::PositiveY => Vec3::Y,
            Self::NegativeY => Vec3::NEG_Y,
            Self::PositiveZ => Vec3::Z,
            Self::NegativeZ => Vec3::NEG_Z,
        }
    }

    /// Up vector that lines the rendered image up with cube sampling
    /// (top-left texel origin).
    #[must_use]
    pub fn up(self) -> Vec3 {
        match self {
            Self::PositiveY => Vec3::NEG_Z,
            Self::NegativeY => Vec3::Z,
            _ => Vec3::Y,
        }
    }

    /// World → view matrix for a baking camera at `position`.
    #[must_use]
    pub fn view_matrix(self, position: Vec3) -> Mat4 {
        Mat4::look_to_lh(position, self.look_direction(), self.up())
    }
}

/// Square 90° projection shared by all faces.
#[must_use]
pub fn face_projection(near: f32, far: f32) -> Mat4 {
    Mat4::perspective_lh(FRAC_PI_2, 1.0, near, far)
}

// ============================================================================
// Settings & State
// ============================================================================

/// Per-probe configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSettings {
    /// Quality override for this probe's face size. `None` uses
    /// [`SkySettings::reflection_resolution`].
    pub resolution_override: Option<u32>,
    /// Refresh mode override. `None` uses [`SkySettings::refresh_mode`].
    pub mode_override: Option<ScheduleMode>,
    pub near: f32,
    pub far: f32,
    /// Clear color for staging targets before each face.
    pub clear_color: [f32; 4],
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            resolution_override: None,
            mode_override: None,
            near: 0.3,
            far: 1000.0,
            clear_color: [0.0, 0.0, 0.0, 0.0],
        }
    }
}

/// Refresh progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshState {
    #[default]
    Idle,
    Rendering {
        mode: ScheduleMode,
        /// Faces baked in the current cycle.
        faces_completed: u32,
        /// Face size the cycle renders at; `None` until the first tick.
        resolution: Option<u32>,
    },
}

impl RefreshState {
    #[inline]
    #[must_use]
    pub fn is_rendering(&self) -> bool {
        matches!(self, Self::Rendering { .. })
    }

    #[inline]
    #[must_use]
    pub fn faces_completed(&self) -> u32 {
        match self {
            Self::Idle => 0,
            Self::Rendering {
                faces_completed, ..
            } => *faces_completed,
        }
    }
}

/// Result of [`CubemapRefresher::request_refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshRequest {
    /// A new cycle was started.
    Started,
    /// A cycle is already in flight; the request was dropped.
    Coalesced,
    /// The probe is disabled; nothing happens.
    Disabled,
}

/// A fully baked cubemap visible to consumers.
///
/// The target stays the same across cycles. While a time-sliced refresh is
/// running, faces are copied into it one per tick, so between publishes it can
/// hold a mix of old and new faces with mips from the previous bake. `version`
/// changes only once all six faces and the mips are current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedCubemap {
    pub target: TargetId,
    /// Incremented on every publish.
    pub version: u64,
}

/// What one [`CubemapRefresher::tick`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    pub faces_rendered: SmallVec<[CubeFace; 6]>,
    /// Set when the cycle finished on this tick.
    pub published: Option<PublishedCubemap>,
    /// Set when a resolution or format change restarted the cycle.
    pub restarted: bool,
}

// ============================================================================
// CubemapRefresher
// ============================================================================

/// Amortized baker for one reflection probe.
///
/// All targets are owned exclusively by this instance.
#[derive(Debug)]
pub struct CubemapRefresher {
    settings: ProbeSettings,
    enabled: bool,
    faulted: bool,
    state: RefreshState,
    schedule: WorkSchedule,
    staging: RenderTargetSet,
    cubemap: TargetSlot,
    published: Option<PublishedCubemap>,
    publish_count: u64,
}

impl CubemapRefresher {
    /// Creates a disabled refresher. Call [`enable`](Self::enable) before use.
    #[must_use]
    pub fn new(settings: ProbeSettings) -> Self {
        Self {
            settings,
            enabled: false,
            faulted: false,
            state: RefreshState::Idle,
            schedule: WorkSchedule::new(6, ScheduleMode::TimeSliced, UnitOrder::Sequential),
            staging: RenderTargetSet::new(&["Probe Staging", "Probe Mirror"]),
            cubemap: TargetSlot::new("Probe Cubemap"),
            published: None,
            publish_count: 0,
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────────────

    /// Enables the probe and allocates its targets at the effective size.
    ///
    /// Clears a previous fault. On allocation failure the probe stays
    /// disabled and faulted.
    pub fn enable<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        sky: &SkySettings,
    ) -> Result<()> {
        if self.enabled {
            return Ok(());
        }
        self.faulted = false;
        let resolution = self.effective_resolution(sky);
        if let Err(err) = self.ensure_targets(backend, resolution, sky.probe_format()) {
            self.fault(backend, &err);
            return Err(err);
        }
        self.enabled = true;
        log::info!("Reflection probe enabled at {resolution}x{resolution}");
        Ok(())
    }

    /// Disables the probe: cancels pending work and releases every target.
    pub fn disable<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        self.cancel();
        self.release_targets(backend);
        self.enabled = false;
    }

    /// Abandons the in-flight cycle, if any. Targets stay allocated.
    pub fn cancel(&mut self) {
        if let RefreshState::Rendering {
            faces_completed, ..
        } = self.state
        {
            log::debug!("Reflection refresh cancelled after {faces_completed} faces");
        }
        self.state = RefreshState::Idle;
        self.schedule.restart();
    }

    // ── Requests ───────────────────────────────────────────────────────────

    /// Starts a refresh cycle unless one is already running.
    pub fn request_refresh(&mut self, mode: ScheduleMode) -> Result<RefreshRequest> {
        if self.faulted {
            return Err(SkyError::Faulted("reflection probe"));
        }
        if !self.enabled {
            return Ok(RefreshRequest::Disabled);
        }
        if self.state.is_rendering() {
            return Ok(RefreshRequest::Coalesced);
        }
        self.schedule.set_mode(mode);
        self.schedule.restart();
        self.state = RefreshState::Rendering {
            mode,
            faces_completed: 0,
            resolution: None,
        };
        Ok(RefreshRequest::Started)
    }

    /// [`request_refresh`](Self::request_refresh) with the mode resolved from
    /// the probe override or the global setting.
    pub fn request_refresh_with(&mut self, sky: &SkySettings) -> Result<RefreshRequest> {
        let mode = self.refresh_mode(sky);
        self.request_refresh(mode)
    }

    // ── Per-frame ──────────────────────────────────────────────────────────

    /// Advances the refresh by one frame.
    ///
    /// Renders one face (time-sliced) or all remaining faces (instant). A
    /// change of the effective resolution or format restarts the cycle from
    /// face 0 with freshly created targets.
    pub fn tick<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        sky: &SkySettings,
        position: Vec3,
        time: &SkyTimeState,
    ) -> Result<TickOutcome> {
        if self.faulted {
            return Err(SkyError::Faulted("reflection probe"));
        }
        let mut outcome = TickOutcome::default();
        if !self.enabled {
            return Ok(outcome);
        }
        let RefreshState::Rendering {
            mode,
            mut faces_completed,
            resolution: cycle_resolution,
        } = self.state
        else {
            return Ok(outcome);
        };

        match self.step(
            backend,
            sky,
            position,
            time,
            mode,
            &mut faces_completed,
            cycle_resolution,
            &mut outcome,
        ) {
            Ok(()) => Ok(outcome),
            Err(err) => {
                if err.is_fatal() {
                    self.fault(backend, &err);
                } else {
                    log::error!("Reflection refresh aborted: {err}");
                    self.cancel();
                }
                Err(err)
            }
        }
    }

    fn step<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        sky: &SkySettings,
        position: Vec3,
        time: &SkyTimeState,
        mode: ScheduleMode,
        faces_completed: &mut u32,
        cycle_resolution: Option<u32>,
        outcome: &mut TickOutcome,
    ) -> Result<()> {
        let resolution = self.effective_resolution(sky);
        let recreated = self.ensure_targets(backend, resolution, sky.probe_format())?;

        let resolution_changed = cycle_resolution.is_some_and(|r| r != resolution);
        if (recreated || resolution_changed) && *faces_completed > 0 {
            log::info!(
                "Reflection probe targets changed mid-cycle \
                 ({cycle_resolution:?} -> {resolution}), restarting at face 0"
            );
            *faces_completed = 0;
            self.schedule.restart();
            outcome.restarted = true;
        }

        let units = self.schedule.next_units(self.schedule.tick());
        for unit in units {
            if *faces_completed >= 6 {
                break;
            }
            let face = CubeFace::from_index(unit).ok_or(SkyError::UnknownTarget)?;
            self.render_face(backend, sky, face, position, time)?;
            outcome.faces_rendered.push(face);
            *faces_completed += 1;
            self.schedule.advance();
        }

        if *faces_completed >= 6 {
            let cubemap = self.cubemap.get().ok_or(SkyError::UnknownTarget)?;
            backend.generate_mipmaps(cubemap)?;
            self.publish_count += 1;
            let published = PublishedCubemap {
                target: cubemap,
                version: self.publish_count,
            };
            self.published = Some(published);
            outcome.published = Some(published);
            self.state = RefreshState::Idle;
            self.schedule.restart();
            log::info!(
                "Reflection probe published v{} ({resolution}x{resolution}, {mode:?})",
                published.version
            );
        } else {
            self.state = RefreshState::Rendering {
                mode,
                faces_completed: *faces_completed,
                resolution: Some(resolution),
            };
        }
        Ok(())
    }

    /// Bakes one face into the cubemap.
    fn render_face<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        sky: &SkySettings,
        face: CubeFace,
        position: Vec3,
        time: &SkyTimeState,
    ) -> Result<()> {
        let staging = self.staging.get(STAGING).ok_or(SkyError::UnknownTarget)?;
        let mirror = self.staging.get(MIRROR).ok_or(SkyError::UnknownTarget)?;
        let cubemap = self.cubemap.get().ok_or(SkyError::UnknownTarget)?;

        backend.clear_target(staging, self.settings.clear_color)?;
        backend.clear_target(mirror, self.settings.clear_color)?;

        let params = ViewParams {
            view: face.view_matrix(position),
            projection: face_projection(self.settings.near, self.settings.far),
            position,
            sky: *time,
        };
        backend.render_view(staging, &params)?;
        backend.post_process(staging, mirror, sky.tone_mapping)?;
        backend.copy_to_cube_face(mirror, cubemap, face)?;
        log::debug!("Reflection face {face:?} baked");
        Ok(())
    }

    // ── Targets ────────────────────────────────────────────────────────────

    fn ensure_targets<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        resolution: u32,
        format: wgpu::TextureFormat,
    ) -> Result<bool> {
        let staging_created = self
            .staging
            .ensure(backend, TargetShape::d2(resolution, resolution, format))?;
        let (_, cube_created) = self
            .cubemap
            .acquire(backend, TargetShape::cube(resolution, format, true))?;
        if cube_created {
            // The old handle is gone; consumers fall back until the next publish.
            self.published = None;
        }
        Ok(staging_created || cube_created)
    }

    fn release_targets<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        self.staging.release(backend);
        self.cubemap.release(backend);
        self.published = None;
    }

    fn fault<B: RenderBackend + ?Sized>(&mut self, backend: &mut B, err: &SkyError) {
        log::error!("Reflection probe faulted: {err}");
        self.cancel();
        self.release_targets(backend);
        self.enabled = false;
        self.faulted = true;
    }

    // ── Accessors ──────────────────────────────────────────────────────────

    /// Face size after applying the per-probe override.
    #[inline]
    #[must_use]
    pub fn effective_resolution(&self, sky: &SkySettings) -> u32 {
        self.settings
            .resolution_override
            .unwrap_or(sky.reflection_resolution)
            .max(1)
    }

    #[inline]
    #[must_use]
    pub fn refresh_mode(&self, sky: &SkySettings) -> ScheduleMode {
        self.settings.mode_override.unwrap_or(sky.refresh_mode)
    }

    /// The last fully baked cubemap.
    ///
    /// During a time-sliced cycle the returned target is being rewritten face
    /// by face and its mips lag until the cycle completes. Watch
    /// [`PublishedCubemap::version`] to pick up a complete bake.
    #[inline]
    #[must_use]
    pub fn published(&self) -> Option<PublishedCubemap> {
        self.published
    }

    /// The cubemap target, published or not.
    #[inline]
    #[must_use]
    pub fn cubemap_target(&self) -> Option<TargetId> {
        self.cubemap.get()
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> RefreshState {
        self.state
    }

    #[inline]
    #[must_use]
    pub fn is_rendering(&self) -> bool {
        self.state.is_rendering()
    }

    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Mutable settings; a resolution change takes effect on the next tick.
    #[inline]
    pub fn settings_mut(&mut self) -> &mut ProbeSettings {
        &mut self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_indices_round_trip() {
        for (i, face) in CubeFace::ALL.iter().enumerate() {
            assert_eq!(face.index() as usize, i);
            assert_eq!(CubeFace::from_index(i as u32), Some(*face));
        }
        assert_eq!(CubeFace::from_index(6), None);
    }

    #[test]
    fn face_view_looks_along_direction() {
        for face in CubeFace::ALL {
            let view = face.view_matrix(Vec3::new(3.0, -2.0, 5.0));
            // Left-handed view space looks down +Z.
            let forward = view.inverse().transform_vector3(Vec3::Z);
            assert!((forward - face.look_direction()).length() < 1e-5, "{face:?}");
        }
    }
}
