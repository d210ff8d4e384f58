//! Temporal Cloud Compositor
//!
//! Renders the volumetric cloud layer at `1/F` resolution per axis, one
//! interleaved sub-tile per frame, and reconstructs a stable full-resolution
//! layer by reprojecting the previous frame's result.
//!
//! # Frame Protocol
//!
//! ```text
//! begin_frame      dimensions from camera / downsample / F, capture matrices
//! ensure targets   (re)allocate sub-frame + history on any dimension change
//! render_subframe  cloud layer for the scheduled tile
//! composite        tile pixels from the sub-frame, the rest reprojected from
//!                  history with the previous matrices; result replaces history
//! apply            cloud layer over the camera image
//! end_frame        advance the tile schedule, archive matrices
//! ```
//!
//! # Tile Layout
//!
//! Full-frame pixel `(x, y)` belongs to tile `(y % F) * F + (x % F)`. Every
//! tile is refreshed exactly once per `F²` frames; the visiting order is a
//! seeded permutation so no directional sweep is visible.
//!
//! With `F = 1` the sub-frame is the full frame and no history is kept.

use glam::{UVec2, Vec2};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use crate::errors::{Result, SkyError};
use crate::renderer::backend::{RenderBackend, ReprojectParams, SubframeParams};
use crate::renderer::frame_geometry::FrameGeometryState;
use crate::renderer::schedule::{ScheduleMode, UnitOrder, WorkSchedule};
use crate::renderer::settings::SkySettings;
use crate::renderer::targets::{RenderTargetSet, TargetId, TargetShape, TargetSlot};
use crate::resources::inputs::{CameraState, SkyTimeState, StereoMode, WeatherState};

const COMPOSITE: usize = 0;
const HISTORY: usize = 1;

/// Wind scroll (world units) to cloud UV conversion.
const WIND_UV_SCALE: f32 = 0.001;

// ============================================================================
// Frame Dimensions
// ============================================================================

/// Pixel sizes derived from the camera for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameDimensions {
    pub frame_width: u32,
    pub frame_height: u32,
    pub subframe_width: u32,
    pub subframe_height: u32,
    pub tile_factor: u32,
}

impl FrameDimensions {
    /// Downsamples the camera size, rounds it up to a multiple of the tile
    /// factor and divides by the factor for the sub-frame.
    #[must_use]
    pub fn compute(
        camera_width: u32,
        camera_height: u32,
        downsample: u32,
        tile_factor: u32,
    ) -> Self {
        let factor = tile_factor.max(1);
        let downsample = downsample.max(1);
        let frame_width = (camera_width / downsample).max(1).next_multiple_of(factor);
        let frame_height = (camera_height / downsample).max(1).next_multiple_of(factor);
        Self {
            frame_width,
            frame_height,
            subframe_width: frame_width / factor,
            subframe_height: frame_height / factor,
            tile_factor: factor,
        }
    }

    #[inline]
    #[must_use]
    pub fn frame_size(&self) -> UVec2 {
        UVec2::new(self.frame_width, self.frame_height)
    }

    #[inline]
    #[must_use]
    pub fn subframe_size(&self) -> UVec2 {
        UVec2::new(self.subframe_width, self.subframe_height)
    }

    /// Pixel offset of `tile` inside each `F×F` block.
    #[inline]
    #[must_use]
    pub fn tile_offset(&self, tile: u32) -> UVec2 {
        UVec2::new(tile % self.tile_factor, tile / self.tile_factor)
    }
}

// ============================================================================
// Inputs & Outcome
// ============================================================================

/// Read-only collaborator state for one frame.
///
/// Any `None` means the collaborator is unavailable; the compositor then
/// passes the camera image through unchanged.
#[derive(Debug, Clone, Copy)]
pub struct FrameInputs<'a> {
    pub camera: &'a CameraState,
    pub settings: Option<&'a SkySettings>,
    pub time: Option<&'a SkyTimeState>,
    pub weather: Option<&'a WeatherState>,
}

impl<'a> FrameInputs<'a> {
    /// Returns every collaborator, or [`SkyError::ConfigurationMissing`]
    /// naming the first one that is absent.
    pub fn resolve(&self) -> Result<(&'a SkySettings, &'a SkyTimeState, &'a WeatherState)> {
        let settings = self
            .settings
            .ok_or(SkyError::ConfigurationMissing("global settings"))?;
        let time = self.time.ok_or(SkyError::ConfigurationMissing("time of day"))?;
        let weather = self.weather.ok_or(SkyError::ConfigurationMissing("weather"))?;
        Ok((settings, time, weather))
    }
}

/// What [`TemporalCompositor::render`] produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeOutcome {
    /// The source was copied to the destination unchanged.
    PassThrough { reason: &'static str },
    /// The cloud layer was rendered and applied.
    Composited {
        tile: u32,
        dimensions: FrameDimensions,
        first_frame: bool,
        /// Full-resolution cloud layer for this frame.
        layer: TargetId,
    },
}

// ============================================================================
// TemporalCompositor
// ============================================================================

/// Reprojecting renderer for the full-screen cloud layer.
///
/// Owns its sub-frame and history targets and the camera matrix history
/// exclusively.
pub struct TemporalCompositor {
    format: wgpu::TextureFormat,
    geometry: FrameGeometryState,
    schedule: WorkSchedule,
    schedule_key: Option<(u32, u64)>,
    dimensions: Option<FrameDimensions>,
    stereo: StereoMode,
    subframe: TargetSlot,
    history: RenderTargetSet,
    needs_rebuild: bool,
    first_frame: bool,
    rng: StdRng,
    faulted: bool,
    missing_config_logged: bool,
    frame_index: u64,
}

impl Default for TemporalCompositor {
    fn default() -> Self {
        Self::new(crate::renderer::HDR_TEXTURE_FORMAT)
    }
}

impl TemporalCompositor {
    /// Creates a compositor whose layer targets use `format`.
    #[must_use]
    pub fn new(format: wgpu::TextureFormat) -> Self {
        Self {
            format,
            geometry: FrameGeometryState::new(true),
            schedule: WorkSchedule::new(1, ScheduleMode::TimeSliced, UnitOrder::Sequential),
            schedule_key: None,
            dimensions: None,
            stereo: StereoMode::Off,
            subframe: TargetSlot::new("Cloud Subframe"),
            history: RenderTargetSet::new(&["Cloud Composite", "Cloud History"]),
            needs_rebuild: true,
            first_frame: true,
            rng: StdRng::seed_from_u64(0x00C1_0D5E),
            faulted: false,
            missing_config_logged: false,
            frame_index: 0,
        }
    }

    /// Renders and applies the cloud layer for one frame.
    ///
    /// `source` is the camera image, `destination` receives the final frame.
    pub fn render<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        inputs: &FrameInputs<'_>,
        source: TargetId,
        destination: TargetId,
    ) -> Result<CompositeOutcome> {
        if self.faulted {
            return Err(SkyError::Faulted("temporal compositor"));
        }

        let (settings, time, weather) = match inputs.resolve() {
            Ok(resolved) => resolved,
            Err(SkyError::ConfigurationMissing(what)) => {
                return self.pass_through(backend, source, destination, Some(what));
            }
            Err(err) => return Err(err),
        };
        self.missing_config_logged = false;
        if !settings.volumetrics_enabled {
            return self.pass_through(backend, source, destination, None);
        }

        match self.composite_frame(
            backend,
            inputs.camera,
            settings,
            time,
            weather,
            source,
            destination,
        ) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                // Abandon the open frame so the next one starts cleanly.
                self.geometry.reset();
                self.first_frame = true;
                if err.is_fatal() {
                    log::error!("Temporal compositor faulted: {err}");
                    self.release(backend);
                    self.faulted = true;
                }
                Err(err)
            }
        }
    }

    fn composite_frame<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        camera: &CameraState,
        settings: &SkySettings,
        time: &SkyTimeState,
        weather: &WeatherState,
        source: TargetId,
        destination: TargetId,
    ) -> Result<CompositeOutcome> {
        let dims = self.begin_frame(camera, settings);
        self.ensure_targets(backend, dims)?;

        let tile = self.schedule.current_unit();
        let subframe = self.subframe.get().ok_or(SkyError::UnknownTarget)?;
        self.render_subframe(backend, subframe, dims, tile, time, weather)?;

        let first_frame = self.first_frame;
        let layer = if dims.tile_factor == 1 {
            subframe
        } else {
            self.composite(backend, subframe, dims, tile)?
        };
        backend.apply_layer(layer, source, destination)?;

        self.end_frame(tile);

        Ok(CompositeOutcome::Composited {
            tile,
            dimensions: dims,
            first_frame,
            layer,
        })
    }

    /// Recomputes frame dimensions and captures the camera matrices.
    fn begin_frame(&mut self, camera: &CameraState, settings: &SkySettings) -> FrameDimensions {
        let factor = settings.reprojection.factor();
        let dims =
            FrameDimensions::compute(camera.width, camera.height, settings.downsample, factor);

        let key = (factor, settings.schedule_seed);
        if self.schedule_key != Some(key) {
            self.schedule.configure(
                factor * factor,
                ScheduleMode::TimeSliced,
                UnitOrder::Shuffled {
                    seed: settings.schedule_seed,
                },
            );
            self.schedule_key = Some(key);
            self.needs_rebuild = true;
        }

        if self.dimensions != Some(dims) {
            if let Some(old) = self.dimensions {
                log::info!(
                    "Cloud layer resized {}x{} -> {}x{} (F={})",
                    old.frame_width,
                    old.frame_height,
                    dims.frame_width,
                    dims.frame_height,
                    dims.tile_factor
                );
            }
            self.needs_rebuild = true;
        }

        let stereo = camera.active_secondary().map_or(StereoMode::Off, |_| camera.stereo);
        if stereo != self.stereo {
            log::info!("Stereo mode changed {:?} -> {stereo:?}", self.stereo);
            self.stereo = stereo;
            self.needs_rebuild = true;
        }

        self.geometry.start_frame(camera);
        dims
    }

    fn ensure_targets<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        dims: FrameDimensions,
    ) -> Result<()> {
        let missing = self.subframe.get().is_none()
            || (dims.tile_factor > 1 && !self.history.is_allocated());
        if !self.needs_rebuild && !missing {
            return Ok(());
        }

        self.subframe.acquire(
            backend,
            TargetShape::d2(dims.subframe_width, dims.subframe_height, self.format),
        )?;
        if dims.tile_factor > 1 {
            self.history.ensure(
                backend,
                TargetShape::d2(dims.frame_width, dims.frame_height, self.format),
            )?;
        } else {
            self.history.release(backend);
        }

        self.dimensions = Some(dims);
        self.needs_rebuild = false;
        self.first_frame = true;
        self.schedule.restart();
        log::debug!(
            "Cloud targets ready: frame {}x{}, subframe {}x{}",
            dims.frame_width,
            dims.frame_height,
            dims.subframe_width,
            dims.subframe_height
        );
        Ok(())
    }

    fn render_subframe<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        target: TargetId,
        dims: FrameDimensions,
        tile: u32,
        time: &SkyTimeState,
        weather: &WeatherState,
    ) -> Result<()> {
        let params = SubframeParams {
            tile_index: tile,
            tile_factor: dims.tile_factor,
            tile_offset: dims.tile_offset(tile),
            frame_size: dims.frame_size(),
            subframe_size: dims.subframe_size(),
            geometry: *self.geometry.current(),
            sun_direction: time.sun_direction,
            sun_color: time.sun_color,
            moon_direction: time.moon_direction,
            moon_color: time.moon_color,
            solar_altitude: time.solar_altitude,
            lunar_altitude: time.lunar_altitude,
            coverage: weather.coverage,
            density: weather.density,
            wetness: weather.wetness,
            wind_offset: wind_offset(weather.wind, time.elapsed_seconds),
            seed: self.rng.random(),
        };
        backend.render_subframe(target, &params)
    }

    /// Reconstructs the full layer into the composite target and replaces
    /// history with it.
    fn composite<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        subframe: TargetId,
        dims: FrameDimensions,
        tile: u32,
    ) -> Result<TargetId> {
        let composite = self.history.get(COMPOSITE).ok_or(SkyError::UnknownTarget)?;
        let history = self.history.get(HISTORY).ok_or(SkyError::UnknownTarget)?;

        backend.reproject(&ReprojectParams {
            subframe,
            history,
            destination: composite,
            tile_index: tile,
            tile_factor: dims.tile_factor,
            current: *self.geometry.current(),
            previous: *self.geometry.previous_or_current(),
            first_frame: self.first_frame,
        })?;
        backend.copy_target(composite, history)?;
        Ok(composite)
    }

    fn end_frame(&mut self, tile: u32) {
        self.schedule.advance();
        self.geometry.finalize_frame(tile);
        self.first_frame = false;
        self.frame_index += 1;
    }

    fn pass_through<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        source: TargetId,
        destination: TargetId,
        missing: Option<&'static str>,
    ) -> Result<CompositeOutcome> {
        let reason = match missing {
            Some(what) => {
                if !self.missing_config_logged {
                    log::warn!("Cloud layer unavailable ({what} missing), passing image through");
                    self.missing_config_logged = true;
                }
                what
            }
            None => "volumetrics disabled",
        };
        // History is stale once frames are skipped.
        self.first_frame = true;
        backend.blit(source, destination)?;
        Ok(CompositeOutcome::PassThrough { reason })
    }

    // ── Lifecycle ──────────────────────────────────────────────────────────

    /// Releases every target, e.g. when the camera is disabled.
    pub fn release<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        self.subframe.release(backend);
        self.history.release(backend);
        self.dimensions = None;
        self.needs_rebuild = true;
        self.first_frame = true;
        self.geometry.reset();
    }

    /// Clears a fault and drops history; the next frame re-seeds it.
    pub fn reset(&mut self) {
        self.faulted = false;
        self.needs_rebuild = true;
        self.first_frame = true;
        self.geometry.reset();
    }

    // ── Accessors ──────────────────────────────────────────────────────────

    #[inline]
    #[must_use]
    pub fn dimensions(&self) -> Option<FrameDimensions> {
        self.dimensions
    }

    #[inline]
    #[must_use]
    pub fn geometry(&self) -> &FrameGeometryState {
        &self.geometry
    }

    #[inline]
    #[must_use]
    pub fn schedule(&self) -> &WorkSchedule {
        &self.schedule
    }

    /// Frames composited so far.
    #[inline]
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Tile rendered by the last completed frame.
    #[inline]
    #[must_use]
    pub fn last_tile(&self) -> Option<u32> {
        self.geometry.last_tile()
    }

    #[inline]
    #[must_use]
    pub fn subframe_target(&self) -> Option<TargetId> {
        self.subframe.get()
    }

    #[inline]
    #[must_use]
    pub fn history_target(&self) -> Option<TargetId> {
        self.history.get(HISTORY)
    }

    #[inline]
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }
}

/// Accumulated wind scroll in cloud UV space.
#[inline]
#[must_use]
pub fn wind_offset(wind: Vec2, elapsed_seconds: f32) -> Vec2 {
    wind * elapsed_seconds * WIND_UV_SCALE
}
