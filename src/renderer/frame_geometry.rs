//! Frame Geometry State
//!
//! Captures the camera matrices used for the current frame and keeps the
//! previous frame's copy around for reprojection.
//!
//! # Frame Protocol
//!
//! ```text
//! start_frame(camera)   → current = capture(camera)
//!   … render / composite with `current` and `previous` …
//! finalize_frame(tile)  → previous = current, last_tile = tile
//! ```
//!
//! `start_frame` and `finalize_frame` must alternate. A second
//! `start_frame` without a `finalize_frame` in between is reported with a
//! warning and simply recaptures `current`; `previous` is left untouched.

use glam::Mat4;

use crate::resources::inputs::{CameraState, EyeState, StereoMode};

/// The four matrices tracked for one eye.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeMatrices {
    pub projection: Mat4,
    pub inverse_projection: Mat4,
    pub view: Mat4,
    pub inverse_view: Mat4,
}

impl Default for EyeMatrices {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            inverse_projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            inverse_view: Mat4::IDENTITY,
        }
    }
}

impl EyeMatrices {
    #[must_use]
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        Self {
            projection,
            inverse_projection: projection.inverse(),
            view,
            inverse_view: view.inverse(),
        }
    }

    /// Captures an eye, optionally dropping TAA jitter.
    #[must_use]
    pub fn capture(eye: &EyeState, strip_jitter: bool) -> Self {
        let projection = if strip_jitter {
            eye.non_jittered_projection.unwrap_or(eye.projection)
        } else {
            eye.projection
        };
        Self::new(eye.view, projection)
    }

    #[inline]
    #[must_use]
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// Matrices for one frame: the primary eye plus an optional secondary eye.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameGeometry {
    pub primary: EyeMatrices,
    /// Present only while stereo is active.
    pub secondary: Option<EyeMatrices>,
    pub stereo: StereoMode,
}

impl FrameGeometry {
    #[must_use]
    pub fn capture(camera: &CameraState, strip_jitter: bool) -> Self {
        let secondary = camera
            .active_secondary()
            .map(|eye| EyeMatrices::capture(eye, strip_jitter));
        Self {
            primary: EyeMatrices::capture(&camera.primary, strip_jitter),
            stereo: if secondary.is_some() {
                camera.stereo
            } else {
                StereoMode::Off
            },
            secondary,
        }
    }

    /// Auxiliary matrices carried alongside the primary eye in combined
    /// single-pass stereo.
    #[inline]
    #[must_use]
    pub fn single_pass_auxiliary(&self) -> Option<&EyeMatrices> {
        match self.stereo {
            StereoMode::SinglePass => self.secondary.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramePhase {
    Idle,
    Started,
}

/// Current and previous camera matrices, owned by the temporal compositor.
#[derive(Debug, Clone)]
pub struct FrameGeometryState {
    current: FrameGeometry,
    previous: Option<FrameGeometry>,
    last_tile: Option<u32>,
    phase: FramePhase,
    strip_jitter: bool,
    frames_finalized: u64,
}

impl Default for FrameGeometryState {
    fn default() -> Self {
        Self::new(true)
    }
}

impl FrameGeometryState {
    /// `strip_jitter` selects the un-jittered projection when the camera
    /// provides one.
    #[must_use]
    pub fn new(strip_jitter: bool) -> Self {
        Self {
            current: FrameGeometry::default(),
            previous: None,
            last_tile: None,
            phase: FramePhase::Idle,
            strip_jitter,
            frames_finalized: 0,
        }
    }

    /// Captures the matrices for the frame about to be rendered.
    pub fn start_frame(&mut self, camera: &CameraState) -> &FrameGeometry {
        if self.phase == FramePhase::Started {
            log::warn!("FrameGeometryState: start_frame called twice without finalize_frame");
        }
        self.current = FrameGeometry::capture(camera, self.strip_jitter);

        // A stereo toggle invalidates the archived secondary eye.
        if let Some(previous) = &mut self.previous {
            if previous.secondary.is_some() != self.current.secondary.is_some() {
                previous.secondary = None;
                previous.stereo = self.current.stereo;
            }
        }

        self.phase = FramePhase::Started;
        &self.current
    }

    /// Archives the current matrices as "previous" and records the tile that
    /// was rendered.
    pub fn finalize_frame(&mut self, tile: u32) {
        if self.phase != FramePhase::Started {
            log::warn!("FrameGeometryState: finalize_frame called without start_frame");
            return;
        }
        self.previous = Some(self.current);
        self.last_tile = Some(tile);
        self.frames_finalized += 1;
        self.phase = FramePhase::Idle;
    }

    /// Forgets the archived frame so the next frame has no history.
    pub fn reset(&mut self) {
        self.previous = None;
        self.last_tile = None;
        self.phase = FramePhase::Idle;
    }

    #[inline]
    #[must_use]
    pub fn current(&self) -> &FrameGeometry {
        &self.current
    }

    /// The previous frame's matrices, falling back to the current ones when
    /// no frame has been finalized yet.
    #[inline]
    #[must_use]
    pub fn previous_or_current(&self) -> &FrameGeometry {
        self.previous.as_ref().unwrap_or(&self.current)
    }

    #[inline]
    #[must_use]
    pub fn previous(&self) -> Option<&FrameGeometry> {
        self.previous.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn last_tile(&self) -> Option<u32> {
        self.last_tile
    }

    #[inline]
    #[must_use]
    pub fn is_frame_open(&self) -> bool {
        self.phase == FramePhase::Started
    }

    #[inline]
    #[must_use]
    pub fn frames_finalized(&self) -> u64 {
        self.frames_finalized
    }
}
