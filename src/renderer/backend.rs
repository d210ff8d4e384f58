//! Render Backend Capability
//!
//! The refresher and compositor never touch a graphics API directly. Every
//! allocation, copy and pass goes through [`RenderBackend`], selected once
//! by the host for its render pipeline:
//!
//! | Backend                                   | Use                          |
//! |-------------------------------------------|------------------------------|
//! | [`WgpuBackend`](super::wgpu_backend::WgpuBackend) | Production GPU rendering |
//! | [`HeadlessBackend`](super::headless::HeadlessBackend) | CPU reference, tests |
//!
//! Shading passes (`render_view`, `post_process`, `render_subframe`,
//! `reproject`, `apply_layer`) are opaque to this crate: it decides *when*
//! and *with which matrices* they run, the backend decides *how*.

use glam::{UVec2, Vec2, Vec3};

use crate::errors::Result;
use crate::renderer::frame_geometry::FrameGeometry;
use crate::renderer::probe::CubeFace;
use crate::renderer::targets::{TargetDesc, TargetId, TargetShape};
use crate::resources::inputs::SkyTimeState;

/// Parameters for rendering one view of the sky into a 2D target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewParams {
    pub view: glam::Mat4,
    pub projection: glam::Mat4,
    /// World-space eye position.
    pub position: Vec3,
    pub sky: SkyTimeState,
}

/// Parameters for rendering one reprojection sub-tile of the cloud layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubframeParams {
    /// Index in `[0, tile_factor²)`.
    pub tile_index: u32,
    pub tile_factor: u32,
    /// Pixel offset of this tile inside each `F×F` block.
    pub tile_offset: UVec2,
    pub frame_size: UVec2,
    pub subframe_size: UVec2,
    pub geometry: FrameGeometry,
    pub sun_direction: Vec3,
    pub sun_color: Vec3,
    pub moon_direction: Vec3,
    pub moon_color: Vec3,
    pub solar_altitude: f32,
    pub lunar_altitude: f32,
    pub coverage: f32,
    pub density: f32,
    pub wetness: f32,
    /// Accumulated wind scroll in cloud UV space.
    pub wind_offset: Vec2,
    /// Per-frame random seed for dithering.
    pub seed: u32,
}

/// Parameters for blending a fresh sub-frame against reprojected history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReprojectParams {
    pub subframe: TargetId,
    pub history: TargetId,
    /// Receives the reconstructed full-resolution layer.
    pub destination: TargetId,
    pub tile_index: u32,
    pub tile_factor: u32,
    /// Matrices used to place the new samples.
    pub current: FrameGeometry,
    /// Matrices used to fetch history.
    pub previous: FrameGeometry,
    /// Seed every pixel from the sub-frame instead of reading history.
    pub first_frame: bool,
}

/// Graphics operations the amortized renderers are built on.
pub trait RenderBackend {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    // ── Target lifecycle ───────────────────────────────────────────────────

    fn create_target(&mut self, desc: &TargetDesc) -> Result<TargetId>;

    /// Releases a target. Releasing an unknown handle is a no-op.
    ///
    /// The handle is invalid immediately. Backends may free the memory later,
    /// once recorded commands that use it have been submitted.
    fn release_target(&mut self, id: TargetId);

    fn target_shape(&self, id: TargetId) -> Option<TargetShape>;

    /// Number of targets currently alive.
    fn live_target_count(&self) -> usize;

    // ── Transfers ──────────────────────────────────────────────────────────

    fn clear_target(&mut self, id: TargetId, color: [f32; 4]) -> Result<()>;

    /// Copies a 2D target into one layer (mip 0) of a cube target.
    fn copy_to_cube_face(&mut self, source: TargetId, cube: TargetId, face: CubeFace)
    -> Result<()>;

    /// Copies between two targets of identical size.
    fn copy_target(&mut self, source: TargetId, destination: TargetId) -> Result<()>;

    /// Regenerates mip levels 1.. from mip 0 for every layer.
    fn generate_mipmaps(&mut self, id: TargetId) -> Result<()>;

    /// Copies the source image unmodified into the destination.
    fn blit(&mut self, source: TargetId, destination: TargetId) -> Result<()>;

    // ── Shading passes ─────────────────────────────────────────────────────

    /// Renders the scene as seen through `params` into a 2D target.
    fn render_view(&mut self, target: TargetId, params: &ViewParams) -> Result<()>;

    /// Mirror pass: optional tone mapping from `source` into `destination`.
    fn post_process(&mut self, source: TargetId, destination: TargetId, tone_mapping: bool)
    -> Result<()>;

    /// Renders the cloud layer for one sub-tile into the sub-frame target.
    fn render_subframe(&mut self, target: TargetId, params: &SubframeParams) -> Result<()>;

    /// Reconstructs the full-resolution cloud layer.
    fn reproject(&mut self, params: &ReprojectParams) -> Result<()>;

    /// Composites the cloud layer over the camera image.
    fn apply_layer(&mut self, layer: TargetId, source: TargetId, destination: TargetId)
    -> Result<()>;
}
