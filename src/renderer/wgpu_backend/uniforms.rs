//! Uniform blocks for [`SkyPasses`](super::SkyPasses) shaders.
//!
//! `#[repr(C)]` mirrors of [`SubframeParams`] and [`ReprojectParams`] laid
//! out for WGSL uniform buffers (16-byte multiples, no implicit padding).
//! Stereo frames produce one block per eye.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec2, Vec2, Vec4};
use smallvec::SmallVec;

use crate::renderer::backend::{ReprojectParams, SubframeParams};
use crate::renderer::frame_geometry::{EyeMatrices, FrameGeometry};

/// Per-eye uniform blocks of one frame.
pub type EyeUniforms<T> = SmallVec<[T; 2]>;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SubframeUniforms {
    pub inverse_projection: Mat4,
    pub inverse_view: Mat4,
    /// xyz: direction, w: solar altitude
    pub sun_direction: Vec4,
    /// rgb: color, w: coverage
    pub sun_color: Vec4,
    /// xyz: direction, w: lunar altitude
    pub moon_direction: Vec4,
    /// rgb: color, w: density
    pub moon_color: Vec4,
    pub wind_offset: Vec2,
    pub wetness: f32,
    pub seed: u32,
    pub frame_size: UVec2,
    pub tile_offset: UVec2,
    pub tile_factor: u32,
    pub tile_index: u32,
    pub _pad: [u32; 2],
}

impl SubframeUniforms {
    #[must_use]
    pub fn new(params: &SubframeParams, eye: &EyeMatrices) -> Self {
        Self {
            inverse_projection: eye.inverse_projection,
            inverse_view: eye.inverse_view,
            sun_direction: params.sun_direction.extend(params.solar_altitude),
            sun_color: params.sun_color.extend(params.coverage),
            moon_direction: params.moon_direction.extend(params.lunar_altitude),
            moon_color: params.moon_color.extend(params.density),
            wind_offset: params.wind_offset,
            wetness: params.wetness,
            seed: params.seed,
            frame_size: params.frame_size,
            tile_offset: params.tile_offset,
            tile_factor: params.tile_factor,
            tile_index: params.tile_index,
            _pad: [0; 2],
        }
    }

    /// One block for the primary eye plus one for the secondary eye when
    /// stereo is active.
    #[must_use]
    pub fn for_eyes(params: &SubframeParams) -> EyeUniforms<Self> {
        eyes(&params.geometry)
            .map(|eye| Self::new(params, eye))
            .collect()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ReprojectUniforms {
    pub current_inverse_projection: Mat4,
    pub current_inverse_view: Mat4,
    pub previous_view_projection: Mat4,
    pub tile_factor: u32,
    pub tile_index: u32,
    /// Non-zero when history must be ignored.
    pub first_frame: u32,
    pub _pad: u32,
}

impl ReprojectUniforms {
    #[must_use]
    pub fn new(params: &ReprojectParams, current: &EyeMatrices, previous: &EyeMatrices) -> Self {
        Self {
            current_inverse_projection: current.inverse_projection,
            current_inverse_view: current.inverse_view,
            previous_view_projection: previous.view_projection(),
            tile_factor: params.tile_factor,
            tile_index: params.tile_index,
            first_frame: u32::from(params.first_frame),
            _pad: 0,
        }
    }

    /// Pairs current and previous matrices per eye. A secondary eye without
    /// history falls back to its own current matrices.
    #[must_use]
    pub fn for_eyes(params: &ReprojectParams) -> EyeUniforms<Self> {
        let mut blocks = EyeUniforms::new();
        blocks.push(Self::new(params, &params.current.primary, &params.previous.primary));
        if let Some(current) = &params.current.secondary {
            let previous = params.previous.secondary.as_ref().unwrap_or(current);
            blocks.push(Self::new(params, current, previous));
        }
        blocks
    }
}

fn eyes(geometry: &FrameGeometry) -> impl Iterator<Item = &EyeMatrices> {
    std::iter::once(&geometry.primary).chain(geometry.secondary.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::inputs::{CameraState, EyeState, StereoMode};
    use glam::Vec3;

    fn camera() -> CameraState {
        CameraState::perspective(64, 32, 1.0, Vec3::ZERO, Vec3::NEG_Z)
    }

    fn subframe_params(geometry: FrameGeometry) -> SubframeParams {
        SubframeParams {
            tile_index: 5,
            tile_factor: 4,
            tile_offset: UVec2::new(1, 1),
            frame_size: UVec2::new(64, 32),
            subframe_size: UVec2::new(16, 8),
            geometry,
            sun_direction: Vec3::Y,
            sun_color: Vec3::ONE,
            moon_direction: Vec3::NEG_Y,
            moon_color: Vec3::splat(0.2),
            solar_altitude: 0.8,
            lunar_altitude: 0.0,
            coverage: 0.4,
            density: 0.6,
            wetness: 0.1,
            wind_offset: Vec2::new(0.5, 0.25),
            seed: 42,
        }
    }

    #[test]
    fn blocks_are_uniform_aligned() {
        assert_eq!(std::mem::size_of::<SubframeUniforms>() % 16, 0);
        assert_eq!(std::mem::size_of::<ReprojectUniforms>() % 16, 0);
    }

    #[test]
    fn packed_scalars_ride_in_w() {
        let params = subframe_params(FrameGeometry::capture(&camera(), true));
        let block = SubframeUniforms::new(&params, &params.geometry.primary);
        assert_eq!(block.sun_direction.w, 0.8);
        assert_eq!(block.sun_color.w, 0.4);
        assert_eq!(block.moon_color.w, 0.6);
        assert_eq!(block.tile_offset, UVec2::new(1, 1));

        let bytes: &[u8] = bytemuck::bytes_of(&block);
        assert_eq!(bytes.len(), std::mem::size_of::<SubframeUniforms>());
    }

    #[test]
    fn stereo_yields_block_per_eye() {
        let mono = camera();
        let secondary = EyeState::new(
            Mat4::from_translation(Vec3::X * 0.064) * mono.primary.view,
            mono.primary.projection,
        );
        let stereo = mono.clone().with_stereo(StereoMode::MultiPass, secondary);

        let mono_params = subframe_params(FrameGeometry::capture(&mono, true));
        assert_eq!(SubframeUniforms::for_eyes(&mono_params).len(), 1);

        let stereo_params = subframe_params(FrameGeometry::capture(&stereo, true));
        let blocks = SubframeUniforms::for_eyes(&stereo_params);
        assert_eq!(blocks.len(), 2);
        assert_ne!(blocks[0].inverse_view, blocks[1].inverse_view);
    }

    #[test]
    fn reprojection_pairs_previous_matrices() {
        use crate::renderer::targets::TargetId;

        let mut moved = camera();
        let current = FrameGeometry::capture(&moved, true);
        moved.primary.view = Mat4::from_rotation_y(0.1) * moved.primary.view;
        let previous = FrameGeometry::capture(&moved, true);

        let params = ReprojectParams {
            subframe: TargetId::default(),
            history: TargetId::default(),
            destination: TargetId::default(),
            tile_index: 3,
            tile_factor: 2,
            current,
            previous,
            first_frame: true,
        };
        let blocks = ReprojectUniforms::for_eyes(&params);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].first_frame, 1);
        assert_eq!(blocks[0].previous_view_projection, previous.primary.view_projection());
        assert_eq!(blocks[0].current_inverse_view, current.primary.inverse_view);
    }
}
