//! Headless CPU Backend
//!
//! A deterministic [`RenderBackend`] that keeps every target as RGBA32F
//! pixels in system memory. It evaluates a small analytic sky and cloud
//! model per pixel and performs direction-based reprojection with the real
//! camera matrices, so the scheduling and transform logic of the renderers
//! can be exercised without a GPU.
//!
//! Every call is appended to an operation log ([`BackendOp`]) that tests can
//! inspect for ordering, and allocations can be made to fail on demand.

use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};
use slotmap::SlotMap;

use crate::errors::{Result, SkyError};
use crate::renderer::backend::{RenderBackend, ReprojectParams, SubframeParams, ViewParams};
use crate::renderer::frame_geometry::EyeMatrices;
use crate::renderer::probe::CubeFace;
use crate::renderer::targets::{TargetDesc, TargetId, TargetShape};
use crate::resources::inputs::SkyTimeState;

/// Largest edge the headless backend accepts.
pub const MAX_HEADLESS_DIMENSION: u32 = 8192;

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendOp {
    Create { id: TargetId, label: &'static str },
    Release { id: TargetId },
    Clear { id: TargetId },
    RenderView { target: TargetId, forward: Vec3 },
    PostProcess { source: TargetId, destination: TargetId, tone_mapping: bool },
    CopyToCubeFace { source: TargetId, cube: TargetId, face: CubeFace },
    CopyTarget { source: TargetId, destination: TargetId },
    GenerateMipmaps { id: TargetId },
    Blit { source: TargetId, destination: TargetId },
    RenderSubframe { target: TargetId, tile_index: u32, seed: u32, stereo: bool },
    Reproject { destination: TargetId, tile_index: u32, first_frame: bool, stereo: bool },
    ApplyLayer { layer: TargetId, source: TargetId, destination: TargetId },
}

struct CpuTarget {
    desc: TargetDesc,
    /// Mip 0 of every layer, row-major.
    layers: Vec<Vec<Vec4>>,
    mip_generations: u32,
}

impl CpuTarget {
    fn new(desc: TargetDesc) -> Self {
        let texels = (desc.shape.width * desc.shape.height) as usize;
        let layers = (0..desc.shape.dimension.layer_count())
            .map(|_| vec![Vec4::ZERO; texels])
            .collect();
        Self {
            desc,
            layers,
            mip_generations: 0,
        }
    }

    fn size(&self) -> (u32, u32) {
        self.desc.shape.size()
    }
}

/// CPU reference implementation of [`RenderBackend`].
pub struct HeadlessBackend {
    targets: SlotMap<TargetId, CpuTarget>,
    ops: Vec<BackendOp>,
    fail_after: Option<usize>,
    created_total: usize,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            targets: SlotMap::with_key(),
            ops: Vec::new(),
            fail_after: None,
            created_total: 0,
        }
    }

    /// Lets `successes` more allocations through, then fails exactly one.
    pub fn fail_allocation_after(&mut self, successes: usize) {
        self.fail_after = Some(successes);
    }

    /// The operation log.
    #[must_use]
    pub fn ops(&self) -> &[BackendOp] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Whether `id` is alive.
    #[must_use]
    pub fn contains(&self, id: TargetId) -> bool {
        self.targets.contains_key(id)
    }

    /// Total number of targets ever created.
    #[must_use]
    pub fn created_total(&self) -> usize {
        self.created_total
    }

    /// Mip 0 texels of one layer.
    #[must_use]
    pub fn layer(&self, id: TargetId, layer: u32) -> Option<&[Vec4]> {
        self.targets
            .get(id)
            .and_then(|t| t.layers.get(layer as usize))
            .map(Vec::as_slice)
    }

    /// A single texel of layer 0 (or of `layer` for cubes).
    #[must_use]
    pub fn texel(&self, id: TargetId, layer: u32, x: u32, y: u32) -> Option<Vec4> {
        let target = self.targets.get(id)?;
        let (w, h) = target.size();
        if x >= w || y >= h {
            return None;
        }
        target
            .layers
            .get(layer as usize)
            .map(|texels| texels[(y * w + x) as usize])
    }

    /// How many times mipmaps were generated for `id`.
    #[must_use]
    pub fn mip_generations(&self, id: TargetId) -> u32 {
        self.targets.get(id).map_or(0, |t| t.mip_generations)
    }

    /// Fills every layer of a target with one color.
    pub fn fill(&mut self, id: TargetId, color: Vec4) -> Result<()> {
        let target = self.targets.get_mut(id).ok_or(SkyError::UnknownTarget)?;
        for layer in &mut target.layers {
            layer.fill(color);
        }
        Ok(())
    }

    /// Convenience for tests: creates a 2D target outside of any renderer.
    pub fn create_2d(
        &mut self,
        label: &'static str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Result<TargetId> {
        self.create_target(&TargetDesc {
            shape: TargetShape::d2(width, height, format),
            label,
        })
    }

    fn target(&self, id: TargetId) -> Result<&CpuTarget> {
        self.targets.get(id).ok_or(SkyError::UnknownTarget)
    }

    fn target_mut(&mut self, id: TargetId) -> Result<&mut CpuTarget> {
        self.targets.get_mut(id).ok_or(SkyError::UnknownTarget)
    }

    fn same_size(&self, a: TargetId, b: TargetId) -> Result<()> {
        let expected = self.target(b)?.size();
        let actual = self.target(a)?.size();
        if expected == actual {
            Ok(())
        } else {
            Err(SkyError::DimensionMismatch { expected, actual })
        }
    }
}

impl RenderBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn create_target(&mut self, desc: &TargetDesc) -> Result<TargetId> {
        let shape = desc.shape;
        if let Some(remaining) = self.fail_after.as_mut() {
            if *remaining == 0 {
                self.fail_after = None;
                return Err(SkyError::AllocationFailed {
                    label: desc.label,
                    width: shape.width,
                    height: shape.height,
                    reason: "injected failure".to_string(),
                });
            }
            *remaining -= 1;
        }
        if shape.width == 0
            || shape.height == 0
            || shape.width > MAX_HEADLESS_DIMENSION
            || shape.height > MAX_HEADLESS_DIMENSION
        {
            return Err(SkyError::AllocationFailed {
                label: desc.label,
                width: shape.width,
                height: shape.height,
                reason: format!("size outside 1..={MAX_HEADLESS_DIMENSION}"),
            });
        }

        let id = self.targets.insert(CpuTarget::new(*desc));
        self.created_total += 1;
        self.ops.push(BackendOp::Create {
            id,
            label: desc.label,
        });
        Ok(id)
    }

    fn release_target(&mut self, id: TargetId) {
        if self.targets.remove(id).is_some() {
            self.ops.push(BackendOp::Release { id });
        }
    }

    fn target_shape(&self, id: TargetId) -> Option<TargetShape> {
        self.targets.get(id).map(|t| t.desc.shape)
    }

    fn live_target_count(&self) -> usize {
        self.targets.len()
    }

    fn clear_target(&mut self, id: TargetId, color: [f32; 4]) -> Result<()> {
        self.fill(id, Vec4::from_array(color))?;
        self.ops.push(BackendOp::Clear { id });
        Ok(())
    }

    fn copy_to_cube_face(
        &mut self,
        source: TargetId,
        cube: TargetId,
        face: CubeFace,
    ) -> Result<()> {
        self.same_size(source, cube)?;
        let texels = self.target(source)?.layers[0].clone();
        let target = self.target_mut(cube)?;
        let layer = target
            .layers
            .get_mut(face.index() as usize)
            .ok_or(SkyError::UnknownTarget)?;
        *layer = texels;
        self.ops.push(BackendOp::CopyToCubeFace { source, cube, face });
        Ok(())
    }

    fn copy_target(&mut self, source: TargetId, destination: TargetId) -> Result<()> {
        self.same_size(source, destination)?;
        let layers = self.target(source)?.layers.clone();
        let target = self.target_mut(destination)?;
        for (dst, src) in target.layers.iter_mut().zip(layers) {
            *dst = src;
        }
        self.ops.push(BackendOp::CopyTarget {
            source,
            destination,
        });
        Ok(())
    }

    fn generate_mipmaps(&mut self, id: TargetId) -> Result<()> {
        self.target_mut(id)?.mip_generations += 1;
        self.ops.push(BackendOp::GenerateMipmaps { id });
        Ok(())
    }

    fn blit(&mut self, source: TargetId, destination: TargetId) -> Result<()> {
        self.same_size(source, destination)?;
        let texels = self.target(source)?.layers[0].clone();
        self.target_mut(destination)?.layers[0] = texels;
        self.ops.push(BackendOp::Blit {
            source,
            destination,
        });
        Ok(())
    }

    fn render_view(&mut self, target: TargetId, params: &ViewParams) -> Result<()> {
        let eye = EyeMatrices::new(params.view, params.projection);
        let sky = params.sky;
        let dst = self.target_mut(target)?;
        let (w, h) = dst.size();
        for y in 0..h {
            for x in 0..w {
                let dir = pixel_direction(&eye, x, y, w, h);
                dst.layers[0][(y * w + x) as usize] = sky_radiance(dir, &sky);
            }
        }
        self.ops.push(BackendOp::RenderView {
            target,
            forward: pixel_direction(&eye, w / 2, h / 2, w, h),
        });
        Ok(())
    }

    fn post_process(
        &mut self,
        source: TargetId,
        destination: TargetId,
        tone_mapping: bool,
    ) -> Result<()> {
        self.same_size(source, destination)?;
        let texels = self.target(source)?.layers[0].clone();
        let dst = self.target_mut(destination)?;
        for (out, texel) in dst.layers[0].iter_mut().zip(texels) {
            *out = if tone_mapping {
                let rgb = texel.xyz();
                (rgb / (Vec3::ONE + rgb)).extend(texel.w)
            } else {
                texel
            };
        }
        self.ops.push(BackendOp::PostProcess {
            source,
            destination,
            tone_mapping,
        });
        Ok(())
    }

    fn render_subframe(&mut self, target: TargetId, params: &SubframeParams) -> Result<()> {
        let dst = self.target_mut(target)?;
        let (sw, sh) = dst.size();
        if (sw, sh) != (params.subframe_size.x, params.subframe_size.y) {
            return Err(SkyError::DimensionMismatch {
                expected: (params.subframe_size.x, params.subframe_size.y),
                actual: (sw, sh),
            });
        }
        let f = params.tile_factor;
        let eye = params.geometry.primary;
        for sy in 0..sh {
            for sx in 0..sw {
                let px = sx * f + params.tile_offset.x;
                let py = sy * f + params.tile_offset.y;
                let dir = pixel_direction(&eye, px, py, params.frame_size.x, params.frame_size.y);
                dst.layers[0][(sy * sw + sx) as usize] = cloud_layer(dir, params);
            }
        }
        self.ops.push(BackendOp::RenderSubframe {
            target,
            tile_index: params.tile_index,
            seed: params.seed,
            stereo: params.geometry.secondary.is_some(),
        });
        Ok(())
    }

    fn reproject(&mut self, params: &ReprojectParams) -> Result<()> {
        self.same_size(params.history, params.destination)?;
        let f = params.tile_factor.max(1);
        let sub = self.target(params.subframe)?;
        let (sw, sh) = sub.size();
        let sub_texels = sub.layers[0].clone();
        let history = self.target(params.history)?.layers[0].clone();

        let dst = self.target_mut(params.destination)?;
        let (w, h) = dst.size();
        if (sw * f, sh * f) != (w, h) {
            return Err(SkyError::DimensionMismatch {
                expected: (w / f, h / f),
                actual: (sw, sh),
            });
        }

        let current = params.current.primary;
        let previous = params.previous.primary;
        for y in 0..h {
            for x in 0..w {
                let fresh = sub_texels[((y / f) * sw + x / f) as usize];
                let tile = (y % f) * f + (x % f);
                let value = if params.first_frame || tile == params.tile_index {
                    fresh
                } else {
                    let dir = pixel_direction(&current, x, y, w, h);
                    match project_direction(&previous, dir) {
                        Some(uv) => {
                            let hx = ((uv.x * w as f32) as u32).min(w - 1);
                            let hy = ((uv.y * h as f32) as u32).min(h - 1);
                            history[(hy * w + hx) as usize]
                        }
                        None => fresh,
                    }
                };
                dst.layers[0][(y * w + x) as usize] = value;
            }
        }
        self.ops.push(BackendOp::Reproject {
            destination: params.destination,
            tile_index: params.tile_index,
            first_frame: params.first_frame,
            stereo: params.current.secondary.is_some(),
        });
        Ok(())
    }

    fn apply_layer(
        &mut self,
        layer: TargetId,
        source: TargetId,
        destination: TargetId,
    ) -> Result<()> {
        self.same_size(source, destination)?;
        let layer_target = self.target(layer)?;
        let (lw, lh) = layer_target.size();
        let layer_texels = layer_target.layers[0].clone();
        let source_texels = self.target(source)?.layers[0].clone();

        let dst = self.target_mut(destination)?;
        let (w, h) = dst.size();
        for y in 0..h {
            for x in 0..w {
                let lx = (x * lw / w).min(lw - 1);
                let ly = (y * lh / h).min(lh - 1);
                let cloud = layer_texels[(ly * lw + lx) as usize];
                let base = source_texels[(y * w + x) as usize];
                let rgb = base.xyz().lerp(cloud.xyz(), cloud.w.clamp(0.0, 1.0));
                dst.layers[0][(y * w + x) as usize] = rgb.extend(base.w);
            }
        }
        self.ops.push(BackendOp::ApplyLayer {
            layer,
            source,
            destination,
        });
        Ok(())
    }
}

// ============================================================================
// Reference shading
// ============================================================================

/// World-space view direction through the center of pixel `(x, y)`.
#[must_use]
pub fn pixel_direction(eye: &EyeMatrices, x: u32, y: u32, width: u32, height: u32) -> Vec3 {
    let ndc = Vec2::new(
        (x as f32 + 0.5) / width as f32 * 2.0 - 1.0,
        1.0 - (y as f32 + 0.5) / height as f32 * 2.0,
    );
    let p = eye.inverse_projection * Vec4::new(ndc.x, ndc.y, 0.5, 1.0);
    let view_point = p.xyz() / p.w;
    eye.inverse_view.transform_vector3(view_point).normalize()
}

/// Projects a world direction into `[0, 1)²` texture space, or `None` when it
/// falls behind the camera or outside the image.
#[must_use]
pub fn project_direction(eye: &EyeMatrices, dir: Vec3) -> Option<Vec2> {
    let view_dir = eye.view.transform_vector3(dir);
    let clip = eye.projection * view_dir.extend(0.0);
    if clip.w <= 1e-6 {
        return None;
    }
    let ndc = clip.xy() / clip.w;
    let uv = Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    if (0.0..1.0).contains(&uv.x) && (0.0..1.0).contains(&uv.y) {
        Some(uv)
    } else {
        None
    }
}

/// Gradient sky with a sun highlight.
#[must_use]
pub fn sky_radiance(dir: Vec3, sky: &SkyTimeState) -> Vec4 {
    let horizon = Vec3::new(0.8, 0.85, 0.9);
    let zenith = Vec3::new(0.2, 0.4, 0.8);
    let t = (dir.y * 0.5 + 0.5).clamp(0.0, 1.0);
    let day = 0.1 + 0.9 * sky.solar_altitude.clamp(0.0, 1.0);
    let base = horizon.lerp(zenith, t) * day;
    let sun = sky.sun_color * dir.dot(sky.sun_direction).max(0.0).powi(64) * 4.0;
    let moon = sky.moon_color * dir.dot(sky.moon_direction).max(0.0).powi(256) * sky.lunar_altitude;
    (base + sun + moon).extend(1.0)
}

/// Straight-alpha cloud color for a view direction.
#[must_use]
pub fn cloud_layer(dir: Vec3, params: &SubframeParams) -> Vec4 {
    if dir.y <= 0.01 {
        return Vec4::ZERO;
    }
    let uv = Vec2::new(dir.x, dir.z) / dir.y * 0.1 + params.wind_offset;
    let pattern = 0.5 + 0.5 * (uv.x * 6.0).sin() * (uv.y * 6.0).cos();
    let alpha = ((pattern - (1.0 - params.coverage)) * params.density * 4.0).clamp(0.0, 1.0);
    let light = params.sun_color * (0.4 + 0.6 * params.solar_altitude)
        + params.moon_color * 0.2 * params.lunar_altitude;
    let wet = 1.0 - 0.3 * params.wetness.clamp(0.0, 1.0);
    (light * wet).extend(alpha)
}
