//! wgpu Backend
//!
//! [`RenderBackend`] on top of a `wgpu::Device`. Target lifecycle, clears,
//! copies and mip generation are implemented here; the shading passes are
//! forwarded to a host-provided [`SkyPasses`] implementation that owns the
//! actual sky, cloud and reprojection shaders.
//!
//! [`SubframeUniforms`] and [`ReprojectUniforms`] pack the pass parameters
//! for upload by those shaders.
//!
//! Commands are recorded into one encoder per frame. Call
//! [`WgpuBackend::submit`] once the refresher and compositor are done for
//! the frame.
//!
//! Releasing a target while that encoder is open only drops its handle. The
//! texture is destroyed after the encoder is submitted, since recorded
//! commands may still reference it.
//!
//! # Target Usage
//!
//! Every target is created with
//! `RENDER_ATTACHMENT | TEXTURE_BINDING | COPY_SRC | COPY_DST` so it can act
//! as staging, mirror, history or cubemap without re-creation.

mod mipmap;
pub mod uniforms;

pub use mipmap::MipmapGenerator;
pub use uniforms::{ReprojectUniforms, SubframeUniforms};

use slotmap::SlotMap;

use crate::errors::{Result, SkyError};
use crate::renderer::backend::{RenderBackend, ReprojectParams, SubframeParams, ViewParams};
use crate::renderer::probe::CubeFace;
use crate::renderer::targets::{TargetDesc, TargetDimension, TargetId, TargetShape};

const TARGET_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT
    .union(wgpu::TextureUsages::TEXTURE_BINDING)
    .union(wgpu::TextureUsages::COPY_SRC)
    .union(wgpu::TextureUsages::COPY_DST);

/// A GPU render target with its default view.
///
/// For cube targets `view` has `Cube` dimension; per-layer views are built
/// on demand with [`GpuTarget::layer_view`].
pub struct GpuTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub desc: TargetDesc,
}

impl GpuTarget {
    /// Single-layer 2D view of mip 0, usable as a render attachment.
    #[must_use]
    pub fn layer_view(&self, layer: u32) -> wgpu::TextureView {
        mipmap::layer_mip_view(&self.texture, layer, 0, wgpu::TextureUsages::RENDER_ATTACHMENT)
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        self.desc.shape.size()
    }
}

/// Borrowed GPU state handed to [`SkyPasses`].
pub struct PassContext<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
    pub encoder: &'a mut wgpu::CommandEncoder,
}

/// Host-provided shading passes.
pub trait SkyPasses {
    fn render_view(&mut self, ctx: &mut PassContext<'_>, target: &GpuTarget, params: &ViewParams);

    fn post_process(
        &mut self,
        ctx: &mut PassContext<'_>,
        source: &GpuTarget,
        destination: &GpuTarget,
        tone_mapping: bool,
    );

    fn render_subframe(
        &mut self,
        ctx: &mut PassContext<'_>,
        target: &GpuTarget,
        params: &SubframeParams,
    );

    fn reproject(
        &mut self,
        ctx: &mut PassContext<'_>,
        subframe: &GpuTarget,
        history: &GpuTarget,
        destination: &GpuTarget,
        params: &ReprojectParams,
    );

    fn apply_layer(
        &mut self,
        ctx: &mut PassContext<'_>,
        layer: &GpuTarget,
        source: &GpuTarget,
        destination: &GpuTarget,
    );
}

/// Items released while commands referencing them may still be unsubmitted.
struct Retired<T> {
    pending: Vec<T>,
}

impl<T> Default for Retired<T> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
        }
    }
}

impl<T> Retired<T> {
    /// Holds `item` back while an encoder is recording. Otherwise hands it
    /// back for immediate destruction.
    fn retire(&mut self, item: T, recording: bool) -> Option<T> {
        if recording {
            self.pending.push(item);
            None
        } else {
            Some(item)
        }
    }

    /// Everything held back, to destroy once the encoder is submitted.
    fn take(&mut self) -> Vec<T> {
        std::mem::take(&mut self.pending)
    }

    fn len(&self) -> usize {
        self.pending.len()
    }
}

/// GPU implementation of [`RenderBackend`].
pub struct WgpuBackend<P: SkyPasses> {
    device: wgpu::Device,
    queue: wgpu::Queue,
    targets: SlotMap<TargetId, GpuTarget>,
    mipmaps: MipmapGenerator,
    encoder: Option<wgpu::CommandEncoder>,
    retired: Retired<wgpu::Texture>,
    passes: P,
}

impl<P: SkyPasses> WgpuBackend<P> {
    #[must_use]
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, passes: P) -> Self {
        let mipmaps = MipmapGenerator::new(&device);
        Self {
            device,
            queue,
            targets: SlotMap::with_key(),
            mipmaps,
            encoder: None,
            retired: Retired::default(),
            passes,
        }
    }

    /// Submits everything recorded since the last submit, then destroys the
    /// textures released while it was recording.
    pub fn submit(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        for texture in self.retired.take() {
            texture.destroy();
        }
    }

    /// Released textures waiting for the next [`submit`](Self::submit).
    #[must_use]
    pub fn pending_release_count(&self) -> usize {
        self.retired.len()
    }

    /// The GPU target behind a handle.
    #[must_use]
    pub fn target(&self, id: TargetId) -> Option<&GpuTarget> {
        self.targets.get(id)
    }

    /// A cube view of the target, for binding a published probe.
    #[must_use]
    pub fn cube_view(&self, id: TargetId) -> Option<&wgpu::TextureView> {
        self.targets
            .get(id)
            .filter(|t| t.desc.shape.dimension == TargetDimension::Cube)
            .map(|t| &t.view)
    }

    #[must_use]
    pub fn passes(&self) -> &P {
        &self.passes
    }

    pub fn passes_mut(&mut self) -> &mut P {
        &mut self.passes
    }

    fn get(&self, id: TargetId) -> Result<&GpuTarget> {
        self.targets.get(id).ok_or(SkyError::UnknownTarget)
    }

    fn check_same_size(&self, source: TargetId, destination: TargetId) -> Result<(u32, u32)> {
        let expected = self.get(destination)?.size();
        let actual = self.get(source)?.size();
        if expected == actual {
            Ok(expected)
        } else {
            Err(SkyError::DimensionMismatch { expected, actual })
        }
    }

    /// Runs `f` with the frame encoder, creating it on first use.
    fn with_encoder<R>(
        &mut self,
        f: impl FnOnce(&mut P, &mut PassContext<'_>, &SlotMap<TargetId, GpuTarget>) -> R,
    ) -> R {
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Sky Refresh Encoder"),
            })
        });
        let mut ctx = PassContext {
            device,
            queue: &self.queue,
            encoder,
        };
        f(&mut self.passes, &mut ctx, &self.targets)
    }

    fn copy_layers(
        &mut self,
        source: TargetId,
        destination: TargetId,
        dst_layer: u32,
        layer_count: u32,
    ) -> Result<()> {
        let (width, height) = self.get(source)?.size();
        self.with_encoder(|_, ctx, targets| {
            let (Some(src), Some(dst)) = (targets.get(source), targets.get(destination)) else {
                return Err(SkyError::UnknownTarget);
            };
            ctx.encoder.copy_texture_to_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &src.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyTextureInfo {
                    texture: &dst.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: dst_layer,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: layer_count,
                },
            );
            Ok(())
        })
    }
}

impl<P: SkyPasses> RenderBackend for WgpuBackend<P> {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create_target(&mut self, desc: &TargetDesc) -> Result<TargetId> {
        let shape = desc.shape;
        let max = self.device.limits().max_texture_dimension_2d;
        if shape.width == 0 || shape.height == 0 || shape.width > max || shape.height > max {
            return Err(SkyError::AllocationFailed {
                label: desc.label,
                width: shape.width,
                height: shape.height,
                reason: format!("size outside device limit 1..={max}"),
            });
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: shape.width,
                height: shape.height,
                depth_or_array_layers: shape.dimension.layer_count(),
            },
            mip_level_count: shape.mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: shape.format,
            usage: TARGET_USAGE,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(desc.label),
            dimension: Some(match shape.dimension {
                TargetDimension::D2 => wgpu::TextureViewDimension::D2,
                TargetDimension::Cube => wgpu::TextureViewDimension::Cube,
            }),
            ..Default::default()
        });

        if shape.mip_level_count > 1 {
            self.mipmaps.ensure_pipeline(&self.device, shape.format);
        }

        Ok(self.targets.insert(GpuTarget {
            texture,
            view,
            desc: *desc,
        }))
    }

    fn release_target(&mut self, id: TargetId) {
        if let Some(target) = self.targets.remove(id) {
            let recording = self.encoder.is_some();
            if let Some(texture) = self.retired.retire(target.texture, recording) {
                texture.destroy();
            }
        }
    }

    fn target_shape(&self, id: TargetId) -> Option<TargetShape> {
        self.targets.get(id).map(|t| t.desc.shape)
    }

    fn live_target_count(&self) -> usize {
        self.targets.len()
    }

    fn clear_target(&mut self, id: TargetId, color: [f32; 4]) -> Result<()> {
        let layers = self.get(id)?.desc.shape.dimension.layer_count();
        let clear = wgpu::Color {
            r: f64::from(color[0]),
            g: f64::from(color[1]),
            b: f64::from(color[2]),
            a: f64::from(color[3]),
        };
        self.with_encoder(|_, ctx, targets| {
            let target = targets.get(id).ok_or(SkyError::UnknownTarget)?;
            for layer in 0..layers {
                let view = target.layer_view(layer);
                let _pass = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Sky Target Clear"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(clear),
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                    multiview_mask: None,
                });
            }
            Ok(())
        })
    }

    fn copy_to_cube_face(
        &mut self,
        source: TargetId,
        cube: TargetId,
        face: CubeFace,
    ) -> Result<()> {
        self.check_same_size(source, cube)?;
        self.copy_layers(source, cube, face.index(), 1)
    }

    fn copy_target(&mut self, source: TargetId, destination: TargetId) -> Result<()> {
        self.check_same_size(source, destination)?;
        let layers = self.get(source)?.desc.shape.dimension.layer_count();
        self.copy_layers(source, destination, 0, layers)
    }

    fn generate_mipmaps(&mut self, id: TargetId) -> Result<()> {
        self.get(id)?;
        let device = &self.device;
        let mipmaps = &self.mipmaps;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Sky Refresh Encoder"),
            })
        });
        let target = self.targets.get(id).ok_or(SkyError::UnknownTarget)?;
        mipmaps.generate(device, encoder, &target.texture);
        Ok(())
    }

    fn blit(&mut self, source: TargetId, destination: TargetId) -> Result<()> {
        self.check_same_size(source, destination)?;
        self.copy_layers(source, destination, 0, 1)
    }

    fn render_view(&mut self, target: TargetId, params: &ViewParams) -> Result<()> {
        self.with_encoder(|passes, ctx, targets| {
            let target = targets.get(target).ok_or(SkyError::UnknownTarget)?;
            passes.render_view(ctx, target, params);
            Ok(())
        })
    }

    fn post_process(
        &mut self,
        source: TargetId,
        destination: TargetId,
        tone_mapping: bool,
    ) -> Result<()> {
        self.check_same_size(source, destination)?;
        self.with_encoder(|passes, ctx, targets| {
            let (Some(src), Some(dst)) = (targets.get(source), targets.get(destination)) else {
                return Err(SkyError::UnknownTarget);
            };
            passes.post_process(ctx, src, dst, tone_mapping);
            Ok(())
        })
    }

    fn render_subframe(&mut self, target: TargetId, params: &SubframeParams) -> Result<()> {
        self.with_encoder(|passes, ctx, targets| {
            let target = targets.get(target).ok_or(SkyError::UnknownTarget)?;
            passes.render_subframe(ctx, target, params);
            Ok(())
        })
    }

    fn reproject(&mut self, params: &ReprojectParams) -> Result<()> {
        self.check_same_size(params.history, params.destination)?;
        self.with_encoder(|passes, ctx, targets| {
            let (Some(subframe), Some(history), Some(destination)) = (
                targets.get(params.subframe),
                targets.get(params.history),
                targets.get(params.destination),
            ) else {
                return Err(SkyError::UnknownTarget);
            };
            passes.reproject(ctx, subframe, history, destination, params);
            Ok(())
        })
    }

    fn apply_layer(
        &mut self,
        layer: TargetId,
        source: TargetId,
        destination: TargetId,
    ) -> Result<()> {
        self.check_same_size(source, destination)?;
        self.with_encoder(|passes, ctx, targets| {
            let (Some(layer), Some(src), Some(dst)) =
                (targets.get(layer), targets.get(source), targets.get(destination))
            else {
                return Err(SkyError::UnknownTarget);
            };
            passes.apply_layer(ctx, layer, src, dst);
            Ok(())
        })
    }
}
