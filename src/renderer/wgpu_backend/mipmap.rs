// ============================================================================
// Mipmap Generator
// ============================================================================
//
// Blit-chain downsampler for probe cubemaps: level `n` of every array layer is
// rendered from level `n - 1` through a linear sampler. One pipeline per color
// format, built with a shader-derived layout. Targets warm their format on
// creation so a refresh only records passes.

use rustc_hash::FxHashMap;

/// Cached per-format blit pipeline with its derived bind group layout.
struct BlitPipeline {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
}

pub struct MipmapGenerator {
    shader: wgpu::ShaderModule,
    sampler: wgpu::Sampler,
    cache: FxHashMap<wgpu::TextureFormat, BlitPipeline>,
}

impl MipmapGenerator {
    #[must_use]
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::include_wgsl!("shaders/blit.wgsl"));
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Probe Mip Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        Self {
            shader,
            sampler,
            cache: FxHashMap::default(),
        }
    }

    fn build(&self, device: &wgpu::Device, format: wgpu::TextureFormat) -> BlitPipeline {
        let label = format!("Probe Mip Blit {format:?}");
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&label),
            layout: None,
            vertex: wgpu::VertexState {
                module: &self.shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.shader,
                entry_point: Some("fs_main"),
                targets: &[Some(format.into())],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });
        let layout = pipeline.get_bind_group_layout(0);
        BlitPipeline { pipeline, layout }
    }

    /// Builds the pipeline for `format` if it is not cached yet.
    pub fn ensure_pipeline(&mut self, device: &wgpu::Device, format: wgpu::TextureFormat) {
        if !self.cache.contains_key(&format) {
            log::debug!("Building probe mip pipeline for {format:?}");
            let blit = self.build(device, format);
            self.cache.insert(format, blit);
        }
    }

    /// Records mip generation for every layer of `texture`.
    ///
    /// A format that was never warmed still works but builds a throwaway
    /// pipeline and logs a warning.
    pub fn generate(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        texture: &wgpu::Texture,
    ) {
        let levels = texture.mip_level_count();
        if levels < 2 {
            return;
        }

        let format = texture.format();
        let uncached;
        let blit = match self.cache.get(&format) {
            Some(blit) => blit,
            None => {
                log::warn!("Probe mip pipeline for {format:?} was not warmed, building it now");
                uncached = self.build(device, format);
                &uncached
            }
        };

        for layer in 0..texture.depth_or_array_layers() {
            for level in 1..levels {
                self.blit_level(device, encoder, blit, texture, layer, level);
            }
        }
    }

    fn blit_level(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        blit: &BlitPipeline,
        texture: &wgpu::Texture,
        layer: u32,
        level: u32,
    ) {
        let source =
            layer_mip_view(texture, layer, level - 1, wgpu::TextureUsages::TEXTURE_BINDING);
        let destination =
            layer_mip_view(texture, layer, level, wgpu::TextureUsages::RENDER_ATTACHMENT);

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &blit.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Probe Mip Blit"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &destination,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            ..Default::default()
        });
        pass.set_pipeline(&blit.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

/// Single-layer, single-mip 2D view.
pub(crate) fn layer_mip_view(
    texture: &wgpu::Texture,
    layer: u32,
    mip: u32,
    usage: wgpu::TextureUsages,
) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some("Probe Layer View"),
        dimension: Some(wgpu::TextureViewDimension::D2),
        base_mip_level: mip,
        mip_level_count: Some(1),
        base_array_layer: layer,
        array_layer_count: Some(1),
        usage: Some(usage),
        ..Default::default()
    })
}
