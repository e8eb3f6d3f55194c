// ============================================================================
// STROKE COMPOSITOR — distance field → anti-aliased drawable / mask carve
// ============================================================================
//
// Two render paths over the same signed distance field:
//
//   1. **Composite** — full-quad pass producing a premultiplied RGBA
//      drawable texture for the stroke (pen color, or alpha-only coverage
//      for an eraser on a drawable-backed layer).
//
//   2. **Mask subtract** — rasterizes the stroke's triangle mesh over a
//      layer's persistent R8 coverage mask with reverse-subtract blending,
//      carving the stroke out in place.

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use super::context::GpuContext;
use super::distance_field::DistanceField;
use crate::error::PipelineError;
use crate::geometry::Mesh;
use crate::layer::LayerMask;
use crate::settings::{BrushMode, BrushSettings, FieldTuning};

// ============================================================================
// UNIFORM TYPES
// ============================================================================

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CompositeParams {
    color: [f32; 4],
    grid_size: [f32; 2],
    threshold: f32,
    softness: f32,
    opacity: f32,
    mode: u32,
    _pad: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct MaskParams {
    mask_size: [f32; 2],
    field_origin: [f32; 2],
    texel_size: f32,
    threshold: f32,
    softness: f32,
    strength: f32,
}

// ============================================================================
// DRAWABLE
// ============================================================================

/// The composited output of one stroke: a canvas-resolution texture plus its
/// placement.  Pen drawables hold premultiplied color; eraser drawables hold
/// coverage in alpha only and are applied subtractively by the host.
pub struct StrokeDrawable {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    /// Canvas position of the drawable's top-left corner.
    pub offset: [f32; 2],
    pub mode: BrushMode,
}

impl StrokeDrawable {
    /// Approximate GPU footprint, used for history memory accounting.
    pub fn memory_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

// ============================================================================
// COMPOSITOR
// ============================================================================

const MESH_VERTEX_ATTRS: [wgpu::VertexAttribute; 1] =
    wgpu::vertex_attr_array![0 => Float32x2];

pub struct StrokeCompositor {
    composite_pipeline: wgpu::RenderPipeline,
    composite_bgl: wgpu::BindGroupLayout,
    mask_pipeline: wgpu::RenderPipeline,
    mask_bgl: wgpu::BindGroupLayout,
}

fn field_bgl(device: &wgpu::Device, label: &str) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    // R32Float is non-filterable; the shaders use textureLoad.
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
        ],
    })
}

impl StrokeCompositor {
    pub fn new(device: &wgpu::Device) -> Self {
        // ================================================================
        // COMPOSITE PIPELINE (full-quad, writes the drawable directly)
        // ================================================================
        let composite_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("stroke_composite_shader"),
            source: wgpu::ShaderSource::Wgsl(super::shaders::STROKE_COMPOSITE_SHADER.into()),
        });
        let composite_bgl = field_bgl(device, "stroke_composite_bgl");
        let composite_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("stroke_composite_pl"),
            bind_group_layouts: &[&composite_bgl],
            push_constant_ranges: &[],
        });
        let composite_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("stroke_composite_pipeline"),
            layout: Some(&composite_layout),
            vertex: wgpu::VertexState {
                module: &composite_shader,
                entry_point: "vs_stroke",
                buffers: &[],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &composite_shader,
                entry_point: "fs_stroke",
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    blend: None, // fresh drawable each stroke, no blending
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
        });

        // ================================================================
        // MASK SUBTRACT PIPELINE (mesh-rasterized, reverse-subtract blend)
        // ================================================================
        let mask_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("mask_subtract_shader"),
            source: wgpu::ShaderSource::Wgsl(super::shaders::MASK_SUBTRACT_SHADER.into()),
        });
        let mask_bgl = field_bgl(device, "mask_subtract_bgl");
        let mask_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("mask_subtract_pl"),
            bind_group_layouts: &[&mask_bgl],
            push_constant_ranges: &[],
        });
        let mask_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("mask_subtract_pipeline"),
            layout: Some(&mask_layout),
            vertex: wgpu::VertexState {
                module: &mask_shader,
                entry_point: "vs_mask",
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: 8,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &MESH_VERTEX_ATTRS,
                }],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                // The outline winding is normalized CCW but canvas Y points
                // down, so leave culling off.
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &mask_shader,
                entry_point: "fs_mask",
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::R8Unorm,
                    blend: Some(wgpu::BlendState {
                        // mask' = mask - coverage (clamped at 0)
                        color: wgpu::BlendComponent {
                            src_factor: wgpu::BlendFactor::One,
                            dst_factor: wgpu::BlendFactor::One,
                            operation: wgpu::BlendOperation::ReverseSubtract,
                        },
                        alpha: wgpu::BlendComponent {
                            src_factor: wgpu::BlendFactor::Zero,
                            dst_factor: wgpu::BlendFactor::One,
                            operation: wgpu::BlendOperation::Add,
                        },
                    }),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
        });

        Self {
            composite_pipeline,
            composite_bgl,
            mask_pipeline,
            mask_bgl,
        }
    }

    /// Composite the distance field into a drawable texture.
    pub fn composite(
        &self,
        ctx: &GpuContext,
        field: &DistanceField,
        brush: &BrushSettings,
        tuning: &FieldTuning,
    ) -> Result<StrokeDrawable, PipelineError> {
        let device = &ctx.device;
        let brush = brush.sanitized();
        let (width, height) = field.canvas_size();
        if !ctx.supports_size(width, height) {
            return Err(PipelineError::ResourceExhausted {
                width,
                height,
                max_dim: ctx.max_texture_dim,
            });
        }

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("stroke_drawable"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let params = CompositeParams {
            color: brush.color,
            grid_size: [field.grid_w as f32, field.grid_h as f32],
            threshold: tuning.threshold,
            softness: tuning.effective_softness(brush.hardness),
            opacity: brush.opacity,
            mode: match brush.mode {
                BrushMode::Pen => 0,
                BrushMode::Eraser => 1,
            },
            _pad: [0; 2],
        };
        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("stroke_composite_params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("stroke_composite_bg"),
            layout: &self.composite_bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&field.view),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("stroke_composite_encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("stroke_composite_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.composite_pipeline);
            pass.set_bind_group(0, &bg, &[]);
            pass.draw(0..6, 0..1);
        }
        ctx.submit_one(encoder);

        Ok(StrokeDrawable {
            texture,
            view,
            width,
            height,
            offset: field.origin,
            mode: brush.mode,
        })
    }

    /// Carve an eraser stroke out of a layer's persistent coverage mask.
    /// The stroke's triangle mesh bounds the affected fragments; coverage is
    /// taken from the distance field for anti-aliased edges.
    pub fn subtract_mask(
        &self,
        ctx: &GpuContext,
        field: &DistanceField,
        mesh: &Mesh,
        mask: &LayerMask,
        brush: &BrushSettings,
        tuning: &FieldTuning,
    ) -> Result<(), PipelineError> {
        if mesh.indices.is_empty() {
            return Ok(());
        }
        let device = &ctx.device;
        let brush = brush.sanitized();

        let vertex_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mask_mesh_vertices"),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mask_mesh_indices"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let params = MaskParams {
            mask_size: [mask.width as f32, mask.height as f32],
            field_origin: field.origin,
            texel_size: field.texel_size,
            threshold: tuning.threshold,
            softness: tuning.effective_softness(brush.hardness),
            strength: brush.opacity,
        };
        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mask_subtract_params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("mask_subtract_bg"),
            layout: &self.mask_bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&field.view),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("mask_subtract_encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("mask_subtract_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &mask.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.mask_pipeline);
            pass.set_bind_group(0, &bg, &[]);
            pass.set_vertex_buffer(0, vertex_buf.slice(..));
            pass.set_index_buffer(index_buf.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..mesh.indices.len() as u32, 0, 0..1);
        }
        ctx.submit_one(encoder);
        Ok(())
    }

    /// Read a drawable back as packed RGBA bytes.
    pub fn readback_drawable(
        ctx: &GpuContext,
        drawable: &StrokeDrawable,
    ) -> Result<Vec<u8>, PipelineError> {
        Self::readback(
            ctx,
            &drawable.texture,
            0,
            0,
            drawable.width,
            drawable.height,
            4,
        )
    }

    /// Read a region of a layer mask back as packed R8 bytes.
    pub fn readback_mask_region(
        ctx: &GpuContext,
        mask: &LayerMask,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, PipelineError> {
        Self::readback(ctx, &mask.texture, x, y, width, height, 1)
    }

    fn readback(
        ctx: &GpuContext,
        texture: &wgpu::Texture,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        bytes_per_px: u32,
    ) -> Result<Vec<u8>, PipelineError> {
        let device = &ctx.device;
        let bytes_per_row = super::aligned_bytes_per_row(width * bytes_per_px);
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("compositor_readback"),
            size: (bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("compositor_readback_encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        ctx.submit_one(encoder);

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                eprintln!("[GPU] StrokeCompositor readback map error: {:?}", e);
                return Err(PipelineError::from(e));
            }
            Err(e) => {
                eprintln!("[GPU] StrokeCompositor readback channel error: {:?}", e);
                return Err(PipelineError::Gpu(format!("readback channel closed: {e}")));
            }
        }

        let mapped = slice.get_mapped_range();
        let actual_row = (width * bytes_per_px) as usize;
        let mut out = Vec::with_capacity(actual_row * height as usize);
        for row in 0..height as usize {
            let start = row * bytes_per_row as usize;
            out.extend_from_slice(&mapped[start..start + actual_row]);
        }
        drop(mapped);
        staging.unmap();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{StrokeGeometryBuilder, StrokePoint};
    use crate::gpu::context::{GpuContext, GpuPreference};
    use crate::gpu::distance_field::{cpu_distance_field, CpuField, DistanceFieldPipeline};
    use crate::settings::SmoothingParams;

    fn stroke_through(points: &[(f32, f32)]) -> crate::geometry::StrokeGeometry {
        let mut it = points.iter();
        let &(x, y) = it.next().expect("points");
        let mut b = StrokeGeometryBuilder::start(StrokePoint {
            x,
            y,
            pressure: 0.8,
        });
        for &(x, y) in it {
            b.add_point(StrokePoint {
                x,
                y,
                pressure: 0.8,
            });
        }
        b.finalize(
            6.0,
            &SmoothingParams {
                thinning: 0.0,
                smoothing: 0.0,
                streamline: 0.0,
            },
        )
        .expect("valid stroke")
    }

    /// Coverage at a canvas point, evaluated on the CPU with the same
    /// smoothstep the fragment shaders use.
    fn coverage(field: &CpuField, threshold: f32, softness: f32, px: f32, py: f32) -> f32 {
        let gx = (((px - field.origin[0]) / field.texel_size - 0.5).round() as i64)
            .clamp(0, field.grid_w as i64 - 1) as usize;
        let gy = (((py - field.origin[1]) / field.texel_size - 0.5).round() as i64)
            .clamp(0, field.grid_h as i64 - 1) as usize;
        let d = field.data[gy * field.grid_w as usize + gx];
        let t = ((d - (threshold - softness)) / (2.0 * softness)).clamp(0.0, 1.0);
        1.0 - t * t * (3.0 - 2.0 * t)
    }

    #[test]
    fn eraser_coverage_removes_pen_where_strokes_overlap() {
        let tuning = FieldTuning::default();
        let softness = tuning.effective_softness(0.8);
        let pen = cpu_distance_field(&stroke_through(&[(10.0, 20.0), (50.0, 20.0)]), &tuning)
            .expect("pen field");
        let eraser = cpu_distance_field(&stroke_through(&[(30.0, 5.0), (30.0, 35.0)]), &tuning)
            .expect("eraser field");

        let pen_at = |x, y| coverage(&pen, tuning.threshold, softness, x, y);
        let eraser_at = |x, y| coverage(&eraser, tuning.threshold, softness, x, y);

        // DstOut host compositing: remaining alpha = pen · (1 − eraser).
        let overlap = pen_at(30.0, 20.0) * (1.0 - eraser_at(30.0, 20.0));
        assert!(overlap < 0.05, "overlap alpha {overlap}");
        let untouched = pen_at(15.0, 20.0) * (1.0 - eraser_at(15.0, 20.0));
        assert!(untouched > 0.9, "untouched alpha {untouched}");
    }

    #[test]
    fn pen_drawable_is_opaque_inside_and_clear_outside() {
        let Some(ctx) = GpuContext::new(GpuPreference::HighPerformance) else {
            return;
        };
        let fields = DistanceFieldPipeline::new(&ctx.device);
        let compositor = StrokeCompositor::new(&ctx.device);
        let geo = stroke_through(&[(0.0, 0.0), (20.0, 0.0), (40.0, 0.0)]);
        let brush = BrushSettings {
            color: [1.0, 0.0, 0.0, 1.0],
            hardness: 1.0,
            ..Default::default()
        };
        let tuning = FieldTuning::default();

        let field = fields
            .run(&ctx, &geo, &tuning)
            .expect("field")
            .expect("non-degenerate");
        let drawable = compositor
            .composite(&ctx, &field, &brush, &tuning)
            .expect("composite");
        let pixels = StrokeCompositor::readback_drawable(&ctx, &drawable).expect("readback");

        let px = |cx: f32, cy: f32| {
            let x = ((cx - drawable.offset[0]) as u32).min(drawable.width - 1);
            let y = ((cy - drawable.offset[1]) as u32).min(drawable.height - 1);
            let i = ((y * drawable.width + x) * 4) as usize;
            [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]]
        };

        // Spine center: fully covered, premultiplied red.
        let center = px(20.0, 0.0);
        assert!(center[3] > 250, "center alpha {}", center[3]);
        assert!(center[0] > 250 && center[1] < 5 && center[2] < 5);
        // Padded corner: untouched.
        let corner = px(geo.bounds.min_x + 0.5, geo.bounds.min_y + 0.5);
        assert_eq!(corner[3], 0);
    }

    #[test]
    fn mask_subtract_carves_only_the_stroke() {
        let Some(ctx) = GpuContext::new(GpuPreference::HighPerformance) else {
            return;
        };
        let fields = DistanceFieldPipeline::new(&ctx.device);
        let compositor = StrokeCompositor::new(&ctx.device);
        let mask = LayerMask::new(&ctx.device, &ctx.queue, 64, 64);
        let geo = stroke_through(&[(16.0, 32.0), (32.0, 32.0), (48.0, 32.0)]);
        let brush = BrushSettings {
            mode: BrushMode::Eraser,
            hardness: 1.0,
            ..Default::default()
        };
        let tuning = FieldTuning::default();

        let field = fields
            .run(&ctx, &geo, &tuning)
            .expect("field")
            .expect("non-degenerate");
        compositor
            .subtract_mask(&ctx, &field, &geo.mesh, &mask, &brush, &tuning)
            .expect("subtract");

        let pixels =
            StrokeCompositor::readback_mask_region(&ctx, &mask, 0, 0, 64, 64).expect("readback");
        let at = |x: usize, y: usize| pixels[y * 64 + x];
        assert!(at(32, 32) < 10, "center not carved: {}", at(32, 32));
        assert_eq!(at(2, 2), 255, "far corner modified");
        assert_eq!(at(61, 61), 255, "far corner modified");
    }
}
