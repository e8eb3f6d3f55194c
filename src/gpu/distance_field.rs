// ============================================================================
// DISTANCE FIELD — jump-flood signed distance transform of the stroke outline
// ============================================================================
//
// Three compute passes over an oversampled grid covering the stroke's padded
// bounds:
//
//   1. **Seed** — every boundary edge walks the grid texels it touches and
//      claims them with its index.
//   2. **Jump flood** — ceil(log2(max_dim)) propagation passes with halving
//      step widths, ping-ponging two seed buffers.  Each texel adopts the
//      nearest of its own seed and its 8 neighbors at the current step.
//   3. **Encode** — exact signed distance to the winning edge, negative
//      inside, stored into an R32Float texture.

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;
use wgpu::util::DeviceExt;

use super::context::GpuContext;
use crate::error::PipelineError;
use crate::geometry::StrokeGeometry;
use crate::settings::FieldTuning;

/// Distance written for texels no edge ever reached.  With the pass schedule
/// below that cannot happen on a well-formed outline; the sentinel keeps the
/// composite stage harmless if it ever does.
const FAR_OUTSIDE: f32 = 1e6;

// ============================================================================
// TYPES
// ============================================================================

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FieldParams {
    grid_w: u32,
    grid_h: u32,
    edge_count: u32,
    step: u32,
    origin: [f32; 2],
    texel_size: f32,
    _pad: f32,
}

/// The finished signed distance field for one stroke.
pub struct DistanceField {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub grid_w: u32,
    pub grid_h: u32,
    /// Canvas position of the grid's top-left corner.
    pub origin: [f32; 2],
    /// Canvas units per texel (1 / oversample).
    pub texel_size: f32,
    pub oversample: u32,
}

impl DistanceField {
    /// Drawable extent in canvas pixels.
    pub fn canvas_size(&self) -> (u32, u32) {
        (
            (self.grid_w / self.oversample).max(1),
            (self.grid_h / self.oversample).max(1),
        )
    }
}

/// Number of propagation passes for a grid: ceil(log2(max dimension)).
pub fn pass_count(grid_w: u32, grid_h: u32) -> u32 {
    let m = grid_w.max(grid_h);
    if m <= 1 { 0 } else { 32 - (m - 1).leading_zeros() }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct DistanceFieldPipeline {
    seed_pipeline: wgpu::ComputePipeline,
    seed_bgl: wgpu::BindGroupLayout,
    flood_pipeline: wgpu::ComputePipeline,
    flood_bgl: wgpu::BindGroupLayout,
    encode_pipeline: wgpu::ComputePipeline,
    encode_bgl: wgpu::BindGroupLayout,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl DistanceFieldPipeline {
    pub fn new(device: &wgpu::Device) -> Self {
        let seed_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("seed_init_shader"),
            source: wgpu::ShaderSource::Wgsl(super::shaders::SEED_INIT_SHADER.into()),
        });
        let flood_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("jump_flood_shader"),
            source: wgpu::ShaderSource::Wgsl(super::shaders::JUMP_FLOOD_SHADER.into()),
        });
        let encode_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("field_encode_shader"),
            source: wgpu::ShaderSource::Wgsl(super::shaders::FIELD_ENCODE_SHADER.into()),
        });

        let seed_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("seed_bgl"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, false),
            ],
        });
        let flood_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("flood_bgl"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
            ],
        });
        let encode_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("encode_bgl"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::R32Float,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        });

        let seed_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("seed_pl"),
            bind_group_layouts: &[&seed_bgl],
            push_constant_ranges: &[],
        });
        let flood_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("flood_pl"),
            bind_group_layouts: &[&flood_bgl],
            push_constant_ranges: &[],
        });
        let encode_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("encode_pl"),
            bind_group_layouts: &[&encode_bgl],
            push_constant_ranges: &[],
        });

        let seed_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("seed_pipeline"),
            layout: Some(&seed_layout),
            module: &seed_shader,
            entry_point: "cs_seed_init",
            compilation_options: Default::default(),
        });
        let flood_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("flood_pipeline"),
            layout: Some(&flood_layout),
            module: &flood_shader,
            entry_point: "cs_jump_flood",
            compilation_options: Default::default(),
        });
        let encode_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("encode_pipeline"),
            layout: Some(&encode_layout),
            module: &encode_shader,
            entry_point: "cs_encode",
            compilation_options: Default::default(),
        });

        Self {
            seed_pipeline,
            seed_bgl,
            flood_pipeline,
            flood_bgl,
            encode_pipeline,
            encode_bgl,
        }
    }

    /// Build the signed distance field for a finalized stroke.
    ///
    /// Returns `Ok(None)` when there is nothing to compute (no edges or
    /// empty bounds); `ResourceExhausted` when the grid would exceed the
    /// device's texture limit.
    pub fn run(
        &self,
        ctx: &GpuContext,
        geometry: &StrokeGeometry,
        tuning: &FieldTuning,
    ) -> Result<Option<DistanceField>, PipelineError> {
        if geometry.edges.is_empty() {
            return Ok(None);
        }
        let tuning = tuning.sanitized();
        let Some((grid_w, grid_h)) = geometry.bounds.grid_size(tuning.oversample) else {
            return Ok(None);
        };
        if !ctx.supports_size(grid_w, grid_h) {
            return Err(PipelineError::ResourceExhausted {
                width: grid_w,
                height: grid_h,
                max_dim: ctx.max_texture_dim,
            });
        }

        let device = &ctx.device;
        let origin = [geometry.bounds.min_x, geometry.bounds.min_y];
        let texel_size = 1.0 / tuning.oversample as f32;
        let texel_count = grid_w as usize * grid_h as usize;

        let edges_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("field_edges"),
            contents: bytemuck::cast_slice(&geometry.edges),
            usage: wgpu::BufferUsages::STORAGE,
        });

        // Seed ping-pong buffers; 0xFF bytes form the empty-seed sentinel.
        let seeds_a = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("field_seeds_a"),
            contents: &vec![0xFFu8; texel_count * 4],
            usage: wgpu::BufferUsages::STORAGE,
        });
        let seeds_b = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("field_seeds_b"),
            size: (texel_count * 4) as u64,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        let seed_buffers = [&seeds_a, &seeds_b];

        let field_tex = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("distance_field"),
            size: wgpu::Extent3d {
                width: grid_w,
                height: grid_h,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let field_view = field_tex.create_view(&wgpu::TextureViewDescriptor::default());

        let make_params = |step: u32| FieldParams {
            grid_w,
            grid_h,
            edge_count: geometry.edges.len() as u32,
            step,
            origin,
            texel_size,
            _pad: 0.0,
        };
        let params_buf = |step: u32, label: &str| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::bytes_of(&make_params(step)),
                usage: wgpu::BufferUsages::UNIFORM,
            })
        };

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("distance_field_encoder"),
        });

        // ---- Pass 1: seed the grid from the boundary edges ----
        {
            let seed_params = params_buf(0, "seed_params");
            let bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("seed_bg"),
                layout: &self.seed_bgl,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: seed_params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: edges_buf.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: seeds_a.as_entire_binding(),
                    },
                ],
            });
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("seed_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.seed_pipeline);
            pass.set_bind_group(0, &bg, &[]);
            pass.dispatch_workgroups((geometry.edges.len() as u32).div_ceil(64), 1, 1);
        }

        // ---- Pass 2: jump-flood propagation, halving step widths ----
        // Exactly ceil(log2(max_dim)) passes; each reads the previous pass's
        // output, so they are encoded strictly in order.
        let passes = pass_count(grid_w, grid_h);
        for k in 0..passes {
            let step = 1u32 << (passes - 1 - k);
            let src = seed_buffers[(k % 2) as usize];
            let dst = seed_buffers[((k + 1) % 2) as usize];
            let flood_params = params_buf(step, "flood_params");
            let bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("flood_bg"),
                layout: &self.flood_bgl,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: flood_params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: edges_buf.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: src.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: dst.as_entire_binding(),
                    },
                ],
            });
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("flood_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.flood_pipeline);
            pass.set_bind_group(0, &bg, &[]);
            pass.dispatch_workgroups(grid_w.div_ceil(16), grid_h.div_ceil(16), 1);
        }

        // ---- Pass 3: encode signed distances into the field texture ----
        {
            let final_seeds = seed_buffers[(passes % 2) as usize];
            let encode_params = params_buf(0, "encode_params");
            let bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("encode_bg"),
                layout: &self.encode_bgl,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: encode_params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: edges_buf.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: final_seeds.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::TextureView(&field_view),
                    },
                ],
            });
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("encode_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.encode_pipeline);
            pass.set_bind_group(0, &bg, &[]);
            pass.dispatch_workgroups(grid_w.div_ceil(16), grid_h.div_ceil(16), 1);
        }

        ctx.submit_one(encoder);

        Ok(Some(DistanceField {
            texture: field_tex,
            view: field_view,
            grid_w,
            grid_h,
            origin,
            texel_size,
            oversample: tuning.oversample,
        }))
    }

    /// Read the whole field back as row-major f32 texels.
    pub fn readback(&self, ctx: &GpuContext, field: &DistanceField) -> Result<Vec<f32>, PipelineError> {
        let device = &ctx.device;
        let bytes_per_row = super::aligned_bytes_per_row(field.grid_w * 4);
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("field_readback"),
            size: (bytes_per_row * field.grid_h) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("field_readback_encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &field.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(field.grid_h),
                },
            },
            wgpu::Extent3d {
                width: field.grid_w,
                height: field.grid_h,
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
                eprintln!("[GPU] DistanceFieldPipeline readback map error: {:?}", e);
                return Err(PipelineError::from(e));
            }
            Err(e) => {
                eprintln!("[GPU] DistanceFieldPipeline readback channel error: {:?}", e);
                return Err(PipelineError::Gpu(format!("readback channel closed: {e}")));
            }
        }

        let mapped = slice.get_mapped_range();
        let row_floats = field.grid_w as usize;
        let mut out = Vec::with_capacity(row_floats * field.grid_h as usize);
        for y in 0..field.grid_h as usize {
            let start = y * bytes_per_row as usize;
            let row: &[f32] = bytemuck::cast_slice(&mapped[start..start + row_floats * 4]);
            out.extend_from_slice(row);
        }
        drop(mapped);
        staging.unmap();
        Ok(out)
    }
}

// ============================================================================
// CPU REFERENCE
// ============================================================================

/// Exact brute-force signed distance field, parallelized over rows.  Serves
/// as the no-GPU fallback and as the oracle the GPU path is tested against.
pub struct CpuField {
    pub data: Vec<f32>,
    pub grid_w: u32,
    pub grid_h: u32,
    pub origin: [f32; 2],
    pub texel_size: f32,
}

pub fn cpu_distance_field(geometry: &StrokeGeometry, tuning: &FieldTuning) -> Option<CpuField> {
    if geometry.edges.is_empty() {
        return None;
    }
    let tuning = tuning.sanitized();
    let (grid_w, grid_h) = geometry.bounds.grid_size(tuning.oversample)?;
    let origin = [geometry.bounds.min_x, geometry.bounds.min_y];
    let texel_size = 1.0 / tuning.oversample as f32;
    let edges = &geometry.edges;

    let data: Vec<f32> = (0..grid_h)
        .into_par_iter()
        .flat_map_iter(|y| {
            (0..grid_w).map(move |x| {
                let px = origin[0] + (x as f32 + 0.5) * texel_size;
                let py = origin[1] + (y as f32 + 0.5) * texel_size;
                let mut best = FAR_OUTSIDE;
                let mut best_sign = 1.0f32;
                for e in edges {
                    let abx = e.b[0] - e.a[0];
                    let aby = e.b[1] - e.a[1];
                    let len2 = (abx * abx + aby * aby).max(1e-12);
                    let t = (((px - e.a[0]) * abx + (py - e.a[1]) * aby) / len2).clamp(0.0, 1.0);
                    let dx = px - (e.a[0] + abx * t);
                    let dy = py - (e.a[1] + aby * t);
                    let d = dx.hypot(dy);
                    if d < best {
                        best = d;
                        let side = (px - e.a[0]) * e.normal[0] + (py - e.a[1]) * e.normal[1];
                        best_sign = if side < 0.0 { -1.0 } else { 1.0 };
                    }
                }
                best * best_sign
            })
        })
        .collect();

    Some(CpuField {
        data,
        grid_w,
        grid_h,
        origin,
        texel_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{StrokeGeometryBuilder, StrokePoint};
    use crate::gpu::context::{GpuContext, GpuPreference};
    use crate::settings::SmoothingParams;

    fn line_geometry() -> StrokeGeometry {
        let mut b = StrokeGeometryBuilder::start(StrokePoint {
            x: 0.0,
            y: 0.0,
            pressure: 0.7,
        });
        for i in 1..=20 {
            b.add_point(StrokePoint {
                x: i as f32 * 2.0,
                y: 0.0,
                pressure: 0.7,
            });
        }
        b.finalize(
            8.0,
            &SmoothingParams {
                thinning: 0.0,
                smoothing: 0.0,
                streamline: 0.0,
            },
        )
        .expect("line stroke")
    }

    #[test]
    fn pass_count_is_ceil_log2_of_max_dim() {
        assert_eq!(pass_count(1, 1), 0);
        assert_eq!(pass_count(2, 2), 1);
        assert_eq!(pass_count(3, 2), 2);
        assert_eq!(pass_count(64, 64), 6);
        assert_eq!(pass_count(65, 64), 7);
        assert_eq!(pass_count(100, 50), 7);
    }

    #[test]
    fn cpu_field_signs_match_geometry() {
        let geo = line_geometry();
        let field = cpu_distance_field(&geo, &FieldTuning::default()).expect("field");

        let sample = |cx: f32, cy: f32| {
            let x = ((cx - field.origin[0]) / field.texel_size) as u32;
            let y = ((cy - field.origin[1]) / field.texel_size) as u32;
            field.data[(y.min(field.grid_h - 1) * field.grid_w + x.min(field.grid_w - 1)) as usize]
        };

        // Spine center is well inside (half-width 4), padded corner well outside.
        assert!(sample(20.0, 0.0) < -3.0);
        assert!(sample(geo.bounds.min_x + 0.5, geo.bounds.min_y + 0.5) > 2.0);
        // On the boundary the magnitude is small.
        assert!(sample(20.0, 4.0).abs() < 1.0);
    }

    #[test]
    fn gpu_field_matches_cpu_oracle() {
        let Some(ctx) = GpuContext::new(GpuPreference::HighPerformance) else {
            return; // no adapter available in this environment
        };
        let pipeline = DistanceFieldPipeline::new(&ctx.device);
        let geo = line_geometry();
        let tuning = FieldTuning::default();

        let field = pipeline
            .run(&ctx, &geo, &tuning)
            .expect("run")
            .expect("non-degenerate");
        let gpu = pipeline.readback(&ctx, &field).expect("readback");
        let cpu = cpu_distance_field(&geo, &tuning).expect("oracle");

        assert_eq!(gpu.len(), cpu.data.len());
        // Jump flood can misattribute texels near equidistant boundaries;
        // allow a small tolerance in canvas units.
        let tol = 2.0 * field.texel_size;
        let mut worst = 0.0f32;
        for (g, c) in gpu.iter().zip(cpu.data.iter()) {
            worst = worst.max((g - c).abs());
        }
        assert!(worst <= tol, "worst deviation {} > {}", worst, tol);
    }

    #[test]
    fn degenerate_geometry_produces_no_field() {
        let Some(ctx) = GpuContext::new(GpuPreference::HighPerformance) else {
            return;
        };
        let pipeline = DistanceFieldPipeline::new(&ctx.device);
        let geo = StrokeGeometry {
            outline: vec![],
            mesh: Default::default(),
            edges: vec![],
            bounds: crate::geometry::Bounds::empty(),
        };
        let result = pipeline.run(&ctx, &geo, &FieldTuning::default()).expect("run");
        assert!(result.is_none());
    }
}
