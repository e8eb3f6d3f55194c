// ============================================================================
// GPU CONTEXT — wgpu Device, Queue, and adapter initialization
// ============================================================================

use std::sync::Arc;

use crate::log_info;

/// Which adapter class to ask for first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GpuPreference {
    #[default]
    HighPerformance,
    LowPower,
}

/// Holds the core wgpu resources shared by every pipeline stage.
/// Created once; if creation fails entirely the host must fall back to the
/// CPU distance-field path.
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter_name: String,
    /// Maximum texture dimension supported by this device.
    pub max_texture_dim: u32,
}

impl GpuContext {
    /// Attempt to create a GPU context.  Tries hardware first, then falls
    /// back to a software rasterizer (`force_fallback_adapter`) so the
    /// pipeline still works on machines without a real GPU.
    ///
    /// `pollster::block_on` because the pipeline is headless compute + an
    /// offscreen render target; there is no event loop to await on.
    pub fn new(preference: GpuPreference) -> Option<Self> {
        // 1. Try hardware adapter.
        if let Some(ctx) = pollster::block_on(Self::new_async(preference, false)) {
            return Some(ctx);
        }
        // 2. Fallback: software rasterizer.
        log_info!("hardware adapter unavailable, trying software fallback");
        pollster::block_on(Self::new_async(preference, true))
    }

    async fn new_async(preference: GpuPreference, force_fallback: bool) -> Option<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let power = match preference {
            GpuPreference::LowPower => wgpu::PowerPreference::LowPower,
            GpuPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        };

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: power,
                compatible_surface: None, // headless — compute + offscreen only
                force_fallback_adapter: force_fallback,
            })
            .await?;

        let adapter_name = adapter.get_info().name.clone();
        let limits = adapter.limits();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("inkline GPU"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits {
                        max_texture_dimension_2d: limits.max_texture_dimension_2d,
                        max_storage_buffer_binding_size: limits.max_storage_buffer_binding_size,
                        max_compute_workgroup_size_x: limits.max_compute_workgroup_size_x,
                        max_compute_workgroup_size_y: limits.max_compute_workgroup_size_y,
                        max_compute_workgroup_size_z: limits.max_compute_workgroup_size_z,
                        max_compute_workgroups_per_dimension: limits
                            .max_compute_workgroups_per_dimension,
                        ..wgpu::Limits::downlevel_defaults()
                    },
                },
                None,
            )
            .await
            .ok()?;

        log_info!("gpu context ready on '{}'", adapter_name);

        Some(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name,
            max_texture_dim: limits.max_texture_dimension_2d,
        })
    }

    /// Check if a texture of the given dimensions can be created.
    pub fn supports_size(&self, width: u32, height: u32) -> bool {
        width <= self.max_texture_dim && height <= self.max_texture_dim
    }

    /// Submit a single encoder's commands.
    pub fn submit_one(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
    }
}
