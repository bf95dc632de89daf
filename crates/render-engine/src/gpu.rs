//! GPU compositing for clip transitions.
//!
//! A [`GpuContext`] owns the device, queue, and the compiled transition
//! pipeline (`shaders/transitions.wgsl`). Each clip boundary gets a
//! [`GpuSurface`]: two input textures, a render target, a uniform buffer,
//! and a readback buffer sized for the export resolution. Rendering a frame
//! uploads both source frames, draws one fullscreen triangle, and copies the
//! composite back into host memory.

use std::borrow::Cow;
use std::sync::Arc;

use highlighter_common::error::{HighlighterError, HighlighterResult};

use crate::transitioner::Uniforms;

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
/// Size of the `Params` uniform block in the shader.
const UNIFORM_WORDS: usize = 16;

/// Shared device plus the compiled transition pipeline.
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::RenderPipeline,
    adapter_name: String,
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("adapter", &self.adapter_name)
            .finish()
    }
}

impl GpuContext {
    /// Open a device for offscreen compositing. `None` when the host has no
    /// usable adapter; callers fall back to CPU blending.
    pub async fn acquire() -> Option<Arc<Self>> {
        match Self::init().await {
            Ok(context) => {
                tracing::info!(adapter = %context.adapter_name, "GPU transitions enabled");
                Some(Arc::new(context))
            }
            Err(err) => {
                tracing::warn!(error = %err, "No GPU available, blending transitions on the CPU");
                None
            }
        }
    }

    async fn init() -> HighlighterResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| gpu_error(format!("Failed to find GPU adapter: {e}")))?;
        let adapter_name = adapter.get_info().name;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Highlighter Transitions"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults()
                    .using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::default(),
                trace: Default::default(),
            })
            .await
            .map_err(|e| gpu_error(format!("Failed to create device: {e}")))?;
        device.on_uncaptured_error(Box::new(|err| {
            tracing::error!(error = %err, "GPU error");
        }));

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Transition Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!(
                "shaders/transitions.wgsl"
            ))),
        });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Transition Bind Group Layout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Transition Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Transition Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TEXTURE_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
            cache: None,
        });

        Ok(Self {
            device,
            queue,
            bind_group_layout,
            pipeline,
            adapter_name,
        })
    }

    /// Whether a `width`×`height` surface fits the device limits.
    pub fn supports(&self, width: u32, height: u32) -> bool {
        let max = self.device.limits().max_texture_dimension_2d;
        width > 0 && height > 0 && width <= max && height <= max
    }
}

fn gpu_error(message: String) -> HighlighterError {
    HighlighterError::Other(anyhow::anyhow!(message))
}

/// Per-boundary GPU resources at one resolution.
pub struct GpuSurface {
    context: Arc<GpuContext>,
    width: u32,
    height: u32,
    padded_bytes_per_row: u32,
    from: wgpu::Texture,
    to: wgpu::Texture,
    target: wgpu::Texture,
    uniforms: wgpu::Buffer,
    readback: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    output: Vec<u8>,
}

impl GpuSurface {
    pub fn new(context: Arc<GpuContext>, width: u32, height: u32) -> Self {
        let device = &context.device;
        let size = extent(width, height);
        let input = |label| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TEXTURE_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            })
        };
        let from = input("Transition From");
        let to = input("Transition To");
        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Transition Target"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Transition Params"),
            size: (UNIFORM_WORDS * 4) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let padded_bytes_per_row = padded_row_bytes(width);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Transition Readback"),
            size: padded_bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let from_view = from.create_view(&wgpu::TextureViewDescriptor::default());
        let to_view = to.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Transition Bind Group"),
            layout: &context.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&from_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&to_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniforms.as_entire_binding(),
                },
            ],
        });

        Self {
            width,
            height,
            padded_bytes_per_row,
            from,
            to,
            target,
            uniforms,
            readback,
            bind_group,
            output: vec![0; width as usize * height as usize * 4],
            context,
        }
    }

    /// Composite one frame pair. Inputs must be `width * height * 4` bytes.
    pub fn render(
        &mut self,
        uniforms: &Uniforms,
        from: &[u8],
        to: &[u8],
        progress: f32,
    ) -> HighlighterResult<&[u8]> {
        let context = &self.context;
        let size = extent(self.width, self.height);
        let layout = wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(self.width * 4),
            rows_per_image: Some(self.height),
        };
        context
            .queue
            .write_texture(self.from.as_image_copy(), from, layout, size);
        context
            .queue
            .write_texture(self.to.as_image_copy(), to, layout, size);
        let block = uniform_block(uniforms, self.width, self.height, progress);
        context
            .queue
            .write_buffer(&self.uniforms, 0, bytemuck::cast_slice(&block));

        let target_view = self
            .target
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Transition Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Transition Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&context.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        encoder.copy_texture_to_buffer(
            self.target.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            size,
        );
        context.queue.submit(std::iter::once(encoder.finish()));

        let slice = self.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        context
            .device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| HighlighterError::frame_write(format!("GPU poll failed: {e}")))?;
        rx.recv()
            .map_err(|_| HighlighterError::frame_write("GPU readback was dropped"))?
            .map_err(|e| HighlighterError::frame_write(format!("GPU readback failed: {e}")))?;

        {
            let mapped = slice.get_mapped_range();
            let row_bytes = self.width as usize * 4;
            for (dst, src) in self
                .output
                .chunks_exact_mut(row_bytes)
                .zip(mapped.chunks(self.padded_bytes_per_row as usize))
            {
                dst.copy_from_slice(&src[..row_bytes]);
            }
        }
        self.readback.unmap();
        Ok(&self.output)
    }
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

/// Row pitch of the readback buffer; texture copies need 256-byte rows.
fn padded_row_bytes(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Pack `Params` for the shader: size, progress, kind, then three vec4s.
fn uniform_block(uniforms: &Uniforms, width: u32, height: u32, progress: f32) -> [u32; UNIFORM_WORDS] {
    let mut color = [0.0f32; 4];
    let mut vector = [0.0f32; 4];
    let mut extra = [0.0f32; 4];
    let kind = match uniforms {
        Uniforms::Fade => 0,
        Uniforms::FadeColor { color: rgb, color_phase } => {
            color = [rgb[0], rgb[1], rgb[2], *color_phase];
            1
        }
        Uniforms::Directional { direction } => {
            vector[..2].copy_from_slice(direction);
            2
        }
        Uniforms::Wipe {
            direction,
            smoothness,
        } => {
            vector[..2].copy_from_slice(direction);
            extra[0] = *smoothness;
            3
        }
        Uniforms::CircleOpen {
            smoothness,
            opening,
        } => {
            extra[0] = *smoothness;
            extra[1] = if *opening { 1.0 } else { 0.0 };
            4
        }
        Uniforms::Radial { smoothness } => {
            extra[0] = *smoothness;
            5
        }
        Uniforms::Pixelize { squares_min, steps } => {
            vector[2..].copy_from_slice(squares_min);
            extra[2] = *steps as f32;
            6
        }
    };

    let mut block = [0u32; UNIFORM_WORDS];
    block[0] = (width as f32).to_bits();
    block[1] = (height as f32).to_bits();
    block[2] = progress.clamp(0.0, 1.0).to_bits();
    block[3] = kind;
    for (slot, value) in block[4..].iter_mut().zip(color.iter().chain(&vector).chain(&extra)) {
        *slot = value.to_bits();
    }
    block
}
