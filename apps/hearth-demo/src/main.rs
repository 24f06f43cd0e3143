//! Textured quad demo: staged vertex/index upload, a sampled texture, and a
//! per-frame uniform update driving a slow spin.

use ash::vk;
use glam::Mat4;
use hearth_app::{AppConfig, FrameContext, HearthApp, RenderContext};
use hearth_gpu::pipeline::{PipelineConfig, VertexAttribute};
use hearth_gpu::{
    build_graphics_pipeline, create_default_sampler, write_combined_image_sampler,
    write_uniform_buffer, BindingFactory, DescriptorLayout, DescriptorSetLayoutBuilder, GpuTexture,
    IndexBuffer, Pipeline, UniformBuffer, VertexBuffer,
};
use std::path::{Path, PathBuf};

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    pos: [f32; 2],
    color: [f32; 4],
    uv: [f32; 2],
}

const QUAD_VERTICES: [Vertex; 4] = [
    Vertex {
        pos: [-0.5, -0.5],
        color: [1.0, 0.0, 0.0, 1.0],
        uv: [0.0, 0.0],
    },
    Vertex {
        pos: [-0.5, 0.5],
        color: [1.0, 1.0, 0.0, 1.0],
        uv: [0.0, 1.0],
    },
    Vertex {
        pos: [0.5, 0.5],
        color: [0.0, 0.0, 1.0, 1.0],
        uv: [1.0, 1.0],
    },
    Vertex {
        pos: [0.5, -0.5],
        color: [0.0, 1.0, 0.0, 1.0],
        uv: [1.0, 0.0],
    },
];

const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct QuadUniforms {
    transform: Mat4,
    tint: [f32; 4],
}

struct QuadDemo {
    vertices: VertexBuffer,
    indices: IndexBuffer,
    texture: GpuTexture,
    sampler: vk::Sampler,
    uniforms: UniformBuffer,
    layout: DescriptorLayout,
    bindings: BindingFactory,
    descriptor_set: vk::DescriptorSet,
    pipeline: Pipeline,
    angle: f32,
}

impl QuadDemo {
    fn pipeline_config(&self) -> PipelineConfig {
        pipeline_config(&self.layout)
    }
}

fn pipeline_config(layout: &DescriptorLayout) -> PipelineConfig {
    PipelineConfig {
        vertex_shader: PathBuf::from("shaders/quad.vert.spv"),
        fragment_shader: PathBuf::from("shaders/quad.frag.spv"),
        vertex_stride: std::mem::size_of::<Vertex>() as u32,
        vertex_attributes: vec![
            VertexAttribute {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: 0,
            },
            VertexAttribute {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: 8,
            },
            VertexAttribute {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: 24,
            },
        ],
        cull_mode: vk::CullModeFlags::NONE,
        descriptor_set_layouts: vec![layout.handle()],
        ..Default::default()
    }
}

/// Load the demo texture, falling back to a procedural checkerboard when no
/// file is shipped alongside the binary.
fn load_texture_pixels() -> (Vec<u8>, u32, u32) {
    let path = Path::new("assets/hearth.png");
    match image::open(path) {
        Ok(img) => {
            let rgba = img.to_rgba8();
            let (width, height) = rgba.dimensions();
            tracing::info!("Loaded texture {} ({width}x{height})", path.display());
            (rgba.into_raw(), width, height)
        }
        Err(_) => {
            let size = 64u32;
            let mut pixels = Vec::with_capacity((size * size * 4) as usize);
            for y in 0..size {
                for x in 0..size {
                    let light = (x / 8 + y / 8) % 2 == 0;
                    let value = if light { 220 } else { 60 };
                    pixels.extend_from_slice(&[value, value, value, 255]);
                }
            }
            (pixels, size, size)
        }
    }
}

impl HearthApp for QuadDemo {
    fn init(ctx: &mut RenderContext) -> anyhow::Result<Self> {
        let device = ctx.device();
        let allocator = ctx.allocator();
        let transfer = ctx.transfer();

        let vertices = transfer.upload_vertex_buffer(allocator, &QUAD_VERTICES)?;
        let indices = transfer.upload_index_buffer(allocator, &QUAD_INDICES)?;

        let (pixels, width, height) = load_texture_pixels();
        let texture = transfer.create_texture(allocator, &pixels, width, height)?;
        let sampler = unsafe { create_default_sampler(device) }?;

        let uniforms = transfer.create_uniform_buffer(
            allocator,
            &QuadUniforms {
                transform: Mat4::IDENTITY,
                tint: [1.0; 4],
            },
        )?;

        let layout = unsafe {
            DescriptorSetLayoutBuilder::new()
                .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
                .combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT)
                .build(device)
        }?;

        let bindings = unsafe { BindingFactory::for_layouts(device, &[&layout], 1) }?;
        let descriptor_set = unsafe { bindings.allocate(device, &layout, 1) }?[0];

        unsafe {
            write_uniform_buffer(
                device,
                descriptor_set,
                0,
                uniforms.buffer.buffer,
                uniforms.buffer.size,
            );
            write_combined_image_sampler(device, descriptor_set, 1, texture.view, sampler);
        }

        let pipeline = unsafe {
            build_graphics_pipeline(
                device,
                ctx.render_pass(),
                ctx.extent(),
                &pipeline_config(&layout),
            )
        }?;

        Ok(Self {
            vertices,
            indices,
            texture,
            sampler,
            uniforms,
            layout,
            bindings,
            descriptor_set,
            pipeline,
            angle: 0.0,
        })
    }

    fn update(&mut self, _ctx: &RenderContext, dt: f32) {
        self.angle = (self.angle + dt * 0.6) % std::f32::consts::TAU;
    }

    fn render(&mut self, ctx: &RenderContext, frame: &FrameContext) -> anyhow::Result<()> {
        // The frame fence has been waited by now, so the single-buffered
        // uniform is safe to overwrite
        let aspect = ctx.aspect_ratio();
        let pulse = 0.75 + 0.25 * (self.angle * 2.0).sin();
        self.uniforms.update(&QuadUniforms {
            transform: Mat4::from_scale(glam::Vec3::new(1.0 / aspect, 1.0, 1.0))
                * Mat4::from_rotation_z(self.angle),
            tint: [pulse, pulse, pulse, 1.0],
        })?;

        let device = ctx.device();
        let cmd = frame.command_buffer;

        ctx.begin_render_pass(frame);
        unsafe {
            device.cmd_bind_pipeline(cmd, self.pipeline.bind_point, self.pipeline.pipeline);
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertices.buffer.buffer], &[0]);
            device.cmd_bind_index_buffer(
                cmd,
                self.indices.buffer.buffer,
                0,
                self.indices.index_type,
            );
            device.cmd_bind_descriptor_sets(
                cmd,
                self.pipeline.bind_point,
                self.pipeline.layout,
                0,
                &[self.descriptor_set],
                &[],
            );
            device.cmd_draw_indexed(cmd, self.indices.index_count, 1, 0, 0, 0);
        }
        ctx.end_render_pass(frame);

        Ok(())
    }

    fn on_resize(&mut self, ctx: &mut RenderContext, _width: u32, _height: u32) -> anyhow::Result<()> {
        // Viewport state is baked into the pipeline, so a resize means a
        // rebuild; the device is idle after swapchain recreation
        let config = self.pipeline_config();
        unsafe {
            self.pipeline.destroy(ctx.device());
            self.pipeline =
                build_graphics_pipeline(ctx.device(), ctx.render_pass(), ctx.extent(), &config)?;
        }
        Ok(())
    }

    fn cleanup(&mut self, ctx: &mut RenderContext) {
        let device = ctx.device();
        unsafe {
            self.pipeline.destroy(device);
            self.bindings.destroy(device);
            self.layout.destroy(device);
            device.destroy_sampler(self.sampler, None);
            ctx.allocator().destroy_texture(&mut self.texture);
            ctx.allocator().destroy_buffer(&mut self.uniforms.buffer);
            ctx.allocator().destroy_buffer(&mut self.indices.buffer);
            ctx.allocator().destroy_buffer(&mut self.vertices.buffer);
        }
    }
}

fn main() -> anyhow::Result<()> {
    let config = AppConfig::new("Hearth demo")
        .with_size(800, 600)
        .with_clear_color([0.02, 0.02, 0.05, 1.0]);

    hearth_app::run_app::<QuadDemo>(config)
}
