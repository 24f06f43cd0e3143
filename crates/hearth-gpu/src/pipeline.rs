//! Graphics pipeline creation from a declarative configuration.

use crate::error::{GpuError, Result};
use ash::vk;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// One vertex attribute: where the shader reads it and where it lives in
/// the vertex stream.
#[derive(Debug, Clone, Copy)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: vk::Format,
    pub offset: u32,
}

/// Declarative graphics pipeline configuration.
///
/// A vertex is a stride-addressed blob described by the attribute list; no
/// fixed vertex struct is imposed beyond what the attributes declare.
#[derive(Clone)]
pub struct PipelineConfig {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub vertex_stride: u32,
    pub vertex_attributes: Vec<VertexAttribute>,
    pub topology: vk::PrimitiveTopology,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub blend_enable: bool,
    pub depth_test: bool,
    pub descriptor_set_layouts: Vec<vk::DescriptorSetLayout>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            vertex_shader: PathBuf::new(),
            fragment_shader: PathBuf::new(),
            vertex_stride: 0,
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            blend_enable: false,
            depth_test: false,
            descriptor_set_layouts: Vec::new(),
            push_constant_ranges: Vec::new(),
        }
    }
}

/// A built pipeline with its layout.
///
/// Immutable once built; changing any state means destroy and recreate.
pub struct Pipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub bind_point: vk::PipelineBindPoint,
}

impl Pipeline {
    /// Destroy the pipeline and its layout.
    ///
    /// # Safety
    /// The device must be valid and the pipeline must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
    }
}

/// Candidate locations tried when loading a shader.
///
/// The given path always comes first; the fallbacks cover running from the
/// workspace root, a crate directory, or a build output directory.
pub fn shader_path_candidates(path: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![path.to_path_buf()];
    if let Some(file_name) = path.file_name() {
        candidates.push(Path::new("shaders").join(file_name));
        candidates.push(Path::new("assets/shaders").join(file_name));
        candidates.push(Path::new("../shaders").join(file_name));
    }
    candidates
}

/// Load SPIR-V bytecode, trying the fallback locations.
///
/// The blob is opaque: nothing is validated beyond what `read_spv` needs
/// (size alignment and magic endianness handling).
pub fn load_shader_words(path: &Path) -> Result<Vec<u32>> {
    let candidates = shader_path_candidates(path);

    for candidate in &candidates {
        match std::fs::read(candidate) {
            Ok(bytes) => {
                tracing::debug!("Loaded shader from {}", candidate.display());
                return ash::util::read_spv(&mut Cursor::new(&bytes)).map_err(|e| {
                    GpuError::PipelineCreation(format!(
                        "invalid SPIR-V in {}: {e}",
                        candidate.display()
                    ))
                });
            }
            Err(_) => continue,
        }
    }

    Err(GpuError::ShaderNotFound {
        path: path.to_path_buf(),
        tried: candidates,
    })
}

/// Build a graphics pipeline against subpass 0 of the given render pass.
///
/// Viewport and scissor are fixed to `extent`; shader modules are destroyed
/// as soon as the pipeline exists.
///
/// # Safety
/// The device and render pass must be valid, and the descriptor set layouts
/// in the config must be live.
pub unsafe fn build_graphics_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    config: &PipelineConfig,
) -> Result<Pipeline> {
    let vert_words = load_shader_words(&config.vertex_shader)?;
    let frag_words = load_shader_words(&config.fragment_shader)?;

    let vert_info = vk::ShaderModuleCreateInfo::default().code(&vert_words);
    let vert_module = device.create_shader_module(&vert_info, None)?;

    let frag_info = vk::ShaderModuleCreateInfo::default().code(&frag_words);
    let frag_module = match device.create_shader_module(&frag_info, None) {
        Ok(module) => module,
        Err(e) => {
            device.destroy_shader_module(vert_module, None);
            return Err(GpuError::from(e));
        }
    };

    let result = assemble_pipeline(device, render_pass, extent, config, vert_module, frag_module);

    // Modules are only needed at build time
    device.destroy_shader_module(vert_module, None);
    device.destroy_shader_module(frag_module, None);

    result
}

unsafe fn assemble_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    config: &PipelineConfig,
    vert_module: vk::ShaderModule,
    frag_module: vk::ShaderModule,
) -> Result<Pipeline> {
    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_module)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_module)
            .name(c"main"),
    ];

    let binding_descriptions: Vec<vk::VertexInputBindingDescription> = if config.vertex_stride > 0 {
        vec![vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(config.vertex_stride)
            .input_rate(vk::VertexInputRate::VERTEX)]
    } else {
        Vec::new()
    };

    let attribute_descriptions: Vec<vk::VertexInputAttributeDescription> = config
        .vertex_attributes
        .iter()
        .map(|attr| {
            vk::VertexInputAttributeDescription::default()
                .location(attr.location)
                .binding(attr.binding)
                .format(attr.format)
                .offset(attr.offset)
        })
        .collect();

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(config.topology)
        .primitive_restart_enable(false);

    let viewport = vk::Viewport::default()
        .x(0.0)
        .y(0.0)
        .width(extent.width as f32)
        .height(extent.height as f32)
        .min_depth(0.0)
        .max_depth(1.0);

    let scissor = vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent,
    };

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewports(std::slice::from_ref(&viewport))
        .scissors(std::slice::from_ref(&scissor));

    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(config.cull_mode)
        .front_face(config.front_face)
        .depth_bias_enable(false)
        .line_width(1.0);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1)
        .sample_shading_enable(false);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(config.depth_test)
        .depth_write_enable(config.depth_test)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(config.blend_enable)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD);

    let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(std::slice::from_ref(&color_blend_attachment));

    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(&config.descriptor_set_layouts)
        .push_constant_ranges(&config.push_constant_ranges);

    let layout = device
        .create_pipeline_layout(&layout_info, None)
        .map_err(|e| GpuError::PipelineCreation(e.to_string()))?;

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    let pipelines = device.create_graphics_pipelines(
        vk::PipelineCache::null(),
        std::slice::from_ref(&pipeline_info),
        None,
    );

    let pipeline = match pipelines {
        Ok(pipelines) => pipelines[0],
        Err((_, e)) => {
            device.destroy_pipeline_layout(layout, None);
            return Err(GpuError::PipelineCreation(e.to_string()));
        }
    };

    Ok(Pipeline {
        pipeline,
        layout,
        bind_point: vk::PipelineBindPoint::GRAPHICS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_path_is_tried_first() {
        let candidates = shader_path_candidates(Path::new("out/quad.vert.spv"));
        assert_eq!(candidates[0], Path::new("out/quad.vert.spv"));
        assert!(candidates
            .iter()
            .any(|c| c == Path::new("shaders/quad.vert.spv")));
    }

    #[test]
    fn missing_shader_lists_every_candidate() {
        let path = Path::new("definitely/not/here.spv");
        let err = load_shader_words(path).unwrap_err();
        match err {
            GpuError::ShaderNotFound { path: p, tried } => {
                assert_eq!(p, path);
                assert_eq!(tried.len(), shader_path_candidates(path).len());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn loads_valid_spirv_from_disk() {
        // Minimal valid SPIR-V header: magic, version 1.0, generator 0,
        // bound 1, schema 0
        let words: [u32; 5] = [0x0723_0203, 0x0001_0000, 0, 1, 0];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();

        let dir = std::env::temp_dir().join("hearth-shader-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("header_only.spv");
        std::fs::write(&path, &bytes).unwrap();

        let loaded = load_shader_words(&path).unwrap();
        assert_eq!(loaded, words);

        std::fs::remove_file(&path).ok();
    }
}
