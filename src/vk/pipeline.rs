use ash::vk;
use std::path::{Path, PathBuf};

use crate::error::{RendererError, Result, VkResultExt};
use crate::render::PushConstants;

pub const RAYTRACE_SHADER: &str = "raytrace.comp.spv";
pub const BLIT_VERT_SHADER: &str = "blit.vert.spv";
pub const BLIT_FRAG_SHADER: &str = "blit.frag.spv";

/// Compute ray tracer plus the fullscreen-triangle blit that presents it.
pub struct Pipelines {
    pub compute_layout: vk::PipelineLayout,
    pub compute: vk::Pipeline,
    pub blit_layout: vk::PipelineLayout,
    pub blit: vk::Pipeline,
    pub blit_format: vk::Format,
    shader_dir: PathBuf,
}

impl Pipelines {
    pub fn new(
        device: &ash::Device,
        set_layout: vk::DescriptorSetLayout,
        shader_dir: &Path,
        color_format: vk::Format,
    ) -> Result<Self> {
        let mut out = Pipelines {
            compute_layout: vk::PipelineLayout::null(),
            compute: vk::Pipeline::null(),
            blit_layout: vk::PipelineLayout::null(),
            blit: vk::Pipeline::null(),
            blit_format: color_format,
            shader_dir: shader_dir.to_path_buf(),
        };
        if let Err(e) = out.build(device, set_layout) {
            out.destroy(device);
            return Err(e);
        }
        log::info!("Pipelines built from {}", shader_dir.display());
        Ok(out)
    }

    fn build(&mut self, device: &ash::Device, set_layout: vk::DescriptorSetLayout) -> Result<()> {
        let set_layouts = [set_layout];
        let push_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(std::mem::size_of::<PushConstants>() as u32)];

        let compute_layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        self.compute_layout = unsafe { device.create_pipeline_layout(&compute_layout_info, None) }
            .op("vkCreatePipelineLayout")?;

        let blit_layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        self.blit_layout = unsafe { device.create_pipeline_layout(&blit_layout_info, None) }
            .op("vkCreatePipelineLayout")?;

        let module = load_shader_module(device, &self.shader_dir.join(RAYTRACE_SHADER))?;
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(c"main");
        let compute_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(self.compute_layout);
        let created = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[compute_info], None)
        };
        unsafe { device.destroy_shader_module(module, None) };
        self.compute = created.map_err(|(_, e)| e).op("vkCreateComputePipelines")?[0];

        self.blit = create_blit_pipeline(device, &self.shader_dir, self.blit_layout, self.blit_format)?;
        Ok(())
    }

    /// Dynamic rendering bakes the attachment format into the pipeline, so a
    /// swapchain that comes back in a different format needs a new blit.
    pub fn ensure_blit_format(&mut self, device: &ash::Device, format: vk::Format) -> Result<()> {
        if format == self.blit_format {
            return Ok(());
        }
        let blit = create_blit_pipeline(device, &self.shader_dir, self.blit_layout, format)?;
        unsafe { device.destroy_pipeline(self.blit, None) };
        self.blit = blit;
        self.blit_format = format;
        log::info!("Blit pipeline rebuilt for {format:?}");
        Ok(())
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for pipeline in [&mut self.compute, &mut self.blit] {
                if *pipeline != vk::Pipeline::null() {
                    device.destroy_pipeline(*pipeline, None);
                    *pipeline = vk::Pipeline::null();
                }
            }
            for layout in [&mut self.compute_layout, &mut self.blit_layout] {
                if *layout != vk::PipelineLayout::null() {
                    device.destroy_pipeline_layout(*layout, None);
                    *layout = vk::PipelineLayout::null();
                }
            }
        }
    }
}

fn create_blit_pipeline(
    device: &ash::Device,
    shader_dir: &Path,
    layout: vk::PipelineLayout,
    format: vk::Format,
) -> Result<vk::Pipeline> {
    let vert = load_shader_module(device, &shader_dir.join(BLIT_VERT_SHADER))?;
    let frag = match load_shader_module(device, &shader_dir.join(BLIT_FRAG_SHADER)) {
        Ok(frag) => frag,
        Err(e) => {
            unsafe { device.destroy_shader_module(vert, None) };
            return Err(e);
        }
    };

    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag)
            .name(c"main"),
    ];

    // fullscreen triangle generated from gl_VertexIndex
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
    let viewport = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);
    let raster = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);
    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);
    let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)];
    let blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let formats = [format];
    let mut rendering = vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&formats);

    let info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport)
        .rasterization_state(&raster)
        .multisample_state(&multisample)
        .color_blend_state(&blend)
        .dynamic_state(&dynamic)
        .layout(layout)
        .push_next(&mut rendering);

    let created =
        unsafe { device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None) };
    unsafe {
        device.destroy_shader_module(vert, None);
        device.destroy_shader_module(frag, None);
    }
    Ok(created.map_err(|(_, e)| e).op("vkCreateGraphicsPipelines")?[0])
}

pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let shader_err = |source| RendererError::Shader {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::File::open(path).map_err(shader_err)?;
    ash::util::read_spv(&mut file).map_err(shader_err)
}

fn load_shader_module(device: &ash::Device, path: &Path) -> Result<vk::ShaderModule> {
    let code = load_spirv(path)?;
    let info = vk::ShaderModuleCreateInfo::default().code(&code);
    unsafe { device.create_shader_module(&info, None) }.op("vkCreateShaderModule")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_shader_names_path() {
        let path = Path::new("/nonexistent/raytrace.comp.spv");
        match load_spirv(path) {
            Err(RendererError::Shader { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_reads_spirv_words() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let words: [u32; 2] = [0x0723_0203, 0x0001_0000];
        std::fs::write(file.path(), bytemuck::cast_slice(&words)).unwrap();
        assert_eq!(load_spirv(file.path()).unwrap(), words);
    }

    #[test]
    fn test_rejects_truncated_spirv() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), [0x03u8, 0x02, 0x23]).unwrap();
        assert!(matches!(
            load_spirv(file.path()),
            Err(RendererError::Shader { .. })
        ));
    }
}
