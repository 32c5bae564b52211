use ash::vk;

use super::buffer::BufferResource;
use crate::error::{RendererError, Result, VkResultExt};

pub const B_TARGET: u32 = 0;
pub const B_SAMPLER: u32 = 1;
pub const B_SPHERE_CR: u32 = 2;
pub const B_SPHERE_ALB: u32 = 3;
pub const B_ACCUM: u32 = 4;
pub const B_SPP: u32 = 5;
pub const B_EPOCH: u32 = 6;
pub const B_GRID_RANGES: u32 = 7;
pub const B_GRID_INDICES: u32 = 8;
pub const B_GRID_COARSE_COUNTS: u32 = 9;

const STORAGE_BUFFER_BINDINGS: [u32; 8] = [
    B_SPHERE_CR,
    B_SPHERE_ALB,
    B_ACCUM,
    B_SPP,
    B_EPOCH,
    B_GRID_RANGES,
    B_GRID_INDICES,
    B_GRID_COARSE_COUNTS,
];

/// One set shared by the ray-trace compute pass and the blit.
pub struct Descriptors {
    pub pool: vk::DescriptorPool,
    pub set_layout: vk::DescriptorSetLayout,
    pub set: vk::DescriptorSet,
}

impl Descriptors {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let mut bindings = vec![
            vk::DescriptorSetLayoutBinding::default()
                .binding(B_TARGET)
                .descriptor_count(1)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .stage_flags(vk::ShaderStageFlags::COMPUTE),
            vk::DescriptorSetLayoutBinding::default()
                .binding(B_SAMPLER)
                .descriptor_count(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT),
        ];
        bindings.extend(STORAGE_BUFFER_BINDINGS.iter().map(|&b| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(b)
                .descriptor_count(1)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
        }));

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let set_layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .op("vkCreateDescriptorSetLayout")?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: 1,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 1,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: STORAGE_BUFFER_BINDINGS.len() as u32,
            },
        ];

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(1);
        let pool = match unsafe { device.create_descriptor_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(set_layout, None) };
                return Err(RendererError::Vulkan {
                    op: "vkCreateDescriptorPool",
                    result: e,
                });
            }
        };

        let mut out = Descriptors {
            pool,
            set_layout,
            set: vk::DescriptorSet::null(),
        };
        let layouts = [set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        match unsafe { device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => out.set = sets[0],
            Err(e) => {
                out.destroy(device);
                return Err(RendererError::Vulkan {
                    op: "vkAllocateDescriptorSets",
                    result: e,
                });
            }
        }
        Ok(out)
    }

    fn write_buffers(&self, device: &ash::Device, buffers: &[(u32, &BufferResource)]) {
        let infos: Vec<[vk::DescriptorBufferInfo; 1]> = buffers
            .iter()
            .map(|(_, b)| {
                [vk::DescriptorBufferInfo::default()
                    .buffer(b.buffer)
                    .offset(0)
                    .range(vk::WHOLE_SIZE)]
            })
            .collect();
        let writes: Vec<vk::WriteDescriptorSet> = buffers
            .iter()
            .zip(&infos)
            .map(|((binding, _), info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(info)
            })
            .collect();
        unsafe { device.update_descriptor_sets(&writes, &[]) };
    }

    /// Sphere and grid buffers; these live for the whole run.
    pub fn update_scene(
        &self,
        device: &ash::Device,
        sphere_cr: &BufferResource,
        sphere_albedo: &BufferResource,
        grid_ranges: &BufferResource,
        grid_indices: &BufferResource,
        grid_coarse: &BufferResource,
    ) {
        self.write_buffers(
            device,
            &[
                (B_SPHERE_CR, sphere_cr),
                (B_SPHERE_ALB, sphere_albedo),
                (B_GRID_RANGES, grid_ranges),
                (B_GRID_INDICES, grid_indices),
                (B_GRID_COARSE_COUNTS, grid_coarse),
            ],
        );
    }

    /// Swapchain-sized targets; rewritten after every recreation.
    pub fn update_targets(
        &self,
        device: &ash::Device,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
        accum: &BufferResource,
        spp: &BufferResource,
        epoch: &BufferResource,
    ) {
        let storage_info = [vk::DescriptorImageInfo::default()
            .image_layout(vk::ImageLayout::GENERAL)
            .image_view(image_view)];
        let sampled_info = [vk::DescriptorImageInfo::default()
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image_view(image_view)
            .sampler(sampler)];

        let image_writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(self.set)
                .dst_binding(B_TARGET)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .image_info(&storage_info),
            vk::WriteDescriptorSet::default()
                .dst_set(self.set)
                .dst_binding(B_SAMPLER)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&sampled_info),
        ];
        unsafe { device.update_descriptor_sets(&image_writes, &[]) };

        self.write_buffers(device, &[(B_ACCUM, accum), (B_SPP, spp), (B_EPOCH, epoch)]);
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            if self.pool != vk::DescriptorPool::null() {
                device.destroy_descriptor_pool(self.pool, None);
                self.pool = vk::DescriptorPool::null();
                self.set = vk::DescriptorSet::null();
            }
            if self.set_layout != vk::DescriptorSetLayout::null() {
                device.destroy_descriptor_set_layout(self.set_layout, None);
                self.set_layout = vk::DescriptorSetLayout::null();
            }
        }
    }
}
