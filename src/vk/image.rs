use ash::vk;

use super::buffer::find_memory_type;
use super::device::VulkanDevice;
use crate::error::{Result, VkResultExt};

pub const RT_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

pub const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Ray-trace output: written as a storage image by the compute pass, then
/// sampled by the blit.
pub struct StorageImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    /// False until the first frame has moved it out of UNDEFINED.
    pub initialized: bool,
}

impl StorageImage {
    pub fn new(vk_dev: &VulkanDevice, extent: vk::Extent2D) -> Result<Self> {
        let device = &vk_dev.device;

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(RT_FORMAT)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED);

        let mut out = StorageImage {
            image: vk::Image::null(),
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            extent,
            initialized: false,
        };

        let built = (|| -> Result<()> {
            out.image = unsafe { device.create_image(&image_info, None) }.op("vkCreateImage")?;

            let mem_reqs = unsafe { device.get_image_memory_requirements(out.image) };
            let mem_info = vk::MemoryAllocateInfo::default()
                .allocation_size(mem_reqs.size)
                .memory_type_index(find_memory_type(
                    &vk_dev.memory_properties,
                    mem_reqs.memory_type_bits,
                    vk::MemoryPropertyFlags::DEVICE_LOCAL,
                )?);
            out.memory =
                unsafe { device.allocate_memory(&mem_info, None) }.op("vkAllocateMemory")?;
            unsafe { device.bind_image_memory(out.image, out.memory, 0) }
                .op("vkBindImageMemory")?;

            let view_info = vk::ImageViewCreateInfo::default()
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(RT_FORMAT)
                .subresource_range(COLOR_RANGE)
                .image(out.image);
            out.view =
                unsafe { device.create_image_view(&view_info, None) }.op("vkCreateImageView")?;
            Ok(())
        })();

        match built {
            Ok(()) => Ok(out),
            Err(e) => {
                out.destroy(device);
                Err(e)
            }
        }
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            if self.view != vk::ImageView::null() {
                device.destroy_image_view(self.view, None);
                self.view = vk::ImageView::null();
            }
            if self.image != vk::Image::null() {
                device.destroy_image(self.image, None);
                self.image = vk::Image::null();
            }
            if self.memory != vk::DeviceMemory::null() {
                device.free_memory(self.memory, None);
                self.memory = vk::DeviceMemory::null();
            }
        }
        self.initialized = false;
    }
}
