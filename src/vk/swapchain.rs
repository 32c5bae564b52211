use ash::vk;

use super::device::VulkanDevice;
use super::instance::VulkanInstance;
use crate::error::{Result, VkResultExt};

/// Presentable images plus the per-image "render finished" semaphores.
/// Everything here is rebuilt wholesale on resize.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub render_finished: Vec<vk::Semaphore>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// The extent a swapchain built now would get, or `None` when the
    /// surface currently has no area.
    pub fn surface_extent(
        vk_instance: &VulkanInstance,
        vk_dev: &VulkanDevice,
        width: u32,
        height: u32,
    ) -> Result<Option<vk::Extent2D>> {
        let caps = unsafe {
            vk_instance
                .surface_loader
                .get_physical_device_surface_capabilities(vk_dev.physical_device, vk_instance.surface)
        }
        .op("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        Ok(presentable_extent(&caps, width, height))
    }

    pub fn new(
        vk_instance: &VulkanInstance,
        vk_dev: &VulkanDevice,
        width: u32,
        height: u32,
        old: vk::SwapchainKHR,
    ) -> Result<Self> {
        let surface = &vk_instance.surface_loader;
        let pd = vk_dev.physical_device;
        let (caps, formats, modes) = unsafe {
            (
                surface
                    .get_physical_device_surface_capabilities(pd, vk_instance.surface)
                    .op("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
                surface
                    .get_physical_device_surface_formats(pd, vk_instance.surface)
                    .op("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
                surface
                    .get_physical_device_surface_present_modes(pd, vk_instance.surface)
                    .op("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
            )
        };

        let surface_format = choose_surface_format(&formats);
        let present_mode = choose_present_mode(&modes);
        let extent = choose_extent(&caps, width, height);
        let image_count = choose_image_count(&caps);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(vk_instance.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(choose_composite_alpha(caps.supported_composite_alpha))
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);

        let swapchain = unsafe { vk_dev.swapchain_loader.create_swapchain(&create_info, None) }
            .op("vkCreateSwapchainKHR")?;

        let mut out = Swapchain {
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            render_finished: Vec::new(),
            format: surface_format.format,
            extent,
        };
        if let Err(e) = out.create_image_resources(vk_dev) {
            out.destroy(vk_dev);
            return Err(e);
        }

        log::info!(
            "Swapchain created: {}x{}, format {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            out.images.len()
        );
        Ok(out)
    }

    fn create_image_resources(&mut self, vk_dev: &VulkanDevice) -> Result<()> {
        let device = &vk_dev.device;
        self.images = unsafe { vk_dev.swapchain_loader.get_swapchain_images(self.swapchain) }
            .op("vkGetSwapchainImagesKHR")?;

        for &image in &self.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .subresource_range(super::image::COLOR_RANGE)
                .image(image);
            let view = unsafe { device.create_image_view(&view_info, None) }
                .op("vkCreateImageView")?;
            self.image_views.push(view);

            let semaphore =
                unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
                    .op("vkCreateSemaphore")?;
            self.render_finished.push(semaphore);
        }
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn destroy(&mut self, vk_dev: &VulkanDevice) {
        unsafe {
            for view in self.image_views.drain(..) {
                vk_dev.device.destroy_image_view(view, None);
            }
            for semaphore in self.render_finished.drain(..) {
                vk_dev.device.destroy_semaphore(semaphore, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                vk_dev
                    .swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
        self.images.clear();
    }
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
        .unwrap_or(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        })
}

/// FIFO first: it is always supported and paces the loop to the display.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    [
        vk::PresentModeKHR::FIFO,
        vk::PresentModeKHR::MAILBOX,
        vk::PresentModeKHR::IMMEDIATE,
    ]
    .into_iter()
    .find(|m| modes.contains(m))
    .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|a| supported.contains(*a))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// `None` while the surface has no area, e.g. a minimized window whose
/// framebuffer size has not caught up yet.
pub fn presentable_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> Option<vk::Extent2D> {
    let extent = choose_extent(caps, width, height);
    (extent.width > 0 && extent.height > 0).then_some(extent)
}

pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_prefers_bgra_unorm() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB),
            format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::B8G8R8A8_UNORM
        );
        assert_eq!(
            choose_surface_format(&formats[..1]).format,
            vk::Format::R8G8B8A8_SRGB
        );
    }

    #[test]
    fn test_present_mode_order() {
        use vk::PresentModeKHR as M;
        assert_eq!(choose_present_mode(&[M::IMMEDIATE, M::MAILBOX, M::FIFO]), M::FIFO);
        assert_eq!(choose_present_mode(&[M::IMMEDIATE, M::MAILBOX]), M::MAILBOX);
        assert_eq!(choose_present_mode(&[M::IMMEDIATE]), M::IMMEDIATE);
    }

    #[test]
    fn test_composite_alpha_order() {
        use vk::CompositeAlphaFlagsKHR as A;
        assert_eq!(choose_composite_alpha(A::INHERIT | A::PRE_MULTIPLIED), A::PRE_MULTIPLIED);
        assert_eq!(choose_composite_alpha(A::INHERIT), A::INHERIT);
    }

    #[test]
    fn test_extent_and_image_count() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };
        assert_eq!(
            choose_extent(&caps, 4000, 500),
            vk::Extent2D {
                width: 1920,
                height: 500
            }
        );
        assert_eq!(choose_image_count(&caps), 2);
        caps.max_image_count = 0;
        assert_eq!(choose_image_count(&caps), 3);

        caps.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(choose_extent(&caps, 1, 1).width, 800);
    }

    #[test]
    fn test_minimized_surface_is_not_presentable() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 0,
                height: 0,
            },
            max_image_extent: vk::Extent2D {
                width: 0,
                height: 0,
            },
            ..Default::default()
        };
        // the window still reports its old size
        assert_eq!(presentable_extent(&caps, 800, 600), None);

        caps.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        caps.max_image_extent = caps.current_extent;
        assert_eq!(presentable_extent(&caps, 1, 1), Some(caps.current_extent));
    }
}
