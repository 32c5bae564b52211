use ash::vk;
use std::ffi::CStr;

use super::instance::VulkanInstance;
use crate::error::{RendererError, Result, VkResultExt};
use crate::render::PushConstants;

pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queue: vk::Queue,
    pub queue_family_index: u32,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub swapchain_loader: ash::khr::swapchain::Device,
}

impl VulkanDevice {
    /// Picks the first GPU with Vulkan 1.3, a graphics+compute queue that can
    /// present to the surface, and room for the ray-trace push constants.
    pub fn new(vk_instance: &VulkanInstance) -> Result<Self> {
        let instance = &vk_instance.instance;
        let required_device_extensions: [&CStr; 1] = [ash::khr::swapchain::NAME];
        let push_constant_bytes = std::mem::size_of::<PushConstants>() as u32;

        let devices = unsafe { instance.enumerate_physical_devices() }
            .op("vkEnumeratePhysicalDevices")?;

        let mut rejected = Vec::new();
        let mut found = None;
        for pd in devices {
            let props = unsafe { instance.get_physical_device_properties(pd) };
            let name = props
                .device_name_as_c_str()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            if props.api_version < vk::API_VERSION_1_3 {
                rejected.push(format!("{name}: Vulkan 1.3 unsupported"));
                continue;
            }

            let exts = unsafe { instance.enumerate_device_extension_properties(pd) }
                .op("vkEnumerateDeviceExtensionProperties")?;
            let has_all = required_device_extensions.iter().all(|req| {
                exts.iter()
                    .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == *req))
            });
            if !has_all {
                rejected.push(format!("{name}: missing VK_KHR_swapchain"));
                continue;
            }

            let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
            let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut features13);
            unsafe { instance.get_physical_device_features2(pd, &mut features2) };
            if features13.synchronization2 == vk::FALSE || features13.dynamic_rendering == vk::FALSE {
                rejected.push(format!("{name}: no synchronization2/dynamic_rendering"));
                continue;
            }

            let qf_props = unsafe { instance.get_physical_device_queue_family_properties(pd) };
            let qf = qf_props.iter().enumerate().find(|(idx, qp)| {
                let wanted = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;
                if qp.queue_count == 0 || !qp.queue_flags.contains(wanted) {
                    return false;
                }
                unsafe {
                    vk_instance
                        .surface_loader
                        .get_physical_device_surface_support(pd, *idx as u32, vk_instance.surface)
                        .unwrap_or(false)
                }
            });
            let Some((idx, _)) = qf else {
                rejected.push(format!("{name}: no graphics+compute queue with present"));
                continue;
            };

            if props.limits.max_push_constants_size < push_constant_bytes {
                return Err(RendererError::Config(format!(
                    "{name} allows {} bytes of push constants, the ray-trace pass needs {push_constant_bytes}",
                    props.limits.max_push_constants_size
                )));
            }

            log::info!("Selected GPU: {name} (queue family {idx})");
            found = Some((pd, idx as u32));
            break;
        }

        let Some((physical_device, queue_family_index)) = found else {
            return Err(RendererError::NoSuitableDevice(if rejected.is_empty() {
                "no Vulkan devices".to_string()
            } else {
                rejected.join("; ")
            }));
        };

        let priorities = [1.0f32];
        let queue_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&priorities);

        let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
            .synchronization2(true)
            .dynamic_rendering(true);

        let ext_name_ptrs: Vec<*const std::ffi::c_char> =
            required_device_extensions.iter().map(|e| e.as_ptr()).collect();

        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_info))
            .enabled_extension_names(&ext_name_ptrs)
            .push_next(&mut features13);

        let device = unsafe { instance.create_device(physical_device, &device_info, None) }
            .op("vkCreateDevice")?;
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let swapchain_loader = ash::khr::swapchain::Device::new(instance, &device);

        Ok(VulkanDevice {
            device,
            physical_device,
            queue,
            queue_family_index,
            memory_properties,
            swapchain_loader,
        })
    }

    pub fn create_command_pool(&self) -> Result<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        unsafe { self.device.create_command_pool(&info, None) }.op("vkCreateCommandPool")
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
        }
    }
}
