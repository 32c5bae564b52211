use ash::vk;
use std::ffi::{c_char, c_void, CStr};

use crate::error::{RendererError, Result, VkResultExt};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    msg_type: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    let ty = match msg_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "GEN",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "VAL",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "PERF",
        _ => "?",
    };
    let msg = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[VK {ty}] {msg}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[VK {ty}] {msg}"),
        _ => log::debug!("[VK {ty}] {msg}"),
    }
    vk::FALSE
}

struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

pub struct VulkanInstance {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub surface_loader: ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
    debug: Option<DebugMessenger>,
}

impl VulkanInstance {
    pub fn new(
        display_handle: raw_window_handle::RawDisplayHandle,
        window_handle: raw_window_handle::RawWindowHandle,
        validation: bool,
    ) -> Result<Self> {
        let entry = unsafe { ash::Entry::load()? };

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"sphere-rt")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"No Engine")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_3);

        let surface_extensions = ash_window::enumerate_required_extensions(display_handle)
            .op("enumerate_required_extensions")?;
        let mut ext_names: Vec<*const c_char> = surface_extensions.to_vec();

        let mut layer_names: Vec<*const c_char> = Vec::new();
        let validation = validation && layer_available(&entry, VALIDATION_LAYER)?;
        if validation {
            layer_names.push(VALIDATION_LAYER.as_ptr());
            ext_names.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let mut debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_names)
            .enabled_extension_names(&ext_names);
        if validation {
            create_info = create_info.push_next(&mut debug_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .op("vkCreateInstance")?;

        let debug = if validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            match unsafe { loader.create_debug_utils_messenger(&debug_info, None) } {
                Ok(messenger) => Some(DebugMessenger { loader, messenger }),
                Err(e) => {
                    log::warn!("Debug messenger unavailable: {e:?}");
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let surface = match unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        } {
            Ok(surface) => surface,
            Err(result) => {
                unsafe {
                    if let Some(d) = &debug {
                        d.loader.destroy_debug_utils_messenger(d.messenger, None);
                    }
                    instance.destroy_instance(None);
                }
                return Err(RendererError::Vulkan {
                    op: "create_surface",
                    result,
                });
            }
        };

        log::info!(
            "Vulkan 1.3 instance created (validation {})",
            if validation { "on" } else { "off" }
        );

        Ok(VulkanInstance {
            entry,
            instance,
            surface_loader,
            surface,
            debug,
        })
    }
}

fn layer_available(entry: &ash::Entry, name: &CStr) -> Result<bool> {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }
        .op("vkEnumerateInstanceLayerProperties")?;
    let found = layers
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == name));
    if !found {
        log::warn!("{name:?} requested but not installed; continuing without it");
    }
    Ok(found)
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(d) = self.debug.take() {
                d.loader.destroy_debug_utils_messenger(d.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}
