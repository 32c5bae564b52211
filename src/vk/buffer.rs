use ash::vk;

use crate::error::{RendererError, Result, VkResultExt};

/// A buffer and its dedicated allocation. `destroy` nulls the handles, so
/// calling it twice (or on a never-filled slot) is harmless.
pub struct BufferResource {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl BufferResource {
    /// Null handles; a placeholder until the real buffer is created.
    pub fn empty() -> Self {
        BufferResource {
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            size: 0,
        }
    }

    pub fn new(
        device: &ash::Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        // zero-sized buffers are invalid; empty scenes still bind something
        let size = size.max(16);
        unsafe {
            let buffer_info = vk::BufferCreateInfo::default()
                .size(size)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let buffer = device.create_buffer(&buffer_info, None).op("vkCreateBuffer")?;
            let mem_reqs = device.get_buffer_memory_requirements(buffer);

            let memory_index =
                match find_memory_type(mem_props, mem_reqs.memory_type_bits, memory_flags) {
                    Ok(index) => index,
                    Err(e) => {
                        device.destroy_buffer(buffer, None);
                        return Err(e);
                    }
                };

            let alloc_info = vk::MemoryAllocateInfo::default()
                .allocation_size(mem_reqs.size)
                .memory_type_index(memory_index);

            let memory = match device.allocate_memory(&alloc_info, None) {
                Ok(memory) => memory,
                Err(result) => {
                    device.destroy_buffer(buffer, None);
                    return Err(RendererError::Vulkan {
                        op: "vkAllocateMemory",
                        result,
                    });
                }
            };

            let mut resource = BufferResource {
                buffer,
                memory,
                size,
            };
            if let Err(result) = device.bind_buffer_memory(buffer, memory, 0) {
                resource.destroy(device);
                return Err(RendererError::Vulkan {
                    op: "vkBindBufferMemory",
                    result,
                });
            }
            Ok(resource)
        }
    }

    /// Copies `bytes` into a host-visible, host-coherent buffer at `offset`.
    pub fn store_at(&self, device: &ash::Device, offset: vk::DeviceSize, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let byte_size = bytes.len() as vk::DeviceSize;
        assert!(
            offset + byte_size <= self.size,
            "store of {byte_size} bytes at {offset} overflows {}-byte buffer",
            self.size
        );
        unsafe {
            let ptr = device
                .map_memory(self.memory, offset, byte_size, vk::MemoryMapFlags::empty())
                .op("vkMapMemory")?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
            device.unmap_memory(self.memory);
        }
        Ok(())
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            if self.buffer != vk::Buffer::null() {
                device.destroy_buffer(self.buffer, None);
                self.buffer = vk::Buffer::null();
            }
            if self.memory != vk::DeviceMemory::null() {
                device.free_memory(self.memory, None);
                self.memory = vk::DeviceMemory::null();
            }
        }
    }
}

pub fn find_memory_type(
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..mem_props.memory_type_count)
        .find(|&i| {
            (type_bits >> i) & 1 == 1
                && mem_props.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or_else(|| {
            RendererError::NoSuitableDevice(format!("no memory type with {required:?}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, f) in flags.iter().enumerate() {
            props.memory_types[i].property_flags = *f;
        }
        props
    }

    #[test]
    fn test_find_memory_type_respects_type_bits() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let p = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, host, host]);
        assert_eq!(find_memory_type(&p, 0b111, host).unwrap(), 1);
        assert_eq!(find_memory_type(&p, 0b100, host).unwrap(), 2);
        assert_eq!(
            find_memory_type(&p, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn test_find_memory_type_missing() {
        let p = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = find_memory_type(&p, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert!(matches!(err, Err(RendererError::NoSuitableDevice(_))));
    }
}
