use ash::vk;

use super::buffer::BufferResource;
use super::descriptor::Descriptors;
use super::device::VulkanDevice;
use super::image::StorageImage;
use super::instance::VulkanInstance;
use super::pipeline::Pipelines;
use super::swapchain::Swapchain;
use crate::config::{RendererConfig, MAX_SPHERES};
use crate::error::{Result, VkResultExt};
use crate::frame::{
    AcquireOutcome, FenceToken, FrameBackend, FrameInputs, PresentOutcome, RecreateOutcome,
    SceneData,
};
use crate::grid::{MAX_CELLS, MAX_COARSE_CELLS, MAX_REFERENCES};
use crate::render::{self, RecordTargets};

/// Per-slot command buffer and sync objects, plus staging buffers that
/// must outlive the slot's current submission.
struct FrameSlot {
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
    image_available: vk::Semaphore,
    pending: Vec<BufferResource>,
}

/// Device-local scene buffers, sized once for the largest scene allowed.
struct SceneBuffers {
    sphere_cr: BufferResource,
    sphere_albedo: BufferResource,
    grid_ranges: BufferResource,
    grid_indices: BufferResource,
    grid_coarse: BufferResource,
}

impl SceneBuffers {
    fn new(vk_dev: &VulkanDevice) -> Result<Self> {
        let make = |size: usize| {
            BufferResource::new(
                &vk_dev.device,
                &vk_dev.memory_properties,
                size as vk::DeviceSize,
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
        };
        let sphere_bytes = MAX_SPHERES as usize * 16;
        let mut out = SceneBuffers {
            sphere_cr: make(sphere_bytes)?,
            sphere_albedo: BufferResource::empty(),
            grid_ranges: BufferResource::empty(),
            grid_indices: BufferResource::empty(),
            grid_coarse: BufferResource::empty(),
        };
        let rest = (|| -> Result<()> {
            out.sphere_albedo = make(sphere_bytes)?;
            out.grid_ranges = make(MAX_CELLS * 8)?;
            out.grid_indices = make(MAX_REFERENCES * 4)?;
            out.grid_coarse = make(MAX_COARSE_CELLS * 4)?;
            Ok(())
        })();
        if let Err(e) = rest {
            out.destroy(&vk_dev.device);
            return Err(e);
        }
        Ok(out)
    }

    fn destroy(&mut self, device: &ash::Device) {
        for b in [
            &mut self.sphere_cr,
            &mut self.sphere_albedo,
            &mut self.grid_ranges,
            &mut self.grid_indices,
            &mut self.grid_coarse,
        ] {
            b.destroy(device);
        }
    }
}

/// Everything sized to the swapchain extent.
struct FrameTargets {
    storage: StorageImage,
    accum: BufferResource,
    spp: BufferResource,
    epoch: BufferResource,
    /// Accumulation buffers have been zeroed since creation.
    cleared: bool,
}

impl FrameTargets {
    fn new(vk_dev: &VulkanDevice, extent: vk::Extent2D) -> Result<Self> {
        let pixels = extent.width as vk::DeviceSize * extent.height as vk::DeviceSize;
        let make = |bytes_per_pixel: vk::DeviceSize| {
            BufferResource::new(
                &vk_dev.device,
                &vk_dev.memory_properties,
                pixels * bytes_per_pixel,
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
        };
        let mut out = FrameTargets {
            storage: StorageImage::new(vk_dev, extent)?,
            accum: BufferResource::empty(),
            spp: BufferResource::empty(),
            epoch: BufferResource::empty(),
            cleared: false,
        };
        let rest = (|| -> Result<()> {
            out.accum = make(16)?;
            out.spp = make(4)?;
            out.epoch = make(4)?;
            Ok(())
        })();
        if let Err(e) = rest {
            out.destroy(&vk_dev.device);
            return Err(e);
        }
        Ok(out)
    }

    fn destroy(&mut self, device: &ash::Device) {
        self.storage.destroy(device);
        self.accum.destroy(device);
        self.spp.destroy(device);
        self.epoch.destroy(device);
        self.cleared = false;
    }
}

/// Vulkan implementation of the frame protocol. Owns the device and
/// instance so they are torn down after every handle created from them.
pub struct VulkanBackend {
    command_pool: vk::CommandPool,
    slots: Vec<FrameSlot>,
    swapchain: Swapchain,
    sampler: vk::Sampler,
    descriptors: Descriptors,
    pipelines: Pipelines,
    scene: SceneBuffers,
    targets: FrameTargets,
    device: VulkanDevice,
    instance: VulkanInstance,
}

impl VulkanBackend {
    pub fn new(
        instance: VulkanInstance,
        device: VulkanDevice,
        config: &RendererConfig,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let command_pool = device.create_command_pool()?;
        let swapchain = Swapchain::new(&instance, &device, width, height, vk::SwapchainKHR::null())?;
        let slots = create_slots(&device, command_pool, config.frames_in_flight)?;

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE);
        let sampler =
            unsafe { device.device.create_sampler(&sampler_info, None) }.op("vkCreateSampler")?;

        let descriptors = Descriptors::new(&device.device)?;
        let pipelines = Pipelines::new(
            &device.device,
            descriptors.set_layout,
            &config.shader_dir,
            swapchain.format,
        )?;
        let scene = SceneBuffers::new(&device)?;
        let targets = FrameTargets::new(&device, swapchain.extent)?;

        descriptors.update_scene(
            &device.device,
            &scene.sphere_cr,
            &scene.sphere_albedo,
            &scene.grid_ranges,
            &scene.grid_indices,
            &scene.grid_coarse,
        );
        descriptors.update_targets(
            &device.device,
            targets.storage.view,
            sampler,
            &targets.accum,
            &targets.spp,
            &targets.epoch,
        );

        log::info!(
            "Backend ready: {} frames in flight, {} swapchain images",
            slots.len(),
            swapchain.image_count()
        );
        Ok(VulkanBackend {
            command_pool,
            slots,
            swapchain,
            sampler,
            descriptors,
            pipelines,
            scene,
            targets,
            device,
            instance,
        })
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Copies the scene into the fixed-capacity device buffers through a
    /// staging buffer parked on `slot` until its fence retires.
    fn upload_scene(&mut self, slot: usize, cmd: vk::CommandBuffer, scene: &SceneData) -> Result<()> {
        use vk::AccessFlags2 as A;
        use vk::PipelineStageFlags2 as S;

        let centers: Vec<[f32; 4]> = scene.spheres.iter().map(|s| s.center_radius()).collect();
        let albedo: Vec<[f32; 4]> = scene.spheres.iter().map(|s| s.albedo_rgba()).collect();
        let grid = &scene.grid;
        let regions: [(&BufferResource, &[u8]); 5] = [
            (&self.scene.sphere_cr, bytemuck::cast_slice(&centers)),
            (&self.scene.sphere_albedo, bytemuck::cast_slice(&albedo)),
            (&self.scene.grid_ranges, bytemuck::cast_slice(&grid.ranges)),
            (&self.scene.grid_indices, bytemuck::cast_slice(&grid.indices)),
            (&self.scene.grid_coarse, bytemuck::cast_slice(&grid.coarse_counts)),
        ];

        let mut offsets = Vec::with_capacity(regions.len());
        let mut total: vk::DeviceSize = 0;
        for (dst, bytes) in &regions {
            let len = bytes.len() as vk::DeviceSize;
            assert!(len <= dst.size, "scene data of {len} bytes exceeds a {}-byte buffer", dst.size);
            offsets.push(total);
            total += len.next_multiple_of(16);
        }

        let device = &self.device.device;
        let mut staging = BufferResource::new(
            device,
            &self.device.memory_properties,
            total,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        for ((_, bytes), &offset) in regions.iter().zip(&offsets) {
            if let Err(e) = staging.store_at(device, offset, bytes) {
                staging.destroy(device);
                return Err(e);
            }
        }

        let barriers = |src: (S, A), dst: (S, A)| -> Vec<vk::BufferMemoryBarrier2<'static>> {
            regions
                .iter()
                .map(|(b, _)| {
                    vk::BufferMemoryBarrier2::default()
                        .src_stage_mask(src.0)
                        .src_access_mask(src.1)
                        .dst_stage_mask(dst.0)
                        .dst_access_mask(dst.1)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .buffer(b.buffer)
                        .offset(0)
                        .size(vk::WHOLE_SIZE)
                })
                .collect()
        };
        let before = barriers((S::COMPUTE_SHADER, A::SHADER_STORAGE_READ), (S::COPY, A::TRANSFER_WRITE));
        let after = barriers((S::COPY, A::TRANSFER_WRITE), (S::COMPUTE_SHADER, A::SHADER_STORAGE_READ));

        unsafe {
            device.cmd_pipeline_barrier2(
                cmd,
                &vk::DependencyInfo::default().buffer_memory_barriers(&before),
            );
            for ((dst, bytes), &offset) in regions.iter().zip(&offsets) {
                if bytes.is_empty() {
                    continue;
                }
                let copy = vk::BufferCopy {
                    src_offset: offset,
                    dst_offset: 0,
                    size: bytes.len() as vk::DeviceSize,
                };
                device.cmd_copy_buffer(cmd, staging.buffer, dst.buffer, &[copy]);
            }
            device.cmd_pipeline_barrier2(
                cmd,
                &vk::DependencyInfo::default().buffer_memory_barriers(&after),
            );
        }

        log::debug!("Scene upload staged: {total} bytes on slot {slot}");
        self.slots[slot].pending.push(staging);
        Ok(())
    }

    fn release_pending(&mut self, slot: usize) {
        let device = &self.device.device;
        for mut buffer in self.slots[slot].pending.drain(..) {
            buffer.destroy(device);
        }
    }
}

fn create_slots(
    vk_dev: &VulkanDevice,
    pool: vk::CommandPool,
    count: usize,
) -> Result<Vec<FrameSlot>> {
    let device = &vk_dev.device;
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count as u32);
    let cmds = unsafe { device.allocate_command_buffers(&alloc_info) }
        .op("vkAllocateCommandBuffers")?;

    let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
    let sem_info = vk::SemaphoreCreateInfo::default();
    let mut slots = Vec::with_capacity(count);
    for cmd in cmds {
        let fence = unsafe { device.create_fence(&fence_info, None) }.op("vkCreateFence")?;
        let image_available =
            unsafe { device.create_semaphore(&sem_info, None) }.op("vkCreateSemaphore")?;
        slots.push(FrameSlot {
            cmd,
            fence,
            image_available,
            pending: Vec::new(),
        });
    }
    Ok(slots)
}

impl FrameBackend for VulkanBackend {
    type Fence = vk::Fence;

    fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    fn slot_fence(&self, slot: usize) -> FenceToken<vk::Fence> {
        FenceToken::new(self.slots[slot].fence, slot)
    }

    fn wait_fence(&mut self, token: FenceToken<vk::Fence>) -> Result<()> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[token.fence()], true, u64::MAX)
                .op("vkWaitForFences")?;
        }
        self.release_pending(token.slot());
        Ok(())
    }

    fn reset_fence(&mut self, token: FenceToken<vk::Fence>) -> Result<()> {
        unsafe { self.device.device.reset_fences(&[token.fence()]) }.op("vkResetFences")
    }

    fn acquire(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let acquired = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.swapchain.swapchain,
                u64::MAX,
                self.slots[slot].image_available,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((image, suboptimal)) => Ok(AcquireOutcome::Acquired { image, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e).op("vkAcquireNextImageKHR"),
        }
    }

    fn record(&mut self, slot: usize, image: u32, inputs: &FrameInputs<'_>) -> Result<()> {
        let cmd = self.slots[slot].cmd;
        unsafe {
            let device = &self.device.device;
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .op("vkResetCommandBuffer")?;
            device
                .begin_command_buffer(
                    cmd,
                    &vk::CommandBufferBeginInfo::default()
                        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )
                .op("vkBeginCommandBuffer")?;
        }

        if inputs.upload_scene {
            self.upload_scene(slot, cmd, inputs.scene)?;
        }

        let targets = RecordTargets {
            storage_image: self.targets.storage.image,
            storage_initialized: self.targets.storage.initialized,
            accum: self.targets.accum.buffer,
            spp: self.targets.spp.buffer,
            epoch: self.targets.epoch.buffer,
            clear_epoch: !self.targets.cleared,
            swapchain_image: self.swapchain.images[image as usize],
            swapchain_view: self.swapchain.image_views[image as usize],
            extent: self.swapchain.extent,
        };
        render::record_frame(
            &self.device.device,
            cmd,
            &self.pipelines,
            self.descriptors.set,
            &targets,
            inputs,
        );

        unsafe { self.device.device.end_command_buffer(cmd) }.op("vkEndCommandBuffer")?;
        self.targets.storage.initialized = true;
        self.targets.cleared = true;
        Ok(())
    }

    fn submit(&mut self, slot: usize, image: u32) -> Result<FenceToken<vk::Fence>> {
        let frame = &self.slots[slot];
        let waits = [vk::SemaphoreSubmitInfo::default()
            .semaphore(frame.image_available)
            .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)];
        let signals = [vk::SemaphoreSubmitInfo::default()
            .semaphore(self.swapchain.render_finished[image as usize])
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        let cmds = [vk::CommandBufferSubmitInfo::default().command_buffer(frame.cmd)];
        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&waits)
            .command_buffer_infos(&cmds)
            .signal_semaphore_infos(&signals);

        unsafe {
            self.device
                .device
                .queue_submit2(self.device.queue, &[submit], frame.fence)
                .op("vkQueueSubmit2")?;
        }
        Ok(FenceToken::new(frame.fence, slot))
    }

    fn present(&mut self, _slot: usize, image: u32) -> Result<PresentOutcome> {
        let waits = [self.swapchain.render_finished[image as usize]];
        let swapchains = [self.swapchain.swapchain];
        let indices = [image];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);

        match unsafe { self.device.swapchain_loader.queue_present(self.device.queue, &info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e).op("vkQueuePresentKHR"),
        }
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.device.device.device_wait_idle() }.op("vkDeviceWaitIdle")?;
        for slot in 0..self.slots.len() {
            self.release_pending(slot);
        }
        Ok(())
    }

    fn recreate(&mut self, width: u32, height: u32) -> Result<RecreateOutcome> {
        if Swapchain::surface_extent(&self.instance, &self.device, width, height)?.is_none() {
            return Ok(RecreateOutcome::SurfaceUnavailable);
        }

        let fresh = Swapchain::new(
            &self.instance,
            &self.device,
            width,
            height,
            self.swapchain.swapchain,
        )?;
        let mut old = std::mem::replace(&mut self.swapchain, fresh);
        old.destroy(&self.device);

        self.pipelines
            .ensure_blit_format(&self.device.device, self.swapchain.format)?;

        self.targets.destroy(&self.device.device);
        self.targets = FrameTargets::new(&self.device, self.swapchain.extent)?;
        self.descriptors.update_targets(
            &self.device.device,
            self.targets.storage.view,
            self.sampler,
            &self.targets.accum,
            &self.targets.spp,
            &self.targets.epoch,
        );
        Ok(RecreateOutcome::Recreated)
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        let device = &self.device.device;
        unsafe {
            device.device_wait_idle().ok();
        }
        for slot in 0..self.slots.len() {
            self.release_pending(slot);
        }
        let device = &self.device.device;
        unsafe {
            for slot in self.slots.drain(..) {
                device.destroy_fence(slot.fence, None);
                device.destroy_semaphore(slot.image_available, None);
            }
        }
        self.targets.destroy(device);
        self.scene.destroy(device);
        self.pipelines.destroy(device);
        self.descriptors.destroy(device);
        unsafe {
            device.destroy_sampler(self.sampler, None);
            device.destroy_command_pool(self.command_pool, None);
        }
        self.swapchain.destroy(&self.device);
    }
}
