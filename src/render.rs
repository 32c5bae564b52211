use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::frame::FrameInputs;
use crate::grid::GridParams;
use crate::vk::image::COLOR_RANGE;
use crate::vk::pipeline::Pipelines;

/// Local size of `raytrace.comp` in X and Y.
pub const WORKGROUP_SIZE: u32 = 8;

/// Per-dispatch constants. Layout mirrors the `Push` block in
/// `shaders/raytrace.comp`.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Default, Debug, PartialEq)]
pub struct PushConstants {
    pub width: u32,
    pub height: u32,
    pub frame: u32,
    pub sphere_count: u32,
    pub accumulation_epoch: u32,
    pub tan_half_fov_y: f32,
    pub aspect: f32,
    pub aperture: f32,
    pub cam_pos: [f32; 3],
    pub focus_distance: f32,
    pub cam_fwd: [f32; 3],
    pub _pad0: f32,
    pub cam_right: [f32; 3],
    pub _pad1: f32,
    pub cam_up: [f32; 3],
    pub ground_y: f32,
    pub world_min: [f32; 2],
    pub world_max: [f32; 2],
    pub grid: GridParams,
    pub show_grid: u32,
    pub _pad2: [u32; 3],
}

impl PushConstants {
    pub fn new(extent: vk::Extent2D, inputs: &FrameInputs<'_>) -> Self {
        let cam = inputs.camera;
        let area = &inputs.scene.area;
        PushConstants {
            width: extent.width,
            height: extent.height,
            frame: inputs.frame,
            sphere_count: inputs.scene.sphere_count(),
            accumulation_epoch: inputs.accumulation.epoch,
            tan_half_fov_y: (0.5 * cam.vertical_fov).tan(),
            aspect: extent.width as f32 / extent.height.max(1) as f32,
            aperture: cam.aperture,
            cam_pos: cam.position.to_array(),
            focus_distance: cam.focus_distance,
            cam_fwd: cam.forward.to_array(),
            cam_right: cam.right.to_array(),
            cam_up: cam.up.to_array(),
            ground_y: area.ground_y,
            world_min: [area.min_x, area.min_z],
            world_max: [area.max_x, area.max_z],
            grid: inputs.scene.grid.params(),
            show_grid: inputs.show_grid as u32,
            ..Default::default()
        }
    }
}

/// Workgroups needed to cover `extent`, rounding partial tiles up.
pub fn dispatch_size(extent: vk::Extent2D) -> (u32, u32) {
    (
        extent.width.div_ceil(WORKGROUP_SIZE),
        extent.height.div_ceil(WORKGROUP_SIZE),
    )
}

/// Swapchain-generation resources a frame renders through.
pub struct RecordTargets {
    pub storage_image: vk::Image,
    /// The storage image has been through at least one frame (it is in
    /// SHADER_READ_ONLY_OPTIMAL rather than UNDEFINED).
    pub storage_initialized: bool,
    pub accum: vk::Buffer,
    pub spp: vk::Buffer,
    pub epoch: vk::Buffer,
    /// First use since creation: the epoch buffer still holds garbage.
    pub clear_epoch: bool,
    pub swapchain_image: vk::Image,
    pub swapchain_view: vk::ImageView,
    pub extent: vk::Extent2D,
}

fn image_barrier(
    image: vk::Image,
    (src_stage, src_access, old_layout): (vk::PipelineStageFlags2, vk::AccessFlags2, vk::ImageLayout),
    (dst_stage, dst_access, new_layout): (vk::PipelineStageFlags2, vk::AccessFlags2, vk::ImageLayout),
) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2::default()
        .src_stage_mask(src_stage)
        .src_access_mask(src_access)
        .dst_stage_mask(dst_stage)
        .dst_access_mask(dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(COLOR_RANGE)
}

fn buffer_barrier(
    buffer: vk::Buffer,
    src: (vk::PipelineStageFlags2, vk::AccessFlags2),
    dst: (vk::PipelineStageFlags2, vk::AccessFlags2),
) -> vk::BufferMemoryBarrier2<'static> {
    vk::BufferMemoryBarrier2::default()
        .src_stage_mask(src.0)
        .src_access_mask(src.1)
        .dst_stage_mask(dst.0)
        .dst_access_mask(dst.1)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .offset(0)
        .size(vk::WHOLE_SIZE)
}

/// Records one tick's passes into an already-begun command buffer: clear
/// stale accumulation, trace, then blit into the acquired swapchain image
/// and leave it ready to present.
pub fn record_frame(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    pipelines: &Pipelines,
    set: vk::DescriptorSet,
    targets: &RecordTargets,
    inputs: &FrameInputs<'_>,
) {
    use vk::AccessFlags2 as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags2 as S;

    assert!(pipelines.compute != vk::Pipeline::null(), "compute pipeline is not ready");
    assert!(pipelines.blit != vk::Pipeline::null(), "blit pipeline is not ready");
    assert!(set != vk::DescriptorSet::null(), "descriptor set is not ready");
    assert!(targets.storage_image != vk::Image::null(), "storage image is not ready");

    let storage_rw = A::SHADER_STORAGE_READ | A::SHADER_STORAGE_WRITE;

    unsafe {
        let from = if targets.storage_initialized {
            (S::FRAGMENT_SHADER, A::SHADER_SAMPLED_READ, L::SHADER_READ_ONLY_OPTIMAL)
        } else {
            (S::TOP_OF_PIPE, A::NONE, L::UNDEFINED)
        };
        let to_general = [image_barrier(
            targets.storage_image,
            from,
            (S::COMPUTE_SHADER, A::SHADER_STORAGE_WRITE, L::GENERAL),
        )];
        // previous frames' accumulation writes before this frame touches them
        let accum_hazard = [vk::MemoryBarrier2::default()
            .src_stage_mask(S::COMPUTE_SHADER)
            .src_access_mask(storage_rw)
            .dst_stage_mask(S::COMPUTE_SHADER | S::CLEAR)
            .dst_access_mask(storage_rw | A::TRANSFER_WRITE)];
        device.cmd_pipeline_barrier2(
            cmd,
            &vk::DependencyInfo::default()
                .memory_barriers(&accum_hazard)
                .image_memory_barriers(&to_general),
        );

        let mut cleared = Vec::with_capacity(3);
        if targets.clear_epoch {
            cleared.push(targets.epoch);
        }
        if inputs.accumulation.reset || targets.clear_epoch {
            cleared.push(targets.accum);
            cleared.push(targets.spp);
        }
        if !cleared.is_empty() {
            for &buffer in &cleared {
                device.cmd_fill_buffer(cmd, buffer, 0, vk::WHOLE_SIZE, 0);
            }
            let ready: Vec<_> = cleared
                .iter()
                .map(|&b| {
                    buffer_barrier(b, (S::CLEAR, A::TRANSFER_WRITE), (S::COMPUTE_SHADER, storage_rw))
                })
                .collect();
            device.cmd_pipeline_barrier2(
                cmd,
                &vk::DependencyInfo::default().buffer_memory_barriers(&ready),
            );
        }

        let push = PushConstants::new(targets.extent, inputs);
        let (groups_x, groups_y) = dispatch_size(targets.extent);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipelines.compute);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::COMPUTE,
            pipelines.compute_layout,
            0,
            &[set],
            &[],
        );
        device.cmd_push_constants(
            cmd,
            pipelines.compute_layout,
            vk::ShaderStageFlags::COMPUTE,
            0,
            bytemuck::bytes_of(&push),
        );
        device.cmd_dispatch(cmd, groups_x, groups_y, 1);

        let pre_blit = [
            image_barrier(
                targets.storage_image,
                (S::COMPUTE_SHADER, A::SHADER_STORAGE_WRITE, L::GENERAL),
                (S::FRAGMENT_SHADER, A::SHADER_SAMPLED_READ, L::SHADER_READ_ONLY_OPTIMAL),
            ),
            // chains with the acquire semaphore wait at COLOR_ATTACHMENT_OUTPUT
            image_barrier(
                targets.swapchain_image,
                (S::COLOR_ATTACHMENT_OUTPUT, A::NONE, L::UNDEFINED),
                (
                    S::COLOR_ATTACHMENT_OUTPUT,
                    A::COLOR_ATTACHMENT_WRITE,
                    L::COLOR_ATTACHMENT_OPTIMAL,
                ),
            ),
        ];
        device.cmd_pipeline_barrier2(
            cmd,
            &vk::DependencyInfo::default().image_memory_barriers(&pre_blit),
        );

        let color_attachment = [vk::RenderingAttachmentInfo::default()
            .image_view(targets.swapchain_view)
            .image_layout(L::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            })];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: targets.extent,
        };
        let rendering = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_attachment);

        device.cmd_begin_rendering(cmd, &rendering);
        device.cmd_set_viewport(
            cmd,
            0,
            &[vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: targets.extent.width as f32,
                height: targets.extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            }],
        );
        device.cmd_set_scissor(cmd, 0, &[render_area]);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipelines.blit);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            pipelines.blit_layout,
            0,
            &[set],
            &[],
        );
        device.cmd_draw(cmd, 3, 1, 0, 0);
        device.cmd_end_rendering(cmd);

        let to_present = [image_barrier(
            targets.swapchain_image,
            (
                S::COLOR_ATTACHMENT_OUTPUT,
                A::COLOR_ATTACHMENT_WRITE,
                L::COLOR_ATTACHMENT_OPTIMAL,
            ),
            (S::BOTTOM_OF_PIPE, A::NONE, L::PRESENT_SRC_KHR),
        )];
        device.cmd_pipeline_barrier2(
            cmd,
            &vk::DependencyInfo::default().image_memory_barriers(&to_present),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accum::AccumulationFrame;
    use crate::camera::Camera;
    use crate::config::SceneConfig;
    use crate::frame::SceneData;
    use crate::scene::SpawnArea;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_push_constant_layout() {
        assert_eq!(size_of::<PushConstants>(), 160);
        assert_eq!(offset_of!(PushConstants, cam_pos), 32);
        assert_eq!(offset_of!(PushConstants, cam_up), 80);
        assert_eq!(offset_of!(PushConstants, world_min), 96);
        assert_eq!(offset_of!(PushConstants, grid), 112);
        assert_eq!(offset_of!(PushConstants, show_grid), 144);
    }

    #[test]
    fn test_dispatch_rounds_up() {
        let e = |width, height| vk::Extent2D { width, height };
        assert_eq!(dispatch_size(e(1280, 720)), (160, 90));
        assert_eq!(dispatch_size(e(1281, 721)), (161, 91));
        assert_eq!(dispatch_size(e(1, 1)), (1, 1));
    }

    #[test]
    fn test_push_constants_from_inputs() {
        let cfg = SceneConfig {
            target_count: 50,
            min_radius: 0.2,
            max_radius: 0.3,
            density: None,
            seed: 3,
        };
        let scene = SceneData::generate(&cfg, SpawnArea::compute(&cfg));
        let camera = Camera::for_area(&scene.area).params();
        let inputs = FrameInputs {
            frame: 12,
            camera: &camera,
            accumulation: AccumulationFrame {
                epoch: 7,
                reset: false,
            },
            show_grid: true,
            scene: &scene,
            upload_scene: false,
        };
        let extent = vk::Extent2D {
            width: 200,
            height: 100,
        };
        let push = PushConstants::new(extent, &inputs);
        assert_eq!(push.frame, 12);
        assert_eq!(push.accumulation_epoch, 7);
        assert_eq!(push.sphere_count, scene.sphere_count());
        assert_eq!(push.show_grid, 1);
        assert_eq!(push.aspect, 2.0);
        assert_eq!(push.grid, scene.grid.params());
        assert_eq!(push.world_min, [scene.area.min_x, scene.area.min_z]);
        assert!((push.tan_half_fov_y - (0.5 * camera.vertical_fov).tan()).abs() < 1e-6);
    }
}
