// Command recording
//
// Records one command buffer per frame: ownership-acquire barrier when the
// graphics and present queue families differ, render pass, external draw
// producers in caller order, mirror release barrier, end.
//
// A recording failure aborts the frame; a partially recorded buffer is
// never submitted.

use crate::device::DeviceContext;
use crate::error::{recording_error, FrameError};
use ash::vk;
use std::sync::Arc;

/// An external producer of draw commands (level renderer, skybox, GUI
/// overlay). The caller controls ordering; the overlay goes last so it
/// composites on top.
pub trait DrawProducer {
    /// Update per-frame uniform data for the given frame slot.
    fn update_frame_uniforms(&mut self, frame_index: usize);

    /// Emit draw commands into an already-begun render pass: bind pipeline,
    /// descriptor sets, vertex/index buffers, issue draws.
    fn emit_commands(&mut self, device: &ash::Device, cmd: vk::CommandBuffer, image_index: u32);
}

pub struct CommandRecorder {
    device: Arc<DeviceContext>,
    render_pass: vk::RenderPass,
    clear_values: [vk::ClearValue; 2],
}

impl CommandRecorder {
    pub fn new(
        device: Arc<DeviceContext>,
        render_pass: vk::RenderPass,
        clear_color: [f32; 4],
    ) -> Self {
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        Self {
            device,
            render_pass,
            clear_values,
        }
    }

    pub fn set_render_pass(&mut self, render_pass: vk::RenderPass) {
        self.render_pass = render_pass;
    }

    /// Record a complete frame into `cmd` (one-time-submit usage).
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        image: vk::Image,
        frame_index: usize,
        image_index: u32,
        producers: &mut [&mut dyn DrawProducer],
    ) -> Result<(), FrameError> {
        let device = &self.device.device;

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(cmd, &begin_info) }.map_err(recording_error)?;

        // Cross-family ownership transfer: the present family hands the
        // acquired image to the graphics family. Applied uniformly whenever
        // the families differ; the mirror barrier below matches it.
        if self.device.has_split_queues() {
            self.ownership_barrier(
                cmd,
                image,
                self.device.present_family,
                self.device.graphics_family,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::AccessFlags::empty(),
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            );
        }

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&self.clear_values);

        unsafe {
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
        }

        // Caller order is paint order: background first, overlay last
        for producer in producers.iter_mut() {
            producer.update_frame_uniforms(frame_index);
            producer.emit_commands(device, cmd, image_index);
        }

        unsafe {
            device.cmd_end_render_pass(cmd);
        }

        // Hand the image back to the present family
        if self.device.has_split_queues() {
            self.ownership_barrier(
                cmd,
                image,
                self.device.graphics_family,
                self.device.present_family,
                vk::ImageLayout::PRESENT_SRC_KHR,
                vk::ImageLayout::PRESENT_SRC_KHR,
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                vk::AccessFlags::empty(),
            );
        }

        unsafe { device.end_command_buffer(cmd) }.map_err(recording_error)?;

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn ownership_barrier(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        src_family: u32,
        dst_family: u32,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    ) {
        let barrier = vk::ImageMemoryBarrier::builder()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(src_family)
            .dst_queue_family_index(dst_family)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .build();

        unsafe {
            self.device.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}
