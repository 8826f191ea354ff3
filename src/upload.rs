// One-shot staged uploads
//
// Moves CPU data into device-local buffers and images through a scratch
// host-visible staging buffer: map, copy, record a one-time command buffer
// with the access/layout transitions, submit, and block on a fence.
//
// Synchronous by design. After a successful return the destination is
// readable by subsequent GPU work with no further host synchronization.
// Do not call this on a per-frame hot path for large data.

use crate::buffer::DeviceBuffer;
use crate::device::DeviceContext;
use crate::error::{submission_error, FrameError};
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// Describes the destination's barrier endpoints around the copy: where the
/// resource was (current access, generating stage) and where it must end up
/// (new access, consuming stage).
#[derive(Debug, Clone, Copy)]
pub struct TransferBarrier {
    pub current_access: vk::AccessFlags,
    pub new_access: vk::AccessFlags,
    pub generating_stage: vk::PipelineStageFlags,
    pub consuming_stage: vk::PipelineStageFlags,
}

pub struct Uploader {
    device: Arc<DeviceContext>,
    command_pool: vk::CommandPool,
    timeout_ns: u64,
}

impl Uploader {
    pub fn new(device: Arc<DeviceContext>, timeout_ns: u64) -> Result<Self, FrameError> {
        // Transient: every buffer allocated here is one-shot
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .map_err(FrameError::Device)?;

        Ok(Self {
            device,
            command_pool,
            timeout_ns,
        })
    }

    /// Upload `data` into `dst` at `dst_offset`, transitioning the
    /// destination range out of and back into the caller's access state.
    pub fn upload_to_buffer(
        &self,
        data: &[u8],
        dst: vk::Buffer,
        dst_offset: vk::DeviceSize,
        barrier: TransferBarrier,
    ) -> Result<(), FrameError> {
        if data.is_empty() {
            return Err(FrameError::InvalidArgument("upload data is empty"));
        }

        let staging = self.create_staging(data)?;
        let staging_buffer = staging.buffer;

        let size = data.len() as vk::DeviceSize;
        let device = &self.device.device;
        let result = self.one_shot(|cmd| {
            let into_transfer = vk::BufferMemoryBarrier::builder()
                .src_access_mask(barrier.current_access)
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(dst)
                .offset(dst_offset)
                .size(size)
                .build();
            let out_of_transfer = vk::BufferMemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(barrier.new_access)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(dst)
                .offset(dst_offset)
                .size(size)
                .build();
            let region = vk::BufferCopy::builder()
                .src_offset(0)
                .dst_offset(dst_offset)
                .size(size)
                .build();

            unsafe {
                device.cmd_pipeline_barrier(
                    cmd,
                    barrier.generating_stage,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[into_transfer],
                    &[],
                );
                device.cmd_copy_buffer(cmd, staging_buffer, dst, &[region]);
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    barrier.consuming_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[out_of_transfer],
                    &[],
                );
            }
            Ok(())
        });

        // Staging is destroyed on success and failure alike
        staging.destroy(&self.device);

        result
    }

    /// Upload tightly packed pixel data into `dst`, leaving the whole image
    /// in `final_layout` with the caller's access state.
    pub fn upload_to_image(
        &self,
        data: &[u8],
        dst: vk::Image,
        extent: vk::Extent2D,
        final_layout: vk::ImageLayout,
        barrier: TransferBarrier,
    ) -> Result<(), FrameError> {
        if data.is_empty() {
            return Err(FrameError::InvalidArgument("upload data is empty"));
        }

        let staging = self.create_staging(data)?;
        let staging_buffer = staging.buffer;

        let device = &self.device.device;
        let subresource_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let result = self.one_shot(|cmd| {
            let into_transfer = vk::ImageMemoryBarrier::builder()
                .src_access_mask(barrier.current_access)
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(dst)
                .subresource_range(subresource_range)
                .build();
            let out_of_transfer = vk::ImageMemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(barrier.new_access)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(final_layout)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(dst)
                .subresource_range(subresource_range)
                .build();
            let region = vk::BufferImageCopy::builder()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })
                .build();

            unsafe {
                device.cmd_pipeline_barrier(
                    cmd,
                    barrier.generating_stage,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[into_transfer],
                );
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging_buffer,
                    dst,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    barrier.consuming_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[out_of_transfer],
                );
            }
            Ok(())
        });

        staging.destroy(&self.device);

        result
    }

    /// Create the scratch host-visible buffer and copy `data` into it. The
    /// mapping is host-coherent, so no explicit flush is required.
    fn create_staging(&self, data: &[u8]) -> Result<DeviceBuffer, FrameError> {
        let mut staging = DeviceBuffer::new(
            &self.device,
            "upload staging",
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )
        .map_err(|e| FrameError::StagingAllocation(e.to_string()))?;

        match staging.mapped_slice_mut() {
            Some(mapping) => {
                mapping[..data.len()].copy_from_slice(data);
                Ok(staging)
            }
            None => {
                staging.destroy(&self.device);
                Err(FrameError::StagingAllocation(
                    "staging buffer is not host-visible".to_string(),
                ))
            }
        }
    }

    /// Record a one-time command buffer, submit it with a fresh fence, and
    /// block until it completes or the timeout expires. The command buffer
    /// and fence are destroyed on every path.
    fn one_shot<F>(&self, record: F) -> Result<(), FrameError>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<(), FrameError>,
    {
        let device = &self.device.device;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(FrameError::Device)?[0];

        let result = (|| {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { device.begin_command_buffer(cmd, &begin_info) }
                .map_err(FrameError::Device)?;

            record(cmd)?;

            unsafe { device.end_command_buffer(cmd) }.map_err(FrameError::Device)?;

            let fence_info = vk::FenceCreateInfo::builder();
            let fence = unsafe { device.create_fence(&fence_info, None) }
                .map_err(FrameError::Device)?;

            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

            let wait_result = unsafe {
                device
                    .queue_submit(self.device.graphics_queue, &[submit_info.build()], fence)
                    .map_err(submission_error)
                    .and_then(|_| {
                        device
                            .wait_for_fences(&[fence], true, self.timeout_ns)
                            .map_err(|e| match e {
                                vk::Result::TIMEOUT => FrameError::UploadTimeout,
                                vk::Result::ERROR_DEVICE_LOST => FrameError::DeviceLost,
                                other => FrameError::Device(other),
                            })
                    })
            };

            unsafe { device.destroy_fence(fence, None) };
            wait_result
        })();

        unsafe { device.free_command_buffers(self.command_pool, &[cmd]) };

        result
    }

    pub fn destroy(&self) {
        unsafe {
            self.device
                .device
                .destroy_command_pool(self.command_pool, None);
        }
    }
}
