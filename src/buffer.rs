// Buffer and image memory helpers
//
// All device memory goes through the shared allocator. Destruction is
// explicit: whoever owns the resource hands it back via destroy(), nothing
// frees itself.

use crate::device::DeviceContext;
use crate::error::FrameError;
use crate::pass::DEPTH_FORMAT;
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

/// A buffer plus its backing allocation.
pub struct DeviceBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
}

impl DeviceBuffer {
    /// Create a buffer with memory in the requested location.
    ///
    /// `CpuToGpu` buffers come back persistently mapped (staging);
    /// `GpuOnly` is device-local.
    pub fn new(
        device: &DeviceContext,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self, FrameError> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .map_err(FrameError::Device)?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = match device.allocator().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                // Don't leak the buffer handle on allocation failure
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        if let Err(e) = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            let _ = device.allocator().free(allocation);
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(FrameError::Device(e));
        }

        Ok(Self {
            buffer,
            size,
            allocation: Some(allocation),
        })
    }

    /// Host-visible mapping, if the memory location has one.
    pub fn mapped_slice_mut(&mut self) -> Option<&mut [u8]> {
        self.allocation.as_mut().and_then(|a| a.mapped_slice_mut())
    }

    pub fn destroy(mut self, device: &DeviceContext) {
        if let Some(allocation) = self.allocation.take() {
            let _ = device.allocator().free(allocation);
        }
        unsafe { device.device.destroy_buffer(self.buffer, None) };
    }
}

/// Depth buffer sized to the swapchain extent. Extent-dependent: torn down
/// and rebuilt on every swapchain recreation.
pub struct DepthBuffer {
    pub image: vk::Image,
    pub view: vk::ImageView,
    allocation: Option<Allocation>,
}

impl DepthBuffer {
    pub fn new(device: &DeviceContext, extent: vk::Extent2D) -> Result<Self, FrameError> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(DEPTH_FORMAT)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .map_err(FrameError::Device)?;

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };

        let allocation = match device.allocator().allocate(&AllocationCreateDesc {
            name: "depth buffer",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(e.into());
            }
        };

        if let Err(e) = unsafe {
            device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            let _ = device.allocator().free(allocation);
            unsafe { device.device.destroy_image(image, None) };
            return Err(FrameError::Device(e));
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = match unsafe { device.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                let _ = device.allocator().free(allocation);
                unsafe { device.device.destroy_image(image, None) };
                return Err(FrameError::Device(e));
            }
        };

        Ok(Self {
            image,
            view,
            allocation: Some(allocation),
        })
    }

    pub fn destroy(mut self, device: &DeviceContext) {
        unsafe {
            device.device.destroy_image_view(self.view, None);
        }
        if let Some(allocation) = self.allocation.take() {
            let _ = device.allocator().free(allocation);
        }
        unsafe {
            device.device.destroy_image(self.image, None);
        }
    }
}
