// Sampled textures
//
// Built from already-decoded RGBA8 pixel data handed over by collaborators;
// file parsing never happens in this crate.

use crate::device::DeviceContext;
use crate::error::FrameError;
use crate::upload::{TransferBarrier, Uploader};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

pub struct Texture {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub extent: vk::Extent2D,
    allocation: Option<Allocation>,
}

impl Texture {
    /// Create a device-local RGBA8 texture and fill it through the staged
    /// upload path. Ownership passes to the caller once this returns.
    pub fn from_rgba8(
        device: &DeviceContext,
        uploader: &Uploader,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(FrameError::InvalidArgument(
                "pixel data does not match width * height * 4",
            ));
        }

        let extent = vk::Extent2D { width, height };

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(vk::Format::R8G8B8A8_SRGB)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .map_err(FrameError::Device)?;

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };

        let allocation = match device.allocator().allocate(&AllocationCreateDesc {
            name: "texture",
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

        // Blocking upload; the image is shader-readable once this returns
        if let Err(e) = uploader.upload_to_image(
            pixels,
            image,
            extent,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            TransferBarrier {
                current_access: vk::AccessFlags::empty(),
                new_access: vk::AccessFlags::SHADER_READ,
                generating_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                consuming_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            },
        ) {
            let _ = device.allocator().free(allocation);
            unsafe { device.device.destroy_image(image, None) };
            return Err(e);
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(vk::Format::R8G8B8A8_SRGB)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
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

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .max_lod(vk::LOD_CLAMP_NONE);

        let sampler = match unsafe { device.device.create_sampler(&sampler_info, None) } {
            Ok(sampler) => sampler,
            Err(e) => {
                unsafe { device.device.destroy_image_view(view, None) };
                let _ = device.allocator().free(allocation);
                unsafe { device.device.destroy_image(image, None) };
                return Err(FrameError::Device(e));
            }
        };

        Ok(Self {
            image,
            view,
            sampler,
            extent,
            allocation: Some(allocation),
        })
    }

    pub fn destroy(mut self, device: &DeviceContext) {
        unsafe {
            device.device.destroy_sampler(self.sampler, None);
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
