// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Selection rules (format, present mode, extent, image count) are pure
// functions so the degradation behavior is testable without a device.

use crate::device::DeviceContext;
use crate::error::FrameError;
use ash::vk;
use std::sync::Arc;

/// Desired swapchain properties. Degraded, never fatal, when unsupported.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainPreferences {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
}

impl Default for SwapchainPreferences {
    fn default() -> Self {
        Self {
            format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            present_mode: vk::PresentModeKHR::FIFO,
        }
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    device: Arc<DeviceContext>,
}

impl Swapchain {
    /// Create a swapchain for the context's surface.
    ///
    /// `old` is the retiring chain during recreation: its handle is passed
    /// through so the driver can reuse resources, and the caller drops the
    /// old instance only after this returns. There is never a gap with no
    /// presentable images.
    pub fn new(
        device: Arc<DeviceContext>,
        prefs: SwapchainPreferences,
        width: u32,
        height: u32,
        old: Option<&Swapchain>,
    ) -> Result<Self, FrameError> {
        log::info!("Creating swapchain: {}x{}", width, height);

        let surface_caps = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_capabilities(device.physical_device, device.surface)
        }
        .map_err(FrameError::SurfaceCapability)?;

        let formats = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_formats(device.physical_device, device.surface)
        }
        .map_err(FrameError::SurfaceCapability)?;

        let present_modes = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_present_modes(device.physical_device, device.surface)
        }
        .map_err(FrameError::SurfaceCapability)?;

        if formats.is_empty() {
            return Err(FrameError::SurfaceCapability(
                vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
            ));
        }

        let surface_format = choose_surface_format(&formats, prefs.format);
        let present_mode = choose_present_mode(&present_modes, prefs.present_mode);
        if present_mode != prefs.present_mode {
            log::warn!(
                "Present mode {:?} unsupported, degraded to {:?}",
                prefs.present_mode,
                present_mode
            );
        }
        let extent = choose_extent(&surface_caps, width, height);
        let image_count =
            choose_image_count(surface_caps.min_image_count, surface_caps.max_image_count);

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        // Swapchain images stay EXCLUSIVE to one family at a time; the
        // command recorder issues ownership-transfer barriers when the
        // graphics and present families differ.
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old.map_or(vk::SwapchainKHR::null(), |o| o.swapchain));

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(FrameError::from)?;

        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(FrameError::from)?;

        log::info!(
            "Created swapchain with {} images, {:?}, {:?}",
            images.len(),
            surface_format.format,
            present_mode
        );

        let image_views = images
            .iter()
            .map(|&image| {
                let create_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping {
                        r: vk::ComponentSwizzle::IDENTITY,
                        g: vk::ComponentSwizzle::IDENTITY,
                        b: vk::ComponentSwizzle::IDENTITY,
                        a: vk::ComponentSwizzle::IDENTITY,
                    })
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                unsafe { device.device.create_image_view(&create_info, None) }
                    .map_err(FrameError::Device)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            image_views,
            format: surface_format.format,
            extent,
            present_mode,
            device,
        })
    }

    /// Acquire the next presentable image.
    ///
    /// Returns the image index and a suboptimal hint. Suboptimal still yields
    /// a usable image; `SwapchainOutOfDate` means recreate and retry, and
    /// `AcquireTimeout` means skip this iteration.
    ///
    /// The image index is decoupled from the frame-slot index: the number of
    /// frames in flight need not match the number of swapchain images.
    pub fn acquire_next_image(
        &self,
        timeout_ns: u64,
        signal_semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), FrameError> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout_ns,
                signal_semaphore,
                vk::Fence::null(),
            )
        };

        result.map_err(FrameError::from)
    }

    /// Present a rendered image.
    ///
    /// `Ok(true)` means suboptimal (usable, recreate when convenient);
    /// out-of-date is returned distinctly so the orchestrator can route both
    /// staleness signals through the same recreation path.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool, FrameError> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.swapchain_loader
                .queue_present(queue, &present_info)
        };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(FrameError::SwapchainOutOfDate),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(FrameError::DeviceLost),
            Err(e) => Err(FrameError::Presentation(e)),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        // Caller guarantees the device is idle with respect to these images
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Choose a surface format, degrading in preference order: exact match,
/// same pixel format with a different color space, first available.
/// Total for any non-empty list.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    desired: vk::SurfaceFormatKHR,
) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .find(|f| f.format == desired.format && f.color_space == desired.color_space)
        .or_else(|| formats.iter().find(|f| f.format == desired.format))
        .or_else(|| formats.first())
        .copied()
        .expect("caller checks for a non-empty format list")
}

/// Choose a present mode, degrading to FIFO which is always supported.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    desired: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == desired)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Choose the swap extent. A fixed current extent is used as-is; the
/// adaptive sentinel (u32::MAX) means the requested size, clamped into the
/// surface's supported range.
pub fn choose_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// Request min+1 images (triple-buffering preference), clamped to the
/// surface maximum. A maximum of 0 means unbounded.
pub fn choose_image_count(min_image_count: u32, max_image_count: u32) -> u32 {
    let mut count = min_image_count + 1;
    if max_image_count > 0 && count > max_image_count {
        count = max_image_count;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn format_exact_match_wins() {
        let desired = fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let available = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            desired,
        ];
        assert_eq!(choose_surface_format(&available, desired), desired);
    }

    #[test]
    fn format_degrades_to_same_format_other_color_space() {
        let desired = fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let other_space = fmt(
            vk::Format::B8G8R8A8_SRGB,
            vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        );
        let available = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            other_space,
        ];
        assert_eq!(choose_surface_format(&available, desired), other_space);
    }

    #[test]
    fn format_selection_is_total_for_non_empty_lists() {
        let desired = fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let available = [fmt(
            vk::Format::R5G6B5_UNORM_PACK16,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )];
        // Nothing matches; falls through to the first available
        assert_eq!(choose_surface_format(&available, desired), available[0]);
    }

    #[test]
    fn present_mode_degrades_to_fifo() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(
            choose_present_mode(&available, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&available, vk::PresentModeKHR::FIFO_RELAXED),
            vk::PresentModeKHR::FIFO_RELAXED
        );
    }

    #[test]
    fn extent_is_idempotent_for_fixed_surfaces() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            ..Default::default()
        };
        // Requested size is ignored when the surface reports a fixed extent
        let chosen = choose_extent(&caps, 4096, 4096);
        assert_eq!(chosen, caps.current_extent);
        assert_eq!(choose_extent(&caps, 1, 1), caps.current_extent);
    }

    #[test]
    fn extent_clamps_when_surface_is_adaptive() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 2048,
                height: 2048,
            },
            ..Default::default()
        };
        assert_eq!(
            choose_extent(&caps, 4096, 32),
            vk::Extent2D {
                width: 2048,
                height: 64
            }
        );
        assert_eq!(
            choose_extent(&caps, 800, 600),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
    }

    #[test]
    fn image_count_prefers_triple_buffering() {
        // min=2, max=0 (unbounded): request 3
        assert_eq!(choose_image_count(2, 0), 3);
        // min=2, max=3: request 3
        assert_eq!(choose_image_count(2, 3), 3);
        // min=2, max=2: clamped to 2
        assert_eq!(choose_image_count(2, 2), 2);
        // min=4, max=8: request 5
        assert_eq!(choose_image_count(4, 8), 5);
    }
}
