// =============================================================================
// FRAME ORCHESTRATOR - The per-frame control loop
// =============================================================================
//
// FRAME TIMELINE:
//   wait slot fence -> acquire image -> record -> submit -> present -> advance
//
// Staleness routing: out-of-date at acquire time and out-of-date/suboptimal
// at present time both schedule the same recreation path. A recreation
// restart does NOT advance the frame-slot counter.
//
// GPU-side ordering runs entirely through the semaphore graph (acquire ->
// render -> present); the CPU never assumes rendering finished just because
// submit returned. The only CPU blocking points are the per-slot fence wait
// and the synchronous uploader.

use crate::buffer::DepthBuffer;
use crate::command::{CommandRecorder, DrawProducer};
use crate::config::Config;
use crate::descriptor::DescriptorAllocator;
use crate::device::DeviceContext;
use crate::error::{submission_error, FrameError};
use crate::pass;
use crate::swapchain::{Swapchain, SwapchainPreferences};
use crate::sync::{FrameCounter, FrameSlot};
use crate::texture::Texture;
use crate::upload::Uploader;
use ash::vk;
use std::sync::Arc;

/// Per-slot fence wait bound. A frame taking longer than this is treated as
/// a failure rather than blocking the loop forever.
const FENCE_WAIT_TIMEOUT_NS: u64 = 1_000_000_000;

/// Image acquisition bound. A timeout here is recoverable: skip the
/// iteration and retry.
const ACQUIRE_TIMEOUT_NS: u64 = 100_000_000;

/// Descriptor pool capacity for the known maximum of bound objects.
const MAX_DESCRIPTOR_SETS: u32 = 256;

/// What a single `render_frame` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was recorded, submitted, and presented.
    Rendered,
    /// Nothing was rendered (minimized window or acquire timeout); retry
    /// next iteration.
    Skipped,
    /// The swapchain was stale; recreation is scheduled and the frame-slot
    /// counter was not advanced.
    SwapchainStale,
}

/// Disposition of an acquire result. Pure so the routing is testable
/// without a device.
#[derive(Debug)]
pub(crate) enum AcquireAction {
    Use { image_index: u32, stale_hint: bool },
    Recreate,
    Skip,
    Fail(FrameError),
}

pub(crate) fn acquire_action(result: Result<(u32, bool), FrameError>) -> AcquireAction {
    match result {
        Ok((image_index, suboptimal)) => AcquireAction::Use {
            image_index,
            // Suboptimal still yields a usable image; recreate afterwards
            stale_hint: suboptimal,
        },
        Err(FrameError::SwapchainOutOfDate) => AcquireAction::Recreate,
        Err(FrameError::AcquireTimeout) => AcquireAction::Skip,
        Err(e) => AcquireAction::Fail(e),
    }
}

/// Disposition of a present result.
#[derive(Debug)]
pub(crate) enum PresentAction {
    Done { schedule_recreate: bool },
    Fail(FrameError),
}

pub(crate) fn present_action(result: Result<bool, FrameError>) -> PresentAction {
    match result {
        Ok(suboptimal) => PresentAction::Done {
            schedule_recreate: suboptimal,
        },
        Err(FrameError::SwapchainOutOfDate) => PresentAction::Done {
            schedule_recreate: true,
        },
        Err(e) => PresentAction::Fail(e),
    }
}

/// Owns the swapchain, frame slots, recorder, uploader, and descriptor pool,
/// and drives them through the per-frame state machine. Constructed once and
/// passed by reference; destroys its components explicitly in
/// reverse-creation order.
pub struct FramePipeline {
    device: Arc<DeviceContext>,
    config: Config,
    prefs: SwapchainPreferences,

    swapchain: Option<Swapchain>,
    depth: Option<DepthBuffer>,
    render_pass: vk::RenderPass,
    recorder: CommandRecorder,

    command_pool: vk::CommandPool,
    slots: Vec<FrameSlot>,
    counter: FrameCounter,

    uploader: Uploader,
    descriptors: DescriptorAllocator,

    needs_resize: bool,
    is_minimized: bool,
    pending_extent: (u32, u32),
}

impl FramePipeline {
    pub fn new(
        device: Arc<DeviceContext>,
        config: Config,
        width: u32,
        height: u32,
    ) -> Result<Self, FrameError> {
        log::info!("Initializing frame pipeline...");

        if config.graphics.max_frames_in_flight == 0 {
            return Err(FrameError::InvalidArgument(
                "max_frames_in_flight must be at least 1",
            ));
        }

        let prefs = SwapchainPreferences {
            present_mode: config.desired_present_mode(),
            ..Default::default()
        };

        let swapchain = Swapchain::new(device.clone(), prefs, width, height, None)?;
        let render_pass = pass::create_render_pass(&device, swapchain.format)?;
        let recorder = CommandRecorder::new(
            device.clone(),
            render_pass,
            config.graphics.clear_color,
        );
        let depth = DepthBuffer::new(&device, swapchain.extent)?;

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_family)
            .flags(
                vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            );
        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .map_err(FrameError::Device)?;

        // One command buffer per frame slot, not per swapchain image: the
        // two counts are independent.
        let slot_count = config.graphics.max_frames_in_flight;
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(slot_count as u32);
        let command_buffers = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .map_err(FrameError::Device)?;

        let slots = command_buffers
            .into_iter()
            .map(|cmd| FrameSlot::new(&device, cmd))
            .collect::<Result<Vec<_>, _>>()?;

        let uploader = Uploader::new(device.clone(), config.upload_timeout_ns())?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: MAX_DESCRIPTOR_SETS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: MAX_DESCRIPTOR_SETS,
            },
        ];
        let descriptors =
            DescriptorAllocator::new(device.clone(), MAX_DESCRIPTOR_SETS, &pool_sizes, false)?;

        log::info!(
            "Frame pipeline ready: {} slots, {} swapchain images",
            slot_count,
            swapchain.images.len()
        );

        Ok(Self {
            device,
            config,
            prefs,
            swapchain: Some(swapchain),
            depth: Some(depth),
            render_pass,
            recorder,
            command_pool,
            slots,
            counter: FrameCounter::new(slot_count),
            uploader,
            descriptors,
            needs_resize: false,
            is_minimized: false,
            pending_extent: (width, height),
        })
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Render a single frame. Producers are invoked in list order, so the
    /// caller puts the overlay last.
    pub fn render_frame(
        &mut self,
        producers: &mut [&mut dyn DrawProducer],
    ) -> Result<FrameOutcome, FrameError> {
        if self.is_minimized {
            return Ok(FrameOutcome::Skipped);
        }

        if self.needs_resize {
            self.recreate_swapchain()?;
            if self.is_minimized {
                return Ok(FrameOutcome::Skipped);
            }
        }

        let slot_index = self.counter.current();

        // STEP 1: Wait for the previous frame that used this slot. The fence
        // is pre-signaled on first use, so iteration i waits on slot
        // (i mod N)'s completion from iteration i - N.
        self.slots[slot_index].wait(&self.device.device, FENCE_WAIT_TIMEOUT_NS)?;

        // STEP 2: Acquire the next swapchain image
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or(FrameError::InvalidArgument("pipeline has no swapchain"))?;

        let acquired = swapchain
            .acquire_next_image(ACQUIRE_TIMEOUT_NS, self.slots[slot_index].image_available);

        let (image_index, stale_hint) = match acquire_action(acquired) {
            AcquireAction::Use {
                image_index,
                stale_hint,
            } => (image_index, stale_hint),
            AcquireAction::Recreate => {
                // Restart without advancing the slot index; the fence is
                // still signaled, so the retry's wait returns immediately.
                self.needs_resize = true;
                return Ok(FrameOutcome::SwapchainStale);
            }
            AcquireAction::Skip => return Ok(FrameOutcome::Skipped),
            AcquireAction::Fail(e) => return Err(e),
        };
        if stale_hint {
            self.needs_resize = true;
        }

        // STEP 3: Record into this slot's command buffer, targeting whatever
        // image index came back. The framebuffer binds the acquired view and
        // lives only for the recording step.
        let extent = swapchain.extent;
        let image = swapchain.images[image_index as usize];
        let color_view = swapchain.image_views[image_index as usize];
        let depth_view = self
            .depth
            .as_ref()
            .ok_or(FrameError::InvalidArgument("pipeline has no depth buffer"))?
            .view;

        let framebuffer = pass::create_framebuffer(
            &self.device,
            self.render_pass,
            color_view,
            depth_view,
            extent,
        )?;

        let recorded = self.recorder.record(
            self.slots[slot_index].command_buffer,
            framebuffer,
            extent,
            image,
            slot_index,
            image_index,
            producers,
        );

        // The framebuffer is a CPU-side binding descriptor; recording is the
        // last point that reads it.
        unsafe {
            self.device.device.destroy_framebuffer(framebuffer, None);
        }

        // A partially recorded buffer is never submitted
        recorded?;

        // STEP 4: Submit. The fence is reset only now, after every bail-out
        // point, so an abandoned iteration never leaves it unsignaled.
        let slot = &self.slots[slot_index];
        slot.reset_fence(&self.device.device)?;

        let wait_semaphores = [slot.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [slot.render_finished];
        let command_buffers = [slot.command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .device
                .queue_submit(
                    self.device.graphics_queue,
                    &[submit_info.build()],
                    slot.in_flight_fence,
                )
                .map_err(submission_error)?;
        }

        // STEP 5: Present on the present queue, waiting on render completion
        let presented = swapchain.present(
            self.device.present_queue,
            image_index,
            &[slot.render_finished],
        );

        match present_action(presented) {
            PresentAction::Done { schedule_recreate } => {
                if schedule_recreate {
                    self.needs_resize = true;
                }
            }
            PresentAction::Fail(e) => return Err(e),
        }

        // STEP 6: Advance the slot ring - only on the submitted path
        self.counter.advance();

        Ok(FrameOutcome::Rendered)
    }

    // =========================================================================
    // RESIZE / RECREATION
    // =========================================================================

    /// Record a new surface size. The swapchain is recreated at the top of
    /// the next `render_frame`; a zero extent marks the window minimized and
    /// rendering is skipped until a non-zero size arrives.
    pub fn notify_resize(&mut self, width: u32, height: u32) {
        log::debug!("Resize notification: {}x{}", width, height);
        self.pending_extent = (width, height);
        if width == 0 || height == 0 {
            self.is_minimized = true;
        } else {
            self.is_minimized = false;
            self.needs_resize = true;
        }
    }

    /// Tear down and rebuild the swapchain and every extent-dependent
    /// resource. Framebuffers are per-frame transient, so no stale view
    /// handle can survive recreation.
    fn recreate_swapchain(&mut self) -> Result<(), FrameError> {
        let (width, height) = self.pending_extent;
        if width == 0 || height == 0 {
            self.is_minimized = true;
            return Ok(());
        }
        self.is_minimized = false;

        // All in-flight work must retire before extent-dependent resources go
        self.device.wait_idle()?;

        if let Some(depth) = self.depth.take() {
            depth.destroy(&self.device);
        }

        // Old-swapchain handoff: the new chain is created while the old one
        // still exists, then the old one is retired.
        let old = self.swapchain.take();
        let old_format = old.as_ref().map(|o| o.format);
        let new = Swapchain::new(
            self.device.clone(),
            self.prefs,
            width,
            height,
            old.as_ref(),
        )?;
        drop(old);

        // A surface format change invalidates the render pass too
        if old_format != Some(new.format) {
            unsafe {
                self.device.device.destroy_render_pass(self.render_pass, None);
            }
            self.render_pass = pass::create_render_pass(&self.device, new.format)?;
            self.recorder.set_render_pass(self.render_pass);
        }

        self.depth = Some(DepthBuffer::new(&self.device, new.extent)?);
        self.swapchain = Some(new);
        self.needs_resize = false;

        Ok(())
    }

    // =========================================================================
    // ACCESSORS / COLLABORATOR SURFACE
    // =========================================================================

    pub fn device(&self) -> &Arc<DeviceContext> {
        &self.device
    }

    pub fn graphics_command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    pub fn descriptors(&mut self) -> &mut DescriptorAllocator {
        &mut self.descriptors
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.swapchain.as_ref().map(|s| s.extent)
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.config.graphics.clear_color
    }

    /// Create a sampled texture from decoded RGBA8 pixels (blocking upload).
    pub fn create_texture(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Texture, FrameError> {
        Texture::from_rgba8(&self.device, &self.uploader, pixels, width, height)
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        log::info!("Destroying frame pipeline...");

        // Nothing below may be destroyed while a frame is still in flight
        let _ = self.device.wait_idle();
        debug_assert!(
            self.slots
                .iter()
                .all(|slot| slot.is_signaled(&self.device.device)),
            "frame fence unsignaled after device idle"
        );

        unsafe {
            for slot in &self.slots {
                slot.destroy(&self.device.device);
            }
            // Also frees the per-slot command buffers
            self.device.device.destroy_command_pool(self.command_pool, None);
            self.device.device.destroy_render_pass(self.render_pass, None);
        }

        if let Some(depth) = self.depth.take() {
            depth.destroy(&self.device);
        }
        self.swapchain = None;

        self.descriptors.destroy();
        self.uploader.destroy();

        log::info!("Frame pipeline destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_suboptimal_still_uses_the_image() {
        match acquire_action(Ok((2, true))) {
            AcquireAction::Use {
                image_index,
                stale_hint,
            } => {
                assert_eq!(image_index, 2);
                assert!(stale_hint);
            }
            other => panic!("expected Use, got {:?}", other),
        }
    }

    #[test]
    fn acquire_out_of_date_triggers_recreation() {
        assert!(matches!(
            acquire_action(Err(FrameError::SwapchainOutOfDate)),
            AcquireAction::Recreate
        ));
    }

    #[test]
    fn acquire_timeout_skips_the_iteration() {
        assert!(matches!(
            acquire_action(Err(FrameError::AcquireTimeout)),
            AcquireAction::Skip
        ));
    }

    #[test]
    fn acquire_device_loss_is_fatal() {
        assert!(matches!(
            acquire_action(Err(FrameError::DeviceLost)),
            AcquireAction::Fail(FrameError::DeviceLost)
        ));
    }

    #[test]
    fn present_staleness_schedules_recreation_without_failing() {
        assert!(matches!(
            present_action(Ok(true)),
            PresentAction::Done {
                schedule_recreate: true
            }
        ));
        assert!(matches!(
            present_action(Err(FrameError::SwapchainOutOfDate)),
            PresentAction::Done {
                schedule_recreate: true
            }
        ));
        assert!(matches!(
            present_action(Ok(false)),
            PresentAction::Done {
                schedule_recreate: false
            }
        ));
    }

    #[test]
    fn present_hard_errors_propagate() {
        assert!(matches!(
            present_action(Err(FrameError::Presentation(
                ash::vk::Result::ERROR_SURFACE_LOST_KHR
            ))),
            PresentAction::Fail(FrameError::Presentation(_))
        ));
    }
}
