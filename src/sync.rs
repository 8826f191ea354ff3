// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync.
// Critical for correct and efficient multi-frame rendering.

use crate::error::FrameError;
use crate::device::DeviceContext;
use ash::vk;
use std::sync::Arc;

/// Per-frame-slot resources: one command buffer plus the synchronization
/// triple that orders its reuse.
///
/// A slot's resources may be re-recorded by the CPU only after its
/// completion fence has signaled. That is the single most important
/// invariant of the whole pipeline.
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    /// Signaled by acquire, waited on by submit at color-attachment-output.
    pub image_available: vk::Semaphore,
    /// Signaled by submit, waited on by present.
    pub render_finished: vk::Semaphore,
    /// Signaled by the GPU when this slot's submission completes.
    pub in_flight_fence: vk::Fence,
}

impl FrameSlot {
    pub fn new(device: &Arc<DeviceContext>, command_buffer: vk::CommandBuffer) -> Result<Self, FrameError> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Pre-signaled: the first wait on a never-submitted slot must not
        // block forever.
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                command_buffer,
                image_available: device
                    .device
                    .create_semaphore(&semaphore_info, None)
                    .map_err(FrameError::Device)?,
                render_finished: device
                    .device
                    .create_semaphore(&semaphore_info, None)
                    .map_err(FrameError::Device)?,
                in_flight_fence: device
                    .device
                    .create_fence(&fence_info, None)
                    .map_err(FrameError::Device)?,
            })
        }
    }

    /// Block until the previous submission through this slot has completed.
    pub fn wait(&self, device: &ash::Device, timeout_ns: u64) -> Result<(), FrameError> {
        let result = unsafe { device.wait_for_fences(&[self.in_flight_fence], true, timeout_ns) };
        match result {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(FrameError::FenceTimeout),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(FrameError::DeviceLost),
            Err(e) => Err(FrameError::Device(e)),
        }
    }

    /// Reset the fence ahead of the next submission. Called only after a
    /// successful acquire; a recreation restart must find it still signaled.
    pub fn reset_fence(&self, device: &ash::Device) -> Result<(), FrameError> {
        unsafe { device.reset_fences(&[self.in_flight_fence]) }.map_err(FrameError::Device)
    }

    pub fn is_signaled(&self, device: &ash::Device) -> bool {
        unsafe { device.get_fence_status(self.in_flight_fence) }.unwrap_or(false)
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// The frame-slot ring: cycles 0, 1, ..., N-1, 0, ...
///
/// Advanced only after a submitted frame; a swapchain-recreation restart
/// leaves the index where it was.
#[derive(Debug, Clone, Copy)]
pub struct FrameCounter {
    current: usize,
    count: usize,
}

impl FrameCounter {
    pub fn new(count: usize) -> Self {
        assert!(count > 0, "at least one frame slot is required");
        Self { current: 0, count }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_cycles_modulo_slot_count() {
        let mut counter = FrameCounter::new(3);
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(counter.current());
            counter.advance();
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn counter_matches_iteration_modulo() {
        let n = 2;
        let mut counter = FrameCounter::new(n);
        for i in 0..100usize {
            assert_eq!(counter.current(), i % n);
            counter.advance();
        }
    }

    #[test]
    fn counter_without_advance_stays_put() {
        // The recreation restart path: no advance, same slot next iteration
        let mut counter = FrameCounter::new(3);
        counter.advance();
        let before = counter.current();
        // ... acquire returns OutOfDate, restart ...
        assert_eq!(counter.current(), before);
    }

    #[test]
    #[should_panic]
    fn zero_slots_is_rejected() {
        let _ = FrameCounter::new(0);
    }
}
