// Error taxonomy for the frame pipeline
//
// Swapchain staleness is recoverable and handled inside the orchestrator;
// everything else propagates to the host as a failed frame.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    /// Surface capability / format / present-mode enumeration itself failed.
    /// Distinct from "desired value unsupported", which degrades instead.
    #[error("surface capability query failed: {0}")]
    SurfaceCapability(vk::Result),

    /// The swapchain no longer matches the surface; recreate and retry.
    #[error("swapchain out of date")]
    SwapchainOutOfDate,

    /// The swapchain still works but should be recreated when convenient.
    #[error("swapchain suboptimal for the surface")]
    SwapchainSuboptimal,

    /// Image acquisition timed out; retry next loop iteration.
    #[error("swapchain image acquisition timed out")]
    AcquireTimeout,

    /// A frame-slot completion fence did not signal within its timeout.
    #[error("frame completion fence wait timed out")]
    FenceTimeout,

    #[error("command buffer recording failed: {0}")]
    CommandRecording(vk::Result),

    #[error("queue submission failed: {0}")]
    Submission(vk::Result),

    #[error("presentation failed: {0}")]
    Presentation(vk::Result),

    /// The one-shot upload fence did not signal within the upload timeout.
    #[error("staged upload did not complete within the timeout")]
    UploadTimeout,

    #[error("staging buffer allocation failed: {0}")]
    StagingAllocation(String),

    /// Device memory allocation failed outside the staging path.
    #[error("device memory allocation failed: {0}")]
    DeviceMemory(String),

    /// Descriptor pool capacity exhausted. Pools do not auto-grow; size them
    /// for the known maximum up front.
    #[error("descriptor pool exhausted")]
    PoolExhausted,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The logical device was lost. Not recoverable within this process.
    #[error("device lost")]
    DeviceLost,

    /// Residual driver failure (bootstrap, resource creation, teardown).
    #[error("vulkan call failed: {0}")]
    Device(vk::Result),
}

impl From<vk::Result> for FrameError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => FrameError::SwapchainOutOfDate,
            vk::Result::SUBOPTIMAL_KHR => FrameError::SwapchainSuboptimal,
            vk::Result::ERROR_DEVICE_LOST => FrameError::DeviceLost,
            vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                FrameError::PoolExhausted
            }
            vk::Result::TIMEOUT => FrameError::AcquireTimeout,
            other => FrameError::Device(other),
        }
    }
}

impl From<gpu_allocator::AllocationError> for FrameError {
    fn from(err: gpu_allocator::AllocationError) -> Self {
        FrameError::DeviceMemory(err.to_string())
    }
}

impl FrameError {
    /// Whether the orchestrator handles this locally by recreating the
    /// swapchain rather than surfacing it to the host.
    pub fn is_swapchain_stale(&self) -> bool {
        matches!(
            self,
            FrameError::SwapchainOutOfDate | FrameError::SwapchainSuboptimal
        )
    }
}

/// Classify a submission failure, keeping device loss distinct.
pub(crate) fn submission_error(result: vk::Result) -> FrameError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => FrameError::DeviceLost,
        other => FrameError::Submission(other),
    }
}

/// Classify a recording failure, keeping device loss distinct.
pub(crate) fn recording_error(result: vk::Result) -> FrameError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => FrameError::DeviceLost,
        other => FrameError::CommandRecording(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_maps_to_recoverable_variant() {
        let err = FrameError::from(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(matches!(err, FrameError::SwapchainOutOfDate));
        assert!(err.is_swapchain_stale());
    }

    #[test]
    fn pool_exhaustion_maps_from_both_driver_codes() {
        assert!(matches!(
            FrameError::from(vk::Result::ERROR_OUT_OF_POOL_MEMORY),
            FrameError::PoolExhausted
        ));
        assert!(matches!(
            FrameError::from(vk::Result::ERROR_FRAGMENTED_POOL),
            FrameError::PoolExhausted
        ));
    }

    #[test]
    fn device_lost_is_never_reclassified() {
        assert!(matches!(
            submission_error(vk::Result::ERROR_DEVICE_LOST),
            FrameError::DeviceLost
        ));
        assert!(matches!(
            recording_error(vk::Result::ERROR_DEVICE_LOST),
            FrameError::DeviceLost
        ));
        assert!(matches!(
            submission_error(vk::Result::ERROR_OUT_OF_HOST_MEMORY),
            FrameError::Submission(_)
        ));
    }

    #[test]
    fn acquire_timeout_is_not_fatal() {
        assert!(matches!(
            FrameError::from(vk::Result::TIMEOUT),
            FrameError::AcquireTimeout
        ));
    }
}
