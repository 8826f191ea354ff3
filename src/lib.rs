// vkframe - Frame pipelining and GPU resource lifecycle core
//
// Design: Thin wrapper around ash with explicit ownership and typed errors.
// The host application drives `FramePipeline::render_frame` once per loop
// iteration and feeds it draw producers; everything GPU-lifecycle-shaped
// (swapchain, frame slots, staged uploads, descriptor pools) lives here.

pub mod buffer;
pub mod command;
pub mod config;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod frame;
pub mod pass;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod timestep;
pub mod upload;

pub use command::DrawProducer;
pub use config::Config;
pub use descriptor::DescriptorAllocator;
pub use device::DeviceContext;
pub use error::FrameError;
pub use frame::{FrameOutcome, FramePipeline};
pub use swapchain::{Swapchain, SwapchainPreferences};
pub use texture::Texture;
pub use timestep::FixedTimestep;
pub use upload::{TransferBarrier, Uploader};
