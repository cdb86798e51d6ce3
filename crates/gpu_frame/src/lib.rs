//! # gpu_frame
//!
//! GPU frame lifecycle and resource upload layer built on Vulkan.
//!
//! The crate drives multi-buffered rendering: it owns the swapchain, the
//! per-frame synchronization ring, per-queue command buffer pools, a
//! staging uploader for device-local resources and pooled shader resource
//! groups. Window creation, input, asset import and math live elsewhere;
//! this layer consumes a raw window handle and byte payloads through
//! narrow interfaces.
//!
//! ## Frame loop
//!
//! The host calls [`RenderDevice::begin_frame`], records into the returned
//! command buffer, then calls [`RenderDevice::end_frame`]. Out-of-date and
//! suboptimal surfaces are handled internally with a full stop-the-world
//! swapchain rebuild; the caller sees at most one skipped frame.
//!
//! ## Uploads
//!
//! [`RenderDevice::send_buffer`] and [`RenderDevice::send_texture`] stage
//! payloads and hand back arena handles immediately; the data becomes valid
//! once the blocking [`RenderDevice::upload`] has run on a transfer queue.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod binding;
pub mod buffer;
pub mod commands;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod frame;
pub mod queue;
pub mod slot_pool;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod upload;

pub use binding::{
    BindGroupLayout, BindGroupLayoutBuilder, BindingDesc, ShaderResourceGroup,
    ShaderResourceGroupPool,
};
pub use buffer::Buffer;
pub use commands::CommandAllocator;
pub use config::{ConfigError, RenderConfig};
pub use context::{LogicalDevice, PhysicalDeviceInfo, VulkanContext, VulkanInstance};
pub use device::{
    BindGroupPoolHandle, BufferHandle, FrameSubmission, RenderDevice, TextureHandle,
};
pub use error::{RenderError, RenderResult};
pub use frame::{FrameContext, FrameStatus};
pub use queue::{CommandQueue, QueueCapabilities, QueueFamilyInfo};
pub use slot_pool::SlotPool;
pub use swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
pub use sync::{Fence, Semaphore};
pub use texture::{mip_level_count, Texture, TextureDescription};
pub use upload::{BufferUploadPayload, DeviceMemoryUploader};
