//! Synchronization primitives for GPU/CPU coordination
//!
//! RAII wrappers over Vulkan semaphores and fences. Semaphores order work
//! between queue operations on the GPU; fences let the CPU block on GPU
//! completion and are what bounds the number of frames in flight.

use crate::error::{RenderError, RenderResult};
use ash::{vk, Device};

/// Upper bound for fence waits, in nanoseconds
///
/// An infinite wait would hang forever on a lost device. One second is far
/// beyond any healthy frame or upload, so hitting it is treated as fatal by
/// callers.
pub const FENCE_TIMEOUT_NS: u64 = 1_000_000_000;

/// GPU-GPU synchronization primitive with automatic cleanup
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new binary semaphore
    pub fn new(device: Device) -> RenderResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            device
                .create_semaphore(&create_info, None)
                .map_err(RenderError::Api)?
        };

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// CPU-waitable fence with automatic cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence, optionally in the signaled state
    ///
    /// Frame fences start signaled so the first wait on a slot that has
    /// never been submitted returns immediately.
    pub fn new(device: Device, signaled: bool) -> RenderResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            device
                .create_fence(&create_info, None)
                .map_err(RenderError::Api)?
        };

        Ok(Self { device, fence })
    }

    /// Block until the fence signals or the timeout elapses
    pub fn wait(&self, timeout: u64) -> RenderResult<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, timeout)
                .map_err(RenderError::Api)
        }
    }

    /// Return the fence to the unsignaled state
    pub fn reset(&self) -> RenderResult<()> {
        unsafe {
            self.device
                .reset_fences(&[self.fence])
                .map_err(RenderError::Api)
        }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}
