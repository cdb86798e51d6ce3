//! Command pool and command buffer management
//!
//! [`CommandAllocator`] owns one native pool per hardware queue and a fixed
//! set of pre-allocated primary command buffers, one per frame slot. The
//! pool is created with per-buffer reset capability so a single slot can be
//! re-recorded without disturbing buffers the GPU is still reading.

use crate::error::{RenderError, RenderResult};
use crate::sync::{Fence, FENCE_TIMEOUT_NS};
use ash::{vk, Device};

/// Fixed-size pool of command buffers bound to one queue family
pub struct CommandAllocator {
    device: Device,
    queue_family_index: u32,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

impl CommandAllocator {
    /// Create the native pool and pre-allocate `count` primary buffers
    pub fn new(device: Device, queue_family_index: u32, count: u32) -> RenderResult<Self> {
        debug_assert!(count > 0, "command allocator needs at least one slot");

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let pool = unsafe {
            device
                .create_command_pool(&pool_info, None)
                .map_err(RenderError::Api)?
        };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = match unsafe { device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers,
            Err(err) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(RenderError::Api(err));
            }
        };

        log::debug!(
            "Created command allocator: family {}, {} buffers",
            queue_family_index,
            count
        );

        Ok(Self {
            device,
            queue_family_index,
            pool,
            buffers,
        })
    }

    /// Get the command buffer for `frame_slot`
    ///
    /// O(1) lookup into the pre-allocated set. The slot must be in range;
    /// out-of-range slots are a caller bug.
    pub fn open(&self, frame_slot: usize) -> vk::CommandBuffer {
        assert!(
            frame_slot < self.buffers.len(),
            "frame slot {} out of range ({} buffers)",
            frame_slot,
            self.buffers.len()
        );
        self.buffers[frame_slot]
    }

    /// Reset a previously recorded buffer so it can be re-recorded
    pub fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> RenderResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(buffer, vk::CommandBufferResetFlags::empty())
                .map_err(RenderError::Api)
        }
    }

    /// Begin recording into `buffer`
    pub fn begin(&self, buffer: vk::CommandBuffer) -> RenderResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe {
            self.device
                .begin_command_buffer(buffer, &begin_info)
                .map_err(RenderError::Api)
        }
    }

    /// Finish recording into `buffer`
    pub fn end(&self, buffer: vk::CommandBuffer) -> RenderResult<()> {
        unsafe {
            self.device
                .end_command_buffer(buffer)
                .map_err(RenderError::Api)
        }
    }

    /// Number of pre-allocated buffers
    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    /// Queue family the pool was created for
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }
}

impl Drop for CommandAllocator {
    fn drop(&mut self) {
        // Destroying the pool frees every buffer allocated from it. The
        // owning device must have waited its frame fences first.
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Single-use command buffer on its own throwaway pool
///
/// Used for blocking transfer submissions: record once, submit with a fresh
/// fence, wait, destroy. Recording starts as soon as the object is created.
pub struct OneShotCommands {
    device: Device,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
}

impl OneShotCommands {
    /// Create a transient pool, allocate one buffer and begin recording
    pub fn begin(device: Device, queue_family_index: u32) -> RenderResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(queue_family_index);

        let pool = unsafe {
            device
                .create_command_pool(&pool_info, None)
                .map_err(RenderError::Api)?
        };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffer = match unsafe { device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(err) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(RenderError::Api(err));
            }
        };

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            device
                .begin_command_buffer(buffer, &begin_info)
                .map_err(RenderError::Api)?;
        }

        Ok(Self {
            device,
            pool,
            buffer,
        })
    }

    /// The buffer currently being recorded
    pub fn buffer(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// End recording, submit to `queue` and block until the fence signals
    pub fn submit_and_wait(self, queue: vk::Queue) -> RenderResult<()> {
        unsafe {
            self.device
                .end_command_buffer(self.buffer)
                .map_err(RenderError::Api)?;
        }

        let fence = Fence::new(self.device.clone(), false)?;

        let command_buffers = [self.buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

        unsafe {
            self.device
                .queue_submit(queue, &[submit_info.build()], fence.handle())
                .map_err(RenderError::Api)?;
        }

        fence.wait(FENCE_TIMEOUT_NS)?;
        Ok(())
    }
}

impl Drop for OneShotCommands {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}
