//! Render device facade
//!
//! Single entry point owning the context, swapchain, frame ring, command
//! allocator, uploader and shader resource group pools. Resources created
//! through the facade live in generational arenas and are addressed by
//! copyable handles; a handle whose resource was destroyed simply stops
//! resolving instead of dangling.
//!
//! The facade and everything it owns belong to one render thread. No
//! internal locking is performed; callers serialize access.

use crate::binding::{BindGroupLayoutBuilder, ShaderResourceGroupPool};
use crate::buffer::Buffer;
use crate::commands::CommandAllocator;
use crate::config::RenderConfig;
use crate::context::VulkanContext;
use crate::error::{RenderError, RenderResult};
use crate::frame::{FrameContext, FrameStatus};
use crate::queue::{CommandQueue, QueueCapabilities};
use crate::swapchain::Swapchain;
use crate::texture::{Texture, TextureDescription};
use crate::upload::{BufferUploadPayload, DeviceMemoryUploader};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Arena handle for a device-owned buffer
    pub struct BufferHandle;
    /// Arena handle for a device-owned texture
    pub struct TextureHandle;
    /// Arena handle for a shader resource group pool
    pub struct BindGroupPoolHandle;
}

/// A frame opened by `begin_frame`, carrying what recording needs
#[derive(Debug, Clone, Copy)]
pub struct FrameSubmission {
    /// Command buffer opened and reset for this frame slot
    pub command_buffer: vk::CommandBuffer,
    /// Ring position of the frame slot
    pub frame_slot: usize,
    /// Swapchain image index acquired for this frame
    pub image_index: u32,
}

/// Owner of the GPU frame lifecycle and every pooled resource
pub struct RenderDevice {
    // Declaration order is drop order: arenas and pools first, then frame
    // sync objects and the swapchain, the context last.
    buffers: SlotMap<BufferHandle, Buffer>,
    textures: SlotMap<TextureHandle, Texture>,
    bind_group_pools: SlotMap<BindGroupPoolHandle, ShaderResourceGroupPool>,
    uploader: DeviceMemoryUploader,
    graphics_commands: CommandAllocator,
    frame: FrameContext,
    swapchain: Swapchain,
    context: VulkanContext,
    default_bind_group_capacity: u32,
    resize_request: Option<vk::Extent2D>,
}

impl RenderDevice {
    /// Create the context, swapchain, frame ring and command allocator
    ///
    /// `window_extent` is the client-area size reported by the display
    /// layer, used when the surface leaves the extent to the application.
    pub fn new(
        window: &(impl HasRawWindowHandle + HasRawDisplayHandle),
        window_extent: vk::Extent2D,
        config: &RenderConfig,
    ) -> RenderResult<Self> {
        config
            .validate()
            .map_err(|e| RenderError::InitializationFailed(e.to_string()))?;

        let context = VulkanContext::new(window, config)?;

        let swapchain = Swapchain::new(
            context.instance(),
            context.raw_device(),
            context.physical().device,
            context.surface(),
            context.surface_loader(),
            window_extent,
            config.prefer_mailbox,
        )?;

        let frame = FrameContext::new(
            context.raw_device(),
            config.frames_in_flight as usize,
            swapchain.image_count() as usize,
        )?;

        let graphics_commands = CommandAllocator::new(
            context.raw_device(),
            context.physical().graphics_family,
            config.frames_in_flight,
        )?;

        Ok(Self {
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            bind_group_pools: SlotMap::with_key(),
            uploader: DeviceMemoryUploader::new(),
            graphics_commands,
            frame,
            swapchain,
            context,
            default_bind_group_capacity: config.max_bind_groups,
            resize_request: None,
        })
    }

    /// Acquire the next image and open the frame slot's command buffer
    ///
    /// Returns `None` when the frame must be skipped because the swapchain
    /// was just recreated; the caller simply tries again next iteration.
    pub fn begin_frame(&mut self) -> RenderResult<Option<FrameSubmission>> {
        if let Some(extent) = self.resize_request.take() {
            self.recreate_swapchain(extent.width, extent.height)?;
        }

        let status = self.frame.acquire_next_frame(&self.swapchain)?;
        if status.out_of_date {
            let extent = self.swapchain.extent();
            self.recreate_swapchain(extent.width, extent.height)?;
            return Ok(None);
        }

        self.frame.wait_for_image()?;

        let command_buffer = self.graphics_commands.open(self.frame.current_frame());
        self.graphics_commands.reset_command_buffer(command_buffer)?;
        self.graphics_commands.begin(command_buffer)?;

        Ok(Some(FrameSubmission {
            command_buffer,
            frame_slot: self.frame.current_frame(),
            image_index: self.frame.frame_index(),
        }))
    }

    /// Submit the recorded frame, present it and step the ring
    ///
    /// Blocks on the frame slot's fence after presenting, which bounds the
    /// number of in-flight frames to the ring depth.
    pub fn end_frame(&mut self, submission: FrameSubmission) -> RenderResult<()> {
        self.graphics_commands.end(submission.command_buffer)?;

        self.frame
            .submit(self.context.graphics_queue().handle, submission.command_buffer)?;
        let status = self
            .frame
            .present(&self.swapchain, self.context.present_queue().handle)?;

        self.frame.wait_current_fence()?;
        self.frame.next_frame();

        if status.needs_recreate() || self.resize_request.is_some() {
            let extent = self
                .resize_request
                .take()
                .unwrap_or_else(|| self.swapchain.extent());
            self.recreate_swapchain(extent.width, extent.height)?;
        }
        Ok(())
    }

    /// Note a client-area resize; applied at the next frame boundary
    pub fn request_resize(&mut self, width: u32, height: u32) {
        self.resize_request = Some(vk::Extent2D { width, height });
    }

    /// Stop-the-world swapchain rebuild at new dimensions
    ///
    /// Drains the device, rebuilds the image chain and resets the per-image
    /// fence table. Image views handed out earlier are invalid afterwards.
    pub fn recreate_swapchain(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.context.wait_idle()?;
        self.swapchain.recreate(
            self.context.physical().device,
            self.context.surface(),
            self.context.surface_loader(),
            vk::Extent2D { width, height },
        )?;
        self.frame.reset_images(self.swapchain.image_count() as usize);
        Ok(())
    }

    /// Create a buffer owned by the device
    pub fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> RenderResult<BufferHandle> {
        let buffer = Buffer::new(
            self.context.raw_device(),
            self.context.instance(),
            self.context.physical().device,
            size,
            usage,
            properties,
        )?;
        Ok(self.buffers.insert(buffer))
    }

    /// Destroy a buffer; the handle stops resolving afterwards
    pub fn destroy_buffer(&mut self, handle: BufferHandle) -> RenderResult<()> {
        self.buffers
            .remove(handle)
            .map(drop)
            .ok_or(RenderError::StaleHandle { kind: "buffer" })
    }

    /// Resolve a buffer handle
    pub fn buffer(&self, handle: BufferHandle) -> Option<&Buffer> {
        self.buffers.get(handle)
    }

    /// Create a texture owned by the device
    pub fn create_texture(
        &mut self,
        description: &TextureDescription,
    ) -> RenderResult<TextureHandle> {
        let texture = Texture::new(
            self.context.raw_device(),
            self.context.instance(),
            self.context.physical().device,
            description,
        )?;
        Ok(self.textures.insert(texture))
    }

    /// Destroy a texture; the handle stops resolving afterwards
    pub fn destroy_texture(&mut self, handle: TextureHandle) -> RenderResult<()> {
        self.textures
            .remove(handle)
            .map(drop)
            .ok_or(RenderError::StaleHandle { kind: "texture" })
    }

    /// Resolve a texture handle
    pub fn texture(&self, handle: TextureHandle) -> Option<&Texture> {
        self.textures.get(handle)
    }

    /// Stage a buffer upload; contents are valid once `upload()` has run
    pub fn send_buffer(&mut self, payload: &BufferUploadPayload<'_>) -> RenderResult<BufferHandle> {
        let buffer = self.uploader.send_buffer(&self.context, payload)?;
        Ok(self.buffers.insert(buffer))
    }

    /// Stage a texture upload; contents are valid once `upload()` has run
    pub fn send_texture(
        &mut self,
        data: &[u8],
        description: &TextureDescription,
    ) -> RenderResult<TextureHandle> {
        let texture = self.uploader.send_texture(&self.context, data, description)?;
        Ok(self.textures.insert(texture))
    }

    /// Execute every staged upload, blocking until the GPU finishes
    pub fn upload(&mut self) -> RenderResult<()> {
        self.uploader.upload(&self.context)
    }

    /// Number of staged uploads not yet executed
    pub fn pending_uploads(&self) -> usize {
        self.uploader.pending_uploads()
    }

    /// Create a shader resource group pool for the built layout
    ///
    /// `max_groups` falls back to the configured default capacity.
    pub fn create_bind_group_pool(
        &mut self,
        layout: BindGroupLayoutBuilder,
        max_groups: Option<u32>,
    ) -> RenderResult<BindGroupPoolHandle> {
        let layout = layout.build(self.context.device())?;
        let pool = ShaderResourceGroupPool::new(
            self.context.raw_device(),
            layout,
            max_groups.unwrap_or(self.default_bind_group_capacity),
        )?;
        Ok(self.bind_group_pools.insert(pool))
    }

    /// Destroy a pool and every group allocated from it
    pub fn destroy_bind_group_pool(&mut self, handle: BindGroupPoolHandle) -> RenderResult<()> {
        self.bind_group_pools
            .remove(handle)
            .map(drop)
            .ok_or(RenderError::StaleHandle {
                kind: "bind group pool",
            })
    }

    /// Resolve a pool handle
    pub fn bind_group_pool(&self, handle: BindGroupPoolHandle) -> Option<&ShaderResourceGroupPool> {
        self.bind_group_pools.get(handle)
    }

    /// Mutably resolve a pool handle
    pub fn bind_group_pool_mut(
        &mut self,
        handle: BindGroupPoolHandle,
    ) -> Option<&mut ShaderResourceGroupPool> {
        self.bind_group_pools.get_mut(handle)
    }

    /// Queues created on the device, filtered by capability
    pub fn queues_with(&self, capabilities: QueueCapabilities) -> Vec<CommandQueue> {
        self.context.queues_with(capabilities)
    }

    /// Flags accumulated for the frame being recorded
    pub fn frame_status(&self) -> FrameStatus {
        self.frame.status()
    }

    /// Borrow the swapchain for render target setup
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Borrow the frame ring
    pub fn frame(&self) -> &FrameContext {
        &self.frame
    }

    /// Borrow the context for direct queue or device access
    pub fn context(&self) -> &VulkanContext {
        &self.context
    }

    /// Block until every queue drains; used on shutdown and resize
    pub fn wait_idle(&self) -> RenderResult<()> {
        self.context.wait_idle()
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        // Owned pools and arenas destroy native objects in their own Drop
        // impls; nothing may still be executing when that happens.
        if let Err(err) = self.context.wait_idle() {
            log::error!("wait_idle failed during device teardown: {err}");
        }
    }
}
