//! Staged resource uploads through the transfer queue
//!
//! CPU payloads never map device-local memory directly. `send_*` copies the
//! bytes into a host-visible staging buffer and allocates the device-local
//! destination; `upload()` then records every pending copy into one
//! single-use command buffer, submits it to a transfer-capable queue and
//! blocks until the fence signals. Uploads happen at load time or on rare
//! streaming events, so the simplicity of the blocking barrier is preferred
//! over a pipelined uploader.

use crate::buffer::Buffer;
use crate::commands::OneShotCommands;
use crate::context::VulkanContext;
use crate::error::RenderResult;
use crate::queue::QueueCapabilities;
use crate::texture::{
    record_copy_from_buffer, record_mip_chain_blits, record_transfer_dst_to_shader_read,
    record_undefined_to_transfer_dst, Texture, TextureDescription,
};
use ash::vk;

/// CPU-resident bytes destined for a device-local buffer
#[derive(Debug, Clone, Copy)]
pub struct BufferUploadPayload<'a> {
    /// Raw contents of the destination buffer
    pub data: &'a [u8],
    /// Usage flags of the destination; the transfer-destination bit is
    /// added by the upload path itself
    pub usage: vk::BufferUsageFlags,
}

struct BufferStagingEntry {
    staging: Buffer,
    destination: vk::Buffer,
    size: vk::DeviceSize,
}

struct TextureStagingEntry {
    staging: Buffer,
    destination: vk::Image,
    width: u32,
    height: u32,
    mip_levels: u32,
}

/// Staging-buffer uploader for device-local buffers and textures
#[derive(Default)]
pub struct DeviceMemoryUploader {
    buffer_entries: Vec<BufferStagingEntry>,
    texture_entries: Vec<TextureStagingEntry>,
}

impl DeviceMemoryUploader {
    /// Create an uploader with no pending work
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a buffer payload and allocate its device-local destination
    ///
    /// The returned buffer is immediately usable as a handle but its
    /// contents are undefined until `upload()` has run.
    pub fn send_buffer(
        &mut self,
        context: &VulkanContext,
        payload: &BufferUploadPayload<'_>,
    ) -> RenderResult<Buffer> {
        let staging = Buffer::staging(
            context.raw_device(),
            context.instance(),
            context.physical().device,
            payload.data,
        )?;

        let destination = Buffer::new(
            context.raw_device(),
            context.instance(),
            context.physical().device,
            payload.data.len() as vk::DeviceSize,
            payload.usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        self.buffer_entries.push(BufferStagingEntry {
            staging,
            destination: destination.handle(),
            size: payload.data.len() as vk::DeviceSize,
        });

        log::trace!("Staged buffer upload: {} bytes", payload.data.len());
        Ok(destination)
    }

    /// Stage texture pixel data and allocate its device-local destination
    pub fn send_texture(
        &mut self,
        context: &VulkanContext,
        data: &[u8],
        description: &TextureDescription,
    ) -> RenderResult<Texture> {
        let staging = Buffer::staging(
            context.raw_device(),
            context.instance(),
            context.physical().device,
            data,
        )?;

        let destination = Texture::new(
            context.raw_device(),
            context.instance(),
            context.physical().device,
            description,
        )?;

        self.texture_entries.push(TextureStagingEntry {
            staging,
            destination: destination.image(),
            width: description.width,
            height: description.height,
            mip_levels: description.mip_levels,
        });

        log::trace!(
            "Staged texture upload: {}x{}, {} mip levels, {} bytes",
            description.width,
            description.height,
            description.mip_levels,
            data.len()
        );
        Ok(destination)
    }

    /// Number of staged entries not yet uploaded
    pub fn pending_uploads(&self) -> usize {
        self.buffer_entries.len() + self.texture_entries.len()
    }

    /// Execute every pending upload and block until the GPU finishes
    ///
    /// Calling this with nothing staged is a no-op, so running it twice in
    /// a row is harmless. Staging buffers are destroyed before returning.
    pub fn upload(&mut self, context: &VulkanContext) -> RenderResult<()> {
        if self.buffer_entries.is_empty() && self.texture_entries.is_empty() {
            return Ok(());
        }

        let transfer = context.queue_with(QueueCapabilities::TRANSFER)?;
        let commands = OneShotCommands::begin(context.raw_device(), transfer.family_index)?;
        let device = context.device();
        let command_buffer = commands.buffer();

        for entry in &self.buffer_entries {
            let region = vk::BufferCopy::builder()
                .src_offset(0)
                .dst_offset(0)
                .size(entry.size)
                .build();

            unsafe {
                device.cmd_copy_buffer(
                    command_buffer,
                    entry.staging.handle(),
                    entry.destination,
                    &[region],
                );
            }
        }

        for entry in &self.texture_entries {
            record_undefined_to_transfer_dst(
                device,
                command_buffer,
                entry.destination,
                entry.mip_levels,
            );
            record_copy_from_buffer(
                device,
                command_buffer,
                entry.staging.handle(),
                entry.destination,
                entry.width,
                entry.height,
            );
            if entry.mip_levels > 1 {
                record_mip_chain_blits(
                    device,
                    command_buffer,
                    entry.destination,
                    entry.width,
                    entry.height,
                    entry.mip_levels,
                );
            } else {
                record_transfer_dst_to_shader_read(device, command_buffer, entry.destination, 0, 1);
            }
        }

        commands.submit_and_wait(transfer.handle)?;

        log::debug!(
            "Uploaded {} buffers and {} textures",
            self.buffer_entries.len(),
            self.texture_entries.len()
        );

        // Dropping the entries frees the staging buffers
        self.buffer_entries.clear();
        self.texture_entries.clear();
        Ok(())
    }
}
