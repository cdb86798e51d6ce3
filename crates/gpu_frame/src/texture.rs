//! Texture creation and transfer recording
//!
//! A [`Texture`] owns its image, memory, view and sampler. The free
//! functions record layout transitions, buffer-to-image copies and mip
//! chain generation into a caller-supplied command buffer so the uploader
//! can batch many resources into one submission.

use crate::buffer::find_memory_type;
use crate::error::{RenderError, RenderResult};
use ash::{vk, Device, Instance};

/// Number of mip levels for a full chain down to 1x1
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Parameters for creating a sampled texture
#[derive(Debug, Clone, Copy)]
pub struct TextureDescription {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format
    pub format: vk::Format,
    /// Usage flags beyond the transfer bits the upload path adds itself
    pub usage: vk::ImageUsageFlags,
    /// Mip level count, at least 1
    pub mip_levels: u32,
}

impl TextureDescription {
    /// A single-level sampled texture
    pub fn new(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            width,
            height,
            format,
            usage: vk::ImageUsageFlags::SAMPLED,
            mip_levels: 1,
        }
    }

    /// Extend the description to a full mip chain
    pub fn with_mip_chain(mut self) -> Self {
        self.mip_levels = mip_level_count(self.width, self.height);
        self
    }
}

/// Sampled texture with image, device memory, view and sampler
pub struct Texture {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    sampler: vk::Sampler,
    extent: vk::Extent2D,
    format: vk::Format,
    mip_levels: u32,
}

impl Texture {
    /// Create a device-local texture ready to receive transfer writes
    pub fn new(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        description: &TextureDescription,
    ) -> RenderResult<Self> {
        debug_assert!(description.width > 0 && description.height > 0);
        debug_assert!(description.mip_levels >= 1);

        let mut usage = description.usage | vk::ImageUsageFlags::TRANSFER_DST;
        if description.mip_levels > 1 {
            // Mip generation blits read back from the image itself
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: description.width,
                height: description.height,
                depth: 1,
            })
            .mip_levels(description.mip_levels)
            .array_layers(1)
            .format(description.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe {
            device
                .create_image(&image_info, None)
                .map_err(RenderError::Api)?
        };

        let mem_requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory_type_index = match find_memory_type(
            instance,
            physical_device,
            mem_requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ) {
            Ok(index) => index,
            Err(err) => {
                unsafe { device.destroy_image(image, None) };
                return Err(err);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.destroy_image(image, None) };
                return Err(RenderError::Api(err));
            }
        };

        if let Err(err) = unsafe { device.bind_image_memory(image, memory, 0) } {
            unsafe {
                device.destroy_image(image, None);
                device.free_memory(memory, None);
            }
            return Err(RenderError::Api(err));
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(description.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: description.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe {
            device
                .create_image_view(&view_info, None)
                .map_err(RenderError::Api)?
        };

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(description.mip_levels as f32);

        let sampler = unsafe {
            device
                .create_sampler(&sampler_info, None)
                .map_err(RenderError::Api)?
        };

        Ok(Self {
            device,
            image,
            memory,
            view,
            sampler,
            extent: vk::Extent2D {
                width: description.width,
                height: description.height,
            },
            format: description.format,
            mip_levels: description.mip_levels,
        })
    }

    /// Native image handle
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// Image view for shader resource binding
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Sampler for shader resource binding
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Dimensions in pixels
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Pixel format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Mip level count
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

fn color_range(base_mip: u32, level_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: base_mip,
        level_count,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Record a transition of every mip level from UNDEFINED to TRANSFER_DST
pub(crate) fn record_undefined_to_transfer_dst(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    mip_levels: u32,
) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_range(0, mip_levels))
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);

    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier.build()],
        );
    }
}

/// Record a transition of a mip range from TRANSFER_DST to SHADER_READ_ONLY
pub(crate) fn record_transfer_dst_to_shader_read(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    base_mip: u32,
    level_count: u32,
) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_range(base_mip, level_count))
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::SHADER_READ);

    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier.build()],
        );
    }
}

/// Record a full-extent copy from `buffer` into mip level 0 of `image`
pub(crate) fn record_copy_from_buffer(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    buffer: vk::Buffer,
    image: vk::Image,
    width: u32,
    height: u32,
) {
    let region = vk::BufferImageCopy::builder()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .image_extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        });

    unsafe {
        device.cmd_copy_buffer_to_image(
            command_buffer,
            buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region.build()],
        );
    }
}

/// Record mip chain generation by successive halving blits
///
/// Expects every level in TRANSFER_DST layout with level 0 already filled.
/// Each level is blitted from the previous one at half the dimensions with
/// a floor of 1, bracketed by one barrier pair, and finishes in
/// SHADER_READ_ONLY layout including the last level.
pub(crate) fn record_mip_chain_blits(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    width: u32,
    height: u32,
    mip_levels: u32,
) {
    let mut mip_width = width;
    let mut mip_height = height;

    for level in 1..mip_levels {
        // Previous level becomes the blit source
        let to_src = vk::ImageMemoryBarrier::builder()
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(color_range(level - 1, 1))
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ);

        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_src.build()],
            );
        }

        let next_width = (mip_width / 2).max(1);
        let next_height = (mip_height / 2).max(1);

        let blit = vk::ImageBlit::builder()
            .src_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level - 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: mip_width as i32,
                    y: mip_height as i32,
                    z: 1,
                },
            ])
            .dst_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level,
                base_array_layer: 0,
                layer_count: 1,
            })
            .dst_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: next_width as i32,
                    y: next_height as i32,
                    z: 1,
                },
            ]);

        unsafe {
            device.cmd_blit_image(
                command_buffer,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit.build()],
                vk::Filter::LINEAR,
            );
        }

        // Source level is final; hand it to the shaders
        let to_read = vk::ImageMemoryBarrier::builder()
            .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(color_range(level - 1, 1))
            .src_access_mask(vk::AccessFlags::TRANSFER_READ)
            .dst_access_mask(vk::AccessFlags::SHADER_READ);

        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_read.build()],
            );
        }

        mip_width = next_width;
        mip_height = next_height;
    }

    // Last level never became a blit source and is still TRANSFER_DST
    record_transfer_dst_to_shader_read(device, command_buffer, image, mip_levels - 1, 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_count_power_of_two() {
        assert_eq!(mip_level_count(1024, 1024), 11);
        assert_eq!(mip_level_count(1024, 512), 11);
        assert_eq!(mip_level_count(256, 1024), 11);
    }

    #[test]
    fn test_mip_count_non_power_of_two() {
        assert_eq!(mip_level_count(1000, 600), 10);
        assert_eq!(mip_level_count(3, 2), 2);
    }

    #[test]
    fn test_mip_count_floor_is_one() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(0, 0), 1);
    }

    #[test]
    fn test_description_mip_chain() {
        let description =
            TextureDescription::new(640, 480, vk::Format::R8G8B8A8_SRGB).with_mip_chain();
        assert_eq!(description.mip_levels, 10);
        assert_eq!(
            TextureDescription::new(16, 16, vk::Format::R8G8B8A8_SRGB).mip_levels,
            1
        );
    }

    #[test]
    fn test_halving_sequence_reaches_one() {
        // 5x3 image: levels are 5x3, 2x1, 1x1
        let levels = mip_level_count(5, 3);
        assert_eq!(levels, 3);
        let (mut w, mut h) = (5_u32, 3_u32);
        let mut dims = vec![(w, h)];
        for _ in 1..levels {
            w = (w / 2).max(1);
            h = (h / 2).max(1);
            dims.push((w, h));
        }
        assert_eq!(dims, vec![(5, 3), (2, 1), (1, 1)]);
    }
}
