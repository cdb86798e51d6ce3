//! Swapchain management
//!
//! Owns the presentable image chain and its views. Acquisition reports
//! out-of-date surfaces as a recoverable outcome rather than an error so the
//! frame loop can run its resize path.

use crate::error::{RenderError, RenderResult};
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Instance};

/// Result of asking the surface for the next presentable image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired and may be rendered into
    Acquired {
        /// Index into the swapchain image array
        image_index: u32,
        /// The surface no longer matches exactly but the image is usable
        suboptimal: bool,
    },
    /// The surface changed; the swapchain must be recreated before use
    OutOfDate,
}

/// Result of presenting a finished image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// The image was queued for presentation
    Presented {
        /// The surface no longer matches exactly; recreate when convenient
        suboptimal: bool,
    },
    /// The surface changed; the swapchain must be recreated
    OutOfDate,
}

/// Presentable image chain with per-image views
pub struct Swapchain {
    device: Device,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    prefer_mailbox: bool,
}

impl Swapchain {
    /// Create a swapchain sized to the current surface
    pub fn new(
        instance: &Instance,
        device: Device,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
        window_extent: vk::Extent2D,
        prefer_mailbox: bool,
    ) -> RenderResult<Self> {
        let loader = SwapchainLoader::new(instance, &device);
        let inner = SwapchainInner::create(
            &loader,
            &device,
            physical_device,
            surface,
            surface_loader,
            window_extent,
            prefer_mailbox,
            vk::SwapchainKHR::null(),
        )?;

        log::info!(
            "Created swapchain: {}x{}, {} images, {:?}",
            inner.extent.width,
            inner.extent.height,
            inner.images.len(),
            inner.format.format
        );

        Ok(Self {
            device,
            loader,
            swapchain: inner.swapchain,
            images: inner.images,
            image_views: inner.image_views,
            format: inner.format,
            extent: inner.extent,
            prefer_mailbox,
        })
    }

    /// Rebuild the image chain at new dimensions
    ///
    /// The caller must have drained the device first; image views handed out
    /// before this call are invalid afterwards.
    pub fn recreate(
        &mut self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
        window_extent: vk::Extent2D,
    ) -> RenderResult<()> {
        let inner = SwapchainInner::create(
            &self.loader,
            &self.device,
            physical_device,
            surface,
            surface_loader,
            window_extent,
            self.prefer_mailbox,
            self.swapchain,
        )?;

        self.destroy_native();
        self.swapchain = inner.swapchain;
        self.images = inner.images;
        self.image_views = inner.image_views;
        self.format = inner.format;
        self.extent = inner.extent;

        log::info!(
            "Recreated swapchain: {}x{}, {} images",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
        Ok(())
    }

    /// Ask for the next presentable image
    ///
    /// `signal_semaphore` is signaled once the image is actually ready to be
    /// written, which may be later than this call returns.
    pub fn acquire_next_image(
        &self,
        signal_semaphore: vk::Semaphore,
    ) -> RenderResult<AcquireOutcome> {
        match unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                signal_semaphore,
                vk::Fence::null(),
            )
        } {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date during acquire");
                Ok(AcquireOutcome::OutOfDate)
            }
            Err(err) => Err(RenderError::Api(err)),
        }
    }

    /// Queue `image_index` for presentation on `queue`
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RenderResult<PresentOutcome> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => Ok(PresentOutcome::Presented { suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date during present");
                Ok(PresentOutcome::OutOfDate)
            }
            Err(err) => Err(RenderError::Api(err)),
        }
    }

    /// Current extent in pixels
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Surface format of the image chain
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Per-image views, ordered by image index
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Number of images in the chain
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Native swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    fn destroy_native(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_native();
    }
}

struct SwapchainInner {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl SwapchainInner {
    fn create(
        loader: &SwapchainLoader,
        device: &Device,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
        window_extent: vk::Extent2D,
        prefer_mailbox: bool,
        old_swapchain: vk::SwapchainKHR,
    ) -> RenderResult<Self> {
        let surface_caps = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(physical_device, surface)
                .map_err(RenderError::Api)?
        };

        let surface_formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(physical_device, surface)
                .map_err(RenderError::Api)?
        };

        let format = surface_formats
            .iter()
            .find(|sf| {
                sf.format == vk::Format::B8G8R8A8_SRGB
                    && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .copied()
            .unwrap_or(surface_formats[0]);

        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(physical_device, surface)
                .map_err(RenderError::Api)?
        };

        // FIFO is the only mode the implementation must support
        let present_mode = if prefer_mailbox {
            present_modes
                .iter()
                .copied()
                .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
                .unwrap_or(vk::PresentModeKHR::FIFO)
        } else {
            vk::PresentModeKHR::FIFO
        };

        let extent = if surface_caps.current_extent.width != u32::MAX {
            surface_caps.current_extent
        } else {
            vk::Extent2D {
                width: window_extent.width.clamp(
                    surface_caps.min_image_extent.width,
                    surface_caps.max_image_extent.width,
                ),
                height: window_extent.height.clamp(
                    surface_caps.min_image_extent.height,
                    surface_caps.max_image_extent.height,
                ),
            }
        };

        let image_count = (surface_caps.min_image_count + 1).min(if surface_caps.max_image_count > 0
        {
            surface_caps.max_image_count
        } else {
            surface_caps.min_image_count + 1
        });

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe {
            loader
                .create_swapchain(&create_info, None)
                .map_err(RenderError::Api)?
        };

        let images = unsafe {
            loader
                .get_swapchain_images(swapchain)
                .map_err(RenderError::Api)?
        };

        let image_views: Result<Vec<_>, _> = images
            .iter()
            .map(|&image| {
                let view_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format.format)
                    .components(vk::ComponentMapping {
                        r: vk::ComponentSwizzle::IDENTITY,
                        g: vk::ComponentSwizzle::IDENTITY,
                        b: vk::ComponentSwizzle::IDENTITY,
                        a: vk::ComponentSwizzle::IDENTITY,
                    })
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                unsafe { device.create_image_view(&view_info, None) }
            })
            .collect();

        let image_views = image_views.map_err(RenderError::Api)?;

        Ok(Self {
            swapchain,
            images,
            image_views,
            format,
            extent,
        })
    }
}
