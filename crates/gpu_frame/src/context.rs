//! Vulkan context initialization
//!
//! One explicit context struct owns the instance, surface, physical device
//! selection and logical device. Every component in this crate receives the
//! context by reference; there is no process-global state, so multiple
//! devices can coexist in one process (tests included).

use crate::config::RenderConfig;
use crate::error::{RenderError, RenderResult};
use crate::queue::{find_queue_family, CommandQueue, QueueCapabilities, QueueFamilyInfo};
use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::{CStr, CString};

/// Vulkan instance wrapper with optional validation messenger
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug_utils: Option<DebugUtils>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl VulkanInstance {
    /// Create an instance with the surface extensions the display requires
    pub fn new(
        display: &dyn HasRawDisplayHandle,
        app_name: &str,
        enable_validation: bool,
    ) -> RenderResult<Self> {
        let entry = unsafe { Entry::load() }.map_err(|e| {
            RenderError::InitializationFailed(format!("Failed to load Vulkan: {e:?}"))
        })?;

        let app_name_cstr = CString::new(app_name).map_err(|_| {
            RenderError::InitializationFailed("application name contains NUL".to_string())
        })?;
        let engine_name_cstr = CString::new("gpu_frame").unwrap();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let surface_extensions =
            ash_window::enumerate_required_extensions(display.raw_display_handle())
                .map_err(RenderError::Api)?;

        let mut extensions: Vec<*const i8> = surface_extensions.to_vec();
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![CString::new("VK_LAYER_KHRONOS_validation").unwrap()]
        } else {
            vec![]
        };
        let layer_name_ptrs: Vec<*const i8> =
            layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_name_ptrs);

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(RenderError::Api)?
        };

        let (debug_utils, debug_messenger) = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger = Self::create_messenger(&debug_utils)?;
            (Some(debug_utils), Some(messenger))
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    fn create_messenger(debug_utils: &DebugUtils) -> RenderResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(RenderError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) =
                (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Validation layer output routed into the logging facility
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let callback_data = *callback_data;
    let message = CStr::from_ptr(callback_data.p_message).to_string_lossy();

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Physical device selection result
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Capability records for every queue family
    pub families: Vec<QueueFamilyInfo>,
    /// Family used for graphics submissions
    pub graphics_family: u32,
    /// Family used for presentation
    pub present_family: u32,
    /// Family used for transfer submissions (may equal `graphics_family`)
    pub transfer_family: u32,
}

impl PhysicalDeviceInfo {
    /// Select a device that can render to `surface`
    pub fn select(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> RenderResult<Self> {
        let devices = unsafe {
            instance
                .enumerate_physical_devices()
                .map_err(RenderError::Api)?
        };

        for device in devices {
            if let Ok(info) = Self::evaluate(instance, device, surface, surface_loader) {
                log::info!("Selected GPU: {}", unsafe {
                    CStr::from_ptr(info.properties.device_name.as_ptr()).to_string_lossy()
                });
                return Ok(info);
            }
        }

        Err(RenderError::InitializationFailed(
            "No suitable GPU found".to_string(),
        ))
    }

    fn evaluate(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> RenderResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let family_properties =
            unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut families = Vec::with_capacity(family_properties.len());
        for (index, props) in family_properties.iter().enumerate() {
            let index = index as u32;
            let present_support = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .map_err(RenderError::Api)?
            };
            families.push(QueueFamilyInfo::from_properties(index, props, present_support));
        }

        let graphics_family = find_queue_family(&families, QueueCapabilities::GRAPHICS)
            .ok_or(RenderError::MissingQueue {
                capability: QueueCapabilities::GRAPHICS,
            })?;
        let present_family = find_queue_family(&families, QueueCapabilities::PRESENT).ok_or(
            RenderError::MissingQueue {
                capability: QueueCapabilities::PRESENT,
            },
        )?;
        let transfer_family = find_queue_family(&families, QueueCapabilities::TRANSFER).ok_or(
            RenderError::MissingQueue {
                capability: QueueCapabilities::TRANSFER,
            },
        )?;

        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(RenderError::Api)?
        };
        let has_swapchain = extensions.iter().any(|available| {
            let name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            name == SwapchainLoader::name()
        });
        if !has_swapchain {
            return Err(RenderError::InitializationFailed(
                "Swapchain extension not supported".to_string(),
            ));
        }

        Ok(Self {
            device,
            properties,
            families,
            graphics_family,
            present_family,
            transfer_family,
        })
    }
}

/// Logical device with one queue per family the layer needs
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    queues: Vec<CommandQueue>,
}

impl LogicalDevice {
    /// Create the device and retrieve graphics, present and transfer queues
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> RenderResult<Self> {
        let mut unique_families: Vec<u32> = vec![
            physical.graphics_family,
            physical.present_family,
            physical.transfer_family,
        ];
        unique_families.sort_unstable();
        unique_families.dedup();

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let required_extensions = [SwapchainLoader::name().as_ptr()];

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions);

        let device = unsafe {
            instance
                .create_device(physical.device, &create_info, None)
                .map_err(RenderError::Api)?
        };

        let queues = unique_families
            .iter()
            .map(|&family| {
                let handle = unsafe { device.get_device_queue(family, 0) };
                let capabilities = physical
                    .families
                    .iter()
                    .find(|info| info.index == family)
                    .map(|info| info.capabilities)
                    .unwrap_or_else(QueueCapabilities::empty);
                CommandQueue {
                    family_index: family,
                    handle,
                    capabilities,
                }
            })
            .collect();

        Ok(Self { device, queues })
    }

    /// Queues created on this device
    pub fn queues(&self) -> &[CommandQueue] {
        &self.queues
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

/// Everything needed to talk to one GPU through one surface
pub struct VulkanContext {
    // Field order is drop order: device before surface before instance.
    device: LogicalDevice,
    physical: PhysicalDeviceInfo,
    graphics_queue: CommandQueue,
    present_queue: CommandQueue,
    transfer_queue: CommandQueue,
    surface: vk::SurfaceKHR,
    surface_loader: Surface,
    instance: VulkanInstance,
}

impl VulkanContext {
    /// Initialize instance, surface, device selection and logical device
    pub fn new(
        window: &(impl HasRawWindowHandle + HasRawDisplayHandle),
        config: &RenderConfig,
    ) -> RenderResult<Self> {
        let instance = VulkanInstance::new(
            window,
            &config.application_name,
            config.validation_enabled(),
        )?;

        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
            .map_err(RenderError::Api)?
        };

        let physical = PhysicalDeviceInfo::select(&instance.instance, surface, &surface_loader)?;
        let device = LogicalDevice::new(&instance.instance, &physical)?;

        let queue_for = |family: u32| {
            device
                .queues()
                .iter()
                .find(|queue| queue.family_index == family)
                .copied()
                .ok_or_else(|| {
                    RenderError::InitializationFailed(format!(
                        "queue family {family} missing after device creation"
                    ))
                })
        };
        let graphics_queue = queue_for(physical.graphics_family)?;
        let present_queue = queue_for(physical.present_family)?;
        let transfer_queue = queue_for(physical.transfer_family)?;

        Ok(Self {
            device,
            physical,
            graphics_queue,
            present_queue,
            transfer_queue,
            surface,
            surface_loader,
            instance,
        })
    }

    /// Clone of the logical device handle table
    pub fn raw_device(&self) -> Device {
        self.device.device.clone()
    }

    /// Borrow the logical device
    pub fn device(&self) -> &Device {
        &self.device.device
    }

    /// Borrow the instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Physical device selection result
    pub fn physical(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    /// Surface handle the swapchain targets
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Surface extension loader
    pub fn surface_loader(&self) -> &Surface {
        &self.surface_loader
    }

    /// Queues created on the device filtered by capability
    pub fn queues_with(&self, capabilities: QueueCapabilities) -> Vec<CommandQueue> {
        self.device
            .queues()
            .iter()
            .filter(|queue| queue.capabilities.contains(capabilities))
            .copied()
            .collect()
    }

    /// First queue satisfying `capabilities`
    pub fn queue_with(&self, capabilities: QueueCapabilities) -> RenderResult<CommandQueue> {
        self.queues_with(capabilities)
            .into_iter()
            .next()
            .ok_or(RenderError::MissingQueue {
                capability: capabilities,
            })
    }

    /// Queue used for graphics submissions
    pub fn graphics_queue(&self) -> CommandQueue {
        self.graphics_queue
    }

    /// Queue used for presentation
    pub fn present_queue(&self) -> CommandQueue {
        self.present_queue
    }

    /// Queue used for transfer submissions
    pub fn transfer_queue(&self) -> CommandQueue {
        self.transfer_queue
    }

    /// Block until every queue on the device drains
    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe {
            self.device
                .device
                .device_wait_idle()
                .map_err(RenderError::Api)
        }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
