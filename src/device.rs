// Device context - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Surface creation from raw window/display handles
// - Physical device selection (prefer discrete GPU, require present support)
// - Logical device + graphics/present queue creation
// - Memory allocator setup
//
// Created once by the host, shared by reference everywhere else. There is no
// ambient global state; every component receives the context explicitly.

use crate::error::FrameError;
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::{Mutex, MutexGuard};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;

/// Device context wrapper with explicit, dependency-ordered cleanup.
pub struct DeviceContext {
    // Destroyed manually in Drop; declaration order is not relied upon.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    // Presentation surface (owned here, destroyed before the instance)
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::extensions::khr::Surface,

    // Queue handles. Graphics and present may share a family or not; all
    // submission code must handle both cases.
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub graphics_family: u32,
    pub present_family: u32,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl DeviceContext {
    /// Create the device context and bind it to a presentation surface.
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `enable_validation` - Enable Vulkan validation layers (debug only)
    /// * `display_handle` / `window_handle` - Raw handles of the host window
    pub fn new(
        app_name: &str,
        enable_validation: bool,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Arc<Self>, FrameError> {
        log::info!("Creating device context: {}", app_name);

        let entry = unsafe { Entry::load() }
            .map_err(|_| FrameError::InvalidArgument("failed to load the Vulkan library"))?;

        let instance = Self::create_instance(&entry, app_name, enable_validation, display_handle)?;

        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        // Surface before device selection: present support is per-family
        let surface_loader = ash::extensions::khr::Surface::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .map_err(FrameError::Device)?;

        let (physical_device, graphics_family, present_family) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;

        let (device, graphics_queue, present_queue) = Self::create_logical_device(
            &instance,
            physical_device,
            graphics_family,
            present_family,
        )?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "Queue families: graphics={}, present={}",
            graphics_family,
            present_family
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            instance,
            _entry: entry,
            surface,
            surface_loader,
            graphics_queue,
            present_queue,
            graphics_family,
            present_family,
            debug_utils,
            properties,
            memory_properties,
        }))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
        display_handle: RawDisplayHandle,
    ) -> Result<ash::Instance, FrameError> {
        let app_name_cstr = CString::new(app_name)
            .map_err(|_| FrameError::InvalidArgument("app name contains a NUL byte"))?;
        let engine_name = CString::new("vkframe").expect("static name");

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        // Surface extensions for the host's platform, plus debug utils
        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .map_err(FrameError::Device)?
            .to_vec();
        if enable_validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        unsafe { entry.create_instance(&create_info, None) }.map_err(FrameError::Device)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT), FrameError> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

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

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .map_err(FrameError::Device)?;

        Ok((debug_utils, messenger))
    }

    /// Pick a physical device with a graphics family and a family that can
    /// present to the surface. Prefers a single family doing both; when they
    /// differ, the cross-queue ownership handling downstream kicks in.
    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, u32, u32), FrameError> {
        let devices =
            unsafe { instance.enumerate_physical_devices() }.map_err(FrameError::Device)?;

        if devices.is_empty() {
            return Err(FrameError::InvalidArgument("no Vulkan-capable GPU found"));
        }

        let mut best: Option<(vk::PhysicalDevice, u32, u32)> = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let queue_families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };

            let mut graphics_family = None;
            let mut present_family = None;

            for (index, family) in queue_families.iter().enumerate() {
                let index = index as u32;
                let supports_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
                let supports_present = unsafe {
                    surface_loader.get_physical_device_surface_support(device, index, surface)
                }
                .map_err(FrameError::SurfaceCapability)?;

                // A family doing both wins outright
                if supports_graphics && supports_present {
                    graphics_family = Some(index);
                    present_family = Some(index);
                    break;
                }
                if supports_graphics && graphics_family.is_none() {
                    graphics_family = Some(index);
                }
                if supports_present && present_family.is_none() {
                    present_family = Some(index);
                }
            }

            if let (Some(graphics), Some(present)) = (graphics_family, present_family) {
                let score = match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                    _ => 1,
                };

                if score > best_score {
                    best_score = score;
                    best = Some((device, graphics, present));
                }
            }
        }

        best.ok_or(FrameError::InvalidArgument(
            "no GPU can both render and present to this surface",
        ))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_family: u32,
        present_family: u32,
    ) -> Result<(ash::Device, vk::Queue, vk::Queue), FrameError> {
        let queue_priorities = [1.0];

        // One create-info per distinct family
        let mut unique_families = vec![graphics_family];
        if present_family != graphics_family {
            unique_families.push(present_family);
        }
        let queue_create_infos: Vec<_> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = [ash::extensions::khr::Swapchain::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .map_err(FrameError::Device)?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };

        Ok((device, graphics_queue, present_queue))
    }

    /// Lock the shared memory allocator.
    pub fn allocator(&self) -> MutexGuard<'_, Allocator> {
        self.allocator.lock()
    }

    /// Whether graphics and present work run on distinct queue families.
    pub fn has_split_queues(&self) -> bool {
        self.graphics_family != self.present_family
    }

    /// Wait for the device to be idle (e.g., before teardown or recreation).
    pub fn wait_idle(&self) -> Result<(), FrameError> {
        unsafe { self.device.device_wait_idle() }.map_err(FrameError::from)
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        log::info!("Destroying device context...");

        // Nothing may still be executing when teardown begins
        let _ = self.wait_idle();

        unsafe {
            // Allocator releases its memory blocks against the live device
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
