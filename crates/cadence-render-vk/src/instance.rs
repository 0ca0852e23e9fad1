// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, CStr, CString};

use anyhow::{Context, Result};
#[cfg(debug_assertions)]
use ash::ext::debug_utils as ext_debug;
use ash::khr::surface;
use ash::{vk, Entry, Instance};
use cadence_render::{
    AdapterInfo, DeviceFeatures, DeviceRequirements, GpuInstance, QueueFamilyProperties,
    RenderError, Selection, SurfaceSupport,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};
#[cfg(debug_assertions)]
use tracing::{error, trace};

use crate::convert::{self, vk_error};
use crate::device::VkDevice;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[cfg(debug_assertions)]
type DebugState = vk::DebugUtilsMessengerEXT;
#[cfg(not(debug_assertions))]
type DebugState = ();

/// Loader, instance and the instance-level extension tables.
pub struct VkInstance {
    entry: Entry,
    instance: Instance,
    surface_loader: surface::Instance,
    debug: DebugState,
}

/// A window surface. Must be dropped after every swapchain built on it and
/// before the [`VkInstance`] that created it.
pub struct VkSurface {
    loader: surface::Instance,
    handle: vk::SurfaceKHR,
}

impl VkSurface {
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }
}

impl Drop for VkSurface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}

#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", "{msg}");
    } else {
        trace!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

#[cfg(debug_assertions)]
unsafe fn create_debug_messenger(entry: &Entry, instance: &Instance) -> Result<DebugState> {
    let loader = ext_debug::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    Ok(unsafe { loader.create_debug_utils_messenger(&ci, None) }?)
}

#[cfg(not(debug_assertions))]
unsafe fn create_debug_messenger(_entry: &Entry, _instance: &Instance) -> Result<DebugState> {
    Ok(())
}

#[cfg(debug_assertions)]
unsafe fn destroy_debug_messenger(entry: &Entry, instance: &Instance, dbg: DebugState) {
    let loader = ext_debug::Instance::new(entry, instance);
    unsafe { loader.destroy_debug_utils_messenger(dbg, None) };
}

#[cfg(not(debug_assertions))]
unsafe fn destroy_debug_messenger(_entry: &Entry, _instance: &Instance, _dbg: DebugState) {}

fn validation_available(entry: &Entry) -> bool {
    unsafe { entry.enumerate_instance_layer_properties() }
        .map(|layers| {
            layers
                .iter()
                .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER))
        })
        .unwrap_or(false)
}

impl VkInstance {
    pub fn new(display: &dyn HasDisplayHandle) -> Result<Self> {
        let entry = Entry::linked();
        let display_raw = display.display_handle()?.as_raw();

        let app_name = CString::new("cadence")?;
        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: app_name.as_ptr(),
            application_version: 0,
            p_engine_name: app_name.as_ptr(),
            engine_version: 0,
            api_version: vk::API_VERSION_1_0,
            ..Default::default()
        };

        let mut extensions: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(display_raw)
                .context("enumerate_required_extensions")?
                .to_vec();
        let mut layers: Vec<*const c_char> = Vec::new();
        if cfg!(debug_assertions) {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
            if validation_available(&entry) {
                layers.push(VALIDATION_LAYER.as_ptr());
            } else {
                warn!("validation layer not installed, running without it");
            }
        }

        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_layer_count: layers.len() as u32,
            pp_enabled_layer_names: layers.as_ptr(),
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            ..Default::default()
        };

        let instance =
            unsafe { entry.create_instance(&create_info, None) }.context("vkCreateInstance")?;
        let debug = match unsafe { create_debug_messenger(&entry, &instance) } {
            Ok(d) => d,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e.context("debug messenger"));
            }
        };
        let surface_loader = surface::Instance::new(&entry, &instance);
        info!("Vulkan instance created ({} layer(s))", layers.len());

        Ok(Self {
            entry,
            instance,
            surface_loader,
            debug,
        })
    }

    pub fn create_surface(
        &self,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
    ) -> Result<VkSurface> {
        let handle = unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.instance,
                display.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )
        }
        .context("create_surface")?;
        Ok(VkSurface {
            loader: self.surface_loader.clone(),
            handle,
        })
    }
}

impl GpuInstance for VkInstance {
    type Adapter = vk::PhysicalDevice;
    type Surface = VkSurface;
    type Device = VkDevice;

    fn enumerate_adapters(&self) -> cadence_render::Result<Vec<vk::PhysicalDevice>> {
        unsafe { self.instance.enumerate_physical_devices() }
            .map_err(vk_error("vkEnumeratePhysicalDevices"))
    }

    fn adapter_info(&self, adapter: &vk::PhysicalDevice) -> AdapterInfo {
        let props = unsafe { self.instance.get_physical_device_properties(*adapter) };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".to_owned());
        AdapterInfo {
            name,
            kind: convert::device_kind_from_vk(props.device_type),
        }
    }

    fn queue_families(
        &self,
        adapter: &vk::PhysicalDevice,
    ) -> cadence_render::Result<Vec<QueueFamilyProperties>> {
        let families =
            unsafe { self.instance.get_physical_device_queue_family_properties(*adapter) };
        Ok(families
            .iter()
            .map(|q| QueueFamilyProperties {
                flags: convert::queue_flags_from_vk(q.queue_flags),
                queue_count: q.queue_count,
            })
            .collect())
    }

    fn presentation_support(
        &self,
        adapter: &vk::PhysicalDevice,
        family: u32,
        surface: &VkSurface,
    ) -> cadence_render::Result<bool> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_support(*adapter, family, surface.handle)
        }
        .map_err(vk_error("vkGetPhysicalDeviceSurfaceSupportKHR"))
    }

    fn device_extensions(&self, adapter: &vk::PhysicalDevice) -> cadence_render::Result<Vec<String>> {
        let props = unsafe { self.instance.enumerate_device_extension_properties(*adapter) }
            .map_err(vk_error("vkEnumerateDeviceExtensionProperties"))?;
        Ok(props
            .iter()
            .filter_map(|p| p.extension_name_as_c_str().ok())
            .map(|n| n.to_string_lossy().into_owned())
            .collect())
    }

    fn device_features(&self, adapter: &vk::PhysicalDevice) -> DeviceFeatures {
        let features = unsafe { self.instance.get_physical_device_features(*adapter) };
        convert::features_from_vk(&features)
    }

    fn surface_support(
        &self,
        adapter: &vk::PhysicalDevice,
        surface: &VkSurface,
    ) -> cadence_render::Result<SurfaceSupport> {
        query_surface_support(&self.surface_loader, *adapter, surface.handle)
    }

    fn create_device(
        &self,
        selection: &Selection<vk::PhysicalDevice>,
        requirements: &DeviceRequirements,
    ) -> cadence_render::Result<VkDevice> {
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = selection
            .queues
            .unique_families()
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();

        let ext_names = requirements
            .extensions
            .iter()
            .map(|e| CString::new(e.as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RenderError::InvalidConfig(format!("extension name: {e}")))?;
        let ext_ptrs: Vec<*const c_char> = ext_names.iter().map(|e| e.as_ptr()).collect();
        let features = convert::features_to_vk(requirements.features);

        let create_info = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: ext_ptrs.len() as u32,
            pp_enabled_extension_names: ext_ptrs.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };

        let device = unsafe {
            self.instance
                .create_device(selection.adapter, &create_info, None)
        }
        .map_err(vk_error("vkCreateDevice"))?;
        debug!(
            "logical device created: graphics family {}, present family {}",
            selection.queues.graphics, selection.queues.present
        );
        Ok(VkDevice::new(
            &self.instance,
            self.surface_loader.clone(),
            selection.adapter,
            device,
            selection.queues,
        ))
    }
}

pub(crate) fn query_surface_support(
    loader: &surface::Instance,
    phys: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> cadence_render::Result<SurfaceSupport> {
    let caps = unsafe { loader.get_physical_device_surface_capabilities(phys, surface) }
        .map_err(vk_error("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?;
    let formats = unsafe { loader.get_physical_device_surface_formats(phys, surface) }
        .map_err(vk_error("vkGetPhysicalDeviceSurfaceFormatsKHR"))?;
    let modes = unsafe { loader.get_physical_device_surface_present_modes(phys, surface) }
        .map_err(vk_error("vkGetPhysicalDeviceSurfacePresentModesKHR"))?;
    Ok(SurfaceSupport {
        capabilities: convert::capabilities_from_vk(&caps),
        formats: formats
            .into_iter()
            .map(convert::surface_format_from_vk)
            .collect(),
        present_modes: modes.into_iter().map(convert::present_mode_from_vk).collect(),
    })
}

// Surfaces and devices hold their own handles and must already be gone.
impl Drop for VkInstance {
    fn drop(&mut self) {
        unsafe {
            destroy_debug_messenger(&self.entry, &self.instance, self.debug);
            self.instance.destroy_instance(None);
        }
    }
}
