// SPDX-License-Identifier: CEPL-1.0
//! Translation between `ash::vk` values and the core's backend-neutral types.

use ash::vk;
use cadence_render::{
    ColorSpace, DeviceFeatures, DeviceKind, Format, PresentMode, QueueFlags, RenderError,
    RenderSize, SurfaceCapabilities, SurfaceFormat,
};

pub fn format_from_vk(f: vk::Format) -> Format {
    match f {
        vk::Format::UNDEFINED => Format::Undefined,
        vk::Format::B8G8R8A8_UNORM => Format::Bgra8Unorm,
        vk::Format::B8G8R8A8_SRGB => Format::Bgra8Srgb,
        vk::Format::R8G8B8A8_UNORM => Format::Rgba8Unorm,
        vk::Format::R8G8B8A8_SRGB => Format::Rgba8Srgb,
        vk::Format::A2B10G10R10_UNORM_PACK32 => Format::A2b10g10r10Unorm,
        vk::Format::A2R10G10B10_UNORM_PACK32 => Format::A2r10g10b10Unorm,
        vk::Format::R16G16B16A16_SFLOAT => Format::Rgba16Float,
        other => Format::Other(other.as_raw()),
    }
}

pub fn format_to_vk(f: Format) -> vk::Format {
    match f {
        Format::Undefined => vk::Format::UNDEFINED,
        Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        Format::A2b10g10r10Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
        Format::A2r10g10b10Unorm => vk::Format::A2R10G10B10_UNORM_PACK32,
        Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        Format::Other(raw) => vk::Format::from_raw(raw),
    }
}

pub fn color_space_from_vk(cs: vk::ColorSpaceKHR) -> ColorSpace {
    match cs {
        vk::ColorSpaceKHR::SRGB_NONLINEAR => ColorSpace::SrgbNonlinear,
        vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT => ColorSpace::DisplayP3Nonlinear,
        vk::ColorSpaceKHR::HDR10_ST2084_EXT => ColorSpace::Hdr10St2084,
        vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT => ColorSpace::ExtendedSrgbLinear,
        other => ColorSpace::Other(other.as_raw()),
    }
}

pub fn color_space_to_vk(cs: ColorSpace) -> vk::ColorSpaceKHR {
    match cs {
        ColorSpace::SrgbNonlinear => vk::ColorSpaceKHR::SRGB_NONLINEAR,
        ColorSpace::DisplayP3Nonlinear => vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT,
        ColorSpace::Hdr10St2084 => vk::ColorSpaceKHR::HDR10_ST2084_EXT,
        ColorSpace::ExtendedSrgbLinear => vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        ColorSpace::Other(raw) => vk::ColorSpaceKHR::from_raw(raw),
    }
}

pub fn surface_format_from_vk(f: vk::SurfaceFormatKHR) -> SurfaceFormat {
    SurfaceFormat::new(format_from_vk(f.format), color_space_from_vk(f.color_space))
}

pub fn present_mode_from_vk(m: vk::PresentModeKHR) -> PresentMode {
    match m {
        vk::PresentModeKHR::IMMEDIATE => PresentMode::Immediate,
        vk::PresentModeKHR::MAILBOX => PresentMode::Mailbox,
        vk::PresentModeKHR::FIFO => PresentMode::Fifo,
        vk::PresentModeKHR::FIFO_RELAXED => PresentMode::FifoRelaxed,
        other => PresentMode::Other(other.as_raw()),
    }
}

pub fn present_mode_to_vk(m: PresentMode) -> vk::PresentModeKHR {
    match m {
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
        PresentMode::Other(raw) => vk::PresentModeKHR::from_raw(raw),
    }
}

pub fn queue_flags_from_vk(f: vk::QueueFlags) -> QueueFlags {
    let mut out = QueueFlags::empty();
    out.set(QueueFlags::GRAPHICS, f.contains(vk::QueueFlags::GRAPHICS));
    out.set(QueueFlags::COMPUTE, f.contains(vk::QueueFlags::COMPUTE));
    out.set(QueueFlags::TRANSFER, f.contains(vk::QueueFlags::TRANSFER));
    out.set(
        QueueFlags::SPARSE_BINDING,
        f.contains(vk::QueueFlags::SPARSE_BINDING),
    );
    out
}

pub fn device_kind_from_vk(t: vk::PhysicalDeviceType) -> DeviceKind {
    match t {
        vk::PhysicalDeviceType::DISCRETE_GPU => DeviceKind::Discrete,
        vk::PhysicalDeviceType::INTEGRATED_GPU => DeviceKind::Integrated,
        vk::PhysicalDeviceType::VIRTUAL_GPU => DeviceKind::Virtual,
        vk::PhysicalDeviceType::CPU => DeviceKind::Cpu,
        _ => DeviceKind::Other,
    }
}

fn feature_bits(f: &vk::PhysicalDeviceFeatures) -> [(DeviceFeatures, vk::Bool32); 8] {
    [
        (DeviceFeatures::SAMPLER_ANISOTROPY, f.sampler_anisotropy),
        (DeviceFeatures::FILL_MODE_NON_SOLID, f.fill_mode_non_solid),
        (DeviceFeatures::WIDE_LINES, f.wide_lines),
        (DeviceFeatures::GEOMETRY_SHADER, f.geometry_shader),
        (DeviceFeatures::TESSELLATION_SHADER, f.tessellation_shader),
        (DeviceFeatures::MULTI_DRAW_INDIRECT, f.multi_draw_indirect),
        (DeviceFeatures::DEPTH_CLAMP, f.depth_clamp),
        (DeviceFeatures::SHADER_FLOAT64, f.shader_float64),
    ]
}

pub fn features_from_vk(f: &vk::PhysicalDeviceFeatures) -> DeviceFeatures {
    feature_bits(f)
        .into_iter()
        .filter(|&(_, on)| on == vk::TRUE)
        .fold(DeviceFeatures::empty(), |acc, (flag, _)| acc | flag)
}

pub fn features_to_vk(f: DeviceFeatures) -> vk::PhysicalDeviceFeatures {
    let b = |flag: DeviceFeatures| if f.contains(flag) { vk::TRUE } else { vk::FALSE };
    vk::PhysicalDeviceFeatures {
        sampler_anisotropy: b(DeviceFeatures::SAMPLER_ANISOTROPY),
        fill_mode_non_solid: b(DeviceFeatures::FILL_MODE_NON_SOLID),
        wide_lines: b(DeviceFeatures::WIDE_LINES),
        geometry_shader: b(DeviceFeatures::GEOMETRY_SHADER),
        tessellation_shader: b(DeviceFeatures::TESSELLATION_SHADER),
        multi_draw_indirect: b(DeviceFeatures::MULTI_DRAW_INDIRECT),
        depth_clamp: b(DeviceFeatures::DEPTH_CLAMP),
        shader_float64: b(DeviceFeatures::SHADER_FLOAT64),
        ..Default::default()
    }
}

fn size(e: vk::Extent2D) -> RenderSize {
    RenderSize::new(e.width, e.height)
}

pub fn capabilities_from_vk(caps: &vk::SurfaceCapabilitiesKHR) -> SurfaceCapabilities {
    // u32::MAX width means the surface size follows the swapchain.
    let current_extent = (caps.current_extent.width != u32::MAX).then(|| size(caps.current_extent));
    SurfaceCapabilities {
        min_image_count: caps.min_image_count,
        max_image_count: caps.max_image_count,
        current_extent,
        min_extent: size(caps.min_image_extent),
        max_extent: size(caps.max_image_extent),
    }
}

/// Usage every chain image needs: it is cleared by a transfer and may be
/// drawn into.
pub const CHAIN_IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw() | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

/// [`CHAIN_IMAGE_USAGE`] if the surface allows it.
pub fn chain_image_usage(
    supported: vk::ImageUsageFlags,
) -> Result<vk::ImageUsageFlags, RenderError> {
    if supported.contains(CHAIN_IMAGE_USAGE) {
        Ok(CHAIN_IMAGE_USAGE)
    } else {
        Err(RenderError::Negotiation(
            "surface images cannot be used as clear targets",
        ))
    }
}

/// Opaque when offered, else the first of the remaining modes in a fixed
/// order. Some compositors only list `INHERIT` or a premultiplied mode.
pub fn composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&mode| supported.contains(mode))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Maps a failed Vulkan call onto the core taxonomy.
pub fn vk_error(context: &'static str) -> impl Fn(vk::Result) -> RenderError {
    move |e| match e {
        vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
        vk::Result::ERROR_SURFACE_LOST_KHR => RenderError::SurfaceLost,
        _ => RenderError::Backend(format!("{context}: {e}")),
    }
}

/// Like [`vk_error`], but memory exhaustion during chain creation is
/// recoverable.
pub fn chain_error(context: &'static str) -> impl Fn(vk::Result) -> RenderError {
    move |e| match e {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY
        | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
        | vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR
        | vk::Result::ERROR_INITIALIZATION_FAILED => {
            RenderError::ChainCreation(format!("{context}: {e}"))
        }
        other => vk_error(context)(other),
    }
}
