// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend built on `ash`.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod convert;
mod device;
mod instance;
mod recorder;

pub use device::VkDevice;
pub use instance::{VkInstance, VkSurface};
pub use recorder::ClearRecorder;
