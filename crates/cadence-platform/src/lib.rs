// SPDX-License-Identifier: CEPL-1.0
//! Window-system glue: converts winit sizes and events into what the frame
//! coordinator consumes.
#![deny(unsafe_op_in_unsafe_fn)]

use cadence_render::{RenderSize, ResizeSignal};
use tracing::trace;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::window::{Window, WindowAttributes};

pub use winit;

pub fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

/// Current drawable size of `window` in physical pixels.
pub fn window_size(window: &Window) -> RenderSize {
    render_size(window.inner_size())
}

pub fn window_attributes(title: &str, size: RenderSize) -> WindowAttributes {
    Window::default_attributes()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(size.width, size.height))
}

/// Posts size changes to `signal`. Returns true if the event was a resize.
/// Zero sizes are forwarded too; the coordinator skips frames until the
/// window has area again.
pub fn forward_resize(event: &WindowEvent, signal: &ResizeSignal) -> bool {
    match event {
        WindowEvent::Resized(size) => {
            trace!("window resized to {}x{}", size.width, size.height);
            signal.notify(render_size(*size));
            true
        }
        _ => false,
    }
}
