// SPDX-License-Identifier: CEPL-1.0
use std::path::Path;

use cadence_render::{PresentMode, RenderConfig, RenderSize};
use clap::{Parser, ValueEnum};
use serde::Deserialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendChoice {
    Vk,
    /// Software stand-in; runs a fixed number of frames without a window.
    Headless,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PresentModeArg {
    Immediate,
    Mailbox,
    Fifo,
    FifoRelaxed,
}

impl From<PresentModeArg> for PresentMode {
    fn from(m: PresentModeArg) -> Self {
        match m {
            PresentModeArg::Immediate => PresentMode::Immediate,
            PresentModeArg::Mailbox => PresentMode::Mailbox,
            PresentModeArg::Fifo => PresentMode::Fifo,
            PresentModeArg::FifoRelaxed => PresentMode::FifoRelaxed,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Renderer backend
    #[arg(long, value_enum, default_value_t = BackendChoice::Vk)]
    pub backend: BackendChoice,
    /// Config file; missing means defaults
    #[arg(long, default_value = "cadence.toml")]
    pub config: String,
    #[arg(long)]
    pub frames_in_flight: Option<usize>,
    #[arg(long, value_enum)]
    pub present_mode: Option<PresentModeArg>,
    /// Frames to run in headless mode
    #[arg(long, default_value_t = 120)]
    pub frames: u32,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub clear_color: [f32; 4],
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "cadence".to_owned(),
            width: 1280,
            height: 720,
            clear_color: [0.02, 0.02, 0.04, 1.0],
        }
    }
}

impl WindowCfg {
    pub fn size(&self) -> RenderSize {
        RenderSize::new(self.width, self.height)
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub render: RenderConfig,
    pub window: WindowCfg,
}

impl AppCfg {
    pub fn load(path: &Path) -> Self {
        cadence_core::load_toml_or_default(path)
    }

    /// Command-line flags win over the file.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(n) = args.frames_in_flight {
            self.render.frames_in_flight = n;
        }
        if let Some(mode) = args.present_mode {
            self.render.present_mode = mode.into();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file() {
        let mut cfg = AppCfg::default();
        cfg.render.frames_in_flight = 3;
        let args = Args::parse_from([
            "cadence",
            "--backend",
            "headless",
            "--present-mode",
            "mailbox",
        ]);
        cfg.apply_args(&args);
        assert_eq!(args.backend, BackendChoice::Headless);
        assert_eq!(cfg.render.frames_in_flight, 3);
        assert_eq!(cfg.render.present_mode, PresentMode::Mailbox);

        let args = Args::parse_from(["cadence", "--frames-in-flight", "1"]);
        cfg.apply_args(&args);
        assert_eq!(cfg.render.frames_in_flight, 1);
        assert_eq!(args.backend, BackendChoice::Vk);
        assert_eq!(args.config, "cadence.toml");
    }

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = AppCfg::load(Path::new("/nonexistent/cadence.toml"));
        assert_eq!(cfg, AppCfg::default());
        assert_eq!(cfg.window.size(), RenderSize::new(1280, 720));
    }
}
