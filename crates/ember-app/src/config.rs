// SPDX-License-Identifier: CEPL-1.0
//! `ember.toml` loading and its mapping onto the renderer's config.
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ember_render::RenderSize;
use ember_render_vk::{ContextConfig, PresentPolicy, RenderResolution};
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Default)]
pub struct AppCfg {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub render: RenderCfg,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WindowCfg {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: default_title(),
            width: default_width(),
            height: default_height(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderCfg {
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: usize,
    #[serde(default)]
    pub vsync: bool,
    #[serde(default)]
    pub adapter: Option<usize>,
    /// Unset means on in debug builds.
    #[serde(default)]
    pub validation: Option<bool>,
    #[serde(default)]
    pub render_scale: Option<f32>,
    /// `[width, height]`; wins over `render_scale`.
    #[serde(default)]
    pub render_size: Option<[u32; 2]>,
    #[serde(default)]
    pub shader_path: Option<PathBuf>,
    #[serde(default = "default_overlay")]
    pub overlay: bool,
    #[serde(default = "default_target_samples")]
    pub overlay_target_samples: u32,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            frames_in_flight: default_frames_in_flight(),
            vsync: false,
            adapter: None,
            validation: None,
            render_scale: None,
            render_size: None,
            shader_path: None,
            overlay: default_overlay(),
            overlay_target_samples: default_target_samples(),
        }
    }
}

fn default_title() -> String {
    "ember".into()
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_frames_in_flight() -> usize {
    2
}
fn default_overlay() -> bool {
    true
}
fn default_target_samples() -> u32 {
    256
}

impl RenderCfg {
    pub fn resolution(&self) -> RenderResolution {
        match (self.render_size, self.render_scale) {
            (Some([w, h]), _) => RenderResolution::Fixed(RenderSize::new(w, h)),
            (None, Some(scale)) => RenderResolution::Scale(scale),
            (None, None) => RenderResolution::MatchSurface,
        }
    }

    pub fn to_context(&self) -> ContextConfig {
        let defaults = ContextConfig::default();
        ContextConfig {
            validation: self.validation.unwrap_or(defaults.validation),
            adapter_index: self.adapter,
            frames_in_flight: self.frames_in_flight,
            present_policy: if self.vsync {
                PresentPolicy::Vsync
            } else {
                PresentPolicy::LowLatency
            },
            render_resolution: self.resolution(),
            shader_path: self.shader_path.clone(),
            overlay: self.overlay,
            overlay_target_samples: self.overlay_target_samples,
            ..defaults
        }
    }
}

pub fn parse(text: &str) -> Result<AppCfg> {
    toml::from_str(text).context("parsing config")
}

/// A missing file yields defaults; an unreadable or malformed one is an error.
pub fn load(path: &Path) -> Result<AppCfg> {
    match fs::read_to_string(path) {
        Ok(text) => {
            let cfg = parse(&text).with_context(|| path.display().to_string())?;
            info!(path = %path.display(), "loaded config");
            Ok(cfg)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file; using defaults");
            Ok(AppCfg::default())
        }
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.render.frames_in_flight, 2);
        assert!(cfg.render.overlay);
        assert_eq!(cfg.window.width, 1280);
        let ctx = cfg.render.to_context();
        assert_eq!(ctx.present_policy, PresentPolicy::LowLatency);
        assert_eq!(ctx.render_resolution, RenderResolution::MatchSurface);
    }

    #[test]
    fn full_render_table() {
        let cfg = parse(
            r#"
            [window]
            title = "bench"

            [render]
            frames_in_flight = 3
            vsync = true
            adapter = 1
            validation = false
            render_scale = 0.5
            shader_path = "shaders/custom.comp"
            overlay = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.title, "bench");
        let ctx = cfg.render.to_context();
        assert_eq!(ctx.frames_in_flight, 3);
        assert_eq!(ctx.present_policy, PresentPolicy::Vsync);
        assert_eq!(ctx.adapter_index, Some(1));
        assert!(!ctx.validation);
        assert_eq!(ctx.render_resolution, RenderResolution::Scale(0.5));
        assert_eq!(ctx.shader_path, Some(PathBuf::from("shaders/custom.comp")));
        assert!(!ctx.overlay);
    }

    #[test]
    fn fixed_size_wins_over_scale() {
        let cfg = parse("[render]\nrender_scale = 2.0\nrender_size = [320, 200]\n").unwrap();
        assert_eq!(
            cfg.render.resolution(),
            RenderResolution::Fixed(RenderSize::new(320, 200))
        );
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(parse("[render]\nframes_in_flight = \"two\"").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = load(Path::new("/nonexistent/ember.toml")).unwrap();
        assert_eq!(cfg.render.frames_in_flight, 2);
    }
}
