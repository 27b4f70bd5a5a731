//! Application configuration loaded from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level configuration. Every field has a default, so a partial file is valid.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowConfig,
    pub renderer: RendererConfig,
    pub scene: SceneConfig,
    pub camera: CameraConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: "Raytracer".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Enable `VK_LAYER_KHRONOS_validation` and the debug messenger.
    pub validation: bool,
    /// SPIR-V binary of the ray tracing compute program.
    pub compute_shader: PathBuf,
    /// Minimum number of object records preallocated per frame slot.
    pub object_capacity: usize,
    /// Use MAILBOX presentation when the surface supports it.
    pub prefer_mailbox: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            compute_shader: PathBuf::from("shaders/spirv/raytrace.comp.spv"),
            object_capacity: 0,
            prefer_mailbox: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Number of random spheres in the startup scene.
    pub object_count: usize,
    /// Seed for the startup scene. `None` draws from the OS.
    pub seed: Option<u64>,
    /// Camera displacement that invalidates accumulated samples.
    pub movement_threshold: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            object_count: 10,
            seed: None,
            movement_threshold: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Units per second.
    pub move_speed: f32,
    /// Degrees per second.
    pub look_speed: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            move_speed: 5.0,
            look_speed: 60.0,
        }
    }
}

impl AppConfig {
    /// Default location looked up by the binary.
    pub const DEFAULT_PATH: &'static str = "raytracer.toml";

    /// Parse a configuration from TOML text and validate it.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!("Loaded config from {}", path.display());
                Self::from_toml_str(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Serialize to pretty TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Reject values the renderer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        if self.renderer.compute_shader.as_os_str().is_empty() {
            return Err(Error::Config("compute_shader path is empty".to_string()));
        }
        if !(self.scene.movement_threshold > 0.0) {
            return Err(Error::Config(format!(
                "movement_threshold must be positive, got {}",
                self.scene.movement_threshold
            )));
        }
        if !(self.camera.move_speed > 0.0) || !(self.camera.look_speed > 0.0) {
            return Err(Error::Config("camera speeds must be positive".to_string()));
        }
        Ok(())
    }
}
