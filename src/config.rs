// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Window, presentation, frame-core and debug settings. Every section has
// defaults, so a missing or partial file still yields a usable config.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub renderer: RendererConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Deferred Renderer".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Presentation settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Frame core settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Recording workers besides the driver thread. `None` = cores - 1.
    pub worker_threads: Option<usize>,
    /// Fixed capacity of the light buffer.
    pub light_capacity: usize,
    /// Size of each thread's descriptor pool.
    pub descriptor_sets_per_thread: u32,
    /// Directory holding compiled `.spv` shaders.
    pub shader_dir: PathBuf,
    /// Fence waits longer than this are logged.
    pub slow_fence_warn_ms: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            light_capacity: 1024,
            descriptor_sets_per_thread: 256,
            shader_dir: PathBuf::from("shaders"),
            slow_fence_warn_ms: 250,
        }
    }
}

impl RendererConfig {
    /// Number of worker threads to spawn.
    pub fn resolved_worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(1)
        })
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            log_level: "info".to_string(),
            show_fps: true,
        }
    }
}

impl DebugConfig {
    /// Log filter, `info` if the configured level is not recognised
    pub fn log_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::FIFO
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::parse(
            r#"
            [renderer]
            worker_threads = 3

            [graphics]
            present_mode = "mailbox"
            "#,
        )
        .unwrap();
        assert_eq!(config.renderer.worker_threads, Some(3));
        assert_eq!(config.renderer.resolved_worker_threads(), 3);
        assert_eq!(config.renderer.light_capacity, 1024);
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.present_mode(), ash::vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn unknown_present_mode_falls_back_to_fifo() {
        let mut config = Config::default();
        config.graphics.present_mode = "vsync-please".into();
        assert_eq!(config.present_mode(), ash::vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn log_level_parses_or_defaults() {
        let mut config = Config::default();
        config.debug.log_level = "debug".into();
        assert_eq!(config.debug.log_filter(), log::LevelFilter::Debug);
        config.debug.log_level = "chatty".into();
        assert_eq!(config.debug.log_filter(), log::LevelFilter::Info);
    }

    #[test]
    fn missing_file_is_default() {
        let config = Config::load_from_path("definitely/not/here.toml").unwrap();
        assert_eq!(config.renderer.descriptor_sets_per_thread, 256);
    }

    #[test]
    fn shipped_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config.toml");
        let config = Config::load_from_path(path).unwrap();
        assert_eq!(config.present_mode(), ash::vk::PresentModeKHR::FIFO);
        assert_eq!(config.renderer.worker_threads, None);
        assert_eq!(config.renderer.shader_dir, PathBuf::from("shaders"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::parse("[renderer\nworker_threads = ").is_err());
    }
}
