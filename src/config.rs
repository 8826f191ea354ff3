// =============================================================================
// CONFIGURATION - Load settings from vkframe.toml
// =============================================================================
//
// This module handles loading and parsing the pipeline configuration.
// Provides sensible defaults if the config file is missing or has errors.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub graphics: GraphicsConfig,
    pub upload: UploadConfig,
    pub debug: DebugConfig,
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            clear_color: [0.02, 0.02, 0.04, 1.0],
            max_frames_in_flight: 2,
        }
    }
}

/// Staged upload settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Upper bound on the blocking fence wait of a one-shot upload.
    pub timeout_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self { timeout_ms: 500 }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("vkframe.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load vkframe.toml: {}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get the desired present mode as a Vulkan enum.
    ///
    /// This expresses a preference only; swapchain creation degrades to FIFO
    /// when the surface does not support it.
    pub fn desired_present_mode(&self) -> ash::vk::PresentModeKHR {
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

    pub fn upload_timeout_ns(&self) -> u64 {
        self.upload.timeout_ms.saturating_mul(1_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert_eq!(config.upload.timeout_ms, 500);
        assert_eq!(config.desired_present_mode(), ash::vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [graphics]
            present_mode = "mailbox"
            max_frames_in_flight = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.graphics.max_frames_in_flight, 3);
        assert_eq!(
            config.desired_present_mode(),
            ash::vk::PresentModeKHR::MAILBOX
        );
        // Untouched sections keep their defaults
        assert_eq!(config.upload.timeout_ms, 500);
        assert!(config.debug.validation_layers);
    }

    #[test]
    fn unknown_present_mode_falls_back_to_fifo() {
        let config: Config = toml::from_str(
            r#"
            [graphics]
            present_mode = "warp-speed"
            "#,
        )
        .unwrap();
        assert_eq!(config.desired_present_mode(), ash::vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn upload_timeout_converts_to_nanoseconds() {
        let config = Config::default();
        assert_eq!(config.upload_timeout_ns(), 500_000_000);
    }
}
