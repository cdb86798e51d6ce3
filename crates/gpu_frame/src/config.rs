//! Render layer configuration
//!
//! TOML-backed settings for device creation. Values left out of a config
//! file fall back to defaults, so a minimal deployment needs no file at all.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Largest supported frame ring depth
pub const MAX_FRAMES_IN_FLIGHT: u32 = 3;

/// Configuration errors raised while loading or validating settings
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file contents were not valid TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Parsed values failed validation
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Render device configuration
///
/// `frames_in_flight` is the CPU/GPU pipelining depth. It is independent of
/// the swapchain image count, which the surface decides at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Application name reported to the Vulkan instance
    pub application_name: String,
    /// Number of frames the CPU may record ahead of the GPU (ring depth)
    pub frames_in_flight: u32,
    /// Whether to enable validation layers; `None` means debug builds only
    pub enable_validation: Option<bool>,
    /// Prefer the low-latency MAILBOX present mode when the surface offers it
    pub prefer_mailbox: bool,
    /// Default capacity for shader resource group pools
    pub max_bind_groups: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            application_name: "gpu_frame application".to_string(),
            frames_in_flight: 2,
            enable_validation: None,
            prefer_mailbox: true,
            max_bind_groups: 64,
        }
    }
}

impl RenderConfig {
    /// Parse a configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(ConfigError::Invalid(format!(
                "frames_in_flight must be between 1 and {}, got {}",
                MAX_FRAMES_IN_FLIGHT, self.frames_in_flight
            )));
        }
        if self.max_bind_groups == 0 {
            return Err(ConfigError::Invalid(
                "max_bind_groups must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the validation toggle for the current build profile
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RenderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 2);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = RenderConfig::from_toml_str("frames_in_flight = 3\n").unwrap();
        assert_eq!(config.frames_in_flight, 3);
        assert!(config.prefer_mailbox);
        assert_eq!(config.max_bind_groups, 64);
    }

    #[test]
    fn test_zero_frames_rejected() {
        let result = RenderConfig::from_toml_str("frames_in_flight = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_excessive_ring_depth_rejected() {
        let result = RenderConfig::from_toml_str("frames_in_flight = 8\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_explicit_validation_toggle_wins() {
        let config = RenderConfig {
            enable_validation: Some(false),
            ..RenderConfig::default()
        };
        assert!(!config.validation_enabled());
    }

    #[test]
    fn test_malformed_toml_reports_parse_error() {
        let result = RenderConfig::from_toml_str("frames_in_flight = [nope");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
