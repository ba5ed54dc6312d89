//! Configuration management for the bridge
//!
//! This module handles loading, parsing, and validating the bridge
//! configuration from TOML files: the window mode, the buffer backend,
//! damage reporting, input tuning, output limits and logging.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration struct containing all bridge settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BridgeConfig {
    /// Window mode and buffer backend
    #[serde(default)]
    pub bridge: BridgeSection,

    /// Damage reporting
    #[serde(default)]
    pub damage: DamageConfig,

    /// Input translation
    #[serde(default)]
    pub input: InputConfig,

    /// Virtual output limits
    #[serde(default)]
    pub output: OutputConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which legacy windows become compositor surfaces
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum WindowMode {
    /// Every composite-redirected top-level gets its own surface
    Rootless,
    /// A single surface for the root window
    Fullscreen,
}

/// How pixmaps are shared with the compositor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum BufferBackend {
    /// Zero-copy buffers named by DRM flink names, needs authentication
    Drm,
    /// Shared-memory buffers passed as file descriptors
    Shm,
}

impl BufferBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            BufferBackend::Drm => "drm",
            BufferBackend::Shm => "shm",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeSection {
    /// Rootless or fullscreen
    pub mode: WindowMode,

    /// Preferred buffer backend
    pub buffer_backend: BufferBackend,

    /// Fall back to shared memory when DRM authentication fails
    #[serde(default = "BridgeSection::default_shm_fallback")]
    pub shm_fallback: bool,

    /// Compositor socket name (defaults to $WAYLAND_DISPLAY)
    #[serde(default)]
    pub display: Option<String>,
}

/// Damage emission policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DamageMode {
    /// One damage request per accumulated rectangle
    PerRect,
    /// A single bounding rectangle per surface
    Bounding,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DamageConfig {
    pub mode: DamageMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputConfig {
    /// Continuous axis units that make up one synthetic wheel click
    pub scroll_step: f64,

    /// Number of buttons on the legacy pointer device
    pub pointer_buttons: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,

    /// Screen size used until the compositor reports a mode
    pub default_width: u32,
    pub default_height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default level ("error", "warn", "info", "debug", "trace")
    pub level: String,

    /// Extra env_logger filter directives, e.g. "xwl_bridge::input=trace"
    #[serde(default)]
    pub filters: Vec<String>,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            mode: WindowMode::Rootless,
            buffer_backend: BufferBackend::Shm,
            shm_fallback: Self::default_shm_fallback(),
            display: None,
        }
    }
}

impl BridgeSection {
    fn default_shm_fallback() -> bool {
        true
    }
}

impl Default for DamageConfig {
    fn default() -> Self {
        Self {
            mode: DamageMode::PerRect,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            scroll_step: 10.0,
            pointer_buttons: 10,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            min_width: 320,
            min_height: 200,
            max_width: 8192,
            max_height: 8192,
            default_width: 800,
            default_height: 600,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            filters: Vec::new(),
        }
    }
}

const LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let expanded_path = expand_home(path.as_ref())?;

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: BridgeConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load the file if it exists, defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let expanded_path = expand_home(path.as_ref())?;
        if expanded_path.exists() {
            Self::load(expanded_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.input.scroll_step > 0.0 && self.input.scroll_step <= 1000.0) {
            anyhow::bail!("Invalid scroll_step: must be in (0, 1000]");
        }

        if !(3..=32).contains(&self.input.pointer_buttons) {
            anyhow::bail!("Invalid pointer_buttons: must be between 3 and 32");
        }

        let out = &self.output;
        if out.min_width == 0 || out.min_height == 0 {
            anyhow::bail!("Invalid output range: minimum size must be non-zero");
        }
        if out.min_width > out.max_width || out.min_height > out.max_height {
            anyhow::bail!(
                "Invalid output range: {}x{} exceeds {}x{}",
                out.min_width,
                out.min_height,
                out.max_width,
                out.max_height
            );
        }
        if !(out.min_width..=out.max_width).contains(&out.default_width)
            || !(out.min_height..=out.max_height).contains(&out.default_height)
        {
            anyhow::bail!(
                "Invalid default output size {}x{}",
                out.default_width,
                out.default_height
            );
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log level: {}", self.logging.level);
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }
}

fn expand_home(path: &Path) -> Result<PathBuf> {
    if path.to_string_lossy().starts_with('~') {
        let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
        let rest = path.strip_prefix("~").unwrap_or(path);
        Ok(Path::new(&home).join(rest))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests;

#[cfg(test)]
mod property_tests;
