//! Configuration for simbuf-rs
//!
//! A [`BufferConfig`] sizes the shared buffer and tunes how it fans work out.
//! It is stored as TOML:
//!
//! ```toml
//! initial_size = 8192
//! parallel_threshold = 256
//! track_dirty_pushes = true
//! log_dir = "/var/log/simbuf"
//! ```
//!
//! # Config Location
//!
//! [`BufferConfig::load_or_default`] reads `simbuf.toml` from the
//! platform-appropriate config directory:
//! - **Linux**: `~/.config/dev.hxyulin.simbuf-rs/`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.simbuf-rs/`
//! - **Windows**: `%APPDATA%\dev.hxyulin.simbuf-rs\`

use crate::error::{Result, ResultExt, SimBufError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "dev.hxyulin.simbuf-rs";

/// Config filename
pub const CONFIG_FILE: &str = "simbuf.toml";

/// Default number of frames per variable buffer
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Default number of variables above which bulk operations run in parallel
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 256;

/// Largest accepted buffer size
pub const MAX_BUFFER_SIZE: usize = 1 << 26;

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the default config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

/// Shared buffer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Number of frames each variable buffer holds at creation
    pub initial_size: usize,

    /// Bulk writes and resizes run in parallel above this many variables
    pub parallel_threshold: usize,

    /// Only visit linked buffers that reported a push when processing pushes
    pub track_dirty_pushes: bool,

    /// Directory for rolling log files, console only when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            initial_size: DEFAULT_BUFFER_SIZE,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            track_dirty_pushes: true,
            log_dir: None,
        }
    }
}

impl BufferConfig {
    /// Check the values are usable
    pub fn validate(&self) -> Result<()> {
        if self.initial_size == 0 {
            return Err(SimBufError::Config(
                "initial_size must be greater than zero".to_string(),
            ));
        }
        if self.initial_size > MAX_BUFFER_SIZE {
            return Err(SimBufError::Config(format!(
                "initial_size {} exceeds the maximum of {}",
                self.initial_size, MAX_BUFFER_SIZE
            )));
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| SimBufError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(SimBufError::from)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml_str(&content)
    }

    /// Load the config from the default location, returning defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(SimBufError::from)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| SimBufError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(SimBufError::from)
            .with_context(|| format!("Failed to write config file {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = BufferConfig::default();
        assert_eq!(config.initial_size, 8192);
        assert_eq!(config.parallel_threshold, 256);
        assert!(config.track_dirty_pushes);
        assert!(config.log_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let config = BufferConfig {
            initial_size: 1024,
            parallel_threshold: 16,
            track_dirty_pushes: false,
            log_dir: Some(dir.path().join("logs")),
        };
        config.save(&path).unwrap();

        let loaded = BufferConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config = BufferConfig::from_toml_str("initial_size = 64").unwrap();
        assert_eq!(config.initial_size, 64);
        assert_eq!(config.parallel_threshold, DEFAULT_PARALLEL_THRESHOLD);
        assert!(config.track_dirty_pushes);
    }

    #[test]
    fn test_invalid_size_rejected() {
        let err = BufferConfig::from_toml_str("initial_size = 0").unwrap_err();
        assert!(err.to_string().contains("initial_size"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = BufferConfig::load(dir.path().join("absent.toml"));
        match result {
            Err(SimBufError::WithContext { context, source }) => {
                assert!(context.contains("absent.toml"));
                assert!(matches!(
                    *source,
                    SimBufError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound
                ));
            }
            other => panic!("expected an IO error with context, got {:?}", other),
        }
    }

    #[test]
    fn test_save_into_file_reports_io_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let result = BufferConfig::default().save(blocker.join(CONFIG_FILE));
        match result {
            Err(SimBufError::WithContext { source, .. }) => {
                assert!(matches!(*source, SimBufError::Io(_)));
            }
            other => panic!("expected an IO error with context, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_error() {
        assert!(BufferConfig::from_toml_str("initial_size = \"big\"").is_err());
    }
}
