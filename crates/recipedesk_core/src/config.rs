//! Editor configuration.
//!
//! # Responsibility
//! - Hold validation limits and debounce windows for one editor session.
//! - Load overrides from a JSON file; absent fields keep defaults.
//!
//! # Invariants
//! - Size caps and the key context length are never zero after `validate()`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

/// Image payload cap (10 MB).
pub const DEFAULT_IMAGE_MAX_BYTES: u64 = 10 * 1024 * 1024;
/// Attachment file payload cap (50 MB).
pub const DEFAULT_ATTACHMENT_MAX_BYTES: u64 = 50 * 1024 * 1024;

/// Configuration loading/validation error.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

/// Limits and timing for the editor session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EditorConfig {
    pub image_max_bytes: u64,
    pub attachment_max_bytes: u64,
    /// Lower-case MIME types accepted for images.
    pub image_mime_types: Vec<String>,
    /// Lower-case file extensions (without dot) accepted for attachment files.
    pub attachment_extensions: Vec<String>,
    pub preview_debounce_ms: u64,
    pub resolver_debounce_ms: u64,
    pub autosave_debounce_ms: u64,
    /// Upper bound for the slug derived from category + step label.
    pub max_key_context_len: usize,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            image_max_bytes: DEFAULT_IMAGE_MAX_BYTES,
            attachment_max_bytes: DEFAULT_ATTACHMENT_MAX_BYTES,
            image_mime_types: [
                "image/png",
                "image/jpeg",
                "image/gif",
                "image/webp",
                "image/svg+xml",
            ]
            .iter()
            .map(|value| value.to_string())
            .collect(),
            attachment_extensions: [
                "sh", "bat", "cmd", "ps1", "py", "exe", "msi", "jar", "zip", "json", "yaml", "yml",
                "xml", "txt", "csv", "sql",
            ]
            .iter()
            .map(|value| value.to_string())
            .collect(),
            preview_debounce_ms: 50,
            resolver_debounce_ms: 500,
            autosave_debounce_ms: 3000,
            max_key_context_len: 48,
        }
    }
}

impl EditorConfig {
    /// Parses a JSON document; missing fields take default values.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads config from `path`, or defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image_max_bytes == 0 {
            return Err(ConfigError::Invalid("imageMaxBytes must be positive"));
        }
        if self.attachment_max_bytes == 0 {
            return Err(ConfigError::Invalid("attachmentMaxBytes must be positive"));
        }
        if self.max_key_context_len == 0 {
            return Err(ConfigError::Invalid("maxKeyContextLen must be positive"));
        }
        Ok(())
    }

    pub fn preview_debounce(&self) -> Duration {
        Duration::from_millis(self.preview_debounce_ms)
    }

    pub fn resolver_debounce(&self) -> Duration {
        Duration::from_millis(self.resolver_debounce_ms)
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EditorConfig, DEFAULT_IMAGE_MAX_BYTES};

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EditorConfig::from_json_str(r#"{"attachmentMaxBytes": 1024}"#).unwrap();
        assert_eq!(config.attachment_max_bytes, 1024);
        assert_eq!(config.image_max_bytes, DEFAULT_IMAGE_MAX_BYTES);
        assert_eq!(config.autosave_debounce_ms, 3000);
    }

    #[test]
    fn zero_caps_are_rejected() {
        let err = EditorConfig::from_json_str(r#"{"imageMaxBytes": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EditorConfig::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, EditorConfig::default());
    }
}
