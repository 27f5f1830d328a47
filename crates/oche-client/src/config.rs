//! Client configuration.

use std::path::{Path, PathBuf};

use oche_core::{ChatConfig, LayoutConfig, MediaConfig, SessionConfig, TypingConfig};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Everything the application needs, with defaults for every field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the web backend issuing join tokens.
    pub token_endpoint: String,
    /// Room to request; the backend default when unset.
    pub room: Option<String>,
    /// Where the panel layout is persisted; not persisted when unset.
    pub layout_path: Option<PathBuf>,
    /// Connection lifecycle timing.
    pub session: SessionConfig,
    /// Chat limits.
    pub chat: ChatConfig,
    /// Outgoing typing notification timing.
    pub typing: TypingConfig,
    /// Capture quality.
    pub media: MediaConfig,
    /// Panel grid.
    pub layout: LayoutConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            token_endpoint: "http://localhost:4321".to_string(),
            room: None,
            layout_path: None,
            session: SessionConfig::default(),
            chat: ChatConfig::default(),
            typing: TypingConfig::default(),
            media: MediaConfig::default(),
            layout: LayoutConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{io::Write, time::Duration};

    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "token_endpoint": "https://darts.example",
                "session": {{ "backoff_cap": {{ "secs": 10, "nanos": 0 }} }},
                "chat": {{ "retention": 20 }}
            }}"#
        )
        .unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.token_endpoint, "https://darts.example");
        assert_eq!(config.session.backoff_cap, Duration::from_secs(10));
        assert_eq!(config.session.backoff_base, Duration::from_secs(1));
        assert_eq!(config.chat.retention, 20);
        assert_eq!(config.chat.max_content_chars, 1000);
        assert_eq!(config.layout, LayoutConfig::default());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClientConfig::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
    }

    #[test]
    fn malformed_file_is_json_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let err = ClientConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ClientError::Json(_)));
    }
}
