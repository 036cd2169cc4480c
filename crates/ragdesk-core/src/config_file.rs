use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ProcessingOptions;
use crate::backend::http::DEFAULT_API_URL;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub server: Option<ServerConfig>,
    pub ingest: Option<IngestConfig>,
    pub chat: Option<ChatConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub api_url: Option<String>,
    /// Per-request timeout. Unset means requests may wait indefinitely.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    pub collection: Option<String>,
    pub ocr: Option<bool>,
    pub image_summary: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    pub model: Option<String>,
}

/// Platform config directory path: `<config_dir>/ragdesk/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ragdesk").join("config.toml"))
}

/// Load config by cascading CWD `.ragdesk.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".ragdesk.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config");
            None
        }
    }
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let base_server = base.server.unwrap_or_default();
    let over_server = overlay.server.unwrap_or_default();
    let base_ingest = base.ingest.unwrap_or_default();
    let over_ingest = overlay.ingest.unwrap_or_default();
    let base_chat = base.chat.unwrap_or_default();
    let over_chat = overlay.chat.unwrap_or_default();

    ConfigFile {
        server: Some(ServerConfig {
            api_url: over_server.api_url.or(base_server.api_url),
            timeout_secs: over_server.timeout_secs.or(base_server.timeout_secs),
        }),
        ingest: Some(IngestConfig {
            collection: over_ingest.collection.or(base_ingest.collection),
            ocr: over_ingest.ocr.or(base_ingest.ocr),
            image_summary: over_ingest.image_summary.or(base_ingest.image_summary),
        }),
        chat: Some(ChatConfig {
            model: over_chat.model.or(base_chat.model),
        }),
    }
}

/// Settings with every default filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub timeout: Option<Duration>,
    pub collection: Option<String>,
    pub options: ProcessingOptions,
    pub model: Option<String>,
}

impl Settings {
    /// Resolve a config file, with `api_url_env` (from `RAGDESK_API_URL`)
    /// taking precedence over the file's server URL.
    pub fn resolve(config: &ConfigFile, api_url_env: Option<String>) -> Self {
        let server = config.server.clone().unwrap_or_default();
        let ingest = config.ingest.clone().unwrap_or_default();
        let defaults = ProcessingOptions::default();
        Self {
            api_url: api_url_env
                .filter(|u| !u.trim().is_empty())
                .or(server.api_url)
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            timeout: server
                .timeout_secs
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
            collection: ingest.collection.filter(|c| !c.trim().is_empty()),
            options: ProcessingOptions {
                ocr: ingest.ocr.unwrap_or(defaults.ocr),
                image_summary: ingest.image_summary.unwrap_or(defaults.image_summary),
            },
            model: config
                .chat
                .as_ref()
                .and_then(|c| c.model.clone())
                .filter(|m| !m.trim().is_empty()),
        }
    }
}
