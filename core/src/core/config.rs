use std::path::Path;

use serde::Deserialize;

use super::EngineCore;

const DEFAULT_GRACE_MS: i64 = 3000;
const DEFAULT_DB_FILE: &str = "messages.sqlite3";

/// Optional overrides read from `<data_dir>/consulta_config.json`. Missing or
/// malformed files fall back to defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct EngineConfig {
    /// Watermark grace window for the live subscription, in milliseconds.
    pub(crate) grace_ms: Option<i64>,
    pub(crate) db_file: Option<String>,
    /// Used to keep tests deterministic and offline.
    pub(crate) disable_network: Option<bool>,
}

pub(crate) fn load_engine_config(data_dir: &str) -> EngineConfig {
    let path = Path::new(data_dir).join("consulta_config.json");
    let Ok(bytes) = std::fs::read(&path) else {
        return EngineConfig::default();
    };
    serde_json::from_slice::<EngineConfig>(&bytes).unwrap_or_default()
}

impl EngineConfig {
    pub(crate) fn grace_ms(&self) -> i64 {
        self.grace_ms.unwrap_or(DEFAULT_GRACE_MS)
    }

    pub(crate) fn db_file(&self) -> &str {
        self.db_file.as_deref().unwrap_or(DEFAULT_DB_FILE)
    }
}

impl EngineCore {
    pub(super) fn network_enabled(&self) -> bool {
        if let Some(disable) = self.config.disable_network {
            return !disable;
        }
        std::env::var("CONSULTA_DISABLE_NETWORK").ok().as_deref() != Some("1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_engine_config(dir.path().to_str().unwrap());
        assert_eq!(config.grace_ms(), 3000);
        assert_eq!(config.db_file(), "messages.sqlite3");
        assert!(config.disable_network.is_none());
    }

    #[test]
    fn file_overrides_take_effect() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("consulta_config.json"),
            br#"{"grace_ms": 500, "disable_network": true}"#,
        )
        .unwrap();
        let config = load_engine_config(dir.path().to_str().unwrap());
        assert_eq!(config.grace_ms(), 500);
        assert_eq!(config.disable_network, Some(true));
        assert_eq!(config.db_file(), "messages.sqlite3");
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("consulta_config.json"), b"{not json").unwrap();
        let config = load_engine_config(dir.path().to_str().unwrap());
        assert_eq!(config.grace_ms(), 3000);
    }
}
