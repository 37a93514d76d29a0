//! Application configuration management.
//!
//! Holds the default TTL, the club the cache is scoped to, and the remote
//! data service endpoint.
//!
//! Configuration is stored at `~/.config/clubcache/config.json`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::cache::Ttl;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "clubcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default freshness window: 30 minutes.
pub const DEFAULT_TTL_SECS: i64 = 1800;

/// Environment overrides for the remote data service.
pub const ENV_API_URL: &str = "CLUBCACHE_API_URL";
pub const ENV_API_KEY: &str = "CLUBCACHE_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_ttl_secs: i64,
    pub club_id: Option<String>,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_ttl_secs: DEFAULT_TTL_SECS,
            club_id: None,
            api_url: None,
            api_key: None,
            cache_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `CLUBCACHE_API_URL` / `CLUBCACHE_API_KEY` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            self.api_url = Some(url);
        }
        if let Ok(key) = std::env::var(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        self
    }

    pub fn default_ttl(&self) -> Ttl {
        Ttl::secs(self.default_ttl_secs)
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }

        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;

        let mut path = cache_dir.join(APP_NAME);
        if let Some(ref club) = self.club_id {
            path = path.join(club);
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_from(&temp_dir.path().join("config.json")).unwrap();
        assert_eq!(config.default_ttl(), Ttl::secs(1800));
        assert!(config.club_id.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");
        let config = Config {
            default_ttl_secs: 600,
            club_id: Some("club-9".to_string()),
            ..Default::default()
        };

        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.default_ttl_secs, 600);
        assert_eq!(loaded.club_id.as_deref(), Some("club-9"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{"club_id":"abc"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.default_ttl_secs, DEFAULT_TTL_SECS);
        assert_eq!(config.club_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_cache_dir_override_and_club_scope() {
        let config = Config {
            cache_dir: Some(PathBuf::from("/tmp/cc")),
            ..Default::default()
        };
        assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/tmp/cc"));

        let scoped = Config {
            club_id: Some("abc".to_string()),
            ..Default::default()
        };
        if let Ok(dir) = scoped.cache_dir() {
            assert!(dir.ends_with("clubcache/abc"));
        }
    }
}
