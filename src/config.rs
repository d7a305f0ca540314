use chrono::{Datelike, Local, NaiveDate};
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Base URL of the accounting data service
  pub url: String,
  /// Per-request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  120
}

/// Which physical store holds cache entries.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
  /// Directory store when the cache directory is writable, else SQLite
  #[default]
  Auto,
  Directory,
  Sqlite,
}

/// The "cache expiry days" setting: a number of days or `never`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheExpiry {
  Never,
  Days(u32),
}

impl Default for CacheExpiry {
  fn default() -> Self {
    CacheExpiry::Days(30)
  }
}

impl CacheExpiry {
  /// Maximum entry age, `None` when expiry is disabled (`never` or `0`).
  pub fn max_age(&self) -> Option<chrono::Duration> {
    match self {
      CacheExpiry::Never | CacheExpiry::Days(0) => None,
      CacheExpiry::Days(days) => Some(chrono::Duration::days(i64::from(*days))),
    }
  }
}

impl<'de> Deserialize<'de> for CacheExpiry {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'de>,
  {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
      Days(u32),
      Text(String),
    }

    match Raw::deserialize(deserializer)? {
      Raw::Days(days) => Ok(CacheExpiry::Days(days)),
      Raw::Text(text) => {
        let text = text.trim().to_lowercase();
        if text == "never" {
          return Ok(CacheExpiry::Never);
        }
        text
          .parse::<u32>()
          .map(CacheExpiry::Days)
          .map_err(|_| serde::de::Error::custom(format!("invalid cache expiry '{}'", text)))
      }
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  /// Root directory for the database, cache entries and logs
  pub dir: Option<PathBuf>,
  #[serde(default)]
  pub backend: BackendKind,
  #[serde(default)]
  pub expiry_days: CacheExpiry,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// First date of the dataset; full syncs start here
  #[serde(default = "default_origin_date")]
  pub origin_date: NaiveDate,
  #[serde(default = "default_slice_mode")]
  pub slice_mode: String,
  #[serde(default = "default_voucher_type_filter")]
  pub voucher_type_filter: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      origin_date: default_origin_date(),
      slice_mode: default_slice_mode(),
      voucher_type_filter: default_voucher_type_filter(),
    }
  }
}

/// Start of the current financial year (1 April).
fn default_origin_date() -> NaiveDate {
  let today = Local::now().date_naive();
  let year = if today.month() >= 4 {
    today.year()
  } else {
    today.year() - 1
  };
  NaiveDate::from_ymd_opt(year, 4, 1).unwrap_or(today)
}

fn default_slice_mode() -> String {
  "daily".to_string()
}

fn default_voucher_type_filter() -> String {
  "Sales".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tallysync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tallysync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/tallysync/config.yaml\n\
                 with at least a `server.url` entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tallysync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tallysync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Root directory for all local data.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.cache.dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("tallysync"))
  }

  /// Get the API token from the environment.
  ///
  /// The token is optional; servers on a trusted network may not need one.
  pub fn get_api_token() -> Option<String> {
    std::env::var("TALLYSYNC_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("server:\n  url: http://localhost:9000\n").unwrap();
    assert_eq!(config.server.timeout_secs, 120);
    assert_eq!(config.cache.backend, BackendKind::Auto);
    assert_eq!(config.cache.expiry_days, CacheExpiry::Days(30));
    assert_eq!(config.sync.voucher_type_filter, "Sales");
    assert_eq!(config.sync.origin_date.month(), 4);
  }

  #[test]
  fn test_expiry_accepts_number_or_never() {
    let yaml = "server:\n  url: http://x\ncache:\n  expiry_days: never\n";
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.cache.expiry_days, CacheExpiry::Never);
    assert!(config.cache.expiry_days.max_age().is_none());

    let yaml = "server:\n  url: http://x\ncache:\n  expiry_days: 14\n";
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(
      config.cache.expiry_days.max_age(),
      Some(chrono::Duration::days(14))
    );

    let yaml = "server:\n  url: http://x\ncache:\n  expiry_days: 0\n";
    let config = Config::from_yaml(yaml).unwrap();
    assert!(config.cache.expiry_days.max_age().is_none());
  }

  #[test]
  fn test_invalid_expiry_is_rejected() {
    let yaml = "server:\n  url: http://x\ncache:\n  expiry_days: soon\n";
    assert!(Config::from_yaml(yaml).is_err());
  }

  #[test]
  fn test_sync_section() {
    let yaml = "server:\n  url: http://x\nsync:\n  origin_date: 2023-04-01\n  slice_mode: window\n";
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(
      config.sync.origin_date,
      NaiveDate::from_ymd_opt(2023, 4, 1).unwrap()
    );
    assert_eq!(config.sync.slice_mode, "window");
    assert_eq!(config.sync.voucher_type_filter, "Sales");
  }
}
