//! Configuration for hearth.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (HEARTH_HOME, HEARTH_DB)
//! 2. Config file (.hearth/config.yaml)
//! 3. Defaults (~/.hearth, ~/.hearth/hearth.db)
//!
//! Provider credentials (HOUSE_DATA_API_KEY, GOOGLE_API_KEY) are read from
//! the environment only and never from the config file.
//!
//! Config file discovery:
//! - Searches current directory and parents for .hearth/config.yaml
//! - Paths in config file are relative to the .hearth/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::RetryPolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<Settings, String>> = OnceLock::new();

pub const HOME_ENV: &str = "HEARTH_HOME";
pub const DB_ENV: &str = "HEARTH_DB";
pub const HOUSE_DATA_KEY_ENV: &str = "HOUSE_DATA_API_KEY";
pub const GOOGLE_KEY_ENV: &str = "GOOGLE_API_KEY";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    pub retry: Option<RetryPolicy>,
    pub workers: Option<usize>,
    pub enrichment: Option<EnrichmentSettings>,
    pub http: Option<HttpSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .hearth/)
    pub home: Option<String>,
    /// Database file (relative to .hearth/)
    pub database: Option<String>,
}

/// Tunables of the enrichment workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentSettings {
    /// Annual interest rate (percent) used for financing projections
    #[serde(default = "default_interest_rate")]
    pub interest_rate: f64,

    /// Run the recently-sold comparables step
    #[serde(default)]
    pub recently_sold: bool,

    #[serde(default = "default_recently_sold_limit")]
    pub recently_sold_limit: u32,

    /// Nearby-places search radius in meters
    #[serde(default = "default_places_radius")]
    pub places_radius_m: f64,

    #[serde(default = "default_places_max_results")]
    pub places_max_results: u32,
}

fn default_interest_rate() -> f64 {
    5.49
}
fn default_recently_sold_limit() -> u32 {
    10
}
fn default_places_radius() -> f64 {
    4000.0
}
fn default_places_max_results() -> u32 {
    20
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            interest_rate: default_interest_rate(),
            recently_sold: false,
            recently_sold_limit: default_recently_sold_limit(),
            places_radius_m: default_places_radius(),
            places_max_results: default_places_max_results(),
        }
    }
}

/// Provider endpoints and client behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Per-request timeout
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_realty_base_url")]
    pub realty_base_url: String,

    #[serde(default = "default_places_base_url")]
    pub places_base_url: String,

    /// From HOUSE_DATA_API_KEY
    #[serde(skip)]
    pub house_data_api_key: Option<String>,

    /// From GOOGLE_API_KEY
    #[serde(skip)]
    pub google_api_key: Option<String>,
}

fn default_timeout() -> u64 {
    30
}
fn default_realty_base_url() -> String {
    "https://realty-in-us.p.rapidapi.com".to_string()
}
fn default_places_base_url() -> String {
    "https://places.googleapis.com".to_string()
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            realty_base_url: default_realty_base_url(),
            places_base_url: default_places_base_url(),
            house_data_api_key: None,
            google_api_key: None,
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct Settings {
    /// State directory
    pub home: PathBuf,
    /// SQLite database file
    pub database: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub retry: RetryPolicy,
    /// Dispatcher worker count
    pub workers: usize,
    pub enrichment: EnrichmentSettings,
    pub http: HttpSettings,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".hearth").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Non-empty environment variable
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Load configuration from all sources
fn load_config() -> Result<Settings> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".hearth");

    resolve_settings(find_config_file(), default_home, env_var)
}

/// Merge a config file, environment lookups and defaults into settings
fn resolve_settings(
    config_file: Option<PathBuf>,
    default_home: PathBuf,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    let (config, config_dir) = match config_file.as_deref() {
        Some(path) => (
            load_config_file(path)?,
            path.parent().map(Path::to_path_buf),
        ),
        None => (ConfigFile::default(), None),
    };

    let home = if let Some(env_home) = env(HOME_ENV) {
        PathBuf::from(env_home)
    } else if let (Some(home_path), Some(dir)) = (&config.paths.home, &config_dir) {
        resolve_path(dir, home_path)
    } else {
        default_home
    };

    let database = if let Some(env_db) = env(DB_ENV) {
        PathBuf::from(env_db)
    } else if let (Some(db_path), Some(dir)) = (&config.paths.database, &config_dir) {
        resolve_path(dir, db_path)
    } else {
        home.join("hearth.db")
    };

    let mut http = config.http.unwrap_or_default();
    http.house_data_api_key = env(HOUSE_DATA_KEY_ENV);
    http.google_api_key = env(GOOGLE_KEY_ENV);

    Ok(Settings {
        home,
        database,
        config_file,
        retry: config.retry.unwrap_or_default(),
        workers: config.workers.unwrap_or(4).max(1),
        enrichment: config.enrichment.unwrap_or_default(),
        http,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static Settings> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<Settings> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let hearth_dir = dir.join(".hearth");
        std::fs::create_dir_all(&hearth_dir).unwrap();

        let config_path = hearth_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "{}", body).unwrap();
        config_path
    }

    #[test]
    fn test_defaults_without_file() {
        let settings =
            resolve_settings(None, PathBuf::from("/home/u/.hearth"), no_env).unwrap();

        assert_eq!(settings.home, PathBuf::from("/home/u/.hearth"));
        assert_eq!(settings.database, PathBuf::from("/home/u/.hearth/hearth.db"));
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.retry, RetryPolicy::default());
        assert_eq!(settings.enrichment.interest_rate, 5.49);
        assert!(!settings.enrichment.recently_sold);
        assert_eq!(settings.http.timeout_seconds, 30);
        assert!(settings.http.house_data_api_key.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(
            temp.path(),
            r#"
version: "1.0"
paths:
  database: ./data/hearth.db
retry:
  max_attempts: 5
workers: 2
enrichment:
  interest_rate: 6.25
  recently_sold: true
http:
  timeout_seconds: 10
"#,
        );

        let settings =
            resolve_settings(Some(config_path.clone()), PathBuf::from("/home/u/.hearth"), no_env)
                .unwrap();

        assert_eq!(settings.config_file, Some(config_path.clone()));
        assert_eq!(
            settings.database,
            config_path.parent().unwrap().join("./data/hearth.db")
        );
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.initial_delay_ms, 1000);
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.enrichment.interest_rate, 6.25);
        assert!(settings.enrichment.recently_sold);
        assert_eq!(settings.enrichment.places_max_results, 20);
        assert_eq!(settings.http.timeout_seconds, 10);
        assert_eq!(settings.http.places_base_url, "https://places.googleapis.com");
    }

    #[test]
    fn test_environment_wins() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(temp.path(), "paths:\n  home: ./state\n");

        let env: HashMap<&str, &str> = [
            (HOME_ENV, "/srv/hearth"),
            (HOUSE_DATA_KEY_ENV, "rapid-key"),
            (GOOGLE_KEY_ENV, "google-key"),
        ]
        .into_iter()
        .collect();

        let settings = resolve_settings(Some(config_path), PathBuf::from("/unused"), |name| {
            env.get(name).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(settings.home, PathBuf::from("/srv/hearth"));
        assert_eq!(settings.database, PathBuf::from("/srv/hearth/hearth.db"));
        assert_eq!(settings.http.house_data_api_key.as_deref(), Some("rapid-key"));
        assert_eq!(settings.http.google_api_key.as_deref(), Some("google-key"));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
