//! Process and HTTP client configuration.
//!
//! `AppConfig` is read once at startup and handed to `App::start`. The debug
//! flag defaults to the build profile; everything else can be overlaid from
//! `GIFFUN_*` environment variables.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use ::config::{Config, Environment};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;

/// Development endpoint used when the debug flag is set.
pub const DEV_BASE_URL: &str = "http://192.168.31.177:3000";
/// Production endpoint.
pub const PROD_BASE_URL: &str = "http://api.quxianggif.com";
/// Default Qiniu form-upload host.
pub const DEFAULT_UPLOAD_HOST: &str = "https://upload.qiniup.com";

/// Cache directory relative to the storage root.
pub const CACHE_DIR: &str = "yuyinfang/cache";
/// 100 MiB.
pub const CACHE_MAX_SIZE: u64 = 100 * 1024 * 1024;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

const ENV_PREFIX: &str = "GIFFUN";

/// Application-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub debug: bool,
    pub dev_base_url: String,
    pub prod_base_url: String,
    pub package_name: String,
    pub version_name: String,
    /// Raw signing certificates, hex encoded.
    #[serde(deserialize_with = "list_or_csv")]
    pub signatures: Vec<String>,
    pub device_brand: String,
    pub device_model: String,
    /// Root of external storage; the response cache lives below it.
    pub storage_root: PathBuf,
    pub upload_host: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debug: cfg!(debug_assertions),
            dev_base_url: DEV_BASE_URL.to_string(),
            prod_base_url: PROD_BASE_URL.to_string(),
            package_name: "com.dqdana.code".to_string(),
            version_name: env!("CARGO_PKG_VERSION").to_string(),
            signatures: Vec::new(),
            device_brand: String::new(),
            device_model: String::new(),
            storage_root: std::env::temp_dir(),
            upload_host: DEFAULT_UPLOAD_HOST.to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults overlaid with `GIFFUN_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Environment::with_prefix(ENV_PREFIX))
    }

    /// Same as `from_env`, reading variables from `vars` instead of the
    /// process environment.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::load(Environment::with_prefix(ENV_PREFIX).source(Some(vars)))
    }

    fn load(env: Environment) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(env)
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.storage_root.join(CACHE_DIR)
    }
}

/// Accepts a list, or a comma separated string as environment variables
/// carry it.
fn list_or_csv<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Csv(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::List(list) => list,
        Raw::Csv(csv) => csv
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    })
}

/// Disk cache location and size cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub max_size: u64,
}

/// Settings the HTTP client is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientConfig {
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub read_timeout: Duration,
    pub cache: Option<CacheConfig>,
    pub retry_on_connection_failure: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            write_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            cache: None,
            retry_on_connection_failure: true,
        }
    }
}

impl HttpClientConfig {
    /// Defaults plus the 100 MiB disk cache under the app's storage root.
    pub fn for_app(config: &AppConfig) -> Self {
        Self {
            cache: Some(CacheConfig {
                dir: config.cache_dir(),
                max_size: CACHE_MAX_SIZE,
            }),
            ..Self::default()
        }
    }
}
