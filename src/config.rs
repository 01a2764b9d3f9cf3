//! Harvester configuration
//!
//! Read from a YAML file; every section is optional and falls back to the
//! defaults below. Command-line flags override file values.
//!
//! ```yaml
//! database: /var/lib/change-discovery/harvest.db
//! http:
//!   timeout_secs: 30
//! crawl:
//!   max_pages: 5000
//! backfill:
//!   pause_secs: 6
//!   exponential: true
//!   max_pause_secs: 120
//!   max_consecutive_failures: 5
//! providers:
//!   - tag: utk
//!     endpoint: https://example.org/activity/all-changes
//! ```

use crate::crawl::{CrawlOptions, DEFAULT_MAX_PAGES};
use crate::ingest::{Backoff, BackfillPolicy, DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_PAUSE};
use crate::transport::DEFAULT_USER_AGENT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const APP_DIR: &str = "change-discovery";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("provider `{0}` is listed more than once")]
    DuplicateProvider(String),

    #[error("provider `{tag}` endpoint must be an https URL, got {endpoint}")]
    InsecureEndpoint { tag: String, endpoint: String },
}

/// One activity feed to harvest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Short tag stored on every record from this feed
    pub tag: String,
    /// URL of the feed's `OrderedCollection`
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// 0 disables the page bound
    pub max_pages: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    pub pause_secs: u64,
    pub exponential: bool,
    pub max_pause_secs: u64,
    pub max_consecutive_failures: u32,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            pause_secs: DEFAULT_PAUSE.as_secs(),
            exponential: false,
            max_pause_secs: 120,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// SQLite file; defaults to the platform data directory
    pub database: Option<PathBuf>,
    pub http: HttpConfig,
    pub crawl: CrawlConfig,
    pub backfill: BackfillConfig,
    pub providers: Vec<ProviderConfig>,
}

impl HarvestConfig {
    /// Parse and validate YAML text. `path` is only used in error messages.
    pub fn from_yaml(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(path, &text)
    }

    /// Load `path` if given, else the default location if it exists, else
    /// the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.tag.as_str()) {
                return Err(ConfigError::DuplicateProvider(provider.tag.clone()));
            }
            if !provider.endpoint.starts_with("https://") {
                return Err(ConfigError::InsecureEndpoint {
                    tag: provider.tag.clone(),
                    endpoint: provider.endpoint.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn provider(&self, tag: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.tag == tag)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(default_db_path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    pub fn crawl_options(&self) -> CrawlOptions {
        match self.crawl.max_pages {
            0 => CrawlOptions::new().unbounded(),
            n => CrawlOptions::new().with_max_pages(n),
        }
    }

    pub fn backfill_policy(&self) -> BackfillPolicy {
        let backoff = if self.backfill.exponential {
            Backoff::Exponential {
                max: Duration::from_secs(self.backfill.max_pause_secs),
            }
        } else {
            Backoff::Fixed
        };
        BackfillPolicy::default()
            .with_pause(Duration::from_secs(self.backfill.pause_secs))
            .with_backoff(backoff)
            .with_max_consecutive_failures(self.backfill.max_consecutive_failures)
    }
}

/// `<config dir>/change-discovery/config.yaml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.yaml"))
}

/// `<data dir>/change-discovery/harvest.db`
pub fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join(APP_DIR).join("harvest.db")
}
