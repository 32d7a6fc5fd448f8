//! Environment configuration and resolution
//!
//! `keel.yaml` maps environment names to connection settings. Resolving an
//! environment yields the label used by the production policy and a live
//! backend; credentials come from the URL or the variable it names, never
//! from a secret store.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use keel_migrate::backend::postgres::PgBackendConfig;
use keel_migrate::state::DEFAULT_TRACKING_TABLE;
use keel_migrate::{Environment, PgBackend, TrackingTable};
use serde::Deserialize;
use url::Url;

fn default_tracking_table() -> String {
    DEFAULT_TRACKING_TABLE.to_string()
}

fn default_preflight_delay() -> u64 {
    10
}

fn default_max_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    30
}

/// Contents of `keel.yaml`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeelConfig {
    #[serde(default = "default_tracking_table")]
    pub tracking_table: String,
    pub environments: BTreeMap<String, EnvironmentConfig>,
}

/// Connection settings for one environment
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentConfig {
    /// Inline connection URL
    pub url: Option<String>,
    /// Name of the variable holding the connection URL
    pub url_env: Option<String>,
    /// Force production safety rules for a label that does not imply them
    #[serde(default)]
    pub production: bool,
    #[serde(default = "default_preflight_delay")]
    pub preflight_delay_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

impl KeelConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: KeelConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        TrackingTable::new(&self.tracking_table)?;
        if self.environments.is_empty() {
            bail!("no environments configured");
        }
        for (name, env) in &self.environments {
            match (&env.url, &env.url_env) {
                (Some(_), Some(_)) => bail!("environment '{}': set either url or url_env, not both", name),
                (None, None) => bail!("environment '{}': one of url or url_env is required", name),
                _ => {}
            }
        }
        Ok(())
    }

    pub fn tracking_table(&self) -> Result<TrackingTable> {
        Ok(TrackingTable::new(&self.tracking_table)?)
    }

    pub fn environment(&self, name: &str) -> Result<&EnvironmentConfig> {
        self.environments.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.environments.keys().map(String::as_str).collect();
            anyhow!("unknown environment '{}' (configured: {})", name, known.join(", "))
        })
    }
}

impl EnvironmentConfig {
    /// Connection URL, read from the environment when `url_env` is set
    pub fn database_url(&self) -> Result<String> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        let var = self
            .url_env
            .as_deref()
            .ok_or_else(|| anyhow!("no connection URL configured"))?;
        std::env::var(var).with_context(|| format!("environment variable {} is not set", var))
    }

    pub fn preflight_delay(&self) -> Duration {
        Duration::from_secs(self.preflight_delay_secs)
    }

    pub fn pool_config(&self) -> PgBackendConfig {
        PgBackendConfig {
            max_connections: self.max_connections.max(1),
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
        }
    }
}

/// Mask the password of a connection URL for display
pub fn mask_url(database_url: &str) -> String {
    Url::parse(database_url)
        .map(|mut url| {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        })
        .unwrap_or_else(|_| "postgresql://***".to_string())
}

/// A configured environment with a live connection
pub struct ResolvedEnvironment {
    pub environment: Environment,
    pub backend: PgBackend,
    pub tracking_table: TrackingTable,
    pub preflight_delay: Duration,
}

/// Look up `name` in the configuration and connect to it
pub async fn resolve(config: &KeelConfig, name: &str) -> Result<ResolvedEnvironment> {
    let settings = config.environment(name)?;
    let environment = Environment::new(name).with_production(settings.production);
    let database_url = settings.database_url()?;
    let masked_url = mask_url(&database_url);

    tracing::debug!(environment = %environment, target = %masked_url, "connecting");
    let backend = PgBackend::connect(&database_url, masked_url.clone(), &settings.pool_config())
        .await
        .with_context(|| format!("failed to connect to {}", masked_url))?;

    Ok(ResolvedEnvironment {
        environment,
        backend,
        tracking_table: config.tracking_table()?,
        preflight_delay: settings.preflight_delay(),
    })
}
