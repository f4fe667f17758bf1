//! Named service configuration.
//!
//! Services are loaded from a TOML document with one `[services.<name>]` table
//! per service and may be overlaid with `CALLER_<SERVICE>_<FIELD>` environment
//! variables. Looking up an unknown service silently resolves to `default`.

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the fallback service.
pub const DEFAULT_SERVICE: &str = "default";

/// Request timeout in seconds when a service does not set one.
pub const DEFAULT_TIMEOUT: u64 = 30;

/// Number of attempts when a service does not set one (0 disables retry).
pub const DEFAULT_RETRIES: u32 = 0;

/// Delay between retry attempts in milliseconds when a service does not set one.
pub const DEFAULT_RETRY_AFTER: u64 = 100;

/// Authorization scheme used for token auth when none is configured.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Environment variable that points at the services file.
pub const CONFIG_ENV: &str = "CALLER_CONFIG";

/// Source of environment variables, abstracted so the overlay can be tested.
#[cfg_attr(test, mockall::automock)]
pub trait EnvSource {
    fn env_var(&self, key: &str) -> Result<String, env::VarError>;
}

/// Reads the process environment.
pub struct SystemEnv;

impl EnvSource for SystemEnv {
    fn env_var(&self, key: &str) -> Result<String, env::VarError> {
        env::var(key)
    }
}

/// The `[services.<name>.auth]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// One of `basic`, `digest` or `token`. Anything else disables auth.
    #[serde(rename = "type")]
    pub kind: String,
    pub user: String,
    pub password: String,
    pub token: String,
    pub token_type: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            kind: String::new(),
            user: String::new(),
            password: String::new(),
            token: String::new(),
            token_type: DEFAULT_TOKEN_TYPE.to_string(),
        }
    }
}

/// Defaults for every request made against one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Name of the entry this configuration was resolved from.
    #[serde(skip)]
    pub name: String,
    /// Base URL; request paths are joined to it with a `/`.
    pub url: String,
    /// Per-request timeout in seconds; 0 means no timeout.
    pub timeout: u64,
    /// Total attempts when greater than zero.
    pub retries: u32,
    /// Fixed delay between attempts in milliseconds.
    pub retry_after: u64,
    pub cookies_domain: String,
    pub auth: AuthConfig,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SERVICE.to_string(),
            url: String::new(),
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            retry_after: DEFAULT_RETRY_AFTER,
            cookies_domain: String::new(),
            auth: AuthConfig::default(),
            headers: BTreeMap::new(),
            cookies: BTreeMap::new(),
        }
    }
}

impl ServiceConfig {
    /// `None` when the service disables the timeout with `timeout = 0`.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_after)
    }

    /// Applies `CALLER_<SERVICE>_<FIELD>` variables. Returns true if any were set.
    fn apply_env(&mut self, service: &str, env: &dyn EnvSource) -> bool {
        let prefix = env_prefix(service);
        let lookup = |field: &str| env.env_var(&format!("{}_{}", prefix, field)).ok();
        let mut applied = false;

        let mut set_string = |field: &str, target: &mut String| {
            if let Some(value) = lookup(field) {
                *target = value;
                applied = true;
            }
        };
        set_string("URL", &mut self.url);
        set_string("COOKIES_DOMAIN", &mut self.cookies_domain);
        set_string("AUTH_TYPE", &mut self.auth.kind);
        set_string("AUTH_USER", &mut self.auth.user);
        set_string("AUTH_PASSWORD", &mut self.auth.password);
        set_string("AUTH_TOKEN", &mut self.auth.token);
        set_string("AUTH_TOKEN_TYPE", &mut self.auth.token_type);

        if let Some(value) = parse_env(&prefix, "TIMEOUT", lookup("TIMEOUT")) {
            self.timeout = value;
            applied = true;
        }
        if let Some(value) = parse_env(&prefix, "RETRIES", lookup("RETRIES")) {
            self.retries = value;
            applied = true;
        }
        if let Some(value) = parse_env(&prefix, "RETRY_AFTER", lookup("RETRY_AFTER")) {
            self.retry_after = value;
            applied = true;
        }

        applied
    }
}

fn parse_env<T: std::str::FromStr>(prefix: &str, field: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}_{}: '{}' is not a valid number", prefix, field, raw);
            None
        }
    }
}

/// `billing-api` becomes `CALLER_BILLING_API`.
fn env_prefix(service: &str) -> String {
    let name: String = service
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("CALLER_{}", name)
}

#[derive(Deserialize, Default)]
struct ServicesFile {
    #[serde(default)]
    services: BTreeMap<String, toml::Table>,
}

/// All configured services keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceConfigStore {
    services: BTreeMap<String, ServiceConfig>,
}

impl ServiceConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a services document. Empty service tables are treated as absent.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: ServicesFile =
            toml::from_str(contents).context("Failed to parse services configuration")?;

        let mut store = Self::new();
        for (name, table) in file.services {
            if table.is_empty() {
                debug!("Service '{}' is empty, it will resolve to default", name);
                continue;
            }
            let config: ServiceConfig = toml::Value::Table(table)
                .try_into()
                .with_context(|| format!("Invalid configuration for service '{}'", name))?;
            store.insert(name, config);
        }
        Ok(store)
    }

    #[tracing::instrument]
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to load config file {}", path.display()))
    }

    /// `$CALLER_CONFIG`, else `<config dir>/caller/services.toml`.
    pub fn default_path(env: &dyn EnvSource) -> Option<PathBuf> {
        if let Ok(path) = env.env_var(CONFIG_ENV) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        dirs::config_dir().map(|dir| dir.join("caller").join("services.toml"))
    }

    /// Overlays environment variables onto every known service and `default`.
    pub fn with_env(mut self, env: &dyn EnvSource) -> Self {
        for (name, config) in self.services.iter_mut() {
            if config.apply_env(name, env) {
                debug!("Applied environment overrides to service '{}'", name);
            }
        }

        if !self.services.contains_key(DEFAULT_SERVICE) {
            let mut config = ServiceConfig::default();
            if config.apply_env(DEFAULT_SERVICE, env) {
                debug!("Created default service from environment");
                self.insert(DEFAULT_SERVICE, config);
            }
        }

        self
    }

    pub fn insert(&mut self, name: impl Into<String>, mut config: ServiceConfig) {
        let name = name.into();
        config.name = name.clone();
        self.services.insert(name, config);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Resolves a service, falling back to `default` and then to built-in defaults.
    pub fn load(&self, service: &str) -> ServiceConfig {
        if !service.is_empty() {
            if let Some(config) = self.services.get(service) {
                return config.clone();
            }
            debug!("Service '{}' is not configured, using default", service);
        }

        self.services
            .get(DEFAULT_SERVICE)
            .cloned()
            .unwrap_or_default()
    }
}
