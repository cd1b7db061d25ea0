use crate::error::ConfigError;
use crate::types::ProxyConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

pub const DEFAULT_REDDIT_BASE_URL: &str = "https://www.reddit.com";
pub const DEFAULT_CAPTCHA_BASE_URL: &str = "https://api.capsolver.com";
pub const DEFAULT_IP_ECHO_URL: &str = "https://httpbin.org/ip";

/// Process configuration: defaults, then an optional TOML file, then environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Skip the network login and store a placeholder session instead.
    pub dry_run: bool,
    pub online_window_minutes: u64,
    pub max_users: usize,
    /// Fernet key for the session file. Generated per process when absent.
    #[serde(skip_serializing)]
    pub encryption_key: Option<String>,
    pub state_file: PathBuf,
    #[serde(skip_serializing)]
    pub captcha_api_key: Option<String>,
    /// Site key of the login challenge, when one is known for the target.
    pub captcha_site_key: Option<String>,
    pub default_proxies: Vec<ProxyConfig>,
    pub use_default_proxies: bool,
    pub reddit_base_url: String,
    pub captcha_base_url: String,
    pub ip_echo_url: String,
    pub discovery_concurrency: usize,
    /// Demand the session cookie instead of accepting a 200/302 as a login.
    pub require_session_cookie: bool,
    pub user_agent: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            online_window_minutes: 60,
            max_users: 20,
            encryption_key: None,
            state_file: PathBuf::from(".state.enc"),
            captcha_api_key: None,
            captcha_site_key: None,
            default_proxies: Vec::new(),
            use_default_proxies: false,
            reddit_base_url: DEFAULT_REDDIT_BASE_URL.to_string(),
            captcha_base_url: DEFAULT_CAPTCHA_BASE_URL.to_string(),
            ip_echo_url: DEFAULT_IP_ECHO_URL.to_string(),
            discovery_concurrency: 4,
            require_session_cookie: false,
            user_agent: "reddit-outreach/0.1 (by u/tester)".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from `path` (if given) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
                path: path.display().to_string(),
            })?;
        let config = Self::from_toml(&contents)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::InvalidFormat {
            details: e.to_string(),
        })
    }

    /// Override fields from environment-style lookups. Empty values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(value) = get("DRY_RUN") {
            self.dry_run = parse_bool("DRY_RUN", &value)?;
        }
        if let Some(value) = get("ONLINE_WINDOW_MINUTES") {
            self.online_window_minutes = parse_value("ONLINE_WINDOW_MINUTES", &value)?;
        }
        if let Some(value) = get("MAX_USERS") {
            self.max_users = parse_value("MAX_USERS", &value)?;
        }
        if let Some(value) = get("ENCRYPTION_KEY") {
            self.encryption_key = Some(value);
        }
        if let Some(value) = get("STATE_FILE") {
            self.state_file = PathBuf::from(value);
        }
        if let Some(value) = get("CAPSOLVER_API_KEY") {
            self.captcha_api_key = Some(value);
        }
        if let Some(value) = get("CAPTCHA_SITE_KEY") {
            self.captcha_site_key = Some(value);
        }
        if let Some(value) = get("PROXIES") {
            self.default_proxies = parse_proxies(&value)?;
        }
        if let Some(value) = get("USE_DEFAULT_PROXIES") {
            self.use_default_proxies = parse_bool("USE_DEFAULT_PROXIES", &value)?;
        }
        if let Some(value) = get("REDDIT_BASE_URL") {
            self.reddit_base_url = value;
        }
        if let Some(value) = get("CAPSOLVER_BASE_URL") {
            self.captcha_base_url = value;
        }
        if let Some(value) = get("IP_ECHO_URL") {
            self.ip_echo_url = value;
        }
        if let Some(value) = get("DISCOVERY_CONCURRENCY") {
            self.discovery_concurrency = parse_value("DISCOVERY_CONCURRENCY", &value)?;
        }
        if let Some(value) = get("REQUIRE_SESSION_COOKIE") {
            self.require_session_cookie = parse_bool("REQUIRE_SESSION_COOKIE", &value)?;
        }
        if let Some(value) = get("USER_AGENT") {
            self.user_agent = value;
        }

        debug!(
            "Configuration after environment overrides: dry_run={}, default_proxies={}",
            self.dry_run,
            self.default_proxies.len()
        );
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "discovery_concurrency".to_string(),
                value: "0".to_string(),
            });
        }
        for proxy in &self.default_proxies {
            proxy.validate()?;
        }
        Ok(())
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_value<T: FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// `PROXIES` is either a JSON array of proxy objects or a comma separated list of proxy URLs.
fn parse_proxies(value: &str) -> Result<Vec<ProxyConfig>, ConfigError> {
    if value.starts_with('[') {
        return serde_json::from_str(value).map_err(|e| ConfigError::InvalidValue {
            field: "PROXIES".to_string(),
            value: e.to_string(),
        });
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(ProxyConfig::from_str)
        .collect()
}
