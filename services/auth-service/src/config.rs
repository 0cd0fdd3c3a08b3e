//! Configuration types and loading
//!
//! Config precedence: env vars > config file > defaults.
//! The file path comes from `--config`, then `CONFIG_PATH`, then
//! `companion-auth.toml` in the working directory if it exists. Signing
//! secrets may also come from `AUTH_SESSION_SECRET_FILE` / `AUTH_JWT_SECRET_FILE`
//! so they never have to live in the TOML.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use frontier_auth::AuthEndpoints;
use frontier_auth::constants::{
    API_BASE_URL, AUTHORIZE_ENDPOINT, DECODE_ENDPOINT, SCOPES, TOKEN_ENDPOINT,
};
use rand::RngExt;
use serde::Deserialize;
use token_store::{DatabaseOptions, Freshness};
use tracing::warn;

const DEFAULT_CONFIG_FILE: &str = "companion-auth.toml";
const DATABASE_FILE: &str = "auth.db";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub frontier: FrontierConfig,
    pub urls: UrlsConfig,
    pub session: SessionConfig,
    pub refresh: RefreshConfig,
    pub cache: CacheConfig,
}

/// Deployment environment. Only `development` relaxes anything: cookies lose
/// `Secure` and 500 responses carry the error chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

impl FromStr for Environment {
    type Err = common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" => Ok(Environment::Production),
            "development" => Ok(Environment::Development),
            other => Err(common::Error::Config(format!(
                "environment must be production or development, got: {other}"
            ))),
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub environment: Environment,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3003)),
            environment: Environment::Production,
            max_connections: 1000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            busy_timeout_ms: 5000,
        }
    }
}

/// Frontier client registration and endpoints
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FrontierConfig {
    pub client_id: String,
    pub authorize_url: String,
    pub token_url: String,
    pub decode_url: String,
    pub api_base_url: String,
    pub scope: String,
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            client_id: "54fe2942-7b30-492a-801a-0a95e72c6b13".into(),
            authorize_url: AUTHORIZE_ENDPOINT.into(),
            token_url: TOKEN_ENDPOINT.into(),
            decode_url: DECODE_ENDPOINT.into(),
            api_base_url: API_BASE_URL.into(),
            scope: SCOPES.into(),
        }
    }
}

/// Public URLs of this service and the web client it redirects to
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct UrlsConfig {
    pub auth_base_url: String,
    pub www_base_url: String,
    pub cookie_domain: String,
}

impl Default for UrlsConfig {
    fn default() -> Self {
        Self {
            auth_base_url: "https://auth.eddata.dev".into(),
            www_base_url: "https://eddata.dev".into(),
            cookie_domain: ".eddata.dev".into(),
        }
    }
}

/// Session credential settings. Empty secrets are filled with random values
/// at load time.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_age_secs: u64,
    pub session_secret: Secret<String>,
    pub jwt_secret: Secret<String>,
    pub session_secret_file: Option<PathBuf>,
    pub jwt_secret_file: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 60 * 60 * 24 * 30,
            session_secret: Secret::new(String::new()),
            jwt_secret: Secret::new(String::new()),
            session_secret_file: None,
            jwt_secret_file: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub interval_secs: u64,
    pub horizon_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: 900,
            horizon_secs: 1800,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Absent: entries are served until overwritten or deleted
    pub max_age_secs: Option<u64>,
}

impl Config {
    /// Load configuration from an optional TOML file, then overlay
    /// environment variables, resolve secrets and validate.
    pub fn load(path: Option<&Path>) -> common::Result<Self> {
        let mut config: Config = match path {
            Some(path) => toml::from_str(&std::fs::read_to_string(path)?)?,
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.resolve_secrets()?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file from CLI arg, `CONFIG_PATH`, or the default
    /// file name if present. Explicit paths are returned even when missing so
    /// loading fails loudly.
    pub fn resolve_path(cli_path: Option<&str>) -> Option<PathBuf> {
        if let Some(p) = cli_path {
            return Some(PathBuf::from(p));
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return Some(PathBuf::from(p));
        }
        let default = PathBuf::from(DEFAULT_CONFIG_FILE);
        default.exists().then_some(default)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> common::Result<()> {
        if let Some(addr) = lookup("AUTH_LISTEN_ADDR") {
            self.server.listen_addr = addr.parse().map_err(|e| {
                common::Error::Config(format!("AUTH_LISTEN_ADDR is not a socket address: {e}"))
            })?;
        }
        if let Some(env) = lookup("AUTH_ENVIRONMENT") {
            self.server.environment = env.parse()?;
        }
        if let Some(dir) = lookup("AUTH_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(client_id) = lookup("AUTH_CLIENT_ID") {
            self.frontier.client_id = client_id;
        }
        if let Some(url) = lookup("AUTH_BASE_URL") {
            self.urls.auth_base_url = url;
        }
        if let Some(url) = lookup("AUTH_WWW_BASE_URL") {
            self.urls.www_base_url = url;
        }
        if let Some(domain) = lookup("AUTH_COOKIE_DOMAIN") {
            self.urls.cookie_domain = domain;
        }

        // Secret env var beats secret file beats inline TOML value
        if let Some(secret) = lookup("AUTH_SESSION_SECRET") {
            self.session.session_secret = Secret::new(secret);
            self.session.session_secret_file = None;
        } else if let Some(file) = lookup("AUTH_SESSION_SECRET_FILE") {
            self.session.session_secret_file = Some(PathBuf::from(file));
        }
        if let Some(secret) = lookup("AUTH_JWT_SECRET") {
            self.session.jwt_secret = Secret::new(secret);
            self.session.jwt_secret_file = None;
        } else if let Some(file) = lookup("AUTH_JWT_SECRET_FILE") {
            self.session.jwt_secret_file = Some(PathBuf::from(file));
        }
        Ok(())
    }

    fn resolve_secrets(&mut self) -> common::Result<()> {
        if let Some(file) = &self.session.session_secret_file {
            self.session.session_secret = read_secret_file(file)?;
        }
        if let Some(file) = &self.session.jwt_secret_file {
            self.session.jwt_secret = read_secret_file(file)?;
        }
        if self.session.session_secret.is_empty() {
            warn!("session_secret not set, generating a temporary one (cookies will not survive a restart)");
            self.session.session_secret = random_secret();
        }
        if self.session.jwt_secret.is_empty() {
            warn!("jwt_secret not set, generating a temporary one (sessions will not survive a restart)");
            self.session.jwt_secret = random_secret();
        }
        Ok(())
    }

    fn validate(&self) -> common::Result<()> {
        let urls = [
            ("frontier.authorize_url", &self.frontier.authorize_url),
            ("frontier.token_url", &self.frontier.token_url),
            ("frontier.decode_url", &self.frontier.decode_url),
            ("frontier.api_base_url", &self.frontier.api_base_url),
            ("urls.auth_base_url", &self.urls.auth_base_url),
            ("urls.www_base_url", &self.urls.www_base_url),
        ];
        for (name, value) in urls {
            if !value.starts_with("http://") && !value.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {value}"
                )));
            }
        }

        let non_zero = [
            ("max_connections", self.server.max_connections as u64),
            ("busy_timeout_ms", self.storage.busy_timeout_ms),
            ("max_age_secs", self.session.max_age_secs),
            ("refresh.interval_secs", self.refresh.interval_secs),
            ("refresh.horizon_secs", self.refresh.horizon_secs),
            ("cache.max_age_secs", self.cache.max_age_secs.unwrap_or(1)),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(common::Error::Config(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.frontier.client_id.trim().is_empty() {
            return Err(common::Error::Config("frontier.client_id must not be empty".into()));
        }
        Ok(())
    }

    /// Frontier endpoints with the callback under this service's base URL.
    pub fn auth_endpoints(&self) -> AuthEndpoints {
        AuthEndpoints {
            client_id: self.frontier.client_id.clone(),
            authorize_url: self.frontier.authorize_url.clone(),
            token_url: self.frontier.token_url.clone(),
            decode_url: self.frontier.decode_url.clone(),
            redirect_uri: format!("{}/callback", trim_slash(&self.urls.auth_base_url)),
            scope: self.frontier.scope.clone(),
        }
    }

    pub fn redirects(&self) -> Redirects {
        let www = trim_slash(&self.urls.www_base_url);
        Redirects {
            signed_in: format!("{www}/auth/signed-in"),
            signed_out: format!("{www}/auth/signed-out"),
            error: format!("{www}/auth/error"),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage.data_dir.join(DATABASE_FILE)
    }

    pub fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            busy_timeout: Duration::from_millis(self.storage.busy_timeout_ms),
            ..DatabaseOptions::default()
        }
    }

    pub fn cache_freshness(&self) -> Freshness {
        match self.cache.max_age_secs {
            Some(secs) => Freshness::MaxAge(Duration::from_secs(secs)),
            None => Freshness::Always,
        }
    }
}

/// Browser destinations after the sign-in flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirects {
    pub signed_in: String,
    pub signed_out: String,
    pub error: String,
}

fn trim_slash(url: &str) -> &str {
    url.trim_end_matches('/')
}

fn read_secret_file(path: &Path) -> common::Result<Secret<String>> {
    let value = std::fs::read_to_string(path).map_err(|e| {
        common::Error::Config(format!("failed to read secret file {}: {e}", path.display()))
    })?;
    Ok(Secret::new(value.trim().to_owned()))
}

fn random_secret() -> Secret<String> {
    let mut bytes = [0u8; 64];
    rand::rng().fill(&mut bytes);
    Secret::new(URL_SAFE_NO_PAD.encode(bytes))
}
