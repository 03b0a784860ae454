//! Runtime configuration.
//!
//! `Config` is the sole source of truth for runtime parameters and rejects
//! contradictory combinations before any other component initializes. It is
//! immutable once built; the only locale-related runtime transition lives in
//! the connection's session state, not here.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Default record limit for search operations.
pub const DEFAULT_LIMIT: u32 = 20;
/// Maximum allowed record limit.
pub const MAX_LIMIT: u32 = 100;
/// Default connect/read timeout for every RPC, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration failures, raised before anything else starts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("ODOO_URL must start with http:// or https://")]
    InvalidUrl,
    #[error("Authentication required: set ODOO_API_KEY or ODOO_USER and ODOO_PASSWORD")]
    AuthenticationRequired,
    #[error("YOLO mode requires username")]
    YoloRequiresUsername,
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
    #[error("missing required configuration: {0}")]
    Missing(String),
}

/// Client-side access policy overriding the ERP's MCP allowlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YoloMode {
    /// Standard mode: every operation is gated by the ERP's permission matrix.
    #[default]
    Off,
    /// Every model readable, all mutations denied client-side.
    Read,
    /// Every model enabled for all CRUD operations.
    True,
}

impl YoloMode {
    /// Parse the `ODOO_YOLO` value.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "off" | "false" | "0" => Ok(Self::Off),
            "read" => Ok(Self::Read),
            "true" | "on" | "1" => Ok(Self::True),
            other => Err(ConfigError::InvalidValue {
                name: "ODOO_YOLO".into(),
                value: other.into(),
            }),
        }
    }

    pub fn is_enabled(self) -> bool {
        self != Self::Off
    }

    /// Level label used in tool result metadata.
    pub fn level(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Read => "read",
            Self::True => "true",
        }
    }
}

impl fmt::Display for YoloMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.level())
    }
}

/// MCP transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// Line-delimited JSON over stdin/stdout.
    #[default]
    Stdio,
    /// Streamable HTTP (`POST /mcp`) with a `/health` endpoint.
    StreamableHttp,
}

impl Transport {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "stdio" => Ok(Self::Stdio),
            "streamable-http" | "http" => Ok(Self::StreamableHttp),
            other => Err(ConfigError::InvalidValue {
                name: "ODOO_MCP_TRANSPORT".into(),
                value: other.into(),
            }),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => f.write_str("stdio"),
            Self::StreamableHttp => f.write_str("streamable-http"),
        }
    }
}

/// Fixed endpoint paths on the ERP side.
///
/// `mcp_model_permissions` carries a `{model}` placeholder; use
/// [`EndpointPaths::model_permissions`] to substitute it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointPaths {
    pub db: &'static str,
    pub common: &'static str,
    pub object: &'static str,
    pub web_session: &'static str,
    pub mcp_models: &'static str,
    pub mcp_model_permissions: &'static str,
    pub mcp_system_info: &'static str,
    pub health: &'static str,
}

impl EndpointPaths {
    /// Permission endpoint for one model.
    pub fn model_permissions(&self, model: &str) -> String {
        self.mcp_model_permissions.replace("{model}", model)
    }

    /// The paths as a name → path map, for introspection output.
    pub fn as_map(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("db", self.db.to_string()),
            ("common", self.common.to_string()),
            ("object", self.object.to_string()),
            ("web_session", self.web_session.to_string()),
            ("mcp_models", self.mcp_models.to_string()),
            ("mcp_model_permissions", self.mcp_model_permissions.to_string()),
            ("mcp_system_info", self.mcp_system_info.to_string()),
            ("health", self.health.to_string()),
        ])
    }
}

const ENDPOINT_PATHS: EndpointPaths = EndpointPaths {
    db: "/xmlrpc/2/db",
    common: "/xmlrpc/2/common",
    object: "/xmlrpc/2/object",
    web_session: "/web/session/authenticate",
    mcp_models: "/mcp/models",
    mcp_model_permissions: "/mcp/models/{model}/permissions",
    mcp_system_info: "/mcp/system/info",
    health: "/mcp/health",
};

/// Immutable runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub url: String,
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub default_limit: u32,
    pub max_limit: u32,
    pub log_level: String,
    pub locale: Option<String>,
    pub yolo_mode: YoloMode,
    pub transport: Transport,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub timeout_secs: u64,
}

impl Config {
    /// Start building a configuration from environment variables.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// True when an API key is configured.
    pub fn uses_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// True when a username/password pair is configured.
    pub fn uses_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Fixed ERP endpoint paths.
    pub fn endpoint_paths(&self) -> EndpointPaths {
        ENDPOINT_PATHS
    }

    /// Base URL with no trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(ConfigError::InvalidUrl);
        }
        if self.yolo_mode.is_enabled() {
            let has_secondary = self.password.is_some() || self.api_key.is_some();
            if self.username.is_none() || !has_secondary {
                return Err(ConfigError::YoloRequiresUsername);
            }
        } else if self.api_key.is_none() && !self.uses_credentials() {
            return Err(ConfigError::AuthenticationRequired);
        }
        Ok(())
    }
}

/// Builder merging environment variables with explicit overrides.
///
/// Precedence: explicit setter > environment > default. `build()` runs the
/// cross-field validation.
#[derive(Debug, Default, Clone)]
pub struct ConfigBuilder {
    url: Option<String>,
    api_key: Option<String>,
    username: Option<String>,
    password: Option<String>,
    database: Option<String>,
    default_limit: Option<u32>,
    max_limit: Option<u32>,
    log_level: Option<String>,
    locale: Option<String>,
    yolo_mode: Option<YoloMode>,
    transport: Option<Transport>,
    host: Option<String>,
    port: Option<u16>,
    timeout_secs: Option<u64>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl ConfigBuilder {
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn username(mut self, user: impl Into<String>) -> Self {
        self.username = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn database(mut self, db: impl Into<String>) -> Self {
        self.database = Some(db.into());
        self
    }

    pub fn default_limit(mut self, limit: u32) -> Self {
        self.default_limit = Some(limit);
        self
    }

    pub fn max_limit(mut self, limit: u32) -> Self {
        self.max_limit = Some(limit);
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn yolo_mode(mut self, mode: YoloMode) -> Self {
        self.yolo_mode = Some(mode);
        self
    }

    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Resolve against the environment and validate.
    ///
    /// # Errors
    ///
    /// Fails when the URL is missing or malformed, when no authentication
    /// source is configured in standard mode, when YOLO mode lacks a
    /// username, or when a numeric/enum variable does not parse.
    pub fn build(self) -> Result<Config, ConfigError> {
        let parse_u32 = |name: &str, raw: String| {
            raw.parse::<u32>().map_err(|_| ConfigError::InvalidValue {
                name: name.into(),
                value: raw,
            })
        };

        let default_limit = match (self.default_limit, env_var("ODOO_MCP_DEFAULT_LIMIT")) {
            (Some(v), _) => v,
            (None, Some(raw)) => parse_u32("ODOO_MCP_DEFAULT_LIMIT", raw)?,
            (None, None) => DEFAULT_LIMIT,
        };
        let max_limit = match (self.max_limit, env_var("ODOO_MCP_MAX_LIMIT")) {
            (Some(v), _) => v,
            (None, Some(raw)) => parse_u32("ODOO_MCP_MAX_LIMIT", raw)?,
            (None, None) => MAX_LIMIT,
        };
        let yolo_mode = match (self.yolo_mode, env_var("ODOO_YOLO")) {
            (Some(v), _) => v,
            (None, Some(raw)) => YoloMode::parse(&raw)?,
            (None, None) => YoloMode::Off,
        };
        let transport = match (self.transport, env_var("ODOO_MCP_TRANSPORT")) {
            (Some(v), _) => v,
            (None, Some(raw)) => Transport::parse(&raw)?,
            (None, None) => Transport::Stdio,
        };
        let port = match (self.port, env_var("ODOO_MCP_PORT")) {
            (Some(v), _) => Some(v),
            (None, Some(raw)) => Some(raw.parse::<u16>().map_err(|_| {
                ConfigError::InvalidValue {
                    name: "ODOO_MCP_PORT".into(),
                    value: raw,
                }
            })?),
            (None, None) => None,
        };

        let config = Config {
            url: self
                .url
                .or_else(|| env_var("ODOO_URL"))
                .ok_or_else(|| ConfigError::Missing("--url or ODOO_URL".into()))?,
            api_key: self.api_key.or_else(|| env_var("ODOO_API_KEY")),
            username: self.username.or_else(|| env_var("ODOO_USER")),
            password: self.password.or_else(|| env_var("ODOO_PASSWORD")),
            database: self.database.or_else(|| env_var("ODOO_DB")),
            default_limit,
            max_limit,
            log_level: self
                .log_level
                .or_else(|| env_var("ODOO_MCP_LOG_LEVEL"))
                .unwrap_or_else(|| "info".into()),
            locale: self.locale.or_else(|| env_var("ODOO_LOCALE")),
            yolo_mode,
            transport,
            host: self.host.or_else(|| env_var("ODOO_MCP_HOST")),
            port,
            timeout_secs: self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        };

        config.validate()?;
        Ok(config)
    }
}
