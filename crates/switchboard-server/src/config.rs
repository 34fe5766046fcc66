//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - The first TOML file found on the search path
//! - Environment variables (`SWITCHBOARD_*`, nested keys joined by `__`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use switchboard_protocol::DisplayMetadata;
use tenvis_switchboard_core::ContextChannel;
use tenvis_switchboard_transport::WebSocketConfig;

/// Files searched for configuration, in order.
const CONFIG_PATHS: [&str; 3] = [
    "switchboard.toml",
    "/etc/switchboard/switchboard.toml",
    "~/.config/switchboard/switchboard.toml",
];

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "SWITCHBOARD";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the bus listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Service name clients connect to.
    #[serde(default = "default_service")]
    pub service: String,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Health and status endpoint.
    #[serde(default)]
    pub http: HttpConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Desktop channels offered to clients.
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Heartbeat interval advertised to clients, in milliseconds.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u32,
}

/// HTTP status endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Serve `/health` and `/channels`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP port.
    #[serde(default = "default_http_port")]
    pub port: u16,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// A desktop channel definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel identifier.
    pub id: String,
    /// User-facing name.
    pub name: String,
    /// CSS colour.
    pub color: String,
    /// Optional icon URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glyph: Option<String>,
}

impl ChannelConfig {
    fn system(id: &str, name: &str, color: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            color: color.to_string(),
            glyph: None,
        }
    }

    /// Build the desktop channel this entry describes.
    #[must_use]
    pub fn to_channel(&self) -> ContextChannel {
        ContextChannel::desktop(
            self.id.clone(),
            DisplayMetadata {
                name: self.name.clone(),
                color: self.color.clone(),
                glyph: self.glyph.clone(),
            },
        )
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8427
}

fn default_service() -> String {
    "switchboard".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_heartbeat_ms() -> u32 {
    30_000 // 30 seconds
}

fn default_http_port() -> u16 {
    8428
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_channels() -> Vec<ChannelConfig> {
    vec![
        ChannelConfig::system("red", "Red", "#FF0000"),
        ChannelConfig::system("orange", "Orange", "#FF8000"),
        ChannelConfig::system("yellow", "Yellow", "#FFFF00"),
        ChannelConfig::system("green", "Green", "#00FF00"),
        ChannelConfig::system("blue", "Blue", "#0000FF"),
        ChannelConfig::system("purple", "Purple", "#FF00FF"),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            service: default_service(),
            transport: TransportConfig::default(),
            http: HttpConfig::default(),
            metrics: MetricsConfig::default(),
            channels: default_channels(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            heartbeat_ms: default_heartbeat_ms(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the search path and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// override has the wrong type.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = CONFIG_PATHS
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists())
        {
            tracing::info!(path = %path, "Loading configuration file");
            builder = builder.add_source(config::File::new(&path, config::FileFormat::Toml));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address the bus binds to.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is not a valid IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.addr(self.port)
    }

    /// Get the socket address of the HTTP status endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is not a valid IP address.
    pub fn http_addr(&self) -> Result<SocketAddr> {
        self.addr(self.http.port)
    }

    /// Bus settings derived from this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is not a valid IP address.
    pub fn websocket_config(&self) -> Result<WebSocketConfig> {
        Ok(WebSocketConfig {
            bind_addr: self.bind_addr()?,
            max_message_size: self.transport.max_message_size,
            heartbeat_ms: self.transport.heartbeat_ms,
        })
    }

    /// The configured desktop channels.
    pub fn desktop_channels(&self) -> impl Iterator<Item = ContextChannel> + '_ {
        self.channels.iter().map(ChannelConfig::to_channel)
    }

    fn addr(&self, port: u16) -> Result<SocketAddr> {
        format!("{}:{}", self.host, port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, port))
    }
}
