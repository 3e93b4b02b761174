//! Configuration module for the status responder.
//!
//! Supports command-line arguments, environment variables and a TOML
//! configuration file. CLI arguments (or their environment variables) take
//! precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Port assumed for a reflected server given without one.
pub const DEFAULT_GAME_PORT: u16 = 25565;

/// Command-line arguments for the status responder
#[derive(Parser, Debug)]
#[cfg_attr(test, derive(Default))]
#[command(name = "status-responder")]
#[command(author = "status-responder authors")]
#[command(version = "0.1.0")]
#[command(about = "Answers server-list pings without running a game server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0 or ::)
    #[arg(long, env = "LISTEN_HOST")]
    pub listen_host: Option<String>,

    /// Port to listen on
    #[arg(short = 'p', long, env = "LISTEN_PORT")]
    pub listen_port: Option<u16>,

    /// Listen backlog passed to listen(2)
    #[arg(long, env = "LISTEN_BACKLOG")]
    pub listen_backlog: Option<i32>,

    /// Protocol version number reported to clients
    #[arg(long, env = "PROTOCOL_VERSION")]
    pub protocol_version: Option<i32>,

    /// Version name reported to clients (e.g., 1.20.1)
    #[arg(long, env = "PROTOCOL_NAME")]
    pub protocol_name: Option<String>,

    /// Server description, plain text or a JSON chat component
    #[arg(long, env = "MOTD")]
    pub motd: Option<String>,

    /// Favicon as a data URI or a path to a PNG file
    #[arg(long, env = "FAVICON")]
    pub favicon: Option<String>,

    /// Maximum player count reported to clients
    #[arg(long, env = "MAX_PLAYERS")]
    pub max_players: Option<i32>,

    /// Disconnect message for login attempts, plain text or JSON
    #[arg(long, env = "KICK_MESSAGE")]
    pub kick_message: Option<String>,

    /// Upstream server (HOST:PORT) whose online player count is reported
    #[arg(short = 'r', long, env = "REFLECTED_SERVER")]
    pub reflected_server: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub reflector: ReflectorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Time allowed for a client to deliver its handshake
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            max_connections: default_max_connections(),
        }
    }
}

/// Content of the status response and the login disconnect
#[derive(Debug, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_protocol_version")]
    pub protocol_version: i32,
    #[serde(default = "default_protocol_name")]
    pub protocol_name: String,
    #[serde(default = "default_motd")]
    pub motd: String,
    #[serde(default)]
    pub favicon: Option<String>,
    #[serde(default = "default_max_players")]
    pub max_players: i32,
    #[serde(default = "default_kick_message")]
    pub kick_message: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            protocol_name: default_protocol_name(),
            motd: default_motd(),
            favicon: None,
            max_players: default_max_players(),
            kick_message: default_kick_message(),
        }
    }
}

/// Player count reflection
#[derive(Debug, Deserialize)]
pub struct ReflectorConfig {
    /// Upstream HOST:PORT; reflection is off when unset
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_reflector_timeout_ms")]
    pub timeout_ms: u64,
    /// Protocol version announced in the upstream handshake
    #[serde(default = "default_reflector_protocol_version")]
    pub protocol_version: i32,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            server: None,
            cache_ttl_secs: default_cache_ttl_secs(),
            timeout_ms: default_reflector_timeout_ms(),
            protocol_version: default_reflector_protocol_version(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_GAME_PORT
}

fn default_backlog() -> i32 {
    511
}

fn default_handshake_timeout_ms() -> u64 {
    2000
}

fn default_max_connections() -> usize {
    10_000
}

fn default_protocol_version() -> i32 {
    763
}

fn default_protocol_name() -> String {
    "1.20.1".to_string()
}

fn default_motd() -> String {
    "§eHello World!".to_string()
}

fn default_max_players() -> i32 {
    100
}

fn default_kick_message() -> String {
    "§cNot available".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_reflector_timeout_ms() -> u64 {
    3000
}

fn default_reflector_protocol_version() -> i32 {
    758
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Address of an upstream server, parsed from `HOST:PORT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamAddr {
    pub host: String,
    pub port: u16,
}

impl FromStr for UpstreamAddr {
    type Err = String;

    /// Accepts `host`, `host:port`, `[v6]` and `[v6]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty address".to_string());
        }

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| format!("unterminated IPv6 literal in '{s}'"))?;
            match tail {
                "" => (host, None),
                _ => match tail.strip_prefix(':') {
                    Some(port) => (host, Some(port)),
                    None => return Err(format!("unexpected text after ']' in '{s}'")),
                },
            }
        } else {
            match s.rsplit_once(':') {
                Some((host, port)) if !host.contains(':') => (host, Some(port)),
                Some(_) => return Err(format!("IPv6 address must be bracketed: '{s}'")),
                None => (s, None),
            }
        };

        if host.is_empty() {
            return Err(format!("missing host in '{s}'"));
        }
        let port = match port {
            Some(p) => p.parse().map_err(|_| format!("invalid port '{p}'"))?,
            None => DEFAULT_GAME_PORT,
        };

        Ok(UpstreamAddr {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for UpstreamAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backlog: i32,
    pub handshake_timeout: Duration,
    pub max_connections: usize,
    pub protocol_version: i32,
    pub protocol_name: String,
    pub motd: String,
    pub favicon: Option<String>,
    pub max_players: i32,
    pub kick_message: String,
    pub reflected_server: Option<UpstreamAddr>,
    pub reflector_ttl: Duration,
    pub reflector_timeout: Duration,
    pub reflector_protocol_version: i32,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let server = ServerConfig::default();
        let status = StatusConfig::default();
        let reflector = ReflectorConfig::default();

        Config {
            host: server.host,
            port: server.port,
            backlog: server.backlog,
            handshake_timeout: Duration::from_millis(server.handshake_timeout_ms),
            max_connections: server.max_connections,
            protocol_version: status.protocol_version,
            protocol_name: status.protocol_name,
            motd: status.motd,
            favicon: None,
            max_players: status.max_players,
            kick_message: status.kick_message,
            reflected_server: None,
            reflector_ttl: Duration::from_secs(reflector.cache_ttl_secs),
            reflector_timeout: Duration::from_millis(reflector.timeout_ms),
            reflector_protocol_version: reflector.protocol_version,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args, environment and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Config::resolve(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence).
    pub fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let TomlConfig {
            server,
            status,
            reflector,
            logging,
        } = toml_config;

        let reflected_server = match cli.reflected_server.or(reflector.server) {
            Some(raw) if !raw.trim().is_empty() => Some(
                raw.parse::<UpstreamAddr>()
                    .map_err(|reason| ConfigError::InvalidReflectedServer(raw.clone(), reason))?,
            ),
            _ => None,
        };

        Ok(Config {
            host: cli.listen_host.unwrap_or(server.host),
            port: cli.listen_port.unwrap_or(server.port),
            backlog: cli.listen_backlog.unwrap_or(server.backlog),
            handshake_timeout: Duration::from_millis(server.handshake_timeout_ms),
            max_connections: server.max_connections,
            protocol_version: cli.protocol_version.unwrap_or(status.protocol_version),
            protocol_name: cli.protocol_name.unwrap_or(status.protocol_name),
            motd: cli.motd.unwrap_or(status.motd),
            favicon: cli.favicon.or(status.favicon).filter(|f| !f.is_empty()),
            max_players: cli.max_players.unwrap_or(status.max_players),
            kick_message: cli.kick_message.unwrap_or(status.kick_message),
            reflected_server,
            reflector_ttl: Duration::from_secs(reflector.cache_ttl_secs),
            reflector_timeout: Duration::from_millis(reflector.timeout_ms),
            reflector_protocol_version: reflector.protocol_version,
            log_level: cli.log_level.unwrap_or(logging.level),
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidReflectedServer(String, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidReflectedServer(raw, reason) => {
                write!(f, "Invalid reflected server '{raw}': {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
