//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr, num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::EvictionMode;
use crate::domain::items::ItemQuery;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "cachet";
const ENV_PREFIX: &str = "CACHET";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_LIST_TTL_MS: u64 = 300_000;
const DEFAULT_DETAIL_TTL_MS: u64 = 900_000;
const DEFAULT_STORE_CAPACITY: u64 = 10_000;

/// Command-line arguments for the cachet binary.
#[derive(Debug, Parser)]
#[command(name = "cachet", version, about = "Cached item service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CACHET_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
    /// Validate configuration and print the resolved cache policy.
    Check(CheckArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub cache: CacheOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Toggle result caching.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub enabled: Option<bool>,

    /// Override the TTL for cached lists.
    #[arg(long = "cache-list-ttl-ms", value_name = "MILLIS")]
    pub list_ttl_ms: Option<u64>,

    /// Override the TTL for cached single items.
    #[arg(long = "cache-detail-ttl-ms", value_name = "MILLIS")]
    pub detail_ttl_ms: Option<u64>,

    /// Override the in-memory store capacity.
    #[arg(long = "cache-store-capacity", value_name = "ENTRIES")]
    pub store_capacity: Option<u64>,

    /// Override the eviction mode (enumerated|owner_index).
    #[arg(long = "cache-eviction-mode", value_name = "MODE")]
    pub eviction_mode: Option<String>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub list_ttl: Duration,
    pub detail_ttl: Duration,
    pub store_capacity: NonZeroUsize,
    pub eviction_mode: EvictionMode,
    pub common_list_queries: Vec<Value>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Check(args)) => raw.apply_cache_overrides(&args.cache),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }

        self.apply_cache_overrides(&overrides.cache);
    }

    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(enabled) = overrides.enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(ttl) = overrides.list_ttl_ms {
            self.cache.list_ttl_ms = Some(ttl);
        }
        if let Some(ttl) = overrides.detail_ttl_ms {
            self.cache.detail_ttl_ms = Some(ttl);
        }
        if let Some(capacity) = overrides.store_capacity {
            self.cache.store_capacity = Some(capacity);
        }
        if let Some(mode) = overrides.eviction_mode.as_ref() {
            self.cache.eviction_mode = Some(mode.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self {
            server,
            logging,
            cache,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let list_ttl_ms = cache.list_ttl_ms.unwrap_or(DEFAULT_LIST_TTL_MS);
    if list_ttl_ms == 0 {
        return Err(LoadError::invalid(
            "cache.list_ttl_ms",
            "must be greater than zero",
        ));
    }

    let detail_ttl_ms = cache.detail_ttl_ms.unwrap_or(DEFAULT_DETAIL_TTL_MS);
    if detail_ttl_ms == 0 {
        return Err(LoadError::invalid(
            "cache.detail_ttl_ms",
            "must be greater than zero",
        ));
    }
    if list_ttl_ms > detail_ttl_ms {
        return Err(LoadError::invalid(
            "cache.list_ttl_ms",
            format!("list TTL ({list_ttl_ms} ms) must not exceed detail TTL ({detail_ttl_ms} ms)"),
        ));
    }

    let capacity = cache.store_capacity.unwrap_or(DEFAULT_STORE_CAPACITY);
    let store_capacity = usize::try_from(capacity)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid(
                "cache.store_capacity",
                "must be greater than zero and fit in usize",
            )
        })?;

    let eviction_mode = match cache.eviction_mode.as_deref().map(str::trim) {
        None | Some("enumerated") => EvictionMode::Enumerated,
        Some("owner_index") => EvictionMode::OwnerIndex,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.eviction_mode",
                format!("unknown mode `{other}`, expected `enumerated` or `owner_index`"),
            ));
        }
    };

    let common_list_queries = canonical_list_queries(
        &cache
            .common_list_queries
            .unwrap_or_else(|| crate::cache::CacheConfig::default().common_list_queries),
    )?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        list_ttl: Duration::from_millis(list_ttl_ms),
        detail_ttl: Duration::from_millis(detail_ttl_ms),
        store_capacity,
        eviction_mode,
        common_list_queries,
    })
}

/// Each shape must parse as a list query; it is stored in the canonical form
/// the list key is built from, so it evicts exactly the key it names.
fn canonical_list_queries(queries: &[Value]) -> Result<Vec<Value>, LoadError> {
    let mut canonical: Vec<Value> = Vec::with_capacity(queries.len());
    for shape in queries {
        let query = ItemQuery::from_shape(shape)
            .map_err(|err| LoadError::invalid("cache.common_list_queries", err.to_string()))?;
        let value = query.to_value();
        if !canonical.contains(&value) {
            canonical.push(value);
        }
    }
    Ok(canonical)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    list_ttl_ms: Option<u64>,
    detail_ttl_ms: Option<u64>,
    store_capacity: Option<u64>,
    eviction_mode: Option<String>,
    common_list_queries: Option<Vec<Value>>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
