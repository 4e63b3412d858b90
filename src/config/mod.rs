//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;


const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "strato";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_PORT: u16 = 3900;
const DEFAULT_CACHE_ROOT: &str = ".strato-cache";
const DEFAULT_BUILD_ID: &str = "development";
const DEFAULT_EDGE_TIMEOUT_SECS: u64 = 5;
const MAX_EDGE_TIMEOUT_SECS: u64 = 30;

/// Command-line arguments for the strato binary.
#[derive(Debug, Parser)]
#[command(name = "strato", version, about = "Strato cache store server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "STRATO_CONFIG_FILE", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the cache store and its administrative HTTP listener.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the administrative listener host.
    #[arg(long = "server-admin-host", value_name = "HOST")]
    pub admin_host: Option<String>,

    /// Override the administrative listener port.
    #[arg(long = "server-admin-port", value_name = "PORT")]
    pub admin_port: Option<u16>,

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

    /// Override the storage backend (local|s3|memory).
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub cache_backend: Option<String>,

    /// Override the root directory of the local backend.
    #[arg(long = "cache-root-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub cache_root_dir: Option<PathBuf>,

    /// Override the bucket used by the s3 backend.
    #[arg(long = "cache-bucket", value_name = "BUCKET")]
    pub cache_bucket: Option<String>,

    /// Override the object key prefix used by the s3 backend.
    #[arg(long = "cache-bucket-prefix", value_name = "PREFIX")]
    pub cache_bucket_prefix: Option<String>,

    /// Override the current build identity.
    #[arg(long = "cache-build-id", env = "STRATO_BUILD_ID", value_name = "ID")]
    pub cache_build_id: Option<String>,

    /// Mark this process as a build-phase worker (skips the generation check).
    #[arg(
        long = "cache-build-phase",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_build_phase: Option<bool>,

    /// Override the static route manifest path.
    #[arg(long = "cache-static-routes", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub cache_static_routes: Option<PathBuf>,

    /// Override the edge purge endpoint URL.
    #[arg(long = "edge-purge-url", value_name = "URL")]
    pub edge_purge_url: Option<String>,

    /// Override the per-call edge purge timeout.
    #[arg(long = "edge-timeout-seconds", value_name = "SECONDS")]
    pub edge_timeout_seconds: Option<u64>,
}

/// Fully validated application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub edge: Option<EdgeSettings>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub admin_addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Which blob backend the store is constructed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    S3,
    Memory,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "local" | "fs" | "filesystem" => Ok(BackendKind::Local),
            "s3" => Ok(BackendKind::S3),
            "memory" | "mem" => Ok(BackendKind::Memory),
            other => Err(format!("unknown backend `{other}` (expected local|s3|memory)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: BackendKind,
    pub root_dir: PathBuf,
    pub bucket: Option<String>,
    pub bucket_prefix: Option<String>,
    pub build_id: String,
    pub build_phase: bool,
    pub static_routes_manifest: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct EdgeSettings {
    pub purge_url: Url,
    pub timeout: Duration,
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

    builder = builder.add_source(Environment::with_prefix("STRATO").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Parse CLI arguments and load settings in one step.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let cli = CliArgs::parse();
    let settings = load(&cli)?;
    Ok((cli, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    edge: RawEdgeSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    admin_host: Option<String>,
    admin_port: Option<u16>,
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
    backend: Option<String>,
    root_dir: Option<PathBuf>,
    bucket: Option<String>,
    bucket_prefix: Option<String>,
    build_id: Option<String>,
    build_phase: Option<bool>,
    static_routes_manifest: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEdgeSettings {
    purge_url: Option<String>,
    timeout_seconds: Option<u64>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(dir) = overrides.cache_root_dir.as_ref() {
            self.cache.root_dir = Some(dir.clone());
        }
        if let Some(bucket) = overrides.cache_bucket.as_ref() {
            self.cache.bucket = Some(bucket.clone());
        }
        if let Some(prefix) = overrides.cache_bucket_prefix.as_ref() {
            self.cache.bucket_prefix = Some(prefix.clone());
        }
        if let Some(build_id) = overrides.cache_build_id.as_ref() {
            self.cache.build_id = Some(build_id.clone());
        }
        if let Some(build_phase) = overrides.cache_build_phase {
            self.cache.build_phase = Some(build_phase);
        }
        if let Some(path) = overrides.cache_static_routes.as_ref() {
            self.cache.static_routes_manifest = Some(path.clone());
        }
        if let Some(url) = overrides.edge_purge_url.as_ref() {
            self.edge.purge_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.edge_timeout_seconds {
            self.edge.timeout_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            edge,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;
        let edge = build_edge_settings(edge)?;

        Ok(Self {
            server,
            logging,
            cache,
            edge,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());
    let port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }

    let admin_addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;

    Ok(ServerSettings { admin_addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level.as_deref() {
        Some(level) => LevelFilter::from_str(level)
            .map_err(|_| LoadError::invalid("logging.level", format!("unknown level `{level}`")))?,
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
    let backend = match cache.backend.as_deref() {
        Some(backend) => BackendKind::from_str(backend)
            .map_err(|reason| LoadError::invalid("cache.backend", reason))?,
        None => BackendKind::Local,
    };

    let bucket = cache.bucket.filter(|bucket| !bucket.is_empty());
    if backend == BackendKind::S3 && bucket.is_none() {
        return Err(LoadError::invalid(
            "cache.bucket",
            "a bucket is required for the s3 backend",
        ));
    }

    let build_id = cache
        .build_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| DEFAULT_BUILD_ID.to_string());

    Ok(CacheSettings {
        backend,
        root_dir: cache
            .root_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_ROOT)),
        bucket,
        bucket_prefix: cache.bucket_prefix.filter(|prefix| !prefix.is_empty()),
        build_id,
        build_phase: cache.build_phase.unwrap_or(false),
        static_routes_manifest: cache.static_routes_manifest,
    })
}

fn build_edge_settings(edge: RawEdgeSettings) -> Result<Option<EdgeSettings>, LoadError> {
    let Some(url) = edge.purge_url.filter(|url| !url.is_empty()) else {
        return Ok(None);
    };

    let purge_url = Url::parse(&url)
        .map_err(|err| LoadError::invalid("edge.purge_url", err.to_string()))?;
    if !matches!(purge_url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "edge.purge_url",
            "only http and https endpoints are supported",
        ));
    }

    let seconds = edge.timeout_seconds.unwrap_or(DEFAULT_EDGE_TIMEOUT_SECS);
    if seconds == 0 || seconds > MAX_EDGE_TIMEOUT_SECS {
        return Err(LoadError::invalid(
            "edge.timeout_seconds",
            format!("timeout must be between 1 and {MAX_EDGE_TIMEOUT_SECS} seconds"),
        ));
    }

    Ok(Some(EdgeSettings {
        purge_url,
        timeout: Duration::from_secs(seconds),
    }))
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    format!("{host}:{port}")
        .parse()
        .map_err(|err| format!("invalid listener address: {err}"))
}
