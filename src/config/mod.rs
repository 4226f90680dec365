//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueEnum, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::application::jobs::{DEFAULT_PURGE_SCHEDULE, purge_expired_schedule};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "bookbytes";
const ENV_PREFIX: &str = "BOOKBYTES";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_HOT_CAPACITY: u64 = 10_000;
const DEFAULT_HOT_SHARDS: u64 = 16;
const DEFAULT_KEY_PREFIX: &str = "bookbytes:";
const DEFAULT_SEARCH_TTL_SECS: u64 = 86_400;
const DEFAULT_ISBN_TTL_SECS: u64 = 604_800;
const DEFAULT_WORK_TTL_SECS: u64 = 604_800;
const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;
const DEFAULT_REVALIDATE_THRESHOLD: f64 = 0.2;
const DEFAULT_JITTER_RATIO: f64 = 0.1;
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 250;
const DEFAULT_PATTERN_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_PROVIDER_BASE_URL: &str = "https://openlibrary.org/";
const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_PROVIDER_TAG: &str = "ol";
const DEFAULT_APP_NAME: &str = "BookBytes";
const DEFAULT_CONTACT: &str = "contact@bookbytes.app";
const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 1_000;
const DEFAULT_INVALIDATION_CONCURRENCY: u32 = 2;

/// Command-line arguments for the cache service binary.
#[derive(Debug, Parser)]
#[command(
    name = "bookbytes-cache",
    version,
    about = "Two-tier book metadata cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "BOOKBYTES_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the cache with its background workers until interrupted.
    Serve(Box<ServeArgs>),
    /// Apply pending database migrations and exit.
    #[command(name = "migrate")]
    Migrate(DatabaseOverride),
    /// Delete expired durable entries once and exit.
    #[command(name = "purge")]
    Purge(DatabaseOverride),
    /// Resolve one lookup through the cache and print the document as JSON.
    #[command(name = "lookup")]
    Lookup(LookupArgs),
}

#[derive(Debug, Args, Clone)]
#[command(group(
    clap::ArgGroup::new("target")
        .required(true)
        .args(["isbn", "work", "title"])
))]
pub struct LookupArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Fetch the edition with this ISBN-10 or ISBN-13.
    #[arg(long, value_name = "ISBN")]
    pub isbn: Option<String>,

    /// Fetch the work with this key, e.g. `OL27448W`.
    #[arg(long, value_name = "KEY")]
    pub work: Option<String>,

    /// Search by title.
    #[arg(long, value_name = "TITLE")]
    pub title: Option<String>,

    /// Narrow a title search by author.
    #[arg(long, value_name = "AUTHOR", requires = "title")]
    pub author: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
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

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Select the hot store backend.
    #[arg(long = "hot-store", value_enum, value_name = "BACKEND")]
    pub hot_store: Option<HotStoreBackend>,

    /// Override the Redis connection URL.
    #[arg(long = "redis-url", value_name = "URL")]
    pub redis_url: Option<String>,

    /// Override the provider base URL.
    #[arg(long = "provider-base-url", value_name = "URL")]
    pub provider_base_url: Option<String>,

    /// Override the cache-invalidation worker concurrency.
    #[arg(long = "jobs-invalidation-concurrency", value_name = "COUNT")]
    pub jobs_invalidation_concurrency: Option<u32>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub hot_store: HotStoreSettings,
    pub cache: CacheSettings,
    pub provider: ProviderSettings,
    pub jobs: JobsSettings,
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

/// Without a URL the service runs with a single (hot) tier.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HotStoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone)]
pub struct HotStoreSettings {
    pub backend: HotStoreBackend,
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub capacity: NonZeroUsize,
    pub shards: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub search_ttl_secs: NonZeroU64,
    pub isbn_ttl_secs: NonZeroU64,
    pub work_ttl_secs: NonZeroU64,
    pub revalidate_threshold: f64,
    pub jitter_ratio: f64,
    pub operation_timeout_ms: NonZeroU64,
    pub pattern_timeout_ms: NonZeroU64,
    pub shutdown_timeout_ms: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Always ends with `/` so relative API paths join under it.
    pub base_url: Url,
    pub timeout: Duration,
    pub tag: String,
    pub app_name: String,
    pub app_version: String,
    pub contact: String,
    pub page_size: u32,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub invalidation_concurrency: NonZeroU32,
    pub purge_schedule: String,
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
        Some(Command::Migrate(database)) | Some(Command::Purge(database)) => {
            raw.apply_database_override(database)
        }
        Some(Command::Lookup(args)) => raw.apply_database_override(&args.database),
        None => {}
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    hot_store: RawHotStoreSettings,
    cache: RawCacheSettings,
    provider: RawProviderSettings,
    jobs: RawJobsSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(backend) = overrides.hot_store {
            self.hot_store.backend = Some(backend);
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.hot_store.redis_url = Some(url.clone());
        }
        if let Some(url) = overrides.provider_base_url.as_ref() {
            self.provider.base_url = Some(url.clone());
        }
        if let Some(count) = overrides.jobs_invalidation_concurrency {
            self.jobs.invalidation_concurrency = Some(count);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            hot_store,
            cache,
            provider,
            jobs,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let hot_store = build_hot_store_settings(hot_store)?;
        let cache = build_cache_settings(cache)?;
        let provider = build_provider_settings(provider)?;
        let jobs = build_jobs_settings(jobs)?;

        Ok(Self {
            logging,
            database,
            hot_store,
            cache,
            provider,
            jobs,
        })
    }
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

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_hot_store_settings(hot: RawHotStoreSettings) -> Result<HotStoreSettings, LoadError> {
    let backend = hot.backend.unwrap_or(HotStoreBackend::Memory);
    let redis_url = non_blank(hot.redis_url);
    if backend == HotStoreBackend::Redis && redis_url.is_none() {
        return Err(LoadError::invalid(
            "hot_store.redis_url",
            "required when the redis backend is selected",
        ));
    }

    let capacity = non_zero_usize(
        hot.capacity.unwrap_or(DEFAULT_HOT_CAPACITY),
        "hot_store.capacity",
    )?;
    let shards = non_zero_usize(hot.shards.unwrap_or(DEFAULT_HOT_SHARDS), "hot_store.shards")?;

    Ok(HotStoreSettings {
        backend,
        redis_url,
        key_prefix: hot
            .key_prefix
            .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
        capacity,
        shards,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let revalidate_threshold = cache
        .revalidate_threshold
        .unwrap_or(DEFAULT_REVALIDATE_THRESHOLD);
    if !(0.0..=1.0).contains(&revalidate_threshold) {
        return Err(LoadError::invalid(
            "cache.revalidate_threshold",
            "must be within 0.0..=1.0",
        ));
    }

    let jitter_ratio = cache.jitter_ratio.unwrap_or(DEFAULT_JITTER_RATIO);
    if !(0.0..1.0).contains(&jitter_ratio) {
        return Err(LoadError::invalid(
            "cache.jitter_ratio",
            "must be within 0.0..1.0",
        ));
    }

    Ok(CacheSettings {
        search_ttl_secs: ttl_secs(
            cache.search_ttl_secs.unwrap_or(DEFAULT_SEARCH_TTL_SECS),
            "cache.search_ttl_secs",
        )?,
        isbn_ttl_secs: ttl_secs(
            cache.isbn_ttl_secs.unwrap_or(DEFAULT_ISBN_TTL_SECS),
            "cache.isbn_ttl_secs",
        )?,
        work_ttl_secs: ttl_secs(
            cache.work_ttl_secs.unwrap_or(DEFAULT_WORK_TTL_SECS),
            "cache.work_ttl_secs",
        )?,
        revalidate_threshold,
        jitter_ratio,
        operation_timeout_ms: non_zero_u64(
            cache
                .operation_timeout_ms
                .unwrap_or(DEFAULT_OPERATION_TIMEOUT_MS),
            "cache.operation_timeout_ms",
        )?,
        pattern_timeout_ms: non_zero_u64(
            cache
                .pattern_timeout_ms
                .unwrap_or(DEFAULT_PATTERN_TIMEOUT_MS),
            "cache.pattern_timeout_ms",
        )?,
        shutdown_timeout_ms: non_zero_u64(
            cache
                .shutdown_timeout_ms
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            "cache.shutdown_timeout_ms",
        )?,
    })
}

fn build_provider_settings(provider: RawProviderSettings) -> Result<ProviderSettings, LoadError> {
    let raw_url = non_blank(provider.base_url).unwrap_or_else(|| DEFAULT_PROVIDER_BASE_URL.into());
    let base_url = parse_base_url(&raw_url)
        .map_err(|reason| LoadError::invalid("provider.base_url", reason))?;

    let timeout_ms = non_zero_u64(
        provider.timeout_ms.unwrap_or(DEFAULT_PROVIDER_TIMEOUT_MS),
        "provider.timeout_ms",
    )?;

    let tag = non_blank(provider.tag).unwrap_or_else(|| DEFAULT_PROVIDER_TAG.to_string());
    if tag.contains(':') {
        return Err(LoadError::invalid(
            "provider.tag",
            "must not contain `:`",
        ));
    }

    let page_size = provider.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(LoadError::invalid(
            "provider.page_size",
            format!("must be within 1..={MAX_PAGE_SIZE}"),
        ));
    }

    Ok(ProviderSettings {
        base_url,
        timeout: Duration::from_millis(timeout_ms.get()),
        tag,
        app_name: non_blank(provider.app_name).unwrap_or_else(|| DEFAULT_APP_NAME.to_string()),
        app_version: non_blank(provider.app_version)
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
        contact: non_blank(provider.contact).unwrap_or_else(|| DEFAULT_CONTACT.to_string()),
        page_size,
    })
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    let invalidation_concurrency = non_zero_u32(
        jobs.invalidation_concurrency
            .unwrap_or(DEFAULT_INVALIDATION_CONCURRENCY)
            .into(),
        "jobs.invalidation_concurrency",
    )?;

    let purge_schedule =
        non_blank(jobs.purge_schedule).unwrap_or_else(|| DEFAULT_PURGE_SCHEDULE.to_string());
    purge_expired_schedule(&purge_schedule)
        .map_err(|reason| LoadError::invalid("jobs.purge_schedule", reason))?;

    Ok(JobsSettings {
        invalidation_concurrency,
        purge_schedule,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHotStoreSettings {
    backend: Option<HotStoreBackend>,
    redis_url: Option<String>,
    key_prefix: Option<String>,
    capacity: Option<u64>,
    shards: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    search_ttl_secs: Option<u64>,
    isbn_ttl_secs: Option<u64>,
    work_ttl_secs: Option<u64>,
    revalidate_threshold: Option<f64>,
    jitter_ratio: Option<f64>,
    operation_timeout_ms: Option<u64>,
    pattern_timeout_ms: Option<u64>,
    shutdown_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawProviderSettings {
    base_url: Option<String>,
    timeout_ms: Option<u64>,
    tag: Option<String>,
    app_name: Option<String>,
    app_version: Option<String>,
    contact: Option<String>,
    page_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    invalidation_concurrency: Option<u32>,
    purge_schedule: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_base_url(raw: &str) -> Result<Url, String> {
    let mut url = Url::parse(raw).map_err(|err| format!("invalid url `{raw}`: {err}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme `{}`", url.scheme()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_u64(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn ttl_secs(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    if value > MAX_TTL_SECS {
        return Err(LoadError::invalid(
            key,
            format!("must not exceed {MAX_TTL_SECS} seconds"),
        ));
    }
    non_zero_u64(value, key)
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
