//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::{Backend, BinaryVersion, RenderOptions};

mod cli;

pub use cli::*;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pressroom";
const ENV_PREFIX: &str = "PRESSROOM";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT_ATTEMPTS: u64 = 1000;
const DEFAULT_REQUEST_MS: u64 = 120_000;
const DEFAULT_LAUNCH_SETTLE_MS: u64 = 200;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2_000;
const DEFAULT_COMMAND_MS: u64 = 30_000;
const DEFAULT_PAGE_LOAD_MS: u64 = 30_000;
const DEFAULT_PAGINATION_SETTLE_MS: u64 = 200;
const DEFAULT_VERSION_PROBE_MS: u64 = 5_000;
const DEFAULT_RETRY_MAX_ATTEMPTS: u64 = 30;
const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 100;
const DEFAULT_RETRY_MULTIPLIER: f64 = 1.5;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 1_000;
const DEFAULT_RETRY_SETTLE_MS: u64 = 100;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub renderer: RendererSettings,
    pub timeouts: TimeoutSettings,
    pub retry: RetrySettings,
    pub logging: LoggingSettings,
    /// Render options applied underneath every request.
    pub defaults: RenderOptions,
}

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub backend: Backend,
    pub binary: Option<PathBuf>,
    pub host: String,
    pub port_attempts: NonZeroU32,
    /// Pinned legacy binary version; probed at render time when unset.
    pub binary_version: Option<BinaryVersion>,
}

#[derive(Debug, Clone)]
pub struct TimeoutSettings {
    pub request: Duration,
    pub launch_settle: Duration,
    pub shutdown_grace: Duration,
    pub command: Duration,
    pub page_load: Duration,
    pub pagination_settle: Duration,
    pub version_probe: Duration,
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: NonZeroU32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub settle: Duration,
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
    load_from(cli, Environment::with_prefix(ENV_PREFIX).separator("__"))
}

fn load_from(cli: &CliArgs, environment: Environment) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(environment);

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Render(args)) => raw.apply_overrides(&args.overrides),
        Some(Command::Probe(args)) => raw.apply_overrides(&args.overrides),
        None => {}
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    renderer: RawRendererSettings,
    timeouts: RawTimeoutSettings,
    retry: RawRetrySettings,
    logging: RawLoggingSettings,
    defaults: RenderOptions,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &SettingsOverrides) {
        if let Some(backend) = overrides.backend.as_ref() {
            self.renderer.backend = Some(backend.clone());
        }
        if let Some(binary) = overrides.binary.as_ref() {
            self.renderer.binary = Some(binary.clone());
        }
        if let Some(version) = overrides.binary_version.as_ref() {
            self.renderer.binary_version = Some(version.clone());
        }
        if let Some(seconds) = overrides.timeout_seconds {
            self.timeouts.request_ms = Some(seconds.saturating_mul(1000));
        }
        if let Some(dir) = overrides.temp_dir.as_ref() {
            self.defaults.temp_dir = Some(dir.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            renderer,
            timeouts,
            retry,
            logging,
            defaults,
        } = raw;

        let renderer = build_renderer_settings(renderer)?;
        let timeouts = build_timeout_settings(timeouts)?;
        let retry = build_retry_settings(retry)?;
        let logging = build_logging_settings(logging)?;
        let defaults = build_default_options(defaults)?;

        Ok(Self {
            renderer,
            timeouts,
            retry,
            logging,
            defaults,
        })
    }
}

fn build_renderer_settings(renderer: RawRendererSettings) -> Result<RendererSettings, LoadError> {
    let backend = match renderer.backend {
        Some(value) => Backend::from_str(&value)
            .map_err(|reason| LoadError::invalid("renderer.backend", reason))?,
        None => Backend::default(),
    };

    let binary = renderer
        .binary
        .filter(|path| !path.as_os_str().is_empty());

    let host = renderer
        .host
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    if host.is_empty() {
        return Err(LoadError::invalid("renderer.host", "host must not be empty"));
    }

    let port_attempts = non_zero_u32(
        renderer.port_attempts.unwrap_or(DEFAULT_PORT_ATTEMPTS),
        "renderer.port_attempts",
    )?;

    let binary_version = match renderer.binary_version {
        Some(value) => Some(BinaryVersion::from_str(value.trim()).map_err(|err| {
            LoadError::invalid("renderer.binary_version", format!("failed to parse: {err}"))
        })?),
        None => None,
    };

    Ok(RendererSettings {
        backend,
        binary,
        host,
        port_attempts,
        binary_version,
    })
}

fn build_timeout_settings(timeouts: RawTimeoutSettings) -> Result<TimeoutSettings, LoadError> {
    Ok(TimeoutSettings {
        request: positive_millis(
            timeouts.request_ms.unwrap_or(DEFAULT_REQUEST_MS),
            "timeouts.request_ms",
        )?,
        launch_settle: Duration::from_millis(
            timeouts.launch_settle_ms.unwrap_or(DEFAULT_LAUNCH_SETTLE_MS),
        ),
        shutdown_grace: Duration::from_millis(
            timeouts
                .shutdown_grace_ms
                .unwrap_or(DEFAULT_SHUTDOWN_GRACE_MS),
        ),
        command: positive_millis(
            timeouts.command_ms.unwrap_or(DEFAULT_COMMAND_MS),
            "timeouts.command_ms",
        )?,
        page_load: positive_millis(
            timeouts.page_load_ms.unwrap_or(DEFAULT_PAGE_LOAD_MS),
            "timeouts.page_load_ms",
        )?,
        pagination_settle: Duration::from_millis(
            timeouts
                .pagination_settle_ms
                .unwrap_or(DEFAULT_PAGINATION_SETTLE_MS),
        ),
        version_probe: positive_millis(
            timeouts
                .version_probe_ms
                .unwrap_or(DEFAULT_VERSION_PROBE_MS),
            "timeouts.version_probe_ms",
        )?,
    })
}

fn build_retry_settings(retry: RawRetrySettings) -> Result<RetrySettings, LoadError> {
    let max_attempts = non_zero_u32(
        retry.max_attempts.unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS),
        "retry.max_attempts",
    )?;

    let multiplier = retry.multiplier.unwrap_or(DEFAULT_RETRY_MULTIPLIER);
    if !multiplier.is_finite() || multiplier < 1.0 {
        return Err(LoadError::invalid(
            "retry.multiplier",
            "must be a finite number of at least 1.0",
        ));
    }

    let initial_delay = Duration::from_millis(
        retry
            .initial_delay_ms
            .unwrap_or(DEFAULT_RETRY_INITIAL_DELAY_MS),
    );
    let max_delay =
        Duration::from_millis(retry.max_delay_ms.unwrap_or(DEFAULT_RETRY_MAX_DELAY_MS));
    if max_delay < initial_delay {
        return Err(LoadError::invalid(
            "retry.max_delay_ms",
            "must not be shorter than retry.initial_delay_ms",
        ));
    }

    Ok(RetrySettings {
        max_attempts,
        initial_delay,
        multiplier,
        max_delay,
        settle: Duration::from_millis(retry.settle_ms.unwrap_or(DEFAULT_RETRY_SETTLE_MS)),
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

fn build_default_options(defaults: RenderOptions) -> Result<RenderOptions, LoadError> {
    if defaults
        .page_number_callback
        .as_deref()
        .is_some_and(|name| name.trim().is_empty())
    {
        return Err(LoadError::invalid(
            "defaults.page_number_callback",
            "must not be empty",
        ));
    }
    if defaults
        .temp_dir
        .as_ref()
        .is_some_and(|dir| dir.as_os_str().is_empty())
    {
        return Err(LoadError::invalid(
            "defaults.temp_dir",
            "path must not be empty",
        ));
    }
    Ok(defaults)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRendererSettings {
    backend: Option<String>,
    binary: Option<PathBuf>,
    host: Option<String>,
    port_attempts: Option<u64>,
    binary_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTimeoutSettings {
    request_ms: Option<u64>,
    launch_settle_ms: Option<u64>,
    shutdown_grace_ms: Option<u64>,
    command_ms: Option<u64>,
    page_load_ms: Option<u64>,
    pagination_settle_ms: Option<u64>,
    version_probe_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRetrySettings {
    max_attempts: Option<u64>,
    initial_delay_ms: Option<u64>,
    multiplier: Option<f64>,
    max_delay_ms: Option<u64>,
    settle_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
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
