use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::convert::IncotermPolicy;
use crate::domain::terms::{currency_code, Incoterm};
use crate::normalize::{NormalizationSettings, UomTarget};
use crate::ranking::{RankingConfig, DEFAULT_NEAR_BEST_PCT};

pub const DEFAULT_CONFIG_FILE: &str = "procura.toml";
pub const NESTED_CONFIG_FILE: &str = "config/procura.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub comparison: ComparisonConfig,
    pub notifications: NotificationConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ComparisonConfig {
    pub target_currency: String,
    pub target_incoterm: Incoterm,
    pub uom_target: UomTarget,
    /// Percentage above the lowest price still highlighted as near-best.
    pub near_best_pct: Decimal,
    pub incoterm_policy: IncotermPolicy,
    /// Currency used to derive cross rates with no direct table entry.
    pub pivot_currency: Option<String>,
}

impl ComparisonConfig {
    pub fn normalization(&self) -> NormalizationSettings {
        NormalizationSettings {
            target_currency: self.target_currency.clone(),
            target_incoterm: self.target_incoterm,
            uom_target: self.uom_target.clone(),
            incoterm_policy: self.incoterm_policy,
        }
    }

    pub fn ranking(&self) -> RankingConfig {
        RankingConfig { near_best_pct: self.near_best_pct }
    }
}

#[derive(Clone, Debug)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub target_currency: Option<String>,
    pub target_incoterm: Option<Incoterm>,
    pub uom_target: Option<UomTarget>,
    pub incoterm_policy: Option<IncotermPolicy>,
    pub notifications_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://procura.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            comparison: ComparisonConfig {
                target_currency: "USD".to_string(),
                target_incoterm: Incoterm::Fob,
                uom_target: UomTarget::LineItem,
                near_best_pct: Decimal::from(DEFAULT_NEAR_BEST_PCT),
                incoterm_policy: IncotermPolicy::Advisory,
                pivot_currency: Some("USD".to_string()),
            },
            notifications: NotificationConfig { enabled: true, timeout_secs: 10 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(comparison) = patch.comparison {
            if let Some(target_currency) = comparison.target_currency {
                self.comparison.target_currency = currency_code(&target_currency);
            }
            if let Some(target_incoterm) = comparison.target_incoterm {
                self.comparison.target_incoterm =
                    parse_incoterm("comparison.target_incoterm", &target_incoterm)?;
            }
            if let Some(uom_target) = comparison.uom_target {
                self.comparison.uom_target =
                    parse_uom_target("comparison.uom_target", &uom_target)?;
            }
            if let Some(near_best_pct) = comparison.near_best_pct {
                self.comparison.near_best_pct =
                    parse_decimal("comparison.near_best_pct", &near_best_pct.to_string())?;
            }
            if let Some(incoterm_policy) = comparison.incoterm_policy {
                self.comparison.incoterm_policy = incoterm_policy;
            }
            if let Some(pivot_currency) = comparison.pivot_currency {
                self.comparison.pivot_currency =
                    (!pivot_currency.trim().is_empty()).then(|| currency_code(&pivot_currency));
            }
        }

        if let Some(notifications) = patch.notifications {
            if let Some(enabled) = notifications.enabled {
                self.notifications.enabled = enabled;
            }
            if let Some(timeout_secs) = notifications.timeout_secs {
                self.notifications.timeout_secs = timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PROCURA_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PROCURA_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("PROCURA_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PROCURA_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PROCURA_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PROCURA_COMPARISON_TARGET_CURRENCY") {
            self.comparison.target_currency = currency_code(&value);
        }
        if let Some(value) = read_env("PROCURA_COMPARISON_TARGET_INCOTERM") {
            self.comparison.target_incoterm =
                parse_incoterm("PROCURA_COMPARISON_TARGET_INCOTERM", &value)?;
        }
        if let Some(value) = read_env("PROCURA_COMPARISON_UOM_TARGET") {
            self.comparison.uom_target = parse_uom_target("PROCURA_COMPARISON_UOM_TARGET", &value)?;
        }
        if let Some(value) = read_env("PROCURA_COMPARISON_NEAR_BEST_PCT") {
            self.comparison.near_best_pct =
                parse_decimal("PROCURA_COMPARISON_NEAR_BEST_PCT", &value)?;
        }
        if let Some(value) = read_env("PROCURA_COMPARISON_INCOTERM_POLICY") {
            self.comparison.incoterm_policy = value.parse().map_err(|_| {
                ConfigError::InvalidEnvOverride {
                    key: "PROCURA_COMPARISON_INCOTERM_POLICY".to_string(),
                    value: value.clone(),
                }
            })?;
        }
        if let Some(value) = read_env("PROCURA_COMPARISON_PIVOT_CURRENCY") {
            self.comparison.pivot_currency = Some(currency_code(&value));
        }

        if let Some(value) = read_env("PROCURA_NOTIFICATIONS_ENABLED") {
            self.notifications.enabled = parse_bool("PROCURA_NOTIFICATIONS_ENABLED", &value)?;
        }
        if let Some(value) = read_env("PROCURA_NOTIFICATIONS_TIMEOUT_SECS") {
            self.notifications.timeout_secs =
                parse_u64("PROCURA_NOTIFICATIONS_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("PROCURA_LOGGING_LEVEL").or_else(|| read_env("PROCURA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PROCURA_LOGGING_FORMAT").or_else(|| read_env("PROCURA_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(target_currency) = overrides.target_currency {
            self.comparison.target_currency = currency_code(&target_currency);
        }
        if let Some(target_incoterm) = overrides.target_incoterm {
            self.comparison.target_incoterm = target_incoterm;
        }
        if let Some(uom_target) = overrides.uom_target {
            self.comparison.uom_target = uom_target;
        }
        if let Some(incoterm_policy) = overrides.incoterm_policy {
            self.comparison.incoterm_policy = incoterm_policy;
        }
        if let Some(enabled) = overrides.notifications_enabled {
            self.notifications.enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_comparison(&self.comparison)?;
        validate_notifications(&self.notifications)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// Explicit path if it exists, else the first default location that does.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from(NESTED_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_comparison(comparison: &ComparisonConfig) -> Result<(), ConfigError> {
    if !is_currency_code(&comparison.target_currency) {
        return Err(ConfigError::Validation(format!(
            "comparison.target_currency must be a 3-letter ISO 4217 code, got `{}`",
            comparison.target_currency
        )));
    }
    if let Some(pivot) = &comparison.pivot_currency {
        if !is_currency_code(pivot) {
            return Err(ConfigError::Validation(format!(
                "comparison.pivot_currency must be a 3-letter ISO 4217 code, got `{pivot}`"
            )));
        }
    }

    if comparison.near_best_pct < Decimal::ZERO || comparison.near_best_pct > Decimal::ONE_HUNDRED
    {
        return Err(ConfigError::Validation(
            "comparison.near_best_pct must be in range 0..=100".to_string(),
        ));
    }

    Ok(())
}

fn validate_notifications(notifications: &NotificationConfig) -> Result<(), ConfigError> {
    if notifications.timeout_secs == 0 || notifications.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "notifications.timeout_secs must be in range 1..=120".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn is_currency_code(value: &str) -> bool {
    value.len() == 3 && value.chars().all(|ch| ch.is_ascii_uppercase())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    value.trim().parse::<Decimal>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_incoterm(key: &str, value: &str) -> Result<Incoterm, ConfigError> {
    value.parse::<Incoterm>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_uom_target(key: &str, value: &str) -> Result<UomTarget, ConfigError> {
    value.parse::<UomTarget>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    comparison: Option<ComparisonPatch>,
    notifications: Option<NotificationPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ComparisonPatch {
    target_currency: Option<String>,
    target_incoterm: Option<String>,
    uom_target: Option<String>,
    near_best_pct: Option<f64>,
    incoterm_policy: Option<IncotermPolicy>,
    pivot_currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationPatch {
    enabled: Option<bool>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
