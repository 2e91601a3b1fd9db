pub mod award;
pub mod bafo;
pub mod close;
pub mod compare;
pub mod config;
pub mod export;
pub mod migrate;
pub mod reopen;
pub mod revise;
pub mod seed;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use procura_core::config::{AppConfig, LoadOptions};
use procura_core::convert::StaticRateTable;
use procura_core::errors::{ApplicationError, InterfaceError};
use procura_core::ports::{DisabledNotifications, NotificationDispatcher};
use procura_core::service::{ProcurementService, RequestContext, ServiceSettings};
use procura_core::TracingAuditSink;
use procura_db::repositories::{SqlNotificationOutbox, SqlProcurementStore, SqlRateTableLoader};
use procura_db::{connect_with_settings, migrations, DbPool};

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config_path: Option<PathBuf>,
    pub actor: String,
}

impl GlobalOptions {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config_path.clone(),
            require_file: self.config_path.is_some(),
            ..LoadOptions::default()
        }
    }

    pub fn request(&self) -> RequestContext {
        let actor = if self.actor.trim().is_empty() { "operator" } else { self.actor.trim() };
        RequestContext::new(actor)
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            correlation_id: None,
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            correlation_id: None,
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    fn from_failure(command: &str, failure: CommandFailure) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(failure.error_class.to_string()),
            message: failure.message,
            correlation_id: failure.correlation_id,
            data: None,
        };
        Self { exit_code: failure.exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\
             \"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Why a command stopped, with the process exit code to report.
#[derive(Debug)]
pub(crate) struct CommandFailure {
    error_class: &'static str,
    message: String,
    exit_code: u8,
    correlation_id: Option<String>,
}

impl CommandFailure {
    pub(crate) fn new(
        error_class: &'static str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self { error_class, message: message.into(), exit_code, correlation_id: None }
    }

    pub(crate) fn config(error: impl std::fmt::Display) -> Self {
        Self::new("config_validation", format!("configuration issue: {error}"), 2)
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new("invalid_argument", message, 2)
    }

    /// Maps a service error through the interface layer so the operator only sees safe text.
    pub(crate) fn service(error: ApplicationError, request: &RequestContext) -> Self {
        let interface = error.into_interface(request.correlation_id.clone());
        let (error_class, exit_code) = match &interface {
            InterfaceError::BadRequest { .. } => ("bad_request", 7),
            InterfaceError::Conflict { .. } => ("conflict", 8),
            InterfaceError::NotFound { .. } => ("not_found", 9),
            InterfaceError::ServiceUnavailable { .. } => ("service_unavailable", 4),
            InterfaceError::Internal { .. } => ("internal", 3),
        };
        Self {
            error_class,
            message: format!("{} ({interface})", interface.user_message()),
            exit_code,
            correlation_id: Some(interface.correlation_id().to_string()),
        }
    }
}

/// Loads config, builds a current-thread runtime and runs `body` on it.
pub(crate) fn execute<F, Fut>(command: &str, options: &GlobalOptions, body: F) -> CommandResult
where
    F: FnOnce(AppConfig) -> Fut,
    Fut: std::future::Future<Output = Result<CommandResult, CommandFailure>>,
{
    let config = match AppConfig::load(options.load_options()) {
        Ok(config) => config,
        Err(error) => return CommandResult::from_failure(command, CommandFailure::config(error)),
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    match runtime.block_on(body(config)) {
        Ok(result) => result,
        Err(failure) => CommandResult::from_failure(command, failure),
    }
}

pub(crate) async fn connect_migrated(config: &AppConfig) -> Result<DbPool, CommandFailure> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| CommandFailure::new("db_connectivity", error.to_string(), 4))?;
    migrations::run_pending(&pool)
        .await
        .map_err(|error| CommandFailure::new("migration", error.to_string(), 5))?;
    Ok(pool)
}

/// Service wired to SQLite storage, the notification outbox and the stored rate table.
pub(crate) struct ServiceHandle {
    pub pool: DbPool,
    pub store: Arc<SqlProcurementStore>,
    pub service: ProcurementService,
}

pub(crate) async fn open_service(config: &AppConfig) -> Result<ServiceHandle, CommandFailure> {
    let pool = connect_migrated(config).await?;

    let rates = SqlRateTableLoader::new(pool.clone())
        .load(StaticRateTable::standard(), config.comparison.pivot_currency.as_deref())
        .await
        .map_err(|error| CommandFailure::new("rate_table", error.to_string(), 4))?;
    let notifier: Arc<dyn NotificationDispatcher> = if config.notifications.enabled {
        Arc::new(SqlNotificationOutbox::new(pool.clone()))
    } else {
        Arc::new(DisabledNotifications)
    };
    let store = Arc::new(SqlProcurementStore::new(pool.clone()));
    let settings = ServiceSettings {
        ranking: config.comparison.ranking(),
        notification_timeout: Duration::from_secs(config.notifications.timeout_secs),
    };
    let service = ProcurementService::new(
        store.clone(),
        notifier,
        Arc::new(TracingAuditSink),
        Arc::new(rates),
        settings,
    );

    Ok(ServiceHandle { pool, store, service })
}

pub(crate) fn to_data<T: Serialize>(value: &T) -> Result<Value, CommandFailure> {
    serde_json::to_value(value)
        .map_err(|error| CommandFailure::new("serialization", error.to_string(), 3))
}
