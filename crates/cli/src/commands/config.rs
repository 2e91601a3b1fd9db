use std::env;
use std::fs;
use std::path::Path;

use toml::Value;

use procura_core::config::{resolve_config_path, AppConfig, LogFormat};
use procura_core::convert::IncotermPolicy;
use procura_core::normalize::UomTarget;

use crate::commands::{CommandResult, GlobalOptions};

pub fn run(options: &GlobalOptions) -> CommandResult {
    let config = match AppConfig::load(options.load_options()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            );
        }
    };

    let file_path = resolve_config_path(options.config_path.as_deref());
    let file_doc = load_config_file_doc(file_path.as_deref());
    let sources = SourceLookup { file_doc: file_doc.as_ref(), file_path: file_path.as_deref() };

    let comparison = &config.comparison;
    let uom_target = match &comparison.uom_target {
        UomTarget::LineItem => "line_item".to_string(),
        UomTarget::Fixed(unit) => unit.clone(),
    };
    let incoterm_policy = match comparison.incoterm_policy {
        IncotermPolicy::Advisory => "advisory",
        IncotermPolicy::Strict => "strict",
    };
    let log_format = match config.logging.format {
        LogFormat::Compact => "compact",
        LogFormat::Pretty => "pretty",
        LogFormat::Json => "json",
    };

    let entries: Vec<(&str, String, &[&str])> = vec![
        ("database.url", config.database.url.clone(), &["PROCURA_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["PROCURA_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["PROCURA_DATABASE_TIMEOUT_SECS"],
        ),
        (
            "comparison.target_currency",
            comparison.target_currency.clone(),
            &["PROCURA_COMPARISON_TARGET_CURRENCY"],
        ),
        (
            "comparison.target_incoterm",
            comparison.target_incoterm.as_str().to_string(),
            &["PROCURA_COMPARISON_TARGET_INCOTERM"],
        ),
        ("comparison.uom_target", uom_target, &["PROCURA_COMPARISON_UOM_TARGET"]),
        (
            "comparison.near_best_pct",
            comparison.near_best_pct.to_string(),
            &["PROCURA_COMPARISON_NEAR_BEST_PCT"],
        ),
        (
            "comparison.incoterm_policy",
            incoterm_policy.to_string(),
            &["PROCURA_COMPARISON_INCOTERM_POLICY"],
        ),
        (
            "comparison.pivot_currency",
            comparison.pivot_currency.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["PROCURA_COMPARISON_PIVOT_CURRENCY"],
        ),
        (
            "notifications.enabled",
            config.notifications.enabled.to_string(),
            &["PROCURA_NOTIFICATIONS_ENABLED"],
        ),
        (
            "notifications.timeout_secs",
            config.notifications.timeout_secs.to_string(),
            &["PROCURA_NOTIFICATIONS_TIMEOUT_SECS"],
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            &["PROCURA_LOGGING_LEVEL", "PROCURA_LOG_LEVEL"],
        ),
        (
            "logging.format",
            log_format.to_string(),
            &["PROCURA_LOGGING_FORMAT", "PROCURA_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        entries
            .into_iter()
            .map(|(key, value, env_keys)| render_line(key, &value, sources.source(key, env_keys))),
    );

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

struct SourceLookup<'a> {
    file_doc: Option<&'a Value>,
    file_path: Option<&'a Path>,
}

impl SourceLookup<'_> {
    fn source(&self, key_path: &str, env_keys: &[&str]) -> String {
        if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
            return format!("env ({env_key})");
        }

        if let Some(doc) = self.file_doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .file_path
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use super::{contains_path, render_line};

    #[test]
    fn nested_keys_are_found_in_the_file_document() {
        let doc: toml::Value = "[comparison]\nnear_best_pct = 3\n".parse().expect("toml");
        assert!(contains_path(&doc, "comparison.near_best_pct"));
        assert!(!contains_path(&doc, "comparison.target_currency"));
        assert!(!contains_path(&doc, "database.url"));
    }

    #[test]
    fn lines_name_their_source() {
        assert_eq!(
            render_line("logging.level", "debug", "env (PROCURA_LOG_LEVEL)".to_string()),
            "- logging.level = debug (source: env (PROCURA_LOG_LEVEL))"
        );
    }
}
