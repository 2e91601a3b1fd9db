use std::env;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use procura_cli::commands::award::AwardArgs;
use procura_cli::commands::bafo::BafoArgs;
use procura_cli::commands::compare::{CompareArgs, ComparisonArgs};
use procura_cli::commands::export::ExportArgs;
use procura_cli::commands::revise::ReviseArgs;
use procura_cli::commands::{
    award, bafo, compare, config, export, migrate, revise, seed, GlobalOptions,
};
use serde_json::Value;
use tempfile::TempDir;

const RFQ: &str = "rfq-demo-001";

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("PROCURA_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run(&options());
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_override() {
    with_env(
        &[
            ("PROCURA_DATABASE_URL", "sqlite::memory:"),
            ("PROCURA_DATABASE_MAX_CONNECTIONS", "lots"),
        ],
        || {
            let result = migrate::run(&options());
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
        },
    );
}

#[test]
fn missing_explicit_config_file_is_a_config_failure() {
    with_env(&[("PROCURA_DATABASE_URL", "sqlite::memory:")], || {
        let options = GlobalOptions {
            config_path: Some("/nonexistent/procura.toml".into()),
            actor: "buyer-1".to_string(),
        };
        let result = migrate::run(&options);
        assert_eq!(result.exit_code, 2);
    });
}

#[test]
fn seed_loads_and_verifies_demo_rfq() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("PROCURA_DATABASE_URL", &database_url(dir.path()))], || {
        let result = seed::run(&options());
        assert_eq!(result.exit_code, 0, "seed output: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");

        let again = seed::run(&options());
        assert_eq!(again.exit_code, 0, "seeding twice stays idempotent");
    });
}

#[test]
fn compare_reports_best_value_and_cell_classes() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("PROCURA_DATABASE_URL", &database_url(dir.path()))], || {
        assert_eq!(seed::run(&options()).exit_code, 0);

        let result = compare::run(&options(), compare_args());
        assert_eq!(result.exit_code, 0, "compare output: {}", result.output);

        let payload = parse_payload(&result.output);
        let data = &payload["data"];
        assert_eq!(data["rfq_id"], RFQ);
        assert_eq!(data["best_value"], "quote-demo-s2");
        assert_eq!(data["suppliers"].as_array().map(Vec::len), Some(3));
        assert_eq!(data["line_items"].as_array().map(Vec::len), Some(2));

        let first_row = data["line_items"][0]["cells"].as_array().expect("cells");
        let best = first_row
            .iter()
            .find(|cell| cell["quote_id"] == "quote-demo-s2")
            .expect("s2 priced line 1");
        assert_eq!(best["class"], "best");
        assert_eq!(best["rank"], 1);
    });
}

#[test]
fn compare_unknown_rfq_is_not_found() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("PROCURA_DATABASE_URL", &database_url(dir.path()))], || {
        let mut args = compare_args();
        args.comparison.rfq_id = "rfq-missing".to_string();

        let result = compare::run(&options(), args);
        assert_eq!(result.exit_code, 9, "compare output: {}", result.output);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "not_found");
        assert!(payload["correlation_id"].is_string());
    });
}

#[test]
fn compare_rejects_unknown_incoterm_override() {
    with_env(&[("PROCURA_DATABASE_URL", "sqlite::memory:")], || {
        let mut args = compare_args();
        args.comparison.incoterm = Some("XYZ".to_string());

        let result = compare::run(&options(), args);
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_argument");
    });
}

#[test]
fn second_award_is_a_conflict() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("PROCURA_DATABASE_URL", &database_url(dir.path()))], || {
        assert_eq!(seed::run(&options()).exit_code, 0);

        let first = award::run(&options(), award_args("quote-demo-s2"));
        assert_eq!(first.exit_code, 0, "award output: {}", first.output);
        let payload = parse_payload(&first.output);
        assert_eq!(payload["data"]["award"]["quote_id"], "quote-demo-s2");
        assert_eq!(payload["data"]["award"]["po_number"], "PO-1001");
        assert_eq!(payload["data"]["award"]["awarded_by"], "buyer-1");

        let second = award::run(&options(), award_args("quote-demo-s1"));
        assert_eq!(second.exit_code, 8, "award output: {}", second.output);
        assert_eq!(parse_payload(&second.output)["error_class"], "conflict");
    });
}

#[test]
fn revise_rejects_malformed_price_argument() {
    with_env(&[("PROCURA_DATABASE_URL", "sqlite::memory:")], || {
        let args = ReviseArgs {
            rfq_id: RFQ.to_string(),
            quote: "quote-demo-s1".to_string(),
            prices: vec!["li-demo-001".to_string()],
            total: None,
            lead_time: None,
            incoterm: None,
        };
        let result = revise::run(&options(), args);
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_argument");
    });
}

#[test]
fn revise_after_bafo_records_new_revision() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("PROCURA_DATABASE_URL", &database_url(dir.path()))], || {
        assert_eq!(seed::run(&options()).exit_code, 0);
        let bafo_args = BafoArgs {
            rfq_id: RFQ.to_string(),
            quotes: vec!["quote-demo-s1".to_string()],
            message: "Final round".to_string(),
        };
        let requested = bafo::run(&options(), bafo_args);
        assert_eq!(requested.exit_code, 0, "bafo output: {}", requested.output);
        assert_eq!(parse_payload(&requested.output)["data"][0]["status"], "requested");

        let args = ReviseArgs {
            rfq_id: RFQ.to_string(),
            quote: "quote-demo-s1".to_string(),
            prices: vec!["li-demo-001=8.75".to_string(), "li-demo-002=19.50".to_string()],
            total: None,
            lead_time: Some(12),
            incoterm: None,
        };
        let result = revise::run(&options(), args);
        assert_eq!(result.exit_code, 0, "revise output: {}", result.output);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["previous_quote_id"], "quote-demo-s1");
        assert_eq!(payload["data"]["revision"], 2);
    });
}

#[test]
fn export_writes_one_csv_row_per_quoted_cell() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("PROCURA_DATABASE_URL", &database_url(dir.path()))], || {
        assert_eq!(seed::run(&options()).exit_code, 0);

        let output = dir.path().join("comparison.csv");
        let args = ExportArgs { comparison: comparison_args(), output: output.clone() };
        let result = export::run(&options(), args);
        assert_eq!(result.exit_code, 0, "export output: {}", result.output);

        let text = std::fs::read_to_string(&output).expect("csv written");
        let mut lines = text.lines();
        assert!(lines.next().expect("header").starts_with("line_number,line_item_id"));
        // s1 and s3 price both lines, s2 prices one.
        assert_eq!(lines.count(), 5);
    });
}

#[test]
fn config_reports_sources_for_each_key() {
    with_env(
        &[("PROCURA_DATABASE_URL", "sqlite::memory:"), ("PROCURA_LOG_LEVEL", "debug")],
        || {
            let result = config::run(&options());
            assert_eq!(result.exit_code, 0);
            assert!(result.output.contains("database.url = sqlite::memory: (source: env"));
            assert!(result.output.contains("logging.level = debug (source: env"));
            assert!(result.output.contains("comparison.near_best_pct"));
        },
    );
}

fn options() -> GlobalOptions {
    GlobalOptions { config_path: None, actor: "buyer-1".to_string() }
}

fn comparison_args() -> ComparisonArgs {
    ComparisonArgs { rfq_id: RFQ.to_string(), ..ComparisonArgs::default() }
}

fn compare_args() -> CompareArgs {
    CompareArgs { comparison: comparison_args(), mark_reviewed: false }
}

fn award_args(quote: &str) -> AwardArgs {
    AwardArgs {
        rfq_id: RFQ.to_string(),
        quote: quote.to_string(),
        po: Some("PO-1001".to_string()),
        notes: None,
    }
}

fn database_url(dir: &Path) -> String {
    format!("sqlite://{}", dir.join("procura.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "PROCURA_DATABASE_URL",
        "PROCURA_DATABASE_MAX_CONNECTIONS",
        "PROCURA_DATABASE_TIMEOUT_SECS",
        "PROCURA_COMPARISON_TARGET_CURRENCY",
        "PROCURA_COMPARISON_TARGET_INCOTERM",
        "PROCURA_COMPARISON_UOM_TARGET",
        "PROCURA_COMPARISON_NEAR_BEST_PCT",
        "PROCURA_COMPARISON_INCOTERM_POLICY",
        "PROCURA_COMPARISON_PIVOT_CURRENCY",
        "PROCURA_NOTIFICATIONS_ENABLED",
        "PROCURA_NOTIFICATIONS_TIMEOUT_SECS",
        "PROCURA_LOGGING_LEVEL",
        "PROCURA_LOGGING_FORMAT",
        "PROCURA_LOG_LEVEL",
        "PROCURA_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
