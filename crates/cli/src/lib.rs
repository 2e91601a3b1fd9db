pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::award::AwardArgs;
use commands::bafo::BafoArgs;
use commands::close::CloseArgs;
use commands::compare::CompareArgs;
use commands::export::ExportArgs;
use commands::reopen::ReopenArgs;
use commands::revise::ReviseArgs;
use commands::GlobalOptions;
use procura_core::config::{AppConfig, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "procura",
    about = "Procura RFQ comparison and award CLI",
    long_about = "Compare supplier quotes for an RFQ, negotiate best-and-final offers, and \
                  record awards. Every command prints one JSON object on stdout.",
    after_help = "Examples:\n  procura seed\n  procura compare rfq-demo-001 --normalize\n  \
                  procura award rfq-demo-001 --quote quote-demo-s2 --po PO-1001"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file (defaults to config/procura.toml)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, default_value = "operator", help = "Actor recorded in audit")]
    actor: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations")]
    Migrate,
    #[command(about = "Load and verify the demo RFQ with three supplier quotes")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Build the ranked comparison matrix for an RFQ")]
    Compare(CompareArgs),
    #[command(about = "Write the comparison as CSV")]
    Export(ExportArgs),
    #[command(about = "Ask suppliers for a best-and-final offer")]
    Bafo(BafoArgs),
    #[command(about = "Record a supplier's revised quote")]
    Revise(ReviseArgs),
    #[command(about = "Award the RFQ to one quote")]
    Award(AwardArgs),
    #[command(about = "Supersede the active award and start a new round")]
    Reopen(ReopenArgs),
    #[command(about = "Close the RFQ to further negotiation")]
    Close(CloseArgs),
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = GlobalOptions { config_path: cli.config, actor: cli.actor };
    init_logging(&options);

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(&options),
        Command::Seed => commands::seed::run(&options),
        Command::Config => commands::config::run(&options),
        Command::Compare(args) => commands::compare::run(&options, args),
        Command::Export(args) => commands::export::run(&options, args),
        Command::Bafo(args) => commands::bafo::run(&options, args),
        Command::Revise(args) => commands::revise::run(&options, args),
        Command::Award(args) => commands::award::run(&options, args),
        Command::Reopen(args) => commands::reopen::run(&options, args),
        Command::Close(args) => commands::close::run(&options, args),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout stays a single JSON document. A config that fails to load is
/// reported by the command itself; logging then falls back to defaults.
fn init_logging(options: &GlobalOptions) {
    use tracing::Level;

    let config = AppConfig::load(options.load_options()).unwrap_or_default();
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::WARN);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
