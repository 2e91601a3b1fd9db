use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use clap::Args;

use procura_core::config::AppConfig;
use procura_core::domain::rfq::RfqId;
use procura_core::export::{export_rows, write_csv};
use procura_core::service::RequestContext;

use crate::commands::compare::ComparisonArgs;
use crate::commands::{execute, open_service, CommandFailure, CommandResult, GlobalOptions};

#[derive(Debug, Clone, Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub comparison: ComparisonArgs,
    #[arg(long, short, help = "CSV file to write")]
    pub output: PathBuf,
}

pub fn run(options: &GlobalOptions, args: ExportArgs) -> CommandResult {
    let request = options.request();
    execute("export", options, |config| export(config, args, request))
}

async fn export(
    config: AppConfig,
    args: ExportArgs,
    request: RequestContext,
) -> Result<CommandResult, CommandFailure> {
    let comparison_options = args.comparison.options(&config)?;
    let handle = open_service(&config).await?;
    let rfq_id = RfqId(args.comparison.rfq_id.clone());
    let result = handle
        .service
        .build_comparison(&rfq_id, &comparison_options, &request)
        .await
        .map_err(|error| CommandFailure::service(error, &request))?;
    handle.pool.close().await;

    let rows = export_rows(&result);
    let file = File::create(&args.output).map_err(|error| {
        CommandFailure::new(
            "export_io",
            format!("cannot create {}: {error}", args.output.display()),
            3,
        )
    })?;
    write_csv(&rows, BufWriter::new(file))
        .map_err(|error| CommandFailure::new("export_io", error.to_string(), 3))?;

    Ok(CommandResult::success(
        "export",
        format!("wrote {} rows to {}", rows.len(), args.output.display()),
    ))
}
