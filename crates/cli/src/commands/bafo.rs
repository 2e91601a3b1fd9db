use clap::Args;

use procura_core::config::AppConfig;
use procura_core::domain::quote::SupplierQuoteId;
use procura_core::domain::rfq::RfqId;
use procura_core::service::{BafoStatus, RequestContext};

use crate::commands::{
    execute, open_service, to_data, CommandFailure, CommandResult, GlobalOptions,
};

#[derive(Debug, Clone, Args)]
pub struct BafoArgs {
    #[arg(help = "RFQ id")]
    pub rfq_id: String,
    #[arg(long = "quote", required = true, help = "Quote to ask for a best-and-final offer")]
    pub quotes: Vec<String>,
    #[arg(long, default_value = "", help = "Message included in the supplier notification")]
    pub message: String,
}

pub fn run(options: &GlobalOptions, args: BafoArgs) -> CommandResult {
    let request = options.request();
    execute("bafo", options, |config| bafo(config, args, request))
}

async fn bafo(
    config: AppConfig,
    args: BafoArgs,
    request: RequestContext,
) -> Result<CommandResult, CommandFailure> {
    let handle = open_service(&config).await?;
    let quote_ids: Vec<SupplierQuoteId> =
        args.quotes.iter().map(|id| SupplierQuoteId(id.trim().to_string())).collect();
    let outcomes = handle
        .service
        .request_bafo(&RfqId(args.rfq_id.clone()), &quote_ids, &args.message, &request)
        .await
        .map_err(|error| CommandFailure::service(error, &request))?;
    handle.pool.close().await;

    let requested =
        outcomes.iter().filter(|outcome| matches!(outcome.status, BafoStatus::Requested)).count();
    Ok(CommandResult::success_with_data(
        "bafo",
        format!("requested BAFO from {requested} of {} quotes", outcomes.len()),
        Some(to_data(&outcomes)?),
    ))
}
