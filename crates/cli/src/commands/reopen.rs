use clap::Args;

use procura_core::config::AppConfig;
use procura_core::domain::rfq::RfqId;
use procura_core::service::RequestContext;

use crate::commands::{
    execute, open_service, to_data, CommandFailure, CommandResult, GlobalOptions,
};

#[derive(Debug, Clone, Args)]
pub struct ReopenArgs {
    #[arg(help = "RFQ id")]
    pub rfq_id: String,
    #[arg(long, help = "Why the RFQ goes back to negotiation")]
    pub reason: Option<String>,
}

pub fn run(options: &GlobalOptions, args: ReopenArgs) -> CommandResult {
    let request = options.request();
    execute("reopen", options, |config| reopen(config, args, request))
}

async fn reopen(
    config: AppConfig,
    args: ReopenArgs,
    request: RequestContext,
) -> Result<CommandResult, CommandFailure> {
    let handle = open_service(&config).await?;
    let receipt = handle
        .service
        .reopen(&RfqId(args.rfq_id.clone()), args.reason, &request)
        .await
        .map_err(|error| CommandFailure::service(error, &request))?;
    handle.pool.close().await;

    let message = match &receipt.superseded_award {
        Some(award) => format!(
            "reopened {} for round {}; award {award} superseded",
            receipt.rfq_id, receipt.round
        ),
        None => format!("reopened {} for round {}", receipt.rfq_id, receipt.round),
    };
    Ok(CommandResult::success_with_data("reopen", message, Some(to_data(&receipt)?)))
}
