use clap::Args;

use procura_core::config::AppConfig;
use procura_core::domain::rfq::RfqId;
use procura_core::service::RequestContext;

use crate::commands::{
    execute, open_service, to_data, CommandFailure, CommandResult, GlobalOptions,
};

#[derive(Debug, Clone, Args)]
pub struct CloseArgs {
    #[arg(help = "RFQ id")]
    pub rfq_id: String,
    #[arg(long, help = "Reason sent to suppliers with the closure notice")]
    pub reason: Option<String>,
}

pub fn run(options: &GlobalOptions, args: CloseArgs) -> CommandResult {
    let request = options.request();
    execute("close", options, |config| close(config, args, request))
}

async fn close(
    config: AppConfig,
    args: CloseArgs,
    request: RequestContext,
) -> Result<CommandResult, CommandFailure> {
    let handle = open_service(&config).await?;
    let receipt = handle
        .service
        .close(&RfqId(args.rfq_id.clone()), args.reason, &request)
        .await
        .map_err(|error| CommandFailure::service(error, &request))?;
    handle.pool.close().await;

    Ok(CommandResult::success_with_data(
        "close",
        format!("closed {}; {} suppliers notified", receipt.rfq_id, receipt.notifications.len()),
        Some(to_data(&receipt)?),
    ))
}
