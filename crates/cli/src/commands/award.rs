use clap::Args;

use procura_core::config::AppConfig;
use procura_core::domain::quote::SupplierQuoteId;
use procura_core::domain::rfq::RfqId;
use procura_core::service::RequestContext;

use crate::commands::{
    execute, open_service, to_data, CommandFailure, CommandResult, GlobalOptions,
};

#[derive(Debug, Clone, Args)]
pub struct AwardArgs {
    #[arg(help = "RFQ id")]
    pub rfq_id: String,
    #[arg(long, help = "Winning quote id")]
    pub quote: String,
    #[arg(long, help = "Purchase order number to record")]
    pub po: Option<String>,
    #[arg(long, help = "Free-text award notes")]
    pub notes: Option<String>,
}

pub fn run(options: &GlobalOptions, args: AwardArgs) -> CommandResult {
    let request = options.request();
    execute("award", options, |config| award(config, args, request))
}

async fn award(
    config: AppConfig,
    args: AwardArgs,
    request: RequestContext,
) -> Result<CommandResult, CommandFailure> {
    let handle = open_service(&config).await?;
    let receipt = handle
        .service
        .award(
            &RfqId(args.rfq_id.clone()),
            &SupplierQuoteId(args.quote.trim().to_string()),
            args.po,
            args.notes,
            &request,
        )
        .await
        .map_err(|error| CommandFailure::service(error, &request))?;
    handle.pool.close().await;

    let undelivered = receipt.notifications.iter().filter(|n| !n.delivered()).count();
    let mut message = format!(
        "awarded {} to {} ({})",
        receipt.award.rfq_id, receipt.award.supplier_id, receipt.award.quote_id
    );
    if undelivered > 0 {
        message.push_str(&format!("; {undelivered} notifications not delivered"));
    }
    Ok(CommandResult::success_with_data("award", message, Some(to_data(&receipt)?)))
}
