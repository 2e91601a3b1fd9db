use std::str::FromStr;

use clap::Args;
use rust_decimal::Decimal;

use procura_core::config::AppConfig;
use procura_core::domain::quote::{QuoteLineItemPrice, SupplierQuoteId};
use procura_core::domain::rfq::{LineItem, LineItemId, RfqId};
use procura_core::domain::terms::Incoterm;
use procura_core::ports::RfqRepository;
use procura_core::service::{RequestContext, RevisedQuote};

use crate::commands::{
    execute, open_service, to_data, CommandFailure, CommandResult, GlobalOptions,
};

#[derive(Debug, Clone, Args)]
pub struct ReviseArgs {
    #[arg(help = "RFQ id")]
    pub rfq_id: String,
    #[arg(long, help = "Quote being revised")]
    pub quote: String,
    #[arg(
        long = "price",
        required = true,
        value_name = "LINE=PRICE[:CURRENCY[:UOM]]",
        help = "Revised unit price for one line item; currency and unit default to the line's"
    )]
    pub prices: Vec<String>,
    #[arg(long, help = "Quoted total")]
    pub total: Option<Decimal>,
    #[arg(long, help = "Lead time in days")]
    pub lead_time: Option<u32>,
    #[arg(long, help = "Incoterm of the revised offer")]
    pub incoterm: Option<String>,
}

/// One `--price` argument before line-item defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PriceSpec {
    line_item_id: String,
    unit_price: Decimal,
    currency: Option<String>,
    unit_of_measure: Option<String>,
}

impl FromStr for PriceSpec {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (line, rest) = raw
            .split_once('=')
            .ok_or_else(|| format!("price `{raw}` must look like LINE=PRICE[:CURRENCY[:UOM]]"))?;
        let line = line.trim();
        if line.is_empty() {
            return Err(format!("price `{raw}` names no line item"));
        }

        let mut parts = rest.split(':').map(str::trim);
        let amount = parts.next().unwrap_or_default();
        let unit_price = Decimal::from_str(amount)
            .map_err(|error| format!("price `{raw}` has an invalid amount: {error}"))?;
        if unit_price.is_sign_negative() {
            return Err(format!("price `{raw}` is negative"));
        }
        let currency =
            parts.next().filter(|part| !part.is_empty()).map(|part| part.to_ascii_uppercase());
        let unit_of_measure = parts.next().filter(|part| !part.is_empty()).map(str::to_string);
        if parts.next().is_some() {
            return Err(format!("price `{raw}` has too many `:` separated fields"));
        }

        Ok(Self { line_item_id: line.to_string(), unit_price, currency, unit_of_measure })
    }
}

impl PriceSpec {
    fn into_price(self, line_items: &[LineItem]) -> Result<QuoteLineItemPrice, String> {
        let line_item_id = LineItemId(self.line_item_id);
        let item = line_items
            .iter()
            .find(|item| item.id == line_item_id)
            .ok_or_else(|| format!("line item `{line_item_id}` is not part of this RFQ"))?;
        Ok(QuoteLineItemPrice {
            // The engine stamps the new quote id.
            quote_id: SupplierQuoteId(String::new()),
            line_item_id,
            unit_price: self.unit_price,
            currency: self.currency.unwrap_or_else(|| item.currency.clone()),
            quantity_offered: None,
            unit_of_measure: self.unit_of_measure.unwrap_or_else(|| item.unit_of_measure.clone()),
            lead_time_days: None,
            moq: None,
            is_compliant: true,
            notes: None,
            exceptions: Vec::new(),
        })
    }
}

pub fn run(options: &GlobalOptions, args: ReviseArgs) -> CommandResult {
    let request = options.request();
    execute("revise", options, |config| revise(config, args, request))
}

async fn revise(
    config: AppConfig,
    args: ReviseArgs,
    request: RequestContext,
) -> Result<CommandResult, CommandFailure> {
    let specs = args
        .prices
        .iter()
        .map(|raw| raw.parse::<PriceSpec>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(CommandFailure::invalid_argument)?;
    let incoterm = args
        .incoterm
        .as_deref()
        .map(str::parse::<Incoterm>)
        .transpose()
        .map_err(CommandFailure::invalid_argument)?;

    let handle = open_service(&config).await?;
    let rfq_id = RfqId(args.rfq_id.clone());
    let line_items = handle
        .store
        .list_line_items(&rfq_id)
        .await
        .map_err(|error| CommandFailure::service(error.into(), &request))?;
    let prices = specs
        .into_iter()
        .map(|spec| spec.into_price(&line_items))
        .collect::<Result<Vec<_>, _>>()
        .map_err(CommandFailure::invalid_argument)?;

    let receipt = handle
        .service
        .submit_revised_quote(
            &rfq_id,
            RevisedQuote {
                previous_quote_id: SupplierQuoteId(args.quote.trim().to_string()),
                total_price: args.total,
                lead_time_days: args.lead_time,
                incoterm,
                prices,
            },
            &request,
        )
        .await
        .map_err(|error| CommandFailure::service(error, &request))?;
    handle.pool.close().await;

    Ok(CommandResult::success_with_data(
        "revise",
        format!(
            "recorded revision {} as {} superseding {}",
            receipt.revision, receipt.new_quote_id, receipt.previous_quote_id
        ),
        Some(to_data(&receipt)?),
    ))
}
