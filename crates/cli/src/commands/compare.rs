use clap::Args;
use rust_decimal::Decimal;
use serde::Serialize;

use procura_core::config::AppConfig;
use procura_core::domain::rfq::RfqId;
use procura_core::domain::terms::Incoterm;
use procura_core::normalize::UomTarget;
use procura_core::ranking::RankedCell;
use procura_core::service::{ComparisonOptions, ComparisonResult, RequestContext};

use crate::commands::{
    execute, open_service, to_data, CommandFailure, CommandResult, GlobalOptions,
};

#[derive(Debug, Clone, Default, Args)]
pub struct ComparisonArgs {
    #[arg(help = "RFQ id to compare")]
    pub rfq_id: String,
    #[arg(long, help = "Normalize prices to a common currency, Incoterm and unit first")]
    pub normalize: bool,
    #[arg(long, help = "Target currency for normalization (defaults to config)")]
    pub currency: Option<String>,
    #[arg(long, help = "Target Incoterm for normalization (defaults to config)")]
    pub incoterm: Option<String>,
    #[arg(long, help = "Target unit, or `line_item` for each row's requested unit")]
    pub uom: Option<String>,
    #[arg(long, help = "Include superseded revisions as separate columns")]
    pub include_historical: bool,
}

impl ComparisonArgs {
    pub(crate) fn options(&self, config: &AppConfig) -> Result<ComparisonOptions, CommandFailure> {
        let normalization = if self.normalize
            || self.currency.is_some()
            || self.incoterm.is_some()
            || self.uom.is_some()
        {
            let mut settings = config.comparison.normalization();
            if let Some(currency) = &self.currency {
                settings.target_currency = currency.trim().to_ascii_uppercase();
            }
            if let Some(incoterm) = &self.incoterm {
                settings.target_incoterm =
                    incoterm.parse::<Incoterm>().map_err(CommandFailure::invalid_argument)?;
            }
            if let Some(uom) = &self.uom {
                settings.uom_target =
                    uom.parse::<UomTarget>().map_err(CommandFailure::invalid_argument)?;
            }
            Some(settings)
        } else {
            None
        };

        Ok(ComparisonOptions {
            include_historical: self.include_historical,
            normalization,
            mark_reviewed: false,
        })
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct CompareArgs {
    #[command(flatten)]
    pub comparison: ComparisonArgs,
    #[arg(long, help = "Move the RFQ and its submitted quotes into evaluation")]
    pub mark_reviewed: bool,
}

pub fn run(options: &GlobalOptions, args: CompareArgs) -> CommandResult {
    let request = options.request();
    execute("compare", options, |config| compare(config, args, request))
}

async fn compare(
    config: AppConfig,
    args: CompareArgs,
    request: RequestContext,
) -> Result<CommandResult, CommandFailure> {
    let mut comparison_options = args.comparison.options(&config)?;
    comparison_options.mark_reviewed = args.mark_reviewed;

    let handle = open_service(&config).await?;
    let rfq_id = RfqId(args.comparison.rfq_id.clone());
    let result = handle
        .service
        .build_comparison(&rfq_id, &comparison_options, &request)
        .await
        .map_err(|error| CommandFailure::service(error, &request))?;
    handle.pool.close().await;

    let view = ComparisonView::from_result(&result);
    let message = match &view.best_value {
        Some(best) => format!(
            "compared {} line items across {} quotes; best value {best}",
            view.line_items.len(),
            view.suppliers.len()
        ),
        None => format!(
            "compared {} line items across {} quotes; no priced quotes",
            view.line_items.len(),
            view.suppliers.len()
        ),
    };
    Ok(CommandResult::success_with_data("compare", message, Some(to_data(&view)?)))
}

#[derive(Debug, Serialize)]
struct ComparisonView {
    rfq_id: String,
    status: String,
    currency: String,
    best_value: Option<String>,
    suppliers: Vec<SupplierView>,
    line_items: Vec<LineItemView>,
    warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SupplierView {
    quote_id: String,
    supplier_id: String,
    supplier_name: Option<String>,
    total: Decimal,
    priced_line_items: usize,
    missing_line_items: usize,
    excluded_line_items: usize,
    best_count: usize,
    noncompliant_count: usize,
}

#[derive(Debug, Serialize)]
struct LineItemView {
    line_number: u32,
    line_item_id: String,
    description: String,
    quantity: Decimal,
    lowest: Option<Decimal>,
    highest: Option<Decimal>,
    savings_potential_pct: Option<Decimal>,
    cells: Vec<CellView>,
}

#[derive(Debug, Serialize)]
struct CellView {
    quote_id: String,
    unit_price: Decimal,
    class: &'static str,
    rank: usize,
}

impl ComparisonView {
    fn from_result(result: &ComparisonResult) -> Self {
        let matrix = &result.matrix;
        let rankings = &result.rankings;

        let suppliers = matrix
            .columns
            .iter()
            .filter_map(|column| {
                let summary = rankings.supplier(&column.quote_id)?;
                Some(SupplierView {
                    quote_id: column.quote_id.0.clone(),
                    supplier_id: column.supplier_id.0.clone(),
                    supplier_name: column.supplier_name.clone(),
                    total: summary.total,
                    priced_line_items: summary.priced_line_items,
                    missing_line_items: summary.missing_line_items,
                    excluded_line_items: summary.excluded_line_items,
                    best_count: summary.best_count,
                    noncompliant_count: summary.noncompliant_count,
                })
            })
            .collect();

        let line_items = matrix
            .rows
            .iter()
            .enumerate()
            .map(|(row, item)| {
                let summary =
                    rankings.line_items.iter().find(|summary| summary.line_item_id == item.id);
                let cells = matrix
                    .columns
                    .iter()
                    .enumerate()
                    .filter_map(|(column, supplier)| match rankings.cell(row, column)? {
                        RankedCell::Priced { unit_price, class, rank, .. } => Some(CellView {
                            quote_id: supplier.quote_id.0.clone(),
                            unit_price: *unit_price,
                            class: class.as_str(),
                            rank: *rank,
                        }),
                        RankedCell::Unpriced => None,
                    })
                    .collect();
                LineItemView {
                    line_number: item.line_number,
                    line_item_id: item.id.0.clone(),
                    description: item.description.clone(),
                    quantity: item.quantity,
                    lowest: summary.and_then(|summary| summary.lowest),
                    highest: summary.and_then(|summary| summary.highest),
                    savings_potential_pct: summary.and_then(|s| s.savings_potential_pct),
                    cells,
                }
            })
            .collect();

        Self {
            rfq_id: result.rfq.id.0.clone(),
            status: result.rfq.status.as_str().to_string(),
            currency: result.currency().unwrap_or(result.rfq.currency.as_str()).to_string(),
            best_value: rankings.best_value.as_ref().map(|quote_id| quote_id.0.clone()),
            suppliers,
            line_items,
            warnings: result.warnings.iter().map(ToString::to_string).collect(),
        }
    }
}
