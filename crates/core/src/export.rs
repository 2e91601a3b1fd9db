//! Flat, spreadsheet-friendly projection of a [`ComparisonResult`].

use std::io::Write;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matrix::MatrixCell;
use crate::normalize::{round_extended_price, NormalizedCell};
use crate::service::ComparisonResult;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("csv write failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("export flush failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One quoted cell. Line items a supplier did not price produce no row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRow {
    pub line_number: u32,
    pub line_item_id: String,
    pub description: String,
    pub quantity: Decimal,
    pub requested_uom: String,
    pub supplier_id: String,
    pub supplier_name: Option<String>,
    pub quote_id: String,
    pub original_unit_price: Decimal,
    pub original_currency: String,
    pub original_uom: String,
    pub normalized_unit_price: Option<Decimal>,
    pub normalized_currency: Option<String>,
    pub extended_price: Option<Decimal>,
    pub lead_time_days: Option<u32>,
    pub classification: Option<String>,
    pub rank: Option<usize>,
    pub compliant: bool,
    pub failure_reason: Option<String>,
}

pub fn export_rows(result: &ComparisonResult) -> Vec<ExportRow> {
    let matrix = &result.matrix;
    let mut rows = Vec::new();

    for (row, item) in matrix.rows.iter().enumerate() {
        for (column, supplier) in matrix.columns.iter().enumerate() {
            let Some(MatrixCell::Quoted(original)) = matrix.cell(row, column) else {
                continue;
            };

            let (normalized_unit_price, normalized_currency, extended_price, failure_reason) =
                match result.normalized.as_ref().and_then(|n| n.cell(row, column)) {
                    Some(NormalizedCell::Normalized { price, .. }) => (
                        Some(price.unit_price),
                        Some(price.currency.clone()),
                        price.extended_price,
                        None,
                    ),
                    Some(NormalizedCell::Failed { failure, .. }) => {
                        (None, None, None, Some(failure.reason.to_string()))
                    }
                    Some(NormalizedCell::Absent) => (None, None, None, None),
                    None => (
                        None,
                        None,
                        original.unit_price.checked_mul(item.quantity).map(round_extended_price),
                        None,
                    ),
                };

            let ranked = result.rankings.cell(row, column);
            rows.push(ExportRow {
                line_number: item.line_number,
                line_item_id: item.id.0.clone(),
                description: item.description.clone(),
                quantity: item.quantity,
                requested_uom: item.unit_of_measure.clone(),
                supplier_id: supplier.supplier_id.0.clone(),
                supplier_name: supplier.supplier_name.clone(),
                quote_id: supplier.quote_id.0.clone(),
                original_unit_price: original.unit_price,
                original_currency: original.currency.clone(),
                original_uom: original.unit_of_measure.clone(),
                normalized_unit_price,
                normalized_currency,
                extended_price,
                lead_time_days: original.lead_time_days,
                classification: ranked
                    .and_then(|cell| cell.class())
                    .map(|class| class.as_str().to_string()),
                rank: ranked.and_then(|cell| cell.rank()),
                compliant: original.is_compliant,
                failure_reason,
            });
        }
    }

    rows
}

pub fn write_csv<W: Write>(rows: &[ExportRow], writer: W) -> Result<(), ExportError> {
    let mut csv = csv::Writer::from_writer(writer);
    for row in rows {
        csv.serialize(row)?;
    }
    csv.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{export_rows, write_csv};
    use crate::convert::rates::StaticRateTable;
    use crate::domain::quote::{
        PricedQuote, QuoteLineItemPrice, QuoteStatus, SupplierId, SupplierQuote, SupplierQuoteId,
    };
    use crate::domain::rfq::{LineItem, LineItemId, Rfq, RfqId, RfqStatus};
    use crate::domain::terms::Incoterm;
    use crate::matrix::{build, MatrixOptions};
    use crate::normalize::{normalize, NormalizationContext, NormalizationSettings};
    use crate::ranking::{rank, RankingConfig};
    use crate::service::ComparisonResult;

    fn rfq() -> Rfq {
        Rfq {
            id: RfqId("RFQ-X".to_string()),
            title: "Export".to_string(),
            buyer_id: "buyer-1".to_string(),
            status: RfqStatus::Evaluation,
            currency: "USD".to_string(),
            round: 1,
            version: 3,
            created_at: Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap(),
        }
    }

    fn line(id: &str, number: u32, quantity: i64) -> LineItem {
        LineItem {
            id: LineItemId(id.to_string()),
            rfq_id: RfqId("RFQ-X".to_string()),
            line_number: number,
            description: format!("part {number}"),
            part_number: None,
            quantity: Decimal::new(quantity, 0),
            unit_of_measure: "each".to_string(),
            target_unit_price: None,
            currency: "USD".to_string(),
            required_certifications: Vec::new(),
        }
    }

    fn quote(id: &str, hour: i64, currency: &str, prices: &[(&str, i64)]) -> PricedQuote {
        PricedQuote {
            quote: SupplierQuote {
                id: SupplierQuoteId(id.to_string()),
                rfq_id: RfqId("RFQ-X".to_string()),
                supplier_id: SupplierId(format!("sup-{id}")),
                supplier_name: Some(format!("Supplier {id}")),
                submitted_at: Utc.with_ymd_and_hms(2026, 2, 2, 8, 0, 0).unwrap()
                    + Duration::hours(hour),
                status: QuoteStatus::Submitted,
                bafo_requested: false,
                total_price: None,
                lead_time_days: Some(14),
                incoterm: Incoterm::Fob,
                revision: 1,
                supersedes: None,
                superseded_by: None,
            },
            prices: prices
                .iter()
                .map(|(line, price)| QuoteLineItemPrice {
                    quote_id: SupplierQuoteId(id.to_string()),
                    line_item_id: LineItemId(line.to_string()),
                    unit_price: Decimal::new(*price, 0),
                    currency: currency.to_string(),
                    quantity_offered: None,
                    unit_of_measure: "each".to_string(),
                    lead_time_days: Some(10),
                    moq: None,
                    is_compliant: true,
                    notes: None,
                    exceptions: Vec::new(),
                })
                .collect(),
        }
    }

    fn comparison(normalized: bool) -> ComparisonResult {
        let lines = vec![line("L1", 1, 10), line("L2", 2, 5)];
        let quotes = vec![
            quote("A", 0, "USD", &[("L1", 10), ("L2", 20)]),
            quote("B", 1, "XYZ", &[("L1", 9)]),
        ];
        let matrix = build(&rfq(), &lines, &quotes, MatrixOptions::default());
        if normalized {
            let settings = NormalizationSettings::default();
            let rates = StaticRateTable::standard();
            let normalized = normalize(
                &matrix,
                NormalizationContext { settings: &settings, rates: &rates },
            );
            let rankings = rank(&normalized, &RankingConfig::default());
            ComparisonResult {
                rfq: rfq(),
                matrix,
                normalized: Some(normalized),
                rankings,
                warnings: Vec::new(),
            }
        } else {
            let rankings = rank(&matrix, &RankingConfig::default());
            ComparisonResult {
                rfq: rfq(),
                matrix,
                normalized: None,
                rankings,
                warnings: Vec::new(),
            }
        }
    }

    #[test]
    fn unpriced_cells_produce_no_rows() {
        let rows = export_rows(&comparison(false));

        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| !(row.quote_id == "B" && row.line_item_id == "L2")));
        let b_l1 = rows
            .iter()
            .find(|row| row.quote_id == "B" && row.line_item_id == "L1")
            .expect("B priced L1");
        assert_eq!(b_l1.extended_price, Some(Decimal::new(90, 0)));
        assert_eq!(b_l1.classification.as_deref(), Some("best"));
        assert_eq!(b_l1.rank, Some(1));
    }

    #[test]
    fn failed_normalization_keeps_original_and_reason() {
        let rows = export_rows(&comparison(true));

        let failed = rows
            .iter()
            .find(|row| row.quote_id == "B")
            .expect("B row present");
        assert_eq!(failed.original_unit_price, Decimal::new(9, 0));
        assert_eq!(failed.original_currency, "XYZ");
        assert_eq!(failed.normalized_unit_price, None);
        assert!(failed.failure_reason.is_some());

        let converted = rows
            .iter()
            .find(|row| row.quote_id == "A" && row.line_item_id == "L2")
            .expect("A priced L2");
        assert_eq!(converted.normalized_currency.as_deref(), Some("USD"));
        assert_eq!(converted.extended_price, Some(Decimal::new(100, 0)));
    }

    #[test]
    fn csv_has_header_and_one_line_per_row() {
        let rows = export_rows(&comparison(false));
        let mut buffer = Vec::new();
        write_csv(&rows, &mut buffer).expect("csv export");

        let text = String::from_utf8(buffer).expect("utf8");
        let mut lines = text.lines();
        let header = lines.next().expect("header");
        assert!(header.starts_with("line_number,line_item_id,description"));
        assert!(header.contains("failure_reason"));
        assert_eq!(lines.count(), rows.len());
    }
}
