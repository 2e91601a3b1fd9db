//! Per-line-item and per-supplier aggregates, cell classification and best-value selection.
//!
//! Works over raw or normalized matrices through [`PriceGrid`]. Absent and failed cells are
//! excluded from every aggregate.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::quote::{SupplierId, SupplierQuoteId};
use crate::domain::rfq::{LineItem, LineItemId};
use crate::matrix::{ComparisonMatrix, MatrixColumn};
use crate::normalize::{round_unit_price, NormalizedMatrix};

pub const DEFAULT_NEAR_BEST_PCT: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingConfig {
    /// A price within this percentage of the lowest one is near-best.
    pub near_best_pct: Decimal,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self { near_best_pct: Decimal::from(DEFAULT_NEAR_BEST_PCT) }
    }
}

/// A rankable price for one cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridPrice {
    pub unit_price: Decimal,
    /// Unit price at the requested quantity; `None` when the quantity has no known conversion.
    pub extended_price: Option<Decimal>,
    pub lead_time_days: Option<u32>,
    pub is_compliant: bool,
}

/// Read access to a matrix of comparable prices.
pub trait PriceGrid {
    fn line_items(&self) -> &[LineItem];
    fn columns(&self) -> &[MatrixColumn];
    fn price_at(&self, row: usize, column: usize) -> Option<GridPrice>;
}

impl PriceGrid for ComparisonMatrix {
    fn line_items(&self) -> &[LineItem] {
        &self.rows
    }

    fn columns(&self) -> &[MatrixColumn] {
        &self.columns
    }

    fn price_at(&self, row: usize, column: usize) -> Option<GridPrice> {
        let price = self.cell(row, column)?.price()?;
        let quantity = self.rows.get(row)?.quantity;
        Some(GridPrice {
            unit_price: price.unit_price,
            extended_price: price.unit_price.checked_mul(quantity),
            lead_time_days: price.lead_time_days,
            is_compliant: price.is_compliant,
        })
    }
}

impl PriceGrid for NormalizedMatrix {
    fn line_items(&self) -> &[LineItem] {
        &self.matrix.rows
    }

    fn columns(&self) -> &[MatrixColumn] {
        &self.matrix.columns
    }

    fn price_at(&self, row: usize, column: usize) -> Option<GridPrice> {
        let cell = self.cell(row, column)?;
        let normalized = cell.normalized()?;
        let original = cell.original()?;
        Some(GridPrice {
            unit_price: normalized.unit_price,
            extended_price: normalized.extended_price,
            lead_time_days: original.lead_time_days,
            is_compliant: original.is_compliant,
        })
    }
}

/// Closed set of highlight classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellClass {
    Best,
    NearBest,
    Worst,
    Neutral,
}

impl CellClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Best => "best",
            Self::NearBest => "near_best",
            Self::Worst => "worst",
            Self::Neutral => "neutral",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RankedCell {
    Unpriced,
    Priced {
        unit_price: Decimal,
        class: CellClass,
        /// 1-based position within the line item; equal prices are split by submission time.
        rank: usize,
        lead_time_score: Option<u8>,
    },
}

impl RankedCell {
    pub fn class(&self) -> Option<CellClass> {
        match self {
            Self::Priced { class, .. } => Some(*class),
            Self::Unpriced => None,
        }
    }

    pub fn rank(&self) -> Option<usize> {
        match self {
            Self::Priced { rank, .. } => Some(*rank),
            Self::Unpriced => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemSummary {
    pub line_item_id: LineItemId,
    pub lowest: Option<Decimal>,
    pub highest: Option<Decimal>,
    pub average: Option<Decimal>,
    pub fastest_lead_time_days: Option<u32>,
    pub fastest_quote: Option<SupplierQuoteId>,
    pub quote_count: usize,
    pub distinct_prices: usize,
    /// `(highest - lowest) / highest * 100`, one decimal place.
    pub savings_potential_pct: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierSummary {
    pub quote_id: SupplierQuoteId,
    pub supplier_id: SupplierId,
    pub submitted_at: DateTime<Utc>,
    /// Sum of extended prices over priced line items only.
    pub total: Decimal,
    pub priced_line_items: usize,
    pub missing_line_items: usize,
    /// Priced lines left out of `total` because the requested quantity has no conversion.
    pub excluded_line_items: usize,
    pub best_count: usize,
    pub noncompliant_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedMatrix {
    pub column_count: usize,
    /// Row-major, aligned with the ranked matrix.
    pub cells: Vec<RankedCell>,
    pub line_items: Vec<LineItemSummary>,
    pub suppliers: Vec<SupplierSummary>,
    pub best_value: Option<SupplierQuoteId>,
}

impl RankedMatrix {
    pub fn cell(&self, row: usize, column: usize) -> Option<&RankedCell> {
        if column >= self.column_count || row >= self.line_items.len() {
            return None;
        }
        self.cells.get(row * self.column_count + column)
    }

    pub fn supplier(&self, quote_id: &SupplierQuoteId) -> Option<&SupplierSummary> {
        self.suppliers.iter().find(|summary| &summary.quote_id == quote_id)
    }
}

/// 0-100 delivery score from quoted lead time.
pub fn lead_time_score(days: u32) -> u8 {
    match days {
        0..=7 => 100,
        8..=14 => 85,
        15..=30 => 70,
        31..=60 => 50,
        61..=90 => 30,
        _ => 10,
    }
}

pub fn rank<G>(grid: &G, config: &RankingConfig) -> RankedMatrix
where
    G: PriceGrid + ?Sized,
{
    let rows = grid.line_items();
    let columns = grid.columns();
    let width = columns.len();

    let mut cells = vec![RankedCell::Unpriced; rows.len() * width];
    let mut line_items = Vec::with_capacity(rows.len());
    let mut suppliers: Vec<SupplierSummary> = columns
        .iter()
        .map(|column| SupplierSummary {
            quote_id: column.quote_id.clone(),
            supplier_id: column.supplier_id.clone(),
            submitted_at: column.submitted_at,
            total: Decimal::ZERO,
            priced_line_items: 0,
            missing_line_items: 0,
            excluded_line_items: 0,
            best_count: 0,
            noncompliant_count: 0,
        })
        .collect();

    let near_best_factor = Decimal::ONE + config.near_best_pct / Decimal::ONE_HUNDRED;

    for (row, line_item) in rows.iter().enumerate() {
        let mut priced: Vec<(usize, GridPrice)> = (0..width)
            .filter_map(|column| grid.price_at(row, column).map(|price| (column, price)))
            .collect();

        for (column, summary) in suppliers.iter_mut().enumerate() {
            if !priced.iter().any(|(priced_column, _)| *priced_column == column) {
                summary.missing_line_items += 1;
            }
        }

        priced.sort_by(|(left_column, left), (right_column, right)| {
            left.unit_price
                .cmp(&right.unit_price)
                .then_with(|| submission_order(&columns[*left_column], &columns[*right_column]))
        });

        let lowest = priced.first().map(|(_, price)| price.unit_price);
        let highest = priced.last().map(|(_, price)| price.unit_price);
        let mut distinct: Vec<Decimal> = priced.iter().map(|(_, price)| price.unit_price).collect();
        distinct.dedup();

        for (position, (column, price)) in priced.iter().enumerate() {
            let class = classify(
                price.unit_price,
                lowest,
                highest,
                priced.len(),
                distinct.len(),
                near_best_factor,
            );
            cells[row * width + column] = RankedCell::Priced {
                unit_price: price.unit_price,
                class,
                rank: position + 1,
                lead_time_score: price.lead_time_days.map(lead_time_score),
            };

            let summary = &mut suppliers[*column];
            match price.extended_price {
                Some(extended) => {
                    summary.priced_line_items += 1;
                    summary.total += extended;
                }
                None => summary.excluded_line_items += 1,
            }
            if class == CellClass::Best {
                summary.best_count += 1;
            }
            if !price.is_compliant {
                summary.noncompliant_count += 1;
            }
        }

        let fastest = priced
            .iter()
            .filter_map(|(column, price)| price.lead_time_days.map(|days| (*column, days)))
            .min_by(|(left_column, left_days), (right_column, right_days)| {
                left_days
                    .cmp(right_days)
                    .then_with(|| submission_order(&columns[*left_column], &columns[*right_column]))
            });

        line_items.push(LineItemSummary {
            line_item_id: line_item.id.clone(),
            lowest,
            highest,
            average: average(priced.iter().map(|(_, price)| price.unit_price)),
            fastest_lead_time_days: fastest.map(|(_, days)| days),
            fastest_quote: fastest.map(|(column, _)| columns[column].quote_id.clone()),
            quote_count: priced.len(),
            distinct_prices: distinct.len(),
            savings_potential_pct: savings_potential(lowest, highest, priced.len()),
        });
    }

    let best_value = suppliers
        .iter()
        .filter(|summary| summary.priced_line_items > 0)
        .min_by(|left, right| {
            left.total
                .cmp(&right.total)
                .then_with(|| left.submitted_at.cmp(&right.submitted_at))
                .then_with(|| left.quote_id.cmp(&right.quote_id))
        })
        .map(|summary| summary.quote_id.clone());

    RankedMatrix { column_count: width, cells, line_items, suppliers, best_value }
}

/// `Best` wins over `NearBest`, which wins over `Worst`. A sole price is always `Neutral`.
fn classify(
    price: Decimal,
    lowest: Option<Decimal>,
    highest: Option<Decimal>,
    priced: usize,
    distinct: usize,
    near_best_factor: Decimal,
) -> CellClass {
    let (Some(lowest), Some(highest)) = (lowest, highest) else {
        return CellClass::Neutral;
    };
    if priced < 2 {
        return CellClass::Neutral;
    }
    if price == lowest {
        CellClass::Best
    } else if price <= lowest * near_best_factor {
        CellClass::NearBest
    } else if price == highest && distinct > 1 {
        CellClass::Worst
    } else {
        CellClass::Neutral
    }
}

fn submission_order(left: &MatrixColumn, right: &MatrixColumn) -> Ordering {
    left.submitted_at.cmp(&right.submitted_at).then_with(|| left.quote_id.cmp(&right.quote_id))
}

fn average(prices: impl Iterator<Item = Decimal>) -> Option<Decimal> {
    let (sum, count) =
        prices.fold((Decimal::ZERO, 0u32), |(sum, count), price| (sum + price, count + 1));
    (count > 0).then(|| round_unit_price(sum / Decimal::from(count)))
}

fn savings_potential(
    lowest: Option<Decimal>,
    highest: Option<Decimal>,
    priced: usize,
) -> Option<Decimal> {
    let (lowest, highest) = (lowest?, highest?);
    if priced < 2 || highest <= Decimal::ZERO {
        return None;
    }
    let pct = (highest - lowest) / highest * Decimal::ONE_HUNDRED;
    Some(pct.round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{lead_time_score, rank, CellClass, RankedCell, RankingConfig};
    use crate::domain::quote::{
        PricedQuote, QuoteLineItemPrice, QuoteStatus, SupplierId, SupplierQuote, SupplierQuoteId,
    };
    use crate::domain::rfq::{LineItem, LineItemId, Rfq, RfqId, RfqStatus};
    use crate::domain::terms::Incoterm;
    use crate::matrix::{build, ComparisonMatrix, MatrixOptions};

    fn line(id: &str, number: u32, quantity: i64) -> LineItem {
        LineItem {
            id: LineItemId(id.to_string()),
            rfq_id: RfqId("RFQ-1".to_string()),
            line_number: number,
            description: id.to_string(),
            part_number: None,
            quantity: Decimal::new(quantity, 0),
            unit_of_measure: "each".to_string(),
            target_unit_price: None,
            currency: "USD".to_string(),
            required_certifications: Vec::new(),
        }
    }

    fn quote(id: &str, hour: u32, prices: &[(&str, Decimal, Option<u32>)]) -> PricedQuote {
        PricedQuote {
            quote: SupplierQuote {
                id: SupplierQuoteId(id.to_string()),
                rfq_id: RfqId("RFQ-1".to_string()),
                supplier_id: SupplierId(id.to_string()),
                supplier_name: None,
                submitted_at: Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap(),
                status: QuoteStatus::Submitted,
                bafo_requested: false,
                total_price: None,
                lead_time_days: None,
                incoterm: Incoterm::Fob,
                revision: 1,
                supersedes: None,
                superseded_by: None,
            },
            prices: prices
                .iter()
                .map(|(line, unit_price, lead_time_days)| QuoteLineItemPrice {
                    quote_id: SupplierQuoteId(id.to_string()),
                    line_item_id: LineItemId(line.to_string()),
                    unit_price: *unit_price,
                    currency: "USD".to_string(),
                    quantity_offered: None,
                    unit_of_measure: "each".to_string(),
                    lead_time_days: *lead_time_days,
                    moq: None,
                    is_compliant: true,
                    notes: None,
                    exceptions: Vec::new(),
                })
                .collect(),
        }
    }

    fn matrix(lines: Vec<LineItem>, quotes: Vec<PricedQuote>) -> ComparisonMatrix {
        let rfq = Rfq {
            id: RfqId("RFQ-1".to_string()),
            title: "Brackets".to_string(),
            buyer_id: "buyer".to_string(),
            status: RfqStatus::Evaluation,
            currency: "USD".to_string(),
            round: 1,
            version: 1,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        };
        build(&rfq, &lines, &quotes, MatrixOptions::default())
    }

    fn usd(units: i64) -> Decimal {
        Decimal::new(units, 0)
    }

    fn three_supplier_scenario() -> ComparisonMatrix {
        matrix(
            vec![line("Item1", 1, 10), line("Item2", 2, 5)],
            vec![
                quote("S1", 1, &[("Item1", usd(10), Some(14)), ("Item2", usd(20), Some(21))]),
                quote("S2", 2, &[("Item1", usd(9), Some(30))]),
                quote("S3", 3, &[("Item1", usd(11), Some(7)), ("Item2", usd(19), Some(45))]),
            ],
        )
    }

    #[test]
    fn three_supplier_scenario_classifies_cells() {
        let ranked = rank(&three_supplier_scenario(), &RankingConfig::default());

        let classes: Vec<Option<CellClass>> = ranked.cells.iter().map(RankedCell::class).collect();
        assert_eq!(
            classes,
            vec![
                Some(CellClass::Neutral),
                Some(CellClass::Best),
                Some(CellClass::Worst),
                Some(CellClass::Worst),
                None,
                Some(CellClass::Best),
            ]
        );
        assert_eq!(ranked.line_items[0].lowest, Some(usd(9)));
        assert_eq!(ranked.line_items[0].highest, Some(usd(11)));
        assert_eq!(ranked.line_items[1].lowest, Some(usd(19)));
    }

    #[test]
    fn supplier_totals_cover_priced_items_only() {
        let ranked = rank(&three_supplier_scenario(), &RankingConfig::default());

        let totals: Vec<Decimal> = ranked.suppliers.iter().map(|summary| summary.total).collect();
        assert_eq!(totals, vec![usd(200), usd(90), usd(205)]);
        assert_eq!(ranked.suppliers[1].priced_line_items, 1);
        assert_eq!(ranked.suppliers[1].missing_line_items, 1);
        assert_eq!(ranked.best_value, Some(SupplierQuoteId("S2".to_string())));
    }

    #[test]
    fn partial_quote_totals_cover_only_its_priced_lines() {
        let lines = (1..=5).map(|number| line(&format!("L{number}"), number, 1)).collect();
        let full = quote(
            "S1",
            1,
            &[
                ("L1", usd(10), None),
                ("L2", usd(20), None),
                ("L3", usd(30), None),
                ("L4", usd(40), None),
                ("L5", usd(50), None),
            ],
        );
        let partial = quote("S2", 2, &[("L1", usd(8), None), ("L3", usd(35), None)]);
        let ranked = rank(&matrix(lines, vec![full, partial]), &RankingConfig::default());

        let classes: Vec<Option<CellClass>> = ranked.cells.iter().map(RankedCell::class).collect();
        assert_eq!(
            classes,
            vec![
                Some(CellClass::Worst),
                Some(CellClass::Best),
                Some(CellClass::Neutral),
                None,
                Some(CellClass::Best),
                Some(CellClass::Worst),
                Some(CellClass::Neutral),
                None,
                Some(CellClass::Neutral),
                None,
            ]
        );

        let full = &ranked.suppliers[0];
        assert_eq!((full.total, full.priced_line_items, full.missing_line_items), (usd(150), 5, 0));
        assert_eq!(full.best_count, 1);
        let partial = &ranked.suppliers[1];
        assert_eq!((partial.total, partial.priced_line_items), (usd(43), 2));
        assert_eq!(partial.missing_line_items, 3);
        assert_eq!(partial.excluded_line_items, 0);
        assert_eq!(partial.best_count, 1);
        assert_eq!(ranked.line_items[1].quote_count, 1);
        assert_eq!(ranked.best_value, Some(SupplierQuoteId("S2".to_string())));
    }

    #[test]
    fn unpriced_line_items_have_no_range() {
        let ranked = rank(
            &matrix(vec![line("L1", 1, 1)], vec![quote("S1", 1, &[])]),
            &RankingConfig::default(),
        );

        assert_eq!(ranked.line_items[0].lowest, None);
        assert_eq!(ranked.line_items[0].highest, None);
        assert_eq!(ranked.line_items[0].average, None);
        assert_eq!(ranked.best_value, None);
        assert_eq!(ranked.cell(0, 0), Some(&RankedCell::Unpriced));
    }

    #[test]
    fn sole_quote_is_neutral() {
        let ranked = rank(
            &matrix(vec![line("L1", 1, 1)], vec![quote("S1", 1, &[("L1", usd(4), None)])]),
            &RankingConfig::default(),
        );

        assert_eq!(ranked.cell(0, 0).and_then(RankedCell::class), Some(CellClass::Neutral));
        assert_eq!(ranked.line_items[0].savings_potential_pct, None);
    }

    #[test]
    fn ties_at_the_minimum_are_all_best_and_never_worst() {
        let ranked = rank(
            &matrix(
                vec![line("L1", 1, 1)],
                vec![
                    quote("S1", 2, &[("L1", usd(5), None)]),
                    quote("S2", 1, &[("L1", usd(5), None)]),
                ],
            ),
            &RankingConfig::default(),
        );

        assert!(ranked.cells.iter().all(|cell| cell.class() == Some(CellClass::Best)));
        // earlier submission takes rank 1 on a price tie
        assert_eq!(ranked.cell(0, 0).and_then(RankedCell::rank), Some(1));
        assert_eq!(ranked.cell(0, 1).and_then(RankedCell::rank), Some(2));
    }

    #[test]
    fn near_best_respects_configured_threshold() {
        let grid = matrix(
            vec![line("L1", 1, 1)],
            vec![
                quote("S1", 1, &[("L1", usd(100), None)]),
                quote("S2", 2, &[("L1", usd(105), None)]),
                quote("S3", 3, &[("L1", usd(120), None)]),
            ],
        );

        let default = rank(&grid, &RankingConfig::default());
        assert_eq!(default.cell(0, 1).and_then(RankedCell::class), Some(CellClass::NearBest));

        let strict = rank(&grid, &RankingConfig { near_best_pct: Decimal::ONE });
        assert_eq!(strict.cell(0, 1).and_then(RankedCell::class), Some(CellClass::Neutral));
        assert_eq!(strict.cell(0, 2).and_then(RankedCell::class), Some(CellClass::Worst));
        assert_eq!(default.line_items[0].savings_potential_pct, Some(Decimal::new(167, 1)));
    }

    #[test]
    fn zero_price_is_a_real_price() {
        let ranked = rank(
            &matrix(
                vec![line("L1", 1, 3)],
                vec![
                    quote("S1", 1, &[("L1", usd(0), None)]),
                    quote("S2", 2, &[("L1", usd(2), None)]),
                ],
            ),
            &RankingConfig::default(),
        );

        assert_eq!(ranked.line_items[0].lowest, Some(Decimal::ZERO));
        assert_eq!(ranked.best_value, Some(SupplierQuoteId("S1".to_string())));
    }

    #[test]
    fn equal_totals_prefer_earliest_submission() {
        let ranked = rank(
            &matrix(
                vec![line("L1", 1, 1)],
                vec![
                    quote("S1", 5, &[("L1", usd(7), None)]),
                    quote("S2", 4, &[("L1", usd(7), None)]),
                ],
            ),
            &RankingConfig::default(),
        );

        assert_eq!(ranked.best_value, Some(SupplierQuoteId("S2".to_string())));
    }

    #[test]
    fn fastest_lead_time_is_reported_per_line_item() {
        let ranked = rank(&three_supplier_scenario(), &RankingConfig::default());

        assert_eq!(ranked.line_items[0].fastest_lead_time_days, Some(7));
        assert_eq!(ranked.line_items[0].fastest_quote, Some(SupplierQuoteId("S3".to_string())));
        assert_eq!(
            ranked.cell(0, 2),
            Some(&RankedCell::Priced {
                unit_price: usd(11),
                class: CellClass::Worst,
                rank: 3,
                lead_time_score: Some(100),
            })
        );
    }

    #[test]
    fn ranking_is_deterministic() {
        let grid = three_supplier_scenario();
        assert_eq!(rank(&grid, &RankingConfig::default()), rank(&grid, &RankingConfig::default()));
    }

    #[test]
    fn lead_time_buckets() {
        assert_eq!(lead_time_score(7), 100);
        assert_eq!(lead_time_score(14), 85);
        assert_eq!(lead_time_score(30), 70);
        assert_eq!(lead_time_score(60), 50);
        assert_eq!(lead_time_score(90), 30);
        assert_eq!(lead_time_score(91), 10);
    }
}
