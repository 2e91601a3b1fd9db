//! Normalization of a comparison matrix to one currency, Incoterm and unit of measure.
//!
//! Every quoted cell is converted on its own; a failed cell keeps its original price and carries
//! the reason, so a comparison can always be rendered.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::convert::{
    convert, convert_quantity, ConversionError, ConversionRequest, ConversionWarning,
    IncotermDelta, IncotermPolicy, RateTable,
};
use crate::domain::quote::{QuoteLineItemPrice, SupplierQuoteId};
use crate::domain::rfq::{LineItem, LineItemId};
use crate::domain::terms::{currency_code, unit_code, Incoterm};
use crate::matrix::{ComparisonMatrix, MatrixCell, MatrixColumn};

pub const UNIT_PRICE_SCALE: u32 = 4;
pub const EXTENDED_PRICE_SCALE: u32 = 2;

/// Unit every normalized price is expressed per.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "unit", rename_all = "snake_case")]
pub enum UomTarget {
    /// Each row uses the unit the buyer requested for that line item.
    #[default]
    LineItem,
    Fixed(String),
}

impl UomTarget {
    pub fn resolve<'a>(&'a self, line_item: &'a LineItem) -> &'a str {
        match self {
            Self::LineItem => &line_item.unit_of_measure,
            Self::Fixed(unit) => unit,
        }
    }
}

impl std::str::FromStr for UomTarget {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("uom target must not be empty".to_string());
        }
        if trimmed.eq_ignore_ascii_case("line_item") {
            Ok(Self::LineItem)
        } else {
            Ok(Self::Fixed(unit_code(trimmed)))
        }
    }
}

/// Buyer-chosen normalization targets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationSettings {
    pub target_currency: String,
    pub target_incoterm: Incoterm,
    pub uom_target: UomTarget,
    pub incoterm_policy: IncotermPolicy,
}

impl Default for NormalizationSettings {
    fn default() -> Self {
        Self {
            target_currency: "USD".to_string(),
            target_incoterm: Incoterm::Fob,
            uom_target: UomTarget::LineItem,
            incoterm_policy: IncotermPolicy::Advisory,
        }
    }
}

/// Settings plus the rate table they are applied with.
#[derive(Clone, Copy)]
pub struct NormalizationContext<'a> {
    pub settings: &'a NormalizationSettings,
    pub rates: &'a dyn RateTable,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedPrice {
    pub unit_price: Decimal,
    /// Unit price times the requested quantity (expressed in the target unit).
    pub extended_price: Option<Decimal>,
    pub currency: String,
    pub unit_of_measure: String,
    pub incoterm: Incoterm,
    pub exchange_rate: Decimal,
    pub uom_factor: Decimal,
    pub incoterm_delta: Option<IncotermDelta>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationFailure {
    pub line_item_id: LineItemId,
    pub quote_id: SupplierQuoteId,
    pub row: usize,
    pub column: usize,
    pub reason: ConversionError,
}

impl std::fmt::Display for NormalizationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line item {} of quote {} could not be normalized: {}",
            self.line_item_id, self.quote_id, self.reason
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NormalizedCell {
    Absent,
    Normalized { original: QuoteLineItemPrice, price: NormalizedPrice },
    Failed { original: QuoteLineItemPrice, failure: NormalizationFailure },
}

impl NormalizedCell {
    pub fn normalized(&self) -> Option<&NormalizedPrice> {
        match self {
            Self::Normalized { price, .. } => Some(price),
            Self::Absent | Self::Failed { .. } => None,
        }
    }

    pub fn original(&self) -> Option<&QuoteLineItemPrice> {
        match self {
            Self::Normalized { original, .. } | Self::Failed { original, .. } => Some(original),
            Self::Absent => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizationWarning {
    CellFailed { line_item_id: LineItemId, quote_id: SupplierQuoteId, reason: String },
    IncotermApproximated {
        line_item_id: LineItemId,
        quote_id: SupplierQuoteId,
        from: Incoterm,
        to: Incoterm,
    },
    /// The supplier's minimum order quantity exceeds what the buyer asked for.
    MoqAboveRequested {
        line_item_id: LineItemId,
        quote_id: SupplierQuoteId,
        moq: Decimal,
        requested: Decimal,
    },
    /// The requested quantity could not be expressed in the target unit; no extended price.
    QuantityNotConvertible { line_item_id: LineItemId, reason: String },
}

impl std::fmt::Display for NormalizationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CellFailed { line_item_id, quote_id, reason } => {
                write!(f, "quote {quote_id} line item {line_item_id}: {reason}")
            }
            Self::IncotermApproximated { line_item_id, quote_id, from, to } => write!(
                f,
                "quote {quote_id} line item {line_item_id}: no {from} -> {to} adjustment, \
                 price left unadjusted"
            ),
            Self::MoqAboveRequested { line_item_id, quote_id, moq, requested } => write!(
                f,
                "quote {quote_id} line item {line_item_id}: MOQ {moq} exceeds requested \
                 quantity {requested}"
            ),
            Self::QuantityNotConvertible { line_item_id, reason } => {
                write!(f, "line item {line_item_id}: requested quantity not convertible ({reason})")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMatrix {
    pub matrix: ComparisonMatrix,
    pub settings: NormalizationSettings,
    /// Same row-major layout as `matrix.cells`.
    pub cells: Vec<NormalizedCell>,
    pub failures: Vec<NormalizationFailure>,
    pub warnings: Vec<NormalizationWarning>,
}

impl NormalizedMatrix {
    pub fn cell(&self, row: usize, column: usize) -> Option<&NormalizedCell> {
        if row >= self.matrix.row_count() || column >= self.matrix.column_count() {
            return None;
        }
        self.cells.get(row * self.matrix.column_count() + column)
    }

    /// Projects back onto a plain matrix holding the normalized values. Failed cells keep their
    /// original price.
    pub fn to_matrix(&self) -> ComparisonMatrix {
        let mut matrix = self.matrix.clone();
        for column in &mut matrix.columns {
            column.incoterm = self.settings.target_incoterm;
        }
        matrix.cells = self
            .cells
            .iter()
            .map(|cell| match cell {
                NormalizedCell::Absent => MatrixCell::Absent,
                NormalizedCell::Failed { original, .. } => MatrixCell::Quoted(original.clone()),
                NormalizedCell::Normalized { original, price } => {
                    let mut projected = original.clone();
                    projected.unit_price = price.unit_price;
                    projected.currency = price.currency.clone();
                    projected.unit_of_measure = price.unit_of_measure.clone();
                    MatrixCell::Quoted(projected)
                }
            })
            .collect();
        matrix
    }
}

pub fn round_unit_price(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(UNIT_PRICE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

pub fn round_extended_price(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(EXTENDED_PRICE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Normalizes every quoted cell of `matrix`. Never fails as a whole.
pub fn normalize(matrix: &ComparisonMatrix, context: NormalizationContext<'_>) -> NormalizedMatrix {
    let settings = context.settings;
    let target_currency = currency_code(&settings.target_currency);
    let width = matrix.column_count();

    let mut cells = Vec::with_capacity(matrix.cells.len());
    let mut failures = Vec::new();
    let mut warnings = Vec::new();

    for (row, line_item) in matrix.rows.iter().enumerate() {
        let target_uom = unit_code(settings.uom_target.resolve(line_item));
        let requested = match convert_quantity(
            line_item.quantity,
            &line_item.unit_of_measure,
            &target_uom,
            context.rates,
        ) {
            Ok(quantity) => Some(quantity),
            Err(error) => {
                warnings.push(NormalizationWarning::QuantityNotConvertible {
                    line_item_id: line_item.id.clone(),
                    reason: error.to_string(),
                });
                None
            }
        };

        for (column_index, column) in matrix.columns.iter().enumerate() {
            let Some(MatrixCell::Quoted(original)) = matrix.cells.get(row * width + column_index)
            else {
                cells.push(NormalizedCell::Absent);
                continue;
            };

            if let Some(warning) = moq_warning(line_item, original, context.rates) {
                warnings.push(warning);
            }

            let request = ConversionRequest {
                amount: original.unit_price,
                from_currency: &original.currency,
                to_currency: &target_currency,
                from_incoterm: column.incoterm,
                to_incoterm: settings.target_incoterm,
                from_uom: &original.unit_of_measure,
                to_uom: &target_uom,
                incoterm_policy: settings.incoterm_policy,
            };

            match convert(&request, context.rates) {
                Ok(converted) => {
                    warnings.extend(converted.warnings.iter().map(|warning| match warning {
                        ConversionWarning::IncotermDeltaMissing { from, to } => {
                            NormalizationWarning::IncotermApproximated {
                                line_item_id: line_item.id.clone(),
                                quote_id: column.quote_id.clone(),
                                from: *from,
                                to: *to,
                            }
                        }
                    }));
                    let unit_price = round_unit_price(converted.amount);
                    cells.push(NormalizedCell::Normalized {
                        original: original.clone(),
                        price: NormalizedPrice {
                            unit_price,
                            extended_price: requested
                                .and_then(|quantity| unit_price.checked_mul(quantity))
                                .map(round_extended_price),
                            currency: target_currency.clone(),
                            unit_of_measure: target_uom.clone(),
                            incoterm: settings.target_incoterm,
                            exchange_rate: converted.exchange_rate,
                            uom_factor: converted.uom_factor,
                            incoterm_delta: converted.incoterm_delta,
                        },
                    });
                }
                Err(reason) => {
                    let failure = failure_for(line_item, column, row, column_index, reason);
                    warnings.push(NormalizationWarning::CellFailed {
                        line_item_id: failure.line_item_id.clone(),
                        quote_id: failure.quote_id.clone(),
                        reason: failure.reason.to_string(),
                    });
                    failures.push(failure.clone());
                    cells.push(NormalizedCell::Failed { original: original.clone(), failure });
                }
            }
        }
    }

    NormalizedMatrix {
        matrix: matrix.clone(),
        settings: settings.clone(),
        cells,
        failures,
        warnings,
    }
}

fn failure_for(
    line_item: &LineItem,
    column: &MatrixColumn,
    row: usize,
    column_index: usize,
    reason: ConversionError,
) -> NormalizationFailure {
    NormalizationFailure {
        line_item_id: line_item.id.clone(),
        quote_id: column.quote_id.clone(),
        row,
        column: column_index,
        reason,
    }
}

fn moq_warning(
    line_item: &LineItem,
    price: &QuoteLineItemPrice,
    rates: &dyn RateTable,
) -> Option<NormalizationWarning> {
    let moq = price.moq?;
    let moq_in_line_units =
        convert_quantity(moq, &price.unit_of_measure, &line_item.unit_of_measure, rates).ok()?;
    (moq_in_line_units > line_item.quantity).then(|| NormalizationWarning::MoqAboveRequested {
        line_item_id: line_item.id.clone(),
        quote_id: price.quote_id.clone(),
        moq,
        requested: line_item.quantity,
    })
}
