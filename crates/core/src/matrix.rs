//! Dense line-item × supplier comparison matrix.
//!
//! Cells are stored row-major in a flat vector: `cells[row * columns.len() + column]`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::quote::{
    PricedQuote, QuoteLineItemPrice, QuoteStatus, SupplierId, SupplierQuote, SupplierQuoteId,
};
use crate::domain::rfq::{LineItem, LineItemId, Rfq, RfqId};
use crate::domain::terms::Incoterm;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixOptions {
    /// Keep rejected, declined and superseded quotes (audit views).
    pub include_historical: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixColumn {
    pub quote_id: SupplierQuoteId,
    pub supplier_id: SupplierId,
    pub supplier_name: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub status: QuoteStatus,
    pub incoterm: Incoterm,
    pub revision: u32,
    pub bafo_requested: bool,
    pub superseded: bool,
}

impl MatrixColumn {
    fn from_quote(quote: &SupplierQuote) -> Self {
        Self {
            quote_id: quote.id.clone(),
            supplier_id: quote.supplier_id.clone(),
            supplier_name: quote.supplier_name.clone(),
            submitted_at: quote.submitted_at,
            status: quote.status,
            incoterm: quote.incoterm,
            revision: quote.revision,
            bafo_requested: quote.bafo_requested,
            superseded: !quote.is_active(),
        }
    }
}

/// A price cell, or the explicit absence of one. Absence is never a zero price.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "price", rename_all = "snake_case")]
pub enum MatrixCell {
    Quoted(QuoteLineItemPrice),
    Absent,
}

impl MatrixCell {
    pub fn price(&self) -> Option<&QuoteLineItemPrice> {
        match self {
            Self::Quoted(price) => Some(price),
            Self::Absent => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatrixWarning {
    /// A quote priced a line item that is not part of the RFQ; the price was dropped.
    ForeignLineItem { quote_id: SupplierQuoteId, line_item_id: LineItemId },
    /// A quote or line item from another RFQ was passed in and ignored.
    ForeignRecord { rfq_id: RfqId, record_id: String },
    /// A second price for the same cell; the first one was kept.
    DuplicatePrice { quote_id: SupplierQuoteId, line_item_id: LineItemId },
}

impl std::fmt::Display for MatrixWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ForeignLineItem { quote_id, line_item_id } => {
                write!(f, "quote {quote_id} prices line item {line_item_id} outside this RFQ")
            }
            Self::ForeignRecord { rfq_id, record_id } => {
                write!(f, "record {record_id} belongs to RFQ {rfq_id} and was ignored")
            }
            Self::DuplicatePrice { quote_id, line_item_id } => {
                write!(f, "quote {quote_id} priced line item {line_item_id} more than once")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonMatrix {
    pub rfq_id: RfqId,
    pub rows: Vec<LineItem>,
    pub columns: Vec<MatrixColumn>,
    pub cells: Vec<MatrixCell>,
    pub warnings: Vec<MatrixWarning>,
}

impl ComparisonMatrix {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&MatrixCell> {
        if row >= self.rows.len() || column >= self.columns.len() {
            return None;
        }
        self.cells.get(row * self.columns.len() + column)
    }

    pub fn row_cells(&self, row: usize) -> &[MatrixCell] {
        let width = self.columns.len();
        let start = row * width;
        self.cells.get(start..start + width).unwrap_or(&[])
    }

    pub fn row_of(&self, line_item_id: &LineItemId) -> Option<usize> {
        self.rows.iter().position(|row| &row.id == line_item_id)
    }

    pub fn column_of(&self, quote_id: &SupplierQuoteId) -> Option<usize> {
        self.columns.iter().position(|column| &column.quote_id == quote_id)
    }
}

/// Assembles the comparison matrix for one RFQ. Pure; tolerates empty inputs.
pub fn build(
    rfq: &Rfq,
    line_items: &[LineItem],
    quotes: &[PricedQuote],
    options: MatrixOptions,
) -> ComparisonMatrix {
    let mut warnings = Vec::new();

    let mut rows: Vec<LineItem> = Vec::with_capacity(line_items.len());
    for item in line_items {
        if item.rfq_id == rfq.id {
            rows.push(item.clone());
        } else {
            warnings.push(MatrixWarning::ForeignRecord {
                rfq_id: item.rfq_id.clone(),
                record_id: item.id.0.clone(),
            });
        }
    }
    rows.sort_by(|a, b| a.line_number.cmp(&b.line_number).then_with(|| a.id.cmp(&b.id)));

    let mut participating: Vec<&PricedQuote> = Vec::with_capacity(quotes.len());
    for priced in quotes {
        if priced.quote.rfq_id != rfq.id {
            warnings.push(MatrixWarning::ForeignRecord {
                rfq_id: priced.quote.rfq_id.clone(),
                record_id: priced.quote.id.0.clone(),
            });
            continue;
        }
        if options.include_historical || is_current(&priced.quote) {
            participating.push(priced);
        }
    }
    participating.sort_by(|a, b| {
        a.quote
            .submitted_at
            .cmp(&b.quote.submitted_at)
            .then_with(|| a.quote.id.cmp(&b.quote.id))
    });

    let columns: Vec<MatrixColumn> =
        participating.iter().map(|priced| MatrixColumn::from_quote(&priced.quote)).collect();
    let row_index: HashMap<&LineItemId, usize> =
        rows.iter().enumerate().map(|(index, item)| (&item.id, index)).collect();

    let width = columns.len();
    let mut cells = vec![MatrixCell::Absent; rows.len() * width];
    for (column, priced) in participating.iter().enumerate() {
        for price in &priced.prices {
            let Some(&row) = row_index.get(&price.line_item_id) else {
                warnings.push(MatrixWarning::ForeignLineItem {
                    quote_id: priced.quote.id.clone(),
                    line_item_id: price.line_item_id.clone(),
                });
                continue;
            };
            let slot = &mut cells[row * width + column];
            match slot {
                MatrixCell::Absent => *slot = MatrixCell::Quoted(price.clone()),
                MatrixCell::Quoted(_) => warnings.push(MatrixWarning::DuplicatePrice {
                    quote_id: priced.quote.id.clone(),
                    line_item_id: price.line_item_id.clone(),
                }),
            }
        }
    }

    ComparisonMatrix { rfq_id: rfq.id.clone(), rows, columns, cells, warnings }
}

fn is_current(quote: &SupplierQuote) -> bool {
    quote.is_active() && !matches!(quote.status, QuoteStatus::Rejected | QuoteStatus::Declined)
}
