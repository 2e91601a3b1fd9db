use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::rfq::{LineItemId, RfqId};
use crate::domain::terms::Incoterm;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SupplierQuoteId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SupplierId(pub String);

impl std::fmt::Display for SupplierQuoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for SupplierId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Submitted,
    UnderReview,
    Accepted,
    Rejected,
    Declined,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::UnderReview => "under_review",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Declined => "declined",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected | Self::Declined)
    }
}

impl std::str::FromStr for QuoteStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "submitted" => Ok(Self::Submitted),
            "under_review" => Ok(Self::UnderReview),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "declined" => Ok(Self::Declined),
            other => Err(format!("unknown quote status `{other}`")),
        }
    }
}

/// One supplier's response to an RFQ. Revisions append a new record and leave the prior one in
/// place with `superseded_by` set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierQuote {
    pub id: SupplierQuoteId,
    pub rfq_id: RfqId,
    pub supplier_id: SupplierId,
    pub supplier_name: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub status: QuoteStatus,
    pub bafo_requested: bool,
    pub total_price: Option<Decimal>,
    pub lead_time_days: Option<u32>,
    pub incoterm: Incoterm,
    pub revision: u32,
    pub supersedes: Option<SupplierQuoteId>,
    pub superseded_by: Option<SupplierQuoteId>,
}

impl SupplierQuote {
    pub fn is_active(&self) -> bool {
        self.superseded_by.is_none()
    }

    pub fn can_transition_to(&self, next: QuoteStatus) -> bool {
        matches!(
            (self.status, next),
            (QuoteStatus::Submitted, QuoteStatus::UnderReview)
                | (QuoteStatus::Submitted, QuoteStatus::Accepted)
                | (QuoteStatus::Submitted, QuoteStatus::Rejected)
                | (QuoteStatus::Submitted, QuoteStatus::Declined)
                | (QuoteStatus::UnderReview, QuoteStatus::Accepted)
                | (QuoteStatus::UnderReview, QuoteStatus::Rejected)
                | (QuoteStatus::UnderReview, QuoteStatus::Declined)
                | (QuoteStatus::Accepted, QuoteStatus::Submitted)
                | (QuoteStatus::Rejected, QuoteStatus::Submitted)
                | (QuoteStatus::UnderReview, QuoteStatus::Submitted)
        )
    }

    pub fn transition_to(&mut self, next: QuoteStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidQuoteTransition { from: self.status, to: next })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteLineItemPrice {
    pub quote_id: SupplierQuoteId,
    pub line_item_id: LineItemId,
    pub unit_price: Decimal,
    pub currency: String,
    pub quantity_offered: Option<Decimal>,
    pub unit_of_measure: String,
    pub lead_time_days: Option<u32>,
    pub moq: Option<Decimal>,
    pub is_compliant: bool,
    pub notes: Option<String>,
    pub exceptions: Vec<String>,
}

/// A quote header together with its per-line prices.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedQuote {
    pub quote: SupplierQuote,
    pub prices: Vec<QuoteLineItemPrice>,
}

impl PricedQuote {
    /// The one currency every price line uses; `None` when there are no lines or they differ.
    pub fn price_currency(&self) -> Option<&str> {
        let (first, rest) = self.prices.split_first()?;
        rest.iter()
            .all(|price| price.currency.trim().eq_ignore_ascii_case(first.currency.trim()))
            .then(|| first.currency.trim())
    }
}
