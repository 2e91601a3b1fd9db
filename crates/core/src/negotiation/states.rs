use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::award::{ActorId, Award, AwardId, AwardStatus};
use crate::domain::quote::{QuoteLineItemPrice, SupplierId, SupplierQuote, SupplierQuoteId};
use crate::domain::rfq::{LineItem, Rfq, RfqStatus};
use crate::domain::terms::Incoterm;
use crate::ranking::RankedMatrix;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationEvent {
    OpenReview,
    RequestBafo,
    SubmitRevision,
    Award,
    Reopen,
    Close,
}

impl NegotiationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenReview => "open_review",
            Self::RequestBafo => "request_bafo",
            Self::SubmitRevision => "submit_revision",
            Self::Award => "award",
            Self::Reopen => "reopen",
            Self::Close => "close",
        }
    }
}

impl std::fmt::Display for NegotiationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A supplier's revised offer in answer to a BAFO request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRevision {
    pub previous_quote_id: SupplierQuoteId,
    pub new_quote_id: SupplierQuoteId,
    pub submitted_at: DateTime<Utc>,
    pub total_price: Option<Decimal>,
    pub lead_time_days: Option<u32>,
    /// Falls back to the previous quote's term.
    pub incoterm: Option<Incoterm>,
    pub prices: Vec<QuoteLineItemPrice>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationCommand {
    /// Moves the listed quotes (all submitted ones when empty) under review.
    OpenReview { quote_ids: Vec<SupplierQuoteId> },
    RequestBafo { quote_ids: Vec<SupplierQuoteId>, message: String },
    SubmitRevision(QuoteRevision),
    Award {
        award_id: AwardId,
        quote_id: SupplierQuoteId,
        po_number: Option<String>,
        notes: Option<String>,
    },
    Reopen { reason: Option<String> },
    Close { reason: Option<String> },
}

impl NegotiationCommand {
    pub fn event(&self) -> NegotiationEvent {
        match self {
            Self::OpenReview { .. } => NegotiationEvent::OpenReview,
            Self::RequestBafo { .. } => NegotiationEvent::RequestBafo,
            Self::SubmitRevision(_) => NegotiationEvent::SubmitRevision,
            Self::Award { .. } => NegotiationEvent::Award,
            Self::Reopen { .. } => NegotiationEvent::Reopen,
            Self::Close { .. } => NegotiationEvent::Close,
        }
    }
}

/// Ranking output used to check that an award target actually priced something.
#[derive(Clone, Copy, Debug)]
pub struct AwardEvidence<'a> {
    pub ranked: &'a RankedMatrix,
    /// Currency of the winning quote's prices; `None` when its lines mix currencies.
    pub currency: Option<&'a str>,
}

#[derive(Clone, Debug)]
pub struct NegotiationContext<'a> {
    pub actor: ActorId,
    pub now: DateTime<Utc>,
    pub line_items: &'a [LineItem],
    pub evidence: Option<AwardEvidence<'a>>,
}

/// Current persisted state of one RFQ's negotiation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationSnapshot {
    pub rfq: Rfq,
    /// Every quote on the RFQ, superseded revisions included.
    pub quotes: Vec<SupplierQuote>,
    pub awards: Vec<Award>,
}

impl NegotiationSnapshot {
    pub fn quote(&self, quote_id: &SupplierQuoteId) -> Option<&SupplierQuote> {
        self.quotes.iter().find(|quote| &quote.id == quote_id)
    }

    pub fn active_award(&self) -> Option<&Award> {
        self.awards.iter().find(|award| award.status == AwardStatus::Active)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BafoRequested,
    QuoteAwarded,
    QuoteRejected,
    RfqReopened,
    RfqClosed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BafoRequested => "bafo_requested",
            Self::QuoteAwarded => "quote_awarded",
            Self::QuoteRejected => "quote_rejected",
            Self::RfqReopened => "rfq_reopened",
            Self::RfqClosed => "rfq_closed",
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "bafo_requested" => Ok(Self::BafoRequested),
            "quote_awarded" => Ok(Self::QuoteAwarded),
            "quote_rejected" => Ok(Self::QuoteRejected),
            "rfq_reopened" => Ok(Self::RfqReopened),
            "rfq_closed" => Ok(Self::RfqClosed),
            other => Err(format!("unknown notification kind `{other}`")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub supplier_id: SupplierId,
    pub quote_id: SupplierQuoteId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

/// Side effects the caller executes after the change set is committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationAction {
    Notify(NotificationRequest),
    GeneratePurchaseOrder { award_id: AwardId, po_number: Option<String> },
}

/// Everything a transition writes, committed as one unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationChangeSet {
    /// `rfq.version` the snapshot was read at; the commit fails if it moved.
    pub expected_version: u64,
    pub rfq: Rfq,
    /// Quotes to insert or update, by id.
    pub quotes: Vec<SupplierQuote>,
    pub new_prices: Vec<QuoteLineItemPrice>,
    pub award: Option<Award>,
    pub superseded_award: Option<AwardId>,
    pub committed_at: DateTime<Utc>,
}

/// A quote the command named but could not act on. The rest of the command still applies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedQuote {
    pub quote_id: SupplierQuoteId,
    pub reason: super::NegotiationError,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub event: NegotiationEvent,
    pub rfq_from: RfqStatus,
    pub rfq_to: RfqStatus,
    pub changes: NegotiationChangeSet,
    pub actions: Vec<NegotiationAction>,
    pub skipped: Vec<SkippedQuote>,
}

impl TransitionOutcome {
    /// Nothing to commit.
    pub fn is_noop(&self) -> bool {
        self.rfq_from == self.rfq_to
            && self.changes.quotes.is_empty()
            && self.changes.new_prices.is_empty()
            && self.changes.award.is_none()
            && self.changes.superseded_award.is_none()
    }

    pub fn notifications(&self) -> impl Iterator<Item = &NotificationRequest> {
        self.actions.iter().filter_map(|action| match action {
            NegotiationAction::Notify(request) => Some(request),
            NegotiationAction::GeneratePurchaseOrder { .. } => None,
        })
    }
}
