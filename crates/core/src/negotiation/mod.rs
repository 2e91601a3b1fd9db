//! RFQ negotiation lifecycle: review, BAFO rounds, award, reopen and close.
//!
//! Transitions are pure: each takes a [`NegotiationSnapshot`] and returns the change set to commit
//! plus the side effects to run afterwards. A rejected transition returns a typed error and
//! produces neither.

pub mod engine;
pub mod states;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::award::AwardId;
use crate::domain::quote::{QuoteStatus, SupplierQuoteId};
use crate::domain::rfq::{LineItemId, RfqId, RfqStatus};

pub use engine::NegotiationEngine;
pub use states::{
    AwardEvidence, NegotiationAction, NegotiationChangeSet, NegotiationCommand,
    NegotiationContext, NegotiationEvent, NegotiationSnapshot, NotificationKind,
    NotificationRequest, QuoteRevision, SkippedQuote, TransitionOutcome,
};

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NegotiationError {
    #[error("{subject} in state `{state}` does not accept {event}")]
    IllegalTransition { subject: String, state: String, event: NegotiationEvent },
    #[error("RFQ {rfq_id} is already awarded")]
    AlreadyAwarded { rfq_id: RfqId, award_id: Option<AwardId> },
    #[error("quote {quote_id} ({}) is not eligible: {reason}", .status.as_str())]
    QuoteNotEligible { quote_id: SupplierQuoteId, status: QuoteStatus, reason: String },
    #[error("RFQ {rfq_id} is {} and no longer open for negotiation", .status.as_str())]
    RfqClosed { rfq_id: RfqId, status: RfqStatus },
    #[error("RFQ {rfq_id} was modified concurrently; reload and retry")]
    ConcurrentModification { rfq_id: RfqId },
    #[error("quote {quote_id} does not belong to RFQ {rfq_id}")]
    QuoteNotFound { rfq_id: RfqId, quote_id: SupplierQuoteId },
    #[error("line item {line_item_id} is not part of RFQ {rfq_id}")]
    ForeignLineItem { rfq_id: RfqId, line_item_id: LineItemId },
}

impl NegotiationError {
    pub fn illegal(subject: &str, state: &str, event: NegotiationEvent) -> Self {
        Self::IllegalTransition { subject: subject.to_string(), state: state.to_string(), event }
    }

    /// Stable machine-readable name.
    pub fn code(&self) -> &'static str {
        match self {
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::AlreadyAwarded { .. } => "already_awarded",
            Self::QuoteNotEligible { .. } => "quote_not_eligible",
            Self::RfqClosed { .. } => "rfq_closed",
            Self::ConcurrentModification { .. } => "concurrent_modification",
            Self::QuoteNotFound { .. } => "quote_not_found",
            Self::ForeignLineItem { .. } => "foreign_line_item",
        }
    }
}
