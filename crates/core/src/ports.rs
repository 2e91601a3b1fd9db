//! Collaborator contracts consumed by [`crate::service::ProcurementService`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::award::{Award, AwardId};
use crate::domain::quote::{QuoteLineItemPrice, SupplierId, SupplierQuote, SupplierQuoteId};
use crate::domain::rfq::{LineItem, Rfq, RfqId};
use crate::negotiation::{NegotiationChangeSet, NotificationRequest};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("rfq {rfq_id} moved past version {expected}")]
    VersionConflict { rfq_id: RfqId, expected: u64 },
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
}

#[async_trait]
pub trait RfqRepository: Send + Sync {
    async fn find_rfq(&self, id: &RfqId) -> Result<Option<Rfq>, StoreError>;
    /// Ordered by line number.
    async fn list_line_items(&self, rfq_id: &RfqId) -> Result<Vec<LineItem>, StoreError>;
}

#[async_trait]
pub trait QuoteRepository: Send + Sync {
    /// Active quotes only unless `include_historical`.
    async fn list_quotes(
        &self,
        rfq_id: &RfqId,
        include_historical: bool,
    ) -> Result<Vec<SupplierQuote>, StoreError>;
    async fn list_line_item_prices(
        &self,
        quote_id: &SupplierQuoteId,
    ) -> Result<Vec<QuoteLineItemPrice>, StoreError>;
}

#[async_trait]
pub trait AwardRepository: Send + Sync {
    async fn create_award(&self, award: Award) -> Result<AwardId, StoreError>;
    async fn supersede(&self, previous: &AwardId) -> Result<(), StoreError>;
    async fn list_awards(&self, rfq_id: &RfqId) -> Result<Vec<Award>, StoreError>;
}

/// Commits a negotiation change set atomically, guarded by `rfq.version`.
#[async_trait]
pub trait NegotiationUnitOfWork: Send + Sync {
    async fn commit(&self, changes: &NegotiationChangeSet) -> Result<(), StoreError>;
}

pub trait ProcurementStore:
    RfqRepository + QuoteRepository + AwardRepository + NegotiationUnitOfWork
{
}

impl<T> ProcurementStore for T where
    T: RfqRepository + QuoteRepository + AwardRepository + NegotiationUnitOfWork
{
}

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationError {
    #[error("notification to {supplier_id} rejected: {reason}")]
    Rejected { supplier_id: SupplierId, reason: String },
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
    #[error("notification to {supplier_id} timed out after {timeout_ms}ms")]
    Timeout { supplier_id: SupplierId, timeout_ms: u64 },
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, request: &NotificationRequest) -> Result<(), NotificationError>;
}

/// Dispatcher used when notifications are switched off.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledNotifications;

#[async_trait]
impl NotificationDispatcher for DisabledNotifications {
    async fn notify(&self, _request: &NotificationRequest) -> Result<(), NotificationError> {
        Ok(())
    }
}
