use procura_core::domain::award::{Award, AwardId};
use procura_core::domain::quote::{QuoteLineItemPrice, SupplierQuote, SupplierQuoteId};
use procura_core::domain::rfq::{LineItem, Rfq, RfqId};
use procura_core::negotiation::NegotiationChangeSet;
use procura_core::ports::{
    AwardRepository, NegotiationUnitOfWork, QuoteRepository, RfqRepository, StoreError,
};

use super::{
    SqlAwardRepository, SqlNegotiationUnitOfWork, SqlQuoteRepository, SqlRfqRepository,
};
use crate::DbPool;

/// SQLite-backed [`procura_core::ports::ProcurementStore`].
pub struct SqlProcurementStore {
    rfqs: SqlRfqRepository,
    quotes: SqlQuoteRepository,
    awards: SqlAwardRepository,
    unit_of_work: SqlNegotiationUnitOfWork,
}

impl SqlProcurementStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            rfqs: SqlRfqRepository::new(pool.clone()),
            quotes: SqlQuoteRepository::new(pool.clone()),
            awards: SqlAwardRepository::new(pool.clone()),
            unit_of_work: SqlNegotiationUnitOfWork::new(pool),
        }
    }
}

#[async_trait::async_trait]
impl RfqRepository for SqlProcurementStore {
    async fn find_rfq(&self, id: &RfqId) -> Result<Option<Rfq>, StoreError> {
        self.rfqs.find_rfq(id).await
    }

    async fn list_line_items(&self, rfq_id: &RfqId) -> Result<Vec<LineItem>, StoreError> {
        self.rfqs.list_line_items(rfq_id).await
    }
}

#[async_trait::async_trait]
impl QuoteRepository for SqlProcurementStore {
    async fn list_quotes(
        &self,
        rfq_id: &RfqId,
        include_historical: bool,
    ) -> Result<Vec<SupplierQuote>, StoreError> {
        self.quotes.list_quotes(rfq_id, include_historical).await
    }

    async fn list_line_item_prices(
        &self,
        quote_id: &SupplierQuoteId,
    ) -> Result<Vec<QuoteLineItemPrice>, StoreError> {
        self.quotes.list_line_item_prices(quote_id).await
    }
}

#[async_trait::async_trait]
impl AwardRepository for SqlProcurementStore {
    async fn create_award(&self, award: Award) -> Result<AwardId, StoreError> {
        self.awards.create_award(award).await
    }

    async fn supersede(&self, previous: &AwardId) -> Result<(), StoreError> {
        self.awards.supersede(previous).await
    }

    async fn list_awards(&self, rfq_id: &RfqId) -> Result<Vec<Award>, StoreError> {
        self.awards.list_awards(rfq_id).await
    }
}

#[async_trait::async_trait]
impl NegotiationUnitOfWork for SqlProcurementStore {
    async fn commit(&self, changes: &NegotiationChangeSet) -> Result<(), StoreError> {
        self.unit_of_work.commit(changes).await
    }
}
