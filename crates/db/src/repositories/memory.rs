use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::RwLock;

use procura_core::domain::award::{Award, AwardId, AwardStatus};
use procura_core::domain::quote::{
    PricedQuote, QuoteLineItemPrice, QuoteStatus, SupplierId, SupplierQuote, SupplierQuoteId,
};
use procura_core::domain::rfq::{LineItem, Rfq, RfqId};
use procura_core::negotiation::{NegotiationChangeSet, NotificationRequest};
use procura_core::ports::{
    AwardRepository, NegotiationUnitOfWork, NotificationDispatcher, NotificationError,
    QuoteRepository, RfqRepository, StoreError,
};

#[derive(Clone, Debug, Default)]
struct MemoryState {
    rfqs: HashMap<String, Rfq>,
    line_items: HashMap<String, Vec<LineItem>>,
    quotes: Vec<SupplierQuote>,
    prices: Vec<QuoteLineItemPrice>,
    awards: Vec<Award>,
}

/// Process-local store with the same commit semantics as the SQL one: a change set lands whole
/// or not at all, and only against the `rfq.version` it was computed from.
#[derive(Default)]
pub struct InMemoryProcurementStore {
    state: RwLock<MemoryState>,
    fail_next_commit: AtomicBool,
}

impl InMemoryProcurementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_rfq(&self, rfq: Rfq, line_items: Vec<LineItem>) {
        let mut state = self.state.write().await;
        state.line_items.insert(rfq.id.0.clone(), line_items);
        state.rfqs.insert(rfq.id.0.clone(), rfq);
    }

    pub async fn insert_quote(&self, priced: PricedQuote) {
        let mut state = self.state.write().await;
        state.quotes.retain(|quote| quote.id != priced.quote.id);
        state.prices.retain(|price| price.quote_id != priced.quote.id);
        state.quotes.push(priced.quote);
        state.prices.extend(priced.prices);
    }

    pub async fn insert_award(&self, award: Award) {
        self.state.write().await.awards.push(award);
    }

    /// Makes the next commit fail with a database error without applying anything.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub async fn quote(&self, id: &SupplierQuoteId) -> Option<SupplierQuote> {
        self.state.read().await.quotes.iter().find(|quote| &quote.id == id).cloned()
    }
}

#[async_trait::async_trait]
impl RfqRepository for InMemoryProcurementStore {
    async fn find_rfq(&self, id: &RfqId) -> Result<Option<Rfq>, StoreError> {
        Ok(self.state.read().await.rfqs.get(&id.0).cloned())
    }

    async fn list_line_items(&self, rfq_id: &RfqId) -> Result<Vec<LineItem>, StoreError> {
        let state = self.state.read().await;
        let mut items = state.line_items.get(&rfq_id.0).cloned().unwrap_or_default();
        items.sort_by(|a, b| a.line_number.cmp(&b.line_number).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }
}

#[async_trait::async_trait]
impl QuoteRepository for InMemoryProcurementStore {
    async fn list_quotes(
        &self,
        rfq_id: &RfqId,
        include_historical: bool,
    ) -> Result<Vec<SupplierQuote>, StoreError> {
        let state = self.state.read().await;
        let mut quotes: Vec<SupplierQuote> = state
            .quotes
            .iter()
            .filter(|quote| &quote.rfq_id == rfq_id)
            .filter(|quote| {
                include_historical
                    || (quote.superseded_by.is_none()
                        && !matches!(quote.status, QuoteStatus::Rejected | QuoteStatus::Declined))
            })
            .cloned()
            .collect();
        quotes.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then_with(|| a.id.cmp(&b.id)));
        Ok(quotes)
    }

    async fn list_line_item_prices(
        &self,
        quote_id: &SupplierQuoteId,
    ) -> Result<Vec<QuoteLineItemPrice>, StoreError> {
        let state = self.state.read().await;
        Ok(state.prices.iter().filter(|price| &price.quote_id == quote_id).cloned().collect())
    }
}

#[async_trait::async_trait]
impl AwardRepository for InMemoryProcurementStore {
    async fn create_award(&self, award: Award) -> Result<AwardId, StoreError> {
        let mut state = self.state.write().await;
        let duplicate_active = award.status == AwardStatus::Active
            && state.awards.iter().any(|existing| {
                existing.rfq_id == award.rfq_id && existing.status == AwardStatus::Active
            });
        if duplicate_active {
            return Err(StoreError::Database(format!(
                "rfq {} already has an active award",
                award.rfq_id
            )));
        }
        let id = award.id.clone();
        state.awards.push(award);
        Ok(id)
    }

    async fn supersede(&self, previous: &AwardId) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let award = state
            .awards
            .iter_mut()
            .find(|award| &award.id == previous && award.status == AwardStatus::Active)
            .ok_or_else(|| StoreError::NotFound {
                entity: "active award",
                id: previous.0.clone(),
            })?;
        award.status = AwardStatus::Superseded;
        award.superseded_at = Some(chrono::Utc::now());
        Ok(())
    }

    async fn list_awards(&self, rfq_id: &RfqId) -> Result<Vec<Award>, StoreError> {
        let state = self.state.read().await;
        let mut awards: Vec<Award> =
            state.awards.iter().filter(|award| &award.rfq_id == rfq_id).cloned().collect();
        awards.sort_by(|a, b| a.awarded_at.cmp(&b.awarded_at).then_with(|| a.id.cmp(&b.id)));
        Ok(awards)
    }
}

#[async_trait::async_trait]
impl NegotiationUnitOfWork for InMemoryProcurementStore {
    async fn commit(&self, changes: &NegotiationChangeSet) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database("injected commit failure".to_string()));
        }

        let rfq_id = &changes.rfq.id;
        let current = state.rfqs.get(&rfq_id.0).ok_or_else(|| StoreError::NotFound {
            entity: "rfq",
            id: rfq_id.0.clone(),
        })?;
        if current.version != changes.expected_version {
            return Err(StoreError::VersionConflict {
                rfq_id: rfq_id.clone(),
                expected: changes.expected_version,
            });
        }

        // Work on a copy so a late failure leaves the visible state untouched.
        let mut next = state.clone();
        next.rfqs.insert(rfq_id.0.clone(), changes.rfq.clone());
        for quote in &changes.quotes {
            match next.quotes.iter_mut().find(|existing| existing.id == quote.id) {
                Some(existing) => *existing = quote.clone(),
                None => next.quotes.push(quote.clone()),
            }
        }
        next.prices.extend(changes.new_prices.iter().cloned());
        if let Some(previous) = &changes.superseded_award {
            let award = next
                .awards
                .iter_mut()
                .find(|award| &award.id == previous && award.status == AwardStatus::Active)
                .ok_or_else(|| StoreError::NotFound {
                    entity: "active award",
                    id: previous.0.clone(),
                })?;
            award.status = AwardStatus::Superseded;
            award.superseded_at = Some(changes.committed_at);
        }
        if let Some(award) = &changes.award {
            if next.awards.iter().any(|existing| {
                existing.rfq_id == award.rfq_id && existing.status == AwardStatus::Active
            }) {
                return Err(StoreError::Database(format!(
                    "rfq {} already has an active award",
                    award.rfq_id
                )));
            }
            next.awards.push(award.clone());
        }

        *state = next;
        Ok(())
    }
}

/// Test double that records every request and can fail or stall chosen suppliers.
#[derive(Default)]
pub struct RecordingNotificationDispatcher {
    sent: Mutex<Vec<NotificationRequest>>,
    failing: HashSet<SupplierId>,
    delayed: HashMap<SupplierId, Duration>,
}

impl RecordingNotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, supplier_id: &str) -> Self {
        self.failing.insert(SupplierId(supplier_id.to_string()));
        self
    }

    pub fn delayed_for(mut self, supplier_id: &str, delay: Duration) -> Self {
        self.delayed.insert(SupplierId(supplier_id.to_string()), delay);
        self
    }

    /// Requests that were delivered.
    pub fn sent(&self) -> Vec<NotificationRequest> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl NotificationDispatcher for RecordingNotificationDispatcher {
    async fn notify(&self, request: &NotificationRequest) -> Result<(), NotificationError> {
        if let Some(delay) = self.delayed.get(&request.supplier_id) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(&request.supplier_id) {
            return Err(NotificationError::Rejected {
                supplier_id: request.supplier_id.clone(),
                reason: "mailbox unavailable".to_string(),
            });
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(request.clone());
        }
        Ok(())
    }
}
