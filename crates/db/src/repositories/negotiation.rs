use tracing::debug;

use procura_core::negotiation::NegotiationChangeSet;
use procura_core::ports::{NegotiationUnitOfWork, StoreError};

use super::award::{insert_award, supersede_award};
use super::quote::{insert_price, upsert_quote};
use super::rfq::update_rfq_if_version;
use super::RepositoryError;
use crate::DbPool;

/// Applies a [`NegotiationChangeSet`] in a single transaction.
///
/// The RFQ header is written first with a compare-and-set on `version`, so a writer that lost
/// the race fails before touching quotes or awards. Any later failure rolls everything back.
pub struct SqlNegotiationUnitOfWork {
    pool: DbPool,
}

impl SqlNegotiationUnitOfWork {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn apply(&self, changes: &NegotiationChangeSet) -> Result<(), CommitError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        update_rfq_if_version(&mut *tx, &changes.rfq, changes.expected_version).await?;

        for quote in &changes.quotes {
            upsert_quote(&mut *tx, quote).await?;
        }
        for price in &changes.new_prices {
            insert_price(&mut *tx, price).await?;
        }
        if let Some(previous) = &changes.superseded_award {
            if !supersede_award(&mut *tx, previous, changes.committed_at).await? {
                return Err(CommitError::MissingAward(previous.0.clone()));
            }
        }
        if let Some(award) = &changes.award {
            insert_award(&mut *tx, award).await?;
        }

        tx.commit().await.map_err(RepositoryError::from)?;
        debug!(
            rfq_id = %changes.rfq.id,
            version = changes.rfq.version,
            quotes = changes.quotes.len(),
            prices = changes.new_prices.len(),
            "negotiation change set committed"
        );
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("active award `{0}` to supersede does not exist")]
    MissingAward(String),
}

impl From<CommitError> for StoreError {
    fn from(error: CommitError) -> Self {
        match error {
            CommitError::Repository(error) => error.into(),
            CommitError::MissingAward(id) => StoreError::NotFound { entity: "active award", id },
        }
    }
}

#[async_trait::async_trait]
impl NegotiationUnitOfWork for SqlNegotiationUnitOfWork {
    async fn commit(&self, changes: &NegotiationChangeSet) -> Result<(), StoreError> {
        Ok(self.apply(changes).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use procura_core::domain::award::{ActorId, Award, AwardId, AwardStatus};
    use procura_core::domain::quote::{
        QuoteLineItemPrice, QuoteStatus, SupplierId, SupplierQuote, SupplierQuoteId,
    };
    use procura_core::domain::rfq::{LineItem, LineItemId, Rfq, RfqId, RfqStatus};
    use procura_core::domain::terms::Incoterm;
    use procura_core::negotiation::NegotiationChangeSet;
    use procura_core::ports::{
        AwardRepository, NegotiationUnitOfWork, QuoteRepository, RfqRepository, StoreError,
    };

    use super::SqlNegotiationUnitOfWork;
    use crate::repositories::{SqlAwardRepository, SqlQuoteRepository, SqlRfqRepository};
    use crate::{connect_with_settings, migrations, DbPool};

    fn rfq(status: RfqStatus, version: u64) -> Rfq {
        Rfq {
            id: RfqId("RFQ-1".to_string()),
            title: "Bearings".to_string(),
            buyer_id: "buyer-1".to_string(),
            status,
            currency: "USD".to_string(),
            round: 1,
            version,
            created_at: Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap(),
        }
    }

    fn quote(id: &str, status: QuoteStatus) -> SupplierQuote {
        SupplierQuote {
            id: SupplierQuoteId(id.to_string()),
            rfq_id: RfqId("RFQ-1".to_string()),
            supplier_id: SupplierId("sup-1".to_string()),
            supplier_name: Some("Acme".to_string()),
            submitted_at: Utc.with_ymd_and_hms(2026, 6, 2, 9, 0, 0).unwrap(),
            status,
            bafo_requested: false,
            total_price: None,
            lead_time_days: Some(30),
            incoterm: Incoterm::Fob,
            revision: 1,
            supersedes: None,
            superseded_by: None,
        }
    }

    fn award(id: &str, quote_id: &str) -> Award {
        Award {
            id: AwardId(id.to_string()),
            rfq_id: RfqId("RFQ-1".to_string()),
            quote_id: SupplierQuoteId(quote_id.to_string()),
            supplier_id: SupplierId("sup-1".to_string()),
            awarded_by: ActorId("buyer-1".to_string()),
            awarded_at: Utc.with_ymd_and_hms(2026, 6, 3, 9, 0, 0).unwrap(),
            po_number: None,
            notes: None,
            total_value: Some(Decimal::new(90, 0)),
            currency: Some("USD".to_string()),
            round: 1,
            status: AwardStatus::Active,
            superseded_at: None,
        }
    }

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let rfqs = SqlRfqRepository::new(pool.clone());
        rfqs.save(&rfq(RfqStatus::Evaluation, 3)).await.expect("save rfq");
        rfqs.save_line_item(&LineItem {
            id: LineItemId("L-1".to_string()),
            rfq_id: RfqId("RFQ-1".to_string()),
            line_number: 1,
            description: "bearing".to_string(),
            part_number: Some("6204".to_string()),
            quantity: Decimal::new(10, 0),
            unit_of_measure: "each".to_string(),
            target_unit_price: None,
            currency: "USD".to_string(),
            required_certifications: Vec::new(),
        })
        .await
        .expect("save line");
        SqlQuoteRepository::new(pool.clone())
            .save(&quote("Q-1", QuoteStatus::UnderReview), &[])
            .await
            .expect("save quote");
        pool
    }

    fn change_set(expected_version: u64) -> NegotiationChangeSet {
        NegotiationChangeSet {
            expected_version,
            rfq: rfq(RfqStatus::Awarded, expected_version + 1),
            quotes: vec![quote("Q-1", QuoteStatus::Accepted)],
            new_prices: Vec::new(),
            award: Some(award("AW-1", "Q-1")),
            superseded_award: None,
            committed_at: Utc.with_ymd_and_hms(2026, 6, 3, 9, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn award_change_set_lands_together() {
        let pool = setup().await;
        SqlNegotiationUnitOfWork::new(pool.clone())
            .commit(&change_set(3))
            .await
            .expect("commit");

        let rfq_id = RfqId("RFQ-1".to_string());
        let stored = SqlRfqRepository::new(pool.clone())
            .find_rfq(&rfq_id)
            .await
            .expect("find")
            .expect("rfq present");
        assert_eq!(stored.status, RfqStatus::Awarded);
        assert_eq!(stored.version, 4);

        let quotes = SqlQuoteRepository::new(pool.clone())
            .list_quotes(&rfq_id, true)
            .await
            .expect("quotes");
        assert_eq!(quotes[0].status, QuoteStatus::Accepted);
        let awards = SqlAwardRepository::new(pool).list_awards(&rfq_id).await.expect("awards");
        assert_eq!(awards.len(), 1);
    }

    #[tokio::test]
    async fn stale_version_writes_nothing() {
        let pool = setup().await;
        let result = SqlNegotiationUnitOfWork::new(pool.clone()).commit(&change_set(2)).await;
        assert!(matches!(result, Err(StoreError::VersionConflict { expected: 2, .. })));

        let rfq_id = RfqId("RFQ-1".to_string());
        let awards = SqlAwardRepository::new(pool.clone())
            .list_awards(&rfq_id)
            .await
            .expect("awards");
        assert!(awards.is_empty());
        let quotes = SqlQuoteRepository::new(pool).list_quotes(&rfq_id, true).await.expect("q");
        assert_eq!(quotes[0].status, QuoteStatus::UnderReview);
    }

    #[tokio::test]
    async fn late_failure_rolls_back_the_header_update() {
        let pool = setup().await;
        let mut changes = change_set(3);
        changes.new_prices.push(QuoteLineItemPrice {
            quote_id: SupplierQuoteId("Q-1".to_string()),
            line_item_id: LineItemId("L-404".to_string()),
            unit_price: Decimal::new(9, 0),
            currency: "USD".to_string(),
            quantity_offered: None,
            unit_of_measure: "each".to_string(),
            lead_time_days: None,
            moq: None,
            is_compliant: true,
            notes: None,
            exceptions: Vec::new(),
        });

        let result = SqlNegotiationUnitOfWork::new(pool.clone()).commit(&changes).await;
        assert!(matches!(result, Err(StoreError::Database(_))));

        let stored = SqlRfqRepository::new(pool)
            .find_rfq(&RfqId("RFQ-1".to_string()))
            .await
            .expect("find")
            .expect("rfq present");
        assert_eq!(stored.status, RfqStatus::Evaluation);
        assert_eq!(stored.version, 3);
    }

    #[tokio::test]
    async fn missing_award_to_supersede_aborts_the_commit() {
        let pool = setup().await;
        let mut changes = change_set(3);
        changes.rfq.status = RfqStatus::Evaluation;
        changes.award = None;
        changes.superseded_award = Some(AwardId("AW-404".to_string()));

        let result = SqlNegotiationUnitOfWork::new(pool.clone()).commit(&changes).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));

        let stored = SqlRfqRepository::new(pool)
            .find_rfq(&RfqId("RFQ-1".to_string()))
            .await
            .expect("find")
            .expect("rfq present");
        assert_eq!(stored.version, 3);
    }
}
