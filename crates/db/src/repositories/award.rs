use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

use procura_core::domain::award::{ActorId, Award, AwardId, AwardStatus};
use procura_core::domain::quote::{SupplierId, SupplierQuoteId};
use procura_core::domain::rfq::RfqId;
use procura_core::ports::{AwardRepository, StoreError};

use super::{
    decode_err, parse_enum, parse_optional_decimal, parse_timestamp, parse_u32, RepositoryError,
};
use crate::DbPool;

pub struct SqlAwardRepository {
    pool: DbPool,
}

impl SqlAwardRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Full award history for an RFQ, oldest first.
    pub async fn awards(&self, rfq_id: &RfqId) -> Result<Vec<Award>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, rfq_id, quote_id, supplier_id, awarded_by, awarded_at, po_number, notes,
                    total_value, currency, round, status, superseded_at
             FROM rfq_award WHERE rfq_id = ?
             ORDER BY awarded_at ASC, id ASC",
        )
        .bind(&rfq_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_award).collect()
    }
}

#[async_trait::async_trait]
impl AwardRepository for SqlAwardRepository {
    async fn create_award(&self, award: Award) -> Result<AwardId, StoreError> {
        insert_award(&self.pool, &award).await?;
        Ok(award.id)
    }

    async fn supersede(&self, previous: &AwardId) -> Result<(), StoreError> {
        let updated = supersede_award(&self.pool, previous, Utc::now()).await?;
        if !updated {
            return Err(StoreError::NotFound { entity: "active award", id: previous.0.clone() });
        }
        Ok(())
    }

    async fn list_awards(&self, rfq_id: &RfqId) -> Result<Vec<Award>, StoreError> {
        Ok(self.awards(rfq_id).await?)
    }
}

pub(crate) async fn insert_award<'e, E>(executor: E, award: &Award) -> Result<(), RepositoryError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO rfq_award (id, rfq_id, quote_id, supplier_id, awarded_by, awarded_at,
                               po_number, notes, total_value, currency, round, status,
                               superseded_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&award.id.0)
    .bind(&award.rfq_id.0)
    .bind(&award.quote_id.0)
    .bind(&award.supplier_id.0)
    .bind(&award.awarded_by.0)
    .bind(award.awarded_at.to_rfc3339())
    .bind(&award.po_number)
    .bind(&award.notes)
    .bind(award.total_value.map(|total| total.to_string()))
    .bind(&award.currency)
    .bind(i64::from(award.round))
    .bind(award.status.as_str())
    .bind(award.superseded_at.map(|at| at.to_rfc3339()))
    .execute(executor)
    .await?;

    Ok(())
}

/// Returns `false` when no active award with that id exists.
pub(crate) async fn supersede_award<'e, E>(
    executor: E,
    award_id: &AwardId,
    at: DateTime<Utc>,
) -> Result<bool, RepositoryError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE rfq_award SET status = 'superseded', superseded_at = ?
         WHERE id = ? AND status = 'active'",
    )
    .bind(at.to_rfc3339())
    .bind(&award_id.0)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn row_to_award(row: &SqliteRow) -> Result<Award, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_err)?;
    let rfq_id: String = row.try_get("rfq_id").map_err(decode_err)?;
    let quote_id: String = row.try_get("quote_id").map_err(decode_err)?;
    let supplier_id: String = row.try_get("supplier_id").map_err(decode_err)?;
    let awarded_by: String = row.try_get("awarded_by").map_err(decode_err)?;
    let awarded_at: String = row.try_get("awarded_at").map_err(decode_err)?;
    let po_number: Option<String> = row.try_get("po_number").map_err(decode_err)?;
    let notes: Option<String> = row.try_get("notes").map_err(decode_err)?;
    let total_value: Option<String> = row.try_get("total_value").map_err(decode_err)?;
    let currency: Option<String> = row.try_get("currency").map_err(decode_err)?;
    let round: i64 = row.try_get("round").map_err(decode_err)?;
    let status: String = row.try_get("status").map_err(decode_err)?;
    let superseded_at: Option<String> = row.try_get("superseded_at").map_err(decode_err)?;

    Ok(Award {
        id: AwardId(id),
        rfq_id: RfqId(rfq_id),
        quote_id: SupplierQuoteId(quote_id),
        supplier_id: SupplierId(supplier_id),
        awarded_by: ActorId(awarded_by),
        awarded_at: parse_timestamp("awarded_at", &awarded_at)?,
        po_number,
        notes,
        total_value: parse_optional_decimal("total_value", total_value)?,
        currency,
        round: parse_u32("round", round)?,
        status: parse_enum::<AwardStatus>("status", &status)?,
        superseded_at: superseded_at
            .map(|at| parse_timestamp("superseded_at", &at))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use procura_core::domain::award::{ActorId, Award, AwardId, AwardStatus};
    use procura_core::domain::quote::{QuoteStatus, SupplierId, SupplierQuote, SupplierQuoteId};
    use procura_core::domain::rfq::{Rfq, RfqId, RfqStatus};
    use procura_core::domain::terms::Incoterm;
    use procura_core::ports::{AwardRepository, StoreError};

    use super::SqlAwardRepository;
    use crate::repositories::{SqlQuoteRepository, SqlRfqRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        SqlRfqRepository::new(pool.clone())
            .save(&Rfq {
                id: RfqId("RFQ-1".to_string()),
                title: "Valves".to_string(),
                buyer_id: "buyer-1".to_string(),
                status: RfqStatus::Evaluation,
                currency: "USD".to_string(),
                round: 1,
                version: 1,
                created_at: Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap(),
            })
            .await
            .expect("save rfq");
        let quotes = SqlQuoteRepository::new(pool.clone());
        for id in ["Q-1", "Q-2"] {
            quotes
                .save(
                    &SupplierQuote {
                        id: SupplierQuoteId(id.to_string()),
                        rfq_id: RfqId("RFQ-1".to_string()),
                        supplier_id: SupplierId(format!("sup-{id}")),
                        supplier_name: None,
                        submitted_at: Utc.with_ymd_and_hms(2026, 5, 2, 9, 0, 0).unwrap(),
                        status: QuoteStatus::UnderReview,
                        bafo_requested: false,
                        total_price: None,
                        lead_time_days: None,
                        incoterm: Incoterm::Fob,
                        revision: 1,
                        supersedes: None,
                        superseded_by: None,
                    },
                    &[],
                )
                .await
                .expect("save quote");
        }
        pool
    }

    fn award(id: &str, quote: &str, hour: u32) -> Award {
        Award {
            id: AwardId(id.to_string()),
            rfq_id: RfqId("RFQ-1".to_string()),
            quote_id: SupplierQuoteId(quote.to_string()),
            supplier_id: SupplierId(format!("sup-{quote}")),
            awarded_by: ActorId("buyer-1".to_string()),
            awarded_at: Utc.with_ymd_and_hms(2026, 5, 3, hour, 0, 0).unwrap(),
            po_number: Some("PO-77".to_string()),
            notes: None,
            total_value: Some(Decimal::new(1_250_50, 2)),
            currency: Some("USD".to_string()),
            round: 1,
            status: AwardStatus::Active,
            superseded_at: None,
        }
    }

    #[tokio::test]
    async fn award_history_survives_supersede() {
        let repo = SqlAwardRepository::new(setup().await);
        let first = award("AW-1", "Q-1", 9);
        repo.create_award(first.clone()).await.expect("first award");
        repo.supersede(&first.id).await.expect("supersede");
        repo.create_award(award("AW-2", "Q-2", 10)).await.expect("second award");

        let history = repo.list_awards(&RfqId("RFQ-1".to_string())).await.expect("list");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, AwardStatus::Superseded);
        assert!(history[0].superseded_at.is_some());
        assert_eq!(history[1].status, AwardStatus::Active);
        assert_eq!(history[1].total_value, Some(Decimal::new(1_250_50, 2)));
    }

    #[tokio::test]
    async fn second_active_award_is_refused_by_the_schema() {
        let repo = SqlAwardRepository::new(setup().await);
        repo.create_award(award("AW-1", "Q-1", 9)).await.expect("first award");

        let second = repo.create_award(award("AW-2", "Q-2", 10)).await;
        assert!(matches!(second, Err(StoreError::Database(_))));
    }

    #[tokio::test]
    async fn superseding_an_unknown_award_is_not_found() {
        let repo = SqlAwardRepository::new(setup().await);
        let result = repo.supersede(&AwardId("AW-404".to_string())).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }
}
