use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

use procura_core::domain::rfq::{LineItem, LineItemId, Rfq, RfqId, RfqStatus};
use procura_core::ports::{RfqRepository, StoreError};

use super::{
    decode_err, parse_decimal, parse_enum, parse_optional_decimal, parse_string_list,
    parse_timestamp, parse_u32, RepositoryError,
};
use crate::DbPool;

pub struct SqlRfqRepository {
    pool: DbPool,
}

impl SqlRfqRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, id: &RfqId) -> Result<Option<Rfq>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, title, buyer_id, status, currency, round, version, created_at
             FROM rfq WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_rfq).transpose()
    }

    pub async fn line_items(&self, rfq_id: &RfqId) -> Result<Vec<LineItem>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, rfq_id, line_number, description, part_number, quantity,
                    unit_of_measure, target_unit_price, currency, required_certifications_json
             FROM rfq_line_item WHERE rfq_id = ?
             ORDER BY line_number ASC, id ASC",
        )
        .bind(&rfq_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_line_item).collect()
    }

    /// Inserts or replaces the RFQ header. Not version-checked; negotiation writes go through
    /// the unit of work.
    pub async fn save(&self, rfq: &Rfq) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO rfq (id, title, buyer_id, status, currency, round, version,
                              created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 buyer_id = excluded.buyer_id,
                 status = excluded.status,
                 currency = excluded.currency,
                 round = excluded.round,
                 version = excluded.version,
                 updated_at = excluded.updated_at",
        )
        .bind(&rfq.id.0)
        .bind(&rfq.title)
        .bind(&rfq.buyer_id)
        .bind(rfq.status.as_str())
        .bind(&rfq.currency)
        .bind(i64::from(rfq.round))
        .bind(version_to_i64(rfq.version)?)
        .bind(rfq.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn save_line_item(&self, item: &LineItem) -> Result<(), RepositoryError> {
        let certifications = serde_json::to_string(&item.required_certifications)
            .map_err(decode_err)?;

        sqlx::query(
            "INSERT INTO rfq_line_item (id, rfq_id, line_number, description, part_number,
                                        quantity, unit_of_measure, target_unit_price, currency,
                                        required_certifications_json)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 line_number = excluded.line_number,
                 description = excluded.description,
                 part_number = excluded.part_number,
                 quantity = excluded.quantity,
                 unit_of_measure = excluded.unit_of_measure,
                 target_unit_price = excluded.target_unit_price,
                 currency = excluded.currency,
                 required_certifications_json = excluded.required_certifications_json",
        )
        .bind(&item.id.0)
        .bind(&item.rfq_id.0)
        .bind(i64::from(item.line_number))
        .bind(&item.description)
        .bind(&item.part_number)
        .bind(item.quantity.to_string())
        .bind(&item.unit_of_measure)
        .bind(item.target_unit_price.map(|price| price.to_string()))
        .bind(&item.currency)
        .bind(certifications)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl RfqRepository for SqlRfqRepository {
    async fn find_rfq(&self, id: &RfqId) -> Result<Option<Rfq>, StoreError> {
        Ok(self.find(id).await?)
    }

    async fn list_line_items(&self, rfq_id: &RfqId) -> Result<Vec<LineItem>, StoreError> {
        Ok(self.line_items(rfq_id).await?)
    }
}

/// Writes the new header only if the stored version still equals `expected_version`.
pub(crate) async fn update_rfq_if_version<'e, E>(
    executor: E,
    rfq: &Rfq,
    expected_version: u64,
) -> Result<(), RepositoryError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE rfq SET status = ?, round = ?, version = ?, updated_at = ?
         WHERE id = ? AND version = ?",
    )
    .bind(rfq.status.as_str())
    .bind(i64::from(rfq.round))
    .bind(version_to_i64(rfq.version)?)
    .bind(Utc::now().to_rfc3339())
    .bind(&rfq.id.0)
    .bind(version_to_i64(expected_version)?)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::VersionConflict {
            rfq_id: rfq.id.0.clone(),
            expected: expected_version,
        });
    }
    Ok(())
}

fn version_to_i64(version: u64) -> Result<i64, RepositoryError> {
    i64::try_from(version)
        .map_err(|_| RepositoryError::Decode(format!("rfq version {version} is out of range")))
}

fn row_to_rfq(row: &SqliteRow) -> Result<Rfq, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_err)?;
    let title: String = row.try_get("title").map_err(decode_err)?;
    let buyer_id: String = row.try_get("buyer_id").map_err(decode_err)?;
    let status: String = row.try_get("status").map_err(decode_err)?;
    let currency: String = row.try_get("currency").map_err(decode_err)?;
    let round: i64 = row.try_get("round").map_err(decode_err)?;
    let version: i64 = row.try_get("version").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;

    Ok(Rfq {
        id: RfqId(id),
        title,
        buyer_id,
        status: parse_enum::<RfqStatus>("status", &status)?,
        currency,
        round: parse_u32("round", round)?,
        version: u64::try_from(version)
            .map_err(|_| RepositoryError::Decode(format!("version: {version} is negative")))?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

fn row_to_line_item(row: &SqliteRow) -> Result<LineItem, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_err)?;
    let rfq_id: String = row.try_get("rfq_id").map_err(decode_err)?;
    let line_number: i64 = row.try_get("line_number").map_err(decode_err)?;
    let description: String = row.try_get("description").map_err(decode_err)?;
    let part_number: Option<String> = row.try_get("part_number").map_err(decode_err)?;
    let quantity: String = row.try_get("quantity").map_err(decode_err)?;
    let unit_of_measure: String = row.try_get("unit_of_measure").map_err(decode_err)?;
    let target_unit_price: Option<String> =
        row.try_get("target_unit_price").map_err(decode_err)?;
    let currency: String = row.try_get("currency").map_err(decode_err)?;
    let certifications: String =
        row.try_get("required_certifications_json").map_err(decode_err)?;

    Ok(LineItem {
        id: LineItemId(id),
        rfq_id: RfqId(rfq_id),
        line_number: parse_u32("line_number", line_number)?,
        description,
        part_number,
        quantity: parse_decimal("quantity", &quantity)?,
        unit_of_measure,
        target_unit_price: parse_optional_decimal("target_unit_price", target_unit_price)?,
        currency,
        required_certifications: parse_string_list(
            "required_certifications_json",
            &certifications,
        )?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use procura_core::domain::rfq::{LineItem, LineItemId, Rfq, RfqId, RfqStatus};
    use procura_core::ports::RfqRepository;

    use super::{update_rfq_if_version, SqlRfqRepository};
    use crate::repositories::RepositoryError;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_rfq() -> Rfq {
        Rfq {
            id: RfqId("RFQ-100".to_string()),
            title: "Bearings".to_string(),
            buyer_id: "buyer-7".to_string(),
            status: RfqStatus::Published,
            currency: "USD".to_string(),
            round: 1,
            version: 1,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
        }
    }

    fn sample_line(id: &str, number: u32) -> LineItem {
        LineItem {
            id: LineItemId(id.to_string()),
            rfq_id: RfqId("RFQ-100".to_string()),
            line_number: number,
            description: format!("bearing {number}"),
            part_number: Some(format!("BRG-{number}")),
            quantity: Decimal::new(125, 1),
            unit_of_measure: "kg".to_string(),
            target_unit_price: Some(Decimal::new(4_2500, 4)),
            currency: "USD".to_string(),
            required_certifications: vec!["ISO 9001".to_string()],
        }
    }

    #[tokio::test]
    async fn save_and_find_rfq_with_ordered_line_items() {
        let repo = SqlRfqRepository::new(setup().await);
        repo.save(&sample_rfq()).await.expect("save rfq");
        repo.save_line_item(&sample_line("L-2", 2)).await.expect("save line 2");
        repo.save_line_item(&sample_line("L-1", 1)).await.expect("save line 1");

        let rfq = repo.find_rfq(&RfqId("RFQ-100".to_string())).await.expect("find").expect("rfq");
        assert_eq!(rfq, sample_rfq());

        let items = repo.list_line_items(&rfq.id).await.expect("line items");
        let ids: Vec<&str> = items.iter().map(|item| item.id.0.as_str()).collect();
        assert_eq!(ids, vec!["L-1", "L-2"]);
        assert_eq!(items[0], sample_line("L-1", 1));
    }

    #[tokio::test]
    async fn missing_rfq_is_none() {
        let repo = SqlRfqRepository::new(setup().await);
        let found = repo.find_rfq(&RfqId("nope".to_string())).await.expect("query");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let pool = setup().await;
        let repo = SqlRfqRepository::new(pool.clone());
        repo.save(&sample_rfq()).await.expect("save rfq");

        let mut next = sample_rfq();
        next.status = RfqStatus::Evaluation;
        next.version = 2;
        update_rfq_if_version(&pool, &next, 1).await.expect("first update");

        let mut stale = sample_rfq();
        stale.status = RfqStatus::Closed;
        stale.version = 2;
        let result = update_rfq_if_version(&pool, &stale, 1).await;
        assert!(matches!(result, Err(RepositoryError::VersionConflict { expected: 1, .. })));

        let stored = repo.find(&next.id).await.expect("find").expect("rfq");
        assert_eq!(stored.status, RfqStatus::Evaluation);
        assert_eq!(stored.version, 2);
    }
}
