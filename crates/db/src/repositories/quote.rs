use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

use procura_core::domain::quote::{
    QuoteLineItemPrice, QuoteStatus, SupplierId, SupplierQuote, SupplierQuoteId,
};
use procura_core::domain::rfq::{LineItemId, RfqId};
use procura_core::domain::terms::Incoterm;
use procura_core::ports::{QuoteRepository, StoreError};

use super::{
    decode_err, parse_decimal, parse_enum, parse_optional_decimal, parse_string_list,
    parse_timestamp, parse_u32, RepositoryError,
};
use crate::DbPool;

const QUOTE_COLUMNS: &str = "id, rfq_id, supplier_id, supplier_name, submitted_at, status, \
     bafo_requested, total_price, lead_time_days, incoterm, revision, supersedes, superseded_by";

pub struct SqlQuoteRepository {
    pool: DbPool,
}

impl SqlQuoteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn quotes(
        &self,
        rfq_id: &RfqId,
        include_historical: bool,
    ) -> Result<Vec<SupplierQuote>, RepositoryError> {
        let sql = if include_historical {
            format!(
                "SELECT {QUOTE_COLUMNS} FROM supplier_quote WHERE rfq_id = ?
                 ORDER BY submitted_at ASC, id ASC"
            )
        } else {
            format!(
                "SELECT {QUOTE_COLUMNS} FROM supplier_quote
                 WHERE rfq_id = ? AND superseded_by IS NULL
                   AND status NOT IN ('rejected', 'declined')
                 ORDER BY submitted_at ASC, id ASC"
            )
        };
        let rows = sqlx::query(&sql).bind(&rfq_id.0).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_quote).collect()
    }

    pub async fn find(
        &self,
        id: &SupplierQuoteId,
    ) -> Result<Option<SupplierQuote>, RepositoryError> {
        let sql = format!("SELECT {QUOTE_COLUMNS} FROM supplier_quote WHERE id = ?");
        let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_quote).transpose()
    }

    pub async fn prices(
        &self,
        quote_id: &SupplierQuoteId,
    ) -> Result<Vec<QuoteLineItemPrice>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT quote_id, line_item_id, unit_price, currency, quantity_offered,
                    unit_of_measure, lead_time_days, moq, is_compliant, notes, exceptions_json
             FROM quote_line_item_price WHERE quote_id = ?
             ORDER BY id ASC",
        )
        .bind(&quote_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_price).collect()
    }

    /// Stores a quote with its price sheet, replacing any earlier price rows.
    pub async fn save(
        &self,
        quote: &SupplierQuote,
        prices: &[QuoteLineItemPrice],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        upsert_quote(&mut *tx, quote).await?;
        sqlx::query("DELETE FROM quote_line_item_price WHERE quote_id = ?")
            .bind(&quote.id.0)
            .execute(&mut *tx)
            .await?;
        for price in prices {
            insert_price(&mut *tx, price).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl QuoteRepository for SqlQuoteRepository {
    async fn list_quotes(
        &self,
        rfq_id: &RfqId,
        include_historical: bool,
    ) -> Result<Vec<SupplierQuote>, StoreError> {
        Ok(self.quotes(rfq_id, include_historical).await?)
    }

    async fn list_line_item_prices(
        &self,
        quote_id: &SupplierQuoteId,
    ) -> Result<Vec<QuoteLineItemPrice>, StoreError> {
        Ok(self.prices(quote_id).await?)
    }
}

pub(crate) async fn upsert_quote<'e, E>(
    executor: E,
    quote: &SupplierQuote,
) -> Result<(), RepositoryError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO supplier_quote (id, rfq_id, supplier_id, supplier_name, submitted_at, status,
                                     bafo_requested, total_price, lead_time_days, incoterm,
                                     revision, supersedes, superseded_by)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             supplier_name = excluded.supplier_name,
             status = excluded.status,
             bafo_requested = excluded.bafo_requested,
             total_price = excluded.total_price,
             lead_time_days = excluded.lead_time_days,
             incoterm = excluded.incoterm,
             superseded_by = excluded.superseded_by",
    )
    .bind(&quote.id.0)
    .bind(&quote.rfq_id.0)
    .bind(&quote.supplier_id.0)
    .bind(&quote.supplier_name)
    .bind(quote.submitted_at.to_rfc3339())
    .bind(quote.status.as_str())
    .bind(quote.bafo_requested)
    .bind(quote.total_price.map(|total| total.to_string()))
    .bind(quote.lead_time_days.map(i64::from))
    .bind(quote.incoterm.as_str())
    .bind(i64::from(quote.revision))
    .bind(quote.supersedes.as_ref().map(|id| id.0.as_str()))
    .bind(quote.superseded_by.as_ref().map(|id| id.0.as_str()))
    .execute(executor)
    .await?;

    Ok(())
}

pub(crate) async fn insert_price<'e, E>(
    executor: E,
    price: &QuoteLineItemPrice,
) -> Result<(), RepositoryError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let exceptions = serde_json::to_string(&price.exceptions).map_err(decode_err)?;

    sqlx::query(
        "INSERT INTO quote_line_item_price (quote_id, line_item_id, unit_price, currency,
                                            quantity_offered, unit_of_measure, lead_time_days,
                                            moq, is_compliant, notes, exceptions_json)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&price.quote_id.0)
    .bind(&price.line_item_id.0)
    .bind(price.unit_price.to_string())
    .bind(&price.currency)
    .bind(price.quantity_offered.map(|quantity| quantity.to_string()))
    .bind(&price.unit_of_measure)
    .bind(price.lead_time_days.map(i64::from))
    .bind(price.moq.map(|moq| moq.to_string()))
    .bind(price.is_compliant)
    .bind(&price.notes)
    .bind(exceptions)
    .execute(executor)
    .await?;

    Ok(())
}

fn row_to_quote(row: &SqliteRow) -> Result<SupplierQuote, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_err)?;
    let rfq_id: String = row.try_get("rfq_id").map_err(decode_err)?;
    let supplier_id: String = row.try_get("supplier_id").map_err(decode_err)?;
    let supplier_name: Option<String> = row.try_get("supplier_name").map_err(decode_err)?;
    let submitted_at: String = row.try_get("submitted_at").map_err(decode_err)?;
    let status: String = row.try_get("status").map_err(decode_err)?;
    let bafo_requested: bool = row.try_get("bafo_requested").map_err(decode_err)?;
    let total_price: Option<String> = row.try_get("total_price").map_err(decode_err)?;
    let lead_time_days: Option<i64> = row.try_get("lead_time_days").map_err(decode_err)?;
    let incoterm: String = row.try_get("incoterm").map_err(decode_err)?;
    let revision: i64 = row.try_get("revision").map_err(decode_err)?;
    let supersedes: Option<String> = row.try_get("supersedes").map_err(decode_err)?;
    let superseded_by: Option<String> = row.try_get("superseded_by").map_err(decode_err)?;

    Ok(SupplierQuote {
        id: SupplierQuoteId(id),
        rfq_id: RfqId(rfq_id),
        supplier_id: SupplierId(supplier_id),
        supplier_name,
        submitted_at: parse_timestamp("submitted_at", &submitted_at)?,
        status: parse_enum::<QuoteStatus>("status", &status)?,
        bafo_requested,
        total_price: parse_optional_decimal("total_price", total_price)?,
        lead_time_days: lead_time_days.map(|days| parse_u32("lead_time_days", days)).transpose()?,
        incoterm: parse_enum::<Incoterm>("incoterm", &incoterm)?,
        revision: parse_u32("revision", revision)?,
        supersedes: supersedes.map(SupplierQuoteId),
        superseded_by: superseded_by.map(SupplierQuoteId),
    })
}

fn row_to_price(row: &SqliteRow) -> Result<QuoteLineItemPrice, RepositoryError> {
    let quote_id: String = row.try_get("quote_id").map_err(decode_err)?;
    let line_item_id: String = row.try_get("line_item_id").map_err(decode_err)?;
    let unit_price: String = row.try_get("unit_price").map_err(decode_err)?;
    let currency: String = row.try_get("currency").map_err(decode_err)?;
    let quantity_offered: Option<String> = row.try_get("quantity_offered").map_err(decode_err)?;
    let unit_of_measure: String = row.try_get("unit_of_measure").map_err(decode_err)?;
    let lead_time_days: Option<i64> = row.try_get("lead_time_days").map_err(decode_err)?;
    let moq: Option<String> = row.try_get("moq").map_err(decode_err)?;
    let is_compliant: bool = row.try_get("is_compliant").map_err(decode_err)?;
    let notes: Option<String> = row.try_get("notes").map_err(decode_err)?;
    let exceptions: String = row.try_get("exceptions_json").map_err(decode_err)?;

    Ok(QuoteLineItemPrice {
        quote_id: SupplierQuoteId(quote_id),
        line_item_id: LineItemId(line_item_id),
        unit_price: parse_decimal("unit_price", &unit_price)?,
        currency,
        quantity_offered: parse_optional_decimal("quantity_offered", quantity_offered)?,
        unit_of_measure,
        lead_time_days: lead_time_days.map(|days| parse_u32("lead_time_days", days)).transpose()?,
        moq: parse_optional_decimal("moq", moq)?,
        is_compliant,
        notes,
        exceptions: parse_string_list("exceptions_json", &exceptions)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use procura_core::domain::quote::{
        QuoteLineItemPrice, QuoteStatus, SupplierId, SupplierQuote, SupplierQuoteId,
    };
    use procura_core::domain::rfq::{LineItem, LineItemId, Rfq, RfqId, RfqStatus};
    use procura_core::domain::terms::Incoterm;
    use procura_core::ports::QuoteRepository;

    use super::SqlQuoteRepository;
    use crate::repositories::SqlRfqRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let rfqs = SqlRfqRepository::new(pool.clone());
        rfqs.save(&Rfq {
            id: RfqId("RFQ-1".to_string()),
            title: "Cable".to_string(),
            buyer_id: "buyer-1".to_string(),
            status: RfqStatus::Published,
            currency: "USD".to_string(),
            round: 1,
            version: 1,
            created_at: Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap(),
        })
        .await
        .expect("save rfq");
        rfqs.save_line_item(&LineItem {
            id: LineItemId("L-1".to_string()),
            rfq_id: RfqId("RFQ-1".to_string()),
            line_number: 1,
            description: "copper cable".to_string(),
            part_number: None,
            quantity: Decimal::new(300, 0),
            unit_of_measure: "m".to_string(),
            target_unit_price: None,
            currency: "USD".to_string(),
            required_certifications: Vec::new(),
        })
        .await
        .expect("save line");
        pool
    }

    fn quote(id: &str, minutes: i64, status: QuoteStatus) -> SupplierQuote {
        SupplierQuote {
            id: SupplierQuoteId(id.to_string()),
            rfq_id: RfqId("RFQ-1".to_string()),
            supplier_id: SupplierId(format!("sup-{id}")),
            supplier_name: Some(format!("Supplier {id}")),
            submitted_at: Utc.with_ymd_and_hms(2026, 4, 2, 9, 0, 0).unwrap()
                + Duration::minutes(minutes),
            status,
            bafo_requested: false,
            total_price: Some(Decimal::new(123_45, 2)),
            lead_time_days: Some(21),
            incoterm: Incoterm::Cif,
            revision: 1,
            supersedes: None,
            superseded_by: None,
        }
    }

    fn price(quote_id: &str, unit_price: Decimal) -> QuoteLineItemPrice {
        QuoteLineItemPrice {
            quote_id: SupplierQuoteId(quote_id.to_string()),
            line_item_id: LineItemId("L-1".to_string()),
            unit_price,
            currency: "EUR".to_string(),
            quantity_offered: Some(Decimal::new(300, 0)),
            unit_of_measure: "ft".to_string(),
            lead_time_days: Some(12),
            moq: Some(Decimal::new(500, 0)),
            is_compliant: false,
            notes: Some("tinned".to_string()),
            exceptions: vec!["no RoHS certificate".to_string()],
        }
    }

    #[tokio::test]
    async fn quote_and_price_sheet_round_trip() {
        let repo = SqlQuoteRepository::new(setup().await);
        let stored = quote("Q-1", 0, QuoteStatus::Submitted);
        let sheet = vec![price("Q-1", Decimal::new(1_2345, 4))];
        repo.save(&stored, &sheet).await.expect("save quote");

        assert_eq!(repo.find(&stored.id).await.expect("find"), Some(stored.clone()));
        assert_eq!(repo.list_line_item_prices(&stored.id).await.expect("prices"), sheet);
    }

    #[tokio::test]
    async fn historical_quotes_are_hidden_by_default() {
        let repo = SqlQuoteRepository::new(setup().await);
        repo.save(&quote("Q-1", 0, QuoteStatus::Submitted), &[]).await.expect("save q1");
        repo.save(&quote("Q-2", 5, QuoteStatus::Rejected), &[]).await.expect("save q2");
        let mut superseded = quote("Q-3", 10, QuoteStatus::Submitted);
        superseded.superseded_by = Some(SupplierQuoteId("Q-1".to_string()));
        repo.save(&superseded, &[]).await.expect("save q3");

        let rfq_id = RfqId("RFQ-1".to_string());
        let active = repo.list_quotes(&rfq_id, false).await.expect("active");
        let all = repo.list_quotes(&rfq_id, true).await.expect("all");

        assert_eq!(active.iter().map(|q| q.id.0.as_str()).collect::<Vec<_>>(), vec!["Q-1"]);
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn duplicate_price_rows_are_kept_in_insertion_order() {
        let repo = SqlQuoteRepository::new(setup().await);
        let sheet = vec![price("Q-1", Decimal::new(5, 0)), price("Q-1", Decimal::new(4, 0))];
        repo.save(&quote("Q-1", 0, QuoteStatus::Submitted), &sheet).await.expect("save");

        let prices = repo
            .list_line_item_prices(&SupplierQuoteId("Q-1".to_string()))
            .await
            .expect("prices");
        assert_eq!(
            prices.iter().map(|p| p.unit_price).collect::<Vec<_>>(),
            vec![Decimal::new(5, 0), Decimal::new(4, 0)]
        );
    }
}
