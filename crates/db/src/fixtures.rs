use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Quote rows the demo seed writes, with their expected number of priced lines.
const SEED_QUOTES: &[SeedQuoteContract] = &[
    SeedQuoteContract {
        quote_id: "quote-demo-s1",
        supplier_id: "sup-demo-s1",
        supplier_name: "Northwind Fasteners",
        expected_price_count: 2,
        price_lines_label: "quote-demo-s1 price lines",
    },
    SeedQuoteContract {
        quote_id: "quote-demo-s2",
        supplier_id: "sup-demo-s2",
        supplier_name: "Contoso Industrial",
        expected_price_count: 1,
        price_lines_label: "quote-demo-s2 price lines",
    },
    SeedQuoteContract {
        quote_id: "quote-demo-s3",
        supplier_id: "sup-demo-s3",
        supplier_name: "Fabrikam Metalworks",
        expected_price_count: 2,
        price_lines_label: "quote-demo-s3 price lines",
    },
];

const SEED_LINE_ITEM_IDS: &[&str] = &["li-demo-001", "li-demo-002"];

/// Deterministic demo RFQ: two line items priced by three suppliers, one of which quotes only
/// the first item.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const RFQ_ID: &'static str = "rfq-demo-001";

    pub const SQL: &'static str = include_str!("../../../config/fixtures/demo_rfq_seed.sql");

    /// Loads the dataset. Rows that already exist are left alone.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            rfq_id: Self::RFQ_ID,
            line_items: SEED_LINE_ITEM_IDS.to_vec(),
            quotes_seeded: SEED_QUOTES
                .iter()
                .map(|quote| SeededQuote {
                    quote_id: quote.quote_id,
                    supplier_name: quote.supplier_name,
                })
                .collect(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let rfq_exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM rfq WHERE id = ?1)")
                .bind(Self::RFQ_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("rfq", rfq_exists == 1));

        for line_item_id in SEED_LINE_ITEM_IDS {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM rfq_line_item WHERE id = ?1 AND rfq_id = ?2)",
            )
            .bind(line_item_id)
            .bind(Self::RFQ_ID)
            .fetch_one(pool)
            .await?;
            checks.push((*line_item_id, exists == 1));
        }

        for quote in SEED_QUOTES {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM supplier_quote
                               WHERE id = ?1 AND rfq_id = ?2 AND supplier_id = ?3)",
            )
            .bind(quote.quote_id)
            .bind(Self::RFQ_ID)
            .bind(quote.supplier_id)
            .fetch_one(pool)
            .await?;
            checks.push((quote.quote_id, exists == 1));

            let price_count: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM quote_line_item_price WHERE quote_id = ?1",
            )
            .bind(quote.quote_id)
            .fetch_one(pool)
            .await?;
            checks.push((quote.price_lines_label, price_count == quote.expected_price_count));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }
}

struct SeedQuoteContract {
    quote_id: &'static str,
    supplier_id: &'static str,
    supplier_name: &'static str,
    expected_price_count: i64,
    price_lines_label: &'static str,
}

#[derive(Debug, Clone)]
pub struct SeedResult {
    pub rfq_id: &'static str,
    pub line_items: Vec<&'static str>,
    pub quotes_seeded: Vec<SeededQuote>,
}

#[derive(Debug, Clone)]
pub struct SeededQuote {
    pub quote_id: &'static str,
    pub supplier_name: &'static str,
}

#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

impl VerificationResult {
    pub fn failed_checks(&self) -> Vec<&'static str> {
        self.checks.iter().filter(|(_, ok)| !ok).map(|(name, _)| *name).collect()
    }
}
