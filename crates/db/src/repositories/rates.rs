use chrono::Utc;
use sqlx::Row;
use tracing::debug;

use procura_core::convert::{IncotermDelta, StaticRateTable};
use procura_core::domain::terms::Incoterm;

use super::{decode_err, parse_decimal, parse_enum, RepositoryError};
use crate::DbPool;

/// Reads stored exchange rates, unit factors and Incoterm deltas into a [`StaticRateTable`].
///
/// Stored rows are layered over a base table, so reference data only needs overriding where a
/// deployment disagrees with it.
pub struct SqlRateTableLoader {
    pool: DbPool,
}

impl SqlRateTableLoader {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn load(
        &self,
        base: StaticRateTable,
        pivot_currency: Option<&str>,
    ) -> Result<StaticRateTable, RepositoryError> {
        let mut table = base;
        if let Some(pivot) = pivot_currency {
            table = table.with_pivot_currency(pivot);
        }

        let rates = sqlx::query("SELECT from_currency, to_currency, rate FROM exchange_rate")
            .fetch_all(&self.pool)
            .await?;
        for row in &rates {
            let from: String = row.try_get("from_currency").map_err(decode_err)?;
            let to: String = row.try_get("to_currency").map_err(decode_err)?;
            let rate: String = row.try_get("rate").map_err(decode_err)?;
            table = table.with_rate(&from, &to, parse_decimal("rate", &rate)?);
        }

        let factors = sqlx::query("SELECT from_unit, to_unit, factor FROM uom_conversion")
            .fetch_all(&self.pool)
            .await?;
        for row in &factors {
            let from: String = row.try_get("from_unit").map_err(decode_err)?;
            let to: String = row.try_get("to_unit").map_err(decode_err)?;
            let factor: String = row.try_get("factor").map_err(decode_err)?;
            table = table.with_uom_factor(&from, &to, parse_decimal("factor", &factor)?);
        }

        let deltas = sqlx::query("SELECT from_term, to_term, kind, value FROM incoterm_delta")
            .fetch_all(&self.pool)
            .await?;
        for row in &deltas {
            let from: String = row.try_get("from_term").map_err(decode_err)?;
            let to: String = row.try_get("to_term").map_err(decode_err)?;
            let kind: String = row.try_get("kind").map_err(decode_err)?;
            let value: String = row.try_get("value").map_err(decode_err)?;
            let value = parse_decimal("value", &value)?;
            let delta = match kind.as_str() {
                "additive" => IncotermDelta::Additive(value),
                "multiplicative" => IncotermDelta::Multiplicative(value),
                other => {
                    return Err(RepositoryError::Decode(format!("kind: unknown delta `{other}`")))
                }
            };
            table = table.with_incoterm_delta(
                parse_enum::<Incoterm>("from_term", &from)?,
                parse_enum::<Incoterm>("to_term", &to)?,
                delta,
            );
        }

        debug!(
            rates = rates.len(),
            uom_factors = factors.len(),
            incoterm_deltas = deltas.len(),
            "rate table loaded"
        );
        Ok(table)
    }

    pub async fn save_rate(
        &self,
        from: &str,
        to: &str,
        rate: rust_decimal::Decimal,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO exchange_rate (from_currency, to_currency, rate, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(from_currency, to_currency) DO UPDATE SET
                 rate = excluded.rate,
                 updated_at = excluded.updated_at",
        )
        .bind(from.trim().to_ascii_uppercase())
        .bind(to.trim().to_ascii_uppercase())
        .bind(rate.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn save_uom_factor(
        &self,
        from: &str,
        to: &str,
        factor: rust_decimal::Decimal,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO uom_conversion (from_unit, to_unit, factor) VALUES (?, ?, ?)
             ON CONFLICT(from_unit, to_unit) DO UPDATE SET factor = excluded.factor",
        )
        .bind(from)
        .bind(to)
        .bind(factor.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn save_incoterm_delta(
        &self,
        from: Incoterm,
        to: Incoterm,
        delta: IncotermDelta,
    ) -> Result<(), RepositoryError> {
        let (kind, value) = match delta {
            IncotermDelta::Additive(value) => ("additive", value),
            IncotermDelta::Multiplicative(value) => ("multiplicative", value),
        };
        sqlx::query(
            "INSERT INTO incoterm_delta (from_term, to_term, kind, value) VALUES (?, ?, ?, ?)
             ON CONFLICT(from_term, to_term) DO UPDATE SET
                 kind = excluded.kind,
                 value = excluded.value",
        )
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(kind)
        .bind(value.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use procura_core::convert::{IncotermDelta, RateTable, StaticRateTable};
    use procura_core::domain::terms::Incoterm;

    use super::SqlRateTableLoader;
    use crate::{connect_with_settings, migrations};

    async fn loader() -> SqlRateTableLoader {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlRateTableLoader::new(pool)
    }

    #[tokio::test]
    async fn stored_rows_override_the_base_table() {
        let loader = loader().await;
        loader.save_rate("usd", "eur", Decimal::new(95, 2)).await.expect("rate");
        loader.save_uom_factor("box", "each", Decimal::new(12, 0)).await.expect("factor");
        let delta = IncotermDelta::Additive(Decimal::ONE);
        loader.save_incoterm_delta(Incoterm::Exw, Incoterm::Fob, delta).await.expect("delta");

        let table = loader.load(StaticRateTable::standard(), None).await.expect("load");

        assert_eq!(table.rate("USD", "EUR"), Some(Decimal::new(95, 2)));
        assert_eq!(table.uom_factor("box", "each"), Some(Decimal::new(12, 0)));
        assert_eq!(
            table.incoterm_delta(Incoterm::Exw, Incoterm::Fob),
            Some(IncotermDelta::Additive(Decimal::ONE))
        );
    }

    #[tokio::test]
    async fn empty_tables_leave_an_empty_base_empty() {
        let table = loader().await.load(StaticRateTable::default(), None).await.expect("load");
        assert_eq!(table, StaticRateTable::default());
    }

    #[tokio::test]
    async fn pivot_enables_cross_rates_from_stored_rows() {
        let loader = loader().await;
        loader.save_rate("EUR", "USD", Decimal::new(2, 0)).await.expect("eur");
        loader.save_rate("USD", "JPY", Decimal::new(100, 0)).await.expect("jpy");

        let table = loader.load(StaticRateTable::default(), Some("USD")).await.expect("load");
        assert_eq!(table.rate("EUR", "JPY"), Some(Decimal::new(200, 0)));
    }
}
