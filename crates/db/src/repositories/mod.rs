use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use procura_core::ports::StoreError;

pub mod award;
pub mod memory;
pub mod negotiation;
pub mod notification;
pub mod quote;
pub mod rates;
pub mod rfq;
pub mod store;

pub use award::SqlAwardRepository;
pub use memory::{InMemoryProcurementStore, RecordingNotificationDispatcher};
pub use negotiation::SqlNegotiationUnitOfWork;
pub use notification::{SqlNotificationOutbox, StoredNotification};
pub use quote::SqlQuoteRepository;
pub use rates::SqlRateTableLoader;
pub use rfq::SqlRfqRepository;
pub use store::SqlProcurementStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("rfq `{rfq_id}` is no longer at version {expected}")]
    VersionConflict { rfq_id: String, expected: u64 },
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(source) => StoreError::Database(source.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
            RepositoryError::VersionConflict { rfq_id, expected } => {
                StoreError::VersionConflict { rfq_id: procura_core::RfqId(rfq_id), expected }
            }
        }
    }
}

pub(crate) fn decode_err(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

pub(crate) fn parse_decimal(column: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(raw.trim())
        .map_err(|e| RepositoryError::Decode(format!("{column}: `{raw}` is not a decimal ({e})")))
}

pub(crate) fn parse_optional_decimal(
    column: &str,
    raw: Option<String>,
) -> Result<Option<Decimal>, RepositoryError> {
    raw.map(|value| parse_decimal(column, &value)).transpose()
}

pub(crate) fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: `{raw}` is not RFC 3339 ({e})")))
}

pub(crate) fn parse_enum<T>(column: &str, raw: &str) -> Result<T, RepositoryError>
where
    T: FromStr<Err = String>,
{
    raw.parse::<T>().map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

pub(crate) fn parse_u32(column: &str, raw: i64) -> Result<u32, RepositoryError> {
    u32::try_from(raw)
        .map_err(|_| RepositoryError::Decode(format!("{column}: {raw} is out of range")))
}

pub(crate) fn parse_string_list(column: &str, raw: &str) -> Result<Vec<String>, RepositoryError> {
    serde_json::from_str(raw)
        .map_err(|e| RepositoryError::Decode(format!("{column}: invalid JSON list ({e})")))
}

#[cfg(test)]
mod tests {
    use procura_core::ports::StoreError;
    use procura_core::RfqId;
    use rust_decimal::Decimal;

    use super::{parse_decimal, parse_string_list, parse_timestamp, RepositoryError};

    #[test]
    fn version_conflict_maps_to_store_error() {
        let error = StoreError::from(RepositoryError::VersionConflict {
            rfq_id: "rfq-1".to_string(),
            expected: 4,
        });
        assert_eq!(
            error,
            StoreError::VersionConflict { rfq_id: RfqId("rfq-1".to_string()), expected: 4 }
        );
    }

    #[test]
    fn decimal_text_keeps_exact_value() {
        assert_eq!(parse_decimal("unit_price", "0.1230").expect("decimal"), Decimal::new(123, 3));
        assert!(matches!(parse_decimal("unit_price", "abc"), Err(RepositoryError::Decode(_))));
    }

    #[test]
    fn malformed_rows_fail_to_decode() {
        assert!(parse_timestamp("submitted_at", "yesterday").is_err());
        assert!(parse_string_list("exceptions_json", "not json").is_err());
        assert_eq!(
            parse_string_list("exceptions_json", r#"["ISO 9001"]"#).expect("list"),
            vec!["ISO 9001".to_string()]
        );
    }
}
