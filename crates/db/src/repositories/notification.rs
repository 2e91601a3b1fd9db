use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;
use tracing::debug;

use procura_core::domain::quote::{SupplierId, SupplierQuoteId};
use procura_core::negotiation::{NotificationKind, NotificationRequest};
use procura_core::ports::{NotificationDispatcher, NotificationError};

use super::{decode_err, parse_enum, parse_timestamp, RepositoryError};
use crate::DbPool;

/// Supplier inbox row as written by [`SqlNotificationOutbox`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoredNotification {
    pub id: String,
    pub supplier_id: SupplierId,
    pub quote_id: SupplierQuoteId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Delivers notifications by writing them to the supplier inbox table.
pub struct SqlNotificationOutbox {
    pool: DbPool,
}

impl SqlNotificationOutbox {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, request: &NotificationRequest) -> Result<String, RepositoryError> {
        let id = format!("notif-{}", uuid::Uuid::new_v4());
        let data = serde_json::to_string(&request.data).map_err(decode_err)?;

        sqlx::query(
            "INSERT INTO notification (id, supplier_id, quote_id, type, title, body, data_json,
                                       is_read, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&id)
        .bind(&request.supplier_id.0)
        .bind(&request.quote_id.0)
        .bind(request.kind.as_str())
        .bind(&request.title)
        .bind(&request.body)
        .bind(data)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn list_for_supplier(
        &self,
        supplier_id: &SupplierId,
    ) -> Result<Vec<StoredNotification>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, supplier_id, quote_id, type, title, body, data_json, is_read, created_at
             FROM notification WHERE supplier_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(&supplier_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let data: String = row.try_get("data_json").map_err(decode_err)?;
                let kind: String = row.try_get("type").map_err(decode_err)?;
                let created_at: String = row.try_get("created_at").map_err(decode_err)?;
                Ok(StoredNotification {
                    id: row.try_get("id").map_err(decode_err)?,
                    supplier_id: SupplierId(row.try_get("supplier_id").map_err(decode_err)?),
                    quote_id: SupplierQuoteId(row.try_get("quote_id").map_err(decode_err)?),
                    kind: parse_enum::<NotificationKind>("type", &kind)?,
                    title: row.try_get("title").map_err(decode_err)?,
                    body: row.try_get("body").map_err(decode_err)?,
                    data: serde_json::from_str(&data).map_err(decode_err)?,
                    is_read: row.try_get("is_read").map_err(decode_err)?,
                    created_at: parse_timestamp("created_at", &created_at)?,
                })
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl NotificationDispatcher for SqlNotificationOutbox {
    async fn notify(&self, request: &NotificationRequest) -> Result<(), NotificationError> {
        let id = self
            .insert(request)
            .await
            .map_err(|error| NotificationError::Unavailable(error.to_string()))?;
        debug!(
            notification_id = %id,
            supplier_id = %request.supplier_id,
            kind = request.kind.as_str(),
            "notification queued"
        );
        Ok(())
    }
}
