use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::quote::{SupplierId, SupplierQuoteId};
use crate::domain::rfq::RfqId;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AwardId(pub String);

impl std::fmt::Display for AwardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of whoever triggered an operation, injected by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AwardStatus {
    Active,
    Superseded,
}

impl AwardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Superseded => "superseded",
        }
    }
}

impl std::str::FromStr for AwardStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "superseded" => Ok(Self::Superseded),
            other => Err(format!("unknown award status `{other}`")),
        }
    }
}

/// Award records are never deleted; a reopen marks the active one superseded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Award {
    pub id: AwardId,
    pub rfq_id: RfqId,
    pub quote_id: SupplierQuoteId,
    pub supplier_id: SupplierId,
    pub awarded_by: ActorId,
    pub awarded_at: DateTime<Utc>,
    pub po_number: Option<String>,
    pub notes: Option<String>,
    pub total_value: Option<Decimal>,
    pub currency: Option<String>,
    pub round: u32,
    pub status: AwardStatus,
    pub superseded_at: Option<DateTime<Utc>>,
}
