use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RfqId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineItemId(pub String);

impl std::fmt::Display for RfqId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for LineItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RfqStatus {
    Draft,
    Published,
    Evaluation,
    Closed,
    Awarded,
}

impl RfqStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Evaluation => "evaluation",
            Self::Closed => "closed",
            Self::Awarded => "awarded",
        }
    }

    /// Suppliers may still be asked to revise pricing.
    pub fn is_negotiable(&self) -> bool {
        matches!(self, Self::Published | Self::Evaluation)
    }
}

impl std::str::FromStr for RfqStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "published" | "active" => Ok(Self::Published),
            "evaluation" => Ok(Self::Evaluation),
            "closed" => Ok(Self::Closed),
            "awarded" => Ok(Self::Awarded),
            other => Err(format!("unknown rfq status `{other}`")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rfq {
    pub id: RfqId,
    pub title: String,
    pub buyer_id: String,
    pub status: RfqStatus,
    pub currency: String,
    /// Negotiation round, incremented by every reopen.
    pub round: u32,
    /// Optimistic concurrency token, bumped on every committed change.
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineItemId,
    pub rfq_id: RfqId,
    pub line_number: u32,
    pub description: String,
    pub part_number: Option<String>,
    pub quantity: Decimal,
    pub unit_of_measure: String,
    pub target_unit_price: Option<Decimal>,
    pub currency: String,
    pub required_certifications: Vec<String>,
}
