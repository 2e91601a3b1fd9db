//! Currency, unit-of-measure and Incoterm conversion.
//!
//! [`convert`] is a pure function over a [`RateTable`]: no caching, no hidden state, safe to
//! call from any number of threads at once.

pub mod rates;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::terms::{currency_code, unit_code, Incoterm};

pub use rates::{StaticRateTable, UnitClass};

/// Shipping/duty allocation difference between two Incoterms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IncotermDelta {
    /// Amount per unit, in the target currency, added to the price.
    Additive(Decimal),
    /// Factor applied to the price.
    Multiplicative(Decimal),
}

impl IncotermDelta {
    /// `None` when the result leaves the representable range.
    pub fn apply(&self, amount: Decimal) -> Option<Decimal> {
        match self {
            Self::Additive(delta) => amount.checked_add(*delta),
            Self::Multiplicative(factor) => amount.checked_mul(*factor),
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Self::Additive(delta) => delta.is_zero(),
            Self::Multiplicative(factor) => *factor == Decimal::ONE,
        }
    }
}

/// Lookup surface of a rate/conversion table collaborator.
pub trait RateTable: Send + Sync {
    /// Multiplier converting an amount in `from` into `to`.
    fn rate(&self, from: &str, to: &str) -> Option<Decimal>;
    fn incoterm_delta(&self, from: Incoterm, to: Incoterm) -> Option<IncotermDelta>;
    /// How many `to` units make up one `from` unit.
    fn uom_factor(&self, from: &str, to: &str) -> Option<Decimal>;
}

/// How a missing Incoterm delta is treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncotermPolicy {
    /// Zero delta plus a warning.
    #[default]
    Advisory,
    /// Missing deltas fail the conversion.
    Strict,
}

impl std::str::FromStr for IncotermPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "advisory" => Ok(Self::Advisory),
            "strict" => Ok(Self::Strict),
            other => {
                Err(format!("unsupported incoterm policy `{other}` (expected advisory|strict)"))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversionRequest<'a> {
    pub amount: Decimal,
    pub from_currency: &'a str,
    pub to_currency: &'a str,
    pub from_incoterm: Incoterm,
    pub to_incoterm: Incoterm,
    pub from_uom: &'a str,
    pub to_uom: &'a str,
    pub incoterm_policy: IncotermPolicy,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversionWarning {
    IncotermDeltaMissing { from: Incoterm, to: Incoterm },
}

impl std::fmt::Display for ConversionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IncotermDeltaMissing { from, to } => {
                write!(f, "no incoterm adjustment defined for {from} -> {to}; treated as zero")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertedAmount {
    pub amount: Decimal,
    pub exchange_rate: Decimal,
    pub uom_factor: Decimal,
    pub incoterm_delta: Option<IncotermDelta>,
    pub warnings: Vec<ConversionWarning>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversionError {
    #[error("no exchange rate between {from} and {to}")]
    MissingRate { from: String, to: String },
    #[error("units `{from}` and `{to}` are not convertible")]
    IncompatibleUnits { from: String, to: String },
    #[error("no incoterm adjustment defined for {from} -> {to}")]
    MissingIncotermDelta { from: Incoterm, to: Incoterm },
    #[error("conversion factor for {from} -> {to} is not positive")]
    InvalidRate { from: String, to: String },
    #[error("converting {from} -> {to} overflows the decimal range")]
    Overflow { from: String, to: String },
}

/// Converts a unit price to a new currency, unit of measure and Incoterm.
///
/// Steps run in a fixed order: currency, then unit of measure, then the Incoterm delta (whose
/// additive form is expressed in the target currency per target unit).
pub fn convert<R>(
    request: &ConversionRequest<'_>,
    table: &R,
) -> Result<ConvertedAmount, ConversionError>
where
    R: RateTable + ?Sized,
{
    let exchange_rate = currency_rate(request.from_currency, request.to_currency, table)?;
    let uom_factor = unit_factor(request.from_uom, request.to_uom, table)?;

    let mut warnings = Vec::new();
    let incoterm_delta = if request.from_incoterm == request.to_incoterm {
        None
    } else {
        match table.incoterm_delta(request.from_incoterm, request.to_incoterm) {
            Some(delta) => Some(delta),
            None => match request.incoterm_policy {
                IncotermPolicy::Strict => {
                    return Err(ConversionError::MissingIncotermDelta {
                        from: request.from_incoterm,
                        to: request.to_incoterm,
                    });
                }
                IncotermPolicy::Advisory => {
                    warnings.push(ConversionWarning::IncotermDeltaMissing {
                        from: request.from_incoterm,
                        to: request.to_incoterm,
                    });
                    None
                }
            },
        }
    };

    let per_target_unit = request
        .amount
        .checked_mul(exchange_rate)
        .and_then(|in_currency| in_currency.checked_div(uom_factor));
    let amount = match incoterm_delta {
        Some(delta) => per_target_unit.and_then(|amount| delta.apply(amount)),
        None => per_target_unit,
    }
    .ok_or_else(|| ConversionError::Overflow {
        from: currency_code(request.from_currency),
        to: currency_code(request.to_currency),
    })?;

    Ok(ConvertedAmount { amount, exchange_rate, uom_factor, incoterm_delta, warnings })
}

/// Re-expresses a quantity in another unit of measure (`5 kg` -> `5000 g`).
pub fn convert_quantity<R>(
    quantity: Decimal,
    from_uom: &str,
    to_uom: &str,
    table: &R,
) -> Result<Decimal, ConversionError>
where
    R: RateTable + ?Sized,
{
    let factor = unit_factor(from_uom, to_uom, table)?;
    quantity.checked_mul(factor).ok_or_else(|| ConversionError::Overflow {
        from: unit_code(from_uom),
        to: unit_code(to_uom),
    })
}

fn currency_rate<R>(from: &str, to: &str, table: &R) -> Result<Decimal, ConversionError>
where
    R: RateTable + ?Sized,
{
    let from = currency_code(from);
    let to = currency_code(to);
    if from == to {
        return Ok(Decimal::ONE);
    }

    if let Some(rate) = table.rate(&from, &to) {
        return positive(rate, &from, &to);
    }
    if let Some(inverse) = table.rate(&to, &from) {
        let inverse = positive(inverse, &to, &from)?;
        return Decimal::ONE.checked_div(inverse).ok_or(ConversionError::Overflow { from, to });
    }

    Err(ConversionError::MissingRate { from, to })
}

fn unit_factor<R>(from: &str, to: &str, table: &R) -> Result<Decimal, ConversionError>
where
    R: RateTable + ?Sized,
{
    let from = unit_code(from);
    let to = unit_code(to);
    if from == to {
        return Ok(Decimal::ONE);
    }

    if let Some(factor) = table.uom_factor(&from, &to) {
        return positive(factor, &from, &to);
    }
    if let Some(inverse) = table.uom_factor(&to, &from) {
        let inverse = positive(inverse, &to, &from)?;
        return Decimal::ONE.checked_div(inverse).ok_or(ConversionError::Overflow { from, to });
    }

    Err(ConversionError::IncompatibleUnits { from, to })
}

fn positive(value: Decimal, from: &str, to: &str) -> Result<Decimal, ConversionError> {
    if value > Decimal::ZERO {
        Ok(value)
    } else {
        Err(ConversionError::InvalidRate { from: from.to_string(), to: to.to_string() })
    }
}
