use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::convert::{IncotermDelta, RateTable};
use crate::domain::terms::{currency_code, unit_code, Incoterm};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitClass {
    Mass,
    Length,
    Volume,
    Count,
}

/// Reference rates against USD.
const REFERENCE_USD_RATES: &[(&str, i64, u32)] = &[
    ("EUR", 92, 2),
    ("GBP", 79, 2),
    ("CAD", 136, 2),
    ("MXN", 1715, 2),
    ("CNY", 724, 2),
    ("JPY", 1495, 1),
    ("INR", 831, 1),
    ("KRW", 1320, 0),
    ("BRL", 497, 2),
    ("AUD", 153, 2),
    ("CHF", 88, 2),
    ("SGD", 134, 2),
    ("TWD", 315, 1),
    ("THB", 352, 1),
];

/// Unit aliases with their size in the class base unit (kg, meters, liters, each).
const REFERENCE_UNITS: &[(&str, UnitClass, i64, u32)] = &[
    ("kg", UnitClass::Mass, 1, 0),
    ("g", UnitClass::Mass, 1, 3),
    ("lb", UnitClass::Mass, 453_592, 6),
    ("lbs", UnitClass::Mass, 453_592, 6),
    ("oz", UnitClass::Mass, 283_495, 7),
    ("tons", UnitClass::Mass, 1000, 0),
    ("meters", UnitClass::Length, 1, 0),
    ("m", UnitClass::Length, 1, 0),
    ("mm", UnitClass::Length, 1, 3),
    ("cm", UnitClass::Length, 1, 2),
    ("in", UnitClass::Length, 254, 4),
    ("inches", UnitClass::Length, 254, 4),
    ("ft", UnitClass::Length, 3048, 4),
    ("feet", UnitClass::Length, 3048, 4),
    ("yd", UnitClass::Length, 9144, 4),
    ("yards", UnitClass::Length, 9144, 4),
    ("liters", UnitClass::Volume, 1, 0),
    ("l", UnitClass::Volume, 1, 0),
    ("ml", UnitClass::Volume, 1, 3),
    ("gal", UnitClass::Volume, 378_541, 5),
    ("gallons", UnitClass::Volume, 378_541, 5),
    ("each", UnitClass::Count, 1, 0),
    ("ea", UnitClass::Count, 1, 0),
    ("pcs", UnitClass::Count, 1, 0),
    ("units", UnitClass::Count, 1, 0),
];

/// Freight/duty share of the goods value carried by the seller under each term.
const REFERENCE_INCOTERM_ADDERS: &[(Incoterm, i64)] = &[
    (Incoterm::Exw, 0),
    (Incoterm::Fca, 2),
    (Incoterm::Fob, 5),
    (Incoterm::Cfr, 8),
    (Incoterm::Cif, 10),
    (Incoterm::Dap, 12),
    (Incoterm::Ddp, 15),
];

/// An immutable snapshot of rates, unit factors and Incoterm deltas.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StaticRateTable {
    rates: BTreeMap<(String, String), Decimal>,
    pivot_currency: Option<String>,
    units: BTreeMap<String, (UnitClass, Decimal)>,
    uom_factors: BTreeMap<(String, String), Decimal>,
    incoterm_deltas: BTreeMap<(Incoterm, Incoterm), IncotermDelta>,
}

impl StaticRateTable {
    /// Reference data: USD-pivoted exchange rates, common unit classes and percentage
    /// Incoterm adders normalised through EXW.
    pub fn standard() -> Self {
        let mut table = Self::default().with_pivot_currency("USD");

        for (code, mantissa, scale) in REFERENCE_USD_RATES {
            table = table.with_rate("USD", code, Decimal::new(*mantissa, *scale));
        }
        for (unit, class, mantissa, scale) in REFERENCE_UNITS {
            table = table.with_unit(unit, *class, Decimal::new(*mantissa, *scale));
        }
        for (from, from_pct) in REFERENCE_INCOTERM_ADDERS {
            for (to, to_pct) in REFERENCE_INCOTERM_ADDERS {
                if from == to {
                    continue;
                }
                let from_factor = Decimal::ONE + Decimal::new(*from_pct, 2);
                let to_factor = Decimal::ONE + Decimal::new(*to_pct, 2);
                table = table.with_incoterm_delta(
                    *from,
                    *to,
                    IncotermDelta::Multiplicative(to_factor / from_factor),
                );
            }
        }

        table
    }

    pub fn with_rate(mut self, from: &str, to: &str, rate: Decimal) -> Self {
        self.rates.insert((currency_code(from), currency_code(to)), rate);
        self
    }

    /// Currency used to derive cross rates that have no direct entry.
    pub fn with_pivot_currency(mut self, pivot: &str) -> Self {
        self.pivot_currency = Some(currency_code(pivot));
        self
    }

    /// Registers a unit as `size` base units of `class`.
    pub fn with_unit(mut self, unit: &str, class: UnitClass, size: Decimal) -> Self {
        self.units.insert(unit_code(unit), (class, size));
        self
    }

    /// Explicit factor: one `from` equals `factor` of `to`.
    pub fn with_uom_factor(mut self, from: &str, to: &str, factor: Decimal) -> Self {
        self.uom_factors.insert((unit_code(from), unit_code(to)), factor);
        self
    }

    pub fn with_incoterm_delta(
        mut self,
        from: Incoterm,
        to: Incoterm,
        delta: IncotermDelta,
    ) -> Self {
        self.incoterm_deltas.insert((from, to), delta);
        self
    }

    pub fn currencies(&self) -> Vec<String> {
        let mut codes: Vec<String> =
            self.rates.keys().flat_map(|(from, to)| [from.clone(), to.clone()]).collect();
        codes.sort();
        codes.dedup();
        codes
    }

    pub fn unit_class(&self, unit: &str) -> Option<UnitClass> {
        self.units.get(&unit_code(unit)).map(|(class, _)| *class)
    }

    fn direct_or_inverse(&self, from: &str, to: &str) -> Option<Decimal> {
        if from == to {
            return Some(Decimal::ONE);
        }
        if let Some(rate) = self.rates.get(&(from.to_string(), to.to_string())) {
            return Some(*rate);
        }
        self.rates
            .get(&(to.to_string(), from.to_string()))
            .filter(|rate| !rate.is_zero())
            .map(|rate| Decimal::ONE / rate)
    }
}

impl RateTable for StaticRateTable {
    fn rate(&self, from: &str, to: &str) -> Option<Decimal> {
        let key = (currency_code(from), currency_code(to));
        if let Some(rate) = self.rates.get(&key) {
            return Some(*rate);
        }

        let pivot = self.pivot_currency.as_deref()?;
        let (from, to) = key;
        if from == pivot || to == pivot {
            return None;
        }
        let into_pivot = self.direct_or_inverse(&from, pivot)?;
        let out_of_pivot = self.direct_or_inverse(pivot, &to)?;
        Some(into_pivot * out_of_pivot)
    }

    fn incoterm_delta(&self, from: Incoterm, to: Incoterm) -> Option<IncotermDelta> {
        self.incoterm_deltas.get(&(from, to)).copied()
    }

    fn uom_factor(&self, from: &str, to: &str) -> Option<Decimal> {
        let key = (unit_code(from), unit_code(to));
        if let Some(factor) = self.uom_factors.get(&key) {
            return Some(*factor);
        }

        let (from_class, from_size) = self.units.get(&key.0)?;
        let (to_class, to_size) = self.units.get(&key.1)?;
        if from_class != to_class || to_size.is_zero() {
            return None;
        }
        Some(*from_size / *to_size)
    }
}
