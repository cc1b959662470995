use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SCALE: u32 = 2;

/// Monetary amount with exactly two fractional digits.
///
/// Held as integer minor units so that batch totals reproduce exactly from
/// their lines and persist without loss. Values outside the `i64` cent range
/// are rejected on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(i64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmountParseError(String);

impl fmt::Display for AmountParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid amount: {}", self.0)
    }
}

impl std::error::Error for AmountParseError {}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_minor_units(minor_units: i64) -> Self {
        Amount(minor_units)
    }

    pub fn minor_units(&self) -> i64 {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn as_decimal(&self) -> Decimal {
        Decimal::new(self.0, SCALE)
    }

    /// `None` when the sum leaves the representable range.
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    fn from_decimal(mut value: Decimal) -> Option<Amount> {
        value.rescale(SCALE);
        // rescale 在尾數過大時會保留較小的 scale
        if value.scale() != SCALE {
            return None;
        }
        i64::try_from(value.mantissa()).ok().map(Amount)
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim()).map_err(|e| AmountParseError(format!("{s}: {e}")))?;
        if value.normalize().scale() > SCALE {
            return Err(AmountParseError(format!(
                "{s}: more than {SCALE} fractional digits"
            )));
        }
        Self::from_decimal(value)
            .ok_or_else(|| AmountParseError(format!("{s}: out of range")))
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Amount> for String {
    fn from(value: Amount) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_decimal())
    }
}
