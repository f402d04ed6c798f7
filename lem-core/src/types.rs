use serde::{Deserialize, Serialize};
use std::fmt;
use tsify_next::Tsify;

// ============================================================================
// Core scalar types
// ============================================================================

pub type Price = f64;
pub type Quantity = f64;

/// Quantities below this are treated as zero when deciding whether a bid is covered.
pub const QTY_EPSILON: Quantity = 1e-9;

/// Identifier of a bid, unique within one round.
///
/// The round driver usually uses the member id, since each member submits at
/// most one offer per step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BidId(pub u64);

impl fmt::Display for BidId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Side
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Price bounds - FIT (floor) and TOU (ceiling)
// ============================================================================

/// Admissible price band. The floor is the feed-in tariff (what the grid pays a
/// seller), the ceiling the time-of-use tariff (what a buyer pays the grid).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBounds {
    pub floor: Price,
    pub ceiling: Price,
}

impl Default for PriceBounds {
    fn default() -> Self {
        Self {
            floor: 0.10,
            ceiling: 0.25,
        }
    }
}

impl PriceBounds {
    pub fn new(floor: Price, ceiling: Price) -> Self {
        Self { floor, ceiling }
    }

    pub fn clip(&self, price: Price) -> Price {
        price.max(self.floor).min(self.ceiling)
    }

    pub fn contains(&self, price: Price) -> bool {
        price >= self.floor && price <= self.ceiling
    }

    pub fn midpoint(&self) -> Price {
        (self.floor + self.ceiling) * 0.5
    }

    /// True if `other` lies entirely inside these bounds.
    pub fn encloses(&self, other: &PriceBounds) -> bool {
        other.floor >= self.floor && other.ceiling <= self.ceiling
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_pins_to_band() {
        let bounds = PriceBounds::new(0.10, 0.25);
        assert_eq!(bounds.clip(0.05), 0.10);
        assert_eq!(bounds.clip(0.30), 0.25);
        assert_eq!(bounds.clip(0.17), 0.17);
        assert!((bounds.midpoint() - 0.175).abs() < 1e-12);
    }

    #[test]
    fn encloses_is_inclusive() {
        let outer = PriceBounds::new(0.10, 0.25);
        assert!(outer.encloses(&PriceBounds::new(0.10, 0.25)));
        assert!(outer.encloses(&PriceBounds::new(0.12, 0.20)));
        assert!(!outer.encloses(&PriceBounds::new(0.05, 0.20)));
    }
}
