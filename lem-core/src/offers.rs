//! Member offers for one market step.
//!
//! A member with an energy deficit bids to buy it, a member with a surplus
//! offers to sell it. Prices are drawn inside the step's tariff window so the
//! community market is always at least as good as the grid.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{SettleError, SettleResult};
use crate::market::bids::BidRecord;
use crate::types::{Price, PriceBounds, Quantity, Side};

/// Grid tariffs for one step: feed-in (what the grid pays) and time-of-use
/// (what the grid charges).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TariffWindow {
    pub fit: Price,
    pub tou: Price,
}

impl TariffWindow {
    pub fn new(fit: Price, tou: Price) -> SettleResult<Self> {
        if !(fit.is_finite() && tou.is_finite()) || fit >= tou {
            return Err(SettleError::config(format!(
                "feed-in tariff {fit} must be below time-of-use tariff {tou}"
            )));
        }
        Ok(Self { fit, tou })
    }

    pub fn average(&self) -> Price {
        (self.fit + self.tou) / 2.0
    }

    pub fn bounds(&self) -> PriceBounds {
        PriceBounds::new(self.fit, self.tou)
    }
}

fn round2(price: Price) -> Price {
    (price * 100.0).round() / 100.0
}

/// Draw a uniform price in `[lo, hi]`, tolerating an inverted range.
fn draw<R: Rng>(rng: &mut R, lo: Price, hi: Price) -> Price {
    let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    if hi - lo <= f64::EPSILON {
        return lo;
    }
    rng.random_range(lo..=hi)
}

/// One member's offer for a step. Zero balance means no offer.
///
/// Deficits buy at `[avg * 0.8, tou * 0.99]`, surpluses sell at
/// `[fit * 1.1, avg * 1.2]`; the price is rounded to cents and kept inside
/// the tariff window.
pub fn generate_offer<R: Rng>(
    rng: &mut R,
    member_id: u64,
    net_balance: Quantity,
    tariff: TariffWindow,
) -> Option<BidRecord> {
    if !net_balance.is_finite() || net_balance == 0.0 {
        return None;
    }

    let avg = tariff.average();
    let (side, raw) = if net_balance < 0.0 {
        (Side::Buy, draw(rng, avg * 0.8, tariff.tou * 0.99))
    } else {
        (Side::Sell, draw(rng, tariff.fit * 1.1, avg * 1.2))
    };
    let price = tariff.bounds().clip(round2(raw));

    Some(match side {
        Side::Buy => BidRecord::buy(member_id, -net_balance, price),
        Side::Sell => BidRecord::sell(member_id, net_balance, price),
    })
}

/// Offers for a whole step, one per member with a non-zero balance.
///
/// `balances` pairs member ids with net energy balance (negative = deficit).
/// The same seed always yields the same offers.
pub fn generate_round(seed: u64, balances: &[(u64, Quantity)], tariff: TariffWindow) -> Vec<BidRecord> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    balances
        .iter()
        .filter_map(|&(member, balance)| generate_offer(&mut rng, member, balance, tariff))
        .collect()
}

/// A market only runs when at least one member has something to sell.
pub fn has_sellers(offers: &[BidRecord]) -> bool {
    offers.iter().any(|o| o.side == Side::Sell)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tariff() -> TariffWindow {
        TariffWindow::new(0.10, 0.25).unwrap()
    }

    #[test]
    fn deficit_buys_and_surplus_sells() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let buy = generate_offer(&mut rng, 1, -3.5, tariff()).unwrap();
        assert_eq!(buy.side, Side::Buy);
        assert_eq!(buy.quantity, 3.5);
        // avg 0.175: buys in [0.14, 0.2475]
        assert!(buy.price >= 0.14 && buy.price <= 0.25, "buy price {}", buy.price);

        let sell = generate_offer(&mut rng, 2, 2.0, tariff()).unwrap();
        assert_eq!(sell.side, Side::Sell);
        // sells in [0.11, 0.21]
        assert!(sell.price >= 0.11 && sell.price <= 0.21, "sell price {}", sell.price);
    }

    #[test]
    fn zero_balance_makes_no_offer() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        assert!(generate_offer(&mut rng, 1, 0.0, tariff()).is_none());
    }

    #[test]
    fn prices_are_whole_cents() {
        let balances: Vec<(u64, Quantity)> = (0..50).map(|i| (i, if i % 2 == 0 { -1.0 } else { 1.0 })).collect();
        for offer in generate_round(11, &balances, tariff()) {
            let cents = offer.price * 100.0;
            assert!((cents - cents.round()).abs() < 1e-9, "price {} not rounded", offer.price);
            assert!((0.10..=0.25).contains(&offer.price));
        }
    }

    #[test]
    fn same_seed_same_round() {
        let balances = [(1, -2.0), (2, 1.5), (3, 0.0), (4, 4.0)];
        let a = generate_round(99, &balances, tariff());
        let b = generate_round(99, &balances, tariff());
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        assert!(has_sellers(&a));
    }

    #[test]
    fn inverted_tariff_is_rejected() {
        assert!(TariffWindow::new(0.25, 0.10).is_err());
    }
}
