use crate::market::bids::BidSet;
use crate::market::ledger::Phase;
use crate::market::summary::Diagnostics;

use super::{ResidualContext, ResidualMechanism, ResidualOutcome, Sides, match_pairs, round4};

/// Peer-to-peer mediation (`MUP`): every short-side bid is walked against the
/// long side in price order and each pair splits the difference, quoted to
/// four decimals.
#[derive(Debug, Clone, Copy, Default)]
pub struct BilateralMediation;

impl ResidualMechanism for BilateralMediation {
    fn name(&self) -> &'static str {
        "MUP"
    }

    fn settle_residual(&self, bids: &mut BidSet, ctx: &ResidualContext<'_>) -> ResidualOutcome {
        let bounds = ctx.bounds();
        let sides = Sides::of(bids);
        let mut pair_prices = Vec::new();

        let transactions = match_pairs(bids, &sides, Phase::Residual(self.name()), |buy, sell| {
            let price = bounds.clip(round4((buy.price + sell.price) / 2.0));
            pair_prices.push(price);
            (price, price)
        });

        let mut diagnostics = Diagnostics::new();
        diagnostics.insert("pairs", pair_prices.len());
        diagnostics.insert("pair_prices", pair_prices);
        ResidualOutcome::from_trades(transactions, sides.short(), diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::market::bids::BidRecord;
    use crate::types::Side;

    #[test]
    fn pairs_trade_at_their_average() {
        let mut bids = book(&[
            BidRecord::buy(1, 2.0, 0.16),
            BidRecord::sell(2, 1.0, 0.20),
            BidRecord::sell(3, 3.0, 0.22),
        ]);
        let outcome = settle(&BilateralMediation, &mut bids, Some(0.18));
        let prices: Vec<f64> = outcome
            .transactions
            .iter()
            .filter(|t| t.side == Side::Buy)
            .map(|t| t.price)
            .collect();
        assert_eq!(prices.len(), 2);
        assert!((prices[0] - 0.18).abs() < 1e-12);
        assert!((prices[1] - 0.19).abs() < 1e-12);

        // Weighted over one unit at 0.18 and one at 0.19.
        assert!((outcome.price.unwrap() - 0.185).abs() < 1e-12);
        assert_eq!(outcome.quantity, Some(2.0));
        assert_eq!(outcome.diagnostics.get_f64("pairs"), Some(2.0));
    }

    #[test]
    fn pair_price_is_quoted_to_four_decimals() {
        let mut bids = book(&[BidRecord::buy(1, 1.0, 0.21132), BidRecord::sell(2, 1.0, 0.18)]);
        let outcome = settle(&BilateralMediation, &mut bids, Some(0.2));
        assert_eq!(outcome.transactions.len(), 2);
        for t in &outcome.transactions {
            assert!((t.price - 0.1957).abs() < 1e-12, "traded at {}", t.price);
        }
    }

    #[test]
    fn pair_price_is_clipped() {
        let mut bids = book(&[BidRecord::buy(1, 1.0, 0.40), BidRecord::sell(2, 1.0, 0.30)]);
        let outcome = settle(&BilateralMediation, &mut bids, Some(0.2));
        assert!(outcome.transactions.iter().all(|t| t.price == 0.25));
    }
}
