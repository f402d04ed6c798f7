use std::collections::BTreeMap;

use crate::market::bids::{BidKey, BidSet};
use crate::market::ledger::Phase;
use crate::market::summary::Diagnostics;
use crate::types::{BidId, Price, Side};

use super::{ResidualContext, ResidualMechanism, ResidualOutcome, Sides, match_pairs, welfare};

/// Vickrey-Clarke-Groves pricing: every bid pays the reference price adjusted
/// by the externality it imposes on the rest of the book.
#[derive(Debug, Clone, Copy, Default)]
pub struct Vcg;

impl Vcg {
    /// `P_i = clip(MP - ((W(N \ i) - W(N)) - v_i))` for every uncovered bid.
    fn individual_prices(bids: &BidSet, reference: Price, ctx: &ResidualContext<'_>) -> BTreeMap<BidId, Price> {
        let bounds = ctx.config.bargaining_bounds();
        let everyone: Vec<BidKey> = bids.keys().filter(|&k| !bids[k].is_covered()).collect();
        let total = welfare(bids, &everyone);

        everyone
            .iter()
            .map(|&i| {
                let without = welfare(bids, everyone.iter().filter(|&&k| k != i));
                let externality = without - total;
                let price = reference - (externality - bids[i].price);
                (bids[i].id, bounds.clip(price))
            })
            .collect()
    }
}

impl ResidualMechanism for Vcg {
    fn name(&self) -> &'static str {
        "VCG"
    }

    fn settle_residual(&self, bids: &mut BidSet, ctx: &ResidualContext<'_>) -> ResidualOutcome {
        let mut diagnostics = Diagnostics::new();
        let reference = ctx.reference_price(&mut diagnostics);
        let prices = Self::individual_prices(bids, reference, ctx);
        let bounds = ctx.config.bargaining_bounds();

        let sides = Sides::of(bids);
        let transactions = match_pairs(bids, &sides, Phase::Residual(self.name()), |buy, sell| {
            let p_buy = prices.get(&buy.id).copied().unwrap_or(reference);
            let p_sell = prices.get(&sell.id).copied().unwrap_or(reference);
            let price = bounds.clip((p_buy + p_sell) / 2.0);
            (price, price)
        });

        diagnostics.insert("reference_price", reference);
        diagnostics.insert("individual_prices", &prices);
        ResidualOutcome::from_trades(transactions, Side::Buy, diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::SettlementConfig;
    use crate::market::bids::BidRecord;
    use crate::types::PriceBounds;

    #[test]
    fn welfare_is_bids_minus_asks() {
        let bids = book(&[BidRecord::buy(1, 1.0, 0.22), BidRecord::sell(2, 1.0, 0.15)]);
        let keys: Vec<BidKey> = bids.keys().collect();
        assert!((welfare(&bids, &keys) - 0.07).abs() < 1e-12);
        assert_eq!(welfare(&bids, &keys[..0]), 0.0);
    }

    #[test]
    fn individual_prices_follow_externality() {
        // Dropping a seller raises welfare by its ask; dropping a buyer lowers it by its bid.
        let bids = book(&[BidRecord::buy(1, 1.0, 0.02), BidRecord::sell(2, 1.0, 0.30)]);
        let config = SettlementConfig::default();
        let ctx = ResidualContext::new(Some(0.15), &config);
        let prices = Vcg::individual_prices(&bids, 0.15, &ctx);
        let buy = prices[&BidId(1)];
        let sell = prices[&BidId(2)];
        // buyer: 0.15 - (-0.02 - 0.02) = 0.19 ; seller: 0.15 - (0.30 - 0.30) = 0.15
        assert!((buy - 0.19).abs() < 1e-12, "buy = {buy}");
        assert!((sell - 0.15).abs() < 1e-12, "sell = {sell}");
    }

    #[test]
    fn pairs_settle_at_mean_of_individual_prices() {
        let mut bids = book(&[
            BidRecord::buy(1, 2.0, 0.02),
            BidRecord::sell(2, 1.0, 0.30),
            BidRecord::sell(3, 3.0, 0.31),
        ]);
        let outcome = settle(&Vcg, &mut bids, Some(0.15));
        assert_eq!(outcome.quantity, Some(2.0));
        for t in &outcome.transactions {
            assert!((0.10..=0.25).contains(&t.price), "price {} out of bounds", t.price);
        }
        // Buyer 0.19, seller 0.15 -> 0.17
        assert!((outcome.transactions[0].price - 0.17).abs() < 1e-12);
        assert!(outcome.diagnostics.get("individual_prices").is_some());
    }

    #[test]
    fn bargaining_bounds_cap_individual_prices() {
        let config = SettlementConfig {
            bargaining: Some(PriceBounds::new(0.12, 0.16)),
            ..SettlementConfig::default()
        };
        let mut bids = book(&[BidRecord::buy(1, 1.0, 0.20), BidRecord::sell(2, 1.0, 0.24)]);
        let outcome = settle_with(&Vcg, &mut bids, Some(0.15), &config);
        assert!(outcome.transactions.iter().all(|t| (0.12..=0.16).contains(&t.price)));
    }
}
