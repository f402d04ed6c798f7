//! Adjusted uniform price (`AUP`): nudge uncovered buy prices up and sell
//! prices down, then run the uniform clearer again on the adjusted book.

use serde::Serialize;

use crate::market::bids::BidSet;
use crate::market::clearing::clear_uniform;
use crate::market::ledger::Phase;
use crate::market::summary::Diagnostics;
use crate::types::{Price, QTY_EPSILON, Quantity, Side};

use super::{ResidualContext, ResidualMechanism, ResidualOutcome};

/// One pass of the adjustment loop, as reported in the diagnostics.
#[derive(Debug, Clone, Serialize)]
struct AdjustmentPass {
    iteration: u32,
    clearing_price: Option<Price>,
    clearing_quantity: Quantity,
    demand: Quantity,
    supply: Quantity,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AdjustedUniformPrice;

impl ResidualMechanism for AdjustedUniformPrice {
    fn name(&self) -> &'static str {
        "AUP"
    }

    fn settle_residual(&self, bids: &mut BidSet, ctx: &ResidualContext<'_>) -> ResidualOutcome {
        let params = ctx.config.adjustment;
        let bounds = ctx.bounds();
        let phase = Phase::Residual(self.name());

        let mut working = bids.clone();
        let mut transactions = Vec::new();
        let mut passes = Vec::new();
        let mut exhausted = false;

        for iteration in 1..=params.max_iterations {
            working = working.repriced(|bid| match bid.side {
                Side::Buy => bounds.clip(bid.price * (1.0 + params.step)),
                Side::Sell => bounds.clip(bid.price * (1.0 - params.step)),
            });

            let demand = working.remaining_total(Side::Buy);
            let supply = working.remaining_total(Side::Sell);
            let result = clear_uniform(&mut working, phase);
            for t in &result.transactions {
                bids.consume_by_id(t.bid_id, t.quantity);
            }

            #[cfg(feature = "instrument")]
            tracing::info!(
                target: "residual",
                mechanism = self.name(),
                iteration = iteration,
                price = result.price().unwrap_or(0.0),
                quantity = result.quantity(),
            );

            passes.push(AdjustmentPass {
                iteration,
                clearing_price: result.price(),
                clearing_quantity: result.quantity(),
                demand,
                supply,
            });
            transactions.extend(result.transactions);

            if working.remaining_total(Side::Buy) <= QTY_EPSILON
                || working.remaining_total(Side::Sell) <= QTY_EPSILON
            {
                exhausted = true;
                break;
            }
        }

        let mut diagnostics = Diagnostics::new();
        diagnostics.insert("iterations", passes.len());
        diagnostics.insert("converged", exhausted);
        diagnostics.insert("passes", &passes);
        if !exhausted {
            diagnostics.record_fallback("max_iterations_reached");
        }
        ResidualOutcome::from_trades(transactions, Side::Buy, diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::{AdjustmentParams, SettlementConfig};
    use crate::market::bids::BidRecord;

    #[test]
    fn widening_prices_eventually_cross() {
        // 0.19 -> 0.209 and 0.21 -> 0.189: crosses on the first pass.
        let mut bids = book(&[BidRecord::buy(1, 2.0, 0.19), BidRecord::sell(2, 3.0, 0.21)]);
        let outcome = settle(&AdjustedUniformPrice, &mut bids, Some(0.2));
        assert_eq!(outcome.quantity, Some(2.0));
        assert_eq!(outcome.diagnostics.get_bool("converged"), Some(true));
        assert_eq!(outcome.diagnostics.get_f64("iterations"), Some(1.0));
        assert_eq!(bids.remaining_total(Side::Sell), 1.0);
        let price = outcome.price.unwrap();
        assert!((0.10..=0.25).contains(&price), "price = {price}");
    }

    #[test]
    fn gives_up_after_max_iterations() {
        // Three steps are not enough to close a 0.05 / 0.40 gap.
        let config = SettlementConfig {
            adjustment: AdjustmentParams {
                step: 0.1,
                max_iterations: 3,
            },
            ..SettlementConfig::with_bounds(0.10, 0.25)
        };
        let mut bids = book(&[BidRecord::buy(1, 1.0, 0.05), BidRecord::sell(2, 1.0, 0.40)]);
        let outcome = settle_with(&AdjustedUniformPrice, &mut bids, Some(0.2), &config);
        assert!(outcome.transactions.is_empty());
        assert_eq!(outcome.diagnostics.get_bool("converged"), Some(false));
        assert!(outcome.diagnostics.has_fallback("max_iterations_reached"));
        assert_eq!(outcome.diagnostics.get_f64("iterations"), Some(3.0));
    }
}
