//! Tâtonnement: walk the price toward the middle of the uncovered range in
//! damped steps until it stops moving.

use crate::config::TatonnementParams;
use crate::market::bids::BidSet;
use crate::market::ledger::Phase;
use crate::market::summary::Diagnostics;
use crate::types::{Price, PriceBounds, Side};

use super::{ResidualContext, ResidualMechanism, ResidualOutcome, Sides, allocate_at, match_pairs, price_range};

/// Hard stop for the adjustment loop.
pub const MAX_ADJUSTMENTS: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Convergence {
    pub price: Price,
    pub iterations: u32,
    pub converged: bool,
}

/// Repeat `p <- clip(p + theta * (target - p))` until a step moves less than epsilon.
pub fn converge(start: Price, target: Price, bounds: PriceBounds, params: TatonnementParams) -> Convergence {
    let mut price = bounds.clip(start);
    for i in 1..=MAX_ADJUSTMENTS {
        let next = bounds.clip(price + params.theta * (target - price));
        let step = (next - price).abs();
        price = next;
        if step < params.epsilon {
            return Convergence {
                price,
                iterations: i,
                converged: true,
            };
        }
    }
    Convergence {
        price,
        iterations: MAX_ADJUSTMENTS,
        converged: false,
    }
}

/// Run the loop from the reference price toward the uncovered range midpoint.
fn discover(bids: &BidSet, ctx: &ResidualContext<'_>, bounds: PriceBounds, diagnostics: &mut Diagnostics) -> Price {
    let start = ctx.reference_price(diagnostics);
    let target = match price_range(bids) {
        Some((lo, hi)) => (lo + hi) / 2.0,
        None => start,
    };

    let result = converge(start, target, bounds, ctx.config.tatonnement);
    diagnostics.insert("start_price", start);
    diagnostics.insert("target_price", target);
    diagnostics.insert("iterations", result.iterations);
    diagnostics.insert("converged", result.converged);
    if !result.converged {
        diagnostics.record_fallback("max_iterations_reached");
    }
    result.price
}

// === IPA ===

#[derive(Debug, Clone, Copy, Default)]
pub struct IterativePriceAdjustment;

impl ResidualMechanism for IterativePriceAdjustment {
    fn name(&self) -> &'static str {
        "IPA"
    }

    fn settle_residual(&self, bids: &mut BidSet, ctx: &ResidualContext<'_>) -> ResidualOutcome {
        let mut diagnostics = Diagnostics::new();
        let price = discover(bids, ctx, ctx.bounds(), &mut diagnostics);

        let sides = Sides::of(bids);
        let transactions = allocate_at(bids, &sides, Phase::Residual(self.name()), price);
        let mut outcome = ResidualOutcome::from_trades(transactions, sides.short(), diagnostics);
        outcome.price = Some(price);
        outcome
    }
}

// === NBS ===

/// Same convergence loop inside the bargaining bounds, then bilateral matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct NashBargaining;

impl ResidualMechanism for NashBargaining {
    fn name(&self) -> &'static str {
        "NBS"
    }

    fn settle_residual(&self, bids: &mut BidSet, ctx: &ResidualContext<'_>) -> ResidualOutcome {
        let mut diagnostics = Diagnostics::new();
        let price = discover(bids, ctx, ctx.config.bargaining_bounds(), &mut diagnostics);

        let sides = Sides::of(bids);
        let transactions = match_pairs(bids, &sides, Phase::Residual(self.name()), |_, _| (price, price));
        let mut outcome = ResidualOutcome::from_trades(transactions, Side::Buy, diagnostics);
        outcome.price = Some(price);
        outcome
    }
}
