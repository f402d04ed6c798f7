//! Closed-form residual prices: computed once from the uncovered book, then
//! applied through the common short-then-long allocation.

use crate::market::bids::BidSet;
use crate::market::ledger::Phase;
use crate::market::summary::Diagnostics;
use crate::types::{Price, Side};

use super::{ResidualContext, ResidualMechanism, ResidualOutcome, Sides, allocate_at, allocate_short_then_long, mean};

/// Allocate everything at `raw` clipped to the global bounds.
fn settle_at(
    name: &'static str,
    bids: &mut BidSet,
    ctx: &ResidualContext<'_>,
    raw: Price,
    mut diagnostics: Diagnostics,
) -> ResidualOutcome {
    let price = ctx.bounds().clip(raw);
    diagnostics.insert("raw_price", raw);

    let sides = Sides::of(bids);
    let transactions = allocate_at(bids, &sides, Phase::Residual(name), price);
    let mut outcome = ResidualOutcome::from_trades(transactions, sides.short(), diagnostics);
    outcome.price = Some(price);
    outcome
}

// === APM ===

/// Each leg is priced halfway between its own bid and the best bid on the
/// other side.
#[derive(Debug, Clone, Copy, Default)]
pub struct AveragePrice;

impl ResidualMechanism for AveragePrice {
    fn name(&self) -> &'static str {
        "APM"
    }

    fn settle_residual(&self, bids: &mut BidSet, ctx: &ResidualContext<'_>) -> ResidualOutcome {
        let mut diagnostics = Diagnostics::new();
        let sides = Sides::of(bids);
        let first_price = |side: Side| sides.keys(side).first().map(|&k| bids[k].price);

        let (Some(short_first), Some(long_first)) = (first_price(sides.short()), first_price(sides.long)) else {
            diagnostics.record_fallback("empty_side");
            return ResidualOutcome::nothing(diagnostics);
        };
        diagnostics.insert("short_reference", short_first);
        diagnostics.insert("long_reference", long_first);

        let bounds = ctx.bounds();
        let short = sides.short();
        let transactions = allocate_short_then_long(bids, &sides, Phase::Residual(self.name()), |bid| {
            let other = if bid.side == short { long_first } else { short_first };
            bounds.clip((bid.price + other) / 2.0)
        });
        ResidualOutcome::from_trades(transactions, short, diagnostics)
    }
}

// === CFRM ===

/// One price: the midpoint of the average uncovered buy and sell prices.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapFloorMidpoint;

impl ResidualMechanism for CapFloorMidpoint {
    fn name(&self) -> &'static str {
        "CFRM"
    }

    fn settle_residual(&self, bids: &mut BidSet, ctx: &ResidualContext<'_>) -> ResidualOutcome {
        let mut diagnostics = Diagnostics::new();
        let avg = |side: Side| mean(bids.side(side).filter(|(_, b)| !b.is_covered()).map(|(_, b)| b.price));

        let raw = match (avg(Side::Buy), avg(Side::Sell)) {
            (Some(buy), Some(sell)) => {
                diagnostics.insert("avg_buy", buy);
                diagnostics.insert("avg_sell", sell);
                (buy + sell) / 2.0
            }
            _ => {
                diagnostics.record_fallback("empty_side");
                ctx.reference_price(&mut diagnostics)
            }
        };
        settle_at(self.name(), bids, ctx, raw, diagnostics)
    }
}

// === WAM ===

/// One price: the quantity-weighted mean of every uncovered bid price.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedAverage;

impl ResidualMechanism for WeightedAverage {
    fn name(&self) -> &'static str {
        "WAM"
    }

    fn settle_residual(&self, bids: &mut BidSet, ctx: &ResidualContext<'_>) -> ResidualOutcome {
        let mut diagnostics = Diagnostics::new();
        let (weight, value) = bids
            .iter()
            .fold((0.0, 0.0), |(w, v), (_, b)| (w + b.remaining(), v + b.remaining() * b.price));

        let raw = if weight > 0.0 {
            value / weight
        } else {
            diagnostics.record_fallback("zero_weight");
            ctx.reference_price(&mut diagnostics)
        };
        diagnostics.insert("total_weight", weight);
        settle_at(self.name(), bids, ctx, raw, diagnostics)
    }
}

// === MMP ===

/// One price: halfway between the highest uncovered bid and the lowest ask.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModifiedMarginalPrice;

impl ResidualMechanism for ModifiedMarginalPrice {
    fn name(&self) -> &'static str {
        "MMP"
    }

    fn settle_residual(&self, bids: &mut BidSet, ctx: &ResidualContext<'_>) -> ResidualOutcome {
        let mut diagnostics = Diagnostics::new();
        let sides = Sides::of(bids);
        let raw = match (sides.max_buy(bids), sides.min_sell(bids)) {
            (Some(max_buy), Some(min_sell)) => (max_buy + min_sell) / 2.0,
            _ => {
                diagnostics.record_fallback("empty_side");
                ctx.reference_price(&mut diagnostics)
            }
        };
        settle_at(self.name(), bids, ctx, raw, diagnostics)
    }
}

// === MPAS ===

/// Marginal midpoint shifted by `alpha` times the marginal spread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpreadAdjusted;

impl ResidualMechanism for SpreadAdjusted {
    fn name(&self) -> &'static str {
        "MPAS"
    }

    fn settle_residual(&self, bids: &mut BidSet, ctx: &ResidualContext<'_>) -> ResidualOutcome {
        let mut diagnostics = Diagnostics::new();
        let alpha = ctx.config.spread.alpha;
        let sides = Sides::of(bids);
        let raw = match (sides.max_buy(bids), sides.min_sell(bids)) {
            (Some(max_buy), Some(min_sell)) => {
                let spread = max_buy - min_sell;
                diagnostics.insert("spread", spread);
                (max_buy + min_sell) / 2.0 + alpha * spread
            }
            _ => {
                diagnostics.record_fallback("empty_side");
                ctx.reference_price(&mut diagnostics)
            }
        };
        diagnostics.insert("alpha", alpha);
        settle_at(self.name(), bids, ctx, raw, diagnostics)
    }
}
