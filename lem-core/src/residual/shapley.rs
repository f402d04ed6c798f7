//! Cooperative-game pricing: each uncovered bid is a player, coalition value
//! is [`welfare`], and every matched pair trades at the mean of the two
//! players' Shapley values.
//!
//! `CGT` enumerates every ordering and is only feasible for small books.
//! `CGTS` estimates the same values from seeded random orderings.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use crate::config::SamplingParams;
use crate::market::bids::{BidKey, BidSet};
use crate::market::ledger::Phase;
use crate::market::summary::Diagnostics;
use crate::types::{BidId, Side};

use super::{ResidualContext, ResidualMechanism, ResidualOutcome, Sides, match_pairs, welfare};

/// Largest player count for exhaustive enumeration (8! = 40320 orderings).
pub const MAX_EXACT_PLAYERS: usize = 8;

// === ESTIMATORS ===

/// Add each player's marginal contribution along `order` into `totals`.
/// Coalition welfare is carried forward one player at a time.
fn accumulate(bids: &BidSet, order: &[BidKey], totals: &mut BTreeMap<BidKey, f64>) {
    let mut before = 0.0;
    for key in order {
        let after = before + welfare(bids, std::iter::once(key));
        *totals.entry(*key).or_insert(0.0) += after - before;
        before = after;
    }
}

fn players(bids: &BidSet) -> Vec<BidKey> {
    bids.keys().filter(|&k| !bids[k].is_covered()).collect()
}

/// Exact Shapley values, averaging over all `n!` orderings (Heap's algorithm).
pub fn exact_values(bids: &BidSet) -> BTreeMap<BidKey, f64> {
    let mut order = players(bids);
    let n = order.len();
    let mut totals = BTreeMap::new();
    if n == 0 {
        return totals;
    }

    let mut count: u64 = 1;
    accumulate(bids, &order, &mut totals);

    let mut c = vec![0usize; n];
    let mut i = 1;
    while i < n {
        if c[i] < i {
            if i % 2 == 0 {
                order.swap(0, i);
            } else {
                order.swap(c[i], i);
            }
            accumulate(bids, &order, &mut totals);
            count += 1;
            c[i] += 1;
            i = 1;
        } else {
            c[i] = 0;
            i += 1;
        }
    }

    for v in totals.values_mut() {
        *v /= count as f64;
    }
    totals
}

/// Monte-Carlo Shapley values over `num_samples` shuffles from a seeded ChaCha8 stream.
pub fn sampled_values(bids: &BidSet, params: SamplingParams) -> BTreeMap<BidKey, f64> {
    let mut order = players(bids);
    let mut totals = BTreeMap::new();
    if order.is_empty() || params.num_samples == 0 {
        return totals;
    }

    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    for _ in 0..params.num_samples {
        order.shuffle(&mut rng);
        accumulate(bids, &order, &mut totals);
    }

    let samples = params.num_samples as f64;
    for v in totals.values_mut() {
        *v /= samples;
    }
    totals
}

// === PRICING ===

fn settle_with_values(
    name: &'static str,
    bids: &mut BidSet,
    ctx: &ResidualContext<'_>,
    values: BTreeMap<BidKey, f64>,
    mut diagnostics: Diagnostics,
) -> ResidualOutcome {
    let bounds = ctx.config.bargaining_bounds();
    let by_id: BTreeMap<BidId, f64> = values.iter().map(|(&k, &v)| (bids[k].id, v)).collect();

    let sides = Sides::of(bids);
    let transactions = match_pairs(bids, &sides, Phase::Residual(name), |buy, sell| {
        let phi_buy = by_id.get(&buy.id).copied().unwrap_or(0.0);
        let phi_sell = by_id.get(&sell.id).copied().unwrap_or(0.0);
        let price = bounds.clip((phi_buy + phi_sell) / 2.0);
        (price, price)
    });

    if !by_id.is_empty() {
        let mean = by_id.values().sum::<f64>() / by_id.len() as f64;
        diagnostics.insert("mean_shapley", mean);
    }
    diagnostics.insert("players", by_id.len());
    diagnostics.insert("shapley_values", &by_id);
    ResidualOutcome::from_trades(transactions, Side::Buy, diagnostics)
}

// === CGT ===

#[derive(Debug, Clone, Copy, Default)]
pub struct ExactShapley;

impl ResidualMechanism for ExactShapley {
    fn name(&self) -> &'static str {
        "CGT"
    }

    fn settle_residual(&self, bids: &mut BidSet, ctx: &ResidualContext<'_>) -> ResidualOutcome {
        let mut diagnostics = Diagnostics::new();
        let n = players(bids).len();
        let values = if n > MAX_EXACT_PLAYERS {
            diagnostics.record_fallback("exact_shapley_too_large");
            diagnostics.insert("samples", ctx.config.sampling.num_samples);
            sampled_values(bids, ctx.config.sampling)
        } else {
            exact_values(bids)
        };
        settle_with_values(self.name(), bids, ctx, values, diagnostics)
    }
}

// === CGTS ===

#[derive(Debug, Clone, Copy, Default)]
pub struct SampledShapley;

impl ResidualMechanism for SampledShapley {
    fn name(&self) -> &'static str {
        "CGTS"
    }

    fn settle_residual(&self, bids: &mut BidSet, ctx: &ResidualContext<'_>) -> ResidualOutcome {
        let mut diagnostics = Diagnostics::new();
        diagnostics.insert("samples", ctx.config.sampling.num_samples);
        diagnostics.insert("seed", ctx.config.sampling.seed);
        let values = sampled_values(bids, ctx.config.sampling);
        settle_with_values(self.name(), bids, ctx, values, diagnostics)
    }
}
