//! Newton-Raphson price discovery (`UPNR`).
//!
//! Prices are parametrized by a spread factor `k`: buys are marked up by
//! `(1 + k)` and sells down by `(1 - k)`, and the candidate price is the mean
//! of the two side averages after marking. The solver drives the unmatched
//! volume `f(k) = maxQ - min(demand(k), supply(k))` to zero.
//!
//! Unlike the other mechanisms the result is never clipped. A price outside
//! the bounds rejects the whole residual trade.

use crate::market::bids::BidSet;
use crate::market::ledger::Phase;
use crate::market::summary::Diagnostics;
use crate::types::{Price, Quantity, Side};

use super::{ResidualContext, ResidualMechanism, ResidualOutcome, Sides, allocate_at, mean, round4};

const INITIAL_K: f64 = 0.0005;
const MAX_ITERATIONS: u32 = 100;
const TOLERANCE: f64 = 0.01;
const DAMPING: f64 = 0.1;
const DERIVATIVE_EPSILON: f64 = 1e-5;
const INITIAL_H: f64 = 1e-5;
/// How many times the finite-difference step may grow tenfold.
const MAX_STEP_WIDENINGS: u32 = 10;

/// Uncovered book reduced to what the excess function needs.
struct Market {
    buys: Vec<(Price, Quantity)>,
    sells: Vec<(Price, Quantity)>,
    mean_buy: Price,
    mean_sell: Price,
    max_quantity: Quantity,
}

impl Market {
    fn of(bids: &BidSet) -> Option<Self> {
        let collect = |side: Side| -> Vec<(Price, Quantity)> {
            bids.side(side)
                .filter(|(_, b)| !b.is_covered())
                .map(|(_, b)| (b.price, b.remaining()))
                .collect()
        };
        let buys = collect(Side::Buy);
        let sells = collect(Side::Sell);
        let mean_buy = mean(buys.iter().map(|(p, _)| *p))?;
        let mean_sell = mean(sells.iter().map(|(p, _)| *p))?;
        let total = |v: &[(Price, Quantity)]| v.iter().map(|(_, q)| q).sum::<Quantity>();
        let max_quantity = total(&buys).min(total(&sells));
        Some(Self {
            buys,
            sells,
            mean_buy,
            mean_sell,
            max_quantity,
        })
    }

    fn price(&self, k: f64) -> Price {
        (self.mean_sell * (1.0 - k) + self.mean_buy * (1.0 + k)) / 2.0
    }

    fn excess(&self, k: f64) -> Quantity {
        let price = self.price(k);
        let demand: Quantity = self
            .buys
            .iter()
            .filter(|(p, _)| p * (1.0 + k) > price)
            .map(|(_, q)| q)
            .sum();
        let supply: Quantity = self
            .sells
            .iter()
            .filter(|(p, _)| p * (1.0 - k) < price)
            .map(|(_, q)| q)
            .sum();
        self.max_quantity - demand.min(supply)
    }

    /// Forward difference, widening the step while the excess looks flat.
    fn derivative(&self, k: f64) -> f64 {
        let f = self.excess(k);
        let mut h = INITIAL_H;
        for _ in 0..MAX_STEP_WIDENINGS {
            let d = (self.excess(k + h) - f) / h;
            if d != 0.0 {
                return d;
            }
            h *= 10.0;
        }
        0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Solution {
    price: Price,
    k: f64,
    iterations: u32,
    converged: bool,
    path: Vec<Price>,
}

fn solve(market: &Market) -> Solution {
    let mut k = INITIAL_K;
    let mut path = Vec::new();
    for i in 0..MAX_ITERATIONS {
        let f = market.excess(k);
        if f.abs() < TOLERANCE {
            return Solution {
                price: round4(market.price(k)),
                k,
                iterations: i,
                converged: true,
                path,
            };
        }
        let slope = market.derivative(k);
        k -= DAMPING * f / (slope + DERIVATIVE_EPSILON);
        path.push(round4(market.price(k)));
    }
    Solution {
        price: round4(market.price(k)),
        k,
        iterations: MAX_ITERATIONS,
        converged: false,
        path,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NewtonRaphson;

impl ResidualMechanism for NewtonRaphson {
    fn name(&self) -> &'static str {
        "UPNR"
    }

    fn settle_residual(&self, bids: &mut BidSet, ctx: &ResidualContext<'_>) -> ResidualOutcome {
        let mut diagnostics = Diagnostics::new();
        let Some(market) = Market::of(bids) else {
            diagnostics.record_fallback("empty_side");
            return ResidualOutcome::nothing(diagnostics);
        };

        let solution = solve(&market);
        diagnostics.insert("k", solution.k);
        diagnostics.insert("iterations", solution.iterations);
        diagnostics.insert("converged", solution.converged);
        diagnostics.insert("price_path", &solution.path);
        diagnostics.insert("candidate_price", solution.price);
        if !solution.converged {
            diagnostics.record_fallback("max_iterations_reached");
        }

        let price = solution.price;
        if !price.is_finite() || !ctx.bounds().contains(price) {
            diagnostics.insert("rejected", true);
            diagnostics.record_fallback("price_out_of_bounds");
            return ResidualOutcome::nothing(diagnostics);
        }

        let sides = Sides::of(bids);
        let transactions = allocate_at(bids, &sides, Phase::Residual(self.name()), price);
        let mut outcome = ResidualOutcome::from_trades(transactions, sides.short(), diagnostics);
        outcome.price = Some(price);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::market::bids::BidRecord;

    #[test]
    fn balanced_book_converges_immediately() {
        // At k0 every buy clears above and every sell below the mean price.
        let bids = book(&[BidRecord::buy(1, 2.0, 0.22), BidRecord::sell(2, 2.0, 0.14)]);
        let market = Market::of(&bids).unwrap();
        assert_eq!(market.excess(INITIAL_K), 0.0);
        let solution = solve(&market);
        assert!(solution.converged);
        assert_eq!(solution.iterations, 0);
        assert!((solution.price - 0.18).abs() < 1e-4, "price = {}", solution.price);
    }

    #[test]
    fn settles_short_side_at_rounded_price() {
        let mut bids = book(&[
            BidRecord::buy(1, 2.0, 0.22),
            BidRecord::sell(2, 3.0, 0.14),
            BidRecord::sell(3, 1.0, 0.16),
        ]);
        let outcome = settle(&NewtonRaphson, &mut bids, Some(0.2));
        let price = outcome.price.unwrap();
        assert_eq!(price, round4(price));
        assert_eq!(outcome.quantity, Some(2.0));
        assert_eq!(traded(&outcome, Side::Sell), 2.0);
        assert_eq!(outcome.diagnostics.get_bool("rejected"), None);
    }

    #[test]
    fn out_of_bounds_price_rejects_residual_trade() {
        // Mean price around 0.35 lies above the 0.25 ceiling.
        let mut bids = book(&[BidRecord::buy(1, 2.0, 0.50), BidRecord::sell(2, 2.0, 0.20)]);
        let outcome = settle(&NewtonRaphson, &mut bids, Some(0.2));
        assert!(outcome.transactions.is_empty());
        assert_eq!(outcome.quantity, Some(0.0));
        assert_eq!(outcome.diagnostics.get_bool("rejected"), Some(true));
        assert!(outcome.diagnostics.has_fallback("price_out_of_bounds"));
        assert_eq!(bids.remaining_total(Side::Buy), 2.0);
    }

    #[test]
    fn oscillating_solve_stops_at_iteration_cap_and_rejects() {
        // Left over after a 0.01 primary clear of buy 4@0.20 / sell 5@0.01.
        // The step-shaped excess makes k swing further out every iteration.
        let mut bids = book(&[
            BidRecord::buy(2, 5.0, 0.00),
            BidRecord::sell(3, 4.0, 0.19),
            BidRecord::sell(4, 5.0, 0.03),
            BidRecord::sell(5, 1.0, 0.01),
        ]);
        let outcome = settle(&NewtonRaphson, &mut bids, Some(0.01));

        let diag = &outcome.diagnostics;
        assert_eq!(diag.get_bool("converged"), Some(false));
        assert_eq!(diag.get_f64("iterations"), Some(MAX_ITERATIONS as f64));
        assert!(diag.has_fallback("max_iterations_reached"), "fallbacks: {:?}", diag.fallbacks());
        assert!(diag.has_fallback("price_out_of_bounds"), "fallbacks: {:?}", diag.fallbacks());
        assert_eq!(diag.get_bool("rejected"), Some(true));
        assert!(diag.get_f64("k").unwrap() < -1000.0, "k = {:?}", diag.get_f64("k"));
        assert!(outcome.transactions.is_empty());
        assert_eq!(outcome.price, None);
        assert_eq!(bids.remaining_total(Side::Sell), 10.0);
    }
}
