//! Residual mechanisms: pricing rules applied to whatever the primary uniform
//! clearing left uncovered.
//!
//! Every mechanism receives a detached view of the uncovered bids (see
//! [`BidSet::uncovered`]) and reports the trades it made on that view. The
//! settlement applies them to the round's book afterwards.

use crate::config::SettlementConfig;
use crate::market::bids::{Bid, BidKey, BidSet};
use crate::market::ledger::{Counterparty, Phase, Transaction};
use crate::market::summary::Diagnostics;
use crate::types::{Price, PriceBounds, QTY_EPSILON, Quantity, Side};

pub mod adjusted_uniform;
pub mod fixed_price;
pub mod mediation;
pub mod newton;
pub mod none;
pub mod shapley;
pub mod tatonnement;
pub mod vcg;

pub use adjusted_uniform::AdjustedUniformPrice;
pub use fixed_price::{AveragePrice, CapFloorMidpoint, ModifiedMarginalPrice, SpreadAdjusted, WeightedAverage};
pub use mediation::BilateralMediation;
pub use newton::NewtonRaphson;
pub use none::NoResidual;
pub use shapley::{ExactShapley, SampledShapley};
pub use tatonnement::{IterativePriceAdjustment, NashBargaining};
pub use vcg::Vcg;

// === CONTRACT ===

/// A pricing rule for uncovered bids.
///
/// Implementations consume quantity from `bids` through [`BidSet::consume`]
/// and return one transaction per leg. They never see a one-sided book; that
/// case is handled by [`run_residual`].
pub trait ResidualMechanism: Send + Sync {
    /// Identifier stamped on the mechanism's transactions.
    fn name(&self) -> &'static str;

    fn settle_residual(&self, bids: &mut BidSet, ctx: &ResidualContext<'_>) -> ResidualOutcome;
}

/// What a mechanism knows about the round besides the uncovered bids.
#[derive(Debug, Clone, Copy)]
pub struct ResidualContext<'a> {
    /// Primary uniform clearing price; None when the primary phase traded nothing.
    pub primary_price: Option<Price>,
    pub config: &'a SettlementConfig,
}

impl<'a> ResidualContext<'a> {
    pub fn new(primary_price: Option<Price>, config: &'a SettlementConfig) -> Self {
        Self {
            primary_price,
            config,
        }
    }

    pub fn bounds(&self) -> PriceBounds {
        self.config.bounds
    }

    /// Price to start from or fall back to: the primary clearing price, or the
    /// midpoint of the bounds if the primary phase cleared nothing.
    pub fn reference_price(&self, diagnostics: &mut Diagnostics) -> Price {
        match self.primary_price {
            Some(price) => price,
            None => {
                diagnostics.record_fallback("no_primary_price");
                self.bounds().midpoint()
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResidualOutcome {
    pub transactions: Vec<Transaction>,
    /// Reported residual price. None lets the settlement use the primary price.
    pub price: Option<Price>,
    pub quantity: Option<Quantity>,
    pub diagnostics: Diagnostics,
}

impl ResidualOutcome {
    /// No trade, nothing to report beyond `diagnostics`.
    pub fn nothing(diagnostics: Diagnostics) -> Self {
        Self {
            transactions: Vec::new(),
            price: None,
            quantity: Some(0.0),
            diagnostics,
        }
    }

    /// Wrap executed trades; quantity and price are read off the `counted` side's legs.
    pub fn from_trades(transactions: Vec<Transaction>, counted: Side, diagnostics: Diagnostics) -> Self {
        let (quantity, price) = weighted_price(&transactions, counted);
        Self {
            transactions,
            price,
            quantity: Some(quantity),
            diagnostics,
        }
    }
}

/// Run `mechanism` on the uncovered view, unless one side has nothing left.
pub fn run_residual(
    mechanism: &dyn ResidualMechanism,
    bids: &mut BidSet,
    ctx: &ResidualContext<'_>,
) -> ResidualOutcome {
    let buy = bids.remaining_total(Side::Buy);
    let sell = bids.remaining_total(Side::Sell);
    if buy <= QTY_EPSILON || sell <= QTY_EPSILON {
        let mut diagnostics = Diagnostics::new();
        diagnostics.insert("skipped", "one_sided");
        diagnostics.record_fallback("empty_side");
        return ResidualOutcome {
            transactions: Vec::new(),
            price: ctx.primary_price,
            quantity: Some(0.0),
            diagnostics,
        };
    }

    mechanism.settle_residual(bids, ctx)
}

// === SHARED HELPERS ===

/// Uncovered bids split by side in price priority.
#[derive(Debug, Clone)]
pub(crate) struct Sides {
    pub buys: Vec<BidKey>,
    pub sells: Vec<BidKey>,
    /// Buys when they outweigh sells strictly, sells otherwise.
    pub long: Side,
}

impl Sides {
    pub fn of(bids: &BidSet) -> Self {
        let long = if bids.remaining_total(Side::Buy) > bids.remaining_total(Side::Sell) {
            Side::Buy
        } else {
            Side::Sell
        };
        Self {
            buys: bids.sorted_side(Side::Buy),
            sells: bids.sorted_side(Side::Sell),
            long,
        }
    }

    pub fn short(&self) -> Side {
        self.long.opposite()
    }

    pub fn keys(&self, side: Side) -> &[BidKey] {
        match side {
            Side::Buy => &self.buys,
            Side::Sell => &self.sells,
        }
    }

    pub fn max_buy(&self, bids: &BidSet) -> Option<Price> {
        self.buys.first().map(|&k| bids[k].price)
    }

    pub fn min_sell(&self, bids: &BidSet) -> Option<Price> {
        self.sells.first().map(|&k| bids[k].price)
    }
}

fn leg(bid: &Bid, quantity: Quantity, price: Price, phase: Phase, counterparty: Counterparty) -> Transaction {
    Transaction {
        bid_id: bid.id,
        side: bid.side,
        quantity,
        price,
        phase,
        counterparty,
    }
}

/// Short side trades its whole remaining quantity; the same amount is then
/// spread greedily over the long side in price order.
///
/// `price_for` prices each leg from the bid it belongs to.
pub(crate) fn allocate_short_then_long(
    bids: &mut BidSet,
    sides: &Sides,
    phase: Phase,
    mut price_for: impl FnMut(&Bid) -> Price,
) -> Vec<Transaction> {
    let mut transactions = Vec::new();

    let mut traded = 0.0;
    for &key in sides.keys(sides.short()) {
        let price = price_for(&bids[key]);
        let want = bids[key].remaining();
        let taken = bids.consume(key, want);
        if taken > 0.0 {
            traded += taken;
            transactions.push(leg(&bids[key], taken, price, phase, Counterparty::Market));
        }
    }

    let mut left = traded;
    for &key in sides.keys(sides.long) {
        if left <= QTY_EPSILON {
            break;
        }
        let price = price_for(&bids[key]);
        let taken = bids.consume(key, left);
        if taken > 0.0 {
            left -= taken;
            transactions.push(leg(&bids[key], taken, price, phase, Counterparty::Market));
        }
    }

    transactions
}

/// Common allocation at one price for every leg.
pub(crate) fn allocate_at(bids: &mut BidSet, sides: &Sides, phase: Phase, price: Price) -> Vec<Transaction> {
    allocate_short_then_long(bids, sides, phase, |_| price)
}

/// Match buys (highest first) against sells (lowest first) one pair at a time.
///
/// Each pair trades the smaller of the two remaining quantities; whichever bid
/// is exhausted is dropped and the walk moves on. `price_for` prices a pair
/// and may return different prices for the buy and sell legs.
pub(crate) fn match_pairs(
    bids: &mut BidSet,
    sides: &Sides,
    phase: Phase,
    mut price_for: impl FnMut(&Bid, &Bid) -> (Price, Price),
) -> Vec<Transaction> {
    let mut transactions = Vec::new();
    let (mut b, mut s) = (0, 0);

    while b < sides.buys.len() && s < sides.sells.len() {
        let (buy_key, sell_key) = (sides.buys[b], sides.sells[s]);
        let quantity = bids[buy_key].remaining().min(bids[sell_key].remaining());
        if quantity > QTY_EPSILON {
            let (buy_price, sell_price) = price_for(&bids[buy_key], &bids[sell_key]);
            let buy_taken = bids.consume(buy_key, quantity);
            let sell_taken = bids.consume(sell_key, quantity);
            let (buyer, seller) = (&bids[buy_key], &bids[sell_key]);
            transactions.push(leg(buyer, buy_taken, buy_price, phase, Counterparty::Bid(seller.id)));
            transactions.push(leg(seller, sell_taken, sell_price, phase, Counterparty::Bid(buyer.id)));
        }
        if bids[buy_key].is_covered() {
            b += 1;
        }
        if bids[sell_key].is_covered() {
            s += 1;
        }
    }

    transactions
}

/// Total quantity and quantity-weighted price over the legs of one side.
pub(crate) fn weighted_price(transactions: &[Transaction], side: Side) -> (Quantity, Option<Price>) {
    let (quantity, value) = transactions
        .iter()
        .filter(|t| t.side == side)
        .fold((0.0, 0.0), |(q, v), t| (q + t.quantity, v + t.value()));
    if quantity > QTY_EPSILON {
        (quantity, Some(value / quantity))
    } else {
        (0.0, None)
    }
}

/// Prices quoted to four decimals.
pub(crate) fn round4(price: Price) -> Price {
    (price * 1e4).round() / 1e4
}

pub(crate) fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.into_iter().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Social welfare of a coalition: what its buyers bid minus what its sellers ask.
pub(crate) fn welfare<'a>(bids: &'a BidSet, members: impl IntoIterator<Item = &'a BidKey>) -> f64 {
    members
        .into_iter()
        .map(|&k| {
            let bid = &bids[k];
            match bid.side {
                Side::Buy => bid.price,
                Side::Sell => -bid.price,
            }
        })
        .sum()
}

/// Lowest and highest price among the uncovered bids.
pub(crate) fn price_range(bids: &BidSet) -> Option<(Price, Price)> {
    bids.iter()
        .filter(|(_, b)| !b.is_covered())
        .map(|(_, b)| b.price)
        .fold(None, |acc, p| match acc {
            None => Some((p, p)),
            Some((lo, hi)) => Some((lo.min(p), hi.max(p))),
        })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::market::bids::BidRecord;

    pub fn book(records: &[BidRecord]) -> BidSet {
        BidSet::from_records(records).unwrap()
    }

    pub fn settle(mechanism: &dyn ResidualMechanism, bids: &mut BidSet, primary: Option<Price>) -> ResidualOutcome {
        let config = SettlementConfig::default();
        run_residual(mechanism, bids, &ResidualContext::new(primary, &config))
    }

    pub fn settle_with(
        mechanism: &dyn ResidualMechanism,
        bids: &mut BidSet,
        primary: Option<Price>,
        config: &SettlementConfig,
    ) -> ResidualOutcome {
        run_residual(mechanism, bids, &ResidualContext::new(primary, config))
    }

    pub fn traded(outcome: &ResidualOutcome, side: Side) -> Quantity {
        outcome
            .transactions
            .iter()
            .filter(|t| t.side == side)
            .map(|t| t.quantity)
            .sum()
    }
}
