use crate::types::{Price, QTY_EPSILON, Quantity, Side};

use super::bids::{BidKey, BidSet};
use super::ledger::{Counterparty, Phase, Transaction};

// === UNIFORM PRICE CLEARING ===

/// Price and volume at which aggregate demand and supply intersect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearingPoint {
    pub price: Price,
    pub quantity: Quantity,
}

#[derive(Debug, Clone, Default)]
pub struct ClearingResult {
    /// None if no candidate price trades anything.
    pub point: Option<ClearingPoint>,
    pub transactions: Vec<Transaction>,
}

impl ClearingResult {
    pub fn price(&self) -> Option<Price> {
        self.point.map(|p| p.price)
    }

    pub fn quantity(&self) -> Quantity {
        self.point.map(|p| p.quantity).unwrap_or(0.0)
    }
}

/// Find the volume-maximizing uniform price over the bids' remaining quantities.
///
/// Candidates are the distinct bid prices in ascending order. At each one,
/// demand is the remaining buy quantity priced at or above it and supply the
/// remaining sell quantity priced at or below it. The first candidate with the
/// largest `min(demand, supply)` wins, so ties resolve to the lowest price.
///
/// Does not touch the bids; calling it twice on the same set gives the same answer.
pub fn find_clearing_point(bids: &BidSet) -> Option<ClearingPoint> {
    let buys: Vec<(Price, Quantity)> = bids
        .side(Side::Buy)
        .filter(|(_, b)| !b.is_covered())
        .map(|(_, b)| (b.price, b.remaining()))
        .collect();
    let sells: Vec<(Price, Quantity)> = bids
        .side(Side::Sell)
        .filter(|(_, b)| !b.is_covered())
        .map(|(_, b)| (b.price, b.remaining()))
        .collect();

    if buys.is_empty() || sells.is_empty() {
        return None;
    }

    let mut best: Option<ClearingPoint> = None;
    for price in bids.candidate_prices() {
        let demand: Quantity = buys.iter().filter(|(p, _)| *p >= price).map(|(_, q)| q).sum();
        let supply: Quantity = sells.iter().filter(|(p, _)| *p <= price).map(|(_, q)| q).sum();
        let traded = demand.min(supply);

        let best_quantity = best.map(|b| b.quantity).unwrap_or(0.0);
        if traded > best_quantity + QTY_EPSILON {
            best = Some(ClearingPoint {
                price,
                quantity: traded,
            });
        }
    }

    best
}

/// Clear the book at a single uniform price and consume the matched quantity.
pub fn clear_uniform(bids: &mut BidSet, phase: Phase) -> ClearingResult {
    let Some(point) = find_clearing_point(bids) else {
        return ClearingResult::default();
    };

    let transactions = execute_at(bids, point, phase);
    ClearingResult {
        point: Some(point),
        transactions,
    }
}

/// Allocate `point.quantity` at `point.price` to every bid willing to trade there.
///
/// Sellers go first, cheapest asks first, then buyers from the highest bid
/// down. A bid larger than what is left to allocate is filled partially.
pub fn execute_at(bids: &mut BidSet, point: ClearingPoint, phase: Phase) -> Vec<Transaction> {
    let price = point.price;
    let sellers: Vec<BidKey> = bids
        .sorted_side(Side::Sell)
        .into_iter()
        .filter(|&k| bids[k].price <= price)
        .collect();
    let buyers: Vec<BidKey> = bids
        .sorted_side(Side::Buy)
        .into_iter()
        .filter(|&k| bids[k].price >= price)
        .collect();

    let mut transactions = Vec::with_capacity(sellers.len() + buyers.len());
    for keys in [sellers, buyers] {
        let mut left = point.quantity;
        for key in keys {
            if left <= QTY_EPSILON {
                break;
            }
            let taken = bids.consume(key, left);
            if taken <= 0.0 {
                continue;
            }
            left -= taken;
            let bid = &bids[key];
            transactions.push(Transaction {
                bid_id: bid.id,
                side: bid.side,
                quantity: taken,
                price,
                phase,
                counterparty: Counterparty::Market,
            });
        }
    }

    transactions
}
