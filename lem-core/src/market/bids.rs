use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};

use crate::error::{SettleError, SettleResult};
use crate::types::{BidId, Price, QTY_EPSILON, Quantity, Side};

// === BID RECORDS (external input) ===

/// One offer as submitted by the round driver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BidRecord {
    pub id: BidId,
    pub side: Side,
    pub quantity: Quantity,
    pub price: Price,
}

impl BidRecord {
    pub fn buy(id: u64, quantity: Quantity, price: Price) -> Self {
        Self {
            id: BidId(id),
            side: Side::Buy,
            quantity,
            price,
        }
    }

    pub fn sell(id: u64, quantity: Quantity, price: Price) -> Self {
        Self {
            id: BidId(id),
            side: Side::Sell,
            quantity,
            price,
        }
    }
}

// === BIDS ===

new_key_type! {
    pub struct BidKey;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bid {
    pub id: BidId,
    pub side: Side,
    /// Quantity originally offered. Never changes during a round.
    pub quantity: Quantity,
    pub price: Price,
    remaining: Quantity,
}

impl Bid {
    pub fn remaining(&self) -> Quantity {
        self.remaining
    }

    pub fn is_covered(&self) -> bool {
        self.remaining <= QTY_EPSILON
    }
}

// === BID SET ===

/// All bids of one round, in submission order.
///
/// Bids live in a slotmap arena; `order` keeps submission order and `index`
/// resolves external ids. Phases consume quantity through [`BidSet::consume`],
/// which is the only way `remaining` changes.
#[derive(Debug, Clone, Default)]
pub struct BidSet {
    bids: SlotMap<BidKey, Bid>,
    order: Vec<BidKey>,
    index: HashMap<BidId, BidKey>,
}

impl BidSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and load a round's submissions.
    pub fn from_records(records: &[BidRecord]) -> SettleResult<Self> {
        let mut set = Self::new();
        for record in records {
            set.insert(*record)?;
        }
        Ok(set)
    }

    pub fn insert(&mut self, record: BidRecord) -> SettleResult<BidKey> {
        if !(record.quantity.is_finite() && record.quantity > 0.0) {
            return Err(SettleError::bid(
                record.id,
                format!("quantity must be positive, got {}", record.quantity),
            ));
        }
        if !record.price.is_finite() {
            return Err(SettleError::bid(record.id, "price must be finite"));
        }
        if self.index.contains_key(&record.id) {
            return Err(SettleError::DuplicateBid(record.id));
        }

        Ok(self.insert_unchecked(Bid {
            id: record.id,
            side: record.side,
            quantity: record.quantity,
            price: record.price,
            remaining: record.quantity,
        }))
    }

    fn insert_unchecked(&mut self, bid: Bid) -> BidKey {
        let id = bid.id;
        let key = self.bids.insert(bid);
        self.order.push(key);
        self.index.insert(id, key);
        key
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, key: BidKey) -> Option<&Bid> {
        self.bids.get(key)
    }

    pub fn key_of(&self, id: BidId) -> Option<BidKey> {
        self.index.get(&id).copied()
    }

    pub fn by_id(&self, id: BidId) -> Option<&Bid> {
        self.key_of(id).and_then(|key| self.bids.get(key))
    }

    /// Bids in submission order.
    pub fn iter(&self) -> impl Iterator<Item = (BidKey, &Bid)> + '_ {
        self.order.iter().filter_map(|&key| self.bids.get(key).map(|b| (key, b)))
    }

    pub fn keys(&self) -> impl Iterator<Item = BidKey> + '_ {
        self.order.iter().copied()
    }

    pub fn side(&self, side: Side) -> impl Iterator<Item = (BidKey, &Bid)> + '_ {
        self.iter().filter(move |(_, b)| b.side == side)
    }

    /// Aggregate remaining quantity on one side.
    pub fn remaining_total(&self, side: Side) -> Quantity {
        self.side(side).map(|(_, b)| b.remaining).sum()
    }

    /// Keys of one side sorted by price: buys descending, sells ascending.
    ///
    /// Ties keep submission order. Bids with nothing left are skipped.
    pub fn sorted_side(&self, side: Side) -> Vec<BidKey> {
        let mut keys: Vec<BidKey> = self
            .side(side)
            .filter(|(_, b)| !b.is_covered())
            .map(|(k, _)| k)
            .collect();
        keys.sort_by(|&a, &b| {
            let pa = self.bids[a].price;
            let pb = self.bids[b].price;
            match side {
                Side::Buy => pb.total_cmp(&pa),
                Side::Sell => pa.total_cmp(&pb),
            }
        });
        keys
    }

    /// Take up to `quantity` from a bid's remaining quantity.
    ///
    /// Returns the amount actually taken, which is smaller than requested
    /// when the bid has less left. Unknown keys take nothing.
    pub fn consume(&mut self, key: BidKey, quantity: Quantity) -> Quantity {
        let Some(bid) = self.bids.get_mut(key) else {
            return 0.0;
        };
        let taken = quantity.max(0.0).min(bid.remaining);
        bid.remaining -= taken;
        if bid.remaining <= QTY_EPSILON {
            bid.remaining = 0.0;
        }
        taken
    }

    pub fn consume_by_id(&mut self, id: BidId, quantity: Quantity) -> Quantity {
        match self.key_of(id) {
            Some(key) => self.consume(key, quantity),
            None => 0.0,
        }
    }

    /// A fresh set holding only the bids with quantity left.
    ///
    /// Each bid keeps its original quantity and current remaining quantity, so
    /// a phase working on the view can never allocate more than the bid has
    /// left. The returned set has its own keys.
    pub fn uncovered(&self) -> BidSet {
        let mut view = BidSet::new();
        for (_, bid) in self.iter().filter(|(_, b)| !b.is_covered()) {
            view.insert_unchecked(bid.clone());
        }
        view
    }

    /// A copy whose prices have been rewritten by `f`; remaining quantities are kept.
    pub fn repriced(&self, mut f: impl FnMut(&Bid) -> Price) -> BidSet {
        let mut copy = BidSet::new();
        for (_, bid) in self.iter() {
            let mut bid = bid.clone();
            bid.price = f(&bid);
            copy.insert_unchecked(bid);
        }
        copy
    }

    /// Distinct prices of all bids with quantity left, ascending.
    pub fn candidate_prices(&self) -> Vec<Price> {
        let mut prices: Vec<Price> = self
            .iter()
            .filter(|(_, b)| !b.is_covered())
            .map(|(_, b)| b.price)
            .collect();
        prices.sort_by(|a, b| a.total_cmp(b));
        prices.dedup_by(|a, b| (*a - *b).abs() < 1e-12);
        prices
    }
}

impl std::ops::Index<BidKey> for BidSet {
    type Output = Bid;

    fn index(&self, key: BidKey) -> &Bid {
        &self.bids[key]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BidSet {
        BidSet::from_records(&[
            BidRecord::buy(1, 10.0, 0.30),
            BidRecord::buy(2, 5.0, 0.20),
            BidRecord::sell(3, 8.0, 0.10),
            BidRecord::sell(4, 10.0, 0.25),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_non_positive_quantity() {
        let err = BidSet::from_records(&[BidRecord::buy(1, 0.0, 0.2)]).unwrap_err();
        assert!(matches!(err, SettleError::InvalidBid { .. }), "got {err:?}");

        let err = BidSet::from_records(&[BidRecord::sell(1, -3.0, 0.2)]).unwrap_err();
        assert!(matches!(err, SettleError::InvalidBid { .. }), "got {err:?}");
    }

    #[test]
    fn rejects_non_finite_price() {
        assert!(BidSet::from_records(&[BidRecord::buy(1, 1.0, f64::NAN)]).is_err());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = BidSet::from_records(&[BidRecord::buy(7, 1.0, 0.2), BidRecord::sell(7, 1.0, 0.1)])
            .unwrap_err();
        assert_eq!(err, SettleError::DuplicateBid(BidId(7)));
    }

    #[test]
    fn sorted_sides_follow_price_priority() {
        let set = sample();
        let buys: Vec<u64> = set.sorted_side(Side::Buy).iter().map(|&k| set[k].id.0).collect();
        let sells: Vec<u64> = set.sorted_side(Side::Sell).iter().map(|&k| set[k].id.0).collect();
        assert_eq!(buys, vec![1, 2]);
        assert_eq!(sells, vec![3, 4]);
    }

    #[test]
    fn consume_never_goes_negative() {
        let mut set = sample();
        let key = set.key_of(BidId(2)).unwrap();
        assert_eq!(set.consume(key, 3.0), 3.0);
        assert_eq!(set.consume(key, 3.0), 2.0);
        assert_eq!(set[key].remaining(), 0.0);
        assert!(set[key].is_covered());
        assert_eq!(set.consume(key, 1.0), 0.0);
    }

    #[test]
    fn uncovered_view_keeps_remaining_and_drops_covered() {
        let mut set = sample();
        set.consume_by_id(BidId(3), 8.0);
        set.consume_by_id(BidId(4), 2.0);

        let view = set.uncovered();
        assert_eq!(view.len(), 3);
        assert!(view.by_id(BidId(3)).is_none());
        let four = view.by_id(BidId(4)).unwrap();
        assert_eq!(four.quantity, 10.0);
        assert_eq!(four.remaining(), 8.0);
        assert_eq!(view.remaining_total(Side::Sell), 8.0);
        assert_eq!(view.remaining_total(Side::Buy), 15.0);

        // The view is detached from the original.
        let mut view = view;
        view.consume_by_id(BidId(4), 8.0);
        assert_eq!(set.by_id(BidId(4)).unwrap().remaining(), 8.0);
    }

    #[test]
    fn candidate_prices_are_sorted_and_unique() {
        let set = BidSet::from_records(&[
            BidRecord::buy(1, 1.0, 0.2),
            BidRecord::sell(2, 1.0, 0.2),
            BidRecord::sell(3, 1.0, 0.1),
        ])
        .unwrap();
        assert_eq!(set.candidate_prices(), vec![0.1, 0.2]);
    }
}
