use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::{BidId, Price, Quantity, Side};

// === TRANSACTIONS ===

/// Which clearing phase produced a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    Primary,
    /// Residual phase, tagged with the mechanism identifier.
    Residual(&'static str),
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Primary => "primary",
            Phase::Residual(name) => *name,
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, Phase::Primary)
    }
}

/// The other side of a trade. Aggregate clearing trades against the market as
/// a whole; pairwise mechanisms name the matched bid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Counterparty {
    Market,
    Bid(BidId),
}

/// One leg of an executed trade, recorded against a single bid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub bid_id: BidId,
    pub side: Side,
    pub quantity: Quantity,
    pub price: Price,
    pub phase: Phase,
    pub counterparty: Counterparty,
}

impl Transaction {
    pub fn value(&self) -> f64 {
        self.quantity * self.price
    }
}

// === LEDGER ===

/// Append-only record of every trade in one round.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransactionLedger {
    transactions: Vec<Transaction>,
}

/// What a single bid ended up trading this round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantResult {
    pub bid_id: BidId,
    pub side: Side,
    pub quantity: Quantity,
    /// Quantity-weighted price over all of the bid's legs.
    pub average_price: Price,
}

impl TransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, transaction: Transaction) {
        debug_assert!(transaction.quantity > 0.0, "zero-quantity transaction");
        self.transactions.push(transaction);
    }

    pub fn extend(&mut self, transactions: impl IntoIterator<Item = Transaction>) {
        for t in transactions {
            self.push(t);
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Transaction> {
        self.transactions.iter()
    }

    pub fn as_slice(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn in_phase(&self, primary: bool) -> impl Iterator<Item = &Transaction> + '_ {
        self.transactions
            .iter()
            .filter(move |t| t.phase.is_primary() == primary)
    }

    /// Total quantity traded against one bid across all phases.
    pub fn quantity_for(&self, bid_id: BidId) -> Quantity {
        self.transactions
            .iter()
            .filter(|t| t.bid_id == bid_id)
            .map(|t| t.quantity)
            .sum()
    }

    /// Matched volume of one phase, counted once (on the buy legs).
    pub fn volume(&self, primary: bool) -> Quantity {
        self.in_phase(primary)
            .filter(|t| t.side == Side::Buy)
            .map(|t| t.quantity)
            .sum()
    }

    /// Per-bid traded quantity and average price, ordered by bid id.
    ///
    /// This is what the round driver hands back to each member.
    pub fn participant_results(&self) -> Vec<ParticipantResult> {
        let mut totals: BTreeMap<BidId, (Side, Quantity, f64)> = BTreeMap::new();
        for t in &self.transactions {
            let entry = totals.entry(t.bid_id).or_insert((t.side, 0.0, 0.0));
            entry.1 += t.quantity;
            entry.2 += t.value();
        }
        totals
            .into_iter()
            .map(|(bid_id, (side, quantity, value))| ParticipantResult {
                bid_id,
                side,
                quantity,
                average_price: if quantity > 0.0 { value / quantity } else { 0.0 },
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a TransactionLedger {
    type Item = &'a Transaction;
    type IntoIter = std::slice::Iter<'a, Transaction>;

    fn into_iter(self) -> Self::IntoIter {
        self.transactions.iter()
    }
}
