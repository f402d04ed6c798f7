pub mod bids;
pub mod clearing;
pub mod ledger;
pub mod summary;

pub use bids::{Bid, BidKey, BidRecord, BidSet};
pub use clearing::{ClearingPoint, ClearingResult, clear_uniform, execute_at, find_clearing_point};
pub use ledger::{Counterparty, ParticipantResult, Phase, Transaction, TransactionLedger};
pub use summary::{Diagnostics, RoundSummary};
