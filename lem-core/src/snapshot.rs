use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::market::ledger::{Counterparty, Transaction};
use crate::settlement::RoundOutcome;
use crate::types::Side;

// ============================================================================
// Serializable round results for JS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct TradeSnapshot {
    pub bid_id: u64,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    /// "primary" or the residual mechanism identifier.
    pub phase: String,
    /// Matched bid for bilateral mechanisms; None when trading against the pool.
    pub counterparty: Option<u64>,
}

impl From<&Transaction> for TradeSnapshot {
    fn from(t: &Transaction) -> Self {
        Self {
            bid_id: t.bid_id.0,
            side: t.side,
            quantity: t.quantity,
            price: t.price,
            phase: t.phase.label().to_string(),
            counterparty: match t.counterparty {
                Counterparty::Market => None,
                Counterparty::Bid(id) => Some(id.0),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct ParticipantSnapshot {
    pub bid_id: u64,
    pub side: Side,
    pub traded_quantity: f64,
    pub traded_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct RoundSnapshot {
    pub round: u64,
    pub mechanism: String,
    pub primary_price: Option<f64>,
    pub primary_quantity: f64,
    pub residual_price: Option<f64>,
    pub residual_prices: Vec<f64>,
    pub residual_quantity: f64,
    pub total_quantity: f64,
    pub converged: bool,
    pub fallbacks: Vec<String>,
    pub trades: Vec<TradeSnapshot>,
    pub participants: Vec<ParticipantSnapshot>,
    #[tsify(type = "Record<string, unknown>")]
    pub diagnostics: serde_json::Value,
}

impl RoundSnapshot {
    pub fn new(round: u64, outcome: &RoundOutcome) -> Self {
        let summary = &outcome.summary;
        Self {
            round,
            mechanism: summary.mechanism.clone(),
            primary_price: summary.primary_price,
            primary_quantity: summary.primary_quantity,
            residual_price: summary.residual_price,
            residual_prices: summary.residual_prices.clone(),
            residual_quantity: summary.residual_quantity,
            total_quantity: summary.total_quantity,
            converged: summary.converged(),
            fallbacks: summary
                .diagnostics
                .fallbacks()
                .into_iter()
                .map(str::to_string)
                .collect(),
            trades: outcome.ledger.iter().map(TradeSnapshot::from).collect(),
            participants: outcome
                .ledger
                .participant_results()
                .into_iter()
                .map(|p| ParticipantSnapshot {
                    bid_id: p.bid_id.0,
                    side: p.side,
                    traded_quantity: p.quantity,
                    traded_price: p.average_price,
                })
                .collect(),
            diagnostics: serde_json::to_value(&summary.diagnostics).unwrap_or_default(),
        }
    }
}
