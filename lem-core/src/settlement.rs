//! One round of two-phase settlement: uniform clearing, then a residual
//! mechanism over whatever is left.

use crate::config::SettlementConfig;
use crate::error::SettleResult;
use crate::market::bids::{BidRecord, BidSet};
use crate::market::clearing::clear_uniform;
use crate::market::ledger::{Phase, Transaction, TransactionLedger};
use crate::market::summary::RoundSummary;
use crate::registry::MechanismRegistry;
use crate::residual::{ResidualContext, run_residual};
use crate::types::{Price, QTY_EPSILON, Side};

/// Everything a round produces.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    pub ledger: TransactionLedger,
    pub summary: RoundSummary,
}

/// Settlement driver. Owns the registry; holds no per-round state.
#[derive(Debug, Default)]
pub struct TwoPhaseSettlement {
    registry: MechanismRegistry,
}

impl TwoPhaseSettlement {
    pub fn new(registry: MechanismRegistry) -> Self {
        Self { registry }
    }

    pub fn with_builtin() -> Self {
        Self::new(MechanismRegistry::with_builtin())
    }

    pub fn registry(&self) -> &MechanismRegistry {
        &self.registry
    }

    /// Settle one round of bids.
    ///
    /// Configuration, mechanism and bids are all checked before anything
    /// trades, so an error means nothing was settled.
    pub fn settle(&self, records: &[BidRecord], mechanism_id: &str, config: &SettlementConfig) -> SettleResult<RoundOutcome> {
        config.validate()?;
        let (residual_id, mechanism) = self.registry.entry(mechanism_id)?;
        let mut bids = BidSet::from_records(records)?;

        // === PHASE 1: uniform clearing ===
        let primary = clear_uniform(&mut bids, Phase::Primary);
        let primary_price = primary.price();
        let primary_quantity = primary.quantity();

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "clearing",
            mechanism = mechanism_id,
            bids = bids.len() as u64,
            price = primary_price.unwrap_or(0.0),
            cleared = primary_price.is_some(),
            quantity = primary_quantity,
        );

        let mut ledger = TransactionLedger::new();
        log_trades(&primary.transactions);
        ledger.extend(primary.transactions);

        // === PHASE 2: residual mechanism on a detached view ===
        let mut view = bids.uncovered();
        let uncovered_buy = view.remaining_total(Side::Buy);
        let uncovered_sell = view.remaining_total(Side::Sell);
        let ctx = ResidualContext::new(primary_price, config);
        let outcome = run_residual(mechanism, &mut view, &ctx);

        let mut residual = Vec::with_capacity(outcome.transactions.len());
        for mut t in outcome.transactions {
            let taken = bids.consume_by_id(t.bid_id, t.quantity);
            if taken <= QTY_EPSILON {
                continue;
            }
            t.quantity = taken;
            t.phase = Phase::Residual(residual_id);
            residual.push(t);
        }
        log_trades(&residual);

        let residual_quantity = outcome.quantity.unwrap_or(0.0);
        let residual_price = outcome.price.or(primary_price);
        let residual_prices = distinct_prices(&residual);
        ledger.extend(residual);

        let mut diagnostics = outcome.diagnostics;
        diagnostics.insert("uncovered_buy", uncovered_buy);
        diagnostics.insert("uncovered_sell", uncovered_sell);

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "residual",
            mechanism = mechanism_id,
            price = residual_price.unwrap_or(0.0),
            quantity = residual_quantity,
            uncovered_buy = uncovered_buy,
            uncovered_sell = uncovered_sell,
            fallbacks = diagnostics.fallbacks().len() as u64,
        );

        let summary = RoundSummary {
            primary_price,
            primary_quantity,
            mechanism: mechanism_id.to_string(),
            residual_quantity,
            residual_price,
            residual_prices,
            total_quantity: primary_quantity + residual_quantity,
            diagnostics,
        };
        Ok(RoundOutcome { ledger, summary })
    }
}

/// Distinct trade prices in order of first appearance.
fn distinct_prices(transactions: &[Transaction]) -> Vec<Price> {
    let mut prices: Vec<Price> = Vec::new();
    for t in transactions {
        if !prices.iter().any(|p| (p - t.price).abs() < 1e-12) {
            prices.push(t.price);
        }
    }
    prices
}

#[cfg(feature = "instrument")]
fn log_trades(transactions: &[Transaction]) {
    for t in transactions {
        tracing::info!(
            target: "trade",
            phase = t.phase.label(),
            bid_id = t.bid_id.0,
            side = t.side.as_str(),
            quantity = t.quantity,
            price = t.price,
        );
    }
}

#[cfg(not(feature = "instrument"))]
fn log_trades(_transactions: &[Transaction]) {}
