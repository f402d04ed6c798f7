use std::collections::BTreeMap;
use wasm_bindgen::prelude::*;

pub mod config;
pub mod error;
pub mod market;
pub mod offers;
pub mod registry;
pub mod residual;
pub mod settlement;
pub mod snapshot;
pub mod types;

pub use config::SettlementConfig;
pub use error::{SettleError, SettleResult};
pub use market::*;
pub use offers::{TariffWindow, generate_offer, generate_round};
pub use registry::{MechanismKind, MechanismRegistry};
pub use residual::{ResidualContext, ResidualMechanism, ResidualOutcome};
pub use settlement::{RoundOutcome, TwoPhaseSettlement};
pub use snapshot::*;
pub use types::*;

#[cfg(feature = "instrument")]
pub use instrument;

// ============================================================================
// WASM API - Market
// ============================================================================

/// A community market the JS round driver settles step by step.
#[wasm_bindgen]
pub struct Market {
    engine: TwoPhaseSettlement,
    config: SettlementConfig,
    round: u64,
}

#[wasm_bindgen]
impl Market {
    /// `config` is a flat object of numeric settings (`floor`, `ceiling`,
    /// `theta`, ...). Missing keys keep their defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<Market, JsError> {
        // Better panic messages in browser console
        console_error_panic_hook::set_once();

        let config = if config.is_undefined() || config.is_null() {
            SettlementConfig::default()
        } else {
            let map: BTreeMap<String, f64> = serde_wasm_bindgen::from_value(config)?;
            SettlementConfig::from_map(&map)?
        };
        Ok(Self::with_config(config))
    }

    /// Settle one step. `bids` is an array of `{id, side, quantity, price}`.
    #[wasm_bindgen]
    pub fn settle(&mut self, bids: JsValue, mechanism: &str) -> Result<RoundSnapshot, JsError> {
        let records: Vec<BidRecord> = serde_wasm_bindgen::from_value(bids)?;
        Ok(self.settle_records(&records, mechanism)?)
    }

    /// Draw this step's offers from member balances, given as `[[member_id, net_balance], ...]` JSON.
    #[wasm_bindgen]
    pub fn generate_offers(&self, seed: u64, balances_json: &str, fit: f64, tou: f64) -> Result<JsValue, JsError> {
        let balances: Vec<(u64, f64)> = serde_json::from_str(balances_json)?;
        let tariff = TariffWindow::new(fit, tou)?;
        let offers = generate_round(seed, &balances, tariff);
        Ok(serde_wasm_bindgen::to_value(&offers)?)
    }

    /// Identifiers accepted by `settle`.
    #[wasm_bindgen]
    pub fn mechanisms(&self) -> js_sys::Array {
        self.engine
            .registry()
            .identifiers()
            .into_iter()
            .map(JsValue::from_str)
            .collect()
    }

    /// Number of rounds settled so far.
    #[wasm_bindgen]
    pub fn get_round(&self) -> u64 {
        self.round
    }
}

impl Market {
    pub fn with_config(config: SettlementConfig) -> Self {
        Self {
            engine: TwoPhaseSettlement::with_builtin(),
            config,
            round: 0,
        }
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Settle a round and advance the round counter. Failed rounds do not count.
    pub fn settle_records(&mut self, records: &[BidRecord], mechanism: &str) -> SettleResult<RoundSnapshot> {
        let outcome = self.engine.settle(records, mechanism, &self.config)?;
        self.round += 1;
        Ok(RoundSnapshot::new(self.round, &outcome))
    }
}
