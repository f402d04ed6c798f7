//! Settlement configuration.
//!
//! One `SettlementConfig` is built when a simulation run is configured and is
//! read-only afterwards. Every mechanism reads its own parameter block; all
//! blocks are validated together at settlement entry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{SettleError, SettleResult};
use crate::types::{Price, PriceBounds};

// === PARAMETER BLOCKS ===

/// Repeated uniform clearing with price adjustment (`AUP`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjustmentParams {
    /// Fraction by which buy prices rise and sell prices fall per iteration.
    pub step: f64,
    pub max_iterations: u32,
}

impl Default for AdjustmentParams {
    fn default() -> Self {
        Self {
            step: 0.1,
            max_iterations: 10,
        }
    }
}

/// Convergence loop shared by `IPA` and `NBS`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TatonnementParams {
    /// Fraction of the distance to the range midpoint covered per step.
    pub theta: f64,
    /// Stop once the price moves less than this.
    pub epsilon: f64,
}

impl Default for TatonnementParams {
    fn default() -> Self {
        Self {
            theta: 0.1,
            epsilon: 0.01,
        }
    }
}

/// Spread adjustment for `MPAS`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpreadParams {
    pub alpha: f64,
}

impl Default for SpreadParams {
    fn default() -> Self {
        Self { alpha: 0.5 }
    }
}

/// Monte-Carlo Shapley sampling (`CGTS`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub num_samples: u32,
    pub seed: u64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            num_samples: 100,
            seed: 0,
        }
    }
}

// === SETTLEMENT CONFIG ===

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub bounds: PriceBounds,
    pub adjustment: AdjustmentParams,
    pub tatonnement: TatonnementParams,
    pub spread: SpreadParams,
    /// Cap/floor override used by the bargaining mechanisms (VCG, Shapley, Nash).
    pub bargaining: Option<PriceBounds>,
    pub sampling: SamplingParams,
}

/// Keys accepted by [`SettlementConfig::from_map`].
pub const CONFIG_KEYS: [&str; 11] = [
    "floor",
    "ceiling",
    "step",
    "max_iterations",
    "theta",
    "epsilon",
    "alpha",
    "cap",
    "cap_floor",
    "num_samples",
    "seed",
];

impl SettlementConfig {
    pub fn with_bounds(floor: Price, ceiling: Price) -> Self {
        Self {
            bounds: PriceBounds::new(floor, ceiling),
            ..Self::default()
        }
    }

    /// Build a config from the flat key/value map a round driver passes around.
    ///
    /// Missing keys keep their defaults; unknown keys are rejected so a typo
    /// cannot silently fall back to a default.
    pub fn from_map(map: &BTreeMap<String, f64>) -> SettleResult<Self> {
        if let Some(unknown) = map.keys().find(|k| !CONFIG_KEYS.contains(&k.as_str())) {
            return Err(SettleError::config(format!("unrecognized key `{unknown}`")));
        }

        let mut cfg = Self::default();
        if let Some(&v) = map.get("floor") {
            cfg.bounds.floor = v;
        }
        if let Some(&v) = map.get("ceiling") {
            cfg.bounds.ceiling = v;
        }
        if let Some(&v) = map.get("step") {
            cfg.adjustment.step = v;
        }
        if let Some(&v) = map.get("max_iterations") {
            cfg.adjustment.max_iterations = whole_number("max_iterations", v, U32_LIMIT)? as u32;
        }
        if let Some(&v) = map.get("theta") {
            cfg.tatonnement.theta = v;
        }
        if let Some(&v) = map.get("epsilon") {
            cfg.tatonnement.epsilon = v;
        }
        if let Some(&v) = map.get("alpha") {
            cfg.spread.alpha = v;
        }
        if let Some(&v) = map.get("num_samples") {
            cfg.sampling.num_samples = whole_number("num_samples", v, U32_LIMIT)? as u32;
        }
        if let Some(&v) = map.get("seed") {
            cfg.sampling.seed = whole_number("seed", v, U64_LIMIT)?;
        }

        let cap = map.get("cap").copied();
        let cap_floor = map.get("cap_floor").copied();
        if cap.is_some() || cap_floor.is_some() {
            cfg.bargaining = Some(PriceBounds::new(
                cap_floor.unwrap_or(cfg.bounds.floor),
                cap.unwrap_or(cfg.bounds.ceiling),
            ));
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Check every parameter block. Called once per settlement, before any bid is touched.
    pub fn validate(&self) -> SettleResult<()> {
        let PriceBounds { floor, ceiling } = self.bounds;
        if !floor.is_finite() || !ceiling.is_finite() {
            return Err(SettleError::config("price bounds must be finite"));
        }
        if floor > ceiling {
            return Err(SettleError::config(format!(
                "floor {floor} exceeds ceiling {ceiling}"
            )));
        }

        let step = self.adjustment.step;
        if !(0.0..1.0).contains(&step) {
            return Err(SettleError::config(format!("step {step} must lie in [0, 1)")));
        }
        if self.adjustment.max_iterations == 0 {
            return Err(SettleError::config("max_iterations must be at least 1"));
        }

        let theta = self.tatonnement.theta;
        if !(theta > 0.0 && theta <= 1.0) {
            return Err(SettleError::config(format!("theta {theta} must lie in (0, 1]")));
        }
        let epsilon = self.tatonnement.epsilon;
        if !(epsilon > 0.0 && epsilon.is_finite()) {
            return Err(SettleError::config(format!("epsilon {epsilon} must be positive")));
        }

        if !self.spread.alpha.is_finite() {
            return Err(SettleError::config("alpha must be finite"));
        }

        if let Some(bargaining) = &self.bargaining {
            if bargaining.floor > bargaining.ceiling {
                return Err(SettleError::config(format!(
                    "cap_floor {} exceeds cap {}",
                    bargaining.floor, bargaining.ceiling
                )));
            }
            if !self.bounds.encloses(bargaining) {
                return Err(SettleError::config(format!(
                    "cap/floor override [{}, {}] must lie within [{floor}, {ceiling}]",
                    bargaining.floor, bargaining.ceiling
                )));
            }
        }

        if self.sampling.num_samples == 0 {
            return Err(SettleError::config("num_samples must be at least 1"));
        }
        Ok(())
    }

    /// Bounds used by VCG, Shapley and Nash bargaining.
    pub fn bargaining_bounds(&self) -> PriceBounds {
        self.bargaining.unwrap_or(self.bounds)
    }
}

// Exclusive upper limits: 2^32 and 2^64 are exact in f64.
const U32_LIMIT: f64 = u32::MAX as f64 + 1.0;
const U64_LIMIT: f64 = u64::MAX as f64;

fn whole_number(key: &str, value: f64, limit: f64) -> SettleResult<u64> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value < limit {
        Ok(value as u64)
    } else {
        Err(SettleError::config(format!(
            "`{key}` must be a non-negative whole number, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn empty_map_gives_defaults() {
        let cfg = SettlementConfig::from_map(&BTreeMap::new()).unwrap();
        assert_eq!(cfg, SettlementConfig::default());
        assert_eq!(cfg.bargaining_bounds(), cfg.bounds);
    }

    #[test]
    fn seed_accepts_values_past_u32() {
        let cfg = SettlementConfig::from_map(&map(&[("seed", 5_000_000_000.0)])).unwrap();
        assert_eq!(cfg.sampling.seed, 5_000_000_000);

        for key in ["num_samples", "max_iterations"] {
            let err = SettlementConfig::from_map(&map(&[(key, 5_000_000_000.0)])).unwrap_err();
            assert!(matches!(err, SettleError::InvalidConfig(_)), "{key}");
        }
        assert!(SettlementConfig::from_map(&map(&[("seed", 2f64.powi(64))])).is_err());
        assert!(SettlementConfig::from_map(&map(&[("seed", 1.5)])).is_err());
    }

    #[test]
    fn recognized_keys_are_applied() {
        let cfg = SettlementConfig::from_map(&map(&[
            ("floor", 0.08),
            ("ceiling", 0.30),
            ("theta", 0.5),
            ("epsilon", 1e-4),
            ("alpha", 0.25),
            ("num_samples", 250.0),
            ("seed", 7.0),
            ("cap", 0.28),
        ]))
        .unwrap();

        assert_eq!(cfg.bounds, PriceBounds::new(0.08, 0.30));
        assert_eq!(cfg.tatonnement.theta, 0.5);
        assert_eq!(cfg.spread.alpha, 0.25);
        assert_eq!(cfg.sampling.num_samples, 250);
        assert_eq!(cfg.sampling.seed, 7);
        assert_eq!(cfg.bargaining_bounds(), PriceBounds::new(0.08, 0.28));
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = SettlementConfig::from_map(&map(&[("thetta", 0.2)])).unwrap_err();
        assert!(matches!(err, SettleError::InvalidConfig(_)), "got {err:?}");
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        assert!(SettlementConfig::from_map(&map(&[("floor", 0.3), ("ceiling", 0.2)])).is_err());
    }

    #[test]
    fn override_outside_global_bounds_is_rejected() {
        // A cap of 100 over a floor of 10 escapes the tariff band.
        let err = SettlementConfig::from_map(&map(&[("cap", 100.0), ("cap_floor", 10.0)]));
        assert!(err.is_err());
    }

    #[test]
    fn fractional_counts_are_rejected() {
        assert!(SettlementConfig::from_map(&map(&[("num_samples", 2.5)])).is_err());
        assert!(SettlementConfig::from_map(&map(&[("num_samples", 0.0)])).is_err());
        assert!(SettlementConfig::from_map(&map(&[("max_iterations", -1.0)])).is_err());
    }

    #[test]
    fn theta_must_be_a_fraction() {
        assert!(SettlementConfig::from_map(&map(&[("theta", 0.0)])).is_err());
        assert!(SettlementConfig::from_map(&map(&[("theta", 1.5)])).is_err());
        assert!(SettlementConfig::from_map(&map(&[("theta", 1.0)])).is_ok());
    }

    #[test]
    fn deserializes_partial_json() {
        let cfg: SettlementConfig =
            serde_json::from_str(r#"{"bounds":{"floor":0.05,"ceiling":0.4},"spread":{"alpha":0.1}}"#)
                .unwrap();
        assert_eq!(cfg.bounds.ceiling, 0.4);
        assert_eq!(cfg.spread.alpha, 0.1);
        assert_eq!(cfg.tatonnement, TatonnementParams::default());
        cfg.validate().unwrap();
    }
}
