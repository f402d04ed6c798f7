use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::types::{Price, Quantity};

// === DIAGNOSTICS ===

/// Open key/value map a mechanism fills with whatever it wants to report.
///
/// Values are JSON so nested data (price paths, per-bid prices) survives the
/// trip to the browser unchanged. Keys are kept sorted for stable output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics(BTreeMap<String, Value>);

pub const FALLBACKS_KEY: &str = "fallbacks";

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Note that a numeric degeneracy was recovered from. Each reason is kept once.
    pub fn record_fallback(&mut self, reason: &str) {
        if self.push_fallback(reason) {
            #[cfg(feature = "instrument")]
            tracing::warn!(target: "fallback", reason = reason);
        }
    }

    pub fn fallbacks(&self) -> Vec<&str> {
        match self.0.get(FALLBACKS_KEY) {
            Some(Value::Array(list)) => list.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn has_fallback(&self, reason: &str) -> bool {
        self.fallbacks().contains(&reason)
    }

    /// Fold another map into this one. Fallback lists are merged, other keys overwritten.
    pub fn merge(&mut self, other: Diagnostics) {
        for (key, value) in other.0 {
            if key == FALLBACKS_KEY {
                if let Value::Array(list) = value {
                    for reason in list.iter().filter_map(Value::as_str) {
                        self.push_fallback(reason);
                    }
                }
            } else {
                self.0.insert(key, value);
            }
        }
    }

    /// Returns whether the reason was new.
    fn push_fallback(&mut self, reason: &str) -> bool {
        let entry = self
            .0
            .entry(FALLBACKS_KEY.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(list) if !list.iter().any(|v| v.as_str() == Some(reason)) => {
                list.push(Value::String(reason.to_string()));
                true
            }
            _ => false,
        }
    }
}

// === ROUND SUMMARY ===

/// Read-only aggregate of one settled round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundSummary {
    /// None when the primary clearing traded nothing.
    pub primary_price: Option<Price>,
    pub primary_quantity: Quantity,
    pub mechanism: String,
    pub residual_quantity: Quantity,
    /// Quantity-weighted mean of the residual trade prices, or the primary
    /// price when nothing traded in the residual phase.
    pub residual_price: Option<Price>,
    /// Distinct residual trade prices in the order they first appeared.
    pub residual_prices: Vec<Price>,
    pub total_quantity: Quantity,
    pub diagnostics: Diagnostics,
}

impl RoundSummary {
    pub fn converged(&self) -> bool {
        self.diagnostics.get_bool("converged").unwrap_or(true)
    }
}
