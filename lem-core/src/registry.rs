use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{SettleError, SettleResult};
use crate::residual::{
    AdjustedUniformPrice, AveragePrice, BilateralMediation, CapFloorMidpoint, ExactShapley,
    IterativePriceAdjustment, ModifiedMarginalPrice, NashBargaining, NewtonRaphson, NoResidual,
    ResidualMechanism, SampledShapley, SpreadAdjusted, Vcg, WeightedAverage,
};

// === BUILT-IN MECHANISMS ===

/// The closed set of residual mechanisms shipped with the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MechanismKind {
    /// Primary uniform clearing only.
    Uniform,
    AdjustedUniform,
    AveragePrice,
    CapFloorMidpoint,
    WeightedAverage,
    ModifiedMarginal,
    SpreadAdjusted,
    IterativeAdjustment,
    NewtonRaphson,
    Mediation,
    NashBargaining,
    Vcg,
    ExactShapley,
    SampledShapley,
}

impl MechanismKind {
    pub const ALL: [MechanismKind; 14] = [
        MechanismKind::Uniform,
        MechanismKind::AdjustedUniform,
        MechanismKind::AveragePrice,
        MechanismKind::CapFloorMidpoint,
        MechanismKind::WeightedAverage,
        MechanismKind::ModifiedMarginal,
        MechanismKind::SpreadAdjusted,
        MechanismKind::IterativeAdjustment,
        MechanismKind::NewtonRaphson,
        MechanismKind::Mediation,
        MechanismKind::NashBargaining,
        MechanismKind::Vcg,
        MechanismKind::ExactShapley,
        MechanismKind::SampledShapley,
    ];

    /// Canonical identifier. `Uniform` is also registered as `UP`.
    pub fn as_str(self) -> &'static str {
        match self {
            MechanismKind::Uniform => "uniform",
            MechanismKind::AdjustedUniform => "AUP",
            MechanismKind::AveragePrice => "APM",
            MechanismKind::CapFloorMidpoint => "CFRM",
            MechanismKind::WeightedAverage => "WAM",
            MechanismKind::ModifiedMarginal => "MMP",
            MechanismKind::SpreadAdjusted => "MPAS",
            MechanismKind::IterativeAdjustment => "IPA",
            MechanismKind::NewtonRaphson => "UPNR",
            MechanismKind::Mediation => "MUP",
            MechanismKind::NashBargaining => "NBS",
            MechanismKind::Vcg => "VCG",
            MechanismKind::ExactShapley => "CGT",
            MechanismKind::SampledShapley => "CGTS",
        }
    }

    /// Whether the mechanism always trades the whole short side of a two-sided
    /// residual book. Newton-Raphson may reject the round and AUP may run out
    /// of iterations first.
    pub fn covers_short_side(self) -> bool {
        !matches!(
            self,
            MechanismKind::Uniform | MechanismKind::AdjustedUniform | MechanismKind::NewtonRaphson
        )
    }

    pub fn build(self) -> Box<dyn ResidualMechanism> {
        match self {
            MechanismKind::Uniform => Box::new(NoResidual::new("uniform")),
            MechanismKind::AdjustedUniform => Box::new(AdjustedUniformPrice),
            MechanismKind::AveragePrice => Box::new(AveragePrice),
            MechanismKind::CapFloorMidpoint => Box::new(CapFloorMidpoint),
            MechanismKind::WeightedAverage => Box::new(WeightedAverage),
            MechanismKind::ModifiedMarginal => Box::new(ModifiedMarginalPrice),
            MechanismKind::SpreadAdjusted => Box::new(SpreadAdjusted),
            MechanismKind::IterativeAdjustment => Box::new(IterativePriceAdjustment),
            MechanismKind::NewtonRaphson => Box::new(NewtonRaphson),
            MechanismKind::Mediation => Box::new(BilateralMediation),
            MechanismKind::NashBargaining => Box::new(NashBargaining),
            MechanismKind::Vcg => Box::new(Vcg),
            MechanismKind::ExactShapley => Box::new(ExactShapley),
            MechanismKind::SampledShapley => Box::new(SampledShapley),
        }
    }
}

impl fmt::Display for MechanismKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MechanismKind {
    type Err = SettleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "UP" {
            return Ok(MechanismKind::Uniform);
        }
        MechanismKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| SettleError::UnknownMechanism(s.to_string()))
    }
}

// === REGISTRY ===

/// Identifier to mechanism lookup. Built once per run and shared read-only.
#[derive(Default)]
pub struct MechanismRegistry {
    mechanisms: HashMap<&'static str, Box<dyn ResidualMechanism>>,
}

impl MechanismRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in mechanism, including the `UP` alias.
    pub fn with_builtin() -> Self {
        let mut mechanisms: HashMap<&'static str, Box<dyn ResidualMechanism>> = MechanismKind::ALL
            .into_iter()
            .map(|kind| (kind.as_str(), kind.build()))
            .collect();
        mechanisms.insert("UP", Box::new(NoResidual::new("UP")));
        Self { mechanisms }
    }

    /// Add a mechanism under `identifier`. Its residual trades are tagged
    /// with the identifier, whatever the mechanism's own name.
    pub fn register(&mut self, identifier: &'static str, mechanism: Box<dyn ResidualMechanism>) -> SettleResult<()> {
        if self.mechanisms.contains_key(identifier) {
            return Err(SettleError::DuplicateMechanism(identifier.to_string()));
        }
        self.mechanisms.insert(identifier, mechanism);
        Ok(())
    }

    pub fn resolve(&self, identifier: &str) -> SettleResult<&dyn ResidualMechanism> {
        self.entry(identifier).map(|(_, mechanism)| mechanism)
    }

    /// Like [`resolve`](Self::resolve), also returning the registered identifier.
    pub fn entry(&self, identifier: &str) -> SettleResult<(&'static str, &dyn ResidualMechanism)> {
        self.mechanisms
            .get_key_value(identifier)
            .map(|(&id, m)| (id, m.as_ref()))
            .ok_or_else(|| SettleError::UnknownMechanism(identifier.to_string()))
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.mechanisms.contains_key(identifier)
    }

    /// Registered identifiers, sorted.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.mechanisms.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.mechanisms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mechanisms.is_empty()
    }
}

impl fmt::Debug for MechanismRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MechanismRegistry")
            .field("identifiers", &self.identifiers())
            .finish()
    }
}
