use crate::market::bids::BidSet;
use crate::market::summary::Diagnostics;

use super::{ResidualContext, ResidualMechanism, ResidualOutcome};

/// Plain uniform price market: whatever the primary clearing leaves stays unmatched.
#[derive(Debug, Clone, Copy)]
pub struct NoResidual {
    name: &'static str,
}

impl NoResidual {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl Default for NoResidual {
    fn default() -> Self {
        Self::new("uniform")
    }
}

impl ResidualMechanism for NoResidual {
    fn name(&self) -> &'static str {
        self.name
    }

    fn settle_residual(&self, _bids: &mut BidSet, ctx: &ResidualContext<'_>) -> ResidualOutcome {
        let mut outcome = ResidualOutcome::nothing(Diagnostics::new());
        outcome.price = ctx.primary_price;
        outcome
    }
}
