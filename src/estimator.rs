//! Probability estimation capability seam.
//!
//! The language-model reasoning subsystem is an external collaborator:
//! it accepts a market context and returns a probability estimate with
//! a confidence, within a bounded time. Analyzers call through this
//! trait and never block the pipeline on it — timeouts degrade
//! confidence instead (see `agent::analyzer`).

use async_trait::async_trait;

use crate::domain::Market;
use crate::error::Result;

/// A probability estimate for a market resolving YES.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    /// Probability in [0, 1].
    pub probability: f64,
    /// Estimator's own confidence in [0, 1].
    pub confidence: f64,
}

impl Estimate {
    #[must_use]
    pub fn new(probability: f64, confidence: f64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// External probability-estimation capability.
#[async_trait]
pub trait ProbabilityEstimator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Estimate the probability the market resolves YES.
    async fn estimate(&self, market: &Market) -> Result<Estimate>;
}

/// Deterministic estimator anchored to the current mid-price.
///
/// Used in demo mode and tests. Confidence scales with liquidity: a
/// thin market's price carries less information.
pub struct PriorEstimator {
    /// Liquidity at which confidence saturates.
    liquidity_scale: f64,
}

impl PriorEstimator {
    #[must_use]
    pub fn new(liquidity_scale: f64) -> Self {
        Self { liquidity_scale }
    }
}

impl Default for PriorEstimator {
    fn default() -> Self {
        Self::new(10_000.0)
    }
}

#[async_trait]
impl ProbabilityEstimator for PriorEstimator {
    fn name(&self) -> &'static str {
        "prior"
    }

    async fn estimate(&self, market: &Market) -> Result<Estimate> {
        let mid = (market.yes_quote.bid + market.yes_quote.ask)
            / rust_decimal::Decimal::TWO;
        let probability: f64 = mid.try_into().unwrap_or(0.5);
        let liquidity: f64 = market.liquidity.try_into().unwrap_or(0.0);
        let confidence = (liquidity / self.liquidity_scale).clamp(0.1, 0.9);
        Ok(Estimate::new(probability, confidence))
    }
}
