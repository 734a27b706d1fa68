//! Opportunity analysis: scoring, vetoes, and estimator-driven edges.
//!
//! The agent consumes detection events from the bus and scores each
//! opportunity with every analyzer that handles its kind. Scores fold
//! into the record pessimistically (the lowest confidence wins);
//! records that land below the configured floor are marked rejected and
//! never traded. Estimator calls are bounded by a timeout: a slow
//! estimator degrades the score instead of stalling the pipeline.
//!
//! A periodic estimation pass also compares the estimator's probability
//! to the quoted price and emits `ProbabilityEdge` and `NewsGap`
//! opportunities of its own.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::bus::{Event, MessageBus, Topic};
use crate::config::AnalyzerConfig;
use crate::domain::{Market, Opportunity, OpportunityKind, Side};
use crate::error::{CapabilityError, Result};
use crate::estimator::ProbabilityEstimator;
use crate::store::KnowledgeStore;

use super::Agent;

/// Estimate-vs-price gap that marks a probability edge.
const PROBABILITY_EDGE_MIN: Decimal = dec!(0.05);
/// Larger gap suggesting unpriced news rather than noise.
const NEWS_GAP_MIN: Decimal = dec!(0.15);
/// Seconds between estimation passes over the market set.
const ESTIMATE_PASS_SECS: u64 = 15;

/// Scores opportunities of the kinds it handles.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &'static str;

    fn handles(&self, kind: OpportunityKind) -> bool;

    /// Confidence in [0, 1] that the opportunity is real and tradable.
    async fn score(&self, opportunity: &Opportunity, market: &Market) -> Result<f64>;
}

/// Re-verifies price-arithmetic opportunities against the latest
/// snapshot. An arbitrage that no longer sums below 1 scores zero.
pub struct ArbitrageAnalyzer;

#[async_trait]
impl Analyzer for ArbitrageAnalyzer {
    fn name(&self) -> &'static str {
        "arbitrage"
    }

    fn handles(&self, kind: OpportunityKind) -> bool {
        matches!(kind, OpportunityKind::Arbitrage | OpportunityKind::TimeDecay)
    }

    async fn score(&self, opportunity: &Opportunity, market: &Market) -> Result<f64> {
        let score = match opportunity.kind() {
            OpportunityKind::Arbitrage => {
                let sum = market.ask_sum();
                if sum >= Decimal::ONE {
                    0.0
                } else {
                    let edge: f64 = (Decimal::ONE - sum).try_into().unwrap_or(0.0);
                    (0.5 + edge * 10.0).min(0.95)
                }
            }
            OpportunityKind::TimeDecay => {
                // Still a favorite, and the entry is still available.
                let ask = market.best_ask(opportunity.side());
                if ask >= opportunity.entry_price() + dec!(0.05) || ask >= Decimal::ONE {
                    0.2
                } else {
                    0.65
                }
            }
            _ => 0.0,
        };
        Ok(score)
    }
}

/// Compares the external probability estimate to the quoted price.
pub struct ProbabilityEdgeAnalyzer {
    estimator: Arc<dyn ProbabilityEstimator>,
}

impl ProbabilityEdgeAnalyzer {
    #[must_use]
    pub fn new(estimator: Arc<dyn ProbabilityEstimator>) -> Self {
        Self { estimator }
    }
}

#[async_trait]
impl Analyzer for ProbabilityEdgeAnalyzer {
    fn name(&self) -> &'static str {
        "probability_edge"
    }

    fn handles(&self, kind: OpportunityKind) -> bool {
        matches!(
            kind,
            OpportunityKind::ProbabilityEdge | OpportunityKind::Liquidity
        )
    }

    async fn score(&self, opportunity: &Opportunity, market: &Market) -> Result<f64> {
        let estimate = self.estimator.estimate(market).await?;
        let side_probability = match opportunity.side() {
            Side::Yes => estimate.probability,
            Side::No => 1.0 - estimate.probability,
        };
        let entry: f64 = opportunity.entry_price().try_into().unwrap_or(1.0);
        // The estimate must still price the side above its cost.
        if side_probability <= entry {
            return Ok(0.0);
        }
        Ok(estimate.confidence)
    }
}

/// Confirms a news-gap detection: the estimate must still sit well
/// above the quote, or the gap has already been traded away.
pub struct NewsGapAnalyzer {
    estimator: Arc<dyn ProbabilityEstimator>,
}

impl NewsGapAnalyzer {
    #[must_use]
    pub fn new(estimator: Arc<dyn ProbabilityEstimator>) -> Self {
        Self { estimator }
    }
}

#[async_trait]
impl Analyzer for NewsGapAnalyzer {
    fn name(&self) -> &'static str {
        "news_gap"
    }

    fn handles(&self, kind: OpportunityKind) -> bool {
        kind == OpportunityKind::NewsGap
    }

    async fn score(&self, opportunity: &Opportunity, market: &Market) -> Result<f64> {
        let estimate = self.estimator.estimate(market).await?;
        let side_probability = match opportunity.side() {
            Side::Yes => estimate.probability,
            Side::No => 1.0 - estimate.probability,
        };
        let ask: f64 = market
            .best_ask(opportunity.side())
            .try_into()
            .unwrap_or(1.0);
        let gap_floor: f64 = NEWS_GAP_MIN.try_into().unwrap_or(0.15);
        if side_probability - ask < gap_floor {
            return Ok(0.0);
        }
        Ok(estimate.confidence)
    }
}

pub struct AnalyzerAgent {
    config: AnalyzerConfig,
    store: Arc<KnowledgeStore>,
    bus: Arc<MessageBus>,
    estimator: Arc<dyn ProbabilityEstimator>,
    analyzers: Vec<Box<dyn Analyzer>>,
}

impl AnalyzerAgent {
    #[must_use]
    pub fn new(
        config: AnalyzerConfig,
        store: Arc<KnowledgeStore>,
        bus: Arc<MessageBus>,
        estimator: Arc<dyn ProbabilityEstimator>,
    ) -> Self {
        let analyzers: Vec<Box<dyn Analyzer>> = vec![
            Box::new(ArbitrageAnalyzer),
            Box::new(ProbabilityEdgeAnalyzer::new(estimator.clone())),
            Box::new(NewsGapAnalyzer::new(estimator.clone())),
        ];
        Self {
            config,
            store,
            bus,
            estimator,
            analyzers,
        }
    }

    /// Score one opportunity with every analyzer that handles its kind,
    /// fold the scores pessimistically, and persist the outcome.
    pub async fn analyze(&self, opportunity: &Opportunity) -> Result<()> {
        let Some(market) = self.store.get_market(opportunity.market_id()) else {
            debug!(market_id = %opportunity.market_id(), "no market snapshot yet, skipping");
            return Ok(());
        };

        let budget = Duration::from_millis(self.config.capability_timeout_millis);
        let mut lowest: Option<f64> = None;
        for analyzer in &self.analyzers {
            if !analyzer.handles(opportunity.kind()) {
                continue;
            }
            let score = match timeout(budget, analyzer.score(opportunity, &market)).await {
                Ok(Ok(score)) => score,
                Ok(Err(e)) => {
                    warn!(analyzer = analyzer.name(), error = %e, "analyzer failed, skipping score");
                    continue;
                }
                Err(_) => {
                    // Degrade instead of stalling the pipeline.
                    let timed_out = CapabilityError::Timeout {
                        millis: self.config.capability_timeout_millis,
                    };
                    let penalized =
                        opportunity.confidence() * self.config.timeout_confidence_penalty;
                    warn!(
                        analyzer = analyzer.name(),
                        error = %timed_out,
                        penalized,
                        "analyzer timed out, degrading confidence"
                    );
                    penalized
                }
            };
            lowest = Some(lowest.map_or(score, |l| l.min(score)));
        }

        let Some(score) = lowest else {
            return Ok(());
        };

        let floor = self.config.confidence_floor;
        self.store
            .update_opportunity_retrying(opportunity.fingerprint(), |o| {
                o.record_score(score);
                if o.confidence() < floor {
                    o.reject();
                }
            })?;
        debug!(
            fingerprint = %opportunity.fingerprint(),
            score,
            "opportunity scored"
        );
        Ok(())
    }

    /// Compare estimates to quotes across all markets, emitting
    /// probability-edge and news-gap opportunities.
    pub async fn estimate_pass(&self) -> Result<usize> {
        let mut detected = 0;
        for market in self.store.markets() {
            let budget = Duration::from_millis(self.config.capability_timeout_millis);
            let estimate = match timeout(budget, self.estimator.estimate(&market)).await {
                Ok(Ok(estimate)) => estimate,
                Ok(Err(e)) => {
                    warn!(market_id = %market.id, error = %e, "estimate failed");
                    continue;
                }
                Err(_) => {
                    let timed_out = CapabilityError::Timeout {
                        millis: self.config.capability_timeout_millis,
                    };
                    warn!(market_id = %market.id, error = %timed_out, "estimate timed out");
                    continue;
                }
            };

            let probability = Decimal::try_from(estimate.probability).unwrap_or(Decimal::ZERO);
            for side in [Side::Yes, Side::No] {
                let side_probability = match side {
                    Side::Yes => probability,
                    Side::No => Decimal::ONE - probability,
                };
                let ask = market.best_ask(side);
                let gap = side_probability - ask;
                if gap < PROBABILITY_EDGE_MIN || ask <= Decimal::ZERO {
                    continue;
                }
                let kind = if gap >= NEWS_GAP_MIN {
                    OpportunityKind::NewsGap
                } else {
                    OpportunityKind::ProbabilityEdge
                };
                let opportunity = Opportunity::new(
                    market.id.clone(),
                    kind,
                    side,
                    ask,
                    gap,
                    estimate.confidence,
                );
                if self.store.upsert_opportunity(opportunity) {
                    detected += 1;
                }
            }
        }
        Ok(detected)
    }
}

#[async_trait]
impl Agent for AnalyzerAgent {
    fn name(&self) -> &'static str {
        "analyzer"
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut subscription = self.bus.subscribe(Topic::Opportunity);
        let mut ticker = interval(Duration::from_secs(ESTIMATE_PASS_SECS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("analyzer started");
        loop {
            tokio::select! {
                event = subscription.recv() => {
                    match event {
                        Some(Event::OpportunityDetected(opportunity)) => {
                            if let Err(e) = self.analyze(&opportunity).await {
                                warn!(error = %e, "analysis failed");
                            }
                        }
                        Some(_) => {}
                        None => return Ok(()),
                    }
                }
                _ = ticker.tick() => {
                    match self.estimate_pass().await {
                        Ok(detected) if detected > 0 => {
                            info!(detected, "estimation pass found edges");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "estimation pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if super::is_shutdown(&shutdown) {
                        info!("analyzer stopped");
                        return Ok(());
                    }
                }
            }
        }
    }
}
