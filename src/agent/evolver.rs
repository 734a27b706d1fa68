//! Strategy evolution: mutate the best performer, trial the child, and
//! promote or retire on realized results.
//!
//! Each pass ranks registered strategies by realized win rate over the
//! trailing performance window, derives a child of the best performer
//! with parameters jittered up to 20%, and registers it for trial.
//! A trial child is judged only after it has enough realized trades:
//! if its win rate strictly beats the parent's, the parent is retired;
//! otherwise the child is.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{Config, EvolutionConfig};
use crate::domain::{StrategyBlueprint, TestResults, TradeRecord};
use crate::engine::DemoTradingEngine;
use crate::error::Result;
use crate::store::KnowledgeStore;

use super::generator::backtest;
use super::Agent;

/// Maximum relative parameter perturbation per mutation.
const MUTATION_SPAN: f64 = 0.2;

/// Outcome of judging a trial child against its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Child dominates: retire the parent.
    PromoteChild,
    /// Child underperforms: retire the child.
    RetireChild,
    /// Not enough realized trades yet.
    Wait,
}

/// Judge a trial child. Promotion requires a strictly better win rate
/// over at least the configured sample minimum.
#[must_use]
pub fn judge(child: &TestResults, parent: &TestResults, config: &EvolutionConfig) -> Verdict {
    if child.total_trades < config.min_trial_samples {
        return Verdict::Wait;
    }
    if child.win_rate > parent.win_rate {
        Verdict::PromoteChild
    } else {
        Verdict::RetireChild
    }
}

/// Hard bounds per parameter: mutation cannot drift an edge floor to
/// zero, a confidence floor past certainty, or a liquidity floor into
/// nonsense.
fn parameter_bounds(name: &str) -> (Decimal, Decimal) {
    match name {
        "min_edge" => (dec!(0.005), dec!(0.2)),
        "min_confidence" => (dec!(0.3), dec!(0.95)),
        "min_liquidity" => (dec!(100), dec!(100000)),
        _ => (Decimal::ZERO, Decimal::MAX),
    }
}

/// Jitter every parameter by up to `MUTATION_SPAN`, relative, then
/// clamp to its hard bounds.
fn mutate_parameters(
    rng: &mut StdRng,
    parameters: &BTreeMap<String, Decimal>,
) -> BTreeMap<String, Decimal> {
    parameters
        .iter()
        .map(|(name, value)| {
            let jitter = rng.gen_range(-MUTATION_SPAN..=MUTATION_SPAN);
            let factor = Decimal::try_from(1.0 + jitter).unwrap_or(Decimal::ONE);
            let (floor, ceiling) = parameter_bounds(name);
            (name.clone(), (*value * factor).clamp(floor, ceiling))
        })
        .collect()
}

pub struct EvolverAgent {
    config: Config,
    store: Arc<KnowledgeStore>,
    engine: Arc<DemoTradingEngine>,
    rng: Mutex<StdRng>,
}

impl EvolverAgent {
    #[must_use]
    pub fn new(
        config: Config,
        store: Arc<KnowledgeStore>,
        engine: Arc<DemoTradingEngine>,
        seed: u64,
    ) -> Self {
        Self {
            config,
            store,
            engine,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn trailing_results(&self, strategy: &StrategyBlueprint) -> TestResults {
        let trades = self.engine.closed_trades_for(&strategy.id);
        let window = self.config.evolution.performance_window;
        let trailing: &[TradeRecord] = &trades[trades.len().saturating_sub(window)..];
        backtest(trailing, self.config.trading.initial_capital)
    }

    /// Settle open trials, then mutate the current best performer.
    pub fn evolve_pass(&self) -> Result<usize> {
        self.settle_trials();
        self.mutate_best()
    }

    fn settle_trials(&self) {
        for child in self.store.strategies() {
            let Some(parent_id) = child.parent.clone() else {
                continue;
            };
            let Some(parent) = self.store.get_strategy(&parent_id) else {
                // Parent already retired in an earlier trial.
                continue;
            };
            let child_results = self.trailing_results(&child);
            let parent_results = self.trailing_results(&parent);
            match judge(&child_results, &parent_results, &self.config.evolution) {
                Verdict::PromoteChild => {
                    info!(
                        child = %child.id,
                        parent = %parent.id,
                        child_win_rate = child_results.win_rate,
                        parent_win_rate = parent_results.win_rate,
                        "child promoted, parent retired"
                    );
                    self.store.retire_strategy(&parent_id);
                }
                Verdict::RetireChild => {
                    info!(
                        child = %child.id,
                        child_win_rate = child_results.win_rate,
                        "trial child retired"
                    );
                    self.store.retire_strategy(&child.id);
                }
                Verdict::Wait => {}
            }
        }
    }

    fn mutate_best(&self) -> Result<usize> {
        if self.store.strategy_count() >= self.config.evolution.max_strategies {
            debug!("registry at capacity, skipping mutation");
            return Ok(0);
        }
        let min_samples = self.config.evolution.min_trial_samples;
        let ranked = self
            .store
            .strategies()
            .into_iter()
            // Don't stack trials on a strategy already under one.
            .filter(|s| s.parent.is_none())
            .map(|s| {
                let results = self.trailing_results(&s);
                (s, results)
            })
            .filter(|(_, r)| r.total_trades >= min_samples)
            .max_by(|(_, a), (_, b)| {
                a.win_rate
                    .partial_cmp(&b.win_rate)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        let Some((best, results)) = ranked else {
            return Ok(0);
        };

        let parameters = mutate_parameters(&mut self.rng.lock(), &best.parameters);
        let child = best.child(format!("{}_mut", best.name), parameters);
        info!(
            parent = %best.id,
            child = %child.id,
            parent_win_rate = results.win_rate,
            "registering mutated child for trial"
        );
        self.store.put_strategy(child)?;
        Ok(1)
    }
}

#[async_trait]
impl Agent for EvolverAgent {
    fn name(&self) -> &'static str {
        "evolver"
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = interval(Duration::from_secs(self.config.evolution.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("evolver started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.evolve_pass() {
                        Ok(mutated) if mutated > 0 => {
                            info!(mutated, "evolution pass registered trials");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "evolution pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if super::is_shutdown(&shutdown) {
                        info!("evolver stopped");
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn results(win_rate: f64, total_trades: usize) -> TestResults {
        TestResults {
            win_rate,
            total_return: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.05,
            total_trades,
        }
    }

    #[test]
    fn undertested_child_waits() {
        let config = EvolutionConfig::default();
        let verdict = judge(&results(0.9, 3), &results(0.5, 20), &config);
        assert_eq!(verdict, Verdict::Wait);
    }

    #[test]
    fn dominant_child_is_promoted() {
        let config = EvolutionConfig::default();
        let verdict = judge(&results(0.7, 8), &results(0.6, 20), &config);
        assert_eq!(verdict, Verdict::PromoteChild);
    }

    #[test]
    fn tied_child_is_retired() {
        // Strict dominance: a tie keeps the proven parent.
        let config = EvolutionConfig::default();
        let verdict = judge(&results(0.6, 8), &results(0.6, 20), &config);
        assert_eq!(verdict, Verdict::RetireChild);
    }

    #[test]
    fn mutation_stays_within_span() {
        let mut rng = StdRng::seed_from_u64(7);
        let parameters = BTreeMap::from([
            ("min_edge".to_string(), dec!(0.02)),
            ("min_confidence".to_string(), dec!(0.5)),
        ]);
        for _ in 0..100 {
            let mutated = mutate_parameters(&mut rng, &parameters);
            assert_eq!(mutated.len(), 2);
            for (name, original) in &parameters {
                let value = mutated[name];
                assert!(value >= *original * dec!(0.8) - dec!(0.000001));
                assert!(value <= *original * dec!(1.2) + dec!(0.000001));
            }
        }
    }

    #[test]
    fn mutation_clamps_to_parameter_bounds() {
        let mut rng = StdRng::seed_from_u64(19);
        // Values sitting on their bounds: jitter must not escape them.
        let parameters = BTreeMap::from([
            ("min_edge".to_string(), dec!(0.2)),
            ("min_confidence".to_string(), dec!(0.3)),
            ("min_liquidity".to_string(), dec!(100)),
        ]);
        for _ in 0..100 {
            let mutated = mutate_parameters(&mut rng, &parameters);
            assert!(mutated["min_edge"] <= dec!(0.2));
            assert!(mutated["min_confidence"] >= dec!(0.3));
            assert!(mutated["min_liquidity"] >= dec!(100));
        }
    }
}
