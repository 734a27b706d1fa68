//! Strategy generation: seed blueprints, history fitting, and the
//! registration gate.
//!
//! The generator seeds one default blueprint per strategy family, then
//! periodically refits candidates from realized trade history. A
//! candidate with history must pass the registration gate (win rate
//! above the configured minimum, drawdown under the cap) before it is
//! registered; seed blueprints are exempt because there is nothing to
//! test them against yet.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{Config, EvolutionConfig};
use crate::domain::{
    RiskParams, RuleSet, StrategyBlueprint, StrategyId, StrategyKind, TestResults, TradeRecord,
};
use crate::engine::DemoTradingEngine;
use crate::error::{Result, ValidationError};
use crate::store::KnowledgeStore;

use super::Agent;

const ALL_KINDS: [StrategyKind; 5] = [
    StrategyKind::Arbitrage,
    StrategyKind::NewsDriven,
    StrategyKind::ProbabilityEdge,
    StrategyKind::TimeDecay,
    StrategyKind::Liquidity,
];

/// The stock blueprint for a strategy family.
#[must_use]
pub fn default_blueprint(kind: StrategyKind, config: &Config) -> StrategyBlueprint {
    let (name, description, entry) = match kind {
        StrategyKind::Arbitrage => (
            "arb_sum",
            "Buy the cheaper side when both asks sum below the threshold",
            format!("ask_sum < {}", config.scanner.arbitrage_threshold),
        ),
        StrategyKind::NewsDriven => (
            "news_gap",
            "Buy a side the estimator prices well above its quote",
            "estimate - ask >= 0.15".to_string(),
        ),
        StrategyKind::ProbabilityEdge => (
            "prob_edge",
            "Buy a side the estimator prices moderately above its quote",
            "estimate - ask >= 0.05".to_string(),
        ),
        StrategyKind::TimeDecay => (
            "decay_favorite",
            "Ride a strong favorite into resolution",
            format!(
                "hours_to_resolution <= {} AND ask >= {}",
                config.scanner.time_decay_window_hours, config.scanner.favorite_threshold
            ),
        ),
        StrategyKind::Liquidity => (
            "thin_skew",
            "Fade skewed prices in thin markets",
            format!("liquidity < {}", config.scanner.low_liquidity_threshold),
        ),
    };
    StrategyBlueprint {
        id: StrategyId::generate(),
        name: name.to_string(),
        description: description.to_string(),
        strategy_type: kind,
        parameters: BTreeMap::from([
            ("min_edge".to_string(), dec!(0.02)),
            ("min_confidence".to_string(), dec!(0.5)),
            (
                "min_liquidity".to_string(),
                config.scanner.low_liquidity_threshold,
            ),
        ]),
        entry_rules: RuleSet {
            yes: vec![entry.clone()],
            no: vec![entry],
        },
        exit_rules: RuleSet {
            yes: vec!["take_profit OR stop_loss OR near_resolution".to_string()],
            no: vec!["take_profit OR stop_loss OR near_resolution".to_string()],
        },
        risk_management: RiskParams {
            stop_loss_pct: dec!(0.1),
            take_profit_pct: dec!(0.2),
            max_position_size: config.trading.max_position_size,
            max_drawdown: config.trading.max_drawdown,
        },
        test_results: None,
        parent: None,
        created_at: chrono::Utc::now(),
    }
}

/// Replay realized trades, oldest first, into a performance summary.
#[must_use]
pub fn backtest(trades: &[TradeRecord], initial_capital: Decimal) -> TestResults {
    let realized: Vec<Decimal> = trades
        .iter()
        .filter(|t| !t.pnl.is_zero())
        .map(|t| t.pnl)
        .collect();
    if realized.is_empty() {
        return TestResults {
            win_rate: 0.0,
            total_return: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
            total_trades: 0,
        };
    }

    let total = realized.len();
    let wins = realized.iter().filter(|p| **p > Decimal::ZERO).count();
    let total_pnl: Decimal = realized.iter().copied().sum();

    let mut equity = initial_capital;
    let mut peak = initial_capital;
    let mut max_drawdown = 0.0_f64;
    for pnl in &realized {
        equity += *pnl;
        if equity > peak {
            peak = equity;
        } else if !peak.is_zero() {
            let dd: f64 = ((peak - equity) / peak).try_into().unwrap_or(0.0);
            max_drawdown = max_drawdown.max(dd);
        }
    }

    let returns: Vec<f64> = realized
        .iter()
        .map(|p| (*p / initial_capital).try_into().unwrap_or(0.0))
        .collect();
    let mean = returns.iter().sum::<f64>() / total as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / total as f64;
    let sharpe_ratio = if variance > 0.0 {
        mean / variance.sqrt() * (total as f64).sqrt()
    } else {
        0.0
    };

    TestResults {
        win_rate: wins as f64 / total as f64,
        total_return: (total_pnl / initial_capital).try_into().unwrap_or(0.0),
        sharpe_ratio,
        max_drawdown,
        total_trades: total,
    }
}

/// Whether tested results clear the registration gate.
#[must_use]
pub fn passes_gate(results: &TestResults, config: &EvolutionConfig) -> bool {
    results.total_trades >= config.min_trial_samples
        && results.win_rate > config.min_win_rate
        && results.max_drawdown < config.max_drawdown
}

/// Gate a named candidate, reporting the failing numbers.
fn check_gate(
    name: &str,
    results: &TestResults,
    config: &EvolutionConfig,
) -> std::result::Result<(), ValidationError> {
    if passes_gate(results, config) {
        Ok(())
    } else {
        Err(ValidationError::BlueprintRejected {
            name: name.to_string(),
            reason: format!(
                "win_rate {:.2}, max_drawdown {:.2}, trades {}",
                results.win_rate, results.max_drawdown, results.total_trades
            ),
        })
    }
}

pub struct GeneratorAgent {
    config: Config,
    store: Arc<KnowledgeStore>,
    engine: Arc<DemoTradingEngine>,
}

impl GeneratorAgent {
    #[must_use]
    pub fn new(config: Config, store: Arc<KnowledgeStore>, engine: Arc<DemoTradingEngine>) -> Self {
        Self { config, store, engine }
    }

    /// Register a default blueprint for every family not yet covered.
    pub fn seed_defaults(&self) -> Result<usize> {
        let covered: Vec<StrategyKind> = self
            .store
            .strategies()
            .iter()
            .map(|s| s.strategy_type)
            .collect();
        let mut seeded = 0;
        for kind in ALL_KINDS {
            if covered.contains(&kind) {
                continue;
            }
            if self.store.strategy_count() >= self.config.evolution.max_strategies {
                break;
            }
            let blueprint = default_blueprint(kind, &self.config);
            info!(strategy_id = %blueprint.id, name = %blueprint.name, "seeding default blueprint");
            self.store.put_strategy(blueprint)?;
            seeded += 1;
        }
        Ok(seeded)
    }

    /// Refit candidates from realized history and register those that
    /// clear the gate.
    pub fn generate_pass(&self) -> Result<usize> {
        let mut registered = 0;
        for existing in self.store.strategies() {
            if self.store.strategy_count() >= self.config.evolution.max_strategies {
                break;
            }
            let trades = self.engine.closed_trades_for(&existing.id);
            if trades.len() < self.config.evolution.min_trial_samples {
                continue;
            }
            let window = self.config.evolution.performance_window;
            let trailing = &trades[trades.len().saturating_sub(window)..];
            let candidate = self.fitted_candidate(&existing, trailing);
            let results = backtest(trailing, self.config.trading.initial_capital);
            if let Err(rejected) = check_gate(&candidate.name, &results, &self.config.evolution) {
                debug!(error = %rejected, "candidate failed the registration gate");
                continue;
            }
            let mut candidate = candidate;
            candidate.test_results = Some(results);
            info!(
                strategy_id = %candidate.id,
                name = %candidate.name,
                win_rate = results.win_rate,
                "registering fitted blueprint"
            );
            self.store.put_strategy(candidate)?;
            registered += 1;
        }
        Ok(registered)
    }

    /// Derive a fresh candidate with parameters fitted to the trailing
    /// window: a weak win rate raises the confidence bar, a strong one
    /// relaxes the edge requirement.
    fn fitted_candidate(
        &self,
        existing: &StrategyBlueprint,
        trailing: &[TradeRecord],
    ) -> StrategyBlueprint {
        let mut candidate = default_blueprint(existing.strategy_type, &self.config);
        candidate.name = format!("{}_fit", existing.name);

        let wins = trailing.iter().filter(|t| t.pnl > Decimal::ZERO).count();
        let win_rate = wins as f64 / trailing.len() as f64;
        let target = self.config.evolution.min_win_rate;
        let shortfall = Decimal::try_from(target - win_rate).unwrap_or(Decimal::ZERO);

        let min_confidence = (dec!(0.5) + shortfall).clamp(dec!(0.4), dec!(0.9));
        candidate
            .parameters
            .insert("min_confidence".to_string(), min_confidence);
        if shortfall < Decimal::ZERO {
            candidate.parameters.insert("min_edge".to_string(), dec!(0.015));
        }
        candidate
    }
}

#[async_trait]
impl Agent for GeneratorAgent {
    fn name(&self) -> &'static str {
        "generator"
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if let Err(e) = self.seed_defaults() {
            warn!(error = %e, "seeding defaults failed");
        }
        let mut ticker = interval(Duration::from_secs(self.config.evolution.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("generator started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.generate_pass() {
                        Ok(registered) if registered > 0 => {
                            info!(registered, "generation pass registered blueprints");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "generation pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if super::is_shutdown(&shutdown) {
                        info!("generator stopped");
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
    use crate::bus::MessageBus;
    use crate::domain::{MarketId, Side};
    use crate::feed::SimulatedFeed;
    use crate::risk::RiskManager;

    fn make_agent(max_strategies: usize) -> GeneratorAgent {
        let mut config = Config::default();
        config.evolution.max_strategies = max_strategies;
        let bus = Arc::new(MessageBus::new(64));
        let store = Arc::new(KnowledgeStore::new(bus.clone()));
        let risk = Arc::new(RiskManager::new(config.trading.clone()));
        let feed = Arc::new(SimulatedFeed::new(1, Decimal::ZERO));
        let engine = Arc::new(DemoTradingEngine::new(
            config.trading.clone(),
            risk,
            store.clone(),
            bus,
            feed,
        ));
        GeneratorAgent::new(config, store, engine)
    }

    fn exit_trade(pnl: Decimal) -> TradeRecord {
        TradeRecord::new(
            MarketId::from("m1"),
            StrategyId::from("s1"),
            Side::Yes,
            dec!(0.5),
            dec!(100),
            pnl,
        )
    }

    #[test]
    fn default_blueprint_carries_portfolio_limits() {
        let config = Config::default();
        let blueprint = default_blueprint(StrategyKind::Arbitrage, &config);
        assert_eq!(blueprint.risk_management.stop_loss_pct, dec!(0.1));
        assert_eq!(blueprint.risk_management.take_profit_pct, dec!(0.2));
        assert_eq!(blueprint.risk_management.max_position_size, dec!(0.2));
        assert!(blueprint.parent.is_none());
        assert!(blueprint.test_results.is_none());
        assert_eq!(blueprint.parameter("min_edge"), Some(dec!(0.02)));
    }

    #[test]
    fn seed_covers_every_family_once() {
        let agent = make_agent(10);
        assert_eq!(agent.seed_defaults().unwrap(), 5);
        assert_eq!(agent.store.strategy_count(), 5);
        // Re-seeding is a no-op.
        assert_eq!(agent.seed_defaults().unwrap(), 0);
    }

    #[test]
    fn seed_respects_registry_cap() {
        let agent = make_agent(3);
        assert_eq!(agent.seed_defaults().unwrap(), 3);
        assert_eq!(agent.store.strategy_count(), 3);
    }

    #[test]
    fn backtest_summarizes_realized_trades() {
        let trades = vec![
            exit_trade(dec!(100)),
            exit_trade(dec!(-50)),
            exit_trade(dec!(80)),
            exit_trade(dec!(-30)),
            exit_trade(dec!(60)),
        ];
        let results = backtest(&trades, dec!(10000));
        assert_eq!(results.total_trades, 5);
        assert!((results.win_rate - 0.6).abs() < 1e-9);
        assert!((results.total_return - 0.016).abs() < 1e-9);
        assert!(results.max_drawdown > 0.0);
        assert!(results.max_drawdown < 0.01);
    }

    #[test]
    fn backtest_ignores_entry_records() {
        let trades = vec![exit_trade(Decimal::ZERO), exit_trade(dec!(10))];
        let results = backtest(&trades, dec!(10000));
        assert_eq!(results.total_trades, 1);
        assert_eq!(results.win_rate, 1.0);
    }

    #[test]
    fn gate_requires_win_rate_and_drawdown() {
        let config = EvolutionConfig::default();
        let good = TestResults {
            win_rate: 0.60,
            total_return: 0.1,
            sharpe_ratio: 1.0,
            max_drawdown: 0.10,
            total_trades: 10,
        };
        assert!(passes_gate(&good, &config));

        let weak = TestResults { win_rate: 0.50, ..good };
        assert!(!passes_gate(&weak, &config));

        let deep = TestResults { max_drawdown: 0.25, ..good };
        assert!(!passes_gate(&deep, &config));

        let thin = TestResults { total_trades: 2, ..good };
        assert!(!passes_gate(&thin, &config));

        let rejection = check_gate("arb_fit", &weak, &config);
        assert!(matches!(
            rejection,
            Err(ValidationError::BlueprintRejected { ref name, .. }) if name == "arb_fit"
        ));
    }

    #[test]
    fn generate_pass_skips_without_history() {
        let agent = make_agent(10);
        agent.seed_defaults().unwrap();
        // No realized trades yet: nothing clears the sample minimum.
        assert_eq!(agent.generate_pass().unwrap(), 0);
        assert_eq!(agent.store.strategy_count(), 5);
    }
}
