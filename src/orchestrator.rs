//! Agent supervision, trade routing, and lifecycle.
//!
//! The orchestrator wires the knowledge store, bus, risk manager, and
//! trading engine together, then supervises the agent loops: a failed
//! agent is restarted with exponential backoff and surfaced as degraded
//! in the health map. Trade routing runs here too: scored opportunities
//! above the execution threshold are matched to the best registered
//! strategy and handed to the engine. Shutdown raises a watch signal,
//! waits for the loops, and drains open orders to terminal states.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::agent::{Agent, AnalyzerAgent, EvolverAgent, GeneratorAgent, ScannerAgent};
use crate::bus::MessageBus;
use crate::config::Config;
use crate::domain::{Opportunity, StrategyBlueprint};
use crate::engine::{DemoTradingEngine, TradingStats};
use crate::error::Error;
use crate::estimator::{PriorEstimator, ProbabilityEstimator};
use crate::feed::MarketDataProvider;
use crate::risk::RiskManager;
use crate::store::KnowledgeStore;

const RESTART_BASE_MILLIS: u64 = 500;
const RESTART_CAP_MILLIS: u64 = 30_000;
/// Failures beyond this leave the agent permanently degraded.
const MAX_AGENT_RESTARTS: u32 = 5;
/// Seconds between trade-routing passes.
const ROUTE_INTERVAL_SECS: u64 = 1;
/// Seconds between housekeeping passes (sweep, prune).
const HOUSEKEEPING_INTERVAL_SECS: u64 = 5;
/// Closed opportunities older than this are pruned.
const OPPORTUNITY_MAX_AGE_HOURS: i64 = 24;

/// Supervised state of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentHealth {
    Running,
    /// Restarted after failures; terminal once the restart cap is hit.
    Degraded { restarts: u32 },
    Stopped,
}

/// Point-in-time snapshot of the whole system.
#[derive(Debug, Clone)]
pub struct Status {
    pub agents: Vec<(&'static str, AgentHealth)>,
    pub markets: usize,
    pub open_opportunities: usize,
    pub strategies: usize,
    pub stats: TradingStats,
    pub bus_backpressure: u64,
    pub breaker_tripped: bool,
}

pub struct Orchestrator {
    config: Config,
    bus: Arc<MessageBus>,
    store: Arc<KnowledgeStore>,
    risk: Arc<RiskManager>,
    engine: Arc<DemoTradingEngine>,
    feed: Arc<dyn MarketDataProvider>,
    estimator: Arc<dyn ProbabilityEstimator>,
    health: Arc<DashMap<&'static str, AgentHealth>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(config: Config, feed: Arc<dyn MarketDataProvider>) -> Self {
        let bus = Arc::new(MessageBus::new(config.bus.queue_capacity));
        let store = Arc::new(KnowledgeStore::new(bus.clone()));
        let risk = Arc::new(RiskManager::new(config.trading.clone()));
        let engine = Arc::new(DemoTradingEngine::new(
            config.trading.clone(),
            risk.clone(),
            store.clone(),
            bus.clone(),
            feed.clone(),
        ));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            bus,
            store,
            risk,
            engine,
            feed,
            estimator: Arc::new(PriorEstimator::default()),
            health: Arc::new(DashMap::new()),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Swap in a different probability estimator before `start`.
    pub fn with_estimator(mut self, estimator: Arc<dyn ProbabilityEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<DemoTradingEngine> {
        &self.engine
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Spawn all agent loops plus trade routing and housekeeping.
    pub fn start(&self) {
        let scanner = Arc::new(ScannerAgent::new(
            self.config.scanner.clone(),
            self.feed.clone(),
            self.store.clone(),
        ));
        let analyzer = Arc::new(AnalyzerAgent::new(
            self.config.analyzer.clone(),
            self.store.clone(),
            self.bus.clone(),
            self.estimator.clone(),
        ));
        let generator = Arc::new(GeneratorAgent::new(
            self.config.clone(),
            self.store.clone(),
            self.engine.clone(),
        ));
        let evolver = Arc::new(EvolverAgent::new(
            self.config.clone(),
            self.store.clone(),
            self.engine.clone(),
            rand::random(),
        ));

        self.supervise(scanner);
        self.supervise(analyzer);
        self.supervise(generator);
        self.supervise(evolver);

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(route_loop(
            self.config.clone(),
            self.store.clone(),
            self.engine.clone(),
            self.shutdown_tx.subscribe(),
        )));
        tasks.push(tokio::spawn(housekeeping_loop(
            self.store.clone(),
            self.engine.clone(),
            self.shutdown_tx.subscribe(),
        )));
        info!("orchestrator started");
    }

    /// Run one agent under restart supervision.
    fn supervise(&self, agent: Arc<dyn Agent>) {
        let name = agent.name();
        let health = self.health.clone();
        let shutdown = self.shutdown_tx.subscribe();
        health.insert(name, AgentHealth::Running);

        let handle = tokio::spawn(async move {
            let mut restarts: u32 = 0;
            loop {
                match agent.run(shutdown.clone()).await {
                    Ok(()) => {
                        health.insert(name, AgentHealth::Stopped);
                        return;
                    }
                    Err(e) => {
                        restarts += 1;
                        health.insert(name, AgentHealth::Degraded { restarts });
                        if restarts > MAX_AGENT_RESTARTS {
                            let degraded = Error::AgentDegraded {
                                name: name.to_string(),
                                restarts,
                            };
                            error!(agent = name, error = %degraded, "restart cap exceeded, giving up");
                            return;
                        }
                        let backoff = Duration::from_millis(
                            (RESTART_BASE_MILLIS << restarts.min(6)).min(RESTART_CAP_MILLIS),
                        );
                        error!(
                            agent = name,
                            error = %e,
                            restarts,
                            backoff_millis = backoff.as_millis() as u64,
                            "agent failed, restarting"
                        );
                        sleep(backoff).await;
                        if *shutdown.borrow() {
                            health.insert(name, AgentHealth::Stopped);
                            return;
                        }
                        health.insert(name, AgentHealth::Running);
                    }
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Signal shutdown, wait for every loop, then drain open orders.
    pub async fn shutdown(&self) {
        info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "task join failed during shutdown");
            }
        }
        self.engine.drain();
        let stats = self.engine.stats();
        info!(
            equity = %stats.equity,
            realized_pnl = %stats.realized_pnl,
            total_trades = stats.total_trades,
            "shutdown complete"
        );
    }

    /// Current system snapshot.
    #[must_use]
    pub fn status(&self) -> Status {
        let agents = self
            .health
            .iter()
            .map(|e| (*e.key(), *e.value()))
            .collect();
        Status {
            agents,
            markets: self.store.markets().len(),
            open_opportunities: self.store.open_opportunities().len(),
            strategies: self.store.strategy_count(),
            stats: self.engine.stats(),
            bus_backpressure: self.bus.total_backpressure(),
            breaker_tripped: self.risk.is_breaker_tripped(),
        }
    }
}

/// Pick the registered strategy best suited to an opportunity: the
/// matching family whose parameter floors the opportunity clears, with
/// the highest realized win rate. A blueprint's `min_edge` and
/// `min_confidence` bound what it will trade, so mutated children can
/// trade a different subset than their parents.
fn select_strategy(
    strategies: &[StrategyBlueprint],
    opportunity: &Opportunity,
) -> Option<StrategyBlueprint> {
    let confidence = Decimal::try_from(opportunity.confidence()).unwrap_or(Decimal::ZERO);
    strategies
        .iter()
        .filter(|s| s.strategy_type.matches(opportunity.kind()))
        .filter(|s| {
            s.parameter("min_edge")
                .map_or(true, |floor| opportunity.edge() >= floor)
        })
        .filter(|s| {
            s.parameter("min_confidence")
                .map_or(true, |floor| confidence >= floor)
        })
        .max_by(|a, b| {
            a.win_rate()
                .partial_cmp(&b.win_rate())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .cloned()
}

/// Route scored opportunities at or above the execution threshold into
/// the engine, resolving each one after execution.
async fn route_loop(
    config: Config,
    store: Arc<KnowledgeStore>,
    engine: Arc<DemoTradingEngine>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(Duration::from_secs(ROUTE_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let strategies = store.strategies();
                let ready = store.opportunities(|o| {
                    o.is_open() && o.confidence() >= config.analyzer.execution_threshold
                });
                for opportunity in ready {
                    let Some(strategy) = select_strategy(&strategies, &opportunity) else {
                        debug!(kind = %opportunity.kind(), "no strategy covers this kind yet");
                        continue;
                    };
                    match engine.execute(&opportunity, &strategy).await {
                        Ok(order) => {
                            info!(
                                order_id = %order.id(),
                                market_id = %opportunity.market_id(),
                                strategy = %strategy.name,
                                "opportunity executed"
                            );
                            if let Err(e) = store.mark_resolved(opportunity.fingerprint()) {
                                warn!(error = %e, "failed to resolve executed opportunity");
                            }
                        }
                        Err(Error::Risk(veto)) => {
                            // Left open: the veto may clear (breaker
                            // recovery, capital freed by exits).
                            debug!(
                                market_id = %opportunity.market_id(),
                                veto = %veto,
                                "execution vetoed"
                            );
                        }
                        Err(e) => {
                            warn!(market_id = %opportunity.market_id(), error = %e, "execution failed");
                        }
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// Periodic upkeep: mark positions, fire exits, prune stale records.
async fn housekeeping_loop(
    store: Arc<KnowledgeStore>,
    engine: Arc<DemoTradingEngine>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(Duration::from_secs(HOUSEKEEPING_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = engine.sweep_positions().await {
                    warn!(error = %e, "position sweep failed");
                }
                store.prune_opportunities(OPPORTUNITY_MAX_AGE_HOURS);
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::generator::default_blueprint;
    use crate::domain::{MarketId, OpportunityKind, Side, StrategyKind, TestResults};
    use crate::feed::SimulatedFeed;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn make_opportunity(kind: OpportunityKind) -> Opportunity {
        Opportunity::new(
            MarketId::from("m1"),
            kind,
            Side::Yes,
            dec!(0.44),
            dec!(0.04),
            0.8,
        )
    }

    #[test]
    fn selects_matching_family_with_best_win_rate() {
        let config = Config::default();
        let mut weak = default_blueprint(StrategyKind::Arbitrage, &config);
        weak.test_results = Some(TestResults {
            win_rate: 0.5,
            total_return: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.1,
            total_trades: 10,
        });
        let mut strong = default_blueprint(StrategyKind::Arbitrage, &config);
        strong.test_results = Some(TestResults {
            win_rate: 0.7,
            total_return: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.1,
            total_trades: 10,
        });
        let other = default_blueprint(StrategyKind::TimeDecay, &config);

        let strategies = vec![weak, strong.clone(), other];
        let picked =
            select_strategy(&strategies, &make_opportunity(OpportunityKind::Arbitrage)).unwrap();
        assert_eq!(picked.id, strong.id);
    }

    #[test]
    fn parameter_floors_gate_selection() {
        let config = Config::default();
        // Best win rate, but demands more edge than the opportunity has.
        let mut picky = default_blueprint(StrategyKind::Arbitrage, &config);
        picky.parameters.insert("min_edge".into(), dec!(0.10));
        picky.test_results = Some(TestResults {
            win_rate: 0.9,
            total_return: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.1,
            total_trades: 10,
        });
        let mut modest = default_blueprint(StrategyKind::Arbitrage, &config);
        modest.test_results = Some(TestResults {
            win_rate: 0.6,
            total_return: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.1,
            total_trades: 10,
        });

        // Edge 0.04 clears the 0.02 default floor but not 0.10.
        let opportunity = make_opportunity(OpportunityKind::Arbitrage);
        let strategies = vec![picky.clone(), modest.clone()];
        let picked = select_strategy(&strategies, &opportunity).unwrap();
        assert_eq!(picked.id, modest.id);

        // A confidence floor above the opportunity rules everything out.
        let mut shy = modest.clone();
        shy.parameters.insert("min_confidence".into(), dec!(0.95));
        assert!(select_strategy(&[picky, shy], &opportunity).is_none());
    }

    #[test]
    fn no_strategy_for_uncovered_kind() {
        let config = Config::default();
        let strategies = vec![default_blueprint(StrategyKind::Arbitrage, &config)];
        assert!(select_strategy(&strategies, &make_opportunity(OpportunityKind::NewsGap)).is_none());
    }

    struct CrashingAgent;

    #[async_trait::async_trait]
    impl Agent for CrashingAgent {
        fn name(&self) -> &'static str {
            "crashing"
        }

        async fn run(&self, _shutdown: watch::Receiver<bool>) -> crate::error::Result<()> {
            Err(crate::error::DataError::MissingOrderBook {
                market_id: "m1".into(),
            }
            .into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn crashing_agent_is_abandoned_after_restart_cap() {
        let feed = Arc::new(SimulatedFeed::new(1, Decimal::ZERO));
        let orchestrator = Orchestrator::new(Config::default(), feed);
        orchestrator.supervise(Arc::new(CrashingAgent));

        // Enough simulated time to burn through every backoff window.
        tokio::time::sleep(Duration::from_secs(120)).await;
        let degraded = AgentHealth::Degraded {
            restarts: MAX_AGENT_RESTARTS + 1,
        };
        let status = orchestrator.status();
        let (_, health) = status
            .agents
            .iter()
            .find(|(name, _)| *name == "crashing")
            .unwrap();
        assert_eq!(*health, degraded);

        // Terminal: no further retries, the marker never changes back.
        tokio::time::sleep(Duration::from_secs(600)).await;
        let status = orchestrator.status();
        let (_, health) = status
            .agents
            .iter()
            .find(|(name, _)| *name == "crashing")
            .unwrap();
        assert_eq!(*health, degraded);
    }

    #[tokio::test]
    async fn start_and_shutdown_stop_all_agents() {
        let feed = Arc::new(SimulatedFeed::new(1, Decimal::ZERO));
        let orchestrator = Orchestrator::new(Config::default(), feed);
        orchestrator.start();
        // Give the loops one chance to come up.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = orchestrator.status();
        assert_eq!(status.agents.len(), 4);
        assert!(status
            .agents
            .iter()
            .all(|(_, h)| *h == AgentHealth::Running));

        orchestrator.shutdown().await;
        let status = orchestrator.status();
        assert!(status
            .agents
            .iter()
            .all(|(_, h)| *h == AgentHealth::Stopped));
    }
}
