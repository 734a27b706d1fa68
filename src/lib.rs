//! Paperhive: an agent-orchestrated demo trading engine for binary
//! prediction markets.
//!
//! A scanner polls market snapshots and detects mispricings, analyzers
//! score them against an external probability estimator, and the
//! orchestrator routes high-confidence opportunities into a simulated
//! trading engine with slippage, partial fills, and stop-loss /
//! take-profit exits over a virtual account. Strategies are declarative
//! blueprints that a generator seeds and an evolver mutates, trials,
//! and promotes on realized results.
//!
//! All trading is simulated. Live execution is rejected at config
//! validation.

pub mod agent;
pub mod bus;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod feed;
pub mod orchestrator;
pub mod risk;
pub mod store;

pub use config::Config;
pub use engine::DemoTradingEngine;
pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
pub use store::KnowledgeStore;
