//! Long-running agents driven by the orchestrator.
//!
//! Each agent is an independent task with its own loop cadence. Agents
//! share state only through the knowledge store and the message bus;
//! none of them touches order or account state directly.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Result;

pub mod analyzer;
pub mod evolver;
pub mod generator;
pub mod scanner;

pub use analyzer::AnalyzerAgent;
pub use evolver::EvolverAgent;
pub use generator::GeneratorAgent;
pub use scanner::ScannerAgent;

/// A supervised worker loop.
///
/// `run` returns `Ok(())` on graceful shutdown and `Err` on failure;
/// the orchestrator restarts failed agents with backoff.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()>;
}

/// True once the shutdown signal has been raised.
pub(crate) fn is_shutdown(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}
