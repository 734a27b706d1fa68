//! Market scanner: polls the feed and detects raw opportunities.
//!
//! Three detection rules run per market snapshot:
//! - arbitrage: YES ask + NO ask under the threshold sum,
//! - time decay: a strong favorite close to resolution,
//! - thin market: low liquidity with a skewed mid-price.
//!
//! Detections are upserted into the knowledge store, which dedupes by
//! fingerprint and refreshes open records in place. A market with no
//! usable snapshot is skipped for the cycle and retried next tick.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ScannerConfig;
use crate::domain::{Market, Opportunity, OpportunityKind, Side};
use crate::error::Result;
use crate::feed::MarketDataProvider;
use crate::store::KnowledgeStore;

use super::Agent;

/// Mid-price distance from 0.5 beyond which a thin market is flagged.
const THIN_MARKET_SKEW: Decimal = dec!(0.2);

pub struct ScannerAgent {
    config: ScannerConfig,
    feed: Arc<dyn MarketDataProvider>,
    store: Arc<KnowledgeStore>,
}

impl ScannerAgent {
    #[must_use]
    pub fn new(
        config: ScannerConfig,
        feed: Arc<dyn MarketDataProvider>,
        store: Arc<KnowledgeStore>,
    ) -> Self {
        Self { config, feed, store }
    }

    /// One scan cycle over all active markets.
    pub async fn scan_once(&self) -> Result<usize> {
        let markets = self.feed.markets().await?;
        let mut detected = 0;
        for market in markets {
            self.store.put_market(market.clone());
            for opportunity in self.detect(&market) {
                debug!(
                    market_id = %market.id,
                    kind = %opportunity.kind(),
                    edge = %opportunity.edge(),
                    "opportunity detected"
                );
                if self.store.upsert_opportunity(opportunity) {
                    detected += 1;
                }
            }
        }
        Ok(detected)
    }

    fn detect(&self, market: &Market) -> Vec<Opportunity> {
        [
            self.detect_arbitrage(market),
            self.detect_time_decay(market),
            self.detect_thin_market(market),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Both sides together priced under the threshold sum.
    fn detect_arbitrage(&self, market: &Market) -> Option<Opportunity> {
        let sum = market.ask_sum();
        if sum >= self.config.arbitrage_threshold
            || market.yes_quote.ask <= Decimal::ZERO
            || market.no_quote.ask <= Decimal::ZERO
        {
            return None;
        }
        let edge = Decimal::ONE - sum;
        // Enter on the cheaper side.
        let side = if market.yes_quote.ask <= market.no_quote.ask {
            Side::Yes
        } else {
            Side::No
        };
        Some(Opportunity::new(
            market.id.clone(),
            OpportunityKind::Arbitrage,
            side,
            market.best_ask(side),
            edge,
            arbitrage_confidence(edge),
        ))
    }

    /// A strong favorite inside the resolution window: the price tends
    /// toward 1 as time runs out.
    fn detect_time_decay(&self, market: &Market) -> Option<Opportunity> {
        let hours = market.hours_to_resolution(Utc::now())?;
        if hours <= 0 || hours > self.config.time_decay_window_hours {
            return None;
        }
        let side = [Side::Yes, Side::No]
            .into_iter()
            .find(|&s| market.best_ask(s) >= self.config.favorite_threshold)?;
        let ask = market.best_ask(side);
        if ask >= Decimal::ONE {
            return None;
        }
        let mut opportunity = Opportunity::new(
            market.id.clone(),
            OpportunityKind::TimeDecay,
            side,
            ask,
            Decimal::ONE - ask,
            0.6,
        );
        if let Some(at) = market.resolution_at {
            opportunity = opportunity.with_expiry(at);
        }
        Some(opportunity)
    }

    /// Thin markets drift away from informed prices; a skewed mid on
    /// low liquidity marks a candidate for deeper analysis.
    fn detect_thin_market(&self, market: &Market) -> Option<Opportunity> {
        if market.liquidity >= self.config.low_liquidity_threshold {
            return None;
        }
        let mid = (market.yes_quote.bid + market.yes_quote.ask) / Decimal::TWO;
        let skew = (mid - dec!(0.5)).abs();
        if skew <= THIN_MARKET_SKEW {
            return None;
        }
        let side = if market.yes_quote.ask <= market.no_quote.ask {
            Side::Yes
        } else {
            Side::No
        };
        Some(Opportunity::new(
            market.id.clone(),
            OpportunityKind::Liquidity,
            side,
            market.best_ask(side),
            skew - THIN_MARKET_SKEW,
            0.45,
        ))
    }
}

/// Arbitrage confidence grows with the captured edge.
fn arbitrage_confidence(edge: Decimal) -> f64 {
    let edge: f64 = edge.try_into().unwrap_or(0.0);
    (0.5 + edge * 10.0).min(0.95)
}

#[async_trait]
impl Agent for ScannerAgent {
    fn name(&self) -> &'static str {
        "scanner"
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = interval(Duration::from_secs(self.config.scan_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = self.config.scan_interval_secs, "scanner started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.scan_once().await {
                        Ok(detected) if detected > 0 => {
                            info!(detected, "scan cycle found new opportunities");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "scan cycle failed, retrying next tick"),
                    }
                }
                _ = shutdown.changed() => {
                    if super::is_shutdown(&shutdown) {
                        info!("scanner stopped");
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
    use crate::feed::{market_snapshot, SimulatedFeed};
    use chrono::Duration as ChronoDuration;

    fn make_scanner(feed: Arc<SimulatedFeed>) -> ScannerAgent {
        let bus = Arc::new(MessageBus::new(64));
        let store = Arc::new(KnowledgeStore::new(bus));
        ScannerAgent::new(ScannerConfig::default(), feed, store)
    }

    #[tokio::test]
    async fn detects_arbitrage_below_threshold() {
        let feed = Arc::new(SimulatedFeed::new(1, Decimal::ZERO));
        // 0.52 + 0.44 = 0.96 < 0.98
        feed.insert(market_snapshot("m1", "Q?", dec!(0.52), dec!(0.44), dec!(50000)));
        let scanner = make_scanner(feed);

        let detected = scanner.scan_once().await.unwrap();
        assert_eq!(detected, 1);

        let open = scanner.store.open_opportunities();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].kind(), OpportunityKind::Arbitrage);
        assert_eq!(open[0].side(), Side::No);
        assert_eq!(open[0].entry_price(), dec!(0.44));
        assert_eq!(open[0].edge(), dec!(0.04));
    }

    #[tokio::test]
    async fn no_arbitrage_above_threshold() {
        let feed = Arc::new(SimulatedFeed::new(1, Decimal::ZERO));
        // 0.52 + 0.50 = 1.02
        feed.insert(market_snapshot("m1", "Q?", dec!(0.52), dec!(0.50), dec!(50000)));
        let scanner = make_scanner(feed);
        assert_eq!(scanner.scan_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rescan_refreshes_instead_of_duplicating() {
        let feed = Arc::new(SimulatedFeed::new(1, Decimal::ZERO));
        feed.insert(market_snapshot("m1", "Q?", dec!(0.52), dec!(0.44), dec!(50000)));
        let scanner = make_scanner(feed);

        assert_eq!(scanner.scan_once().await.unwrap(), 1);
        // Second scan re-detects the same fingerprint.
        assert_eq!(scanner.scan_once().await.unwrap(), 0);
        assert_eq!(scanner.store.open_opportunities().len(), 1);
    }

    #[tokio::test]
    async fn detects_time_decay_favorite() {
        let feed = Arc::new(SimulatedFeed::new(1, Decimal::ZERO));
        let mut market = market_snapshot("m1", "Q?", dec!(0.85), dec!(0.17), dec!(50000));
        market.resolution_at = Some(Utc::now() + ChronoDuration::hours(6));
        feed.insert(market);
        let scanner = make_scanner(feed);

        scanner.scan_once().await.unwrap();
        let decay: Vec<Opportunity> = scanner
            .store
            .opportunities(|o| o.kind() == OpportunityKind::TimeDecay);
        assert_eq!(decay.len(), 1);
        assert_eq!(decay[0].side(), Side::Yes);
        assert_eq!(decay[0].edge(), dec!(0.15));
        assert!(decay[0].expires_at().is_some());
    }

    #[tokio::test]
    async fn ignores_favorite_outside_window() {
        let feed = Arc::new(SimulatedFeed::new(1, Decimal::ZERO));
        let mut market = market_snapshot("m1", "Q?", dec!(0.85), dec!(0.17), dec!(50000));
        market.resolution_at = Some(Utc::now() + ChronoDuration::hours(72));
        feed.insert(market);
        let scanner = make_scanner(feed);

        scanner.scan_once().await.unwrap();
        assert!(scanner
            .store
            .opportunities(|o| o.kind() == OpportunityKind::TimeDecay)
            .is_empty());
    }

    #[tokio::test]
    async fn detects_thin_market_skew() {
        let feed = Arc::new(SimulatedFeed::new(1, Decimal::ZERO));
        // Liquidity 500 < 1000, yes mid (0.76+0.78)/2 = 0.77, skew 0.27.
        feed.insert(market_snapshot("m1", "Q?", dec!(0.78), dec!(0.24), dec!(500)));
        let scanner = make_scanner(feed);

        scanner.scan_once().await.unwrap();
        let thin: Vec<Opportunity> = scanner
            .store
            .opportunities(|o| o.kind() == OpportunityKind::Liquidity);
        assert_eq!(thin.len(), 1);
        assert_eq!(thin[0].side(), Side::No);
        assert_eq!(thin[0].edge(), dec!(0.07));
    }
}
