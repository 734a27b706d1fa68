//! Market data provider seam.
//!
//! The real wire client (REST/WebSocket, connectivity layer) is an
//! external collaborator. The engine depends only on this trait; demo
//! mode and the test suites run against `SimulatedFeed`, a
//! deterministic random-walk over a seeded set of markets.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::{clamp_price, Market, MarketId, OrderBook, PriceLevel, Quote, Side};
use crate::error::{DataError, Result};

/// Snapshots older than this are unusable for fills.
const STALE_AFTER_SECS: i64 = 60;

/// Supplies market and order book snapshots on demand.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Current snapshots for all active markets.
    async fn markets(&self) -> Result<Vec<Market>>;

    /// Order book for one market. `DataError` when missing or stale;
    /// the scan cycle skips the market and retries next tick.
    async fn order_book(&self, id: &MarketId) -> Result<OrderBook>;

    /// Best executable price for entering the given side.
    async fn mark_price(&self, id: &MarketId, side: Side) -> Result<Decimal> {
        let book = self.order_book(id).await?;
        book.best_bid(side).ok_or_else(|| {
            DataError::MissingOrderBook {
                market_id: id.to_string(),
            }
            .into()
        })
    }
}

/// A simulated feed over a fixed market set.
///
/// Quotes drift by a small random walk on every `markets()` call so the
/// exit sweep and PnL marking have movement to react to.
pub struct SimulatedFeed {
    markets: DashMap<MarketId, Market>,
    rng: Mutex<StdRng>,
    /// Walk step, in price units.
    volatility: Decimal,
}

impl SimulatedFeed {
    #[must_use]
    pub fn new(seed: u64, volatility: Decimal) -> Self {
        Self {
            markets: DashMap::new(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            volatility,
        }
    }

    /// Seed a market into the feed.
    pub fn insert(&self, market: Market) {
        self.markets.insert(market.id.clone(), market);
    }

    /// Overwrite one market's quotes, e.g. to script a scenario.
    pub fn set_quotes(&self, id: &MarketId, yes: Quote, no: Quote) {
        if let Some(mut market) = self.markets.get_mut(id) {
            market.yes_quote = yes;
            market.no_quote = no;
            market.snapshot_at = Utc::now();
        }
    }

    fn drift(&self, quote: Quote, step: Decimal) -> Quote {
        Quote {
            bid: clamp_price(quote.bid + step),
            ask: clamp_price(quote.ask + step),
        }
    }

    fn walk(&self, market: &mut Market) {
        let mut rng = self.rng.lock();
        let direction = if rng.gen_bool(0.5) {
            Decimal::ONE
        } else {
            -Decimal::ONE
        };
        let step = self.volatility * direction;
        market.yes_quote = self.drift(market.yes_quote, step);
        market.no_quote = self.drift(market.no_quote, -step);
        market.snapshot_at = Utc::now();
    }
}

#[async_trait]
impl MarketDataProvider for SimulatedFeed {
    async fn markets(&self) -> Result<Vec<Market>> {
        let mut out = Vec::with_capacity(self.markets.len());
        for mut entry in self.markets.iter_mut() {
            self.walk(&mut entry);
            out.push(entry.clone());
        }
        Ok(out)
    }

    async fn order_book(&self, id: &MarketId) -> Result<OrderBook> {
        let market = self.markets.get(id).ok_or_else(|| DataError::MissingOrderBook {
            market_id: id.to_string(),
        })?;
        let age = Utc::now() - market.snapshot_at;
        if age > chrono::Duration::seconds(STALE_AFTER_SECS) {
            return Err(DataError::StaleSnapshot {
                market_id: id.to_string(),
            }
            .into());
        }
        // Synthesize a two-level ladder around the current quotes, with
        // depth proportional to the market's stated liquidity.
        let depth = market.liquidity / dec!(4);
        let tick = dec!(0.01);
        let ladder = |quote: Quote| {
            (
                vec![
                    PriceLevel { price: quote.bid, size: depth },
                    PriceLevel { price: clamp_price(quote.bid - tick), size: depth },
                ],
                vec![
                    PriceLevel { price: quote.ask, size: depth },
                    PriceLevel { price: clamp_price(quote.ask + tick), size: depth },
                ],
            )
        };
        let (yes_bids, yes_asks) = ladder(market.yes_quote);
        let (no_bids, no_asks) = ladder(market.no_quote);
        Ok(OrderBook {
            yes_bids,
            yes_asks,
            no_bids,
            no_asks,
        })
    }
}

/// Convenience constructor for a market snapshot, used by demo seeding
/// and tests.
#[must_use]
pub fn market_snapshot(
    id: &str,
    question: &str,
    yes_ask: Decimal,
    no_ask: Decimal,
    liquidity: Decimal,
) -> Market {
    let spread = dec!(0.02);
    Market {
        id: MarketId::from(id),
        question: question.to_string(),
        yes_token: crate::domain::TokenId::new(format!("{id}-yes")),
        no_token: crate::domain::TokenId::new(format!("{id}-no")),
        yes_quote: Quote {
            bid: clamp_price(yes_ask - spread),
            ask: yes_ask,
        },
        no_quote: Quote {
            bid: clamp_price(no_ask - spread),
            ask: no_ask,
        },
        volume: dec!(50000),
        liquidity,
        resolution_at: None,
        snapshot_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn order_book_reflects_quotes() {
        let feed = SimulatedFeed::new(7, dec!(0.005));
        feed.insert(market_snapshot("m1", "Q?", dec!(0.52), dec!(0.44), dec!(2000)));

        let book = feed.order_book(&MarketId::from("m1")).await.unwrap();
        assert_eq!(book.best_ask(Side::Yes), Some(dec!(0.52)));
        assert_eq!(book.best_ask(Side::No), Some(dec!(0.44)));
        assert!(book.visible_liquidity(Side::Yes) > Decimal::ZERO);
    }

    #[tokio::test]
    async fn missing_market_is_data_error() {
        let feed = SimulatedFeed::new(7, dec!(0.005));
        let result = feed.order_book(&MarketId::from("nope")).await;
        assert!(matches!(
            result,
            Err(crate::error::Error::Data(DataError::MissingOrderBook { .. }))
        ));
    }

    #[tokio::test]
    async fn stale_snapshot_is_data_error() {
        let feed = SimulatedFeed::new(7, dec!(0.005));
        let mut market = market_snapshot("m1", "Q?", dec!(0.52), dec!(0.44), dec!(2000));
        market.snapshot_at = Utc::now() - chrono::Duration::seconds(STALE_AFTER_SECS + 1);
        feed.insert(market);

        let result = feed.order_book(&MarketId::from("m1")).await;
        assert!(matches!(
            result,
            Err(crate::error::Error::Data(DataError::StaleSnapshot { .. }))
        ));

        // A fresh walk re-stamps the snapshot and clears the error.
        feed.markets().await.unwrap();
        assert!(feed.order_book(&MarketId::from("m1")).await.is_ok());
    }

    #[tokio::test]
    async fn walk_keeps_prices_in_range() {
        let feed = SimulatedFeed::new(3, dec!(0.05));
        feed.insert(market_snapshot("m1", "Q?", dec!(0.99), dec!(0.02), dec!(1000)));
        for _ in 0..50 {
            let markets = feed.markets().await.unwrap();
            for market in &markets {
                assert!(market.yes_quote.ask <= Decimal::ONE);
                assert!(market.no_quote.bid >= Decimal::ZERO);
            }
        }
    }
}
