//! Market and order book snapshot types.
//!
//! A `Market` is an immutable snapshot taken on a scan tick. A newer
//! snapshot supersedes an older one in the knowledge store; snapshots
//! are never mutated in place.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{MarketId, TokenId};
use crate::error::ValidationError;

/// Side of a binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Yes,
    No,
}

impl Side {
    /// The opposing side.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Yes => write!(f, "YES"),
            Side::No => write!(f, "NO"),
        }
    }
}

/// Clamp a probability-price into [0, 1].
#[must_use]
pub fn clamp_price(price: Decimal) -> Decimal {
    price.clamp(Decimal::ZERO, Decimal::ONE)
}

/// Validate that a price is inside [0, 1].
pub fn validate_price(price: Decimal) -> Result<Decimal, ValidationError> {
    if price < Decimal::ZERO || price > Decimal::ONE {
        return Err(ValidationError::PriceOutOfRange { price });
    }
    Ok(price)
}

/// Best-of-book quote for one side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
}

/// An immutable market snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub question: String,
    pub yes_token: TokenId,
    pub no_token: TokenId,
    pub yes_quote: Quote,
    pub no_quote: Quote,
    pub volume: Decimal,
    pub liquidity: Decimal,
    pub resolution_at: Option<DateTime<Utc>>,
    pub snapshot_at: DateTime<Utc>,
}

impl Market {
    /// Best ask for the given side.
    #[must_use]
    pub fn best_ask(&self, side: Side) -> Decimal {
        match side {
            Side::Yes => self.yes_quote.ask,
            Side::No => self.no_quote.ask,
        }
    }

    /// Best bid for the given side.
    #[must_use]
    pub fn best_bid(&self, side: Side) -> Decimal {
        match side {
            Side::Yes => self.yes_quote.bid,
            Side::No => self.no_quote.bid,
        }
    }

    /// Sum of best asks across both sides. Below the arbitrage
    /// threshold this sum indicates free edge.
    #[must_use]
    pub fn ask_sum(&self) -> Decimal {
        self.yes_quote.ask + self.no_quote.ask
    }

    /// Hours until resolution, if a resolution date is known.
    #[must_use]
    pub fn hours_to_resolution(&self, now: DateTime<Utc>) -> Option<i64> {
        self.resolution_at.map(|at| (at - now).num_hours())
    }
}

/// A single price level in a ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Per-market bid/ask ladders for both sides.
///
/// Used transiently by analyzers and the fill simulator; not stored.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    pub yes_bids: Vec<PriceLevel>,
    pub yes_asks: Vec<PriceLevel>,
    pub no_bids: Vec<PriceLevel>,
    pub no_asks: Vec<PriceLevel>,
}

impl OrderBook {
    fn asks(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Yes => &self.yes_asks,
            Side::No => &self.no_asks,
        }
    }

    fn bids(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Yes => &self.yes_bids,
            Side::No => &self.no_bids,
        }
    }

    /// Lowest ask on the given side.
    #[must_use]
    pub fn best_ask(&self, side: Side) -> Option<Decimal> {
        self.asks(side).iter().map(|l| l.price).min()
    }

    /// Highest bid on the given side.
    #[must_use]
    pub fn best_bid(&self, side: Side) -> Option<Decimal> {
        self.bids(side).iter().map(|l| l.price).max()
    }

    /// Total ask-side size visible on the given side. The fill
    /// simulator treats this as the liquidity available to an entry.
    #[must_use]
    pub fn visible_liquidity(&self, side: Side) -> Decimal {
        self.asks(side)
            .iter()
            .fold(Decimal::ZERO, |acc, l| acc + l.size)
    }
}
