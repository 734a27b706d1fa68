//! Virtual account: capital, realized PnL, and the append-only trade log.
//!
//! Bookkeeping invariant: `capital + open position entry cost ==
//! initial capital + realized PnL` at all times, so equity
//! (`capital + entry cost + unrealized`) conserves value.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{MarketId, StrategyId};
use super::market::Side;

/// An executed trade, recorded once per fill-complete entry or exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: uuid::Uuid,
    pub market_id: MarketId,
    pub strategy_id: StrategyId,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    /// Zero for entries; realized PnL for exits.
    pub pnl: Decimal,
    pub executed_at: DateTime<Utc>,
}

impl TradeRecord {
    #[must_use]
    pub fn new(
        market_id: MarketId,
        strategy_id: StrategyId,
        side: Side,
        price: Decimal,
        size: Decimal,
        pnl: Decimal,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            market_id,
            strategy_id,
            side,
            price,
            size,
            pnl,
            executed_at: Utc::now(),
        }
    }
}

/// The demo trading account.
#[derive(Debug, Clone)]
pub struct Account {
    initial_capital: Decimal,
    capital: Decimal,
    realized_pnl: Decimal,
    peak_equity: Decimal,
    trades: Vec<TradeRecord>,
}

impl Account {
    #[must_use]
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            initial_capital,
            capital: initial_capital,
            realized_pnl: Decimal::ZERO,
            peak_equity: initial_capital,
            trades: Vec::new(),
        }
    }

    #[must_use]
    pub fn initial_capital(&self) -> Decimal {
        self.initial_capital
    }

    #[must_use]
    pub fn capital(&self) -> Decimal {
        self.capital
    }

    #[must_use]
    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    #[must_use]
    pub fn peak_equity(&self) -> Decimal {
        self.peak_equity
    }

    #[must_use]
    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    /// Debit capital for an entry fill.
    pub fn debit(&mut self, notional: Decimal) {
        self.capital -= notional;
    }

    /// Credit exit proceeds and record the realized PnL component.
    pub fn credit(&mut self, proceeds: Decimal, realized: Decimal) {
        self.capital += proceeds;
        self.realized_pnl += realized;
    }

    /// Append a trade to the log.
    pub fn record_trade(&mut self, trade: TradeRecord) {
        self.trades.push(trade);
    }

    /// Update the equity high-water mark used for drawdown.
    pub fn observe_equity(&mut self, equity: Decimal) {
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
    }

    /// Peak-to-current equity decline as a fraction of the peak.
    #[must_use]
    pub fn drawdown(&self, equity: Decimal) -> Decimal {
        if self.peak_equity.is_zero() || equity >= self.peak_equity {
            return Decimal::ZERO;
        }
        (self.peak_equity - equity) / self.peak_equity
    }
}
