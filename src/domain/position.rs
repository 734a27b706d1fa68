//! Position accounting: weighted-average entries and mark-to-market PnL.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{MarketId, PositionId, StrategyId};
use super::market::Side;

/// An open or closed holding in one market side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    id: PositionId,
    market_id: MarketId,
    side: Side,
    strategy_id: StrategyId,
    size: Decimal,
    entry_price: Decimal,
    mark_price: Decimal,
    unrealized_pnl: Decimal,
    realized_pnl: Decimal,
    opened_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl Position {
    #[must_use]
    pub fn open(
        id: PositionId,
        market_id: MarketId,
        side: Side,
        strategy_id: StrategyId,
        size: Decimal,
        entry_price: Decimal,
    ) -> Self {
        Self {
            id,
            market_id,
            side,
            strategy_id,
            size,
            entry_price,
            mark_price: entry_price,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> PositionId {
        self.id
    }

    #[must_use]
    pub fn market_id(&self) -> &MarketId {
        &self.market_id
    }

    #[must_use]
    pub fn side(&self) -> Side {
        self.side
    }

    #[must_use]
    pub fn strategy_id(&self) -> &StrategyId {
        &self.strategy_id
    }

    #[must_use]
    pub fn size(&self) -> Decimal {
        self.size
    }

    #[must_use]
    pub fn entry_price(&self) -> Decimal {
        self.entry_price
    }

    #[must_use]
    pub fn mark_price(&self) -> Decimal {
        self.mark_price
    }

    #[must_use]
    pub fn unrealized_pnl(&self) -> Decimal {
        self.unrealized_pnl
    }

    #[must_use]
    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    #[must_use]
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    /// Notional committed at entry.
    #[must_use]
    pub fn entry_cost(&self) -> Decimal {
        self.entry_price * self.size
    }

    /// Unrealized PnL as a fraction of entry cost. Drives the
    /// stop-loss/take-profit exit sweep.
    #[must_use]
    pub fn unrealized_pnl_pct(&self) -> Decimal {
        let cost = self.entry_cost();
        if cost.is_zero() {
            return Decimal::ZERO;
        }
        self.unrealized_pnl / cost
    }

    /// Add size at a new price, folding into the weighted-average entry.
    pub fn add_fill(&mut self, price: Decimal, size: Decimal) {
        let total_cost = self.entry_cost() + price * size;
        self.size += size;
        if !self.size.is_zero() {
            self.entry_price = total_cost / self.size;
        }
        self.mark(self.mark_price);
    }

    /// Recompute unrealized PnL against a fresh mark price. Prices are
    /// probability-space, so direction is always (mark - entry) * size:
    /// a NO holding is long the NO token, not short the YES token.
    pub fn mark(&mut self, price: Decimal) {
        self.mark_price = price;
        self.unrealized_pnl = (price - self.entry_price) * self.size;
    }

    /// Close at an exit price, converting unrealized into realized PnL.
    /// Returns the proceeds credited back to the account.
    pub fn close(&mut self, exit_price: Decimal) -> Decimal {
        self.mark(exit_price);
        self.realized_pnl = self.unrealized_pnl;
        self.unrealized_pnl = Decimal::ZERO;
        self.closed_at = Some(Utc::now());
        exit_price * self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_position(size: Decimal, entry: Decimal) -> Position {
        Position::open(
            PositionId::new(1),
            MarketId::from("m1"),
            Side::Yes,
            StrategyId::from("s1"),
            size,
            entry,
        )
    }

    #[test]
    fn mark_to_market_updates_unrealized() {
        let mut pos = make_position(dec!(100), dec!(0.40));
        pos.mark(dec!(0.48));
        assert_eq!(pos.unrealized_pnl(), dec!(8.00));
        assert_eq!(pos.unrealized_pnl_pct(), dec!(0.2));
    }

    #[test]
    fn weighted_average_entry() {
        let mut pos = make_position(dec!(100), dec!(0.40));
        pos.add_fill(dec!(0.50), dec!(100));
        assert_eq!(pos.entry_price(), dec!(0.45));
        assert_eq!(pos.size(), dec!(200));
    }

    #[test]
    fn close_realizes_pnl_and_returns_proceeds() {
        let mut pos = make_position(dec!(100), dec!(0.40));
        let proceeds = pos.close(dec!(0.48));
        assert_eq!(proceeds, dec!(48.00));
        assert_eq!(pos.realized_pnl(), dec!(8.00));
        assert_eq!(pos.unrealized_pnl(), Decimal::ZERO);
        assert!(!pos.is_open());
    }

    #[test]
    fn losing_close() {
        let mut pos = make_position(dec!(50), dec!(0.60));
        pos.close(dec!(0.50));
        assert_eq!(pos.realized_pnl(), dec!(-5.00));
    }
}
