//! Order lifecycle state machine.
//!
//! `Pending → {Filled, PartiallyFilled, Rejected, Cancelled}` and
//! `PartiallyFilled → {Filled, Cancelled}`. Filled, Cancelled, and
//! Rejected are terminal. Transitions are validated; an illegal
//! transition is a `ValidationError`, never silently applied.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{MarketId, OrderId, StrategyId};
use super::market::Side;
use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Pending,
    PartiallyFilled,
    Filled,
    Rejected,
    Cancelled,
}

impl OrderState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Rejected | Self::Cancelled)
    }
}

/// What the engine does with the unfilled remainder of a partial fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemainderPolicy {
    /// Cancel the remainder immediately (default).
    Cancel,
    /// Leave the order open for later fills.
    KeepOpen,
}

/// A single execution against an order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub price: Decimal,
    pub size: Decimal,
    pub at: DateTime<Utc>,
}

/// A simulated order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    strategy_id: StrategyId,
    market_id: MarketId,
    side: Side,
    requested_size: Decimal,
    requested_price: Decimal,
    state: OrderState,
    fills: Vec<Fill>,
    remainder_policy: RemainderPolicy,
    submitted_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        strategy_id: StrategyId,
        market_id: MarketId,
        side: Side,
        requested_size: Decimal,
        requested_price: Decimal,
        remainder_policy: RemainderPolicy,
    ) -> Result<Self, ValidationError> {
        if requested_size <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveSize {
                size: requested_size,
            });
        }
        super::market::validate_price(requested_price)?;
        Ok(Self {
            id: OrderId::generate(),
            strategy_id,
            market_id,
            side,
            requested_size,
            requested_price,
            state: OrderState::Pending,
            fills: Vec::new(),
            remainder_policy,
            submitted_at: Utc::now(),
        })
    }

    #[must_use]
    pub fn id(&self) -> OrderId {
        self.id
    }

    #[must_use]
    pub fn strategy_id(&self) -> &StrategyId {
        &self.strategy_id
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
    pub fn requested_size(&self) -> Decimal {
        self.requested_size
    }

    #[must_use]
    pub fn requested_price(&self) -> Decimal {
        self.requested_price
    }

    #[must_use]
    pub fn state(&self) -> OrderState {
        self.state
    }

    #[must_use]
    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    #[must_use]
    pub fn remainder_policy(&self) -> RemainderPolicy {
        self.remainder_policy
    }

    #[must_use]
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    /// Total size filled so far.
    #[must_use]
    pub fn filled_size(&self) -> Decimal {
        self.fills
            .iter()
            .fold(Decimal::ZERO, |acc, f| acc + f.size)
    }

    /// Unfilled remainder.
    #[must_use]
    pub fn remaining_size(&self) -> Decimal {
        self.requested_size - self.filled_size()
    }

    /// Size-weighted average fill price, zero when unfilled.
    #[must_use]
    pub fn average_fill_price(&self) -> Decimal {
        let filled = self.filled_size();
        if filled.is_zero() {
            return Decimal::ZERO;
        }
        let notional = self
            .fills
            .iter()
            .fold(Decimal::ZERO, |acc, f| acc + f.price * f.size);
        notional / filled
    }

    /// Apply a fill, moving `Pending`/`PartiallyFilled` toward `Filled`.
    pub fn apply_fill(&mut self, price: Decimal, size: Decimal) -> Result<(), ValidationError> {
        match self.state {
            OrderState::Pending | OrderState::PartiallyFilled => {}
            state => {
                return Err(ValidationError::Invalid(format!(
                    "cannot fill order {} in state {state:?}",
                    self.id
                )))
            }
        }
        if size <= Decimal::ZERO || size > self.remaining_size() {
            return Err(ValidationError::NonPositiveSize { size });
        }
        self.fills.push(Fill {
            price,
            size,
            at: Utc::now(),
        });
        self.state = if self.remaining_size().is_zero() {
            OrderState::Filled
        } else {
            OrderState::PartiallyFilled
        };
        Ok(())
    }

    /// Reject a pending order. Terminal.
    pub fn reject(&mut self) -> Result<(), ValidationError> {
        if self.state != OrderState::Pending {
            return Err(ValidationError::Invalid(format!(
                "cannot reject order {} in state {:?}",
                self.id, self.state
            )));
        }
        self.state = OrderState::Rejected;
        Ok(())
    }

    /// Cancel a pending or partially filled order. Fills already
    /// applied are kept; only the remainder is cancelled.
    pub fn cancel(&mut self) -> Result<(), ValidationError> {
        match self.state {
            OrderState::Pending | OrderState::PartiallyFilled => {
                self.state = OrderState::Cancelled;
                Ok(())
            }
            state => Err(ValidationError::Invalid(format!(
                "cannot cancel order {} in state {state:?}",
                self.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_order(size: Decimal) -> Order {
        Order::new(
            StrategyId::from("s1"),
            MarketId::from("m1"),
            Side::Yes,
            size,
            dec!(0.40),
            RemainderPolicy::Cancel,
        )
        .unwrap()
    }

    #[test]
    fn full_fill_terminates() {
        let mut order = make_order(dec!(100));
        order.apply_fill(dec!(0.41), dec!(100)).unwrap();
        assert_eq!(order.state(), OrderState::Filled);
        assert_eq!(order.filled_size(), dec!(100));
        assert!(order.state().is_terminal());
    }

    #[test]
    fn partial_fill_then_fill() {
        let mut order = make_order(dec!(100));
        order.apply_fill(dec!(0.40), dec!(60)).unwrap();
        assert_eq!(order.state(), OrderState::PartiallyFilled);
        assert_eq!(order.remaining_size(), dec!(40));
        order.apply_fill(dec!(0.42), dec!(40)).unwrap();
        assert_eq!(order.state(), OrderState::Filled);
        // (0.40*60 + 0.42*40) / 100 = 0.408
        assert_eq!(order.average_fill_price(), dec!(0.408));
    }

    #[test]
    fn partial_fill_then_cancel_keeps_fills() {
        let mut order = make_order(dec!(100));
        order.apply_fill(dec!(0.40), dec!(30)).unwrap();
        order.cancel().unwrap();
        assert_eq!(order.state(), OrderState::Cancelled);
        assert_eq!(order.filled_size(), dec!(30));
    }

    #[test]
    fn terminal_states_refuse_transitions() {
        let mut order = make_order(dec!(10));
        order.reject().unwrap();
        assert!(order.apply_fill(dec!(0.4), dec!(10)).is_err());
        assert!(order.cancel().is_err());
        assert!(order.reject().is_err());
    }

    #[test]
    fn overfill_is_rejected() {
        let mut order = make_order(dec!(10));
        assert!(order.apply_fill(dec!(0.4), dec!(11)).is_err());
    }

    #[test]
    fn new_validates_inputs() {
        assert!(Order::new(
            StrategyId::from("s1"),
            MarketId::from("m1"),
            Side::Yes,
            dec!(0),
            dec!(0.4),
            RemainderPolicy::Cancel,
        )
        .is_err());
        assert!(Order::new(
            StrategyId::from("s1"),
            MarketId::from("m1"),
            Side::Yes,
            dec!(10),
            dec!(1.5),
            RemainderPolicy::Cancel,
        )
        .is_err());
    }
}
