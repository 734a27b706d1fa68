//! Position sizing and portfolio-level risk limits.
//!
//! Sizing is fixed-fractional scaled by opportunity confidence and
//! bounded by a half-Kelly estimate, capped at `max_position_size` of
//! equity. A portfolio drawdown breaker rejects all new entries once
//! drawdown from peak equity exceeds the configured fraction, and only
//! clears after recovery below a hysteresis threshold so it cannot
//! thrash at the boundary.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::TradingConfig;
use crate::domain::{Opportunity, StrategyBlueprint};
use crate::error::RiskError;

#[derive(Debug, Default)]
struct BreakerState {
    tripped: bool,
}

/// Portfolio risk manager.
pub struct RiskManager {
    config: TradingConfig,
    breaker: Mutex<BreakerState>,
}

impl RiskManager {
    #[must_use]
    pub fn new(config: TradingConfig) -> Self {
        Self {
            config,
            breaker: Mutex::new(BreakerState::default()),
        }
    }

    /// Feed the current drawdown; trips or clears the breaker.
    ///
    /// Trips at `max_drawdown`; clears only below
    /// `max_drawdown * drawdown_recovery`.
    pub fn observe_drawdown(&self, drawdown: Decimal) {
        let mut breaker = self.breaker.lock();
        if !breaker.tripped && drawdown >= self.config.max_drawdown {
            warn!(%drawdown, limit = %self.config.max_drawdown, "drawdown breaker tripped");
            breaker.tripped = true;
        } else if breaker.tripped
            && drawdown < self.config.max_drawdown * self.config.drawdown_recovery
        {
            info!(%drawdown, "drawdown recovered, breaker cleared");
            breaker.tripped = false;
        }
    }

    #[must_use]
    pub fn is_breaker_tripped(&self) -> bool {
        self.breaker.lock().tripped
    }

    /// Propose a position notional for an opportunity under a strategy.
    ///
    /// Fixed fraction scaled by confidence, bounded by half-Kelly from
    /// the opportunity's edge, capped by the tighter of the strategy's
    /// and the portfolio's `max_position_size`.
    #[must_use]
    pub fn size_position(
        &self,
        equity: Decimal,
        strategy: &StrategyBlueprint,
        opportunity: &Opportunity,
    ) -> Decimal {
        let cap_fraction = self
            .config
            .max_position_size
            .min(strategy.risk_management.max_position_size);
        let confidence =
            Decimal::try_from(opportunity.confidence()).unwrap_or(Decimal::ZERO);
        let base = cap_fraction * confidence;
        let kelly = half_kelly_fraction(opportunity.entry_price(), opportunity.edge());
        let fraction = base.min(kelly).min(cap_fraction).max(Decimal::ZERO);
        equity * fraction
    }

    /// Validate an order notional against portfolio limits.
    pub fn check_order(
        &self,
        equity: Decimal,
        available_capital: Decimal,
        notional: Decimal,
        open_positions: usize,
    ) -> Result<(), RiskError> {
        if self.is_breaker_tripped() {
            return Err(RiskError::DrawdownBreakerActive {
                drawdown: self.config.max_drawdown,
                limit: self.config.max_drawdown,
            });
        }
        let limit = equity * self.config.max_position_size;
        if notional > limit {
            return Err(RiskError::PositionSizeExceeded {
                requested: notional,
                limit,
            });
        }
        if notional > available_capital {
            return Err(RiskError::InsufficientCapital {
                needed: notional,
                available: available_capital,
            });
        }
        if open_positions >= self.config.max_concurrent_positions {
            return Err(RiskError::TooManyPositions {
                open: open_positions,
                limit: self.config.max_concurrent_positions,
            });
        }
        Ok(())
    }
}

/// Half-Kelly fraction for buying at `price` with expected `edge`.
///
/// Win probability is taken as price + edge (the mispricing estimate);
/// payout odds for a binary token bought at p are (1-p)/p.
#[must_use]
fn half_kelly_fraction(price: Decimal, edge: Decimal) -> Decimal {
    if price <= Decimal::ZERO || price >= Decimal::ONE || edge <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let win_prob = (price + edge).min(Decimal::ONE);
    let lose_prob = Decimal::ONE - win_prob;
    let odds = (Decimal::ONE - price) / price;
    let kelly = (win_prob * odds - lose_prob) / odds;
    (kelly / Decimal::TWO).max(Decimal::ZERO)
}
