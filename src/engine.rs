//! Demo trading engine: order lifecycle, simulated fills, and PnL.
//!
//! The engine exclusively owns Order, Position, and Account state. No
//! other component applies these transitions; analysis or evolution
//! failures can never corrupt committed account state. Position updates
//! are published on the bus and indexed by the knowledge store for
//! query only.
//!
//! Bookkeeping invariant, checked by the test suite: at all times
//! `capital + open entry cost == initial capital + realized PnL`, so
//! equity (capital + entry cost + unrealized) conserves value across
//! any sequence of fills and closes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashSet;
use parking_lot::Mutex;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info, warn};

use crate::bus::{Event, MessageBus};
use crate::config::TradingConfig;
use crate::domain::{
    clamp_price, Account, Market, MarketId, Opportunity, Order, OrderBook, OrderState, Position,
    PositionId, RemainderPolicy, Side, StrategyBlueprint, StrategyId, TradeRecord,
};
use crate::error::{Error, Result, RiskError};
use crate::feed::MarketDataProvider;
use crate::risk::RiskManager;
use crate::store::KnowledgeStore;

/// Positions this close to resolution are force-closed.
const FORCED_CLOSE_WINDOW_HOURS: i64 = 1;

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TimeClose,
    Manual,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
            Self::TimeClose => "time_close",
            Self::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

/// Aggregate trading statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TradingStats {
    pub capital: Decimal,
    pub equity: Decimal,
    pub initial_capital: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub roi_pct: Decimal,
    pub total_trades: usize,
    pub win_rate: f64,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub open_positions: usize,
    pub closed_positions: usize,
}

struct EngineState {
    account: Account,
    open_positions: HashMap<(MarketId, Side), Position>,
    closed_positions: Vec<Position>,
    orders: Vec<Order>,
    next_position_id: u64,
}

impl EngineState {
    fn equity(&self) -> Decimal {
        let open_value = self
            .open_positions
            .values()
            .fold(Decimal::ZERO, |acc, p| acc + p.entry_cost() + p.unrealized_pnl());
        self.account.capital() + open_value
    }

    fn unrealized(&self) -> Decimal {
        self.open_positions
            .values()
            .fold(Decimal::ZERO, |acc, p| acc + p.unrealized_pnl())
    }

    fn next_position_id(&mut self) -> PositionId {
        let id = PositionId::new(self.next_position_id);
        self.next_position_id += 1;
        id
    }
}

/// The demo trading engine.
pub struct DemoTradingEngine {
    config: TradingConfig,
    risk: Arc<RiskManager>,
    store: Arc<KnowledgeStore>,
    bus: Arc<MessageBus>,
    feed: Arc<dyn MarketDataProvider>,
    state: Mutex<EngineState>,
    /// At-most-one in-flight submission per (strategy, market).
    in_flight: DashSet<(StrategyId, MarketId)>,
}

impl DemoTradingEngine {
    #[must_use]
    pub fn new(
        config: TradingConfig,
        risk: Arc<RiskManager>,
        store: Arc<KnowledgeStore>,
        bus: Arc<MessageBus>,
        feed: Arc<dyn MarketDataProvider>,
    ) -> Self {
        let account = Account::new(config.initial_capital);
        Self {
            config,
            risk,
            store,
            bus,
            feed,
            state: Mutex::new(EngineState {
                account,
                open_positions: HashMap::new(),
                closed_positions: Vec::new(),
                orders: Vec::new(),
                next_position_id: 1,
            }),
            in_flight: DashSet::new(),
        }
    }

    /// Execute an opportunity under a governing strategy.
    ///
    /// Sizes via the risk manager, simulates the fill against the
    /// current order book, applies position and account updates, and
    /// publishes the resulting events. Risk vetoes terminate the order
    /// in `Rejected` and surface as `RiskError`.
    pub async fn execute(
        &self,
        opportunity: &Opportunity,
        strategy: &StrategyBlueprint,
    ) -> Result<Order> {
        let key = (strategy.id.clone(), opportunity.market_id().clone());
        if !self.in_flight.insert(key.clone()) {
            return Err(RiskError::DuplicateInFlight {
                strategy: strategy.id.to_string(),
                market: opportunity.market_id().to_string(),
            }
            .into());
        }
        let result = self.execute_inner(opportunity, strategy).await;
        self.in_flight.remove(&key);
        result
    }

    async fn execute_inner(
        &self,
        opportunity: &Opportunity,
        strategy: &StrategyBlueprint,
    ) -> Result<Order> {
        let book = self.feed.order_book(opportunity.market_id()).await?;

        let (equity, capital, open_count) = {
            let state = self.state.lock();
            (
                state.equity(),
                state.account.capital(),
                state.open_positions.len(),
            )
        };

        let notional = self.risk.size_position(equity, strategy, opportunity);
        let entry_price = opportunity.entry_price();
        if notional.is_zero() || entry_price.is_zero() {
            return Err(RiskError::PositionSizeExceeded {
                requested: notional,
                limit: Decimal::ZERO,
            }
            .into());
        }
        // Size against the worst-case slipped price, rounded down, so
        // the debited notional never exceeds the risk-approved amount.
        let size = (notional / (entry_price * (Decimal::ONE + self.config.max_slippage)))
            .round_dp_with_strategy(6, RoundingStrategy::ToZero);

        let mut order = Order::new(
            strategy.id.clone(),
            opportunity.market_id().clone(),
            opportunity.side(),
            size,
            entry_price,
            RemainderPolicy::Cancel,
        )?;

        if let Err(veto) = self.risk.check_order(equity, capital, notional, open_count) {
            warn!(
                order_id = %order.id(),
                market_id = %order.market_id(),
                error = %veto,
                "order rejected by risk manager"
            );
            order.reject()?;
            self.state.lock().orders.push(order.clone());
            return Err(Error::Risk(veto));
        }

        self.fill(&mut order, &book, strategy)?;
        self.state.lock().orders.push(order.clone());
        Ok(order)
    }

    /// Simulate fills for a pending order against the visible book.
    fn fill(
        &self,
        order: &mut Order,
        book: &OrderBook,
        strategy: &StrategyBlueprint,
    ) -> Result<()> {
        let liquidity = book.visible_liquidity(order.side());
        let requested = order.requested_size();
        let fill_size = requested.min(liquidity);
        if fill_size <= Decimal::ZERO {
            debug!(order_id = %order.id(), "no visible liquidity, cancelling");
            order.cancel()?;
            return Ok(());
        }

        let price = self.slipped_price(order.requested_price(), requested, liquidity);
        order.apply_fill(price, fill_size)?;

        if order.state() == OrderState::PartiallyFilled
            && order.remainder_policy() == RemainderPolicy::Cancel
        {
            order.cancel()?;
        }

        self.apply_entry(order, strategy, price, fill_size);
        Ok(())
    }

    /// Linear slippage on size relative to visible liquidity, capped.
    fn slipped_price(&self, requested: Decimal, size: Decimal, liquidity: Decimal) -> Decimal {
        let ratio = if liquidity.is_zero() {
            Decimal::ONE
        } else {
            (size / liquidity).min(Decimal::ONE)
        };
        let slip = (self.config.slippage_factor * ratio).min(self.config.max_slippage);
        clamp_price(requested * (Decimal::ONE + slip))
    }

    /// Apply a completed entry fill to position and account state.
    fn apply_entry(
        &self,
        order: &Order,
        strategy: &StrategyBlueprint,
        price: Decimal,
        size: Decimal,
    ) {
        let notional = price * size;
        let position = {
            let mut state = self.state.lock();
            state.account.debit(notional);

            let key = (order.market_id().clone(), order.side());
            let position = match state.open_positions.get_mut(&key) {
                Some(position) => {
                    position.add_fill(price, size);
                    position.clone()
                }
                None => {
                    let id = state.next_position_id();
                    let position = Position::open(
                        id,
                        order.market_id().clone(),
                        order.side(),
                        strategy.id.clone(),
                        size,
                        price,
                    );
                    state.open_positions.insert(key, position.clone());
                    position
                }
            };

            let trade = TradeRecord::new(
                order.market_id().clone(),
                strategy.id.clone(),
                order.side(),
                price,
                size,
                Decimal::ZERO,
            );
            state.account.record_trade(trade.clone());
            let equity = state.equity();
            state.account.observe_equity(equity);
            self.bus.publish(Event::TradeExecuted(Arc::new(trade)));
            position
        };

        info!(
            market_id = %order.market_id(),
            side = %order.side(),
            %price,
            %size,
            "entry filled"
        );
        self.publish_position(position);
    }

    /// Close an open position at the current bid.
    pub async fn close_position(
        &self,
        market_id: &MarketId,
        side: Side,
        reason: ExitReason,
    ) -> Result<Option<Position>> {
        let exit_price = match self.feed.mark_price(market_id, side).await {
            Ok(price) => price,
            Err(e) => {
                warn!(market_id = %market_id, error = %e, "no exit price, close deferred");
                return Ok(None);
            }
        };

        let closed = {
            let mut state = self.state.lock();
            let key = (market_id.clone(), side);
            let Some(mut position) = state.open_positions.remove(&key) else {
                return Ok(None);
            };
            let proceeds = position.close(exit_price);
            let realized = position.realized_pnl();
            state.account.credit(proceeds, realized);

            let trade = TradeRecord::new(
                market_id.clone(),
                position.strategy_id().clone(),
                side,
                exit_price,
                position.size(),
                realized,
            );
            state.account.record_trade(trade.clone());
            state.closed_positions.push(position.clone());
            let equity = state.equity();
            state.account.observe_equity(equity);
            self.bus.publish(Event::TradeExecuted(Arc::new(trade)));
            position
        };

        info!(
            market_id = %market_id,
            side = %side,
            %exit_price,
            pnl = %closed.realized_pnl(),
            %reason,
            "position closed"
        );
        self.publish_position(closed.clone());
        Ok(Some(closed))
    }

    /// Mark all open positions to market and fire exit triggers:
    /// stop-loss and take-profit bounds from the governing blueprint,
    /// and forced close near resolution.
    pub async fn sweep_positions(&self) -> Result<()> {
        let open: Vec<(MarketId, Side, StrategyId)> = {
            let state = self.state.lock();
            state
                .open_positions
                .values()
                .map(|p| (p.market_id().clone(), p.side(), p.strategy_id().clone()))
                .collect()
        };

        let now = Utc::now();
        for (market_id, side, strategy_id) in open {
            let mark = match self.feed.mark_price(&market_id, side).await {
                Ok(price) => price,
                Err(_) => continue, // retried next sweep
            };

            let (pnl_pct, position) = {
                let mut state = self.state.lock();
                let key = (market_id.clone(), side);
                let Some(position) = state.open_positions.get_mut(&key) else {
                    continue;
                };
                position.mark(mark);
                (position.unrealized_pnl_pct(), position.clone())
            };
            self.publish_position(position);

            let reason = self
                .exit_reason(&strategy_id, pnl_pct)
                .or_else(|| self.time_close_reason(&market_id, now));
            if let Some(reason) = reason {
                self.close_position(&market_id, side, reason).await?;
            }
        }

        let (equity, drawdown) = {
            let mut state = self.state.lock();
            let equity = state.equity();
            state.account.observe_equity(equity);
            (equity, state.account.drawdown(equity))
        };
        self.risk.observe_drawdown(drawdown);
        debug!(%equity, %drawdown, "position sweep complete");
        Ok(())
    }

    fn exit_reason(&self, strategy_id: &StrategyId, pnl_pct: Decimal) -> Option<ExitReason> {
        let strategy = self.store.get_strategy(strategy_id)?;
        let risk = strategy.risk_management;
        if pnl_pct <= -risk.stop_loss_pct {
            Some(ExitReason::StopLoss)
        } else if pnl_pct >= risk.take_profit_pct {
            Some(ExitReason::TakeProfit)
        } else {
            None
        }
    }

    fn time_close_reason(
        &self,
        market_id: &MarketId,
        now: chrono::DateTime<Utc>,
    ) -> Option<ExitReason> {
        let market: Market = self.store.get_market(market_id)?;
        let resolution = market.resolution_at?;
        (resolution - now < Duration::hours(FORCED_CLOSE_WINDOW_HOURS))
            .then_some(ExitReason::TimeClose)
    }

    fn publish_position(&self, position: Position) {
        self.store.index_position(position.clone());
        self.bus.publish(Event::PositionUpdated(Arc::new(position)));
    }

    /// Drive every non-terminal order to a terminal state. Called on
    /// shutdown so partial fills are never silently lost.
    pub fn drain(&self) {
        let mut state = self.state.lock();
        for order in &mut state.orders {
            if !order.state().is_terminal() {
                if let Err(e) = order.cancel() {
                    warn!(order_id = %order.id(), error = %e, "drain cancel failed");
                }
            }
        }
        info!("order book drained");
    }

    // -- queries ---------------------------------------------------------

    #[must_use]
    pub fn equity(&self) -> Decimal {
        self.state.lock().equity()
    }

    #[must_use]
    pub fn capital(&self) -> Decimal {
        self.state.lock().account.capital()
    }

    #[must_use]
    pub fn realized_pnl(&self) -> Decimal {
        self.state.lock().account.realized_pnl()
    }

    #[must_use]
    pub fn unrealized_pnl(&self) -> Decimal {
        self.state.lock().unrealized()
    }

    #[must_use]
    pub fn open_position_count(&self) -> usize {
        self.state.lock().open_positions.len()
    }

    #[must_use]
    pub fn open_positions(&self) -> Vec<Position> {
        self.state.lock().open_positions.values().cloned().collect()
    }

    #[must_use]
    pub fn trades(&self) -> Vec<TradeRecord> {
        self.state.lock().account.trades().to_vec()
    }

    /// Closed trades attributable to one strategy, oldest first.
    #[must_use]
    pub fn closed_trades_for(&self, strategy_id: &StrategyId) -> Vec<TradeRecord> {
        self.state
            .lock()
            .account
            .trades()
            .iter()
            .filter(|t| t.strategy_id == *strategy_id && !t.pnl.is_zero())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().orders.clone()
    }

    #[must_use]
    pub fn stats(&self) -> TradingStats {
        let state = self.state.lock();
        let trades = state.account.trades();
        let exits: Vec<&TradeRecord> = trades.iter().filter(|t| !t.pnl.is_zero()).collect();
        let wins: Vec<&&TradeRecord> = exits.iter().filter(|t| t.pnl > Decimal::ZERO).collect();
        let losses: Vec<&&TradeRecord> = exits.iter().filter(|t| t.pnl < Decimal::ZERO).collect();

        let avg = |set: &[&&TradeRecord]| {
            if set.is_empty() {
                Decimal::ZERO
            } else {
                set.iter().fold(Decimal::ZERO, |acc, t| acc + t.pnl)
                    / Decimal::from(set.len() as u64)
            }
        };

        let equity = state.equity();
        let initial = state.account.initial_capital();
        let roi_pct = if initial.is_zero() {
            Decimal::ZERO
        } else {
            (equity - initial) / initial * Decimal::ONE_HUNDRED
        };

        TradingStats {
            capital: state.account.capital(),
            equity,
            initial_capital: initial,
            realized_pnl: state.account.realized_pnl(),
            unrealized_pnl: state.unrealized(),
            roi_pct,
            total_trades: trades.len(),
            win_rate: if exits.is_empty() {
                0.0
            } else {
                wins.len() as f64 / exits.len() as f64
            },
            avg_win: avg(&wins),
            avg_loss: avg(&losses),
            open_positions: state.open_positions.len(),
            closed_positions: state.closed_positions.len(),
        }
    }
}
