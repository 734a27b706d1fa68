//! Core domain types: markets, opportunities, strategies, orders,
//! positions, and the virtual account.

pub mod account;
pub mod ids;
pub mod market;
pub mod opportunity;
pub mod order;
pub mod position;
pub mod strategy;

pub use account::{Account, TradeRecord};
pub use ids::{MarketId, OrderId, PositionId, StrategyId, TokenId};
pub use market::{clamp_price, Market, OrderBook, PriceLevel, Quote, Side};
pub use opportunity::{Fingerprint, Opportunity, OpportunityKind, OpportunityStatus};
pub use order::{Fill, Order, OrderState, RemainderPolicy};
pub use position::Position;
pub use strategy::{RiskParams, RuleSet, StrategyBlueprint, StrategyKind, TestResults};
