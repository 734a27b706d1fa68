//! Strategy blueprints: versioned, declarative trade rules.
//!
//! A registered blueprint is immutable. Evolution produces a child
//! blueprint carrying a parent reference; the registry holds every
//! version ever registered.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::StrategyId;
use super::opportunity::OpportunityKind;

/// Strategy family, aligned with the opportunity kinds it trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Arbitrage,
    NewsDriven,
    ProbabilityEdge,
    TimeDecay,
    Liquidity,
}

impl StrategyKind {
    /// Whether this strategy family trades the given opportunity kind.
    #[must_use]
    pub fn matches(self, kind: OpportunityKind) -> bool {
        matches!(
            (self, kind),
            (Self::Arbitrage, OpportunityKind::Arbitrage)
                | (Self::NewsDriven, OpportunityKind::NewsGap)
                | (Self::ProbabilityEdge, OpportunityKind::ProbabilityEdge)
                | (Self::TimeDecay, OpportunityKind::TimeDecay)
                | (Self::Liquidity, OpportunityKind::Liquidity)
        )
    }
}

/// Risk parameters governing positions opened under a blueprint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskParams {
    /// Close when unrealized loss reaches this fraction of entry.
    pub stop_loss_pct: Decimal,
    /// Close when unrealized gain reaches this fraction of entry.
    pub take_profit_pct: Decimal,
    /// Max position as a fraction of account equity.
    pub max_position_size: Decimal,
    /// Portfolio drawdown fraction this strategy tolerates.
    pub max_drawdown: Decimal,
}

/// Back-test / trial performance summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestResults {
    pub win_rate: f64,
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub total_trades: usize,
}

/// Entry/exit rule sets keyed by side.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(rename = "YES", default)]
    pub yes: Vec<String>,
    #[serde(rename = "NO", default)]
    pub no: Vec<String>,
}

/// A versioned, declarative description of a trading strategy.
///
/// The serialized form is the persisted/exchanged representation:
/// `name, description, strategy_type, parameters, entry_rules,
/// exit_rules, risk_management, test_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyBlueprint {
    pub id: StrategyId,
    pub name: String,
    pub description: String,
    pub strategy_type: StrategyKind,
    pub parameters: BTreeMap<String, Decimal>,
    pub entry_rules: RuleSet,
    pub exit_rules: RuleSet,
    pub risk_management: RiskParams,
    pub test_results: Option<TestResults>,
    /// Blueprint this one was mutated from, if any.
    pub parent: Option<StrategyId>,
    pub created_at: DateTime<Utc>,
}

impl StrategyBlueprint {
    /// Look up a numeric parameter.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<Decimal> {
        self.parameters.get(name).copied()
    }

    /// Back-test win rate, zero when untested.
    #[must_use]
    pub fn win_rate(&self) -> f64 {
        self.test_results.map_or(0.0, |r| r.win_rate)
    }

    /// Derive a mutated child. Parameters are replaced wholesale by the
    /// caller (the evolver perturbs them); rules and kind carry over.
    #[must_use]
    pub fn child(&self, name: String, parameters: BTreeMap<String, Decimal>) -> Self {
        Self {
            id: StrategyId::generate(),
            name,
            description: format!("mutation of {}", self.name),
            strategy_type: self.strategy_type,
            parameters,
            entry_rules: self.entry_rules.clone(),
            exit_rules: self.exit_rules.clone(),
            risk_management: self.risk_management,
            test_results: None,
            parent: Some(self.id.clone()),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_blueprint() -> StrategyBlueprint {
        StrategyBlueprint {
            id: StrategyId::from("bp-1"),
            name: "arb_tight".into(),
            description: "Buys both sides under 0.98".into(),
            strategy_type: StrategyKind::Arbitrage,
            parameters: BTreeMap::from([
                ("min_edge".into(), dec!(0.02)),
                ("min_liquidity".into(), dec!(1000)),
            ]),
            entry_rules: RuleSet {
                yes: vec!["ask_sum < 0.98".into()],
                no: vec!["ask_sum < 0.98".into()],
            },
            exit_rules: RuleSet {
                yes: vec!["take_profit OR stop_loss".into()],
                no: vec!["take_profit OR stop_loss".into()],
            },
            risk_management: RiskParams {
                stop_loss_pct: dec!(0.1),
                take_profit_pct: dec!(0.2),
                max_position_size: dec!(0.2),
                max_drawdown: dec!(0.2),
            },
            test_results: Some(TestResults {
                win_rate: 0.62,
                total_return: 0.14,
                sharpe_ratio: 1.4,
                max_drawdown: 0.11,
                total_trades: 60,
            }),
            parent: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn serde_round_trip_is_identical() {
        let blueprint = make_blueprint();
        let json = serde_json::to_string(&blueprint).unwrap();
        let reloaded: StrategyBlueprint = serde_json::from_str(&json).unwrap();
        assert_eq!(blueprint, reloaded);
    }

    #[test]
    fn rules_serialize_with_side_keys() {
        let blueprint = make_blueprint();
        let json = serde_json::to_value(&blueprint).unwrap();
        assert!(json["entry_rules"]["YES"].is_array());
        assert!(json["exit_rules"]["NO"].is_array());
        assert_eq!(json["risk_management"]["stop_loss_pct"], "0.1");
    }

    #[test]
    fn child_carries_parent_reference() {
        let parent = make_blueprint();
        let child = parent.child(
            "arb_tight_v2".into(),
            BTreeMap::from([("min_edge".into(), dec!(0.025))]),
        );
        assert_eq!(child.parent.as_ref(), Some(&parent.id));
        assert_eq!(child.strategy_type, parent.strategy_type);
        assert!(child.test_results.is_none());
        assert_ne!(child.id, parent.id);
    }

    #[test]
    fn kind_matching() {
        assert!(StrategyKind::Arbitrage.matches(OpportunityKind::Arbitrage));
        assert!(StrategyKind::NewsDriven.matches(OpportunityKind::NewsGap));
        assert!(!StrategyKind::TimeDecay.matches(OpportunityKind::Arbitrage));
    }
}
