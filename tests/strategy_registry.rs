//! Strategy registry behavior: seeding, announcements, immutability,
//! and evolution lineage.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use paperhive::agent::generator::{backtest, default_blueprint, passes_gate, GeneratorAgent};
use paperhive::bus::{Event, MessageBus, Topic};
use paperhive::config::Config;
use paperhive::domain::{MarketId, Side, StrategyKind, TradeRecord};
use paperhive::engine::DemoTradingEngine;
use paperhive::feed::SimulatedFeed;
use paperhive::risk::RiskManager;
use paperhive::store::KnowledgeStore;

fn wiring() -> (Arc<MessageBus>, Arc<KnowledgeStore>, Arc<DemoTradingEngine>) {
    let config = Config::default();
    let bus = Arc::new(MessageBus::new(64));
    let store = Arc::new(KnowledgeStore::new(bus.clone()));
    let risk = Arc::new(RiskManager::new(config.trading.clone()));
    let feed = Arc::new(SimulatedFeed::new(1, Decimal::ZERO));
    let engine = Arc::new(DemoTradingEngine::new(
        config.trading,
        risk,
        store.clone(),
        bus.clone(),
        feed,
    ));
    (bus, store, engine)
}

#[tokio::test]
async fn seeding_announces_each_blueprint() {
    let (bus, store, engine) = wiring();
    let mut generated = bus.subscribe(Topic::StrategyGenerated);
    let agent = GeneratorAgent::new(Config::default(), store.clone(), engine);

    assert_eq!(agent.seed_defaults().unwrap(), 5);
    let mut announced = 0;
    while let Some(event) = generated.try_recv() {
        assert!(matches!(event, Event::StrategyGenerated(_)));
        announced += 1;
    }
    assert_eq!(announced, 5);
}

#[tokio::test]
async fn registered_blueprints_are_immutable() {
    let (_bus, store, _engine) = wiring();
    let blueprint = default_blueprint(StrategyKind::TimeDecay, &Config::default());
    store.put_strategy(blueprint.clone()).unwrap();
    // Same id again: rejected; the registry keeps the original.
    assert!(store.put_strategy(blueprint.clone()).is_err());
    assert_eq!(store.strategy_count(), 1);
    assert_eq!(
        store.get_strategy(&blueprint.id).unwrap().name,
        blueprint.name
    );
}

#[tokio::test]
async fn child_registration_announces_lineage() {
    let (bus, store, _engine) = wiring();
    let mut evolved = bus.subscribe(Topic::StrategyEvolved);

    let parent = default_blueprint(StrategyKind::Arbitrage, &Config::default());
    store.put_strategy(parent.clone()).unwrap();
    let child = parent.child(
        "arb_sum_mut".into(),
        BTreeMap::from([("min_edge".into(), dec!(0.018))]),
    );
    store.put_strategy(child.clone()).unwrap();

    match evolved.try_recv() {
        Some(Event::StrategyEvolved { parent: p, child: c }) => {
            assert_eq!(p, parent.id);
            assert_eq!(c, child.id);
        }
        other => panic!("expected evolution event, got {other:?}"),
    }
}

fn exit_trade(pnl: Decimal) -> TradeRecord {
    TradeRecord::new(
        MarketId::from("m1"),
        paperhive::domain::StrategyId::from("s1"),
        Side::Yes,
        dec!(0.5),
        dec!(100),
        pnl,
    )
}

#[test]
fn gate_passes_profitable_history_and_blocks_drawdown() {
    let config = Config::default();

    // 6 wins, 4 losses, shallow drawdown: registers.
    let mut trades = Vec::new();
    for _ in 0..6 {
        trades.push(exit_trade(dec!(50)));
    }
    for _ in 0..4 {
        trades.push(exit_trade(dec!(-30)));
    }
    let results = backtest(&trades, dec!(10000));
    assert!((results.win_rate - 0.6).abs() < 1e-9);
    assert!(passes_gate(&results, &config.evolution));

    // One catastrophic loss blows the drawdown cap even at a good
    // win rate.
    trades.push(exit_trade(dec!(-3000)));
    for _ in 0..8 {
        trades.push(exit_trade(dec!(10)));
    }
    let results = backtest(&trades, dec!(10000));
    assert!(results.max_drawdown >= 0.20);
    assert!(!passes_gate(&results, &config.evolution));
}

#[test]
fn serialized_blueprint_keeps_side_keyed_rules() {
    let blueprint = default_blueprint(StrategyKind::Liquidity, &Config::default());
    let json = serde_json::to_value(&blueprint).unwrap();
    assert!(json["entry_rules"]["YES"].is_array());
    assert!(json["exit_rules"]["NO"].is_array());
    assert_eq!(json["strategy_type"], "liquidity");
    assert!(json["test_results"].is_null());
}
