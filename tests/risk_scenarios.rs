//! Risk Window Scenarios
//!
//! Drives the full engine through a high-severity event timeline and
//! verifies the GREEN/YELLOW/RED transitions an operator would observe,
//! including the cooldown tail after the event window closes.

use rust_decimal_macros::dec;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use decision_core_rs::context::{ExecutionContext, SimulatedTimeProvider, DeterministicIdProvider};
use decision_core_rs::engine::{ExecutionEngine, SubmitRequest};
use decision_core_rs::model::{
    ControlState, DecisionAction, IntentKind, Permission, RiskEvent, Severity, StrategyIntent,
};
use decision_core_rs::persistence::redb_store::RedbStore;
use decision_core_rs::risk_engine::RiskConfig;

const HOUR_MS: i64 = 3_600_000;
/// 2026-01-15 00:00 UTC, an arbitrary session day.
const MIDNIGHT: i64 = 1_768_435_200_000;

fn open_engine(time: Arc<SimulatedTimeProvider>) -> ExecutionEngine {
    let dir = PathBuf::from(format!("/tmp/risk_scenario_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("tmp dir");
    let store = Arc::new(RedbStore::new(dir.join("core.redb")).expect("redb"));
    let ctx = ExecutionContext {
        time,
        id: Arc::new(DeterministicIdProvider::new()),
    };
    ExecutionEngine::open(ctx, RiskConfig::default(), store, &dir, 300_000).expect("engine")
}

fn entry(event_id: &str, intent_id: &str, events: Vec<RiskEvent>) -> SubmitRequest {
    SubmitRequest {
        intent: StrategyIntent {
            event_id: event_id.into(),
            intent_id: intent_id.into(),
            strategy_id: "trend-1".into(),
            symbol: "BTC/USDT".into(),
            timeframe: "1h".into(),
            kind: IntentKind::EnterLong,
            quantity: dec!(1),
            limit_price: Some(dec!(50000)),
            stop_loss: Some(dec!(49000)),
            take_profit: None,
            bracket: false,
            t_signal: MIDNIGHT,
        },
        risk_events: events,
        control: ControlState::armed(1),
        market_data: Some(json!({"close": 50000.0})),
        features: None,
    }
}

/// A HIGH event at 12:00 with defaults (pre 120m, post 60m, cooldown 180m):
/// RED from 10:00 through 16:00, GREEN before and after.
#[test]
fn test_high_event_timeline() {
    let high_event = RiskEvent {
        event_id: "FOMC-1".into(),
        event_time: MIDNIGHT + 12 * HOUR_MS,
        severity: Severity::High,
        category: "FOMC".into(),
    };

    let timeline = [
        (9, DecisionAction::Placed, Permission::Allow),   // before pre-window
        (10, DecisionAction::Blocked, Permission::Block), // pre-window opens
        (12, DecisionAction::Blocked, Permission::Block), // at event time
        (13, DecisionAction::Blocked, Permission::Block), // post-window edge
        (15, DecisionAction::Blocked, Permission::Block), // cooldown tail
        (17, DecisionAction::Placed, Permission::Allow),  // cooldown over
    ];

    for (hour, expected_action, expected_permission) in timeline {
        // Fresh engine per instant so earlier fills cannot gate later ones.
        let time = Arc::new(SimulatedTimeProvider::new(MIDNIGHT + hour * HOUR_MS));
        let engine = open_engine(time);

        let outcome = engine
            .submit(entry(
                &format!("E-{}", hour),
                &format!("I-{}", hour),
                vec![high_event.clone()],
            ))
            .expect("submit");
        assert_eq!(outcome.action, expected_action, "hour {}", hour);
        assert_eq!(outcome.permission, expected_permission, "hour {}", hour);
    }
    println!("✅ HIGH event timeline enforced");
}

/// A MEDIUM event restricts but does not block, and the cooldown tail does
/// not apply to it.
#[test]
fn test_medium_event_restricts_in_window_only() {
    let medium_event = RiskEvent {
        event_id: "CPI-1".into(),
        event_time: MIDNIGHT + 12 * HOUR_MS,
        severity: Severity::Medium,
        category: "CPI".into(),
    };

    // In window: restricted, half size.
    let time = Arc::new(SimulatedTimeProvider::new(MIDNIGHT + 12 * HOUR_MS));
    let engine = open_engine(time);
    let outcome = engine
        .submit(entry("E1", "I1", vec![medium_event.clone()]))
        .expect("submit");
    assert_eq!(outcome.permission, Permission::Restrict);
    let position = engine.position("trend-1", "BTC/USDT").expect("position");
    assert_eq!(position.quantity, dec!(0.5));

    // Just past the post window: no MEDIUM cooldown, full size again.
    let time = Arc::new(SimulatedTimeProvider::new(MIDNIGHT + 13 * HOUR_MS + 60_000));
    let engine = open_engine(time);
    let outcome = engine
        .submit(entry("E2", "I2", vec![medium_event]))
        .expect("submit");
    assert_eq!(outcome.permission, Permission::Allow);
    let position = engine.position("trend-1", "BTC/USDT").expect("position");
    assert_eq!(position.quantity, dec!(1));
    println!("✅ MEDIUM event restriction window enforced");
}

/// The blocked record names the contributing event; the placed record
/// carries the GREEN reason trail.
#[test]
fn test_reason_trail_names_events() {
    let high_event = RiskEvent {
        event_id: "FOMC-1".into(),
        event_time: MIDNIGHT + 12 * HOUR_MS,
        severity: Severity::High,
        category: "FOMC".into(),
    };
    let time = Arc::new(SimulatedTimeProvider::new(MIDNIGHT + 12 * HOUR_MS));
    let engine = open_engine(time);
    engine
        .submit(entry("E1", "I1", vec![high_event]))
        .expect("submit");

    let record = engine.log().read_line(1).expect("record");
    assert_eq!(record.action, DecisionAction::Blocked);
    assert_eq!(record.risk_state.event_ids, vec!["FOMC-1".to_string()]);
    assert!(record.risk_state.reasons[0].contains("FOMC"));
    println!("✅ reason trail names contributing events");
}
