//! Replay Roundtrip
//!
//! A full live session — entries, a restriction, a block, a hold, a
//! duplicate and an exit — must replay clean under the strictest mode,
//! and a consistently re-sealed forgery must still be caught.

use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use decision_core_rs::audit::log::compute_hashes;
use decision_core_rs::audit::DecisionLog;
use decision_core_rs::codec;
use decision_core_rs::context::ExecutionContext;
use decision_core_rs::engine::{ExecutionEngine, SubmitRequest};
use decision_core_rs::model::{
    ControlState, DecisionAction, IntentKind, RiskEvent, Severity, StrategyIntent,
};
use decision_core_rs::persistence::redb_store::RedbStore;
use decision_core_rs::replay::{ReplayEngine, ReplayMode, ReplayStatus, RiskMode};
use decision_core_rs::risk_engine::RiskConfig;
use decision_core_rs::snapshot::SnapshotStore;

const T0: i64 = 1_768_435_200_000;

fn open_engine(dir: &PathBuf) -> ExecutionEngine {
    let store = Arc::new(RedbStore::new(dir.join("core.redb")).expect("redb"));
    ExecutionEngine::open(
        ExecutionContext::new_simulated(T0),
        RiskConfig::default(),
        store,
        dir,
        300_000,
    )
    .expect("engine")
}

fn request(
    event_id: &str,
    intent_id: &str,
    symbol: &str,
    kind: IntentKind,
    events: Vec<RiskEvent>,
) -> SubmitRequest {
    SubmitRequest {
        intent: StrategyIntent {
            event_id: event_id.into(),
            intent_id: intent_id.into(),
            strategy_id: "trend-1".into(),
            symbol: symbol.into(),
            timeframe: "1h".into(),
            kind,
            quantity: dec!(2),
            limit_price: Some(dec!(50000)),
            stop_loss: Some(dec!(49000)),
            take_profit: Some(dec!(52000)),
            bracket: false,
            t_signal: T0,
        },
        risk_events: events,
        control: ControlState::armed(1),
        market_data: Some(json!({"close": 50000.0, "volume": 17.25})),
        features: Some(json!({"rsi": 61.2, "atr": 420.0})),
    }
}

fn medium_event() -> RiskEvent {
    RiskEvent {
        event_id: "CPI-1".into(),
        event_time: T0,
        severity: Severity::Medium,
        category: "CPI".into(),
    }
}

fn high_event() -> RiskEvent {
    RiskEvent {
        event_id: "FOMC-1".into(),
        event_time: T0,
        severity: Severity::High,
        category: "FOMC".into(),
    }
}

fn run_session(engine: &ExecutionEngine) {
    // placed (GREEN)
    engine
        .submit(request("E1", "I1", "BTC/USDT", IntentKind::EnterLong, vec![]))
        .expect("submit");
    // placed with restriction (YELLOW)
    engine
        .submit(request(
            "E2",
            "I2",
            "ETH/USDT",
            IntentKind::EnterShort,
            vec![medium_event()],
        ))
        .expect("submit");
    // blocked (RED)
    engine
        .submit(request(
            "E3",
            "I3",
            "SOL/USDT",
            IntentKind::EnterLong,
            vec![high_event()],
        ))
        .expect("submit");
    // noop (HOLD)
    engine
        .submit(request("E4", "I4", "BTC/USDT", IntentKind::Hold, vec![]))
        .expect("submit");
    // duplicate of the first placement
    engine
        .submit(request("E1", "I1", "BTC/USDT", IntentKind::EnterLong, vec![]))
        .expect("submit");
    // exit the first position
    engine
        .submit(request("E5", "I5", "BTC/USDT", IntentKind::ExitLong, vec![]))
        .expect("submit");
}

/// Every record of a live session replays byte-for-byte clean under
/// strict-full with computed risk.
#[test]
fn test_session_replays_clean_strict_full() {
    let dir = PathBuf::from(format!("/tmp/replay_roundtrip_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("tmp dir");
    let engine = open_engine(&dir);
    run_session(&engine);
    assert_eq!(engine.log().len(), 6);

    for (mode, risk_mode) in [
        (ReplayMode::NonStrict, RiskMode::Fact),
        (ReplayMode::StrictCore, RiskMode::Fact),
        (ReplayMode::StrictFull, RiskMode::Computed),
    ] {
        let replay = ReplayEngine::new(engine.snapshots(), mode, risk_mode);
        let (reports, summary) = replay.replay_log(engine.log()).expect("replay");
        assert_eq!(summary.total, 6);
        assert_eq!(summary.ok, 6, "mode {:?}/{:?}", mode, risk_mode);
        assert_eq!(summary.mismatched, 0);
        assert_eq!(summary.errored, 0);
        assert!(reports.iter().all(|r| r.diffs.is_empty()));
    }
    println!("✅ six-record session replays clean in all modes");
}

/// Re-sealing a forged record makes it pass the log reader, so only the
/// replay recomputation can expose it. Strict-core must; non-strict must
/// at least report the diff.
#[test]
fn test_resealed_forgery_caught_by_replay_only() {
    let dir = PathBuf::from(format!("/tmp/replay_forgery_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("tmp dir");
    let engine = open_engine(&dir);
    run_session(&engine);
    drop(engine);

    // Forge record 2's reason and re-seal so content_hash verifies.
    let path = dir.join("decision_records.jsonl");
    let text = std::fs::read_to_string(&path).expect("read log");
    let mut lines: Vec<String> = text.lines().map(String::from).collect();
    let mut raw: Value = serde_json::from_str(&lines[1]).expect("parse line 2");
    raw.as_object_mut()
        .unwrap()
        .insert("reason".into(), json!("accepted"));
    let hashes = compute_hashes(&raw).expect("hashes");
    raw.as_object_mut()
        .unwrap()
        .insert("hashes".into(), serde_json::to_value(&hashes).unwrap());
    lines[1] = String::from_utf8(codec::canonicalize(&raw).expect("canonical")).unwrap();
    std::fs::write(&path, format!("{}\n", lines.join("\n"))).expect("write log");

    let log = DecisionLog::open(&path).expect("open");
    // The reader accepts the forgery: its hashes are self-consistent.
    assert!(log.read_line(2).is_ok());

    let snapshots = SnapshotStore::new(dir.join("snapshots")).expect("snapshots");
    let replay = ReplayEngine::new(&snapshots, ReplayMode::StrictCore, RiskMode::Computed);
    let (reports, summary) = replay.replay_log(&log).expect("replay");
    assert_eq!(summary.mismatched, 1);
    assert_eq!(reports[1].status, ReplayStatus::ReplayMismatch);
    assert!(reports[1].diffs.iter().any(|d| d.path == "$.reason"));

    let replay = ReplayEngine::new(&snapshots, ReplayMode::NonStrict, RiskMode::Computed);
    let (reports, summary) = replay.replay_log(&log).expect("replay");
    assert_eq!(summary.mismatched, 0);
    assert!(!reports[1].diffs.is_empty());
    println!("✅ re-sealed forgery exposed by recomputation");
}

/// The duplicate record is a ledger fact; replay passes it through without
/// recomputation in every mode.
#[test]
fn test_duplicate_records_pass_through() {
    let dir = PathBuf::from(format!("/tmp/replay_dup_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("tmp dir");
    let engine = open_engine(&dir);
    run_session(&engine);

    let records = engine.log().read_all().expect("read");
    let duplicate = records
        .iter()
        .find(|r| r.action == DecisionAction::Duplicate)
        .expect("session contains a duplicate");

    let replay = ReplayEngine::new(
        engine.snapshots(),
        ReplayMode::StrictFull,
        RiskMode::Computed,
    );
    let report = replay.replay_record(duplicate);
    assert_eq!(report.status, ReplayStatus::ReplayOk);
    assert!(report.note.as_deref().unwrap_or("").contains("duplicate"));
    println!("✅ duplicate records pass through replay");
}
