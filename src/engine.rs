//! Execution Engine — the only writer of orders, positions and decision
//! records.
//!
//! One submission is one serialized pass: reserve the idempotency key,
//! evaluate risk, run the pure decision function, apply the paper fill to
//! the position book, then persist the decision record and its snapshot.
//! The reservation always happens before any record is written, so a
//! crash between the two leaves an IN_FLIGHT key for the operator rather
//! than an unkeyed record. Submissions for the same `(strategy_id,
//! symbol)` are serialized behind a per-key mutex; different keys proceed
//! concurrently.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::DecisionLog;
use crate::codec;
use crate::context::ExecutionContext;
use crate::decision::{decide, derive_decision_id, PlannedAction};
use crate::error::CoreError;
use crate::idempotency::{IdempotencyRecord, IdempotencyStore, Reservation};
use crate::model::{
    ControlState, DecisionAction, DecisionInputs, DecisionRecord, ExecutionStatus,
    ExecutionSummary, Permission, RecordHashes, RiskEvent, RiskState, StrategyIntent,
    RECORD_VERSION,
};
use crate::persistence::redb_store::RedbStore;
use crate::persistence::store::PersistenceStore;
use crate::position::{Position, PositionState};
use crate::risk_engine::{self, RiskConfig};
use crate::snapshot::{SelectorInputs, Snapshot, SnapshotConfig, SnapshotStore};

/// One submission into the engine. `risk_events` and `control` are read
/// once at entry; mid-flight changes apply to the next submission.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub intent: StrategyIntent,
    pub risk_events: Vec<RiskEvent>,
    pub control: ControlState,
    /// Opaque upstream payloads, snapshotted and hashed for replay.
    pub market_data: Option<Value>,
    pub features: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub decision_id: String,
    pub action: DecisionAction,
    pub permission: Permission,
    pub reason: String,
    pub snapshot_hash: Option<String>,
}

pub struct ExecutionEngine {
    ctx: ExecutionContext,
    risk_config: RiskConfig,
    idempotency: IdempotencyStore,
    persistence: PersistenceStore,
    log: DecisionLog,
    snapshots: SnapshotStore,
    positions: RwLock<HashMap<String, Position>>,
    /// Per-(strategy_id, symbol) submission guards.
    guards: DashMap<String, Arc<Mutex<()>>>,
    recovery_timeout_ms: i64,
}

impl ExecutionEngine {
    /// Open the engine over a data directory: redb ledger + position book,
    /// JSONL decision log, snapshot store. Hydrates the position book and
    /// surfaces stale IN_FLIGHT keys from a previous crash. They are
    /// logged, never auto-resolved.
    pub fn open(
        ctx: ExecutionContext,
        risk_config: RiskConfig,
        store: Arc<RedbStore>,
        data_dir: &Path,
        recovery_timeout_ms: i64,
    ) -> Result<Self, CoreError> {
        let idempotency = IdempotencyStore::new(store.clone());
        let persistence = PersistenceStore::new(store);
        let log = DecisionLog::open(data_dir.join("decision_records.jsonl"))?;
        let snapshots = SnapshotStore::new(data_dir.join("snapshots"))?;

        let mut positions = HashMap::new();
        for position in persistence.load_positions()? {
            positions.insert(
                Position::key(&position.strategy_id, &position.symbol),
                position,
            );
        }
        info!(positions = positions.len(), "position book hydrated");

        let engine = Self {
            ctx,
            risk_config,
            idempotency,
            persistence,
            log,
            snapshots,
            positions: RwLock::new(positions),
            guards: DashMap::new(),
            recovery_timeout_ms,
        };

        for (key, record) in engine.stale_in_flight()? {
            warn!(
                key = %key,
                created_at = record.created_at,
                "unresolved IN_FLIGHT idempotency key from a previous run; operator reconciliation required"
            );
        }
        Ok(engine)
    }

    pub fn log(&self) -> &DecisionLog {
        &self.log
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn position(&self, strategy_id: &str, symbol: &str) -> Option<Position> {
        self.positions
            .read()
            .get(&Position::key(strategy_id, symbol))
            .cloned()
    }

    pub fn stale_in_flight(&self) -> Result<Vec<(String, IdempotencyRecord)>, CoreError> {
        Ok(self
            .idempotency
            .stale_in_flight(self.ctx.time.now_millis(), self.recovery_timeout_ms)?)
    }

    /// Evaluate, gate and (paper-)execute one intent. Every call appends
    /// exactly one decision record, duplicates included.
    pub fn submit(&self, request: SubmitRequest) -> Result<SubmitOutcome, CoreError> {
        let intent = &request.intent;
        let guard = self
            .guards
            .entry(Position::key(&intent.strategy_id, &intent.symbol))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _held = guard.lock();

        let now = self.ctx.time.now_millis();
        let risk = risk_engine::evaluate(&request.risk_events, now, &self.risk_config);
        let decision_id =
            derive_decision_id(&intent.event_id, &intent.intent_id, &intent.strategy_id)?;

        // Reservation comes before everything else; a key that was ever
        // seen is never executed twice.
        match self
            .idempotency
            .reserve(&intent.event_id, &intent.intent_id, now)?
        {
            Reservation::Reserved => {}
            prior => return self.record_duplicate(&request, &risk, decision_id, prior, now),
        }

        let position_key = Position::key(&intent.strategy_id, &intent.symbol);
        let (position_state, position_side) = {
            let book = self.positions.read();
            match book.get(&position_key) {
                Some(p) => (p.state, p.side),
                None => (PositionState::Flat, None),
            }
        };

        let verdict = decide(intent, &risk, &request.control, position_state, position_side);

        let snapshot_hash =
            self.capture_snapshot(&request, &decision_id, position_state, position_side)?;
        let feature_hash = request
            .features
            .as_ref()
            .map(codec::hash_canonical)
            .transpose()?;

        let (action, execution) = match verdict.planned {
            PlannedAction::Blocked => {
                self.idempotency
                    .fail(&intent.event_id, &intent.intent_id, &verdict.reason, now)?;
                (DecisionAction::Blocked, ExecutionSummary::none())
            }
            PlannedAction::Noop => {
                self.idempotency
                    .complete(&intent.event_id, &intent.intent_id, &decision_id, now)?;
                (DecisionAction::Noop, ExecutionSummary::none())
            }
            PlannedAction::Place => {
                let execution = match self.execute_fill(&request, verdict.sized_qty, now) {
                    Ok(execution) => execution,
                    Err(e) => {
                        // Decision gates make this unreachable in normal
                        // operation; if it happens the key goes terminal so
                        // retries cannot double-execute.
                        self.idempotency.fail(
                            &intent.event_id,
                            &intent.intent_id,
                            &e.to_string(),
                            now,
                        )?;
                        return Err(e);
                    }
                };
                self.idempotency
                    .complete(&intent.event_id, &intent.intent_id, &decision_id, now)?;
                (DecisionAction::Placed, execution)
            }
        };

        let mut record = DecisionRecord {
            record_version: RECORD_VERSION,
            decision_id: decision_id.clone(),
            timestamp: now,
            symbol: intent.symbol.clone(),
            timeframe: intent.timeframe.clone(),
            event_id: intent.event_id.clone(),
            intent_id: intent.intent_id.clone(),
            strategy_id: intent.strategy_id.clone(),
            risk_state: risk.clone(),
            permission: verdict.permission,
            action,
            reason: verdict.reason.clone(),
            inputs: DecisionInputs {
                event_id: intent.event_id.clone(),
                intent_id: intent.intent_id.clone(),
                strategy_id: intent.strategy_id.clone(),
                intent: intent.kind,
                requested_qty: intent.quantity,
                size_multiplier: risk.size_multiplier,
            },
            data_snapshot_hash: Some(snapshot_hash.clone()),
            feature_snapshot_hash: feature_hash,
            execution,
            hashes: RecordHashes {
                core_hash: String::new(),
                content_hash: String::new(),
                inputs_hash: String::new(),
            },
        };
        self.log.append(&mut record)?;
        info!(
            decision_id = %decision_id,
            action = ?action,
            permission = ?verdict.permission,
            reason = %verdict.reason,
            "decision recorded"
        );

        Ok(SubmitOutcome {
            decision_id,
            action,
            permission: verdict.permission,
            reason: verdict.reason,
            snapshot_hash: Some(snapshot_hash),
        })
    }

    /// A key that was already reserved: record the re-submission without
    /// re-executing, pointing at the prior terminal result.
    fn record_duplicate(
        &self,
        request: &SubmitRequest,
        risk: &RiskState,
        decision_id: String,
        prior: Reservation,
        now: i64,
    ) -> Result<SubmitOutcome, CoreError> {
        let intent = &request.intent;
        let reason = match &prior {
            Reservation::AlreadyInFlight => {
                "duplicate submission: prior attempt still in flight".to_string()
            }
            Reservation::AlreadyCompleted(result) => format!(
                "duplicate submission: already completed ({})",
                result.as_deref().unwrap_or("no result ref")
            ),
            Reservation::AlreadyFailed(result) => format!(
                "duplicate submission: already failed ({})",
                result.as_deref().unwrap_or("no result ref")
            ),
            Reservation::Reserved => unreachable!("duplicate path entered with fresh reservation"),
        };
        warn!(
            event_id = %intent.event_id,
            intent_id = %intent.intent_id,
            reason = %reason,
            "duplicate submission"
        );

        let mut record = DecisionRecord {
            record_version: RECORD_VERSION,
            decision_id: decision_id.clone(),
            timestamp: now,
            symbol: intent.symbol.clone(),
            timeframe: intent.timeframe.clone(),
            event_id: intent.event_id.clone(),
            intent_id: intent.intent_id.clone(),
            strategy_id: intent.strategy_id.clone(),
            risk_state: risk.clone(),
            permission: Permission::Block,
            action: DecisionAction::Duplicate,
            reason: reason.clone(),
            inputs: DecisionInputs {
                event_id: intent.event_id.clone(),
                intent_id: intent.intent_id.clone(),
                strategy_id: intent.strategy_id.clone(),
                intent: intent.kind,
                requested_qty: intent.quantity,
                size_multiplier: risk.size_multiplier,
            },
            data_snapshot_hash: None,
            feature_snapshot_hash: None,
            execution: ExecutionSummary::none(),
            hashes: RecordHashes {
                core_hash: String::new(),
                content_hash: String::new(),
                inputs_hash: String::new(),
            },
        };
        self.log.append(&mut record)?;
        Ok(SubmitOutcome {
            decision_id,
            action: DecisionAction::Duplicate,
            permission: Permission::Block,
            reason,
            snapshot_hash: None,
        })
    }

    /// Paper fill: entries fill the risk-sized quantity at the reference
    /// price; exits always close the full open quantity at the reference
    /// price. The mutated position is persisted before the fill is
    /// reported.
    fn execute_fill(
        &self,
        request: &SubmitRequest,
        sized_qty: rust_decimal::Decimal,
        now: i64,
    ) -> Result<ExecutionSummary, CoreError> {
        let intent = &request.intent;
        let price = intent
            .limit_price
            .ok_or_else(|| CoreError::Validation("missing reference price".into()))?;
        let key = Position::key(&intent.strategy_id, &intent.symbol);

        let mut book = self.positions.write();
        let position = book
            .entry(key)
            .or_insert_with(|| Position::flat(&intent.strategy_id, &intent.symbol));

        let filled_qty = if intent.kind.is_entry() {
            let side = intent
                .kind
                .side()
                .ok_or_else(|| CoreError::Validation("entry intent without side".into()))?;
            position.begin_open(side, sized_qty, now)?;
            position.apply_entry_fill(sized_qty, price, now)?;
            sized_qty
        } else {
            let open_qty = position.quantity;
            position.begin_close(now)?;
            position.apply_exit_fill(open_qty, price, now)?;
            open_qty
        };
        self.persistence.save_position(position)?;

        Ok(ExecutionSummary {
            order_ids: vec![self.ctx.id.new_id()],
            filled_qty,
            status: ExecutionStatus::Filled,
        })
    }

    /// Snapshot everything replay needs. The derived risk state is not
    /// stored here; strict replay recomputes it from `risk_inputs` and the
    /// pinned config.
    fn capture_snapshot(
        &self,
        request: &SubmitRequest,
        decision_id: &str,
        position_state: PositionState,
        position_side: Option<crate::model::Side>,
    ) -> Result<String, CoreError> {
        let snapshot = Snapshot::capture(
            decision_id,
            &request.intent.symbol,
            &request.intent.timeframe,
            request.market_data.clone(),
            request.features.clone(),
            Some(request.risk_events.clone()),
            Some(SnapshotConfig {
                risk: self.risk_config.clone(),
            }),
            Some(SelectorInputs {
                intent: request.intent.clone(),
                control: request.control,
                position_state,
                position_side,
            }),
        )?;
        self.snapshots.save(&snapshot)
    }
}
