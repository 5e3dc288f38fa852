//! Snapshot replay — recompute recorded decisions and diff them.
//!
//! Replay drives the same pure `decide` function the live path used, fed
//! from the stored snapshot instead of live inputs, and compares the
//! recomputed core-identity subset field by field against the record.
//! Wall-clock timestamps and order ids are outside the core subset, so a
//! faithful replay reproduces it exactly.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::audit::log::{compute_hashes, core_subset};
use crate::audit::DecisionLog;
use crate::codec;
use crate::decision::{decide, derive_decision_id, PlannedAction};
use crate::error::CoreError;
use crate::model::{DecisionAction, DecisionInputs, DecisionRecord, RiskState};
use crate::risk_engine;
use crate::snapshot::SnapshotStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplayMode {
    /// Diffs are reported but never fail the run.
    NonStrict,
    /// Any core-subset diff fails the record.
    StrictCore,
    /// Strict core plus re-verification of all stored hash commitments.
    StrictFull,
}

/// Where the risk state for recomputation comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskMode {
    /// Trust the recorded risk state as a fact.
    Fact,
    /// Recompute from the snapshot's risk inputs and pinned config.
    Computed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplayStatus {
    ReplayOk,
    ReplayMismatch,
    ReplayError,
}

impl ReplayStatus {
    pub fn code(&self) -> &'static str {
        match self {
            ReplayStatus::ReplayOk => "REPLAY_OK",
            ReplayStatus::ReplayMismatch => "REPLAY_MISMATCH",
            ReplayStatus::ReplayError => "REPLAY_ERROR",
        }
    }
}

/// One divergent field, with recorded and recomputed values side by side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDiff {
    pub path: String,
    pub recorded: Value,
    pub recomputed: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub decision_id: String,
    pub status: ReplayStatus,
    #[serde(default)]
    pub diffs: Vec<FieldDiff>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplaySummary {
    pub total: usize,
    pub ok: usize,
    pub mismatched: usize,
    pub errored: usize,
}

pub struct ReplayEngine<'a> {
    snapshots: &'a SnapshotStore,
    mode: ReplayMode,
    risk_mode: RiskMode,
}

impl<'a> ReplayEngine<'a> {
    pub fn new(snapshots: &'a SnapshotStore, mode: ReplayMode, risk_mode: RiskMode) -> Self {
        Self {
            snapshots,
            mode,
            risk_mode,
        }
    }

    /// Replay every record in the log, in append order.
    pub fn replay_log(
        &self,
        log: &DecisionLog,
    ) -> Result<(Vec<ReplayReport>, ReplaySummary), CoreError> {
        let records = log.read_all()?;
        let mut reports = Vec::with_capacity(records.len());
        let mut summary = ReplaySummary::default();
        for record in &records {
            let report = self.replay_record(record);
            summary.total += 1;
            match report.status {
                ReplayStatus::ReplayOk => summary.ok += 1,
                ReplayStatus::ReplayMismatch => summary.mismatched += 1,
                ReplayStatus::ReplayError => summary.errored += 1,
            }
            reports.push(report);
        }
        Ok((reports, summary))
    }

    /// Replay one record. Missing prerequisites (snapshot, risk inputs in
    /// computed mode) are REPLAY_ERROR under strict modes, never silently
    /// treated as a pass.
    pub fn replay_record(&self, record: &DecisionRecord) -> ReplayReport {
        match self.try_replay(record) {
            Ok(report) => report,
            Err(e) => ReplayReport {
                decision_id: record.decision_id.clone(),
                status: ReplayStatus::ReplayError,
                diffs: Vec::new(),
                note: Some(e.to_string()),
            },
        }
    }

    fn try_replay(&self, record: &DecisionRecord) -> Result<ReplayReport, CoreError> {
        // Duplicate records describe ledger state, not a fresh decision;
        // there is nothing to recompute.
        if record.action == DecisionAction::Duplicate {
            return Ok(ReplayReport {
                decision_id: record.decision_id.clone(),
                status: ReplayStatus::ReplayOk,
                diffs: Vec::new(),
                note: Some("duplicate record, nothing to recompute".to_string()),
            });
        }

        let snapshot_hash = match &record.data_snapshot_hash {
            Some(h) => h,
            None if self.mode == ReplayMode::NonStrict => {
                return Ok(ReplayReport {
                    decision_id: record.decision_id.clone(),
                    status: ReplayStatus::ReplayOk,
                    diffs: Vec::new(),
                    note: Some("no snapshot reference, skipped".to_string()),
                });
            }
            None => {
                return Err(CoreError::Replay(format!(
                    "record {} has no snapshot reference",
                    record.decision_id
                )));
            }
        };
        let snapshot = self.snapshots.load(snapshot_hash)?;
        let inputs = snapshot.selector_inputs.as_ref().ok_or_else(|| {
            CoreError::Replay(format!(
                "snapshot {} has no selector inputs",
                snapshot_hash
            ))
        })?;

        let risk = self.resolve_risk(record, &snapshot)?;
        let verdict = decide(
            &inputs.intent,
            &risk,
            &inputs.control,
            inputs.position_state,
            inputs.position_side,
        );
        let decision_id = derive_decision_id(
            &inputs.intent.event_id,
            &inputs.intent.intent_id,
            &inputs.intent.strategy_id,
        )?;
        let action = match verdict.planned {
            PlannedAction::Blocked => DecisionAction::Blocked,
            PlannedAction::Place => DecisionAction::Placed,
            PlannedAction::Noop => DecisionAction::Noop,
        };
        let feature_hash = snapshot
            .features
            .as_ref()
            .map(codec::hash_canonical)
            .transpose()?;

        let recomputed = codec::to_canonical_value(&serde_json::json!({
            "decision_id": decision_id,
            "symbol": inputs.intent.symbol,
            "timeframe": inputs.intent.timeframe,
            "inputs": DecisionInputs {
                event_id: inputs.intent.event_id.clone(),
                intent_id: inputs.intent.intent_id.clone(),
                strategy_id: inputs.intent.strategy_id.clone(),
                intent: inputs.intent.kind,
                requested_qty: inputs.intent.quantity,
                size_multiplier: risk.size_multiplier,
            },
            "risk_state": risk,
            "permission": verdict.permission,
            "action": action,
            "reason": verdict.reason,
            "data_snapshot_hash": snapshot.snapshot_hash,
            "feature_snapshot_hash": feature_hash,
        }))?;
        let recorded = core_subset(&codec::to_canonical_value(record)?);

        let mut diffs = Vec::new();
        diff_values("$", &recorded, &recomputed, &mut diffs);

        if self.mode == ReplayMode::StrictFull {
            self.verify_commitments(record, &mut diffs)?;
        }

        let status = if diffs.is_empty() {
            debug!(decision_id = %record.decision_id, "replay ok");
            ReplayStatus::ReplayOk
        } else if self.mode == ReplayMode::NonStrict {
            warn!(
                decision_id = %record.decision_id,
                diffs = diffs.len(),
                "replay divergence (non-strict)"
            );
            ReplayStatus::ReplayOk
        } else {
            ReplayStatus::ReplayMismatch
        };
        Ok(ReplayReport {
            decision_id: record.decision_id.clone(),
            status,
            diffs,
            note: None,
        })
    }

    fn resolve_risk(
        &self,
        record: &DecisionRecord,
        snapshot: &crate::snapshot::Snapshot,
    ) -> Result<RiskState, CoreError> {
        match self.risk_mode {
            RiskMode::Fact => Ok(record.risk_state.clone()),
            RiskMode::Computed => {
                let events = snapshot.risk_inputs.as_ref().ok_or_else(|| {
                    CoreError::Replay(format!(
                        "record {}: computed risk requested but snapshot has no risk inputs",
                        record.decision_id
                    ))
                })?;
                let config = snapshot.config.as_ref().ok_or_else(|| {
                    CoreError::Replay(format!(
                        "record {}: computed risk requested but snapshot has no risk config",
                        record.decision_id
                    ))
                })?;
                Ok(risk_engine::evaluate(
                    events,
                    record.risk_state.as_of,
                    &config.risk,
                ))
            }
        }
    }

    /// Strict-full: the stored hash commitments must all reproduce from
    /// the record payload itself.
    fn verify_commitments(
        &self,
        record: &DecisionRecord,
        diffs: &mut Vec<FieldDiff>,
    ) -> Result<(), CoreError> {
        let raw = codec::to_canonical_value(record)?;
        let recomputed = compute_hashes(&raw)?;
        for (path, stored, fresh) in [
            ("$.hashes.core_hash", &record.hashes.core_hash, &recomputed.core_hash),
            (
                "$.hashes.content_hash",
                &record.hashes.content_hash,
                &recomputed.content_hash,
            ),
            (
                "$.hashes.inputs_hash",
                &record.hashes.inputs_hash,
                &recomputed.inputs_hash,
            ),
        ] {
            if stored != fresh {
                diffs.push(FieldDiff {
                    path: path.to_string(),
                    recorded: Value::String(stored.clone()),
                    recomputed: Value::String(fresh.clone()),
                });
            }
        }
        Ok(())
    }
}

/// Recursive structural diff. Objects compare over the union of keys,
/// arrays index by index, scalars by equality.
fn diff_values(path: &str, recorded: &Value, recomputed: &Value, out: &mut Vec<FieldDiff>) {
    match (recorded, recomputed) {
        (Value::Object(a), Value::Object(b)) => {
            let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let child = format!("{}.{}", path, key);
                diff_values(
                    &child,
                    a.get(key).unwrap_or(&Value::Null),
                    b.get(key).unwrap_or(&Value::Null),
                    out,
                );
            }
        }
        (Value::Array(a), Value::Array(b)) if a.len() == b.len() => {
            for (i, (ra, rb)) in a.iter().zip(b.iter()).enumerate() {
                diff_values(&format!("{}[{}]", path, i), ra, rb, out);
            }
        }
        (a, b) => {
            if a != b {
                out.push(FieldDiff {
                    path: path.to_string(),
                    recorded: a.clone(),
                    recomputed: b.clone(),
                });
            }
        }
    }
}
