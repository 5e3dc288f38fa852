//! Structural v1 -> v2 decision record migration.
//!
//! The mapping is presence-based only: a field either exists in the legacy
//! record or the migration fails closed. Business intent is never inferred
//! from ambiguous shapes — in particular, a legacy record with an empty
//! `strategy_id` and no `strategy` object is rejected, and a `placed`
//! record without a recorded permission or execution section is rejected.

use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

use crate::audit::DecisionLog;
use crate::codec;
use crate::decision::derive_decision_id;
use crate::error::CoreError;
use crate::model::{
    DecisionAction, DecisionInputs, DecisionRecord, ExecutionSummary, IntentKind, Permission,
    RecordHashes, RiskLevel, RiskState, RECORD_VERSION,
};
use rust_decimal::Decimal;

#[derive(Debug)]
pub struct MigrationSummary {
    pub migrated: usize,
    pub passed_through: usize,
}

/// Migrate a legacy JSONL file into `<out_dir>/decision_records.jsonl`.
/// The first unmappable record aborts the run with line context.
pub fn migrate_file(input: &Path, out_dir: &Path) -> Result<MigrationSummary, CoreError> {
    std::fs::create_dir_all(out_dir)?;
    let out_log = DecisionLog::open(out_dir.join("decision_records.jsonl"))?;

    let reader = BufReader::new(File::open(input)?);
    let mut summary = MigrationSummary {
        migrated: 0,
        passed_through: 0,
    };
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        let location = format!("{}:{}", input.display(), line_no);
        let raw: Value = serde_json::from_str(&line)
            .map_err(|e| CoreError::corruption(&location, format!("malformed line: {}", e)))?;

        let version = raw
            .get("record_version")
            .or_else(|| raw.get("schema_version"))
            .and_then(|v| v.as_u64())
            .unwrap_or(1);

        let mut record = if version >= u64::from(RECORD_VERSION) {
            summary.passed_through += 1;
            serde_json::from_value::<DecisionRecord>(raw).map_err(|e| {
                CoreError::corruption(&location, format!("invalid v2 record: {}", e))
            })?
        } else {
            summary.migrated += 1;
            migrate_v1(&raw, &location)?
        };
        out_log.append(&mut record)?;
    }
    info!(
        migrated = summary.migrated,
        passed_through = summary.passed_through,
        "migration complete"
    );
    Ok(summary)
}

fn require_str(raw: &Value, key: &str, location: &str) -> Result<String, CoreError> {
    raw.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(String::from)
        .ok_or_else(|| {
            CoreError::corruption(
                location,
                format!("cannot migrate: missing or empty '{}'", key),
            )
        })
}

/// Presence-based mapping of one v1 record.
pub fn migrate_v1(raw: &Value, location: &str) -> Result<DecisionRecord, CoreError> {
    let event_id = require_str(raw, "event_id", location)?;
    let intent_id = require_str(raw, "intent_id", location)?;

    // Strategy identity: `strategy_id`, else `strategy.id`. Nothing else.
    // An empty strategy with no metadata is intentionally a hard failure.
    let strategy_id = match raw.get("strategy_id").and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => s.to_string(),
        _ => match raw.get("strategy").and_then(|s| s.get("id")).and_then(|v| v.as_str()) {
            Some(s) if !s.trim().is_empty() => s.to_string(),
            _ => {
                return Err(CoreError::corruption(
                    location,
                    "cannot migrate: no strategy identity (empty strategy_id, no strategy.id)",
                ));
            }
        },
    };

    let timestamp = raw
        .get("timestamp")
        .or_else(|| raw.get("ts"))
        .and_then(|v| v.as_i64())
        .ok_or_else(|| CoreError::corruption(location, "cannot migrate: missing timestamp"))?;

    let symbol = require_str(raw, "symbol", location)?;
    let timeframe = raw
        .get("timeframe")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let action: DecisionAction = raw
        .get("action")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| CoreError::corruption(location, format!("cannot migrate: bad action: {}", e)))?
        .ok_or_else(|| CoreError::corruption(location, "cannot migrate: missing action"))?;

    // Permission: take it if recorded. `blocked` implies BLOCK by
    // definition; any other action without a recorded permission is
    // ambiguous and fails closed.
    let permission: Permission = match raw.get("permission") {
        Some(p) => serde_json::from_value(p.clone()).map_err(|e| {
            CoreError::corruption(location, format!("cannot migrate: bad permission: {}", e))
        })?,
        None if action == DecisionAction::Blocked => Permission::Block,
        None => {
            return Err(CoreError::corruption(
                location,
                "cannot migrate: missing permission for non-blocked action",
            ));
        }
    };

    // v1 kept risk under `risk`; only the state tag is required.
    let risk_raw = raw
        .get("risk_state")
        .or_else(|| raw.get("risk"))
        .ok_or_else(|| CoreError::corruption(location, "cannot migrate: missing risk section"))?;
    let level: RiskLevel = risk_raw
        .get("state")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| CoreError::corruption(location, format!("cannot migrate: bad risk state: {}", e)))?
        .ok_or_else(|| CoreError::corruption(location, "cannot migrate: missing risk.state"))?;
    let risk_state = RiskState {
        state: level,
        size_multiplier: level.size_multiplier(),
        reasons: risk_raw
            .get("reasons")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CoreError::corruption(location, format!("cannot migrate: bad reasons: {}", e)))?
            .unwrap_or_default(),
        event_ids: risk_raw
            .get("event_ids")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CoreError::corruption(location, format!("cannot migrate: bad event_ids: {}", e)))?
            .unwrap_or_default(),
        as_of: risk_raw.get("as_of").and_then(|v| v.as_i64()).unwrap_or(timestamp),
    };

    let intent: IntentKind = raw
        .get("intent")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| CoreError::corruption(location, format!("cannot migrate: bad intent: {}", e)))?
        .ok_or_else(|| CoreError::corruption(location, "cannot migrate: missing intent"))?;

    // Execution: placed records must carry one; everything else defaults
    // to the empty summary.
    let execution: ExecutionSummary = match raw.get("execution") {
        Some(e) => serde_json::from_value(e.clone()).map_err(|e| {
            CoreError::corruption(location, format!("cannot migrate: bad execution: {}", e))
        })?,
        None if action == DecisionAction::Placed => {
            return Err(CoreError::corruption(
                location,
                "cannot migrate: placed record without execution section",
            ));
        }
        None => ExecutionSummary::none(),
    };

    let requested_qty = raw
        .get("requested_qty")
        .or_else(|| raw.get("qty"))
        .map(|v| {
            serde_json::from_value::<Decimal>(v.clone()).map_err(|e| {
                CoreError::corruption(location, format!("cannot migrate: bad quantity: {}", e))
            })
        })
        .transpose()?
        .unwrap_or(Decimal::ZERO);

    let decision_id = match raw.get("decision_id").and_then(|v| v.as_str()) {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => derive_decision_id(&event_id, &intent_id, &strategy_id)?,
    };

    let mut record = DecisionRecord {
        record_version: RECORD_VERSION,
        decision_id,
        timestamp,
        symbol,
        timeframe,
        event_id: event_id.clone(),
        intent_id: intent_id.clone(),
        strategy_id: strategy_id.clone(),
        risk_state,
        permission,
        action,
        reason: require_str(raw, "reason", location)?,
        inputs: DecisionInputs {
            event_id,
            intent_id,
            strategy_id,
            intent,
            requested_qty,
            size_multiplier: level.size_multiplier(),
        },
        data_snapshot_hash: raw
            .get("data_snapshot_hash")
            .and_then(|v| v.as_str())
            .map(String::from),
        feature_snapshot_hash: raw
            .get("feature_snapshot_hash")
            .and_then(|v| v.as_str())
            .map(String::from),
        execution,
        hashes: RecordHashes {
            core_hash: String::new(),
            content_hash: String::new(),
            inputs_hash: String::new(),
        },
    };
    // Fresh v2 hashes over the migrated payload.
    let raw_v2 = codec::to_canonical_value(&record)?;
    record.hashes = crate::audit::log::compute_hashes(&raw_v2)?;
    Ok(record)
}
