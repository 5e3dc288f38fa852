//! Snapshot store — content-addressed captures of replay inputs.
//!
//! One snapshot holds exactly the fields needed to recompute one decision.
//! `snapshot_hash` is computed over the snapshot with that field blanked
//! (no self-reference) and doubles as the storage address:
//! `snapshot_<hash>.json`. Snapshots are written once and never mutated.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::codec;
use crate::error::CoreError;
use crate::model::{ControlState, RiskEvent, Side, StrategyIntent};
use crate::position::PositionState;
use crate::risk_engine::RiskConfig;

pub const SNAPSHOT_VERSION: u32 = 1;

/// The selector-facing inputs the pure decision function needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorInputs {
    pub intent: StrategyIntent,
    pub control: ControlState,
    pub position_state: PositionState,
    #[serde(default)]
    pub position_side: Option<Side>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub risk: RiskConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_version: u32,
    pub decision_id: String,
    pub symbol: String,
    pub timeframe: String,
    /// Opaque upstream payloads; the core only hashes and stores them.
    #[serde(default)]
    pub market_data: Option<Value>,
    #[serde(default)]
    pub features: Option<Value>,
    #[serde(default)]
    pub risk_inputs: Option<Vec<RiskEvent>>,
    #[serde(default)]
    pub config: Option<SnapshotConfig>,
    #[serde(default)]
    pub selector_inputs: Option<SelectorInputs>,
    pub snapshot_hash: String,
}

impl Snapshot {
    /// Hash of the snapshot with `snapshot_hash` blanked.
    pub fn compute_hash(&self) -> Result<String, CoreError> {
        let mut value = codec::to_canonical_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("snapshot_hash".to_string(), Value::String(String::new()));
        }
        codec::hash_canonical(&value)
    }

    /// Build a snapshot and seal it with its content hash.
    #[allow(clippy::too_many_arguments)]
    pub fn capture(
        decision_id: &str,
        symbol: &str,
        timeframe: &str,
        market_data: Option<Value>,
        features: Option<Value>,
        risk_inputs: Option<Vec<RiskEvent>>,
        config: Option<SnapshotConfig>,
        selector_inputs: Option<SelectorInputs>,
    ) -> Result<Self, CoreError> {
        let mut snapshot = Self {
            snapshot_version: SNAPSHOT_VERSION,
            decision_id: decision_id.to_string(),
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            market_data,
            features,
            risk_inputs,
            config,
            selector_inputs,
            snapshot_hash: String::new(),
        };
        snapshot.snapshot_hash = snapshot.compute_hash()?;
        Ok(snapshot)
    }
}

pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, CoreError> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn path_for(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("snapshot_{}.json", hash))
    }

    /// Store once, addressed by hash. Re-storing identical content is a
    /// no-op; the file is immutable.
    pub fn save(&self, snapshot: &Snapshot) -> Result<String, CoreError> {
        let expected = snapshot.compute_hash()?;
        if snapshot.snapshot_hash != expected {
            return Err(CoreError::corruption(
                format!("snapshot {}", snapshot.decision_id),
                "snapshot_hash does not match content",
            ));
        }
        let path = self.path_for(&expected);
        if path.exists() {
            debug!(hash = %expected, "snapshot already stored");
            return Ok(expected);
        }
        let value = codec::to_canonical_value(snapshot)?;
        let bytes = codec::canonicalize(&value)?;
        fs::write(&path, bytes)?;
        debug!(hash = %expected, "snapshot stored");
        Ok(expected)
    }

    /// Load and re-verify. A hash mismatch is corruption, never silently
    /// accepted.
    pub fn load(&self, hash: &str) -> Result<Snapshot, CoreError> {
        let path = self.path_for(hash);
        let bytes = fs::read(&path).map_err(|e| {
            CoreError::corruption(path.display().to_string(), format!("unreadable: {}", e))
        })?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| {
            CoreError::corruption(path.display().to_string(), format!("malformed JSON: {}", e))
        })?;
        let recomputed = snapshot.compute_hash()?;
        if recomputed != hash || snapshot.snapshot_hash != hash {
            return Err(CoreError::corruption(
                path.display().to_string(),
                format!("snapshot hash mismatch: stored {}, recomputed {}", hash, recomputed),
            ));
        }
        Ok(snapshot)
    }
}
