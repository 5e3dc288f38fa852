//! Decision Record audit log.
//!
//! Append-only JSONL: one canonical-JSON object per line, never rewritten.
//! Corrections are new records. The writer serializes appends behind a
//! mutex and syncs each line; a torn line is corruption to readers, not a
//! soft error. An in-memory offset table (arena-style index) avoids
//! rescanning the log on reads.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::codec;
use crate::error::CoreError;
use crate::model::{DecisionRecord, RecordHashes};

/// Fields hashed into `core_hash`: the decision-identity subset.
const CORE_FIELDS: [&str; 10] = [
    "decision_id",
    "symbol",
    "timeframe",
    "inputs",
    "risk_state",
    "permission",
    "action",
    "reason",
    "data_snapshot_hash",
    "feature_snapshot_hash",
];

/// Extract the core-identity subset of a raw record value. Replay
/// recomputes exactly this subset; timestamps and order ids stay outside.
pub fn core_subset(raw: &Value) -> Value {
    let mut core = serde_json::Map::new();
    if let Some(obj) = raw.as_object() {
        for field in CORE_FIELDS {
            if let Some(v) = obj.get(field) {
                core.insert(field.to_string(), v.clone());
            }
        }
    }
    Value::Object(core)
}

/// Compute all three record hashes from a raw record value. The `hashes`
/// section itself is always excluded (no self-reference).
pub fn compute_hashes(raw: &Value) -> Result<RecordHashes, CoreError> {
    let obj = raw.as_object().ok_or_else(|| {
        CoreError::corruption("decision record", "payload is not a JSON object")
    })?;

    let mut content = obj.clone();
    content.remove("hashes");
    let content_hash = codec::hash_canonical(&Value::Object(content))?;

    let core_hash = codec::hash_canonical(&core_subset(raw))?;

    let inputs = obj.get("inputs").cloned().ok_or_else(|| {
        CoreError::corruption("decision record", "missing required field 'inputs'")
    })?;
    let inputs_hash = codec::hash_canonical(&inputs)?;

    Ok(RecordHashes {
        core_hash,
        content_hash,
        inputs_hash,
    })
}

/// Fill the `hashes` section of a record from its own payload.
pub fn seal(record: &mut DecisionRecord) -> Result<(), CoreError> {
    let raw = codec::to_canonical_value(&*record)?;
    record.hashes = compute_hashes(&raw)?;
    Ok(())
}

#[derive(Debug)]
struct LogInner {
    file: File,
    /// Byte offset of each line, in append order.
    offsets: Vec<u64>,
    /// decision_id -> line index (0-based). Lookups without rescans.
    by_decision: HashMap<String, usize>,
    end_offset: u64,
}

#[derive(Debug)]
pub struct DecisionLog {
    path: PathBuf,
    inner: Mutex<LogInner>,
}

impl DecisionLog {
    /// Open (or create) a log and build the offset index. A torn trailing
    /// line from a crash mid-write fails the open: reconciliation is an
    /// explicit operator step, never automatic repair.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut offsets = Vec::new();
        let mut by_decision = HashMap::new();
        let mut end_offset = 0u64;

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            let mut offset = 0u64;
            for (idx, line) in reader.lines().enumerate() {
                let line = line?;
                let line_no = idx + 1;
                let value: Value = serde_json::from_str(&line).map_err(|e| {
                    CoreError::corruption(
                        format!("{}:{}", path.display(), line_no),
                        format!("malformed line: {}", e),
                    )
                })?;
                let decision_id = value
                    .get("decision_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        CoreError::corruption(
                            format!("{}:{}", path.display(), line_no),
                            "missing decision_id",
                        )
                    })?;
                by_decision.insert(decision_id.to_string(), idx);
                offsets.push(offset);
                offset += line.len() as u64 + 1;
            }
            end_offset = offset;
            info!(path = %path.display(), lines = offsets.len(), "decision log indexed");
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            inner: Mutex::new(LogInner {
                file,
                offsets,
                by_decision,
                end_offset,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.inner.lock().offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seal and append one record. Returns the 1-based line number.
    pub fn append(&self, record: &mut DecisionRecord) -> Result<usize, CoreError> {
        seal(record)?;
        let raw = codec::to_canonical_value(&*record)?;
        let bytes = codec::canonicalize(&raw)?;

        let mut inner = self.inner.lock();
        inner.file.write_all(&bytes)?;
        inner.file.write_all(b"\n")?;
        inner.file.flush()?;
        inner.file.sync_data()?;

        let idx = inner.offsets.len();
        let offset = inner.end_offset;
        inner.offsets.push(offset);
        inner.end_offset += bytes.len() as u64 + 1;
        inner
            .by_decision
            .insert(record.decision_id.clone(), idx);
        Ok(idx + 1)
    }

    /// Read and validate one line (1-based). Tolerates unknown additive
    /// fields; missing required fields and hash mismatches are corruption
    /// with line context.
    pub fn read_line(&self, line_no: usize) -> Result<DecisionRecord, CoreError> {
        let (offset, end) = {
            let inner = self.inner.lock();
            if line_no == 0 || line_no > inner.offsets.len() {
                return Err(CoreError::corruption(
                    format!("{}:{}", self.path.display(), line_no),
                    "line out of range",
                ));
            }
            let offset = inner.offsets[line_no - 1];
            let end = inner
                .offsets
                .get(line_no)
                .copied()
                .unwrap_or(inner.end_offset);
            (offset, end)
        };
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; (end - offset) as usize];
        file.read_exact(&mut buf)?;
        let line = String::from_utf8(buf).map_err(|e| {
            CoreError::corruption(
                format!("{}:{}", self.path.display(), line_no),
                format!("invalid UTF-8: {}", e),
            )
        })?;
        parse_record(line.trim_end_matches('\n'), &self.path, line_no)
    }

    /// Index lookup by decision id.
    pub fn read_by_decision_id(&self, decision_id: &str) -> Result<Option<DecisionRecord>, CoreError> {
        let idx = {
            let inner = self.inner.lock();
            inner.by_decision.get(decision_id).copied()
        };
        match idx {
            Some(idx) => Ok(Some(self.read_line(idx + 1)?)),
            None => Ok(None),
        }
    }

    /// Full validated scan in append order.
    pub fn read_all(&self) -> Result<Vec<DecisionRecord>, CoreError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            records.push(parse_record(&line, &self.path, idx + 1)?);
        }
        Ok(records)
    }
}

/// Parse and verify one log line. The content hash is recomputed over the
/// raw value (minus `hashes`) so unknown additive fields stay covered.
fn parse_record(line: &str, path: &Path, line_no: usize) -> Result<DecisionRecord, CoreError> {
    let location = format!("{}:{}", path.display(), line_no);
    let raw: Value = serde_json::from_str(line)
        .map_err(|e| CoreError::corruption(&location, format!("malformed line: {}", e)))?;

    let record: DecisionRecord = serde_json::from_value(raw.clone())
        .map_err(|e| CoreError::corruption(&location, format!("missing/invalid field: {}", e)))?;

    let recomputed = compute_hashes(&raw)?;
    if recomputed.content_hash != record.hashes.content_hash {
        return Err(CoreError::corruption(
            &location,
            format!(
                "content hash mismatch: stored {}, recomputed {}",
                record.hashes.content_hash, recomputed.content_hash
            ),
        ));
    }
    Ok(record)
}
