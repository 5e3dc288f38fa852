//! Idempotency Store — the durable de-duplication ledger.
//!
//! One record per `(event_id, intent_id)` key. `reserve` is the
//! synchronization point for the whole engine: it is a single
//! read-modify-write transaction against redb, whose single-writer
//! discipline guarantees two concurrent callers with the same key cannot
//! both observe `Reserved`. Records are never deleted during a run and
//! survive process restart.

use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::persistence::redb_store::{RedbStore, StoreError};

const IDEMPOTENCY_TABLE: TableDefinition<&str, Vec<u8>> =
    TableDefinition::new("idempotency_ledger");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyStatus {
    InFlight,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub status: IdempotencyStatus,
    #[serde(default)]
    pub result_ref: Option<String>,
    pub created_at: i64,
    #[serde(default)]
    pub completed_at: Option<i64>,
}

/// Outcome of a reservation attempt. A second attempt for the same key
/// must observe one of the `Already*` variants and must not re-execute.
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    Reserved,
    AlreadyInFlight,
    AlreadyCompleted(Option<String>),
    /// FAILED is terminal and still blocks re-execution; a fresh attempt
    /// needs a new intent_id.
    AlreadyFailed(Option<String>),
}

pub fn idempotency_key(event_id: &str, intent_id: &str) -> String {
    format!("{}\u{1f}{}", event_id, intent_id)
}

pub struct IdempotencyStore {
    store: Arc<RedbStore>,
}

impl IdempotencyStore {
    pub fn new(store: Arc<RedbStore>) -> Self {
        Self { store }
    }

    /// Attempt to claim the key. Atomic compare-and-set: the get and the
    /// insert happen inside one write transaction.
    pub fn reserve(
        &self,
        event_id: &str,
        intent_id: &str,
        now: i64,
    ) -> Result<Reservation, StoreError> {
        let key = idempotency_key(event_id, intent_id);
        let txn = self.store.begin_write()?;
        let outcome = {
            let mut table = txn.open_table(IDEMPOTENCY_TABLE)?;
            let existing = table
                .get(key.as_str())?
                .map(|v| serde_json::from_slice::<IdempotencyRecord>(&v.value()))
                .transpose()?;
            match existing {
                Some(record) => match record.status {
                    IdempotencyStatus::InFlight => Reservation::AlreadyInFlight,
                    IdempotencyStatus::Completed => {
                        Reservation::AlreadyCompleted(record.result_ref)
                    }
                    IdempotencyStatus::Failed => Reservation::AlreadyFailed(record.result_ref),
                },
                None => {
                    let record = IdempotencyRecord {
                        status: IdempotencyStatus::InFlight,
                        result_ref: None,
                        created_at: now,
                        completed_at: None,
                    };
                    table.insert(key.as_str(), serde_json::to_vec(&record)?)?;
                    Reservation::Reserved
                }
            }
        };
        txn.commit()?;
        debug!(event_id, intent_id, outcome = ?outcome, "idempotency reserve");
        Ok(outcome)
    }

    /// IN_FLIGHT -> COMPLETED. Any other starting status is an integrity
    /// violation, not a soft error.
    pub fn complete(
        &self,
        event_id: &str,
        intent_id: &str,
        result_ref: &str,
        now: i64,
    ) -> Result<(), StoreError> {
        self.finish(
            event_id,
            intent_id,
            IdempotencyStatus::Completed,
            Some(result_ref.to_string()),
            now,
        )
    }

    /// IN_FLIGHT -> FAILED. Terminal: automatic retries must not produce a
    /// second side effect.
    pub fn fail(
        &self,
        event_id: &str,
        intent_id: &str,
        reason: &str,
        now: i64,
    ) -> Result<(), StoreError> {
        self.finish(
            event_id,
            intent_id,
            IdempotencyStatus::Failed,
            Some(reason.to_string()),
            now,
        )
    }

    fn finish(
        &self,
        event_id: &str,
        intent_id: &str,
        status: IdempotencyStatus,
        result_ref: Option<String>,
        now: i64,
    ) -> Result<(), StoreError> {
        let key = idempotency_key(event_id, intent_id);
        let txn = self.store.begin_write()?;
        {
            let mut table = txn.open_table(IDEMPOTENCY_TABLE)?;
            let existing = table
                .get(key.as_str())?
                .map(|v| serde_json::from_slice::<IdempotencyRecord>(&v.value()))
                .transpose()?;
            let mut record = existing.ok_or_else(|| {
                StoreError::Integrity(format!(
                    "terminal transition for unknown idempotency key ({}, {})",
                    event_id, intent_id
                ))
            })?;
            if record.status != IdempotencyStatus::InFlight {
                return Err(StoreError::Integrity(format!(
                    "idempotency key ({}, {}) already terminal: {:?}",
                    event_id, intent_id, record.status
                )));
            }
            record.status = status;
            record.result_ref = result_ref;
            record.completed_at = Some(now);
            table.insert(key.as_str(), serde_json::to_vec(&record)?)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Read-only lookup; the only operation in this store that callers may
    /// retry automatically.
    pub fn lookup(
        &self,
        event_id: &str,
        intent_id: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let key = idempotency_key(event_id, intent_id);
        let txn = self.store.begin_read()?;
        let table = match txn.open_table(IDEMPOTENCY_TABLE) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        table
            .get(key.as_str())?
            .map(|v| serde_json::from_slice::<IdempotencyRecord>(&v.value()))
            .transpose()
            .map_err(Into::into)
    }

    /// IN_FLIGHT records older than the recovery timeout. These are the
    /// crash survivors: nothing resolves them automatically either way —
    /// they are surfaced to the operator reconciliation path.
    pub fn stale_in_flight(
        &self,
        now: i64,
        recovery_timeout_ms: i64,
    ) -> Result<Vec<(String, IdempotencyRecord)>, StoreError> {
        let txn = self.store.begin_read()?;
        let table = match txn.open_table(IDEMPOTENCY_TABLE) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut stale = Vec::new();
        for res in table.range::<&str>(..)? {
            let (k, v) = res?;
            let record: IdempotencyRecord = serde_json::from_slice(&v.value())?;
            if record.status == IdempotencyStatus::InFlight
                && now - record.created_at > recovery_timeout_ms
            {
                warn!(key = %k.value(), age_ms = now - record.created_at, "stale IN_FLIGHT idempotency record");
                stale.push((k.value().to_string(), record));
            }
        }
        Ok(stale)
    }
}
