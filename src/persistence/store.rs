use crate::persistence::redb_store::{RedbStore, StoreError};
use crate::position::Position;
use redb::{ReadableTable, TableDefinition};
use std::sync::Arc;

// Tables
const POSITIONS_TABLE: TableDefinition<&str, Vec<u8>> = TableDefinition::new("positions");

/// Durable home of the position book. Positions are keyed by
/// `(strategy_id, symbol)` and must survive process restart so the state
/// machine picks up where it left off.
pub struct PersistenceStore {
    store: Arc<RedbStore>,
}

impl PersistenceStore {
    pub fn new(store: Arc<RedbStore>) -> Self {
        Self { store }
    }

    pub fn load_positions(&self) -> Result<Vec<Position>, StoreError> {
        let txn = self.store.begin_read()?;
        let table = match txn.open_table(POSITIONS_TABLE) {
            Ok(t) => t,
            // First run: table does not exist yet.
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut items = Vec::new();
        for res in table.range::<&str>(..)? {
            let (_, v) = res?;
            let item: Position = serde_json::from_slice(&v.value())?;
            items.push(item);
        }
        Ok(items)
    }

    pub fn save_position(&self, position: &Position) -> Result<(), StoreError> {
        let txn = self.store.begin_write()?;
        {
            let mut table = txn.open_table(POSITIONS_TABLE)?;
            let data = serde_json::to_vec(position)?;
            let key = Position::key(&position.strategy_id, &position.symbol);
            table.insert(key.as_str(), data)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn load_position(
        &self,
        strategy_id: &str,
        symbol: &str,
    ) -> Result<Option<Position>, StoreError> {
        let txn = self.store.begin_read()?;
        let table = match txn.open_table(POSITIONS_TABLE) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let key = Position::key(strategy_id, symbol);
        let maybe = table.get(key.as_str())?;
        maybe
            .map(|v| serde_json::from_slice::<Position>(&v.value()))
            .transpose()
            .map_err(Into::into)
    }
}
