pub mod redb_store;
pub mod store;
