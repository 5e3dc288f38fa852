pub mod audit;
pub mod codec;
pub mod config;
pub mod context;
pub mod decision;
pub mod engine;
pub mod error;
pub mod idempotency;
pub mod model;
pub mod persistence;
pub mod position;
pub mod replay;
pub mod risk_engine;
pub mod snapshot;
