pub mod log;
pub mod migrate;

pub use log::DecisionLog;
