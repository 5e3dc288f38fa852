use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Severity of an upstream risk event. Ordering matters: escalation rules
/// compare severities, never recency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Immutable upstream risk event. Read-only reference data for the
/// Risk Permission Engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvent {
    pub event_id: String,
    /// Event time, epoch millis.
    pub event_time: i64,
    pub severity: Severity,
    pub category: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Green,
    Yellow,
    Red,
}

impl RiskLevel {
    /// Pinned size multipliers. Contract constants, not tunables.
    pub fn size_multiplier(&self) -> Decimal {
        match self {
            RiskLevel::Green => dec!(1.0),
            RiskLevel::Yellow => dec!(0.5),
            RiskLevel::Red => dec!(0.0),
        }
    }
}

/// Derived risk state for one evaluation instant. Never mutated in place;
/// recomputed per evaluation. `reasons` and `event_ids` are part of the
/// contract, not optional annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub state: RiskLevel,
    pub size_multiplier: Decimal,
    pub reasons: Vec<String>,
    pub event_ids: Vec<String>,
    /// Evaluation instant, epoch millis.
    pub as_of: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    Allow,
    Restrict,
    Block,
}

/// Outcome class of one decision, as recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    Blocked,
    Placed,
    Noop,
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Long,
    Short,
}

/// Strategy intent kinds. Closed set: unknown kinds are rejected at the
/// deserialization boundary, never passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentKind {
    Hold,
    EnterLong,
    EnterShort,
    ExitLong,
    ExitShort,
}

impl IntentKind {
    pub fn is_hold(&self) -> bool {
        matches!(self, IntentKind::Hold)
    }

    pub fn is_entry(&self) -> bool {
        matches!(self, IntentKind::EnterLong | IntentKind::EnterShort)
    }

    pub fn is_exit(&self) -> bool {
        matches!(self, IntentKind::ExitLong | IntentKind::ExitShort)
    }

    /// Side of the position this intent targets. None for HOLD.
    pub fn side(&self) -> Option<Side> {
        match self {
            IntentKind::EnterLong | IntentKind::ExitLong => Some(Side::Long),
            IntentKind::EnterShort | IntentKind::ExitShort => Some(Side::Short),
            IntentKind::Hold => None,
        }
    }
}

/// Opaque, already-validated choice from the strategy selector, plus the
/// identifiers that form the idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyIntent {
    pub event_id: String,
    pub intent_id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub timeframe: String,
    pub kind: IntentKind,
    #[serde(default)]
    pub quantity: Decimal,
    /// Paper-fill reference price. Required for any non-HOLD intent.
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    /// True when the order carries a full bracket (protective exit).
    #[serde(default)]
    pub bracket: bool,
    /// Signal time, epoch millis.
    pub t_signal: i64,
}

impl StrategyIntent {
    /// Every live (non-HOLD) order must carry a protective exit.
    pub fn has_protective_exit(&self) -> bool {
        self.bracket || self.stop_loss.is_some() || self.take_profit.is_some()
    }
}

/// Control-plane gate, read at the start of every submission. Explicitly
/// passed and versioned so concurrent tasks cannot observe inconsistent
/// arm/kill views.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ControlState {
    pub armed: bool,
    pub kill_switch: bool,
    pub version: u64,
}

impl ControlState {
    pub fn armed(version: u64) -> Self {
        Self {
            armed: true,
            kill_switch: false,
            version,
        }
    }

    /// True when only position-reducing submissions may proceed.
    pub fn reduce_only(&self) -> bool {
        !self.armed || self.kill_switch
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Filled,
    None,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub order_ids: Vec<String>,
    pub filled_qty: Decimal,
    pub status: ExecutionStatus,
}

impl ExecutionSummary {
    pub fn none() -> Self {
        Self {
            order_ids: Vec::new(),
            filled_qty: Decimal::ZERO,
            status: ExecutionStatus::None,
        }
    }
}

/// Inputs subsection of a decision record; hashed on its own as
/// `hashes.inputs_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionInputs {
    pub event_id: String,
    pub intent_id: String,
    pub strategy_id: String,
    pub intent: IntentKind,
    pub requested_qty: Decimal,
    pub size_multiplier: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHashes {
    pub core_hash: String,
    pub content_hash: String,
    pub inputs_hash: String,
}

/// Current decision record schema version. v1 records are only accepted
/// through the structural migration path.
pub const RECORD_VERSION: u32 = 2;

/// One immutable audit entry describing a single risk/execution decision.
/// Append-only: corrections are new records, never in-place edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub record_version: u32,
    pub decision_id: String,
    /// Write time, epoch millis.
    pub timestamp: i64,
    pub symbol: String,
    pub timeframe: String,
    pub event_id: String,
    pub intent_id: String,
    pub strategy_id: String,
    pub risk_state: RiskState,
    pub permission: Permission,
    pub action: DecisionAction,
    pub reason: String,
    pub inputs: DecisionInputs,
    #[serde(default)]
    pub data_snapshot_hash: Option<String>,
    #[serde(default)]
    pub feature_snapshot_hash: Option<String>,
    pub execution: ExecutionSummary,
    pub hashes: RecordHashes,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_action_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&DecisionAction::Blocked).unwrap(),
            "\"blocked\""
        );
        assert_eq!(
            serde_json::to_string(&DecisionAction::Duplicate).unwrap(),
            "\"duplicate\""
        );
    }

    #[test]
    fn test_protective_exit_flag() {
        let mut intent = StrategyIntent {
            event_id: "E1".into(),
            intent_id: "I1".into(),
            strategy_id: "trend-1".into(),
            symbol: "BTC/USDT".into(),
            timeframe: "1h".into(),
            kind: IntentKind::EnterLong,
            quantity: dec!(0.5),
            limit_price: Some(dec!(50000)),
            stop_loss: None,
            take_profit: None,
            bracket: false,
            t_signal: 1_700_000_000_000,
        };
        assert!(!intent.has_protective_exit());
        intent.stop_loss = Some(dec!(49000));
        assert!(intent.has_protective_exit());
    }

    #[test]
    fn test_reduce_only_gate() {
        let mut control = ControlState::armed(1);
        assert!(!control.reduce_only());
        control.kill_switch = true;
        assert!(control.reduce_only());
        control.kill_switch = false;
        control.armed = false;
        assert!(control.reduce_only());
    }
}
