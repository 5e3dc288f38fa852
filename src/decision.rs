//! The pure decision core.
//!
//! `decide` maps (intent, risk state, control state, position state) to a
//! permission/action verdict with no side effects and no clock access.
//! Live submission and replay call the same function, which is what makes
//! recorded decisions reproducible from their snapshots.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::codec;
use crate::error::CoreError;
use crate::model::{ControlState, Permission, RiskLevel, RiskState, Side, StrategyIntent};
use crate::position::PositionState;

/// What the engine should do next. `Place` and `Noop` still need the
/// idempotency key completed; `Blocked` marks it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlannedAction {
    Blocked,
    Place,
    Noop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub permission: Permission,
    pub planned: PlannedAction,
    pub reason: String,
    pub sized_qty: Decimal,
}

impl Verdict {
    fn blocked(reason: impl Into<String>) -> Self {
        Self {
            permission: Permission::Block,
            planned: PlannedAction::Blocked,
            reason: reason.into(),
            sized_qty: Decimal::ZERO,
        }
    }
}

/// Stable, derived decision identity: first 16 hex chars of the SHA-256
/// over the canonical id triple. Recomputable from any snapshot.
pub fn derive_decision_id(
    event_id: &str,
    intent_id: &str,
    strategy_id: &str,
) -> Result<String, CoreError> {
    let value = json!({
        "event_id": event_id,
        "intent_id": intent_id,
        "strategy_id": strategy_id,
    });
    let digest = codec::hash_canonical(&value)?;
    Ok(digest[..16].to_string())
}

/// Evaluate one submission. Check order is part of the contract; the first
/// failing gate wins and everything fails closed.
pub fn decide(
    intent: &StrategyIntent,
    risk: &RiskState,
    control: &ControlState,
    position_state: PositionState,
    position_side: Option<Side>,
) -> Verdict {
    // 1. Structural validation. Never defaulted, never warned.
    if intent.event_id.trim().is_empty()
        || intent.intent_id.trim().is_empty()
        || intent.strategy_id.trim().is_empty()
    {
        return Verdict::blocked("validation failed: empty event/intent/strategy id");
    }
    if !intent.kind.is_hold() {
        if intent.quantity <= Decimal::ZERO {
            return Verdict::blocked("validation failed: quantity must be positive");
        }
        if intent.limit_price.is_none() {
            return Verdict::blocked("validation failed: missing reference price");
        }
    }

    // 2. RED risk blocks everything, exits included.
    if risk.state == RiskLevel::Red {
        return Verdict::blocked("risk state RED");
    }

    // 3. Kill switch / disarmed control: reduce-only. Exits against an
    //    OPEN position stay allowed.
    if control.reduce_only() && !(intent.kind.is_exit() && position_state == PositionState::Open) {
        let gate = if control.kill_switch {
            "kill switch engaged"
        } else {
            "control disarmed"
        };
        return Verdict::blocked(format!("{} (reduce-only)", gate));
    }

    // 4. Protective exit is a submission precondition for live orders.
    if !intent.kind.is_hold() && !intent.has_protective_exit() {
        return Verdict::blocked("validation failed: missing protective exit (stop-loss/take-profit/bracket)");
    }

    // 5. Position state machine legality.
    if intent.kind.is_entry() && position_state != PositionState::Flat {
        return Verdict::blocked(format!(
            "illegal transition: {:?} while {}",
            intent.kind, position_state
        ));
    }
    if intent.kind.is_exit() {
        if position_state != PositionState::Open {
            return Verdict::blocked(format!(
                "illegal transition: {:?} while {}",
                intent.kind, position_state
            ));
        }
        if position_side != intent.kind.side() {
            return Verdict::blocked(format!(
                "illegal transition: {:?} against {:?} position",
                intent.kind, position_side
            ));
        }
    }

    // 6. Admitted. YELLOW halves size via the multiplier; GREEN passes
    //    through.
    let permission = match risk.state {
        RiskLevel::Green => Permission::Allow,
        RiskLevel::Yellow => Permission::Restrict,
        RiskLevel::Red => unreachable!("RED handled above"),
    };
    if intent.kind.is_hold() {
        return Verdict {
            permission,
            planned: PlannedAction::Noop,
            reason: "hold: no order side effect".to_string(),
            sized_qty: Decimal::ZERO,
        };
    }
    let sized_qty = intent.quantity * risk.size_multiplier;
    let reason = match permission {
        Permission::Allow => "accepted".to_string(),
        Permission::Restrict => format!(
            "accepted with restriction: size multiplier {}",
            risk.size_multiplier
        ),
        Permission::Block => unreachable!(),
    };
    Verdict {
        permission,
        planned: PlannedAction::Place,
        reason,
        sized_qty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IntentKind;
    use rust_decimal_macros::dec;

    fn intent(kind: IntentKind) -> StrategyIntent {
        StrategyIntent {
            event_id: "E1".into(),
            intent_id: "I1".into(),
            strategy_id: "trend-1".into(),
            symbol: "BTC/USDT".into(),
            timeframe: "1h".into(),
            kind,
            quantity: dec!(1),
            limit_price: Some(dec!(50000)),
            stop_loss: Some(dec!(49000)),
            take_profit: None,
            bracket: false,
            t_signal: 1_700_000_000_000,
        }
    }

    fn risk(level: RiskLevel) -> RiskState {
        RiskState {
            state: level,
            size_multiplier: level.size_multiplier(),
            reasons: vec!["test".into()],
            event_ids: vec![],
            as_of: 0,
        }
    }

    #[test]
    fn test_green_entry_is_placed_full_size() {
        let v = decide(
            &intent(IntentKind::EnterLong),
            &risk(RiskLevel::Green),
            &ControlState::armed(1),
            PositionState::Flat,
            None,
        );
        assert_eq!(v.permission, Permission::Allow);
        assert_eq!(v.planned, PlannedAction::Place);
        assert_eq!(v.sized_qty, dec!(1));
    }

    #[test]
    fn test_yellow_halves_size() {
        let v = decide(
            &intent(IntentKind::EnterLong),
            &risk(RiskLevel::Yellow),
            &ControlState::armed(1),
            PositionState::Flat,
            None,
        );
        assert_eq!(v.permission, Permission::Restrict);
        assert_eq!(v.sized_qty, dec!(0.5));
    }

    #[test]
    fn test_red_blocks_even_exits() {
        let v = decide(
            &intent(IntentKind::ExitLong),
            &risk(RiskLevel::Red),
            &ControlState::armed(1),
            PositionState::Open,
            Some(Side::Long),
        );
        assert_eq!(v.permission, Permission::Block);
        assert_eq!(v.reason, "risk state RED");
    }

    #[test]
    fn test_kill_switch_is_reduce_only() {
        let mut control = ControlState::armed(1);
        control.kill_switch = true;

        let v = decide(
            &intent(IntentKind::EnterLong),
            &risk(RiskLevel::Green),
            &control,
            PositionState::Flat,
            None,
        );
        assert_eq!(v.planned, PlannedAction::Blocked);
        assert!(v.reason.contains("kill switch"));

        let v = decide(
            &intent(IntentKind::ExitLong),
            &risk(RiskLevel::Green),
            &control,
            PositionState::Open,
            Some(Side::Long),
        );
        assert_eq!(v.planned, PlannedAction::Place);
    }

    #[test]
    fn test_missing_protective_exit_blocks() {
        let mut i = intent(IntentKind::EnterLong);
        i.stop_loss = None;
        i.take_profit = None;
        i.bracket = false;
        let v = decide(
            &i,
            &risk(RiskLevel::Green),
            &ControlState::armed(1),
            PositionState::Flat,
            None,
        );
        assert_eq!(v.planned, PlannedAction::Blocked);
        assert!(v.reason.contains("protective exit"));
    }

    #[test]
    fn test_entry_while_open_blocks() {
        let v = decide(
            &intent(IntentKind::EnterLong),
            &risk(RiskLevel::Green),
            &ControlState::armed(1),
            PositionState::Open,
            Some(Side::Long),
        );
        assert_eq!(v.planned, PlannedAction::Blocked);
        assert!(v.reason.contains("illegal transition"));
    }

    #[test]
    fn test_exit_wrong_side_blocks() {
        let v = decide(
            &intent(IntentKind::ExitShort),
            &risk(RiskLevel::Green),
            &ControlState::armed(1),
            PositionState::Open,
            Some(Side::Long),
        );
        assert_eq!(v.planned, PlannedAction::Blocked);
    }

    #[test]
    fn test_hold_is_noop() {
        let mut i = intent(IntentKind::Hold);
        i.stop_loss = None;
        let v = decide(
            &i,
            &risk(RiskLevel::Green),
            &ControlState::armed(1),
            PositionState::Flat,
            None,
        );
        assert_eq!(v.planned, PlannedAction::Noop);
        assert_eq!(v.sized_qty, dec!(0));
    }

    #[test]
    fn test_decision_id_is_stable() {
        let a = derive_decision_id("E1", "I1", "trend-1").unwrap();
        let b = derive_decision_id("E1", "I1", "trend-1").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        let c = derive_decision_id("E1", "I2", "trend-1").unwrap();
        assert_ne!(a, c);
    }
}
