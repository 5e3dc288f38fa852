//! Position State Machine.
//!
//! Every position cycles through a deterministic set of states.
//! Transitions are guarded: illegal transitions are rejected, never
//! silently coerced.
//!
//! State Diagram:
//! ```text
//!   FLAT → OPENING → OPEN → CLOSING → FLAT
//! ```
//! No other edges exist. OPENING begins when an ENTER intent is accepted;
//! OPEN is reached on the first fill; CLOSING begins when an EXIT intent is
//! accepted against an OPEN position; FLAT is reached when cumulative
//! closing fills reach the open quantity.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CoreError;
use crate::model::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionState {
    Flat,
    Opening,
    Open,
    Closing,
}

impl PositionState {
    /// The set of states reachable from this state.
    pub fn valid_transitions(&self) -> &'static [PositionState] {
        use PositionState::*;
        match self {
            Flat => &[Opening],
            Opening => &[Open],
            Open => &[Closing],
            Closing => &[Flat],
        }
    }

    pub fn can_transition_to(&self, next: &PositionState) -> bool {
        self.valid_transitions().contains(next)
    }
}

impl std::fmt::Display for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One position per (strategy_id, symbol), owned exclusively by the
/// Execution Engine and mutated only through state-machine transitions
/// triggered by fills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub strategy_id: String,
    pub symbol: String,
    pub state: PositionState,
    #[serde(default)]
    pub side: Option<Side>,
    pub quantity: Decimal,
    pub average_entry_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    /// Quantity still expected from the accepted intent (entry) or still
    /// left to close (exit).
    #[serde(default)]
    pub pending_qty: Decimal,
    #[serde(default)]
    pub last_update_ts: i64,
}

impl Position {
    pub fn flat(strategy_id: &str, symbol: &str) -> Self {
        Self {
            strategy_id: strategy_id.to_string(),
            symbol: symbol.to_string(),
            state: PositionState::Flat,
            side: None,
            quantity: Decimal::ZERO,
            average_entry_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            pending_qty: Decimal::ZERO,
            last_update_ts: 0,
        }
    }

    pub fn key(strategy_id: &str, symbol: &str) -> String {
        format!("{}\u{1f}{}", strategy_id, symbol)
    }

    fn transition(&mut self, next: PositionState, ts: i64) -> Result<(), CoreError> {
        if !self.state.can_transition_to(&next) {
            return Err(CoreError::Validation(format!(
                "illegal position transition for {}/{}: {} -> {}",
                self.strategy_id, self.symbol, self.state, next
            )));
        }
        info!(
            strategy_id = %self.strategy_id,
            symbol = %self.symbol,
            from = %self.state,
            to = %next,
            "position transition"
        );
        self.state = next;
        self.last_update_ts = ts;
        Ok(())
    }

    /// An ENTER intent was accepted. FLAT -> OPENING.
    pub fn begin_open(&mut self, side: Side, qty: Decimal, ts: i64) -> Result<(), CoreError> {
        if qty <= Decimal::ZERO {
            return Err(CoreError::Validation("entry quantity must be positive".into()));
        }
        self.transition(PositionState::Opening, ts)?;
        self.side = Some(side);
        self.pending_qty = qty;
        Ok(())
    }

    /// Entry fill confirmation. First fill moves OPENING -> OPEN; further
    /// partial fills keep the state but update quantity and the
    /// quantity-weighted average entry price.
    pub fn apply_entry_fill(&mut self, qty: Decimal, price: Decimal, ts: i64) -> Result<(), CoreError> {
        if qty <= Decimal::ZERO {
            return Err(CoreError::Validation("fill quantity must be positive".into()));
        }
        match self.state {
            PositionState::Opening => {
                self.transition(PositionState::Open, ts)?;
            }
            PositionState::Open => {
                self.last_update_ts = ts;
            }
            other => {
                return Err(CoreError::Validation(format!(
                    "entry fill received while {} for {}/{}",
                    other, self.strategy_id, self.symbol
                )));
            }
        }
        let total = self.quantity + qty;
        self.average_entry_price =
            (self.average_entry_price * self.quantity + price * qty) / total;
        self.quantity = total;
        self.pending_qty = (self.pending_qty - qty).max(Decimal::ZERO);
        Ok(())
    }

    /// An EXIT intent was accepted against an OPEN position. OPEN -> CLOSING.
    pub fn begin_close(&mut self, ts: i64) -> Result<(), CoreError> {
        self.transition(PositionState::Closing, ts)?;
        self.pending_qty = self.quantity;
        Ok(())
    }

    /// Closing fill confirmation. Partial fills keep CLOSING and reduce
    /// quantity; FLAT is reached when cumulative closing fills consume the
    /// open quantity. Realized PnL accumulates deterministically.
    pub fn apply_exit_fill(&mut self, qty: Decimal, price: Decimal, ts: i64) -> Result<(), CoreError> {
        if self.state != PositionState::Closing {
            return Err(CoreError::Validation(format!(
                "exit fill received while {} for {}/{}",
                self.state, self.strategy_id, self.symbol
            )));
        }
        if qty <= Decimal::ZERO || qty > self.quantity {
            return Err(CoreError::Validation(format!(
                "exit fill qty {} outside open quantity {}",
                qty, self.quantity
            )));
        }
        let direction = match self.side {
            Some(Side::Long) => Decimal::ONE,
            Some(Side::Short) => -Decimal::ONE,
            None => {
                return Err(CoreError::Validation(
                    "closing position has no side".into(),
                ));
            }
        };
        self.realized_pnl += (price - self.average_entry_price) * qty * direction;
        self.quantity -= qty;
        self.pending_qty = (self.pending_qty - qty).max(Decimal::ZERO);
        self.last_update_ts = ts;

        if self.quantity.is_zero() {
            self.transition(PositionState::Flat, ts)?;
            self.side = None;
            self.average_entry_price = Decimal::ZERO;
            self.unrealized_pnl = Decimal::ZERO;
        }
        Ok(())
    }

    /// Mark-to-market against an external reference price. Read-side only;
    /// never changes the state machine.
    pub fn mark(&mut self, price: Decimal) {
        if self.state == PositionState::Open || self.state == PositionState::Closing {
            let direction = match self.side {
                Some(Side::Long) => Decimal::ONE,
                Some(Side::Short) => -Decimal::ONE,
                None => return,
            };
            self.unrealized_pnl = (price - self.average_entry_price) * self.quantity * direction;
        }
    }
}
