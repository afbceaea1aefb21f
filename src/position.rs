use crate::models::{ExitReason, Position, TradeRecord};
use chrono::{DateTime, Utc};
use log::error;

/// Entry order submitted, awaiting fill confirmation.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub order_id: String,
    pub quantity: i64,
    pub requested_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub submitted_at: DateTime<Utc>,
}

/// Exit order submitted, awaiting fill confirmation.
#[derive(Debug, Clone)]
pub struct PendingExit {
    pub position: Position,
    pub order_id: String,
    pub reason: ExitReason,
}

#[derive(Debug, Clone, Default)]
pub enum PositionState {
    #[default]
    Flat,
    EntryPending(PendingEntry),
    Open(Position),
    ExitPending(PendingExit),
}

impl PositionState {
    pub fn name(&self) -> &'static str {
        match self {
            PositionState::Flat => "flat",
            PositionState::EntryPending(_) => "entry_pending",
            PositionState::Open(_) => "open",
            PositionState::ExitPending(_) => "exit_pending",
        }
    }
}

/// Owns the single position slot and applies lifecycle transitions:
/// Flat -> EntryPending -> Open -> ExitPending -> Flat. Rejected orders
/// revert to the prior state without creating a Position or TradeRecord.
#[derive(Default)]
pub struct PositionStateMachine {
    state: PositionState,
}

impl PositionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &PositionState {
        &self.state
    }

    pub fn is_flat(&self) -> bool {
        matches!(self.state, PositionState::Flat)
    }

    /// A Position exists exactly while the machine is Open or ExitPending.
    pub fn position(&self) -> Option<&Position> {
        match &self.state {
            PositionState::Open(position) => Some(position),
            PositionState::ExitPending(pending) => Some(&pending.position),
            _ => None,
        }
    }

    pub fn has_position(&self) -> bool {
        self.position().is_some()
    }

    /// Order id of an in-flight entry or exit request, if any.
    pub fn pending_order_id(&self) -> Option<&str> {
        match &self.state {
            PositionState::EntryPending(pending) => Some(&pending.order_id),
            PositionState::ExitPending(pending) => Some(&pending.order_id),
            _ => None,
        }
    }

    /// Flat -> EntryPending. Stop and target were computed at decision time
    /// from the observed price and volatility.
    pub fn request_entry(&mut self, pending: PendingEntry) {
        debug_assert!(self.is_flat(), "entry requested while {}", self.state.name());
        self.state = PositionState::EntryPending(pending);
    }

    /// EntryPending -> Open. The actual fill price becomes the Position's
    /// entry price; the armed stop and target stay as requested.
    pub fn confirm_entry_fill(&mut self, fill_price: f64, filled_at: DateTime<Utc>) -> i64 {
        match std::mem::take(&mut self.state) {
            PositionState::EntryPending(pending) => {
                let quantity = pending.quantity;
                self.state = PositionState::Open(Position {
                    entry_price: fill_price,
                    quantity,
                    stop_price: pending.stop_price,
                    target_price: pending.target_price,
                    entry_time: filled_at,
                    stop_order_id: None,
                    target_order_id: None,
                });
                quantity
            }
            other => {
                error!("entry fill confirmed while {}", other.name());
                self.state = other;
                0
            }
        }
    }

    /// EntryPending -> Flat on gateway rejection or cancellation.
    pub fn abort_entry(&mut self) {
        if matches!(self.state, PositionState::EntryPending(_)) {
            self.state = PositionState::Flat;
        } else {
            error!("entry abort while {}", self.state.name());
        }
    }

    /// Record broker-side protective legs on the open position.
    pub fn arm_brackets(&mut self, stop_order_id: Option<String>, target_order_id: Option<String>) {
        if let PositionState::Open(position) = &mut self.state {
            position.stop_order_id = stop_order_id;
            position.target_order_id = target_order_id;
        }
    }

    /// Evaluate the open position against the current price. The stop is
    /// checked before the target; when a single bar breaches both, the stop
    /// wins.
    pub fn check_exit(&self, current_price: f64) -> Option<ExitReason> {
        let PositionState::Open(position) = &self.state else {
            return None;
        };
        if current_price <= position.stop_price {
            Some(ExitReason::Stop)
        } else if current_price >= position.target_price {
            Some(ExitReason::Target)
        } else {
            None
        }
    }

    /// Open -> ExitPending once the exit order is acknowledged.
    pub fn request_exit(&mut self, order_id: String, reason: ExitReason) {
        match std::mem::take(&mut self.state) {
            PositionState::Open(position) => {
                self.state = PositionState::ExitPending(PendingExit {
                    position,
                    order_id,
                    reason,
                });
            }
            other => {
                error!("exit requested while {}", other.name());
                self.state = other;
            }
        }
    }

    /// ExitPending -> Flat. Computes realized pnl from the actual exit fill
    /// and emits the immutable trade record.
    pub fn confirm_exit_fill(
        &mut self,
        symbol: &str,
        exit_price: f64,
        filled_at: DateTime<Utc>,
    ) -> Option<TradeRecord> {
        match std::mem::take(&mut self.state) {
            PositionState::ExitPending(pending) => {
                let position = pending.position;
                let realized_pnl =
                    (exit_price - position.entry_price) * position.quantity as f64;
                self.state = PositionState::Flat;
                Some(TradeRecord {
                    symbol: symbol.to_string(),
                    entry_price: position.entry_price,
                    exit_price,
                    quantity: position.quantity,
                    realized_pnl,
                    duration_secs: (filled_at - position.entry_time).num_seconds(),
                    exit_reason: pending.reason,
                })
            }
            other => {
                error!("exit fill confirmed while {}", other.name());
                self.state = other;
                None
            }
        }
    }

    /// ExitPending -> Open on gateway rejection; the position stays live.
    pub fn abort_exit(&mut self) {
        match std::mem::take(&mut self.state) {
            PositionState::ExitPending(pending) => {
                self.state = PositionState::Open(pending.position);
            }
            other => {
                error!("exit abort while {}", other.name());
                self.state = other;
            }
        }
    }
}
