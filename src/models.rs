use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV sample for a fixed interval. Immutable once produced; the
/// engine assumes strictly increasing timestamps per instrument.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Indicator values aligned to the latest bar of the rolling window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSet {
    pub trend_strength: f64,
    pub band_upper: f64,
    pub band_middle: f64,
    pub band_lower: f64,
    pub momentum: f64,
    pub volatility: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Stop,
    Target,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Stop => "stop",
            ExitReason::Target => "target",
        }
    }
}

/// The single live position. At most one exists per engine instance;
/// owned exclusively by the position state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub entry_price: f64,
    pub quantity: i64,
    pub stop_price: f64,
    pub target_price: f64,
    pub entry_time: DateTime<Utc>,
    /// Resting protective stop order at the broker, if armed.
    #[serde(default)]
    pub stop_order_id: Option<String>,
    /// Resting profit-target limit order at the broker, if armed.
    #[serde(default)]
    pub target_order_id: Option<String>,
}

/// Record of a closed round trip. Created once per closed position and
/// never mutated afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: i64,
    pub realized_pnl: f64,
    pub duration_secs: i64,
    pub exit_reason: ExitReason,
}

/// Daily throttle counters, reset at the session-day boundary.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DailyRiskState {
    pub trades_today: u32,
    pub daily_pnl: f64,
}

/// Outcome of one engine cycle, exposed to callers of `evaluate_cycle`.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    NoAction,
    EntryRequested {
        quantity: i64,
        stop_price: f64,
        target_price: f64,
    },
    ExitRequested(ExitReason),
    EntryFilled,
    ExitFilled(TradeRecord),
}

/// Acknowledgement for an accepted order submission.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
}

/// Broker-side order state as observed when polling.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderStatus {
    Pending,
    Filled {
        price: f64,
        filled_at: DateTime<Utc>,
    },
    Rejected {
        reason: String,
    },
}
