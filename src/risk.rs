use crate::config::StrategyConfig;
use crate::error::EngineError;
use crate::models::DailyRiskState;
use chrono::NaiveDate;
use log::info;

/// Converts account equity and volatility into a bounded order quantity and
/// tracks the per-day trade-count and loss throttles. Counters reset exactly
/// once when the session day changes.
pub struct RiskManager {
    state: DailyRiskState,
    current_day: Option<NaiveDate>,
}

impl RiskManager {
    pub fn new() -> Self {
        Self {
            state: DailyRiskState::default(),
            current_day: None,
        }
    }

    /// `floor(equity * risk_per_trade_pct / (volatility * stop_multiplier))`.
    /// A zero or negative stop distance is an error; a non-positive quantity
    /// is a valid "no trade this cycle" outcome.
    pub fn size_position(
        &self,
        equity: f64,
        volatility: f64,
        config: &StrategyConfig,
    ) -> Result<i64, EngineError> {
        if !equity.is_finite() || equity < 0.0 {
            return Err(EngineError::InvalidRisk(format!(
                "account equity {} is not usable",
                equity
            )));
        }
        let stop_distance = volatility * config.stop_loss_volatility_multiplier;
        if !stop_distance.is_finite() || stop_distance <= 0.0 {
            return Err(EngineError::InvalidRisk(format!(
                "stop distance {} from volatility {}",
                stop_distance, volatility
            )));
        }

        let risk_amount = equity * config.risk_per_trade_pct;
        Ok((risk_amount / stop_distance).floor() as i64)
    }

    /// Increment the daily trade count. Called once per entry fill, never
    /// at exit.
    pub fn record_entry(&mut self) {
        self.state.trades_today += 1;
    }

    /// Accumulate realized pnl from a closed position.
    pub fn record_close(&mut self, pnl: f64) {
        self.state.daily_pnl += pnl;
    }

    /// Zero both counters for a new session day. `roll_day` calls this
    /// exactly once per calendar-day change.
    pub fn reset_for_new_day(&mut self) {
        self.state = DailyRiskState::default();
    }

    /// Detect the session boundary from the external clock's calendar day.
    /// Returns true when a reset happened.
    pub fn roll_day(&mut self, today: NaiveDate) -> bool {
        match self.current_day {
            Some(day) if day == today => false,
            previous => {
                self.current_day = Some(today);
                self.reset_for_new_day();
                if previous.is_some() {
                    info!("Session day changed to {}; daily counters reset", today);
                }
                previous.is_some()
            }
        }
    }

    pub fn snapshot(&self) -> DailyRiskState {
        self.state
    }
}

impl Default for RiskManager {
    fn default() -> Self {
        Self::new()
    }
}
