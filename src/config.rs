use crate::error::EngineError;
use chrono::NaiveTime;
use log::warn;
use serde_json::Value;
use std::collections::HashMap;

const SESSION_TIME_FORMAT: &str = "%H:%M";

/// Immutable strategy configuration. Built from a JSON parameter map with
/// documented defaults; unrecognized keys are ignored with a warning and
/// bad values fail fast before the engine starts.
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub trend_period: usize,
    pub trend_threshold: f64,
    pub band_period: usize,
    pub band_width_multiplier: f64,
    pub momentum_period: usize,
    pub momentum_oversold_level: f64,
    pub momentum_overbought_level: f64,
    pub volatility_period: usize,
    pub stop_loss_volatility_multiplier: f64,
    pub profit_target_pct: f64,
    pub risk_per_trade_pct: f64,
    pub max_trades_per_day: u32,
    /// Compared literally against accumulated daily pnl in currency units,
    /// not against a fraction of equity.
    pub daily_loss_limit_pct: f64,
    pub session_start_time: NaiveTime,
    pub session_end_time: NaiveTime,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            trend_period: 14,
            trend_threshold: 20.0,
            band_period: 20,
            band_width_multiplier: 2.0,
            momentum_period: 14,
            momentum_oversold_level: 30.0,
            momentum_overbought_level: 70.0,
            volatility_period: 14,
            stop_loss_volatility_multiplier: 1.5,
            profit_target_pct: 0.015,
            risk_per_trade_pct: 0.01,
            max_trades_per_day: 5,
            daily_loss_limit_pct: 0.02,
            session_start_time: NaiveTime::from_hms_opt(9, 35, 0).unwrap(),
            session_end_time: NaiveTime::from_hms_opt(15, 55, 0).unwrap(),
        }
    }
}

const RECOGNIZED_KEYS: &[&str] = &[
    "trend_period",
    "trend_threshold",
    "band_period",
    "band_width_multiplier",
    "momentum_period",
    "momentum_oversold_level",
    "momentum_overbought_level",
    "volatility_period",
    "stop_loss_volatility_multiplier",
    "profit_target_pct",
    "risk_per_trade_pct",
    "max_trades_per_day",
    "daily_loss_limit_pct",
    "session_start_time",
    "session_end_time",
];

impl StrategyConfig {
    /// Merge a raw parameter map over the defaults and validate eagerly.
    pub fn from_parameters(parameters: &HashMap<String, Value>) -> Result<Self, EngineError> {
        for key in parameters.keys() {
            if !RECOGNIZED_KEYS.contains(&key.as_str()) {
                warn!("Ignoring unrecognized config key `{}`", key);
            }
        }

        let defaults = Self::default();
        let config = Self {
            trend_period: get_period(parameters, "trend_period", defaults.trend_period)?,
            trend_threshold: get_f64(parameters, "trend_threshold", defaults.trend_threshold)?,
            band_period: get_period(parameters, "band_period", defaults.band_period)?,
            band_width_multiplier: get_f64(
                parameters,
                "band_width_multiplier",
                defaults.band_width_multiplier,
            )?,
            momentum_period: get_period(parameters, "momentum_period", defaults.momentum_period)?,
            momentum_oversold_level: get_f64(
                parameters,
                "momentum_oversold_level",
                defaults.momentum_oversold_level,
            )?,
            momentum_overbought_level: get_f64(
                parameters,
                "momentum_overbought_level",
                defaults.momentum_overbought_level,
            )?,
            volatility_period: get_period(
                parameters,
                "volatility_period",
                defaults.volatility_period,
            )?,
            stop_loss_volatility_multiplier: get_f64(
                parameters,
                "stop_loss_volatility_multiplier",
                defaults.stop_loss_volatility_multiplier,
            )?,
            profit_target_pct: get_f64(parameters, "profit_target_pct", defaults.profit_target_pct)?,
            risk_per_trade_pct: get_f64(
                parameters,
                "risk_per_trade_pct",
                defaults.risk_per_trade_pct,
            )?,
            max_trades_per_day: get_count(
                parameters,
                "max_trades_per_day",
                defaults.max_trades_per_day,
            )?,
            daily_loss_limit_pct: get_f64(
                parameters,
                "daily_loss_limit_pct",
                defaults.daily_loss_limit_pct,
            )?,
            session_start_time: get_time(
                parameters,
                "session_start_time",
                defaults.session_start_time,
            )?,
            session_end_time: get_time(parameters, "session_end_time", defaults.session_end_time)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.trend_threshold <= 0.0 {
            return Err(config_error("trend_threshold must be positive"));
        }
        if self.band_width_multiplier <= 0.0 {
            return Err(config_error("band_width_multiplier must be positive"));
        }
        if !(0.0..=100.0).contains(&self.momentum_oversold_level)
            || !(0.0..=100.0).contains(&self.momentum_overbought_level)
        {
            return Err(config_error("momentum levels must be within [0, 100]"));
        }
        if self.momentum_oversold_level >= self.momentum_overbought_level {
            return Err(config_error(
                "momentum_oversold_level must be below momentum_overbought_level",
            ));
        }
        if self.stop_loss_volatility_multiplier <= 0.0 {
            return Err(config_error(
                "stop_loss_volatility_multiplier must be positive",
            ));
        }
        if self.profit_target_pct <= 0.0 {
            return Err(config_error("profit_target_pct must be positive"));
        }
        if self.risk_per_trade_pct <= 0.0 || self.risk_per_trade_pct > 1.0 {
            return Err(config_error("risk_per_trade_pct must be within (0, 1]"));
        }
        if self.max_trades_per_day == 0 {
            return Err(config_error("max_trades_per_day must be at least 1"));
        }
        if self.daily_loss_limit_pct <= 0.0 {
            return Err(config_error("daily_loss_limit_pct must be positive"));
        }
        if self.session_start_time >= self.session_end_time {
            return Err(config_error(
                "session_start_time must be before session_end_time",
            ));
        }
        Ok(())
    }

    /// The slowest indicator period; drives warm-up and window retention.
    pub fn max_period(&self) -> usize {
        self.trend_period
            .max(self.band_period)
            .max(self.momentum_period)
            .max(self.volatility_period)
    }

    /// Bars required before every indicator is defined. Delta-based
    /// indicators need one bar more than their period.
    pub fn min_bars(&self) -> usize {
        (self.trend_period + 1)
            .max(self.band_period)
            .max(self.momentum_period + 1)
            .max(self.volatility_period + 1)
    }
}

fn config_error(message: &str) -> EngineError {
    EngineError::Config(message.to_string())
}

fn get_f64(parameters: &HashMap<String, Value>, key: &str, default: f64) -> Result<f64, EngineError> {
    let Some(raw) = parameters.get(key) else {
        return Ok(default);
    };
    let value = raw
        .as_f64()
        .ok_or_else(|| EngineError::Config(format!("{} must be a number (value: {})", key, raw)))?;
    if !value.is_finite() {
        return Err(EngineError::Config(format!(
            "{} must be finite (value: {})",
            key, raw
        )));
    }
    Ok(value)
}

fn get_period(
    parameters: &HashMap<String, Value>,
    key: &str,
    default: usize,
) -> Result<usize, EngineError> {
    let value = get_f64(parameters, key, default as f64)?;
    if value.fract() != 0.0 || value < 1.0 {
        return Err(EngineError::Config(format!(
            "{} must be an integer >= 1 (value: {})",
            key, value
        )));
    }
    Ok(value as usize)
}

fn get_count(
    parameters: &HashMap<String, Value>,
    key: &str,
    default: u32,
) -> Result<u32, EngineError> {
    let value = get_f64(parameters, key, default as f64)?;
    if value.fract() != 0.0 || value < 0.0 {
        return Err(EngineError::Config(format!(
            "{} must be a non-negative integer (value: {})",
            key, value
        )));
    }
    Ok(value as u32)
}

fn get_time(
    parameters: &HashMap<String, Value>,
    key: &str,
    default: NaiveTime,
) -> Result<NaiveTime, EngineError> {
    let Some(raw) = parameters.get(key) else {
        return Ok(default);
    };
    let text = raw
        .as_str()
        .ok_or_else(|| EngineError::Config(format!("{} must be a string (value: {})", key, raw)))?;
    NaiveTime::parse_from_str(text.trim(), SESSION_TIME_FORMAT).map_err(|_| {
        EngineError::Config(format!("{} must be HH:MM (value: {})", key, text))
    })
}
