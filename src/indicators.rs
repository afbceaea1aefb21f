use crate::config::StrategyConfig;
use crate::error::EngineError;
use crate::models::{Bar, IndicatorSet};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Extra bars retained beyond the slowest indicator period to absorb
/// warm-up noise.
pub const WINDOW_MARGIN: usize = 20;

/// Simple moving average of the trailing `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Moving-average envelope at +/- `width` standard deviations, aligned to
/// the latest value. Returns (upper, middle, lower).
pub fn bollinger_bands(closes: &[f64], period: usize, width: f64) -> Option<(f64, f64, f64)> {
    let middle = sma(closes, period)?;
    let window = &closes[closes.len() - period..];
    let variance = window
        .iter()
        .map(|&value| (value - middle).powi(2))
        .sum::<f64>()
        / period as f64;
    let deviation = variance.sqrt();
    Some((
        middle + width * deviation,
        middle,
        middle - width * deviation,
    ))
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// Wilder-smoothed relative strength index over the whole slice, returning
/// the value aligned to the last close. Bounded [0, 100].
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let mut sum_gain = 0.0f64;
    let mut sum_loss = 0.0f64;
    for i in 1..=period {
        let delta = closes[i] - closes[i - 1];
        if delta >= 0.0 {
            sum_gain += delta;
        } else {
            sum_loss += -delta;
        }
    }

    let mut avg_gain = sum_gain / period as f64;
    let mut avg_loss = sum_loss / period as f64;
    for i in (period + 1)..closes.len() {
        let delta = closes[i] - closes[i - 1];
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { -delta } else { 0.0 };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    Some(rsi_from_avgs(avg_gain, avg_loss))
}

fn true_range(bar: &Bar, prev_close: f64) -> f64 {
    (bar.high - bar.low)
        .max((bar.high - prev_close).abs())
        .max((bar.low - prev_close).abs())
}

/// Average true range over the trailing `period` bars.
pub fn atr(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }
    let start = bars.len() - period;
    let mut sum = 0.0f64;
    for i in start..bars.len() {
        sum += true_range(&bars[i], bars[i - 1].close);
    }
    Some(sum / period as f64)
}

/// Directional-movement trend strength aligned to the latest bar. Computed
/// from windowed sums of +DM/-DM against ATR; low values indicate a
/// range-bound market.
pub fn trend_strength(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let start = bars.len() - period;
    let mut tr_sum = 0.0f64;
    let mut dm_plus_sum = 0.0f64;
    let mut dm_minus_sum = 0.0f64;
    for i in start..bars.len() {
        tr_sum += true_range(&bars[i], bars[i - 1].close);

        let up_move = bars[i].high - bars[i - 1].high;
        let down_move = bars[i - 1].low - bars[i].low;
        if up_move > down_move && up_move > 0.0 {
            dm_plus_sum += up_move;
        }
        if down_move > up_move && down_move > 0.0 {
            dm_minus_sum += down_move;
        }
    }

    let avg_tr = tr_sum / period as f64;
    if avg_tr <= 0.0 {
        return Some(0.0);
    }
    let di_plus = dm_plus_sum / avg_tr * 100.0 / period as f64;
    let di_minus = dm_minus_sum / avg_tr * 100.0 / period as f64;
    let di_sum = di_plus + di_minus;
    if di_sum <= 0.0 {
        return Some(0.0);
    }
    Some((di_plus - di_minus).abs() / di_sum * 100.0)
}

/// Maintains the bounded rolling bar window and recomputes the full
/// indicator set deterministically on every accepted bar.
pub struct IndicatorEngine {
    window: VecDeque<Bar>,
    capacity: usize,
    trend_period: usize,
    band_period: usize,
    band_width_multiplier: f64,
    momentum_period: usize,
    volatility_period: usize,
    last_timestamp: Option<DateTime<Utc>>,
}

impl IndicatorEngine {
    pub fn new(config: &StrategyConfig) -> Self {
        let capacity = config.max_period() + WINDOW_MARGIN;
        Self {
            window: VecDeque::with_capacity(capacity + 1),
            capacity,
            trend_period: config.trend_period,
            band_period: config.band_period,
            band_width_multiplier: config.band_width_multiplier,
            momentum_period: config.momentum_period,
            volatility_period: config.volatility_period,
            last_timestamp: None,
        }
    }

    /// Bars required before every indicator field is defined. The
    /// directional and range indicators each need one bar of history
    /// beyond their period.
    pub fn min_bars(&self) -> usize {
        (self.trend_period + 1)
            .max(self.band_period)
            .max(self.momentum_period + 1)
            .max(self.volatility_period + 1)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Append a bar and recompute. Returns `None` while the window is still
    /// warming up; callers must treat that as "no decision possible this
    /// cycle", not an error.
    pub fn update(&mut self, bar: Bar) -> Result<Option<IndicatorSet>, EngineError> {
        validate_bar(&bar)?;
        if let Some(last) = self.last_timestamp {
            if bar.timestamp <= last {
                return Err(EngineError::OutOfOrderBar {
                    received: bar.timestamp,
                    last,
                });
            }
        }

        self.last_timestamp = Some(bar.timestamp);
        self.window.push_back(bar);
        while self.window.len() > self.capacity {
            self.window.pop_front();
        }

        Ok(self.compute())
    }

    fn compute(&self) -> Option<IndicatorSet> {
        if self.window.len() < self.min_bars() {
            return None;
        }

        let bars: Vec<Bar> = self.window.iter().copied().collect();
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let trend = trend_strength(&bars, self.trend_period)?;
        let (band_upper, band_middle, band_lower) =
            bollinger_bands(&closes, self.band_period, self.band_width_multiplier)?;
        let momentum = rsi(&closes, self.momentum_period)?;
        let volatility = atr(&bars, self.volatility_period)?;

        Some(IndicatorSet {
            trend_strength: trend,
            band_upper,
            band_middle,
            band_lower,
            momentum,
            volatility,
        })
    }
}

fn validate_bar(bar: &Bar) -> Result<(), EngineError> {
    let values = [bar.open, bar.high, bar.low, bar.close, bar.volume];
    if values.iter().any(|v| !v.is_finite()) {
        return Err(EngineError::MalformedBar {
            timestamp: bar.timestamp,
            reason: "non-finite field".to_string(),
        });
    }
    if bar.high < bar.low {
        return Err(EngineError::MalformedBar {
            timestamp: bar.timestamp,
            reason: format!("high {} below low {}", bar.high, bar.low),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(offset: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap()
                + Duration::minutes(offset),
            open,
            high,
            low,
            close,
            volume: 10_000.0,
        }
    }

    fn flat_bar(offset: i64, price: f64) -> Bar {
        bar(offset, price, price, price, price)
    }

    fn test_config() -> StrategyConfig {
        StrategyConfig::default()
    }

    #[test]
    fn undefined_until_warmup_then_defined() {
        let config = test_config();
        let mut engine = IndicatorEngine::new(&config);
        let min_bars = engine.min_bars();

        for i in 0..min_bars - 1 {
            let set = engine
                .update(bar(i as i64, 100.0, 101.0, 99.0, 100.0))
                .unwrap();
            assert!(set.is_none(), "bar {} should be below warm-up", i);
        }

        let set = engine
            .update(bar(min_bars as i64, 100.0, 101.0, 99.0, 100.0))
            .unwrap()
            .expect("full window must define all indicators");
        assert!(set.trend_strength.is_finite());
        assert!(set.volatility > 0.0);
        assert!((0.0..=100.0).contains(&set.momentum));
        assert!(set.band_lower <= set.band_middle && set.band_middle <= set.band_upper);
    }

    #[test]
    fn out_of_order_bar_is_rejected_and_window_unchanged() {
        let config = test_config();
        let mut engine = IndicatorEngine::new(&config);
        engine.update(flat_bar(10, 100.0)).unwrap();
        let len_before = engine.len();

        let err = engine.update(flat_bar(5, 100.0)).unwrap_err();
        assert!(matches!(err, EngineError::OutOfOrderBar { .. }));
        assert_eq!(engine.len(), len_before);

        // Equal timestamps are rejected too.
        let err = engine.update(flat_bar(10, 100.0)).unwrap_err();
        assert!(matches!(err, EngineError::OutOfOrderBar { .. }));
    }

    #[test]
    fn malformed_bar_is_rejected() {
        let config = test_config();
        let mut engine = IndicatorEngine::new(&config);
        let err = engine.update(bar(0, 100.0, 99.0, 101.0, 100.0)).unwrap_err();
        assert!(matches!(err, EngineError::MalformedBar { .. }));
        let err = engine
            .update(bar(1, f64::NAN, 101.0, 99.0, 100.0))
            .unwrap_err();
        assert!(matches!(err, EngineError::MalformedBar { .. }));
    }

    #[test]
    fn window_is_capped() {
        let config = test_config();
        let mut engine = IndicatorEngine::new(&config);
        let capacity = config.max_period() + WINDOW_MARGIN;
        for i in 0..(capacity + 50) {
            engine.update(flat_bar(i as i64, 100.0)).unwrap();
        }
        assert_eq!(engine.len(), capacity);
    }

    #[test]
    fn rsi_extremes() {
        let rising: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&rising, 14), Some(100.0));

        let falling: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        assert_eq!(rsi(&falling, 14), Some(0.0));

        let constant = vec![100.0; 30];
        assert_eq!(rsi(&constant, 14), Some(50.0));
    }

    #[test]
    fn atr_of_constant_range_bars() {
        let bars: Vec<Bar> = (0..20).map(|i| bar(i, 100.0, 102.0, 98.0, 100.0)).collect();
        let value = atr(&bars, 14).unwrap();
        assert!((value - 4.0).abs() < 1e-9);
    }

    #[test]
    fn trend_strength_is_zero_for_flat_series() {
        let bars: Vec<Bar> = (0..20).map(|i| flat_bar(i, 100.0)).collect();
        assert_eq!(trend_strength(&bars, 14), Some(0.0));
    }

    #[test]
    fn trend_strength_high_for_one_directional_series() {
        let bars: Vec<Bar> = (0..20)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                bar(i as i64, base, base + 1.0, base - 1.0, base + 0.5)
            })
            .collect();
        let value = trend_strength(&bars, 14).unwrap();
        assert!(value > 50.0, "one-way market should read as trending: {}", value);
    }

    #[test]
    fn bollinger_bands_are_symmetric_around_middle() {
        let closes: Vec<f64> = (0..25)
            .map(|i| 100.0 + if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        let (upper, middle, lower) = bollinger_bands(&closes, 20, 2.0).unwrap();
        assert!((upper - middle - (middle - lower)).abs() < 1e-9);
        assert!(upper > middle && middle > lower);
    }
}
