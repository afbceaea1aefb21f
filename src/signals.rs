use crate::config::StrategyConfig;
use crate::models::{DailyRiskState, IndicatorSet};
use chrono::NaiveTime;

/// Inputs for one entry-eligibility check. Everything is a snapshot taken
/// at decision time; evaluation never mutates state.
pub struct EntryContext<'a> {
    pub config: &'a StrategyConfig,
    pub indicators: Option<&'a IndicatorSet>,
    pub current_price: f64,
    pub time_of_day: NaiveTime,
    pub has_position: bool,
    pub risk_state: DailyRiskState,
}

/// The range-entry gate. All conditions must hold, evaluated in order with
/// short-circuit semantics; an undefined indicator set forces `false`.
///
/// 1. no existing position
/// 2. trend strength at or below the range threshold
/// 3. price at or below the lower volatility band
/// 4. momentum at or below the oversold level
/// 5. time of day within the trading session (inclusive)
/// 6. daily trade count below the limit
/// 7. daily pnl above the loss limit
pub fn can_enter(ctx: &EntryContext) -> bool {
    if ctx.has_position {
        return false;
    }

    let Some(indicators) = ctx.indicators else {
        return false;
    };

    if indicators.trend_strength > ctx.config.trend_threshold {
        return false;
    }
    if ctx.current_price > indicators.band_lower {
        return false;
    }
    if indicators.momentum > ctx.config.momentum_oversold_level {
        return false;
    }
    if ctx.time_of_day < ctx.config.session_start_time
        || ctx.time_of_day > ctx.config.session_end_time
    {
        return false;
    }
    if ctx.risk_state.trades_today >= ctx.config.max_trades_per_day {
        return false;
    }
    // Literal threshold in pnl units, matching how daily pnl is tracked.
    if ctx.risk_state.daily_pnl <= -ctx.config.daily_loss_limit_pct {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_bound_indicators() -> IndicatorSet {
        IndicatorSet {
            trend_strength: 15.0,
            band_upper: 54.0,
            band_middle: 52.0,
            band_lower: 50.0,
            momentum: 25.0,
            volatility: 2.0,
        }
    }

    fn eligible_context<'a>(
        config: &'a StrategyConfig,
        indicators: &'a IndicatorSet,
    ) -> EntryContext<'a> {
        EntryContext {
            config,
            indicators: Some(indicators),
            current_price: 49.0,
            time_of_day: NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
            has_position: false,
            risk_state: DailyRiskState::default(),
        }
    }

    #[test]
    fn all_conditions_met_allows_entry() {
        let config = StrategyConfig::default();
        let indicators = range_bound_indicators();
        assert!(can_enter(&eligible_context(&config, &indicators)));
    }

    #[test]
    fn existing_position_blocks_entry_for_any_inputs() {
        let config = StrategyConfig::default();
        let indicators = range_bound_indicators();
        let mut ctx = eligible_context(&config, &indicators);
        ctx.has_position = true;
        assert!(!can_enter(&ctx));

        // Even with no indicators at all.
        ctx.indicators = None;
        assert!(!can_enter(&ctx));
    }

    #[test]
    fn undefined_indicators_force_false() {
        let config = StrategyConfig::default();
        let indicators = range_bound_indicators();
        let mut ctx = eligible_context(&config, &indicators);
        ctx.indicators = None;
        assert!(!can_enter(&ctx));
    }

    #[test]
    fn trending_market_blocks_entry() {
        let config = StrategyConfig::default();
        let mut indicators = range_bound_indicators();
        indicators.trend_strength = 35.0;
        assert!(!can_enter(&eligible_context(&config, &indicators)));
    }

    #[test]
    fn price_above_lower_band_blocks_entry() {
        let config = StrategyConfig::default();
        let indicators = range_bound_indicators();
        let mut ctx = eligible_context(&config, &indicators);
        ctx.current_price = 50.5;
        assert!(!can_enter(&ctx));

        // Exactly at the band is still eligible.
        ctx.current_price = 50.0;
        assert!(can_enter(&ctx));
    }

    #[test]
    fn momentum_above_oversold_blocks_entry() {
        let config = StrategyConfig::default();
        let mut indicators = range_bound_indicators();
        indicators.momentum = 45.0;
        assert!(!can_enter(&eligible_context(&config, &indicators)));
    }

    #[test]
    fn session_window_is_inclusive() {
        let config = StrategyConfig::default();
        let indicators = range_bound_indicators();
        let mut ctx = eligible_context(&config, &indicators);

        ctx.time_of_day = config.session_start_time;
        assert!(can_enter(&ctx));
        ctx.time_of_day = config.session_end_time;
        assert!(can_enter(&ctx));

        ctx.time_of_day = NaiveTime::from_hms_opt(9, 34, 59).unwrap();
        assert!(!can_enter(&ctx));
        ctx.time_of_day = NaiveTime::from_hms_opt(15, 55, 1).unwrap();
        assert!(!can_enter(&ctx));
    }

    #[test]
    fn trade_count_limit_blocks_entry_until_reset() {
        let config = StrategyConfig::default();
        let indicators = range_bound_indicators();
        let mut ctx = eligible_context(&config, &indicators);
        ctx.risk_state.trades_today = config.max_trades_per_day;
        assert!(!can_enter(&ctx));

        ctx.risk_state.trades_today = 0;
        assert!(can_enter(&ctx));
    }

    #[test]
    fn daily_loss_limit_blocks_entry() {
        let config = StrategyConfig::default();
        let indicators = range_bound_indicators();
        let mut ctx = eligible_context(&config, &indicators);
        ctx.risk_state.daily_pnl = -config.daily_loss_limit_pct;
        assert!(!can_enter(&ctx));

        ctx.risk_state.daily_pnl = -config.daily_loss_limit_pct + 1e-9;
        assert!(can_enter(&ctx));
    }
}
