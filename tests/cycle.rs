use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rangecraft::engine::StrategyEngine;
use rangecraft::gateway::{OrderGateway, ReplayClock, ReplayFeed, SimulatedGateway};
use rangecraft::models::CycleOutcome;
use rangecraft::runner::StrategyRunner;
use rangecraft::{Bar, ExitReason, StrategyConfig};
use tokio::sync::watch;
use tokio::time::Duration;

fn bar(start: DateTime<Utc>, offset_minutes: i64, close: f64) -> Bar {
    Bar {
        timestamp: start + ChronoDuration::minutes(offset_minutes),
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 10_000.0,
    }
}

/// Thresholds opened wide so the lower-band touch alone decides entries;
/// per-condition gating is covered by the unit tests.
fn permissive_config() -> StrategyConfig {
    let mut config = StrategyConfig::default();
    config.trend_threshold = 100.0;
    config.momentum_oversold_level = 95.0;
    config.momentum_overbought_level = 99.0;
    config.band_width_multiplier = 1.0;
    config
}

#[tokio::test]
async fn replay_runs_a_full_round_trip_and_ends_flat() {
    // 14:30 UTC keeps the replayed session inside the default window.
    let start = "2025-03-03T14:30:00Z".parse::<DateTime<Utc>>().unwrap();
    let mut bars: Vec<Bar> = (0..25)
        .map(|i| bar(start, i, 100.0 + 0.1 * (i % 3) as f64))
        .collect();
    // Sell-off into the band, then a rally through any plausible target.
    for i in 0..6 {
        bars.push(bar(start, 25 + i, 99.0 - i as f64));
    }
    for i in 0..12 {
        bars.push(bar(start, 31 + i, 95.0 + 2.0 * i as f64));
    }

    let clock = ReplayClock::new(start);
    let feed = ReplayFeed::new(bars).with_clock(clock.clone());
    let gateway = SimulatedGateway::new(100_000.0);
    let engine = StrategyEngine::new("AAPL", permissive_config());
    let (_tx, shutdown) = watch::channel(false);

    let runner = StrategyRunner::new(engine, feed, gateway.clone(), clock, Duration::ZERO, shutdown);
    let engine = runner.run().await.unwrap();

    assert!(!engine.trade_log().is_empty(), "replay should close a trade");
    let trade = engine.trade_log().first().unwrap();
    assert_eq!(trade.symbol, "AAPL");
    assert!(trade.quantity > 0);
    assert!(trade.duration_secs > 0);

    // Clean end state: no position, no in-flight order, no resting legs.
    assert!(engine.position().is_none());
    assert!(!engine.has_pending_order());
    assert_eq!(gateway.open_order_count(), 0);
}

/// Advance the replay clock to the bar, mark the gateway, run one cycle.
async fn run_bar(
    engine: &mut StrategyEngine,
    gateway: &SimulatedGateway,
    clock: &ReplayClock,
    bar: Bar,
) -> CycleOutcome {
    clock.advance_to(bar.timestamp);
    gateway.observe_bar(&bar).await.unwrap();
    engine.evaluate_cycle(gateway, clock, bar).await.unwrap()
}

#[tokio::test]
async fn losing_day_blocks_entries_until_the_next_session_day() {
    let day_one = "2025-03-03T14:30:00Z".parse::<DateTime<Utc>>().unwrap();
    let day_two = "2025-03-04T14:30:00Z".parse::<DateTime<Utc>>().unwrap();

    let clock = ReplayClock::new(day_one);
    let gateway = SimulatedGateway::new(100_000.0);
    let mut engine = StrategyEngine::new("AAPL", permissive_config());

    // Rising warm-up bars fill the window without triggering an entry,
    // then the series slides into one.
    for i in 0..25 {
        run_bar(&mut engine, &gateway, &clock, bar(day_one, i, 100.0 + 0.1 * i as f64)).await;
    }
    let mut price = 102.5;
    let mut offset = 25;
    loop {
        price -= 1.0;
        let outcome = run_bar(&mut engine, &gateway, &clock, bar(day_one, offset, price)).await;
        offset += 1;
        if matches!(outcome, CycleOutcome::EntryRequested { .. }) {
            break;
        }
        assert!(offset < 60, "entry never triggered");
    }
    let outcome = run_bar(&mut engine, &gateway, &clock, bar(day_one, offset, price)).await;
    assert_eq!(outcome, CycleOutcome::EntryFilled);
    offset += 1;

    // Crash through the stop and confirm the losing exit.
    let stop_price = engine.position().unwrap().stop_price;
    let crash = stop_price - 3.0;
    let outcome = run_bar(&mut engine, &gateway, &clock, bar(day_one, offset, crash)).await;
    assert_eq!(outcome, CycleOutcome::ExitRequested(ExitReason::Stop));
    let outcome = run_bar(&mut engine, &gateway, &clock, bar(day_one, offset + 1, crash)).await;
    assert!(matches!(outcome, CycleOutcome::ExitFilled(_)));
    offset += 2;

    let state = engine.risk_state();
    assert_eq!(state.trades_today, 1);
    assert!(state.daily_pnl < 0.0);

    // The realized loss sits far below the loss limit: no more entries
    // today, even on fresh sell-offs.
    let mut day_one_price = crash;
    for i in 0..4 {
        day_one_price -= 1.0;
        let outcome = run_bar(
            &mut engine,
            &gateway,
            &clock,
            bar(day_one, offset + i, day_one_price),
        )
        .await;
        assert_eq!(outcome, CycleOutcome::NoAction);
    }

    // Next session day: counters reset and the same setup is tradable again.
    let outcome = run_bar(
        &mut engine,
        &gateway,
        &clock,
        bar(day_two, 0, day_one_price - 1.0),
    )
    .await;
    let state = engine.risk_state();
    assert_eq!(state.trades_today, 0);
    assert!(matches!(
        outcome,
        CycleOutcome::EntryRequested { .. } | CycleOutcome::NoAction
    ));
    assert_eq!(state.daily_pnl, 0.0);
}
