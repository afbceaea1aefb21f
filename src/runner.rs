use crate::engine::StrategyEngine;
use crate::error::EngineError;
use crate::gateway::{BarFeed, OrderGateway, SessionClock};
use crate::models::CycleOutcome;
use log::{error, info, warn};
use tokio::sync::watch;
use tokio::time::Duration;

/// Drives the engine: pull a bar, mark the gateway, run one cycle, sleep,
/// repeat. Stops when the feed is exhausted or shutdown is signalled, and
/// always settles in-flight orders before returning.
pub struct StrategyRunner<F, G, C> {
    engine: StrategyEngine,
    feed: F,
    gateway: G,
    clock: C,
    cycle_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<F, G, C> StrategyRunner<F, G, C>
where
    F: BarFeed,
    G: OrderGateway,
    C: SessionClock,
{
    pub fn new(
        engine: StrategyEngine,
        feed: F,
        gateway: G,
        clock: C,
        cycle_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            feed,
            gateway,
            clock,
            cycle_interval,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<StrategyEngine, EngineError> {
        info!(
            "{}: strategy loop started ({} warm-up bars required)",
            self.engine.symbol(),
            self.engine.config().min_bars()
        );

        loop {
            if *self.shutdown.borrow() {
                info!("{}: shutdown requested", self.engine.symbol());
                break;
            }

            let Some(bar) = self.feed.next_bar().await? else {
                info!("{}: bar feed exhausted", self.engine.symbol());
                break;
            };

            self.gateway.observe_bar(&bar).await?;
            match self
                .engine
                .evaluate_cycle(&self.gateway, &self.clock, bar)
                .await
            {
                Ok(CycleOutcome::NoAction) => {}
                Ok(outcome) => info!("{}: {:?}", self.engine.symbol(), outcome),
                // A bad bar or a rejected order ends the cycle, not the run.
                Err(err @ EngineError::OutOfOrderBar { .. })
                | Err(err @ EngineError::MalformedBar { .. })
                | Err(err @ EngineError::GatewayRejected { .. }) => {
                    warn!("{}: cycle skipped: {}", self.engine.symbol(), err);
                }
                Err(err) => {
                    error!("{}: cycle failed: {}", self.engine.symbol(), err);
                    return Err(err);
                }
            }

            if self.cycle_interval > Duration::ZERO {
                tokio::select! {
                    _ = tokio::time::sleep(self.cycle_interval) => {}
                    _ = self.shutdown.changed() => {}
                }
            }
        }

        self.engine.settle_pending(&self.gateway).await?;
        info!(
            "{}: strategy loop stopped after {} closed trades",
            self.engine.symbol(),
            self.engine.trade_log().len()
        );
        Ok(self.engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;
    use crate::gateway::{ReplayClock, ReplayFeed, SimulatedGateway};
    use crate::models::Bar;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};

    fn session_bar(start: DateTime<Utc>, offset: i64, close: f64) -> Bar {
        Bar {
            timestamp: start + ChronoDuration::minutes(offset),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10_000.0,
        }
    }

    fn permissive_config() -> StrategyConfig {
        let mut config = StrategyConfig::default();
        config.trend_threshold = 100.0;
        config.momentum_oversold_level = 95.0;
        config.momentum_overbought_level = 99.0;
        config.band_width_multiplier = 1.0;
        config
    }

    #[tokio::test]
    async fn runner_stops_on_exhausted_feed_with_no_pending_order() {
        // The replay clock reads session time straight from bar timestamps.
        // Gently rising closes stay above the lower band, so no entry fires.
        let start = "2025-03-03T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let bars: Vec<Bar> = (0..30)
            .map(|i| session_bar(start, i, 100.0 + 0.1 * i as f64))
            .collect();

        let clock = ReplayClock::new(start);
        let feed = ReplayFeed::new(bars).with_clock(clock.clone());
        let gateway = SimulatedGateway::new(100_000.0);
        let engine = StrategyEngine::new("AAPL", permissive_config());
        let (_tx, rx) = watch::channel(false);

        let runner = StrategyRunner::new(
            engine,
            feed,
            gateway,
            clock,
            Duration::ZERO,
            rx,
        );
        let engine = runner.run().await.unwrap();
        assert!(!engine.has_pending_order());
        assert!(engine.position().is_none());
    }

    #[tokio::test]
    async fn shutdown_signal_stops_the_loop() {
        let start = "2025-03-03T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let bars: Vec<Bar> = (0..1000)
            .map(|i| session_bar(start, i, 100.0))
            .collect();

        let clock = ReplayClock::new(start);
        let feed = ReplayFeed::new(bars).with_clock(clock.clone());
        let gateway = SimulatedGateway::new(100_000.0);
        let engine = StrategyEngine::new("AAPL", permissive_config());
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let runner = StrategyRunner::new(
            engine,
            feed,
            gateway,
            clock,
            Duration::ZERO,
            rx,
        );
        let engine = runner.run().await.unwrap();
        // Stopped on the signal, before consuming the whole feed.
        assert!(engine.trade_log().is_empty());
    }

    #[tokio::test]
    async fn full_replay_enters_and_exits_a_trade() {
        let start = "2025-03-03T15:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let mut bars: Vec<Bar> = (0..25)
            .map(|i| session_bar(start, i, 100.0))
            .collect();
        // Sell-off into the lower band, then a rally through the target.
        for i in 0..8 {
            bars.push(session_bar(start, 25 + i, 99.0 - i as f64));
        }
        for i in 0..10 {
            bars.push(session_bar(start, 33 + i, 93.0 + 2.0 * i as f64));
        }

        let clock = ReplayClock::new(start);
        let feed = ReplayFeed::new(bars).with_clock(clock.clone());
        let gateway = SimulatedGateway::new(100_000.0);
        let engine = StrategyEngine::new("AAPL", permissive_config());
        let (_tx, rx) = watch::channel(false);

        let runner = StrategyRunner::new(
            engine,
            feed,
            gateway,
            clock,
            Duration::ZERO,
            rx,
        );
        let engine = runner.run().await.unwrap();
        assert!(!engine.trade_log().is_empty());
        assert!(engine.risk_state().trades_today >= 1);
    }
}
