use crate::config::StrategyConfig;
use crate::error::EngineError;
use crate::gateway::{OrderGateway, SessionClock};
use crate::indicators::IndicatorEngine;
use crate::models::{
    Bar, CycleOutcome, DailyRiskState, IndicatorSet, Position, Side, TradeRecord,
};
use crate::position::{PendingEntry, PositionState, PositionStateMachine};
use crate::risk::RiskManager;
use crate::signals::{can_enter, EntryContext};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::time::{sleep, Duration};

const SETTLE_ATTEMPTS: usize = 5;
const SETTLE_POLL_DELAY: Duration = Duration::from_millis(250);

/// Single owner of all mutable strategy state: the indicator window, the
/// daily risk counters and the position slot. One cycle per bar; nothing
/// observes or mutates state mid-cycle.
pub struct StrategyEngine {
    symbol: String,
    config: StrategyConfig,
    indicators: IndicatorEngine,
    risk: RiskManager,
    machine: PositionStateMachine,
    last_indicators: Option<IndicatorSet>,
    trade_log: Vec<TradeRecord>,
}

impl StrategyEngine {
    pub fn new(symbol: &str, config: StrategyConfig) -> Self {
        let indicators = IndicatorEngine::new(&config);
        Self {
            symbol: symbol.to_string(),
            config,
            indicators,
            risk: RiskManager::new(),
            machine: PositionStateMachine::new(),
            last_indicators: None,
            trade_log: Vec::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Read-only snapshot of the live position, if any.
    pub fn position(&self) -> Option<&Position> {
        self.machine.position()
    }

    pub fn risk_state(&self) -> DailyRiskState {
        self.risk.snapshot()
    }

    pub fn last_indicators(&self) -> Option<&IndicatorSet> {
        self.last_indicators.as_ref()
    }

    pub fn last_trade(&self) -> Option<&TradeRecord> {
        self.trade_log.last()
    }

    pub fn trade_log(&self) -> &[TradeRecord] {
        &self.trade_log
    }

    pub fn has_pending_order(&self) -> bool {
        self.machine.pending_order_id().is_some()
    }

    /// Run one full cycle for a bar: roll the session day, update
    /// indicators, settle any in-flight order, then either manage the open
    /// position or evaluate a new entry. Transitions for this bar complete
    /// before the next bar is processed.
    pub async fn evaluate_cycle<G, C>(
        &mut self,
        gateway: &G,
        clock: &C,
        bar: Bar,
    ) -> Result<CycleOutcome, EngineError>
    where
        G: OrderGateway,
        C: SessionClock,
    {
        self.risk.roll_day(clock.today());

        let indicators = self.indicators.update(bar)?;
        self.last_indicators = indicators;
        let current_price = bar.close;

        match self.machine.state() {
            PositionState::EntryPending(pending) => {
                let order_id = pending.order_id.clone();
                match gateway.order_status(&order_id).await? {
                    crate::models::OrderStatus::Filled { price, filled_at } => {
                        self.finish_entry_fill(gateway, price, filled_at).await;
                        Ok(CycleOutcome::EntryFilled)
                    }
                    crate::models::OrderStatus::Rejected { reason } => {
                        self.machine.abort_entry();
                        Err(EngineError::GatewayRejected {
                            side: "entry",
                            reason,
                        })
                    }
                    crate::models::OrderStatus::Pending => Ok(CycleOutcome::NoAction),
                }
            }
            PositionState::ExitPending(pending) => {
                let order_id = pending.order_id.clone();
                match gateway.order_status(&order_id).await? {
                    crate::models::OrderStatus::Filled { price, filled_at } => {
                        let record = self.finish_exit_fill(gateway, price, filled_at).await;
                        match record {
                            Some(record) => Ok(CycleOutcome::ExitFilled(record)),
                            None => Ok(CycleOutcome::NoAction),
                        }
                    }
                    crate::models::OrderStatus::Rejected { reason } => {
                        self.machine.abort_exit();
                        Err(EngineError::GatewayRejected {
                            side: "exit",
                            reason,
                        })
                    }
                    crate::models::OrderStatus::Pending => Ok(CycleOutcome::NoAction),
                }
            }
            PositionState::Open(_) => self.manage_open_position(gateway, current_price).await,
            PositionState::Flat => {
                self.evaluate_entry(gateway, clock, current_price).await
            }
        }
    }

    async fn manage_open_position<G: OrderGateway>(
        &mut self,
        gateway: &G,
        current_price: f64,
    ) -> Result<CycleOutcome, EngineError> {
        let Some(reason) = self.machine.check_exit(current_price) else {
            return Ok(CycleOutcome::NoAction);
        };
        let quantity = self
            .machine
            .position()
            .map(|position| position.quantity)
            .unwrap_or(0);
        let ack = gateway.submit_market(Side::Sell, quantity).await?;
        info!(
            "{}: exit ({}) requested at {} for {} shares, order {}",
            self.symbol,
            reason.as_str(),
            current_price,
            quantity,
            ack.order_id
        );
        self.machine.request_exit(ack.order_id, reason);
        Ok(CycleOutcome::ExitRequested(reason))
    }

    async fn evaluate_entry<G, C>(
        &mut self,
        gateway: &G,
        clock: &C,
        current_price: f64,
    ) -> Result<CycleOutcome, EngineError>
    where
        G: OrderGateway,
        C: SessionClock,
    {
        let context = EntryContext {
            config: &self.config,
            indicators: self.last_indicators.as_ref(),
            current_price,
            time_of_day: clock.now_time_of_day(),
            has_position: self.machine.has_position(),
            risk_state: self.risk.snapshot(),
        };
        if !can_enter(&context) {
            return Ok(CycleOutcome::NoAction);
        }

        // can_enter only passes with a defined indicator set.
        let volatility = match self.last_indicators.as_ref() {
            Some(indicators) => indicators.volatility,
            None => return Ok(CycleOutcome::NoAction),
        };

        let equity = gateway.account_equity().await?;
        let quantity = self.risk.size_position(equity, volatility, &self.config)?;
        if quantity <= 0 {
            debug!(
                "{}: entry signal with non-positive size (equity {}, volatility {})",
                self.symbol, equity, volatility
            );
            return Ok(CycleOutcome::NoAction);
        }

        let stop_price =
            current_price - volatility * self.config.stop_loss_volatility_multiplier;
        let target_price = current_price * (1.0 + self.config.profit_target_pct);

        let ack = gateway.submit_market(Side::Buy, quantity).await?;
        info!(
            "{}: entry requested at {} for {} shares (stop {:.4}, target {:.4}), order {}",
            self.symbol, current_price, quantity, stop_price, target_price, ack.order_id
        );
        self.machine.request_entry(PendingEntry {
            order_id: ack.order_id,
            quantity,
            requested_price: current_price,
            stop_price,
            target_price,
            submitted_at: Utc::now(),
        });
        Ok(CycleOutcome::EntryRequested {
            quantity,
            stop_price,
            target_price,
        })
    }

    async fn finish_entry_fill<G: OrderGateway>(
        &mut self,
        gateway: &G,
        fill_price: f64,
        filled_at: DateTime<Utc>,
    ) {
        let quantity = self.machine.confirm_entry_fill(fill_price, filled_at);
        self.risk.record_entry();
        info!(
            "{}: entry filled at {} for {} shares ({} trades today)",
            self.symbol,
            fill_price,
            quantity,
            self.risk.snapshot().trades_today
        );

        // Best-effort protective legs at the broker. The engine keeps
        // monitoring stop and target itself each cycle.
        let (stop_price, target_price) = match self.machine.position() {
            Some(position) => (position.stop_price, position.target_price),
            None => return,
        };
        let stop_order_id = match gateway.submit_stop(Side::Sell, quantity, stop_price).await {
            Ok(ack) => Some(ack.order_id),
            Err(err) => {
                warn!("{}: protective stop not armed: {}", self.symbol, err);
                None
            }
        };
        let target_order_id = match gateway
            .submit_limit(Side::Sell, quantity, target_price)
            .await
        {
            Ok(ack) => Some(ack.order_id),
            Err(err) => {
                warn!("{}: profit target not armed: {}", self.symbol, err);
                None
            }
        };
        self.machine.arm_brackets(stop_order_id, target_order_id);
    }

    async fn finish_exit_fill<G: OrderGateway>(
        &mut self,
        gateway: &G,
        fill_price: f64,
        filled_at: DateTime<Utc>,
    ) -> Option<TradeRecord> {
        self.cancel_resting_legs(gateway).await;
        let record = self
            .machine
            .confirm_exit_fill(&self.symbol, fill_price, filled_at)?;
        self.risk.record_close(record.realized_pnl);
        info!(
            "{}: trade closed ({}): entry {} exit {} qty {} pnl {:.2} after {}s",
            record.symbol,
            record.exit_reason.as_str(),
            record.entry_price,
            record.exit_price,
            record.quantity,
            record.realized_pnl,
            record.duration_secs
        );
        self.trade_log.push(record.clone());
        Some(record)
    }

    async fn cancel_resting_legs<G: OrderGateway>(&mut self, gateway: &G) {
        let legs = match self.machine.position() {
            Some(position) => [
                position.stop_order_id.clone(),
                position.target_order_id.clone(),
            ],
            None => return,
        };
        for order_id in legs.into_iter().flatten() {
            if let Err(err) = gateway.cancel_order(&order_id).await {
                warn!("{}: failed to cancel resting leg {}: {}", self.symbol, order_id, err);
            }
        }
    }

    /// Resolve any in-flight order before shutdown so the machine never
    /// stops in EntryPending or ExitPending. Polls a few times, then
    /// cancels and reverts.
    pub async fn settle_pending<G: OrderGateway>(
        &mut self,
        gateway: &G,
    ) -> Result<(), EngineError> {
        for attempt in 0..SETTLE_ATTEMPTS {
            let Some(order_id) = self.machine.pending_order_id().map(str::to_string) else {
                return Ok(());
            };
            match gateway.order_status(&order_id).await? {
                crate::models::OrderStatus::Filled { price, filled_at } => {
                    match self.machine.state() {
                        PositionState::EntryPending(_) => {
                            self.finish_entry_fill(gateway, price, filled_at).await;
                        }
                        PositionState::ExitPending(_) => {
                            self.finish_exit_fill(gateway, price, filled_at).await;
                        }
                        _ => {}
                    }
                    return Ok(());
                }
                crate::models::OrderStatus::Rejected { .. } => {
                    self.revert_pending();
                    return Ok(());
                }
                crate::models::OrderStatus::Pending => {
                    if attempt + 1 == SETTLE_ATTEMPTS {
                        warn!(
                            "{}: cancelling unresolved order {} on shutdown",
                            self.symbol, order_id
                        );
                        gateway.cancel_order(&order_id).await?;
                        self.revert_pending();
                        return Ok(());
                    }
                    sleep(SETTLE_POLL_DELAY).await;
                }
            }
        }
        Ok(())
    }

    fn revert_pending(&mut self) {
        match self.machine.state() {
            PositionState::EntryPending(_) => self.machine.abort_entry(),
            PositionState::ExitPending(_) => self.machine.abort_exit(),
            _ => {}
        }
    }
}
