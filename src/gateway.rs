use crate::error::EngineError;
use crate::models::{Bar, OrderAck, OrderStatus, Side};
use chrono::{DateTime, Local, NaiveDate, NaiveTime, Utc};
use log::info;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Source of bars for one instrument. Timestamps must be monotonically
/// increasing; `None` means the feed is exhausted.
pub trait BarFeed {
    fn next_bar(&mut self) -> impl std::future::Future<Output = Result<Option<Bar>, EngineError>> + Send;
}

/// Broker-facing order operations plus the account equity query. The engine
/// never retries these calls; retry and backoff policy live behind this
/// trait.
pub trait OrderGateway {
    fn submit_market(
        &self,
        side: Side,
        quantity: i64,
    ) -> impl std::future::Future<Output = Result<OrderAck, EngineError>> + Send;
    fn submit_stop(
        &self,
        side: Side,
        quantity: i64,
        stop_price: f64,
    ) -> impl std::future::Future<Output = Result<OrderAck, EngineError>> + Send;
    fn submit_limit(
        &self,
        side: Side,
        quantity: i64,
        limit_price: f64,
    ) -> impl std::future::Future<Output = Result<OrderAck, EngineError>> + Send;
    fn order_status(
        &self,
        order_id: &str,
    ) -> impl std::future::Future<Output = Result<OrderStatus, EngineError>> + Send;
    fn cancel_order(
        &self,
        order_id: &str,
    ) -> impl std::future::Future<Output = Result<(), EngineError>> + Send;
    fn account_equity(
        &self,
    ) -> impl std::future::Future<Output = Result<f64, EngineError>> + Send;
    /// Mark-to-market hook; called once per bar before the cycle runs.
    /// Brokers ignore it, the simulated gateway prices fills from it.
    fn observe_bar(
        &self,
        bar: &Bar,
    ) -> impl std::future::Future<Output = Result<(), EngineError>> + Send;
}

/// Wall-clock dependency for session-window checks and session-day
/// boundary detection.
pub trait SessionClock {
    fn now_time_of_day(&self) -> NaiveTime;
    fn today(&self) -> NaiveDate;
}

/// Local wall clock, used for live trading.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SessionClock for SystemClock {
    fn now_time_of_day(&self) -> NaiveTime {
        Local::now().time()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock driven by replayed bar timestamps instead of the wall clock, so
/// paper runs behave the same at any hour.
#[derive(Clone)]
pub struct ReplayClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ReplayClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance_to(&self, instant: DateTime<Utc>) {
        let mut current = self.current.lock().unwrap();
        *current = instant;
    }
}

impl SessionClock for ReplayClock {
    fn now_time_of_day(&self) -> NaiveTime {
        self.current.lock().unwrap().time()
    }

    fn today(&self) -> NaiveDate {
        self.current.lock().unwrap().date_naive()
    }
}

/// Bar feed over a pre-loaded series, optionally advancing a `ReplayClock`
/// as bars are consumed.
pub struct ReplayFeed {
    bars: VecDeque<Bar>,
    clock: Option<ReplayClock>,
}

impl ReplayFeed {
    pub fn new(bars: Vec<Bar>) -> Self {
        Self {
            bars: bars.into(),
            clock: None,
        }
    }

    /// Load a JSON array of bars from disk.
    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let raw = fs::read_to_string(path).map_err(|err| {
            EngineError::Config(format!("cannot read bar file {}: {}", path.display(), err))
        })?;
        let bars: Vec<Bar> = serde_json::from_str(&raw).map_err(|err| {
            EngineError::Config(format!("cannot parse bar file {}: {}", path.display(), err))
        })?;
        info!("Loaded {} bars from {}", bars.len(), path.display());
        Ok(Self::new(bars))
    }

    pub fn with_clock(mut self, clock: ReplayClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.front().map(|bar| bar.timestamp)
    }
}

impl BarFeed for ReplayFeed {
    async fn next_bar(&mut self) -> Result<Option<Bar>, EngineError> {
        let bar = self.bars.pop_front();
        if let (Some(bar), Some(clock)) = (&bar, &self.clock) {
            clock.advance_to(bar.timestamp);
        }
        Ok(bar)
    }
}

#[derive(Debug, Clone)]
struct SimOrder {
    status: OrderStatus,
}

#[derive(Debug)]
struct SimState {
    equity: f64,
    mark_price: f64,
    mark_time: DateTime<Utc>,
    orders: HashMap<String, SimOrder>,
    reject_next: Option<String>,
    fill_price_override: Option<f64>,
}

/// In-process gateway for paper runs and tests. Market orders fill
/// immediately at the last observed bar close; stop and limit legs rest
/// until cancelled.
#[derive(Clone)]
pub struct SimulatedGateway {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedGateway {
    pub fn new(equity: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                equity,
                mark_price: 0.0,
                mark_time: Utc::now(),
                orders: HashMap::new(),
                reject_next: None,
                fill_price_override: None,
            })),
        }
    }

    /// Make the next submission fail, for rejection-path tests.
    pub fn reject_next_order(&self, reason: &str) {
        self.state.lock().unwrap().reject_next = Some(reason.to_string());
    }

    /// Fill the next market order at this price instead of the mark price,
    /// emulating slippage between decision and fill.
    pub fn override_next_fill_price(&self, price: f64) {
        self.state.lock().unwrap().fill_price_override = Some(price);
    }

    pub fn set_equity(&self, equity: f64) {
        self.state.lock().unwrap().equity = equity;
    }

    pub fn open_order_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .orders
            .values()
            .filter(|order| order.status == OrderStatus::Pending)
            .count()
    }

    fn submit(&self, status: OrderStatus) -> Result<OrderAck, EngineError> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = state.reject_next.take() {
            return Err(EngineError::GatewayRejected {
                side: "order",
                reason,
            });
        }
        let order_id = Uuid::new_v4().to_string();
        state.orders.insert(order_id.clone(), SimOrder { status });
        Ok(OrderAck { order_id })
    }
}

impl OrderGateway for SimulatedGateway {
    async fn submit_market(&self, _side: Side, _quantity: i64) -> Result<OrderAck, EngineError> {
        let (price, filled_at) = {
            let mut state = self.state.lock().unwrap();
            let price = state.fill_price_override.take().unwrap_or(state.mark_price);
            (price, state.mark_time)
        };
        self.submit(OrderStatus::Filled { price, filled_at })
    }

    async fn submit_stop(
        &self,
        _side: Side,
        _quantity: i64,
        _stop_price: f64,
    ) -> Result<OrderAck, EngineError> {
        self.submit(OrderStatus::Pending)
    }

    async fn submit_limit(
        &self,
        _side: Side,
        _quantity: i64,
        _limit_price: f64,
    ) -> Result<OrderAck, EngineError> {
        self.submit(OrderStatus::Pending)
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderStatus, EngineError> {
        let state = self.state.lock().unwrap();
        state
            .orders
            .get(order_id)
            .map(|order| order.status.clone())
            .ok_or_else(|| EngineError::BrokerResponse(format!("unknown order {}", order_id)))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        match state.orders.get_mut(order_id) {
            Some(order) => {
                if order.status == OrderStatus::Pending {
                    order.status = OrderStatus::Rejected {
                        reason: "cancelled".to_string(),
                    };
                }
                Ok(())
            }
            None => Err(EngineError::BrokerResponse(format!(
                "unknown order {}",
                order_id
            ))),
        }
    }

    async fn account_equity(&self) -> Result<f64, EngineError> {
        Ok(self.state.lock().unwrap().equity)
    }

    async fn observe_bar(&self, bar: &Bar) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.mark_price = bar.close;
        state.mark_time = bar.timestamp;
        Ok(())
    }
}
