pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod indicators;
pub mod models;
pub mod position;
pub mod risk;
pub mod runner;
pub mod signals;

pub use config::StrategyConfig;
pub use engine::StrategyEngine;
pub use error::EngineError;
pub use models::{Bar, CycleOutcome, ExitReason, Position, Side, TradeRecord};
pub use runner::StrategyRunner;
