//! The Bot Controller: wires every leaf crate (wal, oms, account, risk,
//! execution, reconcile, gate, universe, regime, evolution, integrator) and
//! an [`pfcore_exchange::ExchangeAdapter`] into one cooperative, single
//! account trading loop.
//!
//! This crate owns orchestration only. Every piece of domain logic — fee
//! math, risk clamping, reconcile streaks, gate windows — lives in its own
//! leaf crate and is exercised there; what's tested here is sequencing and
//! wiring.

mod config;
mod controller;
mod strategy;

pub use config::{live_config, LeafConfigs};
pub use controller::{BotController, ControllerOutcome, ExitReason};
pub use strategy::{FlatStrategy, Strategy};
