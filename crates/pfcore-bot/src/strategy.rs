//! The strategy seam: the bot core drives a pluggable `Strategy` and treats
//! its output as an opaque suggested position. No concrete alpha model ships
//! here — only the trait and a flat stub used for warmup and tests.

use pfcore_schemas::{Direction, MarketEvent, RegimeState, Signal};

/// Produces a [`Signal`] from one market observation and its classified
/// regime. Implementations own whatever history they need; the controller
/// calls `on_market` exactly once per polled tick for the event's symbol.
pub trait Strategy: Send {
    fn on_market(&mut self, event: &MarketEvent, regime: &RegimeState) -> Signal;
}

/// Always reports flat. Used before a real strategy is wired in, and during
/// warmup by strategies that choose to delegate to it: an empty signal is
/// "no trade", never an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatStrategy;

impl Strategy for FlatStrategy {
    fn on_market(&mut self, event: &MarketEvent, _regime: &RegimeState) -> Signal {
        Signal {
            symbol: event.symbol.clone(),
            suggested_notional_usd: 0.0,
            direction: Direction::Flat,
            trend_notional_usd: 0.0,
            defensive_notional_usd: 0.0,
        }
    }
}
