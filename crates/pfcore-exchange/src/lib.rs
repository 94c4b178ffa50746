//! Exchange adapter: the sole wire boundary between the bot core and a
//! venue. `ExchangeAdapter` is a capability trait; `Mock`/`Replay` back
//! tests and dry runs, `LiveStreaming` talks to a real venue over REST +
//! WebSocket with REST-fallback degrade/recover channels.

mod live;
mod mock;
mod quantize;
mod replay;

pub use live::{ChannelMode, ChannelState, LiveConfig, LiveStreaming};
pub use mock::MockAdapter;
pub use quantize::{quantize_submit, QuantizeError, QuantizedOrder};
pub use replay::ReplayAdapter;

use std::collections::{BTreeMap, BTreeSet};

use pfcore_schemas::{FillEvent, MarketEvent, OrderIntent, RemoteAccountBalance, RemotePositionSnapshot, SymbolInfo};

/// Exchange-reported account configuration, checked against the operator's
/// expectations at connect time.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub account_mode: String,
    pub margin_mode: String,
    pub position_mode: String,
}

/// Capability surface every venue integration (or test double) must
/// implement. Submit/cancel run from the executor's worker thread; polling
/// and the `get_*` queries run from the main loop — implementations make
/// any mutable adapter-local state internally thread-safe.
pub trait ExchangeAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn connect(&self) -> anyhow::Result<()>;

    /// Non-blocking: `None` means "no new market event this call".
    fn poll_market(&self) -> Option<MarketEvent>;

    fn submit(&self, intent: &OrderIntent) -> bool;

    fn cancel(&self, client_order_id: &str) -> bool;

    /// Non-blocking: `None` means "no new fill this call".
    fn poll_fill(&self) -> Option<FillEvent>;

    fn get_remote_notional_usd(&self) -> Option<f64>;

    fn get_remote_positions(&self) -> Option<BTreeMap<String, RemotePositionSnapshot>>;

    fn get_remote_account_balance(&self) -> Option<RemoteAccountBalance>;

    fn get_remote_open_order_client_ids(&self) -> Option<BTreeSet<String>>;

    fn get_account_snapshot(&self) -> Option<AccountSnapshot>;

    fn get_symbol_info(&self, symbol: &str) -> Option<SymbolInfo>;

    fn trade_ok(&self) -> bool;
}
