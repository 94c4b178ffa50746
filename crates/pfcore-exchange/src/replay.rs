//! Deterministic price-series replay adapter: feeds a fixed sequence of
//! `(ts_ms, price)` pairs for one symbol, one per `poll_market` call.
//! Submit/cancel always succeed; fills are never synthesized here — a test
//! that needs them pushes `FillEvent`s through a `MockAdapter` instead, or
//! drives fills manually in the scenario body (per the literal scenarios,
//! which "feed" fills explicitly).

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;

use pfcore_schemas::{FillEvent, MarketEvent, OrderIntent, RemoteAccountBalance, RemotePositionSnapshot, SymbolInfo};

use crate::{AccountSnapshot, ExchangeAdapter};

struct ReplayInner {
    symbol: String,
    queue: VecDeque<(i64, f64)>,
    submitted: Vec<OrderIntent>,
    cancelled: Vec<String>,
    open_order_client_ids: BTreeSet<String>,
}

pub struct ReplayAdapter {
    inner: Mutex<ReplayInner>,
}

impl ReplayAdapter {
    /// `prices` is consumed in order; `ts_ms` for each tick is `(index+1) *
    /// tick_interval_ms` unless the caller supplies explicit timestamps via
    /// [`ReplayAdapter::with_timestamps`].
    pub fn new(symbol: impl Into<String>, prices: Vec<f64>, tick_interval_ms: i64) -> Self {
        let queue = prices
            .into_iter()
            .enumerate()
            .map(|(i, px)| ((i as i64 + 1) * tick_interval_ms, px))
            .collect();
        Self {
            inner: Mutex::new(ReplayInner {
                symbol: symbol.into(),
                queue,
                submitted: Vec::new(),
                cancelled: Vec::new(),
                open_order_client_ids: BTreeSet::new(),
            }),
        }
    }

    pub fn with_timestamps(symbol: impl Into<String>, ticks: Vec<(i64, f64)>) -> Self {
        Self {
            inner: Mutex::new(ReplayInner {
                symbol: symbol.into(),
                queue: ticks.into_iter().collect(),
                submitted: Vec::new(),
                cancelled: Vec::new(),
                open_order_client_ids: BTreeSet::new(),
            }),
        }
    }

    pub fn submitted(&self) -> Vec<OrderIntent> {
        self.inner.lock().unwrap().submitted.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.inner.lock().unwrap().cancelled.clone()
    }
}

impl ExchangeAdapter for ReplayAdapter {
    fn name(&self) -> &str {
        "replay"
    }

    fn connect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn poll_market(&self) -> Option<MarketEvent> {
        let mut inner = self.inner.lock().unwrap();
        let symbol = inner.symbol.clone();
        inner.queue.pop_front().map(|(ts_ms, price)| MarketEvent {
            ts_ms,
            symbol,
            last_price: price,
            mark_price: price,
            volume: None,
            interval_ms: None,
        })
    }

    fn submit(&self, intent: &OrderIntent) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.submitted.push(intent.clone());
        inner.open_order_client_ids.insert(intent.client_order_id.clone());
        true
    }

    fn cancel(&self, client_order_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.cancelled.push(client_order_id.to_string());
        inner.open_order_client_ids.remove(client_order_id);
        true
    }

    fn poll_fill(&self) -> Option<FillEvent> {
        None
    }

    fn get_remote_notional_usd(&self) -> Option<f64> {
        None
    }

    fn get_remote_positions(&self) -> Option<BTreeMap<String, RemotePositionSnapshot>> {
        None
    }

    fn get_remote_account_balance(&self) -> Option<RemoteAccountBalance> {
        None
    }

    fn get_remote_open_order_client_ids(&self) -> Option<BTreeSet<String>> {
        Some(self.inner.lock().unwrap().open_order_client_ids.clone())
    }

    fn get_account_snapshot(&self) -> Option<AccountSnapshot> {
        None
    }

    fn get_symbol_info(&self, _symbol: &str) -> Option<SymbolInfo> {
        None
    }

    fn trade_ok(&self) -> bool {
        true
    }
}
