//! Deterministic adapter for unit/integration tests. No randomness, no
//! network I/O: market events and fills are fed explicitly by the test and
//! popped in FIFO order, mirroring the teacher's deterministic paper-broker
//! convention of canned, explicitly-queued responses rather than simulation.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;

use pfcore_schemas::{FillEvent, MarketEvent, OrderIntent, RemoteAccountBalance, RemotePositionSnapshot, SymbolInfo};

use crate::{AccountSnapshot, ExchangeAdapter};

#[derive(Default)]
struct MockInner {
    market_queue: VecDeque<MarketEvent>,
    fill_queue: VecDeque<FillEvent>,
    submitted: Vec<OrderIntent>,
    cancelled: Vec<String>,
    remote_positions: BTreeMap<String, RemotePositionSnapshot>,
    remote_balance: Option<RemoteAccountBalance>,
    open_order_client_ids: BTreeSet<String>,
    symbol_info: BTreeMap<String, SymbolInfo>,
    account_snapshot: Option<AccountSnapshot>,
    submit_should_fail: bool,
    cancel_should_fail: bool,
    trade_ok: bool,
}

pub struct MockAdapter {
    inner: Mutex<MockInner>,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockInner {
                trade_ok: true,
                ..Default::default()
            }),
        }
    }

    pub fn push_market(&self, event: MarketEvent) {
        self.inner.lock().unwrap().market_queue.push_back(event);
    }

    pub fn push_fill(&self, fill: FillEvent) {
        self.inner.lock().unwrap().fill_queue.push_back(fill);
    }

    pub fn set_symbol_info(&self, info: SymbolInfo) {
        self.inner.lock().unwrap().symbol_info.insert(info.symbol.clone(), info);
    }

    pub fn set_remote_positions(&self, positions: BTreeMap<String, RemotePositionSnapshot>) {
        self.inner.lock().unwrap().remote_positions = positions;
    }

    pub fn set_remote_balance(&self, balance: RemoteAccountBalance) {
        self.inner.lock().unwrap().remote_balance = Some(balance);
    }

    pub fn set_open_order_client_ids(&self, ids: BTreeSet<String>) {
        self.inner.lock().unwrap().open_order_client_ids = ids;
    }

    pub fn set_account_snapshot(&self, snapshot: AccountSnapshot) {
        self.inner.lock().unwrap().account_snapshot = Some(snapshot);
    }

    pub fn set_trade_ok(&self, ok: bool) {
        self.inner.lock().unwrap().trade_ok = ok;
    }

    pub fn set_submit_should_fail(&self, fail: bool) {
        self.inner.lock().unwrap().submit_should_fail = fail;
    }

    pub fn set_cancel_should_fail(&self, fail: bool) {
        self.inner.lock().unwrap().cancel_should_fail = fail;
    }

    pub fn submitted(&self) -> Vec<OrderIntent> {
        self.inner.lock().unwrap().submitted.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.inner.lock().unwrap().cancelled.clone()
    }
}

impl ExchangeAdapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    fn connect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn poll_market(&self) -> Option<MarketEvent> {
        self.inner.lock().unwrap().market_queue.pop_front()
    }

    fn submit(&self, intent: &OrderIntent) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.submit_should_fail {
            return false;
        }
        inner.submitted.push(intent.clone());
        inner.open_order_client_ids.insert(intent.client_order_id.clone());
        true
    }

    fn cancel(&self, client_order_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.cancel_should_fail {
            return false;
        }
        inner.cancelled.push(client_order_id.to_string());
        inner.open_order_client_ids.remove(client_order_id);
        true
    }

    fn poll_fill(&self) -> Option<FillEvent> {
        self.inner.lock().unwrap().fill_queue.pop_front()
    }

    fn get_remote_notional_usd(&self) -> Option<f64> {
        let inner = self.inner.lock().unwrap();
        if inner.remote_positions.is_empty() {
            return None;
        }
        Some(
            inner
                .remote_positions
                .values()
                .map(|p| p.qty * p.mark_price)
                .sum(),
        )
    }

    fn get_remote_positions(&self) -> Option<BTreeMap<String, RemotePositionSnapshot>> {
        let inner = self.inner.lock().unwrap();
        if inner.remote_positions.is_empty() {
            None
        } else {
            Some(inner.remote_positions.clone())
        }
    }

    fn get_remote_account_balance(&self) -> Option<RemoteAccountBalance> {
        self.inner.lock().unwrap().remote_balance
    }

    fn get_remote_open_order_client_ids(&self) -> Option<BTreeSet<String>> {
        Some(self.inner.lock().unwrap().open_order_client_ids.clone())
    }

    fn get_account_snapshot(&self) -> Option<AccountSnapshot> {
        self.inner.lock().unwrap().account_snapshot.clone()
    }

    fn get_symbol_info(&self, symbol: &str) -> Option<SymbolInfo> {
        self.inner.lock().unwrap().symbol_info.get(symbol).cloned()
    }

    fn trade_ok(&self) -> bool {
        self.inner.lock().unwrap().trade_ok
    }
}
