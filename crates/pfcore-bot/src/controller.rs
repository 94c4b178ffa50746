//! The Bot Controller: the single cooperative loop that polls one market
//! event at a time, drives it through regime/strategy/evolution/integrator/
//! risk/execution, and durably enqueues the resulting order. Safety state
//! (protection, gate, reconcile) is tracked here because each leaf crate only
//! knows its own slice of "should we be reduce-only or halted right now".

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use pfcore_account::AccountState;
use pfcore_config::{AppConfig, RunMode};
use pfcore_evolution::EvolutionController;
use pfcore_exchange::ExchangeAdapter;
use pfcore_execution::{build_intent, build_protection_intent, EntryGate, EntryGateContext, ExecutionConfig, OrderThrottle};
use pfcore_executor::AsyncExecutor;
use pfcore_gate::{GateMonitor, GateRuntime};
use pfcore_integrator::Integrator;
use pfcore_oms::OrderManager;
use pfcore_reconcile::{self, AnomalyTracker, ReconcileConfig};
use pfcore_regime::RegimeClassifier;
use pfcore_schemas::clock::{now_ms, ClientOrderIdMinter};
use pfcore_schemas::{Direction, MarketEvent, OrderPurpose, Signal};
use pfcore_universe::UniverseSelector;
use pfcore_wal::Wal;

use crate::config::LeafConfigs;
use crate::strategy::Strategy;

const IDLE_SLEEP_MS: u64 = 10;

/// Why the main loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    MaxTicksReached,
    AdapterExhausted,
}

#[derive(Debug, Clone)]
pub struct ControllerOutcome {
    pub exit_reason: ExitReason,
    pub ticks: u64,
    pub final_equity: f64,
}

/// Tracks a protective order waiting on a parent entry's attach timeout.
struct PendingSl {
    parent_client_order_id: String,
    sl_client_order_id: String,
    deadline_ms: i64,
}

/// Rolling per-symbol fill-quality counters feeding the entry gate's quality
/// guard. Not implemented by any leaf crate: the leaves only expose the
/// knobs (`quality_guard_penalty_bps`) and the context fields they consume.
#[derive(Default)]
struct SymbolFillStats {
    maker_fills: u64,
    taker_fills: u64,
    unknown_liquidity_fills: u64,
    total_fills: u64,
    consecutive_bad: u32,
    consecutive_good: u32,
    active: bool,
}

impl SymbolFillStats {
    fn maker_fill_ratio(&self) -> f64 {
        if self.total_fills == 0 {
            return 1.0;
        }
        self.maker_fills as f64 / self.total_fills as f64
    }

    fn unknown_liquidity_ratio(&self) -> f64 {
        if self.total_fills == 0 {
            return 0.0;
        }
        self.unknown_liquidity_fills as f64 / self.total_fills as f64
    }

    fn on_fill(&mut self, liquidity: pfcore_schemas::Liquidity, cfg: &pfcore_config::QualityGuardConfig) {
        self.total_fills += 1;
        match liquidity {
            pfcore_schemas::Liquidity::Maker => self.maker_fills += 1,
            pfcore_schemas::Liquidity::Taker => self.taker_fills += 1,
            pfcore_schemas::Liquidity::Unknown => self.unknown_liquidity_fills += 1,
        }

        if !cfg.enabled || self.total_fills < cfg.min_fills {
            return;
        }

        let bad = matches!(liquidity, pfcore_schemas::Liquidity::Unknown);
        if bad {
            self.consecutive_bad += 1;
            self.consecutive_good = 0;
        } else {
            self.consecutive_good += 1;
            self.consecutive_bad = 0;
        }

        if !self.active && self.consecutive_bad >= cfg.bad_streak {
            self.active = true;
        } else if self.active && self.consecutive_good >= cfg.good_streak {
            self.active = false;
        }
    }
}

pub struct BotController {
    cfg: AppConfig,
    leaves: LeafConfigs,

    wal: Wal,
    oms: OrderManager,
    account: AccountState,
    adapter: Arc<dyn ExchangeAdapter>,
    executor: Option<AsyncExecutor>,

    regime: RegimeClassifier,
    universe: UniverseSelector,
    evolution: EvolutionController,
    integrator: Integrator,
    entry_gate: EntryGate,
    throttle: OrderThrottle,
    execution_cfg: ExecutionConfig,
    reconcile_cfg: ReconcileConfig,
    anomaly: AnomalyTracker,
    gate_monitor: GateMonitor,
    gate_runtime: GateRuntime,

    strategy: Box<dyn Strategy>,
    minter: ClientOrderIdMinter,

    pending_intent_ids: BTreeSet<String>,
    pending_enqueued_ms: HashMap<String, i64>,
    pending_required_sl: HashMap<String, PendingSl>,
    fill_ids: std::collections::HashSet<String>,
    fill_stats: HashMap<String, SymbolFillStats>,
    cost_filter_streak: HashMap<String, u32>,
    cost_filter_cooldown_until_tick: HashMap<String, u64>,

    protection_forced_reduce_only: bool,

    tick: u64,
    last_fill_tick: u64,
    last_market_ts_ms: i64,
    last_auto_resync_tick: Option<u64>,
    max_ticks: Option<u64>,
}

impl BotController {
    pub fn new(
        cfg: AppConfig,
        leaves: LeafConfigs,
        adapter: Arc<dyn ExchangeAdapter>,
        strategy: Box<dyn Strategy>,
    ) -> Result<Self> {
        let mut wal = Wal::new(&cfg.system.data_path);
        wal.initialize().context("WAL_INIT_FAILED")?;

        let mut oms = OrderManager::new();
        let mut account = AccountState::new(0.0);

        if !matches!(cfg.system.mode, RunMode::Replay) {
            let loaded = wal.load_state().context("WAL_LOAD_FAILED")?;
            // Only fills round-trip through the WAL; recovered intent ids
            // have no surviving OrderIntent to re-register into the OMS.
            for fill in &loaded.ordered_fills {
                oms.on_fill(fill);
                account.apply_fill(fill);
            }
            tracing::info!(
                target: "pfcore_bot",
                known_intents = loaded.intent_ids.len(),
                replayed_fills = loaded.ordered_fills.len(),
                "WAL_REPLAY_COMPLETE"
            );
        }

        adapter.connect().context("EXCHANGE_CONNECT_FAILED")?;

        if matches!(cfg.system.mode, RunMode::Live) {
            validate_account_snapshot(adapter.as_ref(), &cfg)?;
        }

        let executor = AsyncExecutor::start(adapter.clone());

        let mut universe = UniverseSelector::new(leaves.universe.clone());
        if let Some(info) = adapter.get_symbol_info(&cfg.system.primary_symbol) {
            if !info.tradable {
                tracing::warn!(
                    target: "pfcore_bot",
                    symbol = %cfg.system.primary_symbol,
                    "PRIMARY_SYMBOL_NOT_TRADABLE"
                );
            }
        }
        universe.refresh();

        if let Some(remote) = adapter.get_remote_positions() {
            account.sync_from_remote_positions(&remote, account.equity());
        }
        if let Some(balance) = adapter.get_remote_account_balance() {
            account.sync_from_remote_balance(&balance, true);
        }

        let integrator = Integrator::init(leaves.integrator.clone());
        let evolution = EvolutionController::new(leaves.evolution);

        let entry_gate = EntryGate::new(leaves.entry_gate.clone());
        let throttle = OrderThrottle::new(leaves.throttle);
        let reconcile_cfg = leaves.reconcile.clone();
        let gate_monitor = GateMonitor::new(leaves.gate.clone());

        Ok(Self {
            execution_cfg: leaves.execution,
            reconcile_cfg,
            leaves,
            cfg,
            wal,
            oms,
            account,
            adapter,
            executor: Some(executor),
            regime: RegimeClassifier::new(pfcore_regime::RegimeConfig::default()),
            universe,
            evolution,
            integrator,
            entry_gate,
            throttle,
            anomaly: AnomalyTracker::new(),
            gate_monitor,
            gate_runtime: GateRuntime::new(),
            strategy,
            minter: ClientOrderIdMinter::with_random_tag(),
            pending_intent_ids: BTreeSet::new(),
            pending_enqueued_ms: HashMap::new(),
            pending_required_sl: HashMap::new(),
            fill_ids: std::collections::HashSet::new(),
            fill_stats: HashMap::new(),
            cost_filter_streak: HashMap::new(),
            cost_filter_cooldown_until_tick: HashMap::new(),
            protection_forced_reduce_only: false,
            tick: 0,
            last_fill_tick: 0,
            last_market_ts_ms: 0,
            last_auto_resync_tick: None,
            max_ticks: None,
        })
    }

    pub fn with_max_ticks(mut self, max_ticks: Option<u64>) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    pub fn force_reduce_only_active(&self) -> bool {
        self.protection_forced_reduce_only
            || self.gate_runtime.forced_reduce_only()
            || self.anomaly.forced_reduce_only()
    }

    pub fn trading_halted(&self) -> bool {
        self.anomaly.trading_halted() || self.gate_runtime.halted()
    }

    /// Runs the main loop until `max_ticks` or the adapter stops producing
    /// market events while `run_forever` is false.
    pub fn run(&mut self, run_forever: bool) -> Result<ControllerOutcome> {
        loop {
            if let Some(max) = self.max_ticks {
                if self.tick >= max {
                    return Ok(self.finish(ExitReason::MaxTicksReached));
                }
            }

            let mut did_work = false;

            if let Some(event) = self.adapter.poll_market() {
                self.tick += 1;
                self.last_market_ts_ms = event.ts_ms;
                self.run_pipeline(&event);
                did_work = true;
            } else if !run_forever {
                return Ok(self.finish(ExitReason::AdapterExhausted));
            }

            self.drain_executor_results();
            self.drain_fills();
            self.check_required_sl_timeouts();
            if did_work {
                self.run_periodic_tasks();
            }

            if !did_work {
                std::thread::sleep(Duration::from_millis(IDLE_SLEEP_MS));
            }
        }
    }

    fn finish(&mut self, reason: ExitReason) -> ControllerOutcome {
        ControllerOutcome {
            exit_reason: reason,
            ticks: self.tick,
            final_equity: self.account.equity(),
        }
    }

    // -- per-market pipeline -------------------------------------------------

    fn run_pipeline(&mut self, event: &MarketEvent) {
        let abs_return = {
            let prev = self.regime.current(&event.symbol);
            prev.instant_return.abs()
        };
        if self.leaves_universe_enabled() {
            self.universe.on_market(&event.symbol, abs_return);
        }

        let position_flat = self.account.position(&event.symbol).is_flat();
        let has_pending = self.has_pending_orders_for(&event.symbol);
        let tradable = self.adapter.get_symbol_info(&event.symbol).map(|i| i.tradable);
        let allowed = self.universe.is_allowed(&event.symbol, tradable);

        if !allowed && position_flat && !has_pending {
            return;
        }

        self.account.on_market(event);
        let regime = self.regime.on_price(&event.symbol, event.effective_price());

        let base_signal = self.strategy.on_market(event, &regime);

        self.evolution.on_tick(
            regime.bucket,
            base_signal.trend_notional_usd,
            base_signal.defensive_notional_usd,
            regime.instant_return,
            self.account.unrealized_pnl(),
            self.account.drawdown_pct(),
            base_signal.suggested_notional_usd.abs(),
        );
        if let Some(action) = self.evolution.on_maybe_window_close() {
            tracing::info!(target: "pfcore_bot", ?action, "SELF_EVOLUTION_ACTION");
        }

        let blended = self.blend_with_evolution(&base_signal, &regime);
        let applied = self.integrator.apply(&regime, &blended);

        let drawdown_pct = self.account.drawdown_pct();
        let trade_ok = self.adapter.trade_ok();
        let risk_adjusted = pfcore_risk::apply(
            &self.leaves.risk,
            applied.output.suggested_notional_usd * applied.output.direction.sign(),
            drawdown_pct,
            trade_ok,
            self.force_reduce_only_active(),
        );

        let effective_signal = risk_adjusted.adjusted_notional_usd.abs() > pfcore_schemas::EPSILON;
        self.gate_monitor.on_signal(effective_signal);

        self.try_build_and_dispatch(event, &regime, &risk_adjusted, allowed);
    }

    fn leaves_universe_enabled(&self) -> bool {
        self.cfg.universe.enabled
    }

    fn blend_with_evolution(&self, base: &Signal, regime: &pfcore_schemas::RegimeState) -> Signal {
        let w = self.evolution.weights(regime.bucket);
        let notional = base.trend_notional_usd * w.trend_weight + base.defensive_notional_usd * w.defensive_weight;
        Signal {
            symbol: base.symbol.clone(),
            suggested_notional_usd: notional,
            direction: Direction::of(notional),
            trend_notional_usd: base.trend_notional_usd,
            defensive_notional_usd: base.defensive_notional_usd,
        }
    }

    fn try_build_and_dispatch(
        &mut self,
        event: &MarketEvent,
        regime: &pfcore_schemas::RegimeState,
        risk_adjusted: &pfcore_schemas::RiskAdjustedPosition,
        symbol_allowed: bool,
    ) {
        let current_notional = self.account.current_notional_usd(&event.symbol);
        let ts_ms = event.ts_ms;

        let Some(mut intent) = build_intent(
            &self.execution_cfg,
            risk_adjusted,
            current_notional,
            event.effective_price(),
            &event.symbol,
            &mut self.minter,
            ts_ms,
        ) else {
            return;
        };

        // The universe's active set only gates *new* entries; reduce/SL/TP
        // orders for an already-open position still go through even if the
        // symbol fell out of the active set.
        if intent.purpose == OrderPurpose::Entry && !symbol_allowed {
            return;
        }

        if intent.purpose == OrderPurpose::Entry {
            let min_notional = self
                .adapter
                .get_symbol_info(&event.symbol)
                .map(|i| i.min_notional_usd)
                .unwrap_or(0.0);
            if intent.qty * intent.price < min_notional {
                return;
            }

            if self.in_cost_filter_cooldown(&event.symbol) {
                return;
            }

            let ctx = self.entry_gate_context(&event.symbol);
            let eval = self.entry_gate.evaluate(
                &event.symbol,
                self.tick,
                intent.direction,
                intent.price,
                regime,
                &ctx,
            );
            if !eval.allow {
                self.record_cost_filter_rejection(&event.symbol);
                return;
            }
        }

        if self.trading_halted() {
            return;
        }

        if self.has_same_side_pending(&event.symbol, intent.direction, intent.reduce_only) {
            return;
        }

        if let Err(_rejection) = self.throttle.check(
            &event.symbol,
            ts_ms,
            self.tick,
            intent.reduce_only,
            intent.direction,
        ) {
            return;
        }

        if !intent.reduce_only && self.maker_preference_unviable(&event.symbol) {
            intent.liquidity_preference = pfcore_schemas::LiquidityPreference::Taker;
        }

        self.throttle
            .on_accepted(&event.symbol, ts_ms, self.tick, intent.reduce_only, intent.direction);

        self.durable_enqueue(intent);
    }

    fn maker_preference_unviable(&self, _symbol: &str) -> bool {
        false
    }

    fn in_cost_filter_cooldown(&self, symbol: &str) -> bool {
        self.cost_filter_cooldown_until_tick
            .get(symbol)
            .map(|until| self.tick < *until)
            .unwrap_or(false)
    }

    fn record_cost_filter_rejection(&mut self, symbol: &str) {
        let streak = self.cost_filter_streak.entry(symbol.to_string()).or_insert(0);
        *streak += 1;
        if *streak >= self.cfg.execution.cost_filter_cooldown.trigger_count {
            self.cost_filter_cooldown_until_tick
                .insert(symbol.to_string(), self.tick + self.cfg.execution.cost_filter_cooldown.ticks);
            *streak = 0;
        }
    }

    fn has_pending_orders_for(&self, symbol: &str) -> bool {
        self.oms
            .pending_net_position_orders()
            .into_iter()
            .any(|r| r.intent.symbol == symbol)
    }

    fn has_same_side_pending(&self, symbol: &str, direction: Direction, reduce_only: bool) -> bool {
        if reduce_only {
            return false;
        }
        self.oms.pending_net_position_orders().into_iter().any(|r| {
            r.intent.symbol == symbol && r.intent.direction == direction && r.intent.purpose == OrderPurpose::Entry
        })
    }

    fn entry_gate_context(&self, symbol: &str) -> EntryGateContext {
        let stats = self.fill_stats.get(symbol);
        EntryGateContext {
            maker_viable: true,
            recent_maker_fill_ratio: stats.map(|s| s.maker_fill_ratio()).unwrap_or(1.0),
            recent_unknown_liquidity_ratio: stats.map(|s| s.unknown_liquidity_ratio()).unwrap_or(0.0),
            quality_guard_active: stats.map(|s| s.active).unwrap_or(false),
        }
    }

    // -- durable enqueue / submission -----------------------------------------

    /// Returns whether the intent was durably enqueued and submitted.
    fn durable_enqueue(&mut self, intent: pfcore_schemas::OrderIntent) -> bool {
        if self.pending_intent_ids.contains(&intent.client_order_id) || self.oms.is_registered(&intent.client_order_id) {
            return false;
        }

        if self.oms.register_intent(intent.clone()).is_err() {
            return false;
        }

        if self.wal.append_intent(&intent).is_err() {
            self.oms.mark_rejected(&intent.client_order_id);
            tracing::error!(
                target: "pfcore_bot",
                client_order_id = %intent.client_order_id,
                "INTENT_WAL_APPEND_FAILED"
            );
            return false;
        }

        self.pending_intent_ids.insert(intent.client_order_id.clone());
        if matches!(intent.purpose, OrderPurpose::Entry | OrderPurpose::Reduce) {
            self.pending_enqueued_ms.insert(intent.client_order_id.clone(), now_ms());
        }
        if intent.purpose == OrderPurpose::Sl {
            self.pending_required_sl.insert(
                intent.parent_order_id.clone().unwrap_or_default(),
                PendingSl {
                    parent_client_order_id: intent.parent_order_id.clone().unwrap_or_default(),
                    sl_client_order_id: intent.client_order_id.clone(),
                    deadline_ms: now_ms() + self.cfg.protection.attach_timeout_ms,
                },
            );
        }

        self.gate_monitor.on_intent();
        self.oms.mark_sent(&intent.client_order_id);
        if let Some(executor) = &self.executor {
            executor.submit(intent);
        }
        true
    }

    fn drain_executor_results(&mut self) {
        let Some(executor) = &self.executor else { return };
        for result in executor.drain_results() {
            if !result.success && !result.is_cancel {
                self.oms.mark_rejected(&result.client_order_id);
                self.pending_intent_ids.remove(&result.client_order_id);
                self.pending_enqueued_ms.remove(&result.client_order_id);
            }
        }
    }

    // -- fills ----------------------------------------------------------------

    fn drain_fills(&mut self) {
        while let Some(fill) = self.adapter.poll_fill() {
            if self.fill_ids.contains(&fill.fill_id) {
                continue;
            }
            if self.wal.append_fill(&fill).is_err() {
                tracing::error!(target: "pfcore_bot", fill_id = %fill.fill_id, "FILL_WAL_APPEND_FAILED");
            }
            self.fill_ids.insert(fill.fill_id.clone());

            let purpose = self.oms.get(&fill.client_order_id).map(|r| r.intent.purpose);
            let parent_id = self.oms.get(&fill.client_order_id).and_then(|r| r.intent.parent_order_id.clone());

            self.oms.on_fill(&fill);
            self.account.apply_fill(&fill);
            self.gate_monitor.on_fill();

            self.fill_stats
                .entry(fill.symbol.clone())
                .or_default()
                .on_fill(fill.liquidity, &self.cfg.execution.quality_guard);

            if purpose == Some(OrderPurpose::Sl) {
                if let Some(pid) = &parent_id {
                    self.pending_required_sl.remove(pid);
                }
            }

            let is_terminal = self
                .oms
                .get(&fill.client_order_id)
                .map(|r| r.state.is_terminal())
                .unwrap_or(false);
            if is_terminal {
                self.pending_enqueued_ms.remove(&fill.client_order_id);
            }

            self.last_fill_tick = self.tick;

            match purpose {
                Some(OrderPurpose::Entry) => self.maybe_attach_protection(&fill),
                Some(OrderPurpose::Sl) | Some(OrderPurpose::Tp) => self.on_protective_fill(&fill, parent_id),
                _ => {}
            }
        }
    }

    fn maybe_attach_protection(&mut self, fill: &pfcore_schemas::FillEvent) {
        if !self.cfg.protection.enabled {
            return;
        }
        if self.oms.has_open_protection(&fill.client_order_id) {
            return;
        }

        let sl = build_protection_intent(
            fill,
            OrderPurpose::Sl,
            self.cfg.protection.stop_loss_ratio,
            &mut self.minter,
            self.last_market_ts_ms,
        );
        let sl_id = sl.client_order_id.clone();
        self.durable_enqueue(sl);

        let sl_attached = self.pending_intent_ids.contains(&sl_id) || self.oms.is_registered(&sl_id);
        if self.cfg.protection.require_sl && !sl_attached {
            self.protection_forced_reduce_only = true;
            tracing::error!(
                target: "pfcore_bot",
                parent_client_order_id = %fill.client_order_id,
                "EXEC_PROTECTIVE_ORDER_MISSING"
            );
        }

        if self.cfg.protection.enable_tp {
            let tp = build_protection_intent(
                fill,
                OrderPurpose::Tp,
                self.cfg.protection.take_profit_ratio,
                &mut self.minter,
                self.last_market_ts_ms,
            );
            self.durable_enqueue(tp);
        }
    }

    fn on_protective_fill(&mut self, fill: &pfcore_schemas::FillEvent, parent_id: Option<String>) {
        let Some(parent_id) = parent_id else { return };
        // `find_open_protective_sibling` already returns the *opposite*
        // purpose's record, so it's keyed on the fill's own purpose here.
        let Some(filled_purpose) = self.oms.get(&fill.client_order_id).map(|r| r.intent.purpose) else {
            return;
        };
        if let Some(sibling) = self.oms.find_open_protective_sibling(&parent_id, filled_purpose) {
            let sibling_id = sibling.intent.client_order_id.clone();
            if let Some(executor) = &self.executor {
                executor.cancel(sibling_id.clone());
            }
            self.oms.mark_cancelled(&sibling_id);
        }
    }

    fn check_required_sl_timeouts(&mut self) {
        if !self.cfg.protection.require_sl {
            return;
        }
        let now = now_ms();
        let expired: Vec<String> = self
            .pending_required_sl
            .iter()
            .filter(|(_, p)| now > p.deadline_ms)
            .map(|(k, _)| k.clone())
            .collect();

        for parent_id in expired {
            let Some(pending) = self.pending_required_sl.remove(&parent_id) else { continue };
            let sl_state = self.oms.get(&pending.sl_client_order_id).map(|r| r.state);
            let confirmed = matches!(
                sl_state,
                Some(pfcore_schemas::OrderState::Sent)
                    | Some(pfcore_schemas::OrderState::Partial)
                    | Some(pfcore_schemas::OrderState::Filled)
            );
            if !confirmed {
                self.protection_forced_reduce_only = true;
                tracing::error!(
                    target: "pfcore_bot",
                    parent_client_order_id = %pending.parent_client_order_id,
                    reason = "sl_attach_timeout",
                    "EXEC_PROTECTIVE_ORDER_MISSING"
                );
            }
        }
    }

    // -- periodic tasks ---------------------------------------------------------

    fn run_periodic_tasks(&mut self) {
        if self.cfg.system.remote_risk_refresh_interval_ticks > 0
            && self.tick % self.cfg.system.remote_risk_refresh_interval_ticks == 0
        {
            self.refresh_remote_risk();
        }

        if self.cfg.reconcile.enabled
            && self.cfg.reconcile.interval_ticks > 0
            && self.tick % self.cfg.reconcile.interval_ticks == 0
        {
            self.reconcile_tick();
        }

        if let Some(result) = self.gate_monitor.on_tick() {
            self.gate_runtime.on_window(&self.leaves.gate, &result);
            if !result.pass {
                tracing::warn!(target: "pfcore_bot", fail_reasons = ?result.fail_reasons, "GATE_WINDOW_FAILED");
            }
        }

        let is_flat = self.account.positions.values().all(|p| p.is_flat());
        let has_pending = !self.oms.pending_net_position_orders().is_empty();
        self.gate_runtime.on_account_tick(&self.leaves.gate, is_flat, has_pending);

        if self.cfg.system.status_log_interval_ticks > 0
            && self.tick % self.cfg.system.status_log_interval_ticks == 0
        {
            self.log_status();
        }
    }

    fn refresh_remote_risk(&mut self) {
        if let Some(remote) = self.adapter.get_remote_positions() {
            self.account.refresh_risk_from_remote(&remote);
        }
    }

    /// Fast remote-notional endpoint, falling back to summing notional over
    /// the full remote positions snapshot when the fast one is unavailable.
    fn acquire_remote_notional(&self) -> Option<f64> {
        if let Some(notional) = self.adapter.get_remote_notional_usd() {
            return Some(notional);
        }
        self.adapter
            .get_remote_positions()
            .map(|positions| positions.values().map(|p| (p.qty * p.mark_price).abs()).sum())
    }

    /// Cancel every stale pending net-position order through the executor
    /// and OMS. Returns `true` if any "fresh" (not-yet-stale) pending order
    /// remains, in which case the caller must defer the reconcile check.
    fn cancel_stale_pending_orders(&mut self) -> bool {
        let now = now_ms();
        let remote_open = self.adapter.get_remote_open_order_client_ids();
        let pending: Vec<String> = self
            .oms
            .pending_net_position_orders()
            .iter()
            .map(|r| r.intent.client_order_id.clone())
            .collect();

        let mut any_fresh = false;
        for cid in pending {
            let enqueued_ms = self.pending_enqueued_ms.get(&cid).copied();
            let confirmed_missing = remote_open.as_ref().is_some_and(|open| !open.contains(&cid));
            let aged_out = enqueued_ms.is_some_and(|ts| now - ts > self.cfg.reconcile.pending_order_stale_ms);
            let stale = confirmed_missing || aged_out || enqueued_ms.is_none();

            if stale {
                if let Some(executor) = &self.executor {
                    executor.cancel(cid.clone());
                }
                self.oms.mark_cancelled(&cid);
                self.pending_enqueued_ms.remove(&cid);
                tracing::warn!(target: "pfcore_bot", client_order_id = %cid, "OMS_STALE_PENDING_CLOSED");
            } else {
                any_fresh = true;
            }
        }
        any_fresh
    }

    fn reconcile_tick(&mut self) {
        // Phase 0: cancel stale pending net-position orders; defer this
        // tick's reconcile entirely if any fresh one survives.
        if self.cancel_stale_pending_orders() {
            self.anomaly.on_deferred();
            return;
        }

        let is_replay = matches!(self.cfg.system.mode, RunMode::Replay);
        let local_notional = self.account.gross_notional_usd();
        let remote_notional = self.acquire_remote_notional();

        if remote_notional.is_none() && !is_replay {
            self.anomaly.on_degraded(&self.reconcile_cfg);
            return;
        }

        let result = pfcore_reconcile::check(
            local_notional,
            remote_notional,
            local_notional,
            self.cfg.reconcile.tolerance_notional_usd,
        );
        if result.ok {
            self.anomaly.on_ok(&self.reconcile_cfg);
            return;
        }

        // Post-fill grace window: a failed check shortly after a fill is
        // treated as a transient local/remote race, not a real mismatch.
        if self.tick.saturating_sub(self.last_fill_tick) <= self.cfg.reconcile.grace_ticks {
            self.anomaly.on_grace();
            return;
        }

        // Refresh and retry once before counting this as a confirmed
        // mismatch.
        let retried_notional = self.acquire_remote_notional();
        let retry = pfcore_reconcile::check(
            local_notional,
            retried_notional,
            local_notional,
            self.cfg.reconcile.tolerance_notional_usd,
        );
        if retry.ok {
            self.anomaly.on_ok(&self.reconcile_cfg);
            return;
        }

        let cooldown_elapsed = self
            .last_auto_resync_tick
            .map_or(true, |last| self.tick.saturating_sub(last) >= self.cfg.reconcile.auto_resync_cooldown_ticks);

        if cooldown_elapsed {
            if let Some(remote) = self.adapter.get_remote_positions() {
                self.account.force_sync_positions_from_remote(&remote);
                for (symbol, snap) in &remote {
                    self.oms.seed_net_filled_qty_for_symbol(symbol, snap.qty);
                }
                self.pending_enqueued_ms.clear();
                self.last_auto_resync_tick = Some(self.tick);
                self.anomaly.on_autoresync();
                return;
            }
        }

        self.anomaly.on_mismatch(&self.reconcile_cfg);
    }

    fn log_status(&self) {
        tracing::info!(
            target: "pfcore_bot",
            tick = self.tick,
            equity = self.account.equity(),
            drawdown_pct = self.account.drawdown_pct(),
            protection_forced_reduce_only = self.protection_forced_reduce_only,
            gate_forced_reduce_only = self.gate_runtime.forced_reduce_only(),
            gate_halted = self.gate_runtime.halted(),
            reconcile_forced_reduce_only = self.anomaly.forced_reduce_only(),
            reconcile_halted = self.anomaly.trading_halted(),
            positions = self.account.positions.len(),
            last_fill_tick = self.last_fill_tick,
            "BOT_STATUS"
        );
    }
}

fn validate_account_snapshot(adapter: &dyn ExchangeAdapter, cfg: &AppConfig) -> Result<()> {
    let Some(snapshot) = adapter.get_account_snapshot() else {
        bail!("ACCOUNT_SNAPSHOT_UNAVAILABLE: live mode requires a venue-reported account snapshot");
    };
    let expected = &cfg.exchange.expected;
    if !expected.account_mode.is_empty() && expected.account_mode != snapshot.account_mode {
        bail!(
            "ACCOUNT_MODE_MISMATCH: expected {}, got {}",
            expected.account_mode,
            snapshot.account_mode
        );
    }
    if !expected.margin_mode.is_empty() && expected.margin_mode != snapshot.margin_mode {
        bail!(
            "MARGIN_MODE_MISMATCH: expected {}, got {}",
            expected.margin_mode,
            snapshot.margin_mode
        );
    }
    if !expected.position_mode.is_empty() && expected.position_mode != snapshot.position_mode {
        bail!(
            "POSITION_MODE_MISMATCH: expected {}, got {}",
            expected.position_mode,
            snapshot.position_mode
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::FlatStrategy;
    use pfcore_exchange::{MockAdapter, ReplayAdapter};

    fn minimal_cfg(data_path: &str) -> AppConfig {
        let yaml = format!(
            r#"
system:
  mode: replay
  primary_symbol: BTCUSDT
  data_path: {data_path}
  status_log_interval_ticks: 100
  remote_risk_refresh_interval_ticks: 50
risk:
  max_abs_notional_usd: 500
  thresholds: {{ degraded: 0.08, cooldown: 0.12, fuse: 0.2 }}
execution:
  max_order_notional: 200
  min_order_interval_ms: 0
  reverse_signal_cooldown_ticks: 0
  fee_bps: {{ entry: 0, exit: 0, expected_slippage: 0 }}
  entry_gate: {{ enabled: false, min_expected_edge_bps: 0 }}
  cost_filter_cooldown: {{ trigger_count: 3, ticks: 20 }}
protection:
  enabled: false
  require_sl: false
  attach_timeout_ms: 0
  stop_loss_ratio: 0.02
  take_profit_ratio: 0.04
reconcile:
  enabled: false
  interval_ticks: 50
  tolerance_notional_usd: 5.0
  mismatch_confirmations: 3
  pending_order_stale_ms: 10000
  anomaly_reduce_only_streak: 3
  anomaly_halt_streak: 6
  anomaly_resume_streak: 3
gate:
  window_ticks: 1000
  min_effective_signals_per_window: 0
  min_fills_per_window: 0
  heartbeat_empty_signal_ticks: 1000
  fail_to_reduce_only_windows: 2
  fail_to_halt_windows: 4
  reduce_only_cooldown_ticks: 50
  halt_cooldown_ticks: 200
  pass_to_resume_windows: 2
universe:
  update_interval_ticks: 500
  max_active_symbols: 3
  min_active_symbols: 1
  fallback_symbols: [BTCUSDT]
evolution:
  enabled: false
  update_interval_ticks: 500
  min_bucket_ticks_for_update: 200
  min_abs_window_pnl_usd: 1.0
  max_weight_step: 0.1
  max_single_strategy_weight: 0.9
  rollback_degrade_windows: 3
  rollback_cooldown_ticks: 1000
  objective: {{ alpha: 1.0, beta: 0.5, gamma: 0.25 }}
  initial_trend_weight: 0.5
  initial_defensive_weight: 0.5
integrator:
  enabled: false
  mode: off
  canary: {{ confidence_threshold: 0.6, notional_ratio: 0.5, min_notional_usd: 10 }}
  active: {{ confidence_threshold: 0.7, full_notional_confidence_threshold: 0.85, partial_notional_ratio: 0.5 }}
exchange:
  platform: mock
"#
        );
        let yaml_val: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let json_val = serde_json::to_value(yaml_val).unwrap();
        serde_json::from_value(json_val).unwrap()
    }

    #[test]
    fn replay_adapter_exhaustion_ends_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("wal.log");
        let cfg = minimal_cfg(data_path.to_str().unwrap());
        let leaves = LeafConfigs::from_app_config(&cfg);
        let adapter: Arc<dyn ExchangeAdapter> =
            Arc::new(ReplayAdapter::new("BTCUSDT", vec![100.0, 101.0], 1));

        let mut controller =
            BotController::new(cfg, leaves, adapter, Box::new(FlatStrategy)).unwrap();
        let outcome = controller.run(false).unwrap();

        assert_eq!(outcome.exit_reason, ExitReason::AdapterExhausted);
        assert_eq!(outcome.ticks, 2);
    }

    #[test]
    fn max_ticks_stops_the_run_early() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("wal.log");
        let cfg = minimal_cfg(data_path.to_str().unwrap());
        let leaves = LeafConfigs::from_app_config(&cfg);
        let adapter: Arc<dyn ExchangeAdapter> =
            Arc::new(ReplayAdapter::new("BTCUSDT", vec![100.0, 101.0, 102.0], 1));

        let mut controller = BotController::new(cfg, leaves, adapter, Box::new(FlatStrategy))
            .unwrap()
            .with_max_ticks(Some(1));
        let outcome = controller.run(true).unwrap();

        assert_eq!(outcome.exit_reason, ExitReason::MaxTicksReached);
        assert_eq!(outcome.ticks, 1);
    }

    /// Scenario F: a required SL that never reaches a confirmed state past
    /// its attach timeout forces reduce-only, and does so off its own order
    /// state rather than a sibling TP's.
    #[test]
    fn required_sl_timeout_forces_reduce_only_on_its_own_state() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("wal.log");
        let mut cfg = minimal_cfg(data_path.to_str().unwrap());
        cfg.protection.require_sl = true;
        cfg.protection.attach_timeout_ms = 0;
        let leaves = LeafConfigs::from_app_config(&cfg);
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(MockAdapter::new());

        let mut controller = BotController::new(cfg, leaves, adapter, Box::new(FlatStrategy)).unwrap();

        let sl_intent = pfcore_schemas::OrderIntent {
            client_order_id: "sl-1".to_string(),
            parent_order_id: Some("entry-1".to_string()),
            symbol: "BTCUSDT".to_string(),
            purpose: OrderPurpose::Sl,
            reduce_only: true,
            direction: Direction::Down,
            qty: 1.0,
            price: 99.0,
            liquidity_preference: pfcore_schemas::LiquidityPreference::Taker,
        };
        let tp_intent = pfcore_schemas::OrderIntent {
            client_order_id: "tp-1".to_string(),
            parent_order_id: Some("entry-1".to_string()),
            symbol: "BTCUSDT".to_string(),
            purpose: OrderPurpose::Tp,
            reduce_only: true,
            direction: Direction::Down,
            qty: 1.0,
            price: 102.0,
            liquidity_preference: pfcore_schemas::LiquidityPreference::Taker,
        };
        assert!(controller.durable_enqueue(sl_intent));
        assert!(controller.durable_enqueue(tp_intent));

        // The SL never actually confirms (rejected by the venue), while its
        // TP sibling is still live. A correct timeout check must not let the
        // live TP mask the dead SL.
        controller.oms.mark_rejected("sl-1");

        std::thread::sleep(Duration::from_millis(2));
        controller.check_required_sl_timeouts();

        assert!(controller.protection_forced_reduce_only);
        assert!(controller.pending_required_sl.is_empty());
    }

    /// Flat on the first tick, then a fixed long signal on every tick after —
    /// enough to drive Scenario A's price stream without depending on the
    /// regime classifier's own (much longer) warmup window.
    struct OneShotLongStrategy {
        fired: bool,
    }

    impl Strategy for OneShotLongStrategy {
        fn on_market(&mut self, event: &MarketEvent, _regime: &pfcore_schemas::RegimeState) -> Signal {
            if !self.fired {
                self.fired = true;
                return Signal {
                    symbol: event.symbol.clone(),
                    suggested_notional_usd: 0.0,
                    direction: Direction::Flat,
                    trend_notional_usd: 0.0,
                    defensive_notional_usd: 0.0,
                };
            }
            Signal {
                symbol: event.symbol.clone(),
                suggested_notional_usd: 202.0,
                direction: Direction::Up,
                trend_notional_usd: 202.0,
                defensive_notional_usd: 202.0,
            }
        }
    }

    /// Scenario A: no intent on the warmup tick; the next tick dispatches an
    /// Entry, and a manually-applied fill updates account notional.
    #[test]
    fn skeleton_price_stream_dispatches_entry_then_applies_fill() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("wal.log");
        let mut cfg = minimal_cfg(data_path.to_str().unwrap());
        cfg.execution.max_order_notional = 250.0;
        let leaves = LeafConfigs::from_app_config(&cfg);
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(MockAdapter::new());

        let mut controller = BotController::new(
            cfg,
            leaves,
            adapter,
            Box::new(OneShotLongStrategy { fired: false }),
        )
        .unwrap();

        let e1 = MarketEvent {
            ts_ms: 1,
            symbol: "BTCUSDT".to_string(),
            last_price: 100.0,
            mark_price: 100.0,
            volume: None,
            interval_ms: None,
        };
        controller.run_pipeline(&e1);
        assert!(controller.oms.known_ids().is_empty());

        let e2 = MarketEvent {
            ts_ms: 2,
            symbol: "BTCUSDT".to_string(),
            last_price: 101.0,
            mark_price: 101.0,
            volume: None,
            interval_ms: None,
        };
        controller.run_pipeline(&e2);

        let entry_id = controller.oms.known_ids().into_iter().next().expect("entry intent dispatched");
        let entry_record = controller.oms.get(&entry_id).unwrap();
        assert_eq!(entry_record.intent.direction, Direction::Up);
        assert_eq!(entry_record.intent.purpose, OrderPurpose::Entry);
        assert!((entry_record.intent.qty - 2.0).abs() < 1e-9);
        assert_eq!(entry_record.intent.price, 101.0);

        let fill = pfcore_schemas::FillEvent {
            fill_id: "f1".to_string(),
            client_order_id: entry_id,
            symbol: "BTCUSDT".to_string(),
            direction: Direction::Up,
            qty: 2.0,
            price: 100.0,
            fee: 0.0,
            liquidity: pfcore_schemas::Liquidity::Maker,
        };
        controller.oms.on_fill(&fill);
        controller.account.apply_fill(&fill);

        assert_eq!(controller.account.current_notional_usd("BTCUSDT"), 200.0);
    }

    /// Scenario E: an entry fill attaches SL+TP; an SL fill cancels the TP
    /// sibling and clears open protection.
    #[test]
    fn protection_oco_cancels_tp_sibling_on_sl_fill() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = minimal_cfg(dir.path().join("wal.log").to_str().unwrap());
        cfg.protection.enabled = true;
        cfg.protection.require_sl = true;
        cfg.protection.enable_tp = true;
        cfg.protection.attach_timeout_ms = 60_000;
        cfg.protection.stop_loss_ratio = 0.01;
        cfg.protection.take_profit_ratio = 0.02;
        let leaves = LeafConfigs::from_app_config(&cfg);
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(MockAdapter::new());

        let mut controller = BotController::new(cfg, leaves, adapter, Box::new(FlatStrategy)).unwrap();

        let entry_fill = pfcore_schemas::FillEvent {
            fill_id: "entry-fill".to_string(),
            client_order_id: "E".to_string(),
            symbol: "BTCUSDT".to_string(),
            direction: Direction::Up,
            qty: 1.0,
            price: 100.0,
            fee: 0.0,
            liquidity: pfcore_schemas::Liquidity::Maker,
        };
        controller.oms.register_intent(pfcore_schemas::OrderIntent {
            client_order_id: "E".to_string(),
            parent_order_id: None,
            symbol: "BTCUSDT".to_string(),
            purpose: OrderPurpose::Entry,
            reduce_only: false,
            direction: Direction::Up,
            qty: 1.0,
            price: 100.0,
            liquidity_preference: pfcore_schemas::LiquidityPreference::Maker,
        }).unwrap();
        controller.oms.mark_sent("E");
        controller.oms.on_fill(&entry_fill);
        controller.account.apply_fill(&entry_fill);

        controller.maybe_attach_protection(&entry_fill);
        assert!(controller.oms.has_open_protection("E"));

        let sl_record = controller
            .oms
            .known_ids()
            .into_iter()
            .filter_map(|id| controller.oms.get(&id).cloned())
            .find(|r| r.intent.purpose == OrderPurpose::Sl)
            .expect("SL intent enqueued");
        let tp_record = controller
            .oms
            .known_ids()
            .into_iter()
            .filter_map(|id| controller.oms.get(&id).cloned())
            .find(|r| r.intent.purpose == OrderPurpose::Tp)
            .expect("TP intent enqueued");
        assert_eq!(sl_record.intent.direction, Direction::Down);
        assert_eq!(sl_record.intent.qty, 1.0);
        assert!((sl_record.intent.price - 99.0).abs() < 1e-9);
        assert_eq!(tp_record.intent.direction, Direction::Down);
        assert_eq!(tp_record.intent.qty, 1.0);
        assert!((tp_record.intent.price - 102.0).abs() < 1e-9);

        let sl_id = sl_record.intent.client_order_id.clone();
        let sl_fill = pfcore_schemas::FillEvent {
            fill_id: "sl-fill".to_string(),
            client_order_id: sl_id.clone(),
            symbol: "BTCUSDT".to_string(),
            direction: Direction::Down,
            qty: 1.0,
            price: 99.0,
            fee: 0.0,
            liquidity: pfcore_schemas::Liquidity::Taker,
        };
        let purpose = controller.oms.get(&sl_id).map(|r| r.intent.purpose);
        let parent_id = controller.oms.get(&sl_id).and_then(|r| r.intent.parent_order_id.clone());
        controller.oms.on_fill(&sl_fill);
        controller.account.apply_fill(&sl_fill);
        assert_eq!(purpose, Some(OrderPurpose::Sl));
        controller.on_protective_fill(&sl_fill, parent_id);

        assert!(!controller.oms.has_open_protection("E"));
        assert_eq!(
            controller.oms.get(&tp_record.intent.client_order_id).unwrap().state,
            pfcore_schemas::OrderState::Cancelled
        );
    }

    /// Scenario D, driven through `reconcile_tick` itself rather than
    /// `AnomalyTracker` in isolation: a fill at tick 100, reconcile at tick
    /// 102 with a persistent delta must land in the post-fill grace window
    /// (no resync, streak stays 0); the same delta at tick 150 is past grace
    /// and, with no prior resync, auto-resyncs on the spot.
    #[test]
    fn reconcile_tick_grace_window_then_autoresync_after_cooldown() {
        use std::collections::BTreeMap;

        let dir = tempfile::tempdir().unwrap();
        let mut cfg = minimal_cfg(dir.path().join("wal.log").to_str().unwrap());
        cfg.reconcile.enabled = true;
        cfg.reconcile.tolerance_notional_usd = 5.0;
        cfg.reconcile.mismatch_confirmations = 100;
        cfg.reconcile.grace_ticks = 2;
        cfg.reconcile.auto_resync_cooldown_ticks = 40;
        cfg.reconcile.anomaly_reduce_only_streak = u32::MAX;
        cfg.reconcile.anomaly_halt_streak = u32::MAX;
        let leaves = LeafConfigs::from_app_config(&cfg);

        let mock = Arc::new(MockAdapter::new());
        mock.set_remote_positions(BTreeMap::from([(
            "BTCUSDT".to_string(),
            pfcore_schemas::RemotePositionSnapshot {
                qty: 10.0,
                avg_entry_price: 100.0,
                mark_price: 100.0,
                liquidation_price: None,
            },
        )]));
        let adapter: Arc<dyn ExchangeAdapter> = mock.clone();
        let mut controller = BotController::new(cfg, leaves, adapter, Box::new(FlatStrategy)).unwrap();

        // Tick 102: within the grace window of a fill at tick 100. Local
        // notional (0, flat) vs. remote (1000) is well past tolerance, but
        // the grace window must absorb it with no resync.
        controller.tick = 102;
        controller.last_fill_tick = 100;
        controller.reconcile_tick();
        assert_eq!(controller.anomaly.reconcile_streak, 0);
        assert!(controller.last_auto_resync_tick.is_none());
        assert_eq!(controller.account.current_notional_usd("BTCUSDT"), 0.0);

        // Tick 150: grace has expired; the same delta persists through the
        // refresh-and-retry, and with no prior resync the cooldown is
        // trivially satisfied, so this auto-resyncs immediately.
        controller.tick = 150;
        controller.reconcile_tick();
        assert_eq!(controller.last_auto_resync_tick, Some(150));
        assert_eq!(controller.anomaly.reconcile_streak, 0);
        assert!((controller.account.current_notional_usd("BTCUSDT") - 1000.0).abs() < 1e-9);

        // Tick 155: a fresh mismatch appears five ticks later, still inside
        // the 40-tick auto-resync cooldown. The cooldown must block a
        // second resync and fall through to the mismatch-streak increment
        // instead of silently overwriting positions again.
        mock.set_remote_positions(BTreeMap::from([(
            "BTCUSDT".to_string(),
            pfcore_schemas::RemotePositionSnapshot {
                qty: 20.0,
                avg_entry_price: 100.0,
                mark_price: 100.0,
                liquidation_price: None,
            },
        )]));
        controller.tick = 155;
        controller.reconcile_tick();
        assert_eq!(controller.last_auto_resync_tick, Some(150));
        assert_eq!(controller.anomaly.reconcile_streak, 1);
        assert!((controller.account.current_notional_usd("BTCUSDT") - 1000.0).abs() < 1e-9);
    }

    /// §4.9 stale pre-check: an aged-out pending order is cancelled through
    /// the executor and OMS (`OMS_STALE_PENDING_CLOSED`), while a order that
    /// is still fresh survives and forces the whole reconcile tick to defer.
    #[test]
    fn reconcile_tick_cancels_stale_pending_order_and_defers_on_fresh_survivor() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = minimal_cfg(dir.path().join("wal.log").to_str().unwrap());
        cfg.reconcile.enabled = true;
        cfg.reconcile.pending_order_stale_ms = 10_000;
        let leaves = LeafConfigs::from_app_config(&cfg);

        let mock = Arc::new(MockAdapter::new());
        let adapter: Arc<dyn ExchangeAdapter> = mock.clone();
        let mut controller = BotController::new(cfg, leaves, adapter, Box::new(FlatStrategy)).unwrap();

        let stale_intent = pfcore_schemas::OrderIntent {
            client_order_id: "stale-1".to_string(),
            parent_order_id: None,
            symbol: "BTCUSDT".to_string(),
            purpose: OrderPurpose::Entry,
            reduce_only: false,
            direction: Direction::Up,
            qty: 1.0,
            price: 100.0,
            liquidity_preference: pfcore_schemas::LiquidityPreference::Maker,
        };
        let fresh_intent = pfcore_schemas::OrderIntent {
            client_order_id: "fresh-1".to_string(),
            parent_order_id: None,
            symbol: "BTCUSDT".to_string(),
            purpose: OrderPurpose::Entry,
            reduce_only: false,
            direction: Direction::Up,
            qty: 1.0,
            price: 100.0,
            liquidity_preference: pfcore_schemas::LiquidityPreference::Maker,
        };
        assert!(controller.durable_enqueue(stale_intent));
        assert!(controller.durable_enqueue(fresh_intent));

        // Both orders are still open at the venue; staleness here turns
        // purely on age, matching condition (b) of the pre-check.
        mock.set_open_order_client_ids(std::collections::BTreeSet::from([
            "stale-1".to_string(),
            "fresh-1".to_string(),
        ]));
        controller.pending_enqueued_ms.insert("stale-1".to_string(), 0);

        controller.reconcile_tick();

        // The executor's cancel call is processed on its worker thread;
        // give it a bounded window to land before checking the adapter.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !mock.cancelled().contains(&"stale-1".to_string()) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(mock.cancelled().contains(&"stale-1".to_string()));
        assert_eq!(
            controller.oms.get("stale-1").unwrap().state,
            pfcore_schemas::OrderState::Cancelled
        );
        assert!(!controller.pending_enqueued_ms.contains_key("stale-1"));

        assert_ne!(
            controller.oms.get("fresh-1").unwrap().state,
            pfcore_schemas::OrderState::Cancelled
        );
        assert!(controller.pending_enqueued_ms.contains_key("fresh-1"));

        // The reconcile check itself never ran: no resync was attempted
        // off the deferred tick.
        assert!(controller.last_auto_resync_tick.is_none());
        assert_eq!(controller.anomaly.reconcile_streak, 0);
    }
}
