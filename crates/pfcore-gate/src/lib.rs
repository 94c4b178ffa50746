//! Gate Monitor: rolling-window activity audit over signals/intents/fills,
//! plus optional controller-side runtime enforcement (reduce-only/halt) when
//! activity stays low across consecutive windows.
//!
//! Pure, deterministic. The caller drives ticks and window boundaries; this
//! crate holds no clock and no IO.

#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    pub window_ticks: u64,
    pub min_effective_signals: u64,
    pub min_fills: u64,
    pub heartbeat_empty_signal_ticks: u64,
    pub fail_to_reduce_only_windows: u32,
    pub fail_to_halt_windows: u32,
    pub pass_to_resume_windows: u32,
    pub resume_cooldown_ticks: u64,
    pub auto_resume_flat_ticks: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowCounters {
    pub raw_signals: u64,
    pub order_intents: u64,
    pub effective_signals: u64,
    pub fills: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowResult {
    pub pass: bool,
    pub counters: WindowCounters,
    pub fail_reasons: Vec<&'static str>,
}

/// Rolling-window counters plus the empty-signal heartbeat.
pub struct GateMonitor {
    cfg: GateConfig,
    counters: WindowCounters,
    tick_in_window: u64,
    consecutive_empty_signal_ticks: u64,
}

impl GateMonitor {
    pub fn new(cfg: GateConfig) -> Self {
        Self {
            cfg,
            counters: WindowCounters::default(),
            tick_in_window: 0,
            consecutive_empty_signal_ticks: 0,
        }
    }

    pub fn on_signal(&mut self, effective: bool) {
        self.counters.raw_signals += 1;
        if effective {
            self.counters.effective_signals += 1;
            self.consecutive_empty_signal_ticks = 0;
        } else {
            self.consecutive_empty_signal_ticks += 1;
            if self.consecutive_empty_signal_ticks == self.cfg.heartbeat_empty_signal_ticks {
                tracing::warn!(target: "pfcore_gate", "WARN_SIGNAL_HEARTBEAT_GAP");
            }
        }
    }

    pub fn on_intent(&mut self) {
        self.counters.order_intents += 1;
    }

    pub fn on_fill(&mut self) {
        self.counters.fills += 1;
    }

    /// Advance the window; returns `Some(WindowResult)` and resets counters
    /// once `tick_in_window` reaches `window_ticks`.
    pub fn on_tick(&mut self) -> Option<WindowResult> {
        self.tick_in_window += 1;
        if self.tick_in_window < self.cfg.window_ticks {
            return None;
        }

        let mut fail_reasons = Vec::new();
        if self.counters.effective_signals < self.cfg.min_effective_signals {
            fail_reasons.push("FAIL_LOW_ACTIVITY_SIGNALS");
        }
        if self.counters.fills < self.cfg.min_fills {
            fail_reasons.push("FAIL_LOW_ACTIVITY_FILLS");
        }
        let result = WindowResult {
            pass: fail_reasons.is_empty(),
            counters: self.counters,
            fail_reasons,
        };

        self.counters = WindowCounters::default();
        self.tick_in_window = 0;
        Some(result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateSafetyState {
    Normal,
    ReduceOnly,
    Halted,
}

/// Controller-side enforcement layered on top of window results: escalates
/// to reduce-only then halt across consecutive failing windows, and can
/// release itself on consecutive passing windows or sustained flat exposure.
#[derive(Debug)]
pub struct GateRuntime {
    state: GateSafetyState,
    consecutive_fail_windows: u32,
    consecutive_pass_windows: u32,
    cooldown_remaining_ticks: u64,
    flat_ticks: u64,
}

impl Default for GateRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl GateRuntime {
    pub fn new() -> Self {
        Self {
            state: GateSafetyState::Normal,
            consecutive_fail_windows: 0,
            consecutive_pass_windows: 0,
            cooldown_remaining_ticks: 0,
            flat_ticks: 0,
        }
    }

    pub fn on_window(&mut self, cfg: &GateConfig, result: &WindowResult) {
        if self.cooldown_remaining_ticks > 0 {
            self.cooldown_remaining_ticks = self.cooldown_remaining_ticks.saturating_sub(cfg.window_ticks);
        }

        if result.pass {
            self.consecutive_fail_windows = 0;
            self.consecutive_pass_windows += 1;
        } else {
            self.consecutive_pass_windows = 0;
            self.consecutive_fail_windows += 1;
        }

        if self.state != GateSafetyState::Halted && self.consecutive_fail_windows >= cfg.fail_to_halt_windows {
            self.enter(GateSafetyState::Halted, cfg);
        } else if self.state == GateSafetyState::Normal && self.consecutive_fail_windows >= cfg.fail_to_reduce_only_windows
        {
            self.enter(GateSafetyState::ReduceOnly, cfg);
        }

        if self.state != GateSafetyState::Normal
            && self.cooldown_remaining_ticks == 0
            && self.consecutive_pass_windows >= cfg.pass_to_resume_windows
        {
            self.release();
        }
    }

    fn enter(&mut self, state: GateSafetyState, cfg: &GateConfig) {
        self.state = state;
        self.cooldown_remaining_ticks = cfg.resume_cooldown_ticks;
        match state {
            GateSafetyState::Halted => tracing::error!(target: "pfcore_gate", "GATE_HALTED"),
            GateSafetyState::ReduceOnly => tracing::warn!(target: "pfcore_gate", "GATE_REDUCE_ONLY"),
            GateSafetyState::Normal => {}
        }
    }

    /// Sustained flat exposure with no pending net-position orders is an
    /// independent release path, evaluated once per tick.
    pub fn on_account_tick(&mut self, cfg: &GateConfig, is_flat: bool, has_pending_net_orders: bool) {
        if self.state == GateSafetyState::Normal {
            self.flat_ticks = 0;
            return;
        }
        if is_flat && !has_pending_net_orders {
            self.flat_ticks += 1;
            if self.flat_ticks >= cfg.auto_resume_flat_ticks {
                self.release();
            }
        } else {
            self.flat_ticks = 0;
        }
    }

    fn release(&mut self) {
        self.state = GateSafetyState::Normal;
        self.consecutive_fail_windows = 0;
        self.consecutive_pass_windows = 0;
        self.cooldown_remaining_ticks = 0;
        self.flat_ticks = 0;
        tracing::info!(target: "pfcore_gate", "GATE_RESUMED");
    }

    pub fn forced_reduce_only(&self) -> bool {
        matches!(self.state, GateSafetyState::ReduceOnly | GateSafetyState::Halted)
    }

    pub fn halted(&self) -> bool {
        self.state == GateSafetyState::Halted
    }

    pub fn state(&self) -> GateSafetyState {
        self.state
    }
}
