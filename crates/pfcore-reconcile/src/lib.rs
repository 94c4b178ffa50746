//! Reconciliation: compares locally-tracked notional against the venue's
//! reported notional, and two orthogonal streak-driven safety state
//! machines layered on top of repeated check outcomes.
//!
//! The two-phase grace/auto-resync protocol and the pending-order
//! staleness pre-check are orchestration, not pure logic, and live in the
//! Bot Controller; this crate provides the deterministic pieces it calls.

use pfcore_schemas::EPSILON;

/// Result of one point-in-time notional comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckResult {
    pub ok: bool,
    pub delta_notional_usd: f64,
}

/// Compare local notional against remote (if available) or a locally
/// computed fallback (net filled qty times mark price).
pub fn check(local_notional_usd: f64, remote_notional_usd: Option<f64>, fallback_notional_usd: f64, tolerance_notional_usd: f64) -> CheckResult {
    let expected = remote_notional_usd.unwrap_or(fallback_notional_usd);
    let delta = local_notional_usd - expected;
    CheckResult {
        ok: delta.abs() <= tolerance_notional_usd,
        delta_notional_usd: delta,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcileConfig {
    pub tolerance_notional_usd: f64,
    pub mismatch_confirmations: u32,
    pub anomaly_reduce_only_streak: u32,
    pub anomaly_halt_streak: u32,
    pub anomaly_resume_streak: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            tolerance_notional_usd: 0.0,
            mismatch_confirmations: 1,
            anomaly_reduce_only_streak: u32::MAX,
            anomaly_halt_streak: u32::MAX,
            anomaly_resume_streak: 1,
        }
    }
}

/// Two orthogonal streak state machines driven by repeated reconcile
/// outcomes: a hard mismatch-streak halt, and a softer anomaly-streak
/// reduce-only/halt pair that can recover on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnomalyTracker {
    pub reconcile_streak: u32,
    pub anomaly_streak: u32,
    pub healthy_streak: u32,
    pub reconcile_halted: bool,
    pub anomaly_forced_reduce_only: bool,
    pub anomaly_halted: bool,
}

impl AnomalyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clean check: clears both streaks and may release the soft
    /// anomaly safety states after enough consecutive healthy ticks.
    /// Never clears `reconcile_halted` — that requires an operator.
    pub fn on_ok(&mut self, cfg: &ReconcileConfig) {
        self.reconcile_streak = 0;
        self.anomaly_streak = 0;
        self.healthy_streak += 1;

        if self.healthy_streak >= cfg.anomaly_resume_streak {
            if self.anomaly_forced_reduce_only {
                self.anomaly_forced_reduce_only = false;
                tracing::info!(target: "pfcore_reconcile", "OMS_RECONCILE_ANOMALY_PROTECTION_EXIT");
            }
            if self.anomaly_halted {
                self.anomaly_halted = false;
                tracing::info!(target: "pfcore_reconcile", "anomaly halt auto-released");
            }
        }
    }

    /// Transient grace-window tick: reset the mismatch-confirmation streak
    /// only, leaving the anomaly streak untouched.
    pub fn on_grace(&mut self) {
        self.reconcile_streak = 0;
        self.healthy_streak = 0;
        tracing::info!(target: "pfcore_reconcile", "OMS_RECONCILE_GRACE");
    }

    /// The tick's reconcile check was skipped entirely because fresh
    /// pending net-position orders survived the stale pre-check; not
    /// itself evidence of a mismatch, so only the confirmation streak
    /// resets.
    pub fn on_deferred(&mut self) {
        self.reconcile_streak = 0;
        tracing::info!(target: "pfcore_reconcile", "OMS_RECONCILE_DEFERRED");
    }

    /// The remote notional could not be acquired at all this tick.
    pub fn on_degraded(&mut self, cfg: &ReconcileConfig) {
        self.healthy_streak = 0;
        self.anomaly_streak += 1;
        tracing::warn!(target: "pfcore_reconcile", streak = self.anomaly_streak, "OMS_RECONCILE_DEGRADED");
        self.apply_anomaly_thresholds(cfg);
    }

    /// A confirmed delta mismatch this tick (post grace-window refresh).
    pub fn on_mismatch(&mut self, cfg: &ReconcileConfig) {
        self.healthy_streak = 0;
        self.reconcile_streak += 1;
        self.anomaly_streak += 1;
        tracing::warn!(
            target: "pfcore_reconcile",
            reconcile_streak = self.reconcile_streak,
            anomaly_streak = self.anomaly_streak,
            "OMS_RECONCILE_MISMATCH"
        );

        if self.reconcile_streak >= cfg.mismatch_confirmations {
            self.reconcile_halted = true;
            tracing::error!(target: "pfcore_reconcile", "CRITICAL: Reconcile mismatch confirmed. Halting trading.");
        }
        self.apply_anomaly_thresholds(cfg);
    }

    /// Auto-resync succeeded: the mismatch streak is cleared (positions are
    /// now known-consistent by construction) but the anomaly streak is left
    /// for the caller's `on_ok` on the next clean tick.
    pub fn on_autoresync(&mut self) {
        self.reconcile_streak = 0;
        tracing::warn!(target: "pfcore_reconcile", "OMS_RECONCILE_AUTORESYNC");
    }

    fn apply_anomaly_thresholds(&mut self, cfg: &ReconcileConfig) {
        if !self.anomaly_forced_reduce_only && self.anomaly_streak >= cfg.anomaly_reduce_only_streak {
            self.anomaly_forced_reduce_only = true;
            tracing::warn!(target: "pfcore_reconcile", "OMS_RECONCILE_ANOMALY_PROTECTION_ENTER");
        }
        if !self.anomaly_halted && self.anomaly_streak >= cfg.anomaly_halt_streak {
            self.anomaly_halted = true;
            tracing::error!(target: "pfcore_reconcile", "OMS_RECONCILE_ANOMALY_HALT_ENTER");
        }
    }

    pub fn trading_halted(&self) -> bool {
        self.reconcile_halted || self.anomaly_halted
    }

    pub fn forced_reduce_only(&self) -> bool {
        self.anomaly_forced_reduce_only
    }
}

#[allow(dead_code)]
fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= EPSILON
}
