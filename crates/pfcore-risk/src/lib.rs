//! Risk Engine: drawdown-to-mode mapping, notional caps, forced reduce-only.
//!
//! Deterministic, pure logic. No IO, no time, no broker calls.

use pfcore_schemas::{RiskAdjustedPosition, RiskMode, RiskThresholds};

#[derive(Debug, Clone, Copy)]
pub struct RiskConfig {
    pub max_abs_notional_usd: f64,
    pub thresholds: RiskThresholds,
}

/// Resolve the effective risk mode for the current drawdown and safety state.
pub fn resolve_mode(cfg: &RiskConfig, drawdown_pct: f64, trade_ok: bool, forced_reduce_only: bool) -> RiskMode {
    if !trade_ok || forced_reduce_only {
        return RiskMode::ReduceOnly;
    }
    if drawdown_pct >= cfg.thresholds.fuse {
        RiskMode::Fuse
    } else if drawdown_pct >= cfg.thresholds.cooldown {
        RiskMode::Cooldown
    } else if drawdown_pct >= cfg.thresholds.degraded {
        RiskMode::Degraded
    } else {
        RiskMode::Normal
    }
}

/// Clamp the raw target into `[-max_abs_notional, max_abs_notional]`, then
/// apply the mode's scaling/reduce-only semantics.
pub fn apply(
    cfg: &RiskConfig,
    target_notional_usd: f64,
    drawdown_pct: f64,
    trade_ok: bool,
    forced_reduce_only: bool,
) -> RiskAdjustedPosition {
    let mode = resolve_mode(cfg, drawdown_pct, trade_ok, forced_reduce_only);
    let clamped = target_notional_usd.clamp(-cfg.max_abs_notional_usd, cfg.max_abs_notional_usd);

    let (adjusted, reduce_only) = match mode {
        RiskMode::Normal => (clamped, false),
        RiskMode::Degraded => (clamped * 0.5, false),
        RiskMode::Cooldown => (0.0, true),
        RiskMode::Fuse => (0.0, true),
        RiskMode::ReduceOnly => (0.0, true),
    };

    RiskAdjustedPosition {
        adjusted_notional_usd: adjusted,
        reduce_only,
        risk_mode: mode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RiskConfig {
        RiskConfig {
            max_abs_notional_usd: 500.0,
            thresholds: RiskThresholds {
                degraded: 0.08,
                cooldown: 0.12,
                fuse: 0.20,
            },
        }
    }

    #[test]
    fn scenario_c_risk_mode_transitions() {
        let c = cfg();
        let r = apply(&c, 500.0, 0.01, true, false);
        assert_eq!(r.risk_mode, RiskMode::Normal);
        assert_eq!(r.adjusted_notional_usd, 500.0);

        let r = apply(&c, 500.0, 0.09, true, false);
        assert_eq!(r.risk_mode, RiskMode::Degraded);
        assert_eq!(r.adjusted_notional_usd, 250.0);

        let r = apply(&c, 500.0, 0.13, true, false);
        assert_eq!(r.risk_mode, RiskMode::Cooldown);
        assert_eq!(r.adjusted_notional_usd, 0.0);
        assert!(r.reduce_only);

        let r = apply(&c, 500.0, 0.21, true, false);
        assert_eq!(r.risk_mode, RiskMode::Fuse);
        assert!(r.reduce_only);

        let r = apply(&c, 500.0, 0.00, true, true);
        assert_eq!(r.risk_mode, RiskMode::ReduceOnly);
    }

    #[test]
    fn target_is_clamped_before_mode_scaling() {
        let c = cfg();
        let r = apply(&c, 10_000.0, 0.0, true, false);
        assert_eq!(r.adjusted_notional_usd, 500.0);
    }

    #[test]
    fn trade_not_ok_forces_reduce_only_regardless_of_drawdown() {
        let c = cfg();
        let r = apply(&c, 500.0, 0.0, false, false);
        assert_eq!(r.risk_mode, RiskMode::ReduceOnly);
        assert!(r.reduce_only);
    }
}
