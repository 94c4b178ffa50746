//! Fee-aware entry gate: only applies to Entry intents. Computes a
//! round-trip cost floor, an expected-edge estimate derived from regime, and
//! a required-edge bar (with adaptive relaxations), then decides whether the
//! entry clears the bar — with a narrow near-miss override for maker entries.

use std::collections::HashMap;

use pfcore_schemas::{Direction, RegimeBucket, RegimeState};

#[derive(Debug, Clone, Copy)]
pub struct EntryGateConfig {
    pub enabled: bool,

    pub entry_fee_bps: f64,
    pub exit_fee_bps: f64,
    pub expected_slippage_bps: f64,

    pub min_expected_edge_bps: f64,
    pub required_edge_cap_bps: Option<f64>,
    pub strategy_deadband_abs: f64,

    pub near_miss_tolerance_bps: f64,
    pub near_miss_maker_allow: bool,
    pub near_miss_maker_max_gap_bps: f64,

    pub adaptive_relax_enabled: bool,
    pub adaptive_relax_trigger_ratio: f64,
    pub adaptive_relax_max_bps: f64,
    pub adaptive_relax_min_samples: u64,

    pub maker_relax_bps: f64,

    pub dynamic_edge_enabled: bool,
    pub trend_bucket_adjust_bps: f64,
    pub range_bucket_adjust_bps: f64,
    pub extreme_bucket_adjust_bps: f64,
    pub volatility_threshold: f64,
    pub volatility_adjust_bps: f64,
    pub maker_fill_ratio_high_threshold: f64,
    pub liquidity_relax_bps: f64,
    pub unknown_liquidity_ratio_high_threshold: f64,
    pub liquidity_penalty_bps: f64,

    pub quality_guard_penalty_bps: f64,

    pub cooldown_trigger_count: u32,
    pub cooldown_ticks: u64,
}

impl Default for EntryGateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            entry_fee_bps: 0.0,
            exit_fee_bps: 0.0,
            expected_slippage_bps: 0.0,
            min_expected_edge_bps: 0.0,
            required_edge_cap_bps: None,
            strategy_deadband_abs: 0.0,
            near_miss_tolerance_bps: 0.0,
            near_miss_maker_allow: false,
            near_miss_maker_max_gap_bps: 0.0,
            adaptive_relax_enabled: false,
            adaptive_relax_trigger_ratio: 1.0,
            adaptive_relax_max_bps: 0.0,
            adaptive_relax_min_samples: 0,
            maker_relax_bps: 0.0,
            dynamic_edge_enabled: false,
            trend_bucket_adjust_bps: 0.0,
            range_bucket_adjust_bps: 0.0,
            extreme_bucket_adjust_bps: 0.0,
            volatility_threshold: f64::INFINITY,
            volatility_adjust_bps: 0.0,
            maker_fill_ratio_high_threshold: 2.0,
            liquidity_relax_bps: 0.0,
            unknown_liquidity_ratio_high_threshold: 2.0,
            liquidity_penalty_bps: 0.0,
            quality_guard_penalty_bps: 0.0,
            cooldown_trigger_count: u32::MAX,
            cooldown_ticks: 0,
        }
    }
}

/// The full set of intermediate terms behind an entry-gate decision,
/// returned as one struct instead of a wall of output parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryGateEvaluation {
    pub allow: bool,
    pub round_trip_cost_bps: f64,
    pub expected_edge_bps: f64,
    pub required_edge_bps: f64,
    pub edge_gap_bps: f64,
    pub near_miss: bool,
    pub near_miss_maker_override: bool,
    pub in_cooldown: bool,
}

/// Extra context the caller supplies per evaluation: recent maker viability
/// and fill-quality statistics the gate cannot observe on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryGateContext {
    pub maker_viable: bool,
    pub recent_maker_fill_ratio: f64,
    pub recent_unknown_liquidity_ratio: f64,
    pub quality_guard_active: bool,
}

#[derive(Debug, Clone, Default)]
struct SymbolState {
    consecutive_rejections: u32,
    cooldown_until_tick: u64,
}

#[derive(Debug, Clone)]
pub struct EntryGate {
    cfg: EntryGateConfig,
    accepted: u64,
    rejected: u64,
    per_symbol: HashMap<String, SymbolState>,
}

impl EntryGate {
    pub fn new(cfg: EntryGateConfig) -> Self {
        Self {
            cfg,
            accepted: 0,
            rejected: 0,
            per_symbol: HashMap::new(),
        }
    }

    fn observed_filtered_ratio(&self) -> f64 {
        let total = self.accepted + self.rejected;
        if total == 0 {
            0.0
        } else {
            self.rejected as f64 / total as f64
        }
    }

    pub fn in_cooldown(&self, symbol: &str, tick: u64) -> bool {
        self.per_symbol
            .get(symbol)
            .map(|s| tick < s.cooldown_until_tick)
            .unwrap_or(false)
    }

    /// Evaluate an Entry intent. `direction`/`price`/`regime` describe the
    /// candidate entry; bypassing this gate entirely for Reduce/SL/TP
    /// intents is the caller's responsibility.
    pub fn evaluate(
        &mut self,
        symbol: &str,
        tick: u64,
        direction: Direction,
        price: f64,
        regime: &RegimeState,
        ctx: &EntryGateContext,
    ) -> EntryGateEvaluation {
        let in_cooldown = self.in_cooldown(symbol, tick);

        let round_trip_cost_bps =
            self.cfg.entry_fee_bps + self.cfg.exit_fee_bps + 2.0 * self.cfg.expected_slippage_bps;

        let deadband_bps = if price > 0.0 {
            (self.cfg.strategy_deadband_abs / price) * 10_000.0
        } else {
            0.0
        };
        let dir_sign = direction.sign();
        let trend_component = (regime.trend_strength * dir_sign * 10_000.0).max(0.0);
        let instant_component = (regime.instant_return * dir_sign * 10_000.0).max(0.0);
        let expected_edge_bps = (0.6 * trend_component + 0.4 * instant_component).max(deadband_bps);

        let mut required_edge_bps = round_trip_cost_bps + self.cfg.min_expected_edge_bps;
        if let Some(cap) = self.cfg.required_edge_cap_bps {
            required_edge_bps = required_edge_bps.min(cap);
        }

        if self.cfg.adaptive_relax_enabled {
            let total = self.accepted + self.rejected;
            if total >= self.cfg.adaptive_relax_min_samples {
                let ratio = self.observed_filtered_ratio();
                if ratio > self.cfg.adaptive_relax_trigger_ratio {
                    let span = (1.0 - self.cfg.adaptive_relax_trigger_ratio).max(1e-9);
                    let over = (ratio - self.cfg.adaptive_relax_trigger_ratio) / span;
                    required_edge_bps -= self.cfg.adaptive_relax_max_bps * over.min(1.0);
                }
            }
        }

        if ctx.maker_viable {
            required_edge_bps -= self.cfg.maker_relax_bps;
        }

        if self.cfg.dynamic_edge_enabled {
            required_edge_bps += match regime.bucket {
                RegimeBucket::Trend => -self.cfg.trend_bucket_adjust_bps,
                RegimeBucket::Range => self.cfg.range_bucket_adjust_bps,
                RegimeBucket::Extreme => self.cfg.extreme_bucket_adjust_bps,
            };

            if regime.volatility_level > self.cfg.volatility_threshold {
                required_edge_bps += self.cfg.volatility_adjust_bps;
            } else {
                required_edge_bps -= self.cfg.volatility_adjust_bps;
            }

            if ctx.recent_maker_fill_ratio >= self.cfg.maker_fill_ratio_high_threshold {
                required_edge_bps -= self.cfg.liquidity_relax_bps;
            }
            if ctx.recent_unknown_liquidity_ratio >= self.cfg.unknown_liquidity_ratio_high_threshold {
                required_edge_bps += self.cfg.liquidity_penalty_bps;
            }
        }

        if ctx.quality_guard_active {
            required_edge_bps += self.cfg.quality_guard_penalty_bps;
        }

        required_edge_bps = required_edge_bps.max(0.0);

        let edge_gap_bps = required_edge_bps - expected_edge_bps;
        let tolerance = self.cfg.near_miss_tolerance_bps;
        let near_miss_band_hi = tolerance + tolerance.max(0.05);
        let near_miss = edge_gap_bps > tolerance && edge_gap_bps <= near_miss_band_hi;

        let mut near_miss_maker_override = false;
        let mut allow = edge_gap_bps <= tolerance;

        if !allow
            && near_miss
            && ctx.maker_viable
            && self.cfg.near_miss_maker_allow
            && edge_gap_bps <= tolerance + self.cfg.near_miss_maker_max_gap_bps
        {
            near_miss_maker_override = true;
            allow = true;
        }

        if !self.cfg.enabled {
            allow = true;
        }
        if in_cooldown {
            allow = false;
        }

        if allow {
            self.accepted += 1;
            self.per_symbol.remove(symbol);
        } else {
            self.rejected += 1;
            let state = self.per_symbol.entry(symbol.to_string()).or_default();
            state.consecutive_rejections += 1;
            if state.consecutive_rejections >= self.cfg.cooldown_trigger_count {
                state.cooldown_until_tick = tick + self.cfg.cooldown_ticks;
            }
        }

        EntryGateEvaluation {
            allow,
            round_trip_cost_bps,
            expected_edge_bps,
            required_edge_bps,
            edge_gap_bps,
            near_miss,
            near_miss_maker_override,
            in_cooldown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regime(trend_strength: f64, instant_return: f64, bucket: RegimeBucket) -> RegimeState {
        use pfcore_schemas::Regime;
        RegimeState {
            regime: match bucket {
                RegimeBucket::Trend => Regime::Uptrend,
                RegimeBucket::Range => Regime::Range,
                RegimeBucket::Extreme => Regime::Extreme,
            },
            bucket,
            instant_return,
            trend_strength,
            volatility_level: 0.0,
            warmup: false,
        }
    }

    #[test]
    fn disabled_gate_always_allows() {
        let mut gate = EntryGate::new(EntryGateConfig {
            enabled: false,
            ..Default::default()
        });
        let ev = gate.evaluate(
            "BTCUSDT",
            0,
            Direction::Up,
            100.0,
            &regime(0.0, 0.0, RegimeBucket::Range),
            &EntryGateContext::default(),
        );
        assert!(ev.allow);
    }

    #[test]
    fn insufficient_edge_is_filtered() {
        let mut gate = EntryGate::new(EntryGateConfig {
            entry_fee_bps: 5.0,
            exit_fee_bps: 5.0,
            expected_slippage_bps: 2.0,
            ..Default::default()
        });
        let ev = gate.evaluate(
            "BTCUSDT",
            0,
            Direction::Up,
            100.0,
            &regime(0.0001, 0.0, RegimeBucket::Range),
            &EntryGateContext::default(),
        );
        assert!(!ev.allow);
        assert!(ev.required_edge_bps > ev.expected_edge_bps);
    }

    #[test]
    fn near_miss_maker_override_allows_small_gap() {
        let mut gate = EntryGate::new(EntryGateConfig {
            entry_fee_bps: 1.0,
            exit_fee_bps: 1.0,
            expected_slippage_bps: 0.5,
            near_miss_tolerance_bps: 0.5,
            near_miss_maker_allow: true,
            near_miss_maker_max_gap_bps: 1.0,
            ..Default::default()
        });
        let ctx = EntryGateContext {
            maker_viable: true,
            ..Default::default()
        };
        let ev = gate.evaluate(
            "BTCUSDT",
            0,
            Direction::Up,
            100.0,
            &regime(0.0002, 0.0, RegimeBucket::Range),
            &ctx,
        );
        assert!(ev.allow);
        assert!(ev.near_miss_maker_override);
    }

    #[test]
    fn consecutive_rejections_trigger_cooldown() {
        let mut gate = EntryGate::new(EntryGateConfig {
            entry_fee_bps: 50.0,
            exit_fee_bps: 50.0,
            cooldown_trigger_count: 2,
            cooldown_ticks: 10,
            ..Default::default()
        });
        let flat_regime = regime(0.0, 0.0, RegimeBucket::Range);
        let ctx = EntryGateContext::default();
        let ev1 = gate.evaluate("BTCUSDT", 0, Direction::Up, 100.0, &flat_regime, &ctx);
        assert!(!ev1.allow);
        let ev2 = gate.evaluate("BTCUSDT", 1, Direction::Up, 100.0, &flat_regime, &ctx);
        assert!(!ev2.allow);
        assert!(gate.in_cooldown("BTCUSDT", 5));
        assert!(!gate.in_cooldown("BTCUSDT", 11));
    }
}
