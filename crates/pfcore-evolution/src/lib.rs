//! Evolution Controller: per-regime-bucket trend/defensive weight blending,
//! with windowed evaluation, rollback on sustained underperformance, and an
//! optional counterfactual-search or factor-IC-adaptive weight proposal.
//!
//! Pure, deterministic. All inputs (pnl, drawdown, churn, forward returns)
//! are supplied by the caller tick by tick; this crate holds no clock.

use std::collections::{BTreeMap, VecDeque};

use pfcore_schemas::RegimeBucket;

const COUNTERFACTUAL_GRID: [f64; 11] = [0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0];
const WEIGHT_EPSILON: f64 = 1e-6;
const IMPROVEMENT_EPSILON: f64 = 1e-6;
const OBJECTIVE_DEGRADE_THRESHOLD: f64 = 0.0;

#[derive(Debug, Clone, Copy)]
pub struct EvolutionConfig {
    pub enabled: bool,
    pub update_interval_ticks: u64,
    pub min_bucket_ticks_for_update: u64,
    pub min_abs_window_pnl_usd: f64,
    pub max_weight_step: f64,
    pub max_single_strategy_weight: f64,
    pub rollback_degrade_windows: usize,
    pub rollback_cooldown_ticks: u64,
    pub objective_alpha: f64,
    pub objective_beta: f64,
    pub objective_gamma: f64,
    pub initial_trend_weight: f64,
    pub initial_defensive_weight: f64,
    pub enable_factor_ic_adaptive_weights: bool,
    pub factor_ic_min_samples: u64,
    pub factor_ic_min_abs: f64,
    pub enable_learnability_gate: bool,
    pub learnability_min_samples: u64,
    pub learnability_min_t_stat_abs: f64,
    pub use_virtual_pnl: bool,
    pub use_counterfactual_search: bool,
    pub virtual_cost_bps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketWeights {
    pub trend_weight: f64,
    pub defensive_weight: f64,
}

impl BucketWeights {
    fn clamp_complementary(trend_weight: f64) -> Self {
        let trend_weight = trend_weight.clamp(0.0, 1.0);
        Self {
            trend_weight,
            defensive_weight: 1.0 - trend_weight,
        }
    }

    fn is_valid(&self, max_single: f64) -> bool {
        self.trend_weight >= -WEIGHT_EPSILON
            && self.defensive_weight >= -WEIGHT_EPSILON
            && (self.trend_weight + self.defensive_weight - 1.0).abs() < 1e-6
            && self.trend_weight <= max_single + WEIGHT_EPSILON
            && self.defensive_weight <= max_single + WEIGHT_EPSILON
    }

    fn approx_eq(&self, other: &Self) -> bool {
        (self.trend_weight - other.trend_weight).abs() < WEIGHT_EPSILON
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct IcAccumulator {
    n: u64,
    sum_x: f64,
    sum_y: f64,
    sum_xy: f64,
    sum_x2: f64,
    sum_y2: f64,
}

impl IcAccumulator {
    fn update(&mut self, x: f64, y: f64) {
        self.n += 1;
        self.sum_x += x;
        self.sum_y += y;
        self.sum_xy += x * y;
        self.sum_x2 += x * x;
        self.sum_y2 += y * y;
    }

    fn correlation(&self) -> Option<f64> {
        if self.n < 2 {
            return None;
        }
        let n = self.n as f64;
        let cov = self.sum_xy - self.sum_x * self.sum_y / n;
        let var_x = self.sum_x2 - self.sum_x * self.sum_x / n;
        let var_y = self.sum_y2 - self.sum_y * self.sum_y / n;
        if var_x <= 0.0 || var_y <= 0.0 {
            return Some(0.0);
        }
        Some(cov / (var_x.sqrt() * var_y.sqrt()))
    }
}

#[derive(Debug, Clone, Default)]
struct WindowAccumulator {
    pnl: f64,
    max_drawdown_pct: f64,
    notional_churn: f64,
    tick_count: u64,
    pnl_samples: Vec<f64>,
    prev_blended: Option<f64>,
    virtual_pnl: f64,
    trend_ic: IcAccumulator,
    defensive_ic: IcAccumulator,
    grid_prev_blended: [Option<f64>; COUNTERFACTUAL_GRID.len()],
    grid_virtual_pnl: [f64; COUNTERFACTUAL_GRID.len()],
}

#[derive(Debug, Clone)]
struct BucketState {
    weights: BucketWeights,
    rollback_anchor: BucketWeights,
    degrade_history: VecDeque<bool>,
    cooldown_remaining_ticks: u64,
    window: WindowAccumulator,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvolutionAction {
    Updated {
        bucket: RegimeBucket,
        weights: BucketWeights,
    },
    RolledBack {
        bucket: RegimeBucket,
        weights: BucketWeights,
    },
    Skipped {
        bucket: RegimeBucket,
        reason: &'static str,
    },
}

pub struct EvolutionController {
    cfg: EvolutionConfig,
    buckets: BTreeMap<RegimeBucket, BucketState>,
    ticks_since_window: u64,
}

impl EvolutionController {
    pub fn new(cfg: EvolutionConfig) -> Self {
        let initial = BucketWeights {
            trend_weight: cfg.initial_trend_weight,
            defensive_weight: cfg.initial_defensive_weight,
        };

        let mut buckets = BTreeMap::new();
        for bucket in [RegimeBucket::Trend, RegimeBucket::Range, RegimeBucket::Extreme] {
            buckets.insert(
                bucket,
                BucketState {
                    weights: initial,
                    rollback_anchor: initial,
                    degrade_history: VecDeque::with_capacity(cfg.rollback_degrade_windows),
                    cooldown_remaining_ticks: 0,
                    window: WindowAccumulator::default(),
                },
            );
        }

        Self {
            cfg,
            buckets,
            ticks_since_window: 0,
        }
    }

    pub fn weights(&self, bucket: RegimeBucket) -> BucketWeights {
        self.buckets[&bucket].weights
    }

    /// Accumulate one tick's window statistics for the active bucket.
    #[allow(clippy::too_many_arguments)]
    pub fn on_tick(
        &mut self,
        bucket: RegimeBucket,
        trend_component: f64,
        defensive_component: f64,
        forward_return: f64,
        pnl_usd: f64,
        drawdown_pct: f64,
        notional_churn: f64,
    ) {
        if !self.cfg.enabled {
            return;
        }
        let turnover_cost = self.cfg.virtual_cost_bps / 10_000.0;
        let state = self.buckets.get_mut(&bucket).unwrap();
        let window = &mut state.window;

        window.pnl += pnl_usd;
        window.max_drawdown_pct = window.max_drawdown_pct.max(drawdown_pct);
        window.notional_churn += notional_churn;
        window.tick_count += 1;
        window.pnl_samples.push(pnl_usd);

        if self.cfg.use_virtual_pnl {
            let blended = state.weights.trend_weight * trend_component + state.weights.defensive_weight * defensive_component;
            if let Some(prev) = window.prev_blended {
                window.virtual_pnl += prev * forward_return - (blended - prev).abs() * turnover_cost;
            }
            window.prev_blended = Some(blended);

            for (i, &trend_w) in COUNTERFACTUAL_GRID.iter().enumerate() {
                let grid_blended = trend_w * trend_component + (1.0 - trend_w) * defensive_component;
                if let Some(prev) = window.grid_prev_blended[i] {
                    window.grid_virtual_pnl[i] += prev * forward_return - (grid_blended - prev).abs() * turnover_cost;
                }
                window.grid_prev_blended[i] = Some(grid_blended);
            }
        }

        window.trend_ic.update(trend_component, forward_return);
        window.defensive_ic.update(defensive_component, forward_return);
    }

    /// Call once per tick; evaluates and applies the window decision when
    /// `tick` reaches a window boundary.
    pub fn on_maybe_window_close(&mut self) -> Option<EvolutionAction> {
        if !self.cfg.enabled {
            return None;
        }
        self.ticks_since_window += 1;
        if self.ticks_since_window < self.cfg.update_interval_ticks {
            return None;
        }
        self.ticks_since_window = 0;

        for state in self.buckets.values_mut() {
            state.cooldown_remaining_ticks = state.cooldown_remaining_ticks.saturating_sub(self.cfg.update_interval_ticks);
        }

        let active_bucket = *self
            .buckets
            .iter()
            .max_by_key(|(_, s)| s.window.tick_count)
            .map(|(bucket, _)| bucket)?;

        let action = self.decide(active_bucket);
        self.reset_all_windows();
        action
    }

    fn decide(&mut self, bucket: RegimeBucket) -> Option<EvolutionAction> {
        let cfg = self.cfg;
        let state = self.buckets.get_mut(&bucket).unwrap();
        let window = state.window.clone();

        if window.tick_count == 0 {
            return None;
        }
        if window.tick_count < cfg.min_bucket_ticks_for_update {
            return None;
        }
        if state.cooldown_remaining_ticks > 0 {
            return None;
        }
        if window.pnl.abs() < cfg.min_abs_window_pnl_usd {
            return None;
        }
        if cfg.enable_learnability_gate {
            let n = window.pnl_samples.len() as u64;
            if n < cfg.learnability_min_samples {
                return None;
            }
            let mean = window.pnl_samples.iter().sum::<f64>() / n as f64;
            let variance = window
                .pnl_samples
                .iter()
                .map(|x| (x - mean).powi(2))
                .sum::<f64>()
                / n as f64;
            let stderr = (variance.sqrt()) / (n as f64).sqrt();
            let t_stat = if stderr > 0.0 { mean / stderr } else { 0.0 };
            if t_stat.abs() <= cfg.learnability_min_t_stat_abs {
                return None;
            }
        }

        let objective_score =
            cfg.objective_alpha * window.pnl - cfg.objective_beta * (window.max_drawdown_pct * 10_000.0) - cfg.objective_gamma * window.notional_churn;

        let degraded = objective_score <= OBJECTIVE_DEGRADE_THRESHOLD;
        state.degrade_history.push_back(degraded);
        while state.degrade_history.len() > cfg.rollback_degrade_windows {
            state.degrade_history.pop_front();
        }

        if state.degrade_history.len() == cfg.rollback_degrade_windows && state.degrade_history.iter().all(|&d| d) {
            let weights = state.rollback_anchor;
            state.weights = weights;
            state.cooldown_remaining_ticks = cfg.rollback_cooldown_ticks;
            state.degrade_history.clear();
            tracing::warn!(target: "pfcore_evolution", bucket = ?bucket, "EVOLUTION_ROLLBACK_TRIGGERED");
            return Some(EvolutionAction::RolledBack { bucket, weights });
        }

        let current = state.weights;
        let proposed = if cfg.use_counterfactual_search {
            let (best_idx, best_pnl) = window
                .grid_virtual_pnl
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .unwrap();
            if best_pnl - window.virtual_pnl >= IMPROVEMENT_EPSILON {
                let target = COUNTERFACTUAL_GRID[best_idx];
                step_toward(current.trend_weight, target, cfg.max_weight_step)
            } else {
                current.trend_weight
            }
        } else if cfg.enable_factor_ic_adaptive_weights {
            let trend_ic = window.trend_ic.correlation().unwrap_or(0.0);
            let defensive_ic = window.defensive_ic.correlation().unwrap_or(0.0);
            let samples_ok = window.trend_ic.n >= cfg.factor_ic_min_samples && window.defensive_ic.n >= cfg.factor_ic_min_samples;
            let magnitude_ok = trend_ic.abs() >= cfg.factor_ic_min_abs || defensive_ic.abs() >= cfg.factor_ic_min_abs;
            if samples_ok && magnitude_ok && (trend_ic + defensive_ic).abs() > 1e-9 {
                let target = (trend_ic / (trend_ic + defensive_ic)).clamp(0.0, 1.0);
                step_toward(current.trend_weight, target, cfg.max_weight_step)
            } else {
                current.trend_weight
            }
        } else if objective_score > OBJECTIVE_DEGRADE_THRESHOLD {
            (current.trend_weight + cfg.max_weight_step).min(1.0)
        } else {
            (current.trend_weight - cfg.max_weight_step).max(0.0)
        };

        let proposed_weights = BucketWeights::clamp_complementary(proposed);

        if !proposed_weights.is_valid(cfg.max_single_strategy_weight) {
            tracing::warn!(target: "pfcore_evolution", bucket = ?bucket, "PORT_WEIGHT_INVALID_REJECTED");
            return Some(EvolutionAction::Skipped {
                bucket,
                reason: "PORT_WEIGHT_INVALID_REJECTED",
            });
        }

        if proposed_weights.approx_eq(&current) {
            return Some(EvolutionAction::Skipped { bucket, reason: "no_change" });
        }

        state.rollback_anchor = current;
        state.weights = proposed_weights;
        tracing::info!(target: "pfcore_evolution", bucket = ?bucket, trend_weight = proposed_weights.trend_weight, "SELF_EVOLUTION_ACTION");
        Some(EvolutionAction::Updated {
            bucket,
            weights: proposed_weights,
        })
    }

    fn reset_all_windows(&mut self) {
        for state in self.buckets.values_mut() {
            state.window = WindowAccumulator::default();
        }
    }
}

fn step_toward(current: f64, target: f64, max_step: f64) -> f64 {
    current + (target - current).clamp(-max_step, max_step)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> EvolutionConfig {
        EvolutionConfig {
            enabled: true,
            update_interval_ticks: 2,
            min_bucket_ticks_for_update: 1,
            min_abs_window_pnl_usd: 0.0,
            max_weight_step: 0.2,
            max_single_strategy_weight: 1.0,
            rollback_degrade_windows: 2,
            rollback_cooldown_ticks: 10,
            objective_alpha: 1.0,
            objective_beta: 1.0,
            objective_gamma: 1.0,
            initial_trend_weight: 0.5,
            initial_defensive_weight: 0.5,
            enable_factor_ic_adaptive_weights: false,
            factor_ic_min_samples: 5,
            factor_ic_min_abs: 0.1,
            enable_learnability_gate: false,
            learnability_min_samples: 5,
            learnability_min_t_stat_abs: 2.0,
            use_virtual_pnl: false,
            use_counterfactual_search: false,
            virtual_cost_bps: 1.0,
        }
    }

    #[test]
    fn positive_objective_steps_trend_weight_up() {
        let mut ctrl = EvolutionController::new(cfg());
        ctrl.on_tick(RegimeBucket::Trend, 1.0, 0.0, 0.01, 10.0, 0.0, 0.0);
        ctrl.on_tick(RegimeBucket::Trend, 1.0, 0.0, 0.01, 10.0, 0.0, 0.0);
        let action = ctrl.on_maybe_window_close().unwrap();
        match action {
            EvolutionAction::Updated { weights, .. } => assert!(weights.trend_weight > 0.5),
            other => panic!("expected Updated, got {other:?}"),
        }
    }

    #[test]
    fn negative_objective_steps_trend_weight_down() {
        let mut ctrl = EvolutionController::new(cfg());
        ctrl.on_tick(RegimeBucket::Range, 0.0, 1.0, -0.01, -10.0, 0.0, 0.0);
        ctrl.on_tick(RegimeBucket::Range, 0.0, 1.0, -0.01, -10.0, 0.0, 0.0);
        let action = ctrl.on_maybe_window_close().unwrap();
        match action {
            EvolutionAction::Updated { weights, .. } => assert!(weights.trend_weight < 0.5),
            other => panic!("expected Updated, got {other:?}"),
        }
    }

    #[test]
    fn sustained_degradation_triggers_rollback() {
        let mut ctrl = EvolutionController::new(cfg());
        // window 1: degrade and step down from the 0.5 anchor.
        ctrl.on_tick(RegimeBucket::Range, 0.0, 1.0, -0.01, -10.0, 0.0, 0.0);
        ctrl.on_tick(RegimeBucket::Range, 0.0, 1.0, -0.01, -10.0, 0.0, 0.0);
        ctrl.on_maybe_window_close();

        // window 2: degrade again -> both windows in the deque are degraded.
        ctrl.on_tick(RegimeBucket::Range, 0.0, 1.0, -0.01, -10.0, 0.0, 0.0);
        ctrl.on_tick(RegimeBucket::Range, 0.0, 1.0, -0.01, -10.0, 0.0, 0.0);
        let action = ctrl.on_maybe_window_close().unwrap();
        match action {
            EvolutionAction::RolledBack { weights, .. } => assert_eq!(weights.trend_weight, 0.5),
            other => panic!("expected RolledBack, got {other:?}"),
        }
    }

    #[test]
    fn below_min_abs_pnl_skips_entirely() {
        let mut c = cfg();
        c.min_abs_window_pnl_usd = 100.0;
        let mut ctrl = EvolutionController::new(c);
        ctrl.on_tick(RegimeBucket::Trend, 1.0, 0.0, 0.01, 1.0, 0.0, 0.0);
        ctrl.on_tick(RegimeBucket::Trend, 1.0, 0.0, 0.01, 1.0, 0.0, 0.0);
        assert!(ctrl.on_maybe_window_close().is_none());
    }
}
