//! Converts the typed, section-oriented [`AppConfig`] into the plain config
//! structs each leaf crate expects. The leaf crates were built independently
//! and don't all share `AppConfig`'s nesting or field names; this module is
//! the single place that bridges the two.

use pfcore_config::AppConfig;
use pfcore_evolution::EvolutionConfig;
use pfcore_exchange::LiveConfig;
use pfcore_execution::{EntryGateConfig, ExecutionConfig, ThrottleConfig};
use pfcore_gate::GateConfig;
use pfcore_integrator::{ActiveConfig, CanaryConfig, IntegratorConfig, PolicyMode};
use pfcore_reconcile::ReconcileConfig;
use pfcore_regime::RegimeConfig;
use pfcore_risk::RiskConfig;
use pfcore_schemas::RiskThresholds;
use pfcore_universe::UniverseConfig;

/// One converted copy of every leaf config, built once at startup from the
/// merged [`AppConfig`] and handed to the controller's constructors.
pub struct LeafConfigs {
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub entry_gate: EntryGateConfig,
    pub throttle: ThrottleConfig,
    pub reconcile: ReconcileConfig,
    pub gate: GateConfig,
    pub universe: UniverseConfig,
    pub evolution: EvolutionConfig,
    pub integrator: IntegratorConfig,
    pub regime: RegimeConfig,
}

impl LeafConfigs {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            risk: RiskConfig {
                max_abs_notional_usd: cfg.risk.max_abs_notional_usd,
                thresholds: RiskThresholds {
                    degraded: cfg.risk.thresholds.degraded,
                    cooldown: cfg.risk.thresholds.cooldown,
                    fuse: cfg.risk.thresholds.fuse,
                },
            },
            execution: ExecutionConfig {
                max_order_notional: cfg.execution.max_order_notional,
                min_rebalance_notional: cfg.execution.min_rebalance_notional,
                direct_flip_entry_enabled: cfg.execution.direct_flip_entry_enabled,
            },
            entry_gate: entry_gate_config(cfg),
            throttle: ThrottleConfig {
                min_order_interval_ms: cfg.execution.min_order_interval_ms,
                reverse_signal_cooldown_ticks: cfg.execution.reverse_signal_cooldown_ticks,
            },
            reconcile: ReconcileConfig {
                tolerance_notional_usd: cfg.reconcile.tolerance_notional_usd,
                mismatch_confirmations: cfg.reconcile.mismatch_confirmations,
                anomaly_reduce_only_streak: cfg.reconcile.anomaly_reduce_only_streak,
                anomaly_halt_streak: cfg.reconcile.anomaly_halt_streak,
                anomaly_resume_streak: cfg.reconcile.anomaly_resume_streak,
            },
            gate: GateConfig {
                window_ticks: cfg.gate.window_ticks,
                min_effective_signals: cfg.gate.min_effective_signals_per_window,
                min_fills: cfg.gate.min_fills_per_window,
                heartbeat_empty_signal_ticks: cfg.gate.heartbeat_empty_signal_ticks,
                fail_to_reduce_only_windows: cfg.gate.fail_to_reduce_only_windows,
                fail_to_halt_windows: cfg.gate.fail_to_halt_windows,
                pass_to_resume_windows: cfg.gate.pass_to_resume_windows,
                // pfcore-gate tracks a single cooldown; AppConfig allows the
                // operator to tune reduce-only and halt cooldowns separately,
                // so the stricter (longer) of the two wins.
                resume_cooldown_ticks: cfg
                    .gate
                    .halt_cooldown_ticks
                    .max(cfg.gate.reduce_only_cooldown_ticks),
                auto_resume_flat_ticks: cfg.gate.auto_resume_flat_ticks,
            },
            universe: UniverseConfig {
                candidate_symbols: cfg.universe.candidate_symbols.clone(),
                fallback_symbols: cfg.universe.fallback_symbols.clone(),
                primary_symbol: cfg.system.primary_symbol.clone(),
                max_active_symbols: cfg.universe.max_active_symbols,
                min_active_symbols: cfg.universe.min_active_symbols,
                update_interval_ticks: cfg.universe.update_interval_ticks,
            },
            evolution: evolution_config(cfg),
            integrator: integrator_config(cfg),
            regime: RegimeConfig::default(),
        }
    }
}

fn entry_gate_config(cfg: &AppConfig) -> EntryGateConfig {
    let eg = &cfg.execution.entry_gate;
    let afg = &cfg.execution.adaptive_fee_gate;
    let de = &cfg.execution.dynamic_edge;
    EntryGateConfig {
        enabled: eg.enabled,
        entry_fee_bps: cfg.execution.fee_bps.entry,
        exit_fee_bps: cfg.execution.fee_bps.exit,
        expected_slippage_bps: cfg.execution.fee_bps.expected_slippage,
        min_expected_edge_bps: eg.min_expected_edge_bps,
        required_edge_cap_bps: eg.required_edge_cap_bps,
        // No operator-facing knob for a per-strategy deadband exists yet;
        // a real strategy implementation would thread its own value through.
        strategy_deadband_abs: 0.0,
        near_miss_tolerance_bps: eg.near_miss_tolerance_bps,
        near_miss_maker_allow: eg.near_miss_maker_allow,
        near_miss_maker_max_gap_bps: eg.near_miss_maker_max_gap_bps,
        adaptive_relax_enabled: afg.enabled,
        adaptive_relax_trigger_ratio: afg.trigger_ratio,
        adaptive_relax_max_bps: afg.max_relax_bps,
        adaptive_relax_min_samples: afg.min_samples,
        maker_relax_bps: cfg.execution.maker.edge_relax_bps,
        dynamic_edge_enabled: de.enabled,
        trend_bucket_adjust_bps: de.trend_bucket_adjust_bps,
        range_bucket_adjust_bps: de.range_bucket_adjust_bps,
        extreme_bucket_adjust_bps: de.extreme_bucket_adjust_bps,
        volatility_threshold: de.volatility_threshold,
        volatility_adjust_bps: de.volatility_adjust_bps,
        maker_fill_ratio_high_threshold: de.maker_fill_ratio_high_threshold,
        liquidity_relax_bps: de.liquidity_relax_bps,
        unknown_liquidity_ratio_high_threshold: de.unknown_liquidity_ratio_high_threshold,
        liquidity_penalty_bps: de.liquidity_penalty_bps,
        quality_guard_penalty_bps: cfg.execution.quality_guard.penalty_bps,
        cooldown_trigger_count: cfg.execution.cost_filter_cooldown.trigger_count,
        cooldown_ticks: cfg.execution.cost_filter_cooldown.ticks,
    }
}

fn evolution_config(cfg: &AppConfig) -> EvolutionConfig {
    let e = &cfg.evolution;
    EvolutionConfig {
        enabled: e.enabled,
        update_interval_ticks: e.update_interval_ticks,
        min_bucket_ticks_for_update: e.min_bucket_ticks_for_update,
        min_abs_window_pnl_usd: e.min_abs_window_pnl_usd,
        max_weight_step: e.max_weight_step,
        max_single_strategy_weight: e.max_single_strategy_weight,
        rollback_degrade_windows: e.rollback_degrade_windows,
        rollback_cooldown_ticks: e.rollback_cooldown_ticks,
        objective_alpha: e.objective.alpha,
        objective_beta: e.objective.beta,
        objective_gamma: e.objective.gamma,
        initial_trend_weight: e.initial_trend_weight,
        initial_defensive_weight: e.initial_defensive_weight,
        enable_factor_ic_adaptive_weights: e.enable_factor_ic_adaptive_weights,
        factor_ic_min_samples: e.factor_ic.min_samples,
        factor_ic_min_abs: e.factor_ic.min_abs,
        enable_learnability_gate: e.enable_learnability_gate,
        learnability_min_samples: e.learnability.min_samples,
        learnability_min_t_stat_abs: e.learnability.min_t_stat_abs,
        use_virtual_pnl: e.use_virtual_pnl,
        use_counterfactual_search: e.use_counterfactual_search,
        virtual_cost_bps: e.virtual_cost_bps,
    }
}

fn policy_mode(mode: pfcore_config::IntegratorMode) -> PolicyMode {
    match mode {
        pfcore_config::IntegratorMode::Off => PolicyMode::Off,
        pfcore_config::IntegratorMode::Shadow => PolicyMode::Shadow,
        pfcore_config::IntegratorMode::Canary => PolicyMode::Canary,
        pfcore_config::IntegratorMode::Active => PolicyMode::Active,
    }
}

fn integrator_config(cfg: &AppConfig) -> IntegratorConfig {
    let i = &cfg.integrator;
    IntegratorConfig {
        enabled: i.enabled,
        mode: policy_mode(i.mode),
        model_report_path: i.shadow.model_report_path.clone(),
        log_model_score: i.shadow.log_model_score,
        canary: CanaryConfig {
            confidence_threshold: i.canary.confidence_threshold,
            allow_countertrend: i.canary.allow_countertrend,
            notional_ratio: i.canary.notional_ratio,
            min_notional_usd: i.canary.min_notional_usd,
        },
        active: ActiveConfig {
            confidence_threshold: i.active.confidence_threshold,
            full_notional_confidence_threshold: i.active.full_notional_confidence_threshold,
            partial_notional_ratio: i.active.partial_notional_ratio,
        },
    }
}

/// Per-venue REST/WebSocket endpoints. `pfcore-exchange`'s live adapter
/// takes these as plain strings and has no venue directory of its own;
/// mainnet/testnet/demo routing lives here instead.
fn resolve_urls(cfg: &AppConfig) -> (String, String) {
    let platform = cfg.exchange.platform.trim().to_ascii_lowercase();
    match platform.as_str() {
        "bybit-like" | "bybit" => {
            if cfg.exchange.demo_trading {
                (
                    "https://api-demo.bybit.com".to_string(),
                    "wss://stream-demo.bybit.com".to_string(),
                )
            } else if cfg.exchange.testnet {
                (
                    "https://api-testnet.bybit.com".to_string(),
                    "wss://stream-testnet.bybit.com".to_string(),
                )
            } else {
                (
                    "https://api.bybit.com".to_string(),
                    "wss://stream.bybit.com".to_string(),
                )
            }
        }
        "binance-like" | "binance" => {
            if cfg.exchange.testnet {
                (
                    "https://testnet.binancefuture.com".to_string(),
                    "wss://stream.binancefuture.com".to_string(),
                )
            } else {
                (
                    "https://fapi.binance.com".to_string(),
                    "wss://fstream.binance.com".to_string(),
                )
            }
        }
        other => {
            tracing::warn!(
                target: "pfcore_bot",
                platform = other,
                "EXCHANGE_PLATFORM_URL_UNKNOWN: falling back to empty endpoints"
            );
            (String::new(), String::new())
        }
    }
}

/// Build the live adapter's config, resolving `base_url`/`ws_url` from the
/// platform/testnet/demo triple and filling in credentials separately.
pub fn live_config(cfg: &AppConfig, api_key: String, api_secret: String) -> LiveConfig {
    let (base_url, ws_url) = resolve_urls(cfg);
    LiveConfig {
        platform: cfg.exchange.platform.clone(),
        base_url,
        ws_url,
        api_key,
        api_secret,
        public_ws_enabled: cfg.exchange.public_ws_enabled,
        public_ws_rest_fallback: cfg.exchange.public_ws_rest_fallback,
        private_ws_enabled: cfg.exchange.private_ws_enabled,
        private_ws_rest_fallback: cfg.exchange.private_ws_rest_fallback,
        execution_poll_limit: cfg.exchange.execution_poll_limit,
        execution_skip_history_on_start: cfg.exchange.execution_skip_history_on_start,
        ws_reconnect_interval_ms: cfg.exchange.ws_reconnect_interval_ms,
        maker_entry_enabled: cfg.execution.maker.enabled,
        maker_offset_bps: cfg.execution.maker.offset_bps,
        maker_post_only: cfg.execution.maker.post_only,
        maker_fallback_to_market: cfg.execution.maker.fallback_to_market,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal_yaml() -> &'static str {
        r#"
system:
  mode: replay
  primary_symbol: BTCUSDT
  data_path: /tmp/pfcore
  status_log_interval_ticks: 100
  remote_risk_refresh_interval_ticks: 50
risk:
  max_abs_notional_usd: 10000
  thresholds: { degraded: 0.08, cooldown: 0.12, fuse: 0.2 }
execution:
  max_order_notional: 500
  min_order_interval_ms: 250
  reverse_signal_cooldown_ticks: 5
  fee_bps: { entry: 5.5, exit: 5.5, expected_slippage: 1.0 }
  entry_gate: { min_expected_edge_bps: 3.0 }
  cost_filter_cooldown: { trigger_count: 3, ticks: 20 }
protection:
  enabled: false
  require_sl: false
  attach_timeout_ms: 0
  stop_loss_ratio: 0.02
  take_profit_ratio: 0.04
reconcile:
  enabled: true
  interval_ticks: 50
  tolerance_notional_usd: 5.0
  mismatch_confirmations: 3
  pending_order_stale_ms: 10000
  anomaly_reduce_only_streak: 3
  anomaly_halt_streak: 6
  anomaly_resume_streak: 3
gate:
  window_ticks: 100
  min_effective_signals_per_window: 1
  min_fills_per_window: 0
  heartbeat_empty_signal_ticks: 50
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
  enabled: true
  update_interval_ticks: 500
  min_bucket_ticks_for_update: 200
  min_abs_window_pnl_usd: 1.0
  max_weight_step: 0.1
  max_single_strategy_weight: 0.9
  rollback_degrade_windows: 3
  rollback_cooldown_ticks: 1000
  objective: { alpha: 1.0, beta: 0.5, gamma: 0.25 }
  initial_trend_weight: 0.5
  initial_defensive_weight: 0.5
integrator:
  enabled: false
  mode: off
  canary: { confidence_threshold: 0.6, notional_ratio: 0.5, min_notional_usd: 10 }
  active: { confidence_threshold: 0.7, full_notional_confidence_threshold: 0.85, partial_notional_ratio: 0.5 }
exchange:
  platform: bybit-like
  testnet: true
"#
    }

    fn load() -> AppConfig {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(minimal_yaml().as_bytes()).unwrap();
        pfcore_config::load_layered_yaml(&[path.to_str().unwrap()])
            .unwrap()
            .typed()
            .unwrap()
    }

    #[test]
    fn gate_cooldown_takes_the_longer_of_the_two_configured_cooldowns() {
        let cfg = load();
        let leaves = LeafConfigs::from_app_config(&cfg);
        assert_eq!(leaves.gate.resume_cooldown_ticks, 200);
    }

    #[test]
    fn evolution_objective_weights_are_flattened() {
        let cfg = load();
        let leaves = LeafConfigs::from_app_config(&cfg);
        assert_eq!(leaves.evolution.objective_alpha, 1.0);
        assert_eq!(leaves.evolution.objective_beta, 0.5);
        assert_eq!(leaves.evolution.objective_gamma, 0.25);
    }

    #[test]
    fn testnet_bybit_resolves_to_testnet_endpoints() {
        let cfg = load();
        let live = live_config(&cfg, "k".to_string(), "s".to_string());
        assert!(live.base_url.contains("testnet"));
        assert!(live.ws_url.contains("testnet"));
    }

    #[test]
    fn unknown_platform_falls_back_to_empty_endpoints_without_panicking() {
        let mut cfg = load();
        cfg.exchange.platform = "some-new-venue".to_string();
        cfg.exchange.testnet = false;
        let live = live_config(&cfg, "k".to_string(), "s".to_string());
        assert!(live.base_url.is_empty());
        assert!(live.ws_url.is_empty());
    }
}
