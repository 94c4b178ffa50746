//! Layered YAML configuration loading, canonicalization, hashing, and a
//! typed view over the merged document.
//!
//! Config files are deep-merged in the order given (later files win),
//! canonicalized into a key-sorted JSON string, and hashed with SHA-256 —
//! the hash is logged once at startup so a run can always be traced back
//! to the exact configuration that produced it. [`LoadedConfig::typed`]
//! then deserializes the merged document into [`AppConfig`] and runs
//! semantic validation that the type system alone cannot express.

pub mod secrets;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
/// Later files override earlier files via deep-merge.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

impl LoadedConfig {
    /// Deserialize the merged document into [`AppConfig`] and run semantic
    /// validation. Separate from loading so callers can still inspect
    /// `config_json`/`config_hash` even when the typed view fails.
    pub fn typed(&self) -> Result<AppConfig> {
        let config: AppConfig = serde_json::from_value(self.config_json.clone())
            .context("config does not match the expected schema")?;
        config.validate()?;
        Ok(config)
    }
}

/// Deep-merge: objects merge recursively; arrays and scalars are overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

/// Canonicalize JSON by sorting all object keys recursively and emitting compact JSON.
fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

// ---------------------------------------------------------------------------
// Typed configuration
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_execution_poll_limit() -> u32 {
    50
}

fn default_ws_reconnect_interval_ms() -> i64 {
    5_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Live,
    Paper,
    Replay,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub system: SystemConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionSectionConfig,
    pub protection: ProtectionConfig,
    pub reconcile: ReconcileSectionConfig,
    pub gate: GateSectionConfig,
    pub universe: UniverseSectionConfig,
    pub evolution: EvolutionSectionConfig,
    pub integrator: IntegratorSectionConfig,
    pub exchange: ExchangeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    pub mode: RunMode,
    pub primary_symbol: String,
    pub data_path: String,
    pub max_ticks: Option<u64>,
    pub status_log_interval_ticks: u64,
    pub remote_risk_refresh_interval_ticks: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskThresholdsSectionConfig {
    pub degraded: f64,
    pub cooldown: f64,
    pub fuse: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    pub max_abs_notional_usd: f64,
    pub thresholds: RiskThresholdsSectionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeeBpsConfig {
    pub entry: f64,
    pub exit: f64,
    pub expected_slippage: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MakerSectionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub post_only: bool,
    #[serde(default)]
    pub offset_bps: f64,
    #[serde(default = "default_true")]
    pub fallback_to_market: bool,
    #[serde(default)]
    pub edge_relax_bps: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntryGateSectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub min_expected_edge_bps: f64,
    #[serde(default)]
    pub required_edge_cap_bps: Option<f64>,
    #[serde(default)]
    pub near_miss_tolerance_bps: f64,
    #[serde(default)]
    pub near_miss_maker_allow: bool,
    #[serde(default)]
    pub near_miss_maker_max_gap_bps: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdaptiveFeeGateConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub trigger_ratio: f64,
    #[serde(default)]
    pub max_relax_bps: f64,
    #[serde(default)]
    pub min_samples: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DynamicEdgeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub trend_bucket_adjust_bps: f64,
    #[serde(default)]
    pub range_bucket_adjust_bps: f64,
    #[serde(default)]
    pub extreme_bucket_adjust_bps: f64,
    #[serde(default)]
    pub volatility_threshold: f64,
    #[serde(default)]
    pub volatility_adjust_bps: f64,
    #[serde(default)]
    pub maker_fill_ratio_high_threshold: f64,
    #[serde(default)]
    pub liquidity_relax_bps: f64,
    #[serde(default)]
    pub unknown_liquidity_ratio_high_threshold: f64,
    #[serde(default)]
    pub liquidity_penalty_bps: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CostFilterCooldownConfig {
    pub trigger_count: u32,
    pub ticks: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QualityGuardConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub min_fills: u64,
    #[serde(default)]
    pub penalty_bps: f64,
    #[serde(default)]
    pub bad_streak: u32,
    #[serde(default)]
    pub good_streak: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionSectionConfig {
    pub max_order_notional: f64,
    #[serde(default)]
    pub min_rebalance_notional: f64,
    #[serde(default)]
    pub direct_flip_entry_enabled: bool,
    pub min_order_interval_ms: i64,
    pub reverse_signal_cooldown_ticks: u64,
    pub fee_bps: FeeBpsConfig,
    #[serde(default)]
    pub maker: MakerSectionConfig,
    pub entry_gate: EntryGateSectionConfig,
    #[serde(default)]
    pub adaptive_fee_gate: AdaptiveFeeGateConfig,
    #[serde(default)]
    pub dynamic_edge: DynamicEdgeConfig,
    pub cost_filter_cooldown: CostFilterCooldownConfig,
    #[serde(default)]
    pub quality_guard: QualityGuardConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProtectionConfig {
    pub enabled: bool,
    pub require_sl: bool,
    #[serde(default)]
    pub enable_tp: bool,
    pub attach_timeout_ms: i64,
    pub stop_loss_ratio: f64,
    pub take_profit_ratio: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileSectionConfig {
    pub enabled: bool,
    pub interval_ticks: u64,
    pub tolerance_notional_usd: f64,
    pub mismatch_confirmations: u32,
    pub pending_order_stale_ms: i64,
    pub anomaly_reduce_only_streak: u32,
    pub anomaly_halt_streak: u32,
    pub anomaly_resume_streak: u32,
    /// Ticks since the last applied fill within which a failed check is
    /// treated as a transient post-fill race rather than a real mismatch.
    #[serde(default = "default_grace_ticks")]
    pub grace_ticks: u64,
    /// Minimum ticks between auto-resync overwrites of local positions.
    #[serde(default = "default_auto_resync_cooldown_ticks")]
    pub auto_resync_cooldown_ticks: u64,
}

fn default_grace_ticks() -> u64 {
    2
}

fn default_auto_resync_cooldown_ticks() -> u64 {
    40
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateSectionConfig {
    pub window_ticks: u64,
    pub min_effective_signals_per_window: u64,
    pub min_fills_per_window: u64,
    pub heartbeat_empty_signal_ticks: u64,
    #[serde(default)]
    pub enforce_runtime_actions: bool,
    pub fail_to_reduce_only_windows: u32,
    pub fail_to_halt_windows: u32,
    pub reduce_only_cooldown_ticks: u64,
    pub halt_cooldown_ticks: u64,
    pub pass_to_resume_windows: u32,
    #[serde(default)]
    pub auto_resume_when_flat: bool,
    #[serde(default)]
    pub auto_resume_flat_ticks: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UniverseSectionConfig {
    #[serde(default)]
    pub enabled: bool,
    pub update_interval_ticks: u64,
    pub max_active_symbols: usize,
    pub min_active_symbols: usize,
    #[serde(default)]
    pub candidate_symbols: Vec<String>,
    pub fallback_symbols: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectiveWeightsConfig {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FactorIcConfig {
    #[serde(default)]
    pub min_samples: u64,
    #[serde(default)]
    pub min_abs: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LearnabilityConfig {
    #[serde(default)]
    pub min_samples: u64,
    #[serde(default)]
    pub min_t_stat_abs: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvolutionSectionConfig {
    pub enabled: bool,
    pub update_interval_ticks: u64,
    pub min_bucket_ticks_for_update: u64,
    pub min_abs_window_pnl_usd: f64,
    pub max_weight_step: f64,
    pub max_single_strategy_weight: f64,
    pub rollback_degrade_windows: usize,
    pub rollback_cooldown_ticks: u64,
    pub objective: ObjectiveWeightsConfig,
    pub initial_trend_weight: f64,
    pub initial_defensive_weight: f64,
    #[serde(default)]
    pub enable_factor_ic_adaptive_weights: bool,
    #[serde(default)]
    pub factor_ic: FactorIcConfig,
    #[serde(default)]
    pub enable_learnability_gate: bool,
    #[serde(default)]
    pub learnability: LearnabilityConfig,
    #[serde(default)]
    pub use_virtual_pnl: bool,
    #[serde(default)]
    pub use_counterfactual_search: bool,
    #[serde(default)]
    pub virtual_cost_bps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegratorMode {
    Off,
    Shadow,
    Canary,
    Active,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntegratorShadowConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub model_report_path: String,
    #[serde(default)]
    pub log_model_score: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntegratorCanaryConfig {
    pub confidence_threshold: f64,
    #[serde(default)]
    pub allow_countertrend: bool,
    pub notional_ratio: f64,
    pub min_notional_usd: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntegratorActiveConfig {
    pub confidence_threshold: f64,
    pub full_notional_confidence_threshold: f64,
    pub partial_notional_ratio: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntegratorSectionConfig {
    pub enabled: bool,
    pub mode: IntegratorMode,
    #[serde(default)]
    pub shadow: IntegratorShadowConfig,
    pub canary: IntegratorCanaryConfig,
    pub active: IntegratorActiveConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpectedAccountConfig {
    #[serde(default)]
    pub account_mode: String,
    #[serde(default)]
    pub margin_mode: String,
    #[serde(default)]
    pub position_mode: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    pub platform: String,
    #[serde(default)]
    pub testnet: bool,
    #[serde(default)]
    pub demo_trading: bool,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub account_type: String,
    #[serde(default)]
    pub expected: ExpectedAccountConfig,
    #[serde(default = "default_true")]
    pub public_ws_enabled: bool,
    #[serde(default = "default_true")]
    pub public_ws_rest_fallback: bool,
    #[serde(default = "default_true")]
    pub private_ws_enabled: bool,
    #[serde(default = "default_true")]
    pub private_ws_rest_fallback: bool,
    #[serde(default = "default_execution_poll_limit")]
    pub execution_poll_limit: u32,
    #[serde(default = "default_true")]
    pub execution_skip_history_on_start: bool,
    #[serde(default = "default_ws_reconnect_interval_ms")]
    pub ws_reconnect_interval_ms: i64,
}

impl AppConfig {
    /// Semantic validation the type system can't express on its own.
    pub fn validate(&self) -> Result<()> {
        if self.execution.min_order_interval_ms < 0 {
            bail!("execution.min_order_interval_ms must be >= 0");
        }
        if self.universe.min_active_symbols > self.universe.max_active_symbols {
            bail!(
                "universe.min_active_symbols ({}) must be <= universe.max_active_symbols ({})",
                self.universe.min_active_symbols,
                self.universe.max_active_symbols,
            );
        }
        if self.universe.fallback_symbols.is_empty() {
            bail!("universe.fallback_symbols must not be empty");
        }
        if self.protection.enabled
            && !(self.protection.require_sl && self.protection.attach_timeout_ms > 0)
        {
            bail!(
                "protection.enabled requires protection.require_sl=true and \
                 protection.attach_timeout_ms > 0"
            );
        }
        if self.exchange.demo_trading && self.exchange.testnet {
            bail!("exchange.demo_trading and exchange.testnet cannot both be true");
        }
        Ok(())
    }
}
