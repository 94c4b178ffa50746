//! Integrator: an optional ML overlay (Shadow model + Policy mode) that can
//! observe, dampen, or redirect the base strategy signal. Off by default;
//! Canary/Active enter a failsafe to Off if the shadow model's report can't
//! be loaded at startup.

use serde::Deserialize;

use pfcore_schemas::{Direction, Regime, RegimeBucket, RegimeState, Signal};

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone, Deserialize)]
struct ModelReport {
    model_version: String,
    #[serde(default = "default_score_gain")]
    score_gain: f64,
}

fn default_score_gain() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowOutput {
    pub model_score: f64,
    pub p_up: f64,
    pub p_down: f64,
    pub confidence: f64,
}

pub struct ShadowModel {
    pub model_version: String,
    score_gain: f64,
}

impl ShadowModel {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let report: ModelReport = serde_json::from_str(&raw)?;
        Ok(Self {
            model_version: report.model_version,
            score_gain: report.score_gain,
        })
    }

    /// Stateless: the shadow's opinion depends only on the current regime
    /// and the base strategy's suggested notional.
    pub fn evaluate(&self, regime: &RegimeState, suggested_notional_usd: f64) -> ShadowOutput {
        let mut raw = (suggested_notional_usd / 1000.0).clamp(-2.0, 2.0);
        raw += match regime.regime {
            Regime::Uptrend => 0.20,
            Regime::Downtrend => -0.20,
            Regime::Range | Regime::Extreme => 0.0,
        };
        raw *= match regime.bucket {
            RegimeBucket::Trend => 1.0,
            RegimeBucket::Range => 0.75,
            RegimeBucket::Extreme => 0.55,
        };
        if regime.warmup {
            raw *= 0.60;
        }
        let model_score = (raw * self.score_gain).clamp(-6.0, 6.0);
        let p_up = sigmoid(model_score);
        let p_down = 1.0 - p_up;
        ShadowOutput {
            model_score,
            p_up,
            p_down,
            confidence: p_up - p_down,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
    Off,
    Shadow,
    Canary,
    Active,
}

#[derive(Debug, Clone, Copy)]
pub struct CanaryConfig {
    pub confidence_threshold: f64,
    pub allow_countertrend: bool,
    pub notional_ratio: f64,
    pub min_notional_usd: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ActiveConfig {
    pub confidence_threshold: f64,
    pub full_notional_confidence_threshold: f64,
    pub partial_notional_ratio: f64,
}

#[derive(Debug, Clone)]
pub struct IntegratorConfig {
    pub enabled: bool,
    pub mode: PolicyMode,
    pub model_report_path: String,
    pub log_model_score: bool,
    pub canary: CanaryConfig,
    pub active: ActiveConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyApplication {
    pub reason: &'static str,
    pub output: Signal,
    pub shadow: Option<ShadowOutput>,
}

pub struct Integrator {
    cfg: IntegratorConfig,
    shadow: Option<ShadowModel>,
    effective_mode: PolicyMode,
}

impl Integrator {
    pub fn init(cfg: IntegratorConfig) -> Self {
        if !cfg.enabled {
            return Self {
                cfg,
                shadow: None,
                effective_mode: PolicyMode::Off,
            };
        }

        let shadow = match ShadowModel::load(&cfg.model_report_path) {
            Ok(model) => {
                tracing::info!(target: "pfcore_integrator", model_version = %model.model_version, "INTEGRATOR_INIT");
                Some(model)
            }
            Err(err) => {
                tracing::warn!(target: "pfcore_integrator", error = %err, "INTEGRATOR_DEGRADED");
                None
            }
        };

        let effective_mode = if shadow.is_none() && matches!(cfg.mode, PolicyMode::Canary | PolicyMode::Active) {
            tracing::error!(target: "pfcore_integrator", "INTEGRATOR_FAILSAFE");
            PolicyMode::Off
        } else {
            cfg.mode
        };

        Self {
            cfg,
            shadow,
            effective_mode,
        }
    }

    pub fn effective_mode(&self) -> PolicyMode {
        self.effective_mode
    }

    pub fn apply(&self, regime: &RegimeState, base: &Signal) -> PolicyApplication {
        let result = match self.effective_mode {
            PolicyMode::Off => PolicyApplication {
                reason: "mode_off",
                output: base.clone(),
                shadow: None,
            },
            PolicyMode::Shadow => self.apply_shadow(regime, base),
            PolicyMode::Canary => self.apply_canary(regime, base),
            PolicyMode::Active => self.apply_active(regime, base),
        };

        if self.cfg.log_model_score {
            if let Some(shadow) = &result.shadow {
                tracing::debug!(target: "pfcore_integrator", model_score = shadow.model_score, "model score evaluated");
            }
        }
        if result.output != *base {
            tracing::info!(target: "pfcore_integrator", reason = result.reason, "INTEGRATOR_POLICY_APPLIED");
        }
        result
    }

    fn apply_shadow(&self, regime: &RegimeState, base: &Signal) -> PolicyApplication {
        let Some(shadow) = &self.shadow else {
            return PolicyApplication {
                reason: "shadow_unavailable",
                output: base.clone(),
                shadow: None,
            };
        };
        PolicyApplication {
            reason: "mode_shadow_observe_only",
            output: base.clone(),
            shadow: Some(shadow.evaluate(regime, base.suggested_notional_usd)),
        }
    }

    fn apply_canary(&self, regime: &RegimeState, base: &Signal) -> PolicyApplication {
        let shadow_output = self.shadow.as_ref().map(|m| m.evaluate(regime, base.suggested_notional_usd));

        if base.direction == Direction::Flat {
            return PolicyApplication {
                reason: "neutral_confidence",
                output: base.clone(),
                shadow: shadow_output,
            };
        }
        let shadow = shadow_output.expect("canary mode requires an initialized shadow model");
        if shadow.confidence.abs() < self.cfg.canary.confidence_threshold {
            return PolicyApplication {
                reason: "canary_low_confidence",
                output: base.clone(),
                shadow: Some(shadow),
            };
        }
        let shadow_direction = Direction::of(shadow.model_score);
        if shadow_direction != Direction::Flat && shadow_direction != base.direction && !self.cfg.canary.allow_countertrend {
            return PolicyApplication {
                reason: "canary_countertrend_blocked",
                output: base.clone(),
                shadow: Some(shadow),
            };
        }

        let scaled = base.suggested_notional_usd * self.cfg.canary.notional_ratio;
        if scaled.abs() < self.cfg.canary.min_notional_usd {
            if base.suggested_notional_usd.abs() < self.cfg.canary.min_notional_usd {
                return PolicyApplication {
                    reason: "canary_below_min_notional_no_change",
                    output: base.clone(),
                    shadow: Some(shadow),
                };
            }
            return PolicyApplication {
                reason: "canary_below_min_notional_to_flat",
                output: flat_signal(base),
                shadow: Some(shadow),
            };
        }

        PolicyApplication {
            reason: "canary_applied",
            output: rescale_signal(base, scaled, base.direction),
            shadow: Some(shadow),
        }
    }

    fn apply_active(&self, regime: &RegimeState, base: &Signal) -> PolicyApplication {
        let shadow = self
            .shadow
            .as_ref()
            .map(|m| m.evaluate(regime, base.suggested_notional_usd))
            .expect("active mode requires an initialized shadow model");

        if shadow.confidence.abs() < self.cfg.active.confidence_threshold {
            let reason = if base.direction == Direction::Flat {
                "active_low_confidence_no_change"
            } else {
                "active_low_confidence_to_flat"
            };
            let output = if reason == "active_low_confidence_to_flat" {
                flat_signal(base)
            } else {
                base.clone()
            };
            return PolicyApplication {
                reason,
                output,
                shadow: Some(shadow),
            };
        }

        let shadow_direction = Direction::of(shadow.model_score);
        let magnitude = if shadow.confidence.abs() >= self.cfg.active.full_notional_confidence_threshold {
            base.suggested_notional_usd.abs()
        } else {
            base.suggested_notional_usd.abs() * self.cfg.active.partial_notional_ratio
        };
        let new_notional = magnitude * shadow_direction.sign();

        PolicyApplication {
            reason: "active_applied",
            output: rescale_signal(base, new_notional, shadow_direction),
            shadow: Some(shadow),
        }
    }
}

fn flat_signal(base: &Signal) -> Signal {
    Signal {
        symbol: base.symbol.clone(),
        suggested_notional_usd: 0.0,
        direction: Direction::Flat,
        trend_notional_usd: 0.0,
        defensive_notional_usd: 0.0,
    }
}

fn rescale_signal(base: &Signal, new_notional: f64, direction: Direction) -> Signal {
    let (trend_ratio, defensive_ratio) = if base.suggested_notional_usd.abs() > f64::EPSILON {
        (
            base.trend_notional_usd / base.suggested_notional_usd,
            base.defensive_notional_usd / base.suggested_notional_usd,
        )
    } else {
        (1.0, 0.0)
    };
    Signal {
        symbol: base.symbol.clone(),
        suggested_notional_usd: new_notional,
        direction,
        trend_notional_usd: new_notional * trend_ratio,
        defensive_notional_usd: new_notional * defensive_ratio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regime(r: Regime, warmup: bool) -> RegimeState {
        RegimeState {
            regime: r,
            bucket: r.bucket(),
            instant_return: 0.0,
            trend_strength: 0.0,
            volatility_level: 0.0,
            warmup,
        }
    }

    fn base_signal(notional: f64, direction: Direction) -> Signal {
        Signal {
            symbol: "BTCUSDT".to_string(),
            suggested_notional_usd: notional,
            direction,
            trend_notional_usd: notional,
            defensive_notional_usd: 0.0,
        }
    }

    fn canary_cfg() -> CanaryConfig {
        CanaryConfig {
            confidence_threshold: 0.01,
            allow_countertrend: false,
            notional_ratio: 0.5,
            min_notional_usd: 10.0,
        }
    }

    fn active_cfg() -> ActiveConfig {
        ActiveConfig {
            confidence_threshold: 0.01,
            full_notional_confidence_threshold: 0.9,
            partial_notional_ratio: 0.5,
        }
    }

    #[test]
    fn off_mode_is_a_no_op() {
        let integrator = Integrator::init(IntegratorConfig {
            enabled: false,
            mode: PolicyMode::Active,
            model_report_path: "/nonexistent".to_string(),
            log_model_score: false,
            canary: canary_cfg(),
            active: active_cfg(),
        });
        assert_eq!(integrator.effective_mode(), PolicyMode::Off);
        let base = base_signal(500.0, Direction::Up);
        let result = integrator.apply(&regime(Regime::Range, false), &base);
        assert_eq!(result.reason, "mode_off");
        assert_eq!(result.output, base);
    }

    #[test]
    fn missing_report_fails_safe_to_off_for_active_mode() {
        let integrator = Integrator::init(IntegratorConfig {
            enabled: true,
            mode: PolicyMode::Active,
            model_report_path: "/nonexistent/report.json".to_string(),
            log_model_score: false,
            canary: canary_cfg(),
            active: active_cfg(),
        });
        assert_eq!(integrator.effective_mode(), PolicyMode::Off);
    }

    fn with_report(mode: PolicyMode) -> (tempfile::TempDir, Integrator) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        std::fs::write(&path, r#"{"model_version":"v1","score_gain":3.0}"#).unwrap();
        let integrator = Integrator::init(IntegratorConfig {
            enabled: true,
            mode,
            model_report_path: path.to_string_lossy().to_string(),
            log_model_score: false,
            canary: canary_cfg(),
            active: active_cfg(),
        });
        (dir, integrator)
    }

    #[test]
    fn canary_flat_base_is_neutral() {
        let (_dir, integrator) = with_report(PolicyMode::Canary);
        assert_eq!(integrator.effective_mode(), PolicyMode::Canary);
        let base = base_signal(0.0, Direction::Flat);
        let result = integrator.apply(&regime(Regime::Range, false), &base);
        assert_eq!(result.reason, "neutral_confidence");
    }

    #[test]
    fn active_mode_can_flip_direction_when_shadow_disagrees() {
        let (_dir, integrator) = with_report(PolicyMode::Active);
        let base = base_signal(-100.0, Direction::Down);
        let result = integrator.apply(&regime(Regime::Uptrend, false), &base);
        assert_eq!(result.reason, "active_applied");
        assert_eq!(result.output.direction, Direction::Up);
        assert!(result.output.suggested_notional_usd > 0.0);
    }
}
