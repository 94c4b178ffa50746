//! EWMA-based per-symbol regime classifier: tracks smoothed return and
//! absolute-return estimates and buckets each symbol into Trend/Range/Extreme.

use std::collections::HashMap;

use pfcore_schemas::{Regime, RegimeState};

#[derive(Debug, Clone, Copy)]
pub struct RegimeConfig {
    pub alpha: f64,
    pub min_samples: u64,
    pub jump_threshold: f64,
    pub extreme_vol_threshold: f64,
    pub trend_threshold: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            min_samples: 20,
            jump_threshold: 0.02,
            extreme_vol_threshold: 0.01,
            trend_threshold: 0.002,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SymbolEwma {
    last_price: Option<f64>,
    ewma_return: f64,
    ewma_abs_return: f64,
    samples: u64,
}

#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    alpha: f64,
    cfg: RegimeConfig,
    state: HashMap<String, SymbolEwma>,
}

impl RegimeClassifier {
    pub fn new(cfg: RegimeConfig) -> Self {
        Self {
            alpha: cfg.alpha.clamp(1e-6, 1.0),
            cfg,
            state: HashMap::new(),
        }
    }

    fn warmup_state() -> RegimeState {
        RegimeState {
            regime: Regime::Range,
            bucket: Regime::Range.bucket(),
            instant_return: 0.0,
            trend_strength: 0.0,
            volatility_level: 0.0,
            warmup: true,
        }
    }

    /// Feed one observed price for `symbol`, returning the updated regime.
    pub fn on_price(&mut self, symbol: &str, price: f64) -> RegimeState {
        let entry = self.state.entry(symbol.to_string()).or_default();

        let Some(last) = entry.last_price else {
            entry.last_price = Some(price);
            entry.samples = 1;
            return Self::warmup_state();
        };

        let instant_return = if last > 0.0 { (price - last) / last } else { 0.0 };
        entry.last_price = Some(price);
        entry.samples += 1;
        entry.ewma_return = self.alpha * instant_return + (1.0 - self.alpha) * entry.ewma_return;
        entry.ewma_abs_return =
            self.alpha * instant_return.abs() + (1.0 - self.alpha) * entry.ewma_abs_return;

        if entry.samples < self.cfg.min_samples {
            return Self::warmup_state();
        }

        let regime = if instant_return.abs() >= self.cfg.jump_threshold
            || entry.ewma_abs_return >= self.cfg.extreme_vol_threshold
        {
            Regime::Extreme
        } else if entry.ewma_return >= self.cfg.trend_threshold {
            Regime::Uptrend
        } else if entry.ewma_return <= -self.cfg.trend_threshold {
            Regime::Downtrend
        } else {
            Regime::Range
        };

        RegimeState {
            regime,
            bucket: regime.bucket(),
            instant_return,
            trend_strength: entry.ewma_return,
            volatility_level: entry.ewma_abs_return,
            warmup: false,
        }
    }

    pub fn current(&self, symbol: &str) -> RegimeState {
        let Some(entry) = self.state.get(symbol) else {
            return Self::warmup_state();
        };
        if entry.samples < self.cfg.min_samples {
            return Self::warmup_state();
        }
        let regime = if entry.ewma_abs_return >= self.cfg.extreme_vol_threshold {
            Regime::Extreme
        } else if entry.ewma_return >= self.cfg.trend_threshold {
            Regime::Uptrend
        } else if entry.ewma_return <= -self.cfg.trend_threshold {
            Regime::Downtrend
        } else {
            Regime::Range
        };
        RegimeState {
            regime,
            bucket: regime.bucket(),
            instant_return: 0.0,
            trend_strength: entry.ewma_return,
            volatility_level: entry.ewma_abs_return,
            warmup: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfcore_schemas::RegimeBucket;

    #[test]
    fn first_observation_is_warmup() {
        let mut c = RegimeClassifier::new(RegimeConfig::default());
        let s = c.on_price("BTCUSDT", 100.0);
        assert!(s.warmup);
        assert_eq!(s.bucket, RegimeBucket::Range);
    }

    #[test]
    fn stays_in_warmup_until_min_samples_observed() {
        let mut c = RegimeClassifier::new(RegimeConfig {
            min_samples: 5,
            ..Default::default()
        });
        let mut last = RegimeState {
            regime: Regime::Range,
            bucket: RegimeBucket::Range,
            instant_return: 0.0,
            trend_strength: 0.0,
            volatility_level: 0.0,
            warmup: true,
        };
        for i in 0..4 {
            last = c.on_price("BTCUSDT", 100.0 + i as f64);
            assert!(last.warmup);
        }
        last = c.on_price("BTCUSDT", 110.0);
        assert!(!last.warmup);
    }

    #[test]
    fn sustained_upward_drift_classifies_uptrend() {
        let mut c = RegimeClassifier::new(RegimeConfig {
            min_samples: 3,
            trend_threshold: 0.0005,
            extreme_vol_threshold: 10.0,
            jump_threshold: 10.0,
            alpha: 0.5,
            ..Default::default()
        });
        let mut price = 100.0;
        let mut last = None;
        for _ in 0..10 {
            price *= 1.01;
            last = Some(c.on_price("BTCUSDT", price));
        }
        let s = last.unwrap();
        assert_eq!(s.regime, Regime::Uptrend);
        assert_eq!(s.bucket, RegimeBucket::Trend);
    }

    #[test]
    fn large_single_tick_jump_is_extreme() {
        let mut c = RegimeClassifier::new(RegimeConfig {
            min_samples: 1,
            jump_threshold: 0.05,
            ..Default::default()
        });
        c.on_price("BTCUSDT", 100.0);
        let s = c.on_price("BTCUSDT", 120.0);
        assert_eq!(s.regime, Regime::Extreme);
        assert_eq!(s.bucket, RegimeBucket::Extreme);
    }
}
