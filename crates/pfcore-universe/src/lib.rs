//! Universe Selector: the dynamic active-symbol set, scored from per-symbol
//! activity/volatility and degraded toward configured fallbacks when scoring
//! produces too thin a set.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
pub struct UniverseConfig {
    pub candidate_symbols: Vec<String>,
    pub fallback_symbols: Vec<String>,
    pub primary_symbol: String,
    pub max_active_symbols: usize,
    pub min_active_symbols: usize,
    pub update_interval_ticks: u64,
}

fn normalize_dedup(symbols: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for s in symbols {
        let norm = s.trim().to_uppercase();
        if norm.is_empty() || !seen.insert(norm.clone()) {
            continue;
        }
        out.push(norm);
    }
    out
}

#[derive(Debug, Clone, Copy, Default)]
struct SymbolStats {
    tick_count: u64,
    sum_abs_return: f64,
}

pub struct UniverseSelector {
    candidate_symbols: Vec<String>,
    fallback_symbols: Vec<String>,
    primary_symbol: String,
    max_active_symbols: usize,
    min_active_symbols: usize,
    update_interval_ticks: u64,
    stats: BTreeMap<String, SymbolStats>,
    active: BTreeSet<String>,
    degraded_to_fallback: bool,
    ticks_since_refresh: u64,
}

impl UniverseSelector {
    pub fn new(cfg: UniverseConfig) -> Self {
        let candidate_symbols = normalize_dedup(&cfg.candidate_symbols);
        let fallback_symbols = normalize_dedup(&cfg.fallback_symbols);
        let active = fallback_symbols.iter().cloned().collect();
        Self {
            candidate_symbols,
            fallback_symbols,
            primary_symbol: cfg.primary_symbol.trim().to_uppercase(),
            max_active_symbols: cfg.max_active_symbols,
            min_active_symbols: cfg.min_active_symbols,
            update_interval_ticks: cfg.update_interval_ticks,
            stats: BTreeMap::new(),
            active,
            degraded_to_fallback: false,
            ticks_since_refresh: 0,
        }
    }

    /// Record one market tick for `symbol` and refresh the active set every
    /// `update_interval_ticks` calls.
    pub fn on_market(&mut self, symbol: &str, abs_return: f64) {
        let symbol = symbol.trim().to_uppercase();
        if self.candidate_symbols.contains(&symbol) {
            let stats = self.stats.entry(symbol).or_default();
            stats.tick_count += 1;
            stats.sum_abs_return += abs_return;
        }

        self.ticks_since_refresh += 1;
        if self.ticks_since_refresh >= self.update_interval_ticks {
            self.ticks_since_refresh = 0;
            self.refresh();
        }
    }

    pub fn refresh(&mut self) {
        let mut scored: Vec<(String, f64)> = self
            .candidate_symbols
            .iter()
            .map(|symbol| {
                let stats = self.stats.get(symbol).copied().unwrap_or_default();
                let activity = (stats.tick_count as f64 / 10.0).clamp(0.0, 1.0);
                let avg_abs_return = if stats.tick_count > 0 {
                    stats.sum_abs_return / stats.tick_count as f64
                } else {
                    0.0
                };
                let volatility = (avg_abs_return * 200.0).clamp(0.0, 1.0);
                (symbol.clone(), 0.6 * activity + 0.4 * volatility)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then_with(|| a.0.cmp(&b.0)));

        let mut selected: Vec<String> = scored
            .into_iter()
            .take(self.max_active_symbols)
            .map(|(symbol, _)| symbol)
            .collect();

        let mut degraded = false;
        if selected.is_empty() {
            selected = self.fallback_symbols.clone();
            degraded = true;
        }
        if selected.len() < self.min_active_symbols {
            for fb in &self.fallback_symbols {
                if selected.len() >= self.min_active_symbols {
                    break;
                }
                if !selected.contains(fb) {
                    selected.push(fb.clone());
                    degraded = true;
                }
            }
        }
        if selected.is_empty() {
            selected.push(self.primary_symbol.clone());
            degraded = true;
        }

        self.active = selected.into_iter().collect();
        self.degraded_to_fallback = degraded;
        if degraded {
            tracing::warn!(target: "pfcore_universe", "UNIVERSE_SELECTOR_DEGRADED");
        }
    }

    /// `tradable` carries the exchange's tradable-symbol-info check, when
    /// available; `None` skips that intersection.
    pub fn is_allowed(&self, symbol: &str, tradable: Option<bool>) -> bool {
        self.active.contains(&symbol.trim().to_uppercase()) && tradable.unwrap_or(true)
    }

    pub fn active_symbols(&self) -> &BTreeSet<String> {
        &self.active
    }

    pub fn degraded_to_fallback(&self) -> bool {
        self.degraded_to_fallback
    }
}
