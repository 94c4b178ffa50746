//! Account state: per-symbol position, volume-weighted average entry,
//! cash, realized/unrealized P&L, and drawdown peak tracking.
//!
//! Accounting is volume-weighted average entry, not FIFO lots: a symbol's
//! position is a single `(qty, avg_entry_price)` pair updated in place on
//! every fill. This matches the venue's own position reporting (a perp
//! account has one net position per symbol, not a stack of lots).

use pfcore_schemas::{Direction, FillEvent, MarketEvent, PositionState, RemoteAccountBalance, RemotePositionSnapshot};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct AccountState {
    pub cash: f64,
    pub cumulative_realized_pnl: f64,
    pub cumulative_fee: f64,
    pub peak_equity: f64,
    pub positions: BTreeMap<String, PositionState>,
}

impl AccountState {
    pub fn new(initial_cash: f64) -> Self {
        Self {
            cash: initial_cash,
            cumulative_realized_pnl: 0.0,
            cumulative_fee: 0.0,
            peak_equity: initial_cash,
            positions: BTreeMap::new(),
        }
    }

    fn position_mut(&mut self, symbol: &str) -> &mut PositionState {
        self.positions.entry(symbol.to_string()).or_default()
    }

    pub fn position(&self, symbol: &str) -> PositionState {
        self.positions.get(symbol).copied().unwrap_or_default()
    }

    fn effective_mark_price(pos: &PositionState) -> f64 {
        if pos.mark_price > 0.0 {
            pos.mark_price
        } else {
            pos.avg_entry_price
        }
    }

    pub fn on_market(&mut self, event: &MarketEvent) {
        let price = event.effective_price();
        if price > 0.0 {
            self.position_mut(&event.symbol).mark_price = price;
        }
        self.refresh_peak_equity();
    }

    /// Apply a fill: adjust cash by fee, update position qty/avg-entry/mark,
    /// realize P&L on any reducing portion, and refresh the drawdown peak.
    pub fn apply_fill(&mut self, fill: &FillEvent) {
        self.cash -= fill.fee;
        self.cumulative_fee += fill.fee;

        let pos = self.position_mut(&fill.symbol);
        let old_qty = pos.qty;
        let old_avg = pos.avg_entry_price;
        let fill_signed = fill.direction.sign() * fill.qty;
        let new_qty = old_qty + fill_signed;

        let same_sign_or_opening = old_qty == 0.0 || old_qty.signum() == fill_signed.signum();

        if same_sign_or_opening {
            let old_abs = old_qty.abs();
            let fill_abs = fill_signed.abs();
            let new_abs = new_qty.abs();
            pos.avg_entry_price = if new_abs > 0.0 {
                (old_avg * old_abs + fill.price * fill_abs) / new_abs
            } else {
                old_avg
            };
        } else {
            // Reducing or flipping through zero.
            let close_qty = old_qty.abs().min(fill.qty);
            let realized = close_qty * (fill.price - old_avg) * old_qty.signum();
            self.cash += realized;
            self.cumulative_realized_pnl += realized;

            if new_qty.signum() != old_qty.signum() && new_qty != 0.0 {
                // Flipped through zero: the remainder opens a fresh position
                // at the fill price.
                pos.avg_entry_price = fill.price;
            } else if new_qty == 0.0 {
                pos.avg_entry_price = 0.0;
            }
        }

        pos.qty = new_qty;
        if fill.price > 0.0 {
            pos.mark_price = fill.price;
        }

        self.refresh_peak_equity();
    }

    pub fn equity(&self) -> f64 {
        let unrealized: f64 = self
            .positions
            .values()
            .map(|p| p.qty * (Self::effective_mark_price(p) - p.avg_entry_price))
            .sum();
        self.cash + unrealized
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.positions
            .values()
            .map(|p| p.qty * (Self::effective_mark_price(p) - p.avg_entry_price))
            .sum()
    }

    fn refresh_peak_equity(&mut self) {
        let eq = self.equity();
        if eq > self.peak_equity {
            self.peak_equity = eq;
        }
    }

    pub fn drawdown_pct(&self) -> f64 {
        if self.peak_equity <= 0.0 {
            return 0.0;
        }
        let eq = self.equity();
        ((self.peak_equity - eq) / self.peak_equity).max(0.0)
    }

    pub fn current_notional_usd(&self, symbol: &str) -> f64 {
        let pos = self.position(symbol);
        pos.qty * Self::effective_mark_price(&pos)
    }

    pub fn gross_notional_usd(&self) -> f64 {
        self.positions
            .values()
            .map(|p| (p.qty * Self::effective_mark_price(p)).abs())
            .sum()
    }

    /// Notional-weighted 95th percentile of liquidation distance across open
    /// positions with a known liquidation price. `1.0` (safe) if no open
    /// position has a known liquidation price.
    pub fn liquidation_distance_p95(&self) -> f64 {
        let mut samples: Vec<(f64, f64)> = Vec::new(); // (distance, weight)
        for pos in self.positions.values() {
            if pos.qty == 0.0 {
                continue;
            }
            let Some(liq) = pos.liquidation_price else {
                continue;
            };
            let mark = Self::effective_mark_price(pos);
            if mark <= 0.0 {
                continue;
            }
            let distance = if pos.qty > 0.0 {
                (mark - liq) / mark
            } else {
                (liq - mark) / mark
            };
            let weight = (pos.qty * mark).abs();
            samples.push((distance.max(0.0), weight));
        }
        if samples.is_empty() {
            return 1.0;
        }
        samples.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        let total_weight: f64 = samples.iter().map(|(_, w)| w).sum();
        if total_weight <= 0.0 {
            return 1.0;
        }
        let target = 0.95 * total_weight;
        let mut cum = 0.0;
        for (distance, weight) in &samples {
            cum += weight;
            if cum >= target {
                return *distance;
            }
        }
        samples.last().unwrap().0
    }

    /// Hard replace of all positions from remote, resetting the drawdown peak
    /// to the supplied baseline equity.
    pub fn sync_from_remote_positions(
        &mut self,
        remote: &BTreeMap<String, RemotePositionSnapshot>,
        peak_equity_baseline: f64,
    ) {
        self.positions.clear();
        for (symbol, snap) in remote {
            self.positions.insert(
                symbol.clone(),
                PositionState {
                    qty: snap.qty,
                    avg_entry_price: snap.avg_entry_price,
                    mark_price: snap.mark_price,
                    liquidation_price: snap.liquidation_price,
                },
            );
        }
        self.peak_equity = peak_equity_baseline;
    }

    /// Additive refresh of mark/liquidation price only; introduces missing
    /// symbols, never touches cash or qty/avg-entry of symbols already known.
    pub fn refresh_risk_from_remote(&mut self, remote: &BTreeMap<String, RemotePositionSnapshot>) {
        for (symbol, snap) in remote {
            let pos = self.position_mut(symbol);
            pos.mark_price = snap.mark_price;
            pos.liquidation_price = snap.liquidation_price;
        }
    }

    /// Hard overwrite of the positions table (qty/avg-entry/mark/liq), used by
    /// the reconciler's auto-resync path. Cash is preserved.
    pub fn force_sync_positions_from_remote(
        &mut self,
        remote: &BTreeMap<String, RemotePositionSnapshot>,
    ) {
        self.positions.clear();
        for (symbol, snap) in remote {
            self.positions.insert(
                symbol.clone(),
                PositionState {
                    qty: snap.qty,
                    avg_entry_price: snap.avg_entry_price,
                    mark_price: snap.mark_price,
                    liquidation_price: snap.liquidation_price,
                },
            );
        }
    }

    pub fn sync_from_remote_balance(&mut self, balance: &RemoteAccountBalance, reset_peak_to_equity: bool) {
        if let Some(equity) = balance.equity_usd {
            let unrealized = balance.unrealized_pnl_usd.unwrap_or(0.0);
            self.cash = equity - unrealized;
        } else if let Some(wallet) = balance.wallet_balance_usd {
            self.cash = wallet;
        }

        if reset_peak_to_equity {
            self.peak_equity = self.equity();
        } else {
            self.refresh_peak_equity();
        }
    }
}

pub fn signed_fill_notional(direction: Direction, qty: f64, price: f64) -> f64 {
    direction.sign() * qty * price
}
