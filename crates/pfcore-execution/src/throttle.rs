//! Per-symbol order throttle: minimum resubmission interval plus a
//! reverse-signal cooldown for entries.

use std::collections::HashMap;

use pfcore_schemas::Direction;

#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    pub min_order_interval_ms: i64,
    pub reverse_signal_cooldown_ticks: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_order_interval_ms: 0,
            reverse_signal_cooldown_ticks: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThrottleRejection {
    MinIntervalRemaining { ms_remaining: i64 },
    ReverseCooldown { ticks_remaining: u64 },
}

#[derive(Debug, Clone, Copy, Default)]
struct SymbolState {
    last_submit_ms: Option<i64>,
    last_submit_tick: Option<u64>,
    last_entry_direction: Option<Direction>,
}

#[derive(Debug, Clone, Default)]
pub struct OrderThrottle {
    cfg_min_interval_ms: i64,
    cfg_reverse_cooldown_ticks: u64,
    state: HashMap<String, SymbolState>,
}

impl OrderThrottle {
    pub fn new(cfg: ThrottleConfig) -> Self {
        Self {
            cfg_min_interval_ms: cfg.min_order_interval_ms,
            cfg_reverse_cooldown_ticks: cfg.reverse_signal_cooldown_ticks,
            state: HashMap::new(),
        }
    }

    /// Check whether a submission for `symbol` is allowed right now.
    pub fn check(
        &self,
        symbol: &str,
        now_ms: i64,
        tick: u64,
        reduce_only: bool,
        direction: Direction,
    ) -> Result<(), ThrottleRejection> {
        let Some(s) = self.state.get(symbol) else {
            return Ok(());
        };

        if let Some(last_ms) = s.last_submit_ms {
            let elapsed = now_ms - last_ms;
            if elapsed < self.cfg_min_interval_ms {
                return Err(ThrottleRejection::MinIntervalRemaining {
                    ms_remaining: self.cfg_min_interval_ms - elapsed,
                });
            }
        }

        if !reduce_only {
            if let (Some(last_dir), Some(last_tick)) = (s.last_entry_direction, s.last_submit_tick) {
                if direction != last_dir {
                    let elapsed_ticks = tick.saturating_sub(last_tick);
                    if elapsed_ticks < self.cfg_reverse_cooldown_ticks {
                        return Err(ThrottleRejection::ReverseCooldown {
                            ticks_remaining: self.cfg_reverse_cooldown_ticks - elapsed_ticks,
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Record that a submission for `symbol` was accepted.
    pub fn on_accepted(
        &mut self,
        symbol: &str,
        now_ms: i64,
        tick: u64,
        reduce_only: bool,
        direction: Direction,
    ) {
        let entry = self.state.entry(symbol.to_string()).or_default();
        entry.last_submit_ms = Some(now_ms);
        entry.last_submit_tick = Some(tick);
        if !reduce_only {
            entry.last_entry_direction = Some(direction);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_submission_for_symbol_is_unthrottled() {
        let t = OrderThrottle::new(ThrottleConfig {
            min_order_interval_ms: 1000,
            reverse_signal_cooldown_ticks: 5,
        });
        assert!(t.check("BTCUSDT", 0, 0, false, Direction::Up).is_ok());
    }

    #[test]
    fn min_interval_rejects_then_clears_after_elapsed() {
        let mut t = OrderThrottle::new(ThrottleConfig {
            min_order_interval_ms: 1000,
            reverse_signal_cooldown_ticks: 0,
        });
        t.on_accepted("BTCUSDT", 0, 0, false, Direction::Up);
        assert_eq!(
            t.check("BTCUSDT", 500, 1, false, Direction::Up),
            Err(ThrottleRejection::MinIntervalRemaining { ms_remaining: 500 })
        );
        assert!(t.check("BTCUSDT", 1000, 1, false, Direction::Up).is_ok());
    }

    #[test]
    fn reverse_entry_within_cooldown_is_rejected_but_same_direction_is_not() {
        let mut t = OrderThrottle::new(ThrottleConfig {
            min_order_interval_ms: 0,
            reverse_signal_cooldown_ticks: 5,
        });
        t.on_accepted("BTCUSDT", 0, 10, false, Direction::Up);
        assert!(t.check("BTCUSDT", 0, 11, false, Direction::Up).is_ok());
        assert_eq!(
            t.check("BTCUSDT", 0, 11, false, Direction::Down),
            Err(ThrottleRejection::ReverseCooldown { ticks_remaining: 4 })
        );
        assert!(t.check("BTCUSDT", 0, 15, false, Direction::Down).is_ok());
    }

    #[test]
    fn reduce_only_bypasses_reverse_cooldown_and_does_not_update_direction() {
        let mut t = OrderThrottle::new(ThrottleConfig {
            min_order_interval_ms: 0,
            reverse_signal_cooldown_ticks: 5,
        });
        t.on_accepted("BTCUSDT", 0, 10, false, Direction::Up);
        assert!(t.check("BTCUSDT", 0, 11, true, Direction::Down).is_ok());
        t.on_accepted("BTCUSDT", 0, 11, true, Direction::Down);
        assert!(t.check("BTCUSDT", 0, 12, false, Direction::Down).is_err());
    }
}
