//! Converts a risk-adjusted target notional plus the current position into a
//! single `OrderIntent`, and builds protective SL/TP intents off an entry
//! fill.

use pfcore_schemas::clock::ClientOrderIdMinter;
use pfcore_schemas::{
    Direction, FillEvent, LiquidityPreference, OrderIntent, OrderPurpose, RiskAdjustedPosition,
};

#[derive(Debug, Clone, Copy)]
pub struct ExecutionConfig {
    pub max_order_notional: f64,
    pub min_rebalance_notional: f64,
    pub direct_flip_entry_enabled: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_order_notional: f64::INFINITY,
            min_rebalance_notional: 0.0,
            direct_flip_entry_enabled: false,
        }
    }
}

/// Build the next `OrderIntent` to move `current_notional` toward
/// `risk_adjusted`'s target, or `None` if no order is warranted this tick.
pub fn build_intent(
    cfg: &ExecutionConfig,
    risk_adjusted: &RiskAdjustedPosition,
    current_notional: f64,
    price: f64,
    symbol: &str,
    minter: &mut ClientOrderIdMinter,
    ts_ms: i64,
) -> Option<OrderIntent> {
    if price <= 0.0 {
        return None;
    }

    let target = risk_adjusted.adjusted_notional_usd;

    let effective_target = if risk_adjusted.reduce_only {
        if current_notional == 0.0 {
            return None;
        }
        if current_notional > 0.0 {
            target.clamp(0.0, current_notional)
        } else {
            target.clamp(current_notional, 0.0)
        }
    } else {
        target
    };

    let delta = effective_target - current_notional;

    if !risk_adjusted.reduce_only && delta.abs() < cfg.min_rebalance_notional {
        return None;
    }
    if risk_adjusted.reduce_only && delta == 0.0 {
        return None;
    }

    let opposing_signs = current_notional != 0.0
        && effective_target != 0.0
        && current_notional.signum() != effective_target.signum();

    if opposing_signs && !risk_adjusted.reduce_only {
        if cfg.direct_flip_entry_enabled {
            let notional = delta.abs().min(cfg.max_order_notional);
            let direction = Direction::of(delta);
            let qty = notional / price;
            return Some(OrderIntent {
                client_order_id: minter.next(symbol, ts_ms),
                parent_order_id: None,
                symbol: symbol.to_string(),
                purpose: OrderPurpose::Entry,
                reduce_only: false,
                direction,
                qty,
                price,
                liquidity_preference: LiquidityPreference::Taker,
            });
        }

        let close_notional = current_notional.abs().min(cfg.max_order_notional);
        let direction = Direction::of(-current_notional);
        let qty = close_notional / price;
        return Some(OrderIntent {
            client_order_id: minter.next(symbol, ts_ms),
            parent_order_id: None,
            symbol: symbol.to_string(),
            purpose: OrderPurpose::Reduce,
            reduce_only: true,
            direction,
            qty,
            price,
            liquidity_preference: LiquidityPreference::Taker,
        });
    }

    let notional = delta.abs().min(cfg.max_order_notional);
    if notional <= 0.0 {
        return None;
    }
    let direction = Direction::of(delta);
    let qty = notional / price;
    let purpose = if risk_adjusted.reduce_only {
        OrderPurpose::Reduce
    } else {
        OrderPurpose::Entry
    };
    let liquidity_preference = if risk_adjusted.reduce_only {
        LiquidityPreference::Taker
    } else {
        LiquidityPreference::Maker
    };

    Some(OrderIntent {
        client_order_id: minter.next(symbol, ts_ms),
        parent_order_id: None,
        symbol: symbol.to_string(),
        purpose,
        reduce_only: risk_adjusted.reduce_only,
        direction,
        qty,
        price,
        liquidity_preference,
    })
}

/// Build a reduce-only protective trigger order off an entry fill.
///
/// `ratio` is a positive fraction; `purpose` selects SL (below entry for
/// longs) or TP (above entry for longs), with signs flipped for shorts.
pub fn build_protection_intent(
    entry_fill: &FillEvent,
    purpose: OrderPurpose,
    ratio: f64,
    minter: &mut ClientOrderIdMinter,
    ts_ms: i64,
) -> OrderIntent {
    debug_assert!(matches!(purpose, OrderPurpose::Sl | OrderPurpose::Tp));

    let long = entry_fill.direction == Direction::Up;
    let is_sl = purpose == OrderPurpose::Sl;
    // Long SL below entry, long TP above; short is mirrored.
    let sign: f64 = match (long, is_sl) {
        (true, true) => -1.0,
        (true, false) => 1.0,
        (false, true) => 1.0,
        (false, false) => -1.0,
    };
    let price = entry_fill.price * (1.0 + sign * ratio);

    OrderIntent {
        client_order_id: minter.next(&entry_fill.symbol, ts_ms),
        parent_order_id: Some(entry_fill.client_order_id.clone()),
        symbol: entry_fill.symbol.clone(),
        purpose,
        reduce_only: true,
        direction: entry_fill.direction.opposite(),
        qty: entry_fill.qty,
        price,
        liquidity_preference: LiquidityPreference::Taker,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfcore_schemas::{Liquidity, RiskMode};

    fn risk(adjusted: f64, reduce_only: bool) -> RiskAdjustedPosition {
        RiskAdjustedPosition {
            adjusted_notional_usd: adjusted,
            reduce_only,
            risk_mode: RiskMode::Normal,
        }
    }

    fn minter() -> ClientOrderIdMinter {
        ClientOrderIdMinter::new("t")
    }

    #[test]
    fn non_positive_price_yields_none() {
        let mut m = minter();
        let got = build_intent(&ExecutionConfig::default(), &risk(100.0, false), 0.0, 0.0, "BTCUSDT", &mut m, 1);
        assert!(got.is_none());
    }

    #[test]
    fn sub_threshold_delta_is_anti_chatter_filtered() {
        let cfg = ExecutionConfig {
            min_rebalance_notional: 50.0,
            ..Default::default()
        };
        let mut m = minter();
        let got = build_intent(&cfg, &risk(10.0, false), 0.0, 100.0, "BTCUSDT", &mut m, 1);
        assert!(got.is_none());
    }

    #[test]
    fn opening_from_flat_emits_maker_entry() {
        let mut m = minter();
        let got = build_intent(&ExecutionConfig::default(), &risk(1000.0, false), 0.0, 100.0, "BTCUSDT", &mut m, 1).unwrap();
        assert_eq!(got.purpose, OrderPurpose::Entry);
        assert_eq!(got.direction, Direction::Up);
        assert_eq!(got.liquidity_preference, LiquidityPreference::Maker);
        assert!((got.qty - 10.0).abs() < 1e-9);
    }

    #[test]
    fn flip_without_direct_flip_emits_reduce_only_close() {
        let mut m = minter();
        let got = build_intent(&ExecutionConfig::default(), &risk(-500.0, false), 1000.0, 100.0, "BTCUSDT", &mut m, 1).unwrap();
        assert_eq!(got.purpose, OrderPurpose::Reduce);
        assert!(got.reduce_only);
        assert_eq!(got.direction, Direction::Down);
        assert!((got.qty - 10.0).abs() < 1e-9);
    }

    #[test]
    fn flip_with_direct_flip_enabled_emits_single_entry() {
        let cfg = ExecutionConfig {
            direct_flip_entry_enabled: true,
            ..Default::default()
        };
        let mut m = minter();
        let got = build_intent(&cfg, &risk(-500.0, false), 1000.0, 100.0, "BTCUSDT", &mut m, 1).unwrap();
        assert_eq!(got.purpose, OrderPurpose::Entry);
        assert_eq!(got.liquidity_preference, LiquidityPreference::Taker);
        assert_eq!(got.direction, Direction::Down);
        assert!((got.qty - 15.0).abs() < 1e-9);
    }

    #[test]
    fn reduce_only_flat_position_yields_none() {
        let mut m = minter();
        let got = build_intent(&ExecutionConfig::default(), &risk(0.0, true), 0.0, 100.0, "BTCUSDT", &mut m, 1);
        assert!(got.is_none());
    }

    #[test]
    fn protection_sl_for_long_is_below_entry() {
        let fill = FillEvent {
            fill_id: "f1".to_string(),
            client_order_id: "cid1".to_string(),
            symbol: "BTCUSDT".to_string(),
            direction: Direction::Up,
            qty: 1.0,
            price: 100.0,
            fee: 0.0,
            liquidity: Liquidity::Taker,
        };
        let mut m = minter();
        let sl = build_protection_intent(&fill, OrderPurpose::Sl, 0.02, &mut m, 1);
        assert!((sl.price - 98.0).abs() < 1e-9);
        assert_eq!(sl.direction, Direction::Down);
        assert!(sl.reduce_only);
        assert_eq!(sl.parent_order_id.as_deref(), Some("cid1"));
    }

    #[test]
    fn protection_tp_for_short_is_below_entry() {
        let fill = FillEvent {
            fill_id: "f2".to_string(),
            client_order_id: "cid2".to_string(),
            symbol: "BTCUSDT".to_string(),
            direction: Direction::Down,
            qty: 1.0,
            price: 100.0,
            fee: 0.0,
            liquidity: Liquidity::Taker,
        };
        let mut m = minter();
        let tp = build_protection_intent(&fill, OrderPurpose::Tp, 0.03, &mut m, 1);
        assert!((tp.price - 97.0).abs() < 1e-9);
        assert_eq!(tp.direction, Direction::Up);
    }
}
