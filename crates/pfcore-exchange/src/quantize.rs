//! Submit-side quantization: snaps a requested quantity to the venue's
//! lot/tick rules and decides the concrete order shape (market, passive
//! limit, or stop-trigger) before it reaches the wire.

use pfcore_schemas::{Direction, LiquidityPreference, OrderIntent, OrderPurpose, SymbolInfo};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QuantizeError {
    BelowMinNotional,
    BelowMinQty,
    StepMisaligned,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerDirection {
    Rising,
    Falling,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderShape {
    Market,
    Limit { price: f64, post_only: bool },
    StopTrigger { trigger_price: f64, trigger_direction: TriggerDirection, close_on_trigger: bool },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantizedOrder {
    pub qty: f64,
    pub shape: OrderShape,
}

fn floor_to_step(qty: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return qty;
    }
    (qty / step).floor() * step
}

fn snap_tick(price: f64, tick: f64, round_up: bool) -> f64 {
    if tick <= 0.0 {
        return price;
    }
    if round_up {
        (price / tick).ceil() * tick
    } else {
        (price / tick).floor() * tick
    }
}

fn is_step_aligned(qty: f64, step: f64) -> bool {
    if step <= 0.0 {
        return true;
    }
    let ratio = qty / step;
    (ratio - ratio.round()).abs() < 1e-6
}

/// Run the venue's submit-side quantization and order-shape decision for
/// `intent`. `ref_price` is the latest known mark/last price, used both for
/// the min-notional check and to derive a passive limit price for makers.
pub fn quantize_submit(
    intent: &OrderIntent,
    info: &SymbolInfo,
    ref_price: Option<f64>,
    maker_entry_enabled: bool,
    maker_offset_bps: f64,
    maker_post_only: bool,
) -> Result<QuantizedOrder, QuantizeError> {
    let mut qty = intent.qty;
    if let Some(max_qty) = info.max_mkt_order_qty {
        qty = qty.min(max_qty);
    }
    qty = floor_to_step(qty, info.qty_step);

    if let Some(price) = ref_price {
        if !intent.reduce_only && qty * price < info.min_notional_usd {
            return Err(QuantizeError::BelowMinNotional);
        }
    }
    if qty < info.min_order_qty {
        return Err(QuantizeError::BelowMinQty);
    }
    if !is_step_aligned(qty, info.qty_step) {
        return Err(QuantizeError::StepMisaligned);
    }

    if intent.purpose.is_protective() {
        let close_on_trigger = true;
        let trigger_direction = match (intent.purpose, intent.direction) {
            // A protective order's own direction is opposite the position it
            // closes; derive the trigger side from that relationship.
            (OrderPurpose::Sl, Direction::Down) => TriggerDirection::Falling,
            (OrderPurpose::Sl, Direction::Up) => TriggerDirection::Rising,
            (OrderPurpose::Tp, Direction::Down) => TriggerDirection::Rising,
            (OrderPurpose::Tp, Direction::Up) => TriggerDirection::Falling,
            _ => TriggerDirection::Falling,
        };
        return Ok(QuantizedOrder {
            qty,
            shape: OrderShape::StopTrigger {
                trigger_price: intent.price,
                trigger_direction,
                close_on_trigger,
            },
        });
    }

    let wants_maker = intent.purpose.is_opening()
        && maker_entry_enabled
        && intent.liquidity_preference != LiquidityPreference::Taker;

    if wants_maker {
        let Some(ref_price) = ref_price else {
            return Ok(QuantizedOrder { qty, shape: OrderShape::Market });
        };
        let offset = maker_offset_bps / 10_000.0;
        let (raw_price, round_up) = match intent.direction {
            Direction::Up => (ref_price * (1.0 - offset), false),
            Direction::Down => (ref_price * (1.0 + offset), true),
            Direction::Flat => (ref_price, false),
        };
        let price = snap_tick(raw_price, info.price_tick, round_up);
        return Ok(QuantizedOrder {
            qty,
            shape: OrderShape::Limit {
                price,
                post_only: maker_post_only,
            },
        });
    }

    Ok(QuantizedOrder { qty, shape: OrderShape::Market })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfcore_schemas::LiquidityPreference;

    fn info() -> SymbolInfo {
        SymbolInfo {
            symbol: "BTCUSDT".to_string(),
            tradable: true,
            qty_step: 0.001,
            min_order_qty: 0.001,
            max_mkt_order_qty: Some(100.0),
            min_notional_usd: 5.0,
            price_tick: 0.5,
            qty_precision: 3,
            price_precision: 1,
        }
    }

    fn entry(qty: f64, direction: Direction, liquidity_preference: LiquidityPreference) -> OrderIntent {
        OrderIntent {
            client_order_id: "cid".to_string(),
            parent_order_id: None,
            symbol: "BTCUSDT".to_string(),
            purpose: OrderPurpose::Entry,
            reduce_only: false,
            direction,
            qty,
            price: 100.0,
            liquidity_preference,
        }
    }

    #[test]
    fn qty_snapped_down_to_step() {
        let got = quantize_submit(&entry(0.0037, Direction::Up, LiquidityPreference::Taker), &info(), Some(100.0), false, 0.0, false).unwrap();
        assert!((got.qty - 0.003).abs() < 1e-9);
    }

    #[test]
    fn below_min_notional_is_rejected() {
        let got = quantize_submit(&entry(0.001, Direction::Up, LiquidityPreference::Taker), &info(), Some(100.0), false, 0.0, false);
        assert_eq!(got, Err(QuantizeError::BelowMinNotional));
    }

    #[test]
    fn maker_buy_quantizes_price_downward() {
        let got = quantize_submit(&entry(1.0, Direction::Up, LiquidityPreference::Maker), &info(), Some(100.0), true, 10.0, true).unwrap();
        match got.shape {
            OrderShape::Limit { price, post_only } => {
                assert!(price < 100.0);
                assert!(post_only);
            }
            _ => panic!("expected limit order"),
        }
    }

    #[test]
    fn maker_sell_quantizes_price_upward() {
        let got = quantize_submit(&entry(1.0, Direction::Down, LiquidityPreference::Maker), &info(), Some(100.0), true, 10.0, true).unwrap();
        match got.shape {
            OrderShape::Limit { price, .. } => assert!(price > 100.0),
            _ => panic!("expected limit order"),
        }
    }

    #[test]
    fn protective_order_is_stop_trigger() {
        let sl = OrderIntent {
            purpose: OrderPurpose::Sl,
            direction: Direction::Down,
            reduce_only: true,
            ..entry(1.0, Direction::Down, LiquidityPreference::Taker)
        };
        let got = quantize_submit(&sl, &info(), Some(100.0), false, 0.0, false).unwrap();
        match got.shape {
            OrderShape::StopTrigger { trigger_direction, close_on_trigger, .. } => {
                assert_eq!(trigger_direction, TriggerDirection::Falling);
                assert!(close_on_trigger);
            }
            _ => panic!("expected stop trigger"),
        }
    }
}
