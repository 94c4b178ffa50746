//! Order Manager: the order lifecycle state machine, net-fill aggregation,
//! and protective-sibling (SL/TP OCO) lookup.
//!
//! # Design
//!
//! Records are keyed by `client_order_id` and never removed once registered.
//! `on_fill` is intentionally permissive: a fill for an unknown or already-
//! terminal `client_order_id` still updates the net-filled-qty accumulators
//! (it represents an externally-originated fill observed after a remote
//! resync), but does not mutate the (absent or terminal) order record.

use anyhow::{anyhow, Result};
use pfcore_schemas::{Direction, FillEvent, OrderIntent, OrderPurpose, OrderRecord, OrderState, EPSILON};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct OrderManager {
    orders: HashMap<String, OrderRecord>,
    /// parent_order_id -> children client_order_ids, for sibling lookup.
    children_of: HashMap<String, Vec<String>>,
    net_filled_qty: f64,
    net_filled_qty_by_symbol: HashMap<String, f64>,
}

impl OrderManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_intent(&mut self, intent: OrderIntent) -> Result<()> {
        if intent.client_order_id.is_empty() {
            return Err(anyhow!("register_intent: empty client_order_id"));
        }
        if self.orders.contains_key(&intent.client_order_id) {
            return Err(anyhow!(
                "register_intent: duplicate client_order_id {}",
                intent.client_order_id
            ));
        }
        if let Some(parent) = intent.parent_order_id.clone() {
            self.children_of
                .entry(parent)
                .or_default()
                .push(intent.client_order_id.clone());
        }
        let cid = intent.client_order_id.clone();
        self.orders.insert(
            cid,
            OrderRecord {
                intent,
                state: OrderState::New,
                filled_qty: 0.0,
            },
        );
        Ok(())
    }

    pub fn mark_sent(&mut self, cid: &str) {
        self.transition_if_open(cid, OrderState::Sent);
    }

    pub fn mark_rejected(&mut self, cid: &str) {
        self.transition_if_open(cid, OrderState::Rejected);
    }

    pub fn mark_cancelled(&mut self, cid: &str) {
        self.transition_if_open(cid, OrderState::Cancelled);
    }

    fn transition_if_open(&mut self, cid: &str, to: OrderState) {
        if let Some(rec) = self.orders.get_mut(cid) {
            if !rec.state.is_terminal() {
                rec.state = to;
            }
        }
    }

    pub fn get(&self, cid: &str) -> Option<&OrderRecord> {
        self.orders.get(cid)
    }

    /// Apply a fill. Always updates net-filled-qty accumulators; updates the
    /// order record only if it exists and is not already terminal.
    pub fn on_fill(&mut self, fill: &FillEvent) {
        let signed_qty = fill.direction.sign() * fill.qty;
        self.net_filled_qty += signed_qty;
        *self
            .net_filled_qty_by_symbol
            .entry(fill.symbol.clone())
            .or_insert(0.0) += signed_qty;

        if let Some(rec) = self.orders.get_mut(&fill.client_order_id) {
            if !rec.state.is_terminal() {
                rec.filled_qty += fill.qty;
                if rec.filled_qty >= rec.intent.qty - EPSILON {
                    rec.state = OrderState::Filled;
                } else {
                    rec.state = OrderState::Partial;
                }
            }
        }
    }

    pub fn net_filled_qty(&self) -> f64 {
        self.net_filled_qty
    }

    pub fn net_filled_qty_for_symbol(&self, symbol: &str) -> f64 {
        *self.net_filled_qty_by_symbol.get(symbol).unwrap_or(&0.0)
    }

    /// Directly seed the net-filled-qty baseline for a symbol, used by the
    /// reconciler's auto-resync path.
    pub fn seed_net_filled_qty_for_symbol(&mut self, symbol: &str, qty: f64) {
        self.net_filled_qty_by_symbol.insert(symbol.to_string(), qty);
    }

    pub fn find_open_protective_sibling(
        &self,
        parent_id: &str,
        purpose: OrderPurpose,
    ) -> Option<&OrderRecord> {
        let wanted = match purpose {
            OrderPurpose::Sl => OrderPurpose::Tp,
            OrderPurpose::Tp => OrderPurpose::Sl,
            _ => return None,
        };
        let children = self.children_of.get(parent_id)?;
        children.iter().find_map(|cid| {
            let rec = self.orders.get(cid)?;
            if rec.intent.purpose == wanted && !rec.state.is_terminal() {
                Some(rec)
            } else {
                None
            }
        })
    }

    pub fn has_open_protection(&self, parent_id: &str) -> bool {
        let Some(children) = self.children_of.get(parent_id) else {
            return false;
        };
        children.iter().any(|cid| {
            self.orders.get(cid).is_some_and(|rec| {
                rec.intent.purpose.is_protective() && !rec.state.is_terminal()
            })
        })
    }

    /// client_order_ids with purpose in {Entry, Reduce} and a non-terminal state.
    pub fn pending_net_position_orders(&self) -> Vec<&OrderRecord> {
        self.orders
            .values()
            .filter(|rec| {
                matches!(rec.intent.purpose, OrderPurpose::Entry | OrderPurpose::Reduce)
                    && !rec.state.is_terminal()
            })
            .collect()
    }

    pub fn is_registered(&self, cid: &str) -> bool {
        self.orders.contains_key(cid)
    }

    pub fn known_ids(&self) -> HashSet<String> {
        self.orders.keys().cloned().collect()
    }
}

pub fn signed_fill_qty(direction: Direction, qty: f64) -> f64 {
    direction.sign() * qty
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfcore_schemas::{Liquidity, LiquidityPreference};

    fn entry_intent(cid: &str, symbol: &str, qty: f64) -> OrderIntent {
        OrderIntent {
            client_order_id: cid.to_string(),
            parent_order_id: None,
            symbol: symbol.to_string(),
            purpose: OrderPurpose::Entry,
            reduce_only: false,
            direction: Direction::Up,
            qty,
            price: 100.0,
            liquidity_preference: LiquidityPreference::Maker,
        }
    }

    fn fill(cid: &str, symbol: &str, qty: f64, fid: &str) -> FillEvent {
        FillEvent {
            fill_id: fid.to_string(),
            client_order_id: cid.to_string(),
            symbol: symbol.to_string(),
            direction: Direction::Up,
            qty,
            price: 100.0,
            fee: 0.0,
            liquidity: Liquidity::Maker,
        }
    }

    #[test]
    fn register_rejects_duplicates_and_empty() {
        let mut oms = OrderManager::new();
        assert!(oms.register_intent(entry_intent("", "BTCUSDT", 1.0)).is_err());
        oms.register_intent(entry_intent("c1", "BTCUSDT", 1.0)).unwrap();
        assert!(oms.register_intent(entry_intent("c1", "BTCUSDT", 1.0)).is_err());
    }

    #[test]
    fn partial_then_full_fill_transitions() {
        let mut oms = OrderManager::new();
        oms.register_intent(entry_intent("c1", "BTCUSDT", 2.0)).unwrap();
        oms.on_fill(&fill("c1", "BTCUSDT", 0.8, "f1"));
        assert_eq!(oms.get("c1").unwrap().state, OrderState::Partial);
        oms.on_fill(&fill("c1", "BTCUSDT", 1.2, "f2"));
        assert_eq!(oms.get("c1").unwrap().state, OrderState::Filled);
        assert_eq!(oms.net_filled_qty_for_symbol("BTCUSDT"), 2.0);
    }

    #[test]
    fn fill_for_unknown_id_still_updates_net_qty() {
        let mut oms = OrderManager::new();
        oms.on_fill(&fill("ghost", "ETHUSDT", 5.0, "f1"));
        assert_eq!(oms.net_filled_qty_for_symbol("ETHUSDT"), 5.0);
        assert!(oms.get("ghost").is_none());
    }

    #[test]
    fn terminal_states_are_no_ops_for_mark_calls() {
        let mut oms = OrderManager::new();
        oms.register_intent(entry_intent("c1", "BTCUSDT", 1.0)).unwrap();
        oms.mark_cancelled("c1");
        assert_eq!(oms.get("c1").unwrap().state, OrderState::Cancelled);
        oms.mark_sent("c1");
        assert_eq!(oms.get("c1").unwrap().state, OrderState::Cancelled);
    }

    #[test]
    fn protective_sibling_oco_lookup() {
        let mut oms = OrderManager::new();
        oms.register_intent(entry_intent("E", "BTCUSDT", 1.0)).unwrap();
        let mut sl = entry_intent("SL1", "BTCUSDT", 1.0);
        sl.purpose = OrderPurpose::Sl;
        sl.parent_order_id = Some("E".to_string());
        let mut tp = entry_intent("TP1", "BTCUSDT", 1.0);
        tp.purpose = OrderPurpose::Tp;
        tp.parent_order_id = Some("E".to_string());
        oms.register_intent(sl).unwrap();
        oms.register_intent(tp).unwrap();

        assert!(oms.has_open_protection("E"));
        let sibling = oms
            .find_open_protective_sibling("E", OrderPurpose::Sl)
            .unwrap();
        assert_eq!(sibling.intent.client_order_id, "TP1");

        oms.mark_cancelled("TP1");
        assert!(oms
            .find_open_protective_sibling("E", OrderPurpose::Sl)
            .is_none());
    }
}
