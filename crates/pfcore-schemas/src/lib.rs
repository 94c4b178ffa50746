//! Shared data model for the trading core: market data, signals, orders,
//! fills, and exchange-reported state. Every other crate in the workspace
//! depends on these types rather than redefining its own.

use serde::{Deserialize, Serialize};

/// One tick of market data for a symbol.
///
/// `mark_price`, when present and positive, is authoritative for valuation;
/// otherwise `last_price` is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub ts_ms: i64,
    pub symbol: String,
    pub last_price: f64,
    pub mark_price: f64,
    pub volume: Option<f64>,
    pub interval_ms: Option<i64>,
}

impl MarketEvent {
    /// The price to use for valuation: mark if present and positive, else last.
    pub fn effective_price(&self) -> f64 {
        if self.mark_price > 0.0 {
            self.mark_price
        } else {
            self.last_price
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Down = -1,
    Flat = 0,
    Up = 1,
}

impl Direction {
    pub fn sign(self) -> f64 {
        self as i8 as f64
    }

    pub fn of(x: f64) -> Self {
        if x > 0.0 {
            Direction::Up
        } else if x < 0.0 {
            Direction::Down
        } else {
            Direction::Flat
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Flat => Direction::Flat,
        }
    }
}

/// Strategy output: an opaque suggested position, split into trend and
/// defensive components so the evolution controller can re-blend without
/// re-running the strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub suggested_notional_usd: f64,
    pub direction: Direction,
    pub trend_notional_usd: f64,
    pub defensive_notional_usd: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    Uptrend,
    Downtrend,
    Range,
    Extreme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RegimeBucket {
    Trend,
    Range,
    Extreme,
}

impl Regime {
    pub fn bucket(self) -> RegimeBucket {
        match self {
            Regime::Uptrend | Regime::Downtrend => RegimeBucket::Trend,
            Regime::Range => RegimeBucket::Range,
            Regime::Extreme => RegimeBucket::Extreme,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeState {
    pub regime: Regime,
    pub bucket: RegimeBucket,
    pub instant_return: f64,
    pub trend_strength: f64,
    pub volatility_level: f64,
    pub warmup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetPosition {
    pub target_notional_usd: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskMode {
    Normal,
    Degraded,
    Cooldown,
    Fuse,
    ReduceOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub degraded: f64,
    pub cooldown: f64,
    pub fuse: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            degraded: 0.08,
            cooldown: 0.12,
            fuse: 0.20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskAdjustedPosition {
    pub adjusted_notional_usd: f64,
    pub reduce_only: bool,
    pub risk_mode: RiskMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderPurpose {
    Entry,
    Reduce,
    Sl,
    Tp,
}

impl OrderPurpose {
    pub fn to_wire(self) -> u8 {
        match self {
            OrderPurpose::Entry => 0,
            OrderPurpose::Reduce => 1,
            OrderPurpose::Sl => 2,
            OrderPurpose::Tp => 3,
        }
    }

    pub fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(OrderPurpose::Entry),
            1 => Some(OrderPurpose::Reduce),
            2 => Some(OrderPurpose::Sl),
            3 => Some(OrderPurpose::Tp),
            _ => None,
        }
    }

    pub fn is_protective(self) -> bool {
        matches!(self, OrderPurpose::Sl | OrderPurpose::Tp)
    }

    pub fn is_opening(self) -> bool {
        matches!(self, OrderPurpose::Entry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidityPreference {
    Auto,
    Maker,
    Taker,
}

impl LiquidityPreference {
    pub fn to_wire(self) -> u8 {
        match self {
            LiquidityPreference::Auto => 0,
            LiquidityPreference::Maker => 1,
            LiquidityPreference::Taker => 2,
        }
    }

    pub fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(LiquidityPreference::Auto),
            1 => Some(LiquidityPreference::Maker),
            2 => Some(LiquidityPreference::Taker),
            _ => None,
        }
    }
}

/// A durably-logged, globally unique order instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub client_order_id: String,
    pub parent_order_id: Option<String>,
    pub symbol: String,
    pub purpose: OrderPurpose,
    pub reduce_only: bool,
    pub direction: Direction,
    pub qty: f64,
    pub price: f64,
    pub liquidity_preference: LiquidityPreference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Liquidity {
    Maker,
    Taker,
    Unknown,
}

/// An exchange-reported execution. `fill_id` is the dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    pub fill_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub qty: f64,
    pub price: f64,
    pub fee: f64,
    pub liquidity: Liquidity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    New,
    Sent,
    Partial,
    Filled,
    Rejected,
    Cancelled,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Rejected | OrderState::Cancelled
        )
    }

    pub fn is_non_terminal_open(self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub intent: OrderIntent,
    pub state: OrderState,
    pub filled_qty: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    pub qty: f64,
    pub avg_entry_price: f64,
    pub mark_price: f64,
    pub liquidation_price: Option<f64>,
}

impl Default for PositionState {
    fn default() -> Self {
        Self {
            qty: 0.0,
            avg_entry_price: 0.0,
            mark_price: 0.0,
            liquidation_price: None,
        }
    }
}

impl PositionState {
    pub fn is_flat(&self) -> bool {
        self.qty.abs() < 1e-12
    }

    pub fn notional_usd(&self) -> f64 {
        self.qty * self.mark_price
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RemotePositionSnapshot {
    pub qty: f64,
    pub avg_entry_price: f64,
    pub mark_price: f64,
    pub liquidation_price: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteAccountBalance {
    pub equity_usd: Option<f64>,
    pub wallet_balance_usd: Option<f64>,
    pub unrealized_pnl_usd: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub tradable: bool,
    pub qty_step: f64,
    pub min_order_qty: f64,
    pub max_mkt_order_qty: Option<f64>,
    pub min_notional_usd: f64,
    pub price_tick: f64,
    pub qty_precision: u32,
    pub price_precision: u32,
}

pub const EPSILON: f64 = 1e-8;

/// Monotonic tick counter, wall-clock helper, and unique `client_order_id`
/// minting. One instance lives for the life of the bot process.
pub mod clock {
    use chrono::Utc;

    /// Current wall-clock time in epoch milliseconds.
    pub fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Mints globally-unique `client_order_id`s as
    /// `"{symbol}-{ts_ms}-{instance_tag}-{seq}"`.
    ///
    /// `instance_tag` distinguishes concurrently-running processes (config or
    /// a short `uuid` v4 suffix) so ids stay unique even if the WAL is shared
    /// across restarts with overlapping wall-clock ranges.
    #[derive(Debug, Clone)]
    pub struct ClientOrderIdMinter {
        instance_tag: String,
        seq: u64,
    }

    impl ClientOrderIdMinter {
        pub fn new(instance_tag: impl Into<String>) -> Self {
            Self {
                instance_tag: instance_tag.into(),
                seq: 0,
            }
        }

        /// A fresh minter tagged with a random short `uuid` v4 suffix.
        pub fn with_random_tag() -> Self {
            let tag = uuid::Uuid::new_v4().to_string()[..8].to_string();
            Self::new(tag)
        }

        pub fn next(&mut self, symbol: &str, ts_ms: i64) -> String {
            self.seq += 1;
            format!("{}-{}-{}-{}", symbol, ts_ms, self.instance_tag, self.seq)
        }
    }

    /// Monotonic logical tick counter: one tick per successfully-polled
    /// market event.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct TickCounter(u64);

    impl TickCounter {
        pub fn new() -> Self {
            Self(0)
        }

        pub fn advance(&mut self) -> u64 {
            self.0 += 1;
            self.0
        }

        pub fn current(&self) -> u64 {
            self.0
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn minted_ids_are_unique_and_monotonic_in_seq() {
            let mut m = ClientOrderIdMinter::new("inst1");
            let a = m.next("BTCUSDT", 1000);
            let b = m.next("BTCUSDT", 1000);
            assert_ne!(a, b);
            assert!(a.ends_with("-1"));
            assert!(b.ends_with("-2"));
        }

        #[test]
        fn tick_counter_advances_monotonically() {
            let mut t = TickCounter::new();
            assert_eq!(t.advance(), 1);
            assert_eq!(t.advance(), 2);
            assert_eq!(t.current(), 2);
        }
    }
}
