//! 도메인 모델.

pub mod account;
pub mod exchange_provider;
pub mod market;
pub mod order;
pub mod signal;
pub mod strategy_state;

pub use account::{normalize_balance, AccountBalance, AccountSnapshot, BalanceParseError, Position};
pub use exchange_provider::{
    BalancePayload, Exchange, ExchangeError, ExecutionReport, FillEvent, OrderAck,
    OrderRejection, OrderRequest, Quote,
};
pub use market::{AlwaysOpen, MarketClock};
pub use order::{Order, OrderKind, OrderOrigin, OrderStatus, Side};
pub use signal::{Signal, SignalSide};
pub use strategy_state::StrategyState;
