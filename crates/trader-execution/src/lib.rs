//! 주문 실행 코어.
//!
//! 이 crate는 다음을 제공합니다:
//! - 주문 수명주기와 복구를 담당하는 주문 관리자
//! - 잔고 동기화와 매수 가능 금액 검사를 담당하는 계좌 관리자
//! - 주기/시각 작업 스케줄러와 KRX 장 운영 시계
//! - 신호 → 리스크 → 주문 → 알림을 조율하는 실행 엔진
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_execution::{ExecutionEngine, OrderManager, Scheduler, register_engine_jobs};
//!
//! let orders = Arc::new(OrderManager::restore(exchange.clone(), store, Default::default()).await?);
//! let engine = Arc::new(ExecutionEngine::new(mode, orders, account, risk, queue, clock));
//! register_engine_jobs(&mut scheduler, engine.clone(), &JobConfig::default())?;
//! engine.start().await;
//! ```

pub mod account_manager;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod market_hours;
pub mod order_manager;
pub mod scheduler;
pub mod strategy_sync;

#[cfg(test)]
mod testing;

// 주요 타입 재내보내기
pub use account_manager::{has_buying_power, AccountConfig, AccountManager};
pub use engine::{EngineSnapshot, EngineState, ExecutionEngine, SessionTransition, TradingMode};
pub use error::{Result, TradingError};
pub use jobs::{register_engine_jobs, JobConfig};
pub use market_hours::{KrxMarketClock, MarketStatus};
pub use order_manager::{OrderEvent, OrderManager, OrderManagerConfig};
pub use scheduler::{Scheduler, SchedulerConfig, TaskFn};
pub use strategy_sync::StrategyStateSync;
