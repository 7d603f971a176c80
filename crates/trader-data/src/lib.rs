//! 실행 코어의 영속성 계층.
//!
//! 이 crate는 다음을 제공합니다:
//! - 활성 주문, 전략 상태, 모의 계좌 원장 저장소 trait
//! - SQLite 기반 구현 (`SqliteStore`)
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_data::{OrderStore, SqliteStore};
//!
//! let store = SqliteStore::connect("sqlite://trader.db").await?;
//! let orders = store.load_active_orders().await?;
//! ```

pub mod error;
pub mod repository;
pub mod storage;

pub use error::{Result, StoreError};
pub use repository::{OrderStore, PaperLedgerSnapshot, PaperLedgerStore, StrategyStateStore};
pub use storage::sqlite::SqliteStore;
