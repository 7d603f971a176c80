//! 저장소 추상화.
//!
//! 각 trait은 하나의 소유 컴포넌트만 쓰기 경로로 사용합니다:
//! - `OrderStore` - 주문 관리자 (활성 주문 미러)
//! - `StrategyStateStore` - 전략 상태 동기화
//! - `PaperLedgerStore` - 모의 거래소 원장

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use trader_core::{Order, Position, StrategyState};

use crate::error::Result;

/// 활성 주문 저장소.
///
/// 종료 상태(FILLED, CANCELLED)에 도달한 주문은 삭제되어야 하며,
/// 저장소에는 미체결 주문만 남습니다.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// 주문 저장 (있으면 갱신).
    async fn upsert_order(&self, order: &Order) -> Result<()>;

    /// 주문 삭제.
    async fn delete_order(&self, order_id: &str) -> Result<()>;

    /// 모든 활성 주문 조회 (생성 시각 순).
    async fn load_active_orders(&self) -> Result<Vec<Order>>;
}

/// 전략 상태 저장소.
#[async_trait]
pub trait StrategyStateStore: Send + Sync {
    /// 전략-종목 상태 조회.
    async fn load_strategy_state(
        &self,
        strategy_id: &str,
        symbol: &str,
    ) -> Result<Option<StrategyState>>;

    /// 전략-종목 상태 저장.
    async fn save_strategy_state(&self, state: &StrategyState) -> Result<()>;
}

/// 모의 계좌 원장 스냅샷.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperLedgerSnapshot {
    /// 예수금
    pub cash: Decimal,
    /// 누적 실현 손익
    pub realized_pnl: Decimal,
    /// 초기 자금
    pub initial_cash: Decimal,
    /// 보유 포지션 (현재가 = 마지막 시세)
    pub positions: Vec<Position>,
    /// 저장 시각
    pub updated_at: DateTime<Utc>,
}

/// 모의 계좌 원장 저장소.
#[async_trait]
pub trait PaperLedgerStore: Send + Sync {
    /// 원장 전체 저장 (기존 포지션은 교체).
    async fn save_paper_ledger(&self, ledger: &PaperLedgerSnapshot) -> Result<()>;

    /// 저장된 원장 조회.
    async fn load_paper_ledger(&self) -> Result<Option<PaperLedgerSnapshot>>;
}
