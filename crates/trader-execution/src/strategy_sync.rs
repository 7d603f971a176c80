//! 체결 이벤트를 전략 상태에 반영.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use trader_core::StrategyState;
use trader_data::StrategyStateStore;

use crate::error::Result;
use crate::order_manager::OrderEvent;

/// 전략 상태 동기화기.
pub struct StrategyStateSync {
    store: Arc<dyn StrategyStateStore>,
}

impl StrategyStateSync {
    /// 새 동기화기 생성.
    pub fn new(store: Arc<dyn StrategyStateStore>) -> Self {
        Self { store }
    }

    /// 주문 이벤트 반영.
    ///
    /// 전략 ID가 있는 체결 이벤트만 처리합니다. 갱신된 상태를 반환합니다.
    pub async fn apply(&self, event: &OrderEvent) -> Result<Option<StrategyState>> {
        let OrderEvent::Filled {
            symbol,
            side,
            price,
            quantity,
            strategy_id: Some(strategy_id),
            ..
        } = event
        else {
            return Ok(None);
        };

        let mut state = self
            .store
            .load_strategy_state(strategy_id, symbol)
            .await?
            .unwrap_or_else(|| StrategyState::new(strategy_id.as_str(), symbol.as_str()));

        let realized = state.apply_fill(*side, *quantity, *price);
        state.last_update = Utc::now();
        self.store.save_strategy_state(&state).await?;

        if realized.is_zero() {
            debug!(strategy_id = %strategy_id, symbol = %symbol, position = %state.position, "전략 상태 갱신");
        } else {
            info!(
                strategy_id = %strategy_id,
                symbol = %symbol,
                realized = %realized,
                accumulated = %state.accumulated_profit,
                "전략 실현 손익 반영"
            );
        }

        Ok(Some(state))
    }
}
