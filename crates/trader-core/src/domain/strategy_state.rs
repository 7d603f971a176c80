//! 전략별 영속 상태.
//!
//! 전략이 소유하지만 체결 이벤트가 들어올 때 실행 코어가 갱신합니다.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::order::Side;

/// 전략-종목 단위 상태.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyState {
    /// 전략 ID
    pub strategy_id: String,
    /// 종목 코드
    pub symbol: String,
    /// 순 보유 수량
    pub position: Decimal,
    /// 평균 진입가
    pub avg_price: Decimal,
    /// 누적 실현 손익
    pub accumulated_profit: Decimal,
    /// 지표 스냅샷 (자유 형식)
    pub indicators: Value,
    /// 마지막 갱신 시각
    pub last_update: DateTime<Utc>,
}

impl StrategyState {
    /// 빈 상태 생성.
    pub fn new(strategy_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            symbol: symbol.into(),
            position: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            accumulated_profit: Decimal::ZERO,
            indicators: Value::Object(Default::default()),
            last_update: Utc::now(),
        }
    }

    /// 체결 반영.
    ///
    /// 매수는 평균가를 가중 평균으로 갱신하고, 매도는 실현 손익을 누적한 뒤
    /// 포지션을 줄입니다. 포지션이 0이 되면 평균가도 0으로 초기화합니다.
    /// 반환값은 이번 체결로 실현된 손익입니다.
    pub fn apply_fill(&mut self, side: Side, quantity: Decimal, price: Decimal) -> Decimal {
        let mut realized = Decimal::ZERO;

        match side {
            Side::Buy => {
                let total = self.position + quantity;
                if total > Decimal::ZERO {
                    self.avg_price = (self.position * self.avg_price + quantity * price) / total;
                }
                self.position = total;
            }
            Side::Sell => {
                let closed = quantity.min(self.position).max(Decimal::ZERO);
                realized = (price - self.avg_price) * closed;
                self.accumulated_profit += realized;
                self.position = (self.position - quantity).max(Decimal::ZERO);
                if self.position.is_zero() {
                    self.avg_price = Decimal::ZERO;
                }
            }
        }

        self.last_update = Utc::now();
        realized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_buy_then_partial_sell() {
        let mut state = StrategyState::new("rsi_mean_reversion", "005930");
        state.apply_fill(Side::Buy, dec!(10), dec!(70000));
        state.apply_fill(Side::Buy, dec!(10), dec!(72000));
        assert_eq!(state.position, dec!(20));
        assert_eq!(state.avg_price, dec!(71000));

        let realized = state.apply_fill(Side::Sell, dec!(5), dec!(73000));
        assert_eq!(realized, dec!(10000));
        assert_eq!(state.position, dec!(15));
        assert_eq!(state.accumulated_profit, dec!(10000));
    }

    #[test]
    fn test_full_exit_resets_avg_price() {
        let mut state = StrategyState::new("grid", "000660");
        state.apply_fill(Side::Buy, dec!(3), dec!(150000));
        let realized = state.apply_fill(Side::Sell, dec!(3), dec!(140000));

        assert_eq!(realized, dec!(-30000));
        assert!(state.position.is_zero());
        assert!(state.avg_price.is_zero());
    }
}
