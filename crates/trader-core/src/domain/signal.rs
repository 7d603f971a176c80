//! 전략의 트레이딩 시그널.
//!
//! 외부 전략이 생성하는 매매 신호 타입을 정의합니다:
//! - `SignalSide` - 신호 방향 (매수, 매도, 청산)
//! - `Signal` - 매매 신호 엔티티 (불변)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::{OrderKind, Side};

/// 신호 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalSide {
    /// 신규 매수
    Buy,
    /// 매도
    Sell,
    /// 보유 포지션 청산
    Exit,
}

impl SignalSide {
    /// 주문 방향으로 변환.
    ///
    /// 롱 전용이므로 `Exit`는 매도 주문이 됩니다.
    pub fn order_side(self) -> Side {
        match self {
            SignalSide::Buy => Side::Buy,
            SignalSide::Sell | SignalSide::Exit => Side::Sell,
        }
    }

    /// 매수 신호 여부.
    pub fn is_buy(self) -> bool {
        matches!(self, SignalSide::Buy)
    }
}

impl std::fmt::Display for SignalSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalSide::Buy => write!(f, "BUY"),
            SignalSide::Sell => write!(f, "SELL"),
            SignalSide::Exit => write!(f, "EXIT"),
        }
    }
}

/// 전략이 생성한 트레이딩 신호.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// 고유 신호 ID
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// 종목 코드 (예: "005930")
    pub symbol: String,
    /// 신호 방향
    pub side: SignalSide,
    /// 신호 가격 (0 이하이면 시장가)
    pub price: Decimal,
    /// 신호 생성 시각
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// 신호 사유
    #[serde(default)]
    pub reason: String,
    /// 신뢰도 점수
    #[serde(default)]
    pub confidence: f64,
    /// 신호를 생성한 전략 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<String>,
}

impl Signal {
    /// 새 신호를 생성합니다.
    pub fn new(symbol: impl Into<String>, side: SignalSide, price: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            price,
            timestamp: Utc::now(),
            reason: String::new(),
            confidence: 0.0,
            strategy_id: None,
        }
    }

    /// 매수 신호를 생성합니다.
    pub fn buy(symbol: impl Into<String>, price: Decimal) -> Self {
        Self::new(symbol, SignalSide::Buy, price)
    }

    /// 매도 신호를 생성합니다.
    pub fn sell(symbol: impl Into<String>, price: Decimal) -> Self {
        Self::new(symbol, SignalSide::Sell, price)
    }

    /// 신호 사유 설정.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// 신뢰도 설정.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// 전략 ID 설정.
    pub fn with_strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = Some(strategy_id.into());
        self
    }

    /// 신호 가격으로부터 주문 유형 결정.
    pub fn order_kind(&self) -> OrderKind {
        OrderKind::from_price(self.price)
    }
}
