//! 주문 엔티티와 생명주기 상태.
//!
//! 상태 전이:
//!
//! ```text
//! PENDING → ACCEPTED → PARTIALLY_FILLED → FILLED
//!    │          │              │
//!    └──────────┴──────────────┴──→ CANCELLED
//! ```
//!
//! FILLED, CANCELLED는 종료 상태입니다.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 주문 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// 매수
    Buy,
    /// 매도
    Sell,
}

impl Side {
    /// 반대 방향.
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            _ => Err(format!("Invalid side: {}", s)),
        }
    }
}

/// 주문 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderKind {
    /// 시장가
    Market,
    /// 지정가
    Limit,
}

impl OrderKind {
    /// 가격이 0 이하이면 시장가, 아니면 지정가.
    pub fn from_price(price: Decimal) -> Self {
        if price <= Decimal::ZERO {
            OrderKind::Market
        } else {
            OrderKind::Limit
        }
    }
}

/// 주문 생명주기 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// 거래소 응답 대기
    Pending,
    /// 거래소 접수 완료
    Accepted,
    /// 부분 체결
    PartiallyFilled,
    /// 전량 체결 (종료)
    Filled,
    /// 취소 (종료)
    Cancelled,
}

impl OrderStatus {
    /// 종료 상태 여부.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }

    /// 허용되는 상태 전이인지 확인.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (Filled, _) | (Cancelled, _) => false,
            (_, Cancelled) => true,
            (Pending, Accepted) => true,
            (Pending | Accepted | PartiallyFilled, PartiallyFilled) => true,
            (Pending | Accepted | PartiallyFilled, Filled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "PENDING"),
            OrderStatus::Accepted => write!(f, "ACCEPTED"),
            OrderStatus::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "ACCEPTED" => Ok(OrderStatus::Accepted),
            "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            _ => Err(format!("Invalid order status: {}", s)),
        }
    }
}

/// 주문 출처.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderOrigin {
    /// 전략 신호로 제출
    Strategy,
    /// 사용자 수동 주문
    Manual,
    /// 외부 체결 이벤트로만 관측된 주문
    Unknown,
}

impl std::fmt::Display for OrderOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderOrigin::Strategy => write!(f, "STRATEGY"),
            OrderOrigin::Manual => write!(f, "MANUAL"),
            OrderOrigin::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl std::str::FromStr for OrderOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "STRATEGY" => Ok(OrderOrigin::Strategy),
            "MANUAL" => Ok(OrderOrigin::Manual),
            "UNKNOWN" => Ok(OrderOrigin::Unknown),
            _ => Err(format!("Invalid order origin: {}", s)),
        }
    }
}

/// 활성 주문.
///
/// `filled_quantity`는 단조 증가하며 `quantity`를 넘지 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// 주문 ID (거래소 발급 또는 시뮬레이션 생성)
    pub order_id: String,
    /// 종목 코드
    pub symbol: String,
    /// 방향
    pub side: Side,
    /// 주문 수량
    pub quantity: Decimal,
    /// 체결 수량
    pub filled_quantity: Decimal,
    /// 지정가 (0이면 시장가)
    pub price: Decimal,
    /// 상태
    pub status: OrderStatus,
    /// 출처
    pub origin: OrderOrigin,
    /// 생성 시각
    pub created_at: DateTime<Utc>,
    /// 소유 전략 ID
    pub strategy_id: Option<String>,
}

impl Order {
    /// 거래소에 접수된 주문 생성.
    pub fn accepted(
        order_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        origin: OrderOrigin,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            symbol: symbol.into(),
            side,
            quantity,
            filled_quantity: Decimal::ZERO,
            price,
            status: OrderStatus::Accepted,
            origin,
            created_at: Utc::now(),
            strategy_id: None,
        }
    }

    /// 전략 ID 설정.
    pub fn with_strategy(mut self, strategy_id: Option<String>) -> Self {
        self.strategy_id = strategy_id;
        self
    }

    /// 주문 유형.
    pub fn kind(&self) -> OrderKind {
        OrderKind::from_price(self.price)
    }

    /// 미체결 잔량.
    pub fn remaining_quantity(&self) -> Decimal {
        (self.quantity - self.filled_quantity).max(Decimal::ZERO)
    }

    /// 체결 반영.
    ///
    /// 체결 수량은 주문 수량으로 잘리며, 실제로 반영된 증분을 반환합니다.
    /// 반영 후 상태는 PARTIALLY_FILLED 또는 FILLED가 됩니다.
    pub fn apply_fill(&mut self, increment: Decimal) -> Decimal {
        if self.status.is_terminal() || increment <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let applied = increment.min(self.remaining_quantity());
        self.filled_quantity += applied;

        self.status = if self.filled_quantity >= self.quantity {
            OrderStatus::Filled
        } else if self.filled_quantity > Decimal::ZERO {
            OrderStatus::PartiallyFilled
        } else {
            self.status
        };

        applied
    }

    /// 생성 후 경과 시간.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}
