//! 거래소 실행 추상화.
//!
//! 실거래 어댑터와 모의 거래소가 함께 구현하는 거래소 중립적인 인터페이스와
//! 주문 요청/응답, 체결 이벤트, 호가 타입을 정의합니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::account::{normalize_balance, AccountSnapshot, BalanceParseError};
use super::order::{OrderKind, Side};

// =============================================================================
// 요청/응답 타입
// =============================================================================

/// 주문 요청.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// 종목 코드
    pub symbol: String,
    /// 방향
    pub side: Side,
    /// 수량
    pub quantity: Decimal,
    /// 지정가 (시장가이면 0)
    pub price: Decimal,
    /// 주문 유형
    pub kind: OrderKind,
}

impl OrderRequest {
    /// 시장가 주문 요청.
    pub fn market(symbol: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            price: Decimal::ZERO,
            kind: OrderKind::Market,
        }
    }

    /// 지정가 주문 요청.
    pub fn limit(symbol: impl Into<String>, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            price,
            kind: OrderKind::Limit,
        }
    }

    /// 가격으로 유형을 결정하는 주문 요청.
    pub fn from_price(symbol: impl Into<String>, side: Side, quantity: Decimal, price: Decimal) -> Self {
        match OrderKind::from_price(price) {
            OrderKind::Market => Self::market(symbol, side, quantity),
            OrderKind::Limit => Self::limit(symbol, side, quantity, price),
        }
    }
}

/// 주문 접수 응답.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    /// 거래소가 발급한 주문 ID
    pub order_id: String,
}

impl OrderAck {
    /// 새 응답 생성.
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
        }
    }
}

/// 거래소가 돌려준 원본 잔고 응답.
///
/// 필드명과 구조는 거래소마다 다르며, `normalize`로 정규 형식을 얻습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BalancePayload(pub Value);

impl BalancePayload {
    /// 정규화된 스냅샷으로 변환.
    pub fn normalize(&self) -> Result<AccountSnapshot, BalanceParseError> {
        normalize_balance(&self.0)
    }
}

/// 체결 이벤트.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    /// 주문 ID
    pub order_id: String,
    /// 종목 코드
    pub symbol: String,
    /// 방향
    pub side: Side,
    /// 체결 가격
    pub price: Decimal,
    /// 주문 수량 (누적 보고용)
    pub quantity: Decimal,
    /// 이번 이벤트의 증분 체결 수량
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_quantity: Option<Decimal>,
    /// 체결 시각
    pub timestamp: DateTime<Utc>,
}

impl FillEvent {
    /// 이번 이벤트로 반영할 체결 수량.
    ///
    /// 증분 필드가 없으면 보고된 전체 수량을 사용합니다.
    pub fn increment(&self) -> Decimal {
        self.fill_quantity.unwrap_or(self.quantity)
    }
}

/// 거래소가 접수 후 정산 단계에서 거부한 주문.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRejection {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    /// 거부 사유
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// 거래소가 비동기로 보내는 주문 결과.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionReport {
    /// 체결
    Fill(FillEvent),
    /// 접수 후 거부 (주문은 종료됨)
    Rejected(OrderRejection),
}

impl ExecutionReport {
    pub fn order_id(&self) -> &str {
        match self {
            ExecutionReport::Fill(fill) => &fill.order_id,
            ExecutionReport::Rejected(rejection) => &rejection.order_id,
        }
    }
}

/// 최우선 호가.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// 종목 코드
    pub symbol: String,
    /// 최우선 매수 호가
    pub bid: Decimal,
    /// 최우선 매도 호가
    pub ask: Decimal,
    /// 매수 호가 잔량
    pub bid_size: Decimal,
    /// 매도 호가 잔량
    pub ask_size: Decimal,
    /// 최근 체결가 (없으면 중간가)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<Decimal>,
    /// 수신 시각
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// 평가에 사용할 시장가.
    pub fn mark_price(&self) -> Decimal {
        self.last
            .unwrap_or_else(|| (self.bid + self.ask) / Decimal::TWO)
    }
}

// =============================================================================
// 에러 타입
// =============================================================================

/// 거래소 호출 에러.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// 네트워크 에러
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// 거래소 API 에러
    #[error("API 에러 [{code}]: {message}")]
    Api { code: String, message: String },

    /// 요청 한도 초과
    #[error("요청 한도 초과")]
    RateLimited,

    /// 주문 거부
    #[error("주문 거부: {0}")]
    Rejected(String),

    /// 거래소에 해당 주문이 없음 (이미 체결/취소됨)
    #[error("주문을 찾을 수 없습니다: {0}")]
    OrderNotFound(String),

    /// 응답 파싱 에러
    #[error("파싱 에러: {0}")]
    Parse(String),

    /// 지원하지 않는 기능
    #[error("지원하지 않는 기능: {0}")]
    Unsupported(String),
}

impl ExchangeError {
    /// 재시도 가능한 에러인지 확인.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExchangeError::Network(_) | ExchangeError::RateLimited)
    }
}

// =============================================================================
// Exchange Trait
// =============================================================================

/// 주문 실행 거래소 trait.
///
/// 실거래 어댑터와 모의 거래소가 모두 구현하며, 주문 관리자와 계좌 관리자는
/// 이 trait에만 의존합니다.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// 거래소 이름 (로깅용).
    fn name(&self) -> &str;

    /// 주문 제출.
    ///
    /// # Errors
    ///
    /// - `ExchangeError::Network`: 네트워크 연결 실패
    /// - `ExchangeError::Api`, `ExchangeError::Rejected`: 거래소가 주문을 거부
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError>;

    /// 주문 취소.
    ///
    /// `quantity`는 취소할 잔량입니다.
    async fn cancel_order(
        &self,
        order_id: &str,
        symbol: &str,
        quantity: Decimal,
    ) -> Result<(), ExchangeError>;

    /// 주문 정정.
    ///
    /// 거래소가 새 주문 ID를 발급하면 응답에 담아 돌려줍니다.
    ///
    /// # 기본 구현
    ///
    /// 기본적으로 `Unsupported` 에러를 반환합니다.
    async fn modify_order(
        &self,
        order_id: &str,
        _symbol: &str,
        _quantity: Decimal,
        _price: Decimal,
    ) -> Result<OrderAck, ExchangeError> {
        Err(ExchangeError::Unsupported(format!(
            "{}: 주문 정정 미지원 ({})",
            self.name(),
            order_id
        )))
    }

    /// 잔고 및 보유 종목 조회.
    async fn fetch_balance(&self) -> Result<BalancePayload, ExchangeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_request_kind_from_price() {
        let req = OrderRequest::from_price("005930", Side::Buy, dec!(10), Decimal::ZERO);
        assert_eq!(req.kind, OrderKind::Market);

        let req = OrderRequest::from_price("005930", Side::Sell, dec!(10), dec!(71000));
        assert_eq!(req.kind, OrderKind::Limit);
        assert_eq!(req.price, dec!(71000));
    }

    #[test]
    fn test_fill_increment_fallback() {
        let mut event = FillEvent {
            order_id: "1".to_string(),
            symbol: "005930".to_string(),
            side: Side::Buy,
            price: dec!(70000),
            quantity: dec!(10),
            fill_quantity: Some(dec!(3)),
            timestamp: Utc::now(),
        };
        assert_eq!(event.increment(), dec!(3));

        event.fill_quantity = None;
        assert_eq!(event.increment(), dec!(10));
    }

    #[test]
    fn test_execution_report_tagging() {
        let report = ExecutionReport::Rejected(OrderRejection {
            order_id: "PAPER-00000003".to_string(),
            symbol: "005930".to_string(),
            side: Side::Sell,
            reason: "보유 수량 부족".to_string(),
            timestamp: Utc::now(),
        });
        assert_eq!(report.order_id(), "PAPER-00000003");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["type"], "rejected");
        assert_eq!(json["order_id"], "PAPER-00000003");
        let back: ExecutionReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ExchangeError::Network("timeout".into()).is_retryable());
        assert!(ExchangeError::RateLimited.is_retryable());
        assert!(!ExchangeError::Rejected("잔고 부족".into()).is_retryable());
    }

    #[test]
    fn test_quote_mark_price() {
        let quote = Quote {
            symbol: "005930".to_string(),
            bid: dec!(69900),
            ask: dec!(70100),
            bid_size: dec!(100),
            ask_size: dec!(100),
            last: None,
            timestamp: Utc::now(),
        };
        assert_eq!(quote.mark_price(), dec!(70000));
    }
}
