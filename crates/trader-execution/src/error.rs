//! 실행 계층 에러.

use thiserror::Error;

use trader_core::ExchangeError;
use trader_data::StoreError;

/// 주문 처리 에러.
///
/// 검증/리스크/매수 가능 금액 거부는 재시도하지 않으며,
/// 거래소 전송 실패도 중복 주문을 막기 위해 자동 재제출하지 않습니다.
#[derive(Debug, Error)]
pub enum TradingError {
    /// 잘못된 입력 (수량, 신호 등)
    #[error("검증 실패: {0}")]
    Validation(String),

    /// 리스크 검사 거부
    #[error("리스크 거부: {0}")]
    RiskRejected(String),

    /// 매수 가능 금액 부족
    #[error("매수 가능 금액 부족: {0}")]
    BuyingPowerRejected(String),

    /// 거래소 호출 실패
    #[error("거래소 에러: {0}")]
    Transport(#[from] ExchangeError),

    /// 저장소 실패
    #[error("저장소 에러: {0}")]
    Persistence(#[from] StoreError),

    /// 활성 주문 없음
    #[error("활성 주문을 찾을 수 없습니다: {0}")]
    OrderNotFound(String),

    /// 현재 상태에서 허용되지 않는 작업
    #[error("잘못된 상태: {0}")]
    InvalidState(String),
}

/// 실행 계층 Result.
pub type Result<T> = std::result::Result<T, TradingError>;
