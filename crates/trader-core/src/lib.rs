//! 실행 코어의 도메인 모델과 거래소 추상화.
//!
//! 이 crate는 다음을 제공합니다:
//! - 시그널, 주문, 포지션, 계좌 잔고, 전략 상태 타입
//! - 실거래 어댑터와 모의 거래소가 공유하는 `Exchange` trait
//! - 장 운영 시간을 알려주는 `MarketClock` trait
//! - 거래소별 잔고 응답 정규화

pub mod domain;

// 주요 타입 재내보내기
pub use domain::*;
