//! 주문 전 리스크 검사.
//!
//! 이 crate는 다음을 제공합니다:
//! - 분당 주문 수 제한 (60초 슬라이딩 윈도우)
//! - 일일 손실 한도 (매수만 차단)
//! - 주식 비중 한도 (매수만 차단)

pub mod manager;

pub use manager::{RiskConfig, RiskDecision, RiskManager, RiskViolation};
