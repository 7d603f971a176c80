//! 주문 실행 거래소 구현.
//!
//! - [`paper::PaperExchange`] - 호가 기반 모의 거래소 (기본 실행 대상)
//! - [`kis::KisExchange`] - 한국투자증권 국내주식 REST 어댑터
//! - [`retry`] - 멱등 조회용 재시도 유틸리티
//!
//! 두 구현 모두 `trader_core::Exchange`를 구현하므로 실행 엔진은 구현 종류를 알 필요가 없습니다.

pub mod kis;
pub mod paper;
pub mod retry;

pub use kis::{KisConfig, KisExchange};
pub use paper::{MatchOutcome, PaperConfig, PaperExchange, PaperLedger};
pub use retry::{with_retry, RetryConfig};
