//! 장 운영 시간 추상화.

use chrono::{DateTime, Utc};

/// 시장 개장 여부를 알려주는 시계.
///
/// 실행 엔진은 연속된 폴링 결과를 비교해 개장/폐장 전환을 감지합니다.
pub trait MarketClock: Send + Sync {
    /// 주어진 시각에 장이 열려 있는지 확인.
    fn is_open_at(&self, now: DateTime<Utc>) -> bool;

    /// 현재 장이 열려 있는지 확인.
    fn is_open(&self) -> bool {
        self.is_open_at(Utc::now())
    }
}

/// 항상 열려 있는 시계 (테스트 및 24시간 시장용).
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOpen;

impl MarketClock for AlwaysOpen {
    fn is_open_at(&self, _now: DateTime<Utc>) -> bool {
        true
    }
}
