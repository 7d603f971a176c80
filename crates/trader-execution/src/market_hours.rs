//! KRX 장 운영 시간.
//!
//! 한국 시간 기준 평일 09:00 ~ 15:30 정규장만 개장으로 판단합니다.
//! 주말과 등록된 휴장일은 항상 휴장입니다.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use tracing::debug;

use trader_core::MarketClock;

/// 시장 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketStatus {
    /// 정규장
    Open,
    /// 장 시간 외
    Closed,
    /// 휴장 (주말 또는 공휴일)
    Holiday,
}

/// KRX 정규장 시계.
#[derive(Debug, Clone)]
pub struct KrxMarketClock {
    timezone: Tz,
    open_time: NaiveTime,
    close_time: NaiveTime,
    holidays: HashSet<NaiveDate>,
}

impl Default for KrxMarketClock {
    fn default() -> Self {
        Self::new()
    }
}

impl KrxMarketClock {
    /// 기본 KRX 시계 (휴장일 없음).
    pub fn new() -> Self {
        Self {
            timezone: chrono_tz::Asia::Seoul,
            open_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            close_time: NaiveTime::from_hms_opt(15, 30, 0).unwrap_or_default(),
            holidays: HashSet::new(),
        }
    }

    /// 휴장일 목록 설정.
    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays.extend(holidays);
        self
    }

    /// 휴장일 추가.
    pub fn add_holiday(&mut self, date: NaiveDate) {
        self.holidays.insert(date);
    }

    /// `YYYY-MM-DD` 문자열 목록에서 휴장일 추가. 잘못된 항목은 건너뜁니다.
    pub fn add_holidays_from_str<'a>(&mut self, dates: impl IntoIterator<Item = &'a str>) -> usize {
        let mut added = 0;
        for raw in dates {
            match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
                Ok(date) => {
                    self.holidays.insert(date);
                    added += 1;
                }
                Err(_) => debug!(value = raw, "휴장일 형식 오류, 무시"),
            }
        }
        added
    }

    /// 주말 여부.
    pub fn is_weekend(date: NaiveDate) -> bool {
        matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// 휴장일 여부.
    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }

    /// 시장 상태 조회.
    pub fn status_at(&self, now: DateTime<Utc>) -> MarketStatus {
        let local = now.with_timezone(&self.timezone);
        let date = local.date_naive();

        if Self::is_weekend(date) || self.is_holiday(date) {
            return MarketStatus::Holiday;
        }

        let time = local.time();
        if time >= self.open_time && time < self.close_time {
            MarketStatus::Open
        } else {
            MarketStatus::Closed
        }
    }
}

impl MarketClock for KrxMarketClock {
    fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == MarketStatus::Open
    }
}
