//! 리스크 관리자.
//!
//! 시그널과 계좌 스냅샷을 받아 주문 허용 여부를 판단합니다.
//!
//! # 검사 순서
//!
//! 1. 주문 속도: 최근 60초 내 전송 수가 한도 이상이면 거부
//! 2. 일일 손실: `-당일손익 / 총자산`이 한도 초과 시 매수 거부 (매도는 항상 통과)
//! 3. 주식 비중: `(총자산 - 현금) / 총자산`이 한도 초과 시 매수 거부
//!
//! 판단 자체는 설정, 윈도우 상태, 계좌, 시그널 방향만의 함수입니다.
//! 거부 알림은 큐에 넣기만 하며 결과에 영향을 주지 않습니다.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use trader_core::{AccountBalance, Signal};
use trader_notification::{NotificationEvent, NotificationQueue};

/// 리스크 한도 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// 분당 최대 주문 수
    pub max_orders_per_minute: usize,
    /// 일일 최대 손실 비율 (0.03 = 3%)
    pub max_daily_loss_pct: Decimal,
    /// 최대 주식 비중 (0.95 = 95%)
    pub max_exposure_pct: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_orders_per_minute: 10,
            max_daily_loss_pct: dec!(0.03),
            max_exposure_pct: dec!(0.95),
        }
    }
}

/// 리스크 위반 사유.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskViolation {
    /// 분당 주문 수 초과
    OrderRate { count: usize, max: usize },
    /// 일일 손실 한도 초과
    DailyLoss { loss_pct: Decimal, max: Decimal },
    /// 주식 비중 한도 초과
    Exposure { exposure_pct: Decimal, max: Decimal },
}

impl std::fmt::Display for RiskViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskViolation::OrderRate { count, max } => {
                write!(f, "분당 주문 한도 초과 ({}/{})", count, max)
            }
            RiskViolation::DailyLoss { loss_pct, max } => write!(
                f,
                "일일 손실 한도 초과 ({}% > {}%)",
                (loss_pct * Decimal::ONE_HUNDRED).round_dp(2),
                (max * Decimal::ONE_HUNDRED).round_dp(2)
            ),
            RiskViolation::Exposure { exposure_pct, max } => write!(
                f,
                "주식 비중 한도 초과 ({}% > {}%)",
                (exposure_pct * Decimal::ONE_HUNDRED).round_dp(2),
                (max * Decimal::ONE_HUNDRED).round_dp(2)
            ),
        }
    }
}

/// 리스크 판단 결과.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    /// 허용
    Allow,
    /// 거부
    Deny(RiskViolation),
}

impl RiskDecision {
    /// 허용 여부.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RiskDecision::Allow)
    }
}

/// 리스크 관리자.
#[derive(Debug)]
pub struct RiskManager {
    config: RiskConfig,
    /// 최근 전송 시각 (오래된 순)
    dispatches: VecDeque<DateTime<Utc>>,
    alerts: Option<NotificationQueue>,
}

impl RiskManager {
    const WINDOW_SECS: i64 = 60;

    /// 새 리스크 관리자 생성.
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            dispatches: VecDeque::new(),
            alerts: None,
        }
    }

    /// 거부 알림 큐 연결.
    pub fn with_alerts(mut self, queue: NotificationQueue) -> Self {
        self.alerts = Some(queue);
        self
    }

    /// 설정 조회.
    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// 현재 시각 기준 검사.
    pub fn check(&mut self, signal: &Signal, account: &AccountBalance) -> RiskDecision {
        self.check_at(signal, account, Utc::now())
    }

    /// 주어진 시각 기준 검사.
    pub fn check_at(
        &mut self,
        signal: &Signal,
        account: &AccountBalance,
        now: DateTime<Utc>,
    ) -> RiskDecision {
        self.prune(now);

        let decision = self.evaluate(signal, account);

        if let RiskDecision::Deny(violation) = &decision {
            warn!(
                symbol = %signal.symbol,
                side = %signal.side,
                reason = %violation,
                "리스크 검사 거부"
            );
            if let Some(queue) = &self.alerts {
                queue.notify(NotificationEvent::RiskAlert {
                    symbol: signal.symbol.clone(),
                    reason: violation.to_string(),
                });
            }
        } else {
            debug!(symbol = %signal.symbol, side = %signal.side, "리스크 검사 통과");
        }

        decision
    }

    /// 주문 전송 성공 기록 (현재 시각).
    pub fn record_dispatch(&mut self) {
        self.record_dispatch_at(Utc::now());
    }

    /// 주문 전송 성공 기록.
    pub fn record_dispatch_at(&mut self, now: DateTime<Utc>) {
        self.dispatches.push_back(now);
    }

    /// 윈도우 내 전송 수.
    pub fn dispatches_in_window(&self) -> usize {
        self.dispatches.len()
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let window = Duration::seconds(Self::WINDOW_SECS);
        while let Some(oldest) = self.dispatches.front() {
            if now - *oldest >= window {
                self.dispatches.pop_front();
            } else {
                break;
            }
        }
    }

    fn evaluate(&self, signal: &Signal, account: &AccountBalance) -> RiskDecision {
        let count = self.dispatches.len();
        if count >= self.config.max_orders_per_minute {
            return RiskDecision::Deny(RiskViolation::OrderRate {
                count,
                max: self.config.max_orders_per_minute,
            });
        }

        // 청산 경로는 손실/비중 한도로 막지 않음
        if !signal.side.is_buy() {
            return RiskDecision::Allow;
        }

        if account.total_asset > Decimal::ZERO {
            let daily_pnl = account.daily_pnl.unwrap_or(Decimal::ZERO);
            let loss_pct = -daily_pnl / account.total_asset;
            if loss_pct > self.config.max_daily_loss_pct {
                return RiskDecision::Deny(RiskViolation::DailyLoss {
                    loss_pct,
                    max: self.config.max_daily_loss_pct,
                });
            }

            let exposure_pct = account.exposure();
            if exposure_pct > self.config.max_exposure_pct {
                return RiskDecision::Deny(RiskViolation::Exposure {
                    exposure_pct,
                    max: self.config.max_exposure_pct,
                });
            }
        }

        RiskDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trader_core::SignalSide;
    use trader_notification::NotificationPriority;

    fn account(cash: Decimal, total: Decimal, daily_pnl: Decimal) -> AccountBalance {
        AccountBalance {
            cash,
            total_asset: total,
            daily_pnl: Some(daily_pnl),
            ..Default::default()
        }
    }

    fn signal(side: SignalSide) -> Signal {
        Signal::new("005930", side, dec!(70000))
    }

    #[test]
    fn test_daily_loss_blocks_buy_only() {
        let mut risk = RiskManager::new(RiskConfig::default());
        // 4% 손실
        let acct = account(dec!(5000000), dec!(10000000), dec!(-400000));
        let now = Utc::now();

        assert!(matches!(
            risk.check_at(&signal(SignalSide::Buy), &acct, now),
            RiskDecision::Deny(RiskViolation::DailyLoss { .. })
        ));
        assert!(risk.check_at(&signal(SignalSide::Sell), &acct, now).is_allowed());
        assert!(risk.check_at(&signal(SignalSide::Exit), &acct, now).is_allowed());
    }

    #[test]
    fn test_exposure_blocks_buy() {
        let mut risk = RiskManager::new(RiskConfig::default());
        // 현금 4% → 비중 96%
        let acct = account(dec!(400000), dec!(10000000), Decimal::ZERO);

        let decision = risk.check_at(&signal(SignalSide::Buy), &acct, Utc::now());
        assert!(matches!(
            decision,
            RiskDecision::Deny(RiskViolation::Exposure { .. })
        ));
        assert!(risk
            .check_at(&signal(SignalSide::Sell), &acct, Utc::now())
            .is_allowed());
    }

    #[test]
    fn test_order_rate_window() {
        let mut risk = RiskManager::new(RiskConfig {
            max_orders_per_minute: 2,
            ..Default::default()
        });
        let acct = account(dec!(10000000), dec!(10000000), Decimal::ZERO);
        let t0 = Utc::now();

        for offset in [0, 10] {
            let now = t0 + Duration::seconds(offset);
            assert!(risk.check_at(&signal(SignalSide::Buy), &acct, now).is_allowed());
            risk.record_dispatch_at(now);
        }

        // 세 번째는 거부 (매도도 속도 제한 대상)
        let third = t0 + Duration::seconds(20);
        assert!(matches!(
            risk.check_at(&signal(SignalSide::Sell), &acct, third),
            RiskDecision::Deny(RiskViolation::OrderRate { count: 2, max: 2 })
        ));

        // 첫 전송이 윈도우를 벗어나면 다시 허용
        let later = t0 + Duration::seconds(61);
        assert!(risk.check_at(&signal(SignalSide::Buy), &acct, later).is_allowed());
        assert_eq!(risk.dispatches_in_window(), 1);
    }

    #[test]
    fn test_denial_is_pure_and_alert_is_queued() {
        let (queue, mut rx) = trader_notification::NotificationQueue::channel(1);
        let mut risk = RiskManager::new(RiskConfig::default()).with_alerts(queue.clone());
        let acct = account(dec!(5000000), dec!(10000000), dec!(-400000));
        let now = Utc::now();

        // 큐를 가득 채워도 판단은 동일
        queue.send("filler", NotificationPriority::Low);
        let first = risk.check_at(&signal(SignalSide::Buy), &acct, now);
        assert!(!first.is_allowed());

        let filler = rx.try_recv().unwrap();
        assert_eq!(filler.summary(), "알림: filler");

        let second = risk.check_at(&signal(SignalSide::Buy), &acct, now);
        assert_eq!(first, second);
        let alert = rx.try_recv().unwrap();
        assert!(matches!(alert.event, NotificationEvent::RiskAlert { .. }));
    }

    #[test]
    fn test_zero_total_asset_passes_ratio_gates() {
        let mut risk = RiskManager::new(RiskConfig::default());
        let acct = AccountBalance::default();
        assert!(risk.check_at(&signal(SignalSide::Buy), &acct, Utc::now()).is_allowed());
    }
}
