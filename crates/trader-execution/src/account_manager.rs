//! 계좌 관리자.
//!
//! 거래소 잔고를 주기적으로 조회해 정규화한 스냅샷을 `watch` 채널로 공개합니다.
//! 스냅샷은 재조회 시 통째로 교체되며 다른 컴포넌트가 부분 수정하지 않습니다.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Asia::Seoul;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use trader_core::{AccountBalance, AccountSnapshot, Exchange, ExchangeError};

use crate::error::{Result, TradingError};

/// 계좌 관리자 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// 매수 후 유지해야 할 최소 현금 비율 (0.10 = 10%)
    pub min_cash_buffer_pct: Decimal,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            min_cash_buffer_pct: dec!(0.10),
        }
    }
}

/// 계좌 관리자.
pub struct AccountManager {
    exchange: Arc<dyn Exchange>,
    config: AccountConfig,
    tx: watch::Sender<AccountSnapshot>,
    /// 당일(KST) 첫 총자산
    day_open: Mutex<Option<(NaiveDate, Decimal)>>,
}

impl AccountManager {
    /// 새 계좌 관리자 생성. 첫 조회 전 스냅샷은 빈 계좌입니다.
    pub fn new(exchange: Arc<dyn Exchange>, config: AccountConfig) -> Self {
        let (tx, _) = watch::channel(AccountSnapshot::default());
        Self {
            exchange,
            config,
            tx,
            day_open: Mutex::new(None),
        }
    }

    /// 최근 스냅샷.
    pub fn snapshot(&self) -> AccountSnapshot {
        self.tx.borrow().clone()
    }

    /// 스냅샷 구독.
    pub fn subscribe(&self) -> watch::Receiver<AccountSnapshot> {
        self.tx.subscribe()
    }

    /// 잔고 재조회 (현재 시각).
    pub async fn reconcile(&self) -> Result<AccountSnapshot> {
        self.reconcile_at(Utc::now()).await
    }

    /// 잔고를 조회해 정규화하고 공개합니다.
    ///
    /// 응답에 당일 손익이 없으면 KST 기준 당일 첫 총자산과 비교해 계산합니다.
    pub async fn reconcile_at(&self, now: DateTime<Utc>) -> Result<AccountSnapshot> {
        let payload = self.exchange.fetch_balance().await.map_err(|e| {
            warn!(exchange = self.exchange.name(), error = %e, "잔고 조회 실패");
            TradingError::from(e)
        })?;

        let mut snapshot = payload
            .normalize()
            .map_err(|e| TradingError::Transport(ExchangeError::Parse(e.to_string())))?;
        snapshot.fetched_at = now;

        if snapshot.balance.daily_pnl.is_none() {
            let open = self.day_open_asset(now, snapshot.balance.total_asset);
            snapshot.balance.daily_pnl = Some(snapshot.balance.total_asset - open);
        }

        debug!(
            cash = %snapshot.balance.cash,
            total_asset = %snapshot.balance.total_asset,
            positions = snapshot.positions.len(),
            daily_pnl = %snapshot.daily_pnl(),
            "계좌 동기화"
        );

        self.tx.send_replace(snapshot.clone());
        Ok(snapshot)
    }

    fn day_open_asset(&self, now: DateTime<Utc>, total_asset: Decimal) -> Decimal {
        let today = now.with_timezone(&Seoul).date_naive();
        let mut day_open = match self.day_open.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match *day_open {
            Some((date, asset)) if date == today => asset,
            _ => {
                info!(date = %today, total_asset = %total_asset, "당일 기준 자산 기록");
                *day_open = Some((today, total_asset));
                total_asset
            }
        }
    }

    /// 최근 스냅샷 기준 매수 가능 여부.
    pub fn check_buying_power(&self, amount: Decimal) -> bool {
        has_buying_power(&self.tx.borrow().balance, amount, &self.config)
    }
}

/// 매수 가능 여부.
///
/// 요청 금액이 현금을 넘거나, 매수 후 현금 비율이 최소 버퍼 아래로 떨어지면 거부합니다.
pub fn has_buying_power(balance: &AccountBalance, amount: Decimal, config: &AccountConfig) -> bool {
    if amount > balance.cash {
        return false;
    }
    if balance.total_asset > Decimal::ZERO {
        let ratio_after = (balance.cash - amount) / balance.total_asset;
        if ratio_after < config.min_cash_buffer_pct {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedExchange;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn balance(cash: Decimal, total: Decimal) -> AccountBalance {
        AccountBalance {
            cash,
            total_asset: total,
            ..Default::default()
        }
    }

    #[test]
    fn test_buying_power_buffer() {
        let config = AccountConfig::default();
        let acct = balance(dec!(2_000_000), dec!(10_000_000));

        assert!(has_buying_power(&acct, dec!(1_000_000), &config));
        // 매수 후 현금 비율 9% → 거부
        assert!(!has_buying_power(&acct, dec!(1_100_000), &config));
        // 현금 초과
        assert!(!has_buying_power(&acct, dec!(2_500_000), &config));
    }

    #[tokio::test]
    async fn test_reconcile_estimates_cash_and_publishes() {
        let exchange = Arc::new(ScriptedExchange::default());
        exchange.set_balance(json!({
            "output1": [{ "pdno": "005930", "hldg_qty": "10", "pchs_avg_pric": "70000", "prpr": "72000" }],
            "output2": [{ "tot_evlu_amt": "10020000", "evlu_amt_smtl_amt": "720000" }]
        }));
        let account = AccountManager::new(exchange, AccountConfig::default());
        let mut rx = account.subscribe();

        let snapshot = account.reconcile().await.unwrap();
        assert_eq!(snapshot.balance.cash, dec!(9_300_000));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().balance.cash, dec!(9_300_000));
        assert_eq!(account.snapshot().positions.len(), 1);
    }

    #[tokio::test]
    async fn test_daily_pnl_against_first_asset_of_day() {
        let exchange = Arc::new(ScriptedExchange::default());
        let account = AccountManager::new(exchange.clone(), AccountConfig::default());

        // KST 2024-03-04 09:05
        let morning = Seoul
            .with_ymd_and_hms(2024, 3, 4, 9, 5, 0)
            .unwrap()
            .with_timezone(&Utc);
        exchange.set_balance(json!({ "cash": "10000000", "total_asset": "10000000" }));
        let first = account.reconcile_at(morning).await.unwrap();
        assert_eq!(first.daily_pnl(), Decimal::ZERO);

        exchange.set_balance(json!({ "cash": "5000000", "total_asset": "9700000" }));
        let later = account
            .reconcile_at(morning + Duration::hours(5))
            .await
            .unwrap();
        assert_eq!(later.daily_pnl(), dec!(-300000));

        // 다음 날은 새 기준
        let next_day = account
            .reconcile_at(morning + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(next_day.daily_pnl(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_payload_daily_pnl_is_kept() {
        let exchange = Arc::new(ScriptedExchange::default());
        exchange.set_balance(json!({ "cash": "1000", "total_asset": "2000", "daily_pnl": "-50" }));
        let account = AccountManager::new(exchange, AccountConfig::default());

        let snapshot = account.reconcile().await.unwrap();
        assert_eq!(snapshot.daily_pnl(), dec!(-50));
    }

    #[tokio::test]
    async fn test_check_buying_power_uses_latest_snapshot() {
        let exchange = Arc::new(ScriptedExchange::default());
        let account = AccountManager::new(exchange, AccountConfig::default());

        // 조회 전에는 현금이 없음
        assert!(!account.check_buying_power(dec!(1)));
        account.reconcile().await.unwrap();
        assert!(account.check_buying_power(dec!(1_000_000)));
    }
}
