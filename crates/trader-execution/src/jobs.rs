//! 엔진 주기 작업 등록.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::ExecutionEngine;
use crate::error::Result;
use crate::scheduler::Scheduler;

/// 엔진 주기 작업 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// 워치독 하트비트 주기
    pub heartbeat: Duration,
    /// 장 개폐 확인 주기
    pub market_check: Duration,
    /// 미체결 주문 점검 주기
    pub unfilled_sweep: Duration,
    /// 계좌 동기화 주기
    pub reconcile: Duration,
    /// 일일 리포트 시각 (시, 분)
    pub daily_report_at: (u32, u32),
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(60),
            market_check: Duration::from_secs(30),
            unfilled_sweep: Duration::from_secs(5),
            reconcile: Duration::from_secs(60),
            daily_report_at: (15, 40),
        }
    }
}

/// 엔진 작업을 스케줄러에 등록합니다.
pub fn register_engine_jobs(
    scheduler: &mut Scheduler,
    engine: Arc<ExecutionEngine>,
    config: &JobConfig,
) -> Result<()> {
    let e = engine.clone();
    scheduler.register_interval(config.heartbeat, "watchdog", move || {
        let e = e.clone();
        async move {
            e.heartbeat();
            Ok(())
        }
    });

    let e = engine.clone();
    scheduler.register_interval(config.market_check, "market_session", move || {
        let e = e.clone();
        async move {
            e.check_market_session().await;
            Ok(())
        }
    });

    let e = engine.clone();
    scheduler.register_interval(config.unfilled_sweep, "unfilled_sweep", move || {
        let e = e.clone();
        async move {
            e.orders().monitor_unfilled().await;
            Ok(())
        }
    });

    let e = engine.clone();
    scheduler.register_interval(config.reconcile, "account_reconcile", move || {
        let e = e.clone();
        async move {
            e.reconcile().await?;
            Ok(())
        }
    });

    let (hour, minute) = config.daily_report_at;
    let e = engine;
    scheduler.register_cron(hour, minute, "daily_report", move || {
        let e = e.clone();
        async move {
            e.send_daily_report().await;
            Ok(())
        }
    })
}
