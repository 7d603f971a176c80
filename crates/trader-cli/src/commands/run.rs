//! `trader run`: 엔진과 스케줄러를 종료 신호까지 실행합니다.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use trader_execution::{register_engine_jobs, KrxMarketClock, Scheduler};

use crate::config::AppConfig;
use crate::runtime;

/// 알림 워커 종료 대기 한도
const NOTIFICATION_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run(config: &mut AppConfig, liquidate_on_exit: bool) -> Result<()> {
    let mut clock = KrxMarketClock::new();
    let added = clock.add_holidays_from_str(config.holidays.iter().map(String::as_str));
    if added < config.holidays.len() {
        warn!(
            configured = config.holidays.len(),
            added, "일부 휴장일 형식이 잘못되어 무시됨"
        );
    }

    let rt = runtime::build(config, Arc::new(clock)).await?;
    let engine = rt.engine;
    let shutdown = CancellationToken::new();

    let report_pump = rt
        .reports
        .map(|reports| engine.spawn_report_pump(reports, shutdown.clone()));

    let mut scheduler = Scheduler::new(config.scheduler.clone());
    register_engine_jobs(&mut scheduler, engine.clone(), &config.jobs)?;
    let scheduler_task = tokio::spawn(scheduler.run(shutdown.clone()));

    engine.start().await;
    info!(mode = %engine.mode(), "엔진 실행 중 (Ctrl-C로 종료)");

    shutdown_signal(shutdown.clone()).await;

    if let Err(e) = scheduler_task.await {
        error!(error = %e, "스케줄러 태스크 비정상 종료");
    }
    if let Some(handle) = report_pump {
        if let Err(e) = handle.await {
            error!(error = %e, "주문 결과 처리 태스크 비정상 종료");
        }
    }

    let stopped = engine.stop(liquidate_on_exit).await;

    // 큐 송신자를 모두 내려놓아야 워커가 끝남
    drop(engine);
    if tokio::time::timeout(NOTIFICATION_DRAIN_TIMEOUT, rt.notifications)
        .await
        .is_err()
    {
        warn!("알림 워커 종료 대기 시간 초과");
    }

    stopped?;
    info!("정상 종료");
    Ok(())
}

/// Ctrl-C 또는 SIGTERM 수신 시 토큰 취소.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Ctrl+C 핸들러 설치 실패");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "SIGTERM 핸들러 설치 실패");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Ctrl+C 수신, 종료 시작");
        }
        _ = terminate => {
            warn!("SIGTERM 수신, 종료 시작");
        }
    }

    shutdown.cancel();
}
