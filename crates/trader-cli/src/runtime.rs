//! 컴포넌트 조립.
//!
//! 모든 컴포넌트는 생성 시 협력자를 주입받습니다. 저장소 초기화나
//! 활성 주문 복원이 실패하면 시작을 중단합니다.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use trader_core::{Exchange, ExecutionReport, MarketClock};
use trader_data::SqliteStore;
use trader_exchange::{KisExchange, PaperExchange};
use trader_execution::{
    AccountManager, ExecutionEngine, OrderManager, StrategyStateSync, TradingMode,
};
use trader_notification::{
    DiscordSender, LogSender, NotificationQueue, NotificationSender, NotificationWorker,
    SlackSender,
};
use trader_risk::RiskManager;

use crate::config::AppConfig;

/// 조립된 실행 환경.
pub struct Runtime {
    pub engine: Arc<ExecutionEngine>,
    /// 모의 모드에서만 존재
    pub paper: Option<Arc<PaperExchange>>,
    /// 모의 거래소 체결/거부 보고
    pub reports: Option<mpsc::UnboundedReceiver<ExecutionReport>>,
    pub notifications: JoinHandle<()>,
}

/// 알림 채널 구성 (로그 + 설정된 Webhook).
fn notification_senders() -> Vec<Arc<dyn NotificationSender>> {
    let mut senders: Vec<Arc<dyn NotificationSender>> = vec![Arc::new(LogSender)];
    if let Some(slack) = SlackSender::from_env() {
        senders.push(Arc::new(slack));
    }
    if let Some(discord) = DiscordSender::from_env() {
        senders.push(Arc::new(discord));
    }
    senders
}

/// 설정대로 저장소, 거래소, 관리자, 엔진을 생성합니다.
pub async fn build(config: &mut AppConfig, clock: Arc<dyn MarketClock>) -> Result<Runtime> {
    let store = Arc::new(
        SqliteStore::connect(&config.database_url)
            .await
            .context("저장소 초기화 실패")?,
    );

    let (queue, rx) = NotificationQueue::channel(config.notification_queue);
    let notifications = NotificationWorker::new(rx, notification_senders()).spawn();

    let (exchange, paper, reports) = match config.mode {
        TradingMode::Paper => {
            let (report_tx, report_rx) = mpsc::unbounded_channel();
            let paper = match config.paper_seed {
                Some(seed) => PaperExchange::with_seed(config.paper.clone(), seed),
                None => PaperExchange::new(config.paper.clone()),
            };
            let paper = Arc::new(paper.with_report_sender(report_tx).with_store(store.clone()));
            let restored = paper.restore().await.context("모의 원장 복원 실패")?;
            info!(restored, "모의 거래소 준비");
            let exchange: Arc<dyn Exchange> = paper.clone();
            (exchange, Some(paper), Some(report_rx))
        }
        TradingMode::Live => {
            let exchange: Arc<dyn Exchange> = Arc::new(KisExchange::new(config.take_kis()?));
            (exchange, None, None)
        }
    };

    let orders = Arc::new(
        OrderManager::restore(exchange.clone(), store.clone(), config.orders.clone())
            .await
            .context("활성 주문 복원 실패")?,
    );
    let account = Arc::new(AccountManager::new(exchange, config.account.clone()));
    let risk = RiskManager::new(config.risk.clone()).with_alerts(queue.clone());

    let engine = ExecutionEngine::new(config.mode, orders, account, risk, queue, clock)
        .with_strategy_sync(StrategyStateSync::new(store.clone()));

    Ok(Runtime {
        engine: Arc::new(engine),
        paper,
        reports,
        notifications,
    })
}
