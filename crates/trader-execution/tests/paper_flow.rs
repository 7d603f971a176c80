//! 모의 거래소 전체 흐름 테스트.
//!
//! 신호 → 주문 → 호가 매칭 → 체결/거부 보고 → 주문/전략/계좌 갱신을 한 번에 확인합니다.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;

use trader_core::{AlwaysOpen, ExecutionReport, FillEvent, Quote, Signal, SignalSide};
use trader_data::{OrderStore, SqliteStore, StrategyStateStore};
use trader_exchange::{MatchOutcome, PaperConfig, PaperExchange};
use trader_execution::{
    AccountConfig, AccountManager, ExecutionEngine, OrderEvent, OrderManager, OrderManagerConfig,
    StrategyStateSync, TradingMode,
};
use trader_notification::NotificationQueue;
use trader_risk::{RiskConfig, RiskManager};

struct Rig {
    paper: Arc<PaperExchange>,
    engine: ExecutionEngine,
    store: Arc<SqliteStore>,
    reports: mpsc::UnboundedReceiver<ExecutionReport>,
}

async fn rig() -> Rig {
    let store = Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap());
    let (report_tx, reports) = mpsc::unbounded_channel();
    let paper = Arc::new(
        PaperExchange::with_seed(
            PaperConfig {
                max_slippage_rate: Decimal::ZERO,
                ..Default::default()
            },
            7,
        )
        .with_report_sender(report_tx)
        .with_store(store.clone()),
    );

    let orders = Arc::new(
        OrderManager::restore(paper.clone(), store.clone(), OrderManagerConfig::default())
            .await
            .unwrap(),
    );
    let account = Arc::new(AccountManager::new(paper.clone(), AccountConfig::default()));
    let (queue, _rx) = NotificationQueue::channel(64);
    let engine = ExecutionEngine::new(
        TradingMode::Paper,
        orders,
        account,
        RiskManager::new(RiskConfig::default()),
        queue,
        Arc::new(AlwaysOpen),
    )
    .with_strategy_sync(StrategyStateSync::new(store.clone()));

    Rig {
        paper,
        engine,
        store,
        reports,
    }
}

impl Rig {
    fn next_fill(&mut self) -> FillEvent {
        match self.reports.try_recv() {
            Ok(ExecutionReport::Fill(fill)) => fill,
            other => panic!("체결 보고 대기 중 {:?}", other),
        }
    }
}

fn quote(bid: Decimal, ask: Decimal) -> Quote {
    quote_for("005930", bid, ask)
}

fn quote_for(symbol: &str, bid: Decimal, ask: Decimal) -> Quote {
    Quote {
        symbol: symbol.to_string(),
        bid,
        ask,
        bid_size: dec!(1000),
        ask_size: dec!(1000),
        last: None,
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn test_buy_then_exit_round_trip() {
    let mut rig = rig().await;
    rig.engine.start().await;

    // 지정가 매수
    let buy = Signal::buy("005930", dec!(70000)).with_strategy("momentum");
    let order_id = rig.engine.on_signal(&buy, dec!(10)).await.unwrap().unwrap();
    assert_eq!(rig.engine.orders().active_count().await, 1);

    // 접수만으로는 체결되지 않음
    assert!(rig.reports.try_recv().is_err());

    let outcomes = rig.paper.on_quote(&quote(dec!(69900), dec!(70000))).await;
    assert!(matches!(&outcomes[..], [MatchOutcome::Filled(t)] if t.order_id == order_id));

    let event = rig.next_fill();
    let applied = rig.engine.handle_fill_event(&event).await.unwrap();
    assert!(matches!(applied, OrderEvent::Filled { completed: true, .. }));
    assert_eq!(rig.engine.orders().active_count().await, 0);

    let snapshot = rig.engine.account().snapshot();
    let position = snapshot.position("005930").unwrap();
    assert_eq!(position.quantity, dec!(10));
    assert_eq!(position.avg_price, dec!(70000));
    // 700,000 + 수수료 105
    assert_eq!(snapshot.balance.cash, dec!(9299895));

    // 시장가 청산
    let exit = Signal::new("005930", SignalSide::Exit, Decimal::ZERO).with_strategy("momentum");
    rig.engine.on_signal(&exit, dec!(10)).await.unwrap().unwrap();
    rig.paper.on_quote(&quote(dec!(71000), dec!(71100))).await;

    let event = rig.next_fill();
    assert_eq!(event.price, dec!(71000));
    rig.engine.handle_fill_event(&event).await.unwrap();

    let snapshot = rig.engine.account().snapshot();
    assert!(snapshot.position("005930").is_none());
    assert_eq!(rig.engine.orders().active_count().await, 0);

    let state = rig
        .store
        .load_strategy_state("momentum", "005930")
        .await
        .unwrap()
        .unwrap();
    assert!(state.position.is_zero());
    assert_eq!(state.accumulated_profit, dec!(10000));
}

#[tokio::test]
async fn test_unfilled_limit_cancelled_by_sweep() {
    let rig = rig().await;
    rig.engine.start().await;

    let order_id = rig
        .engine
        .on_signal(&Signal::buy("005930", dec!(60000)), dec!(5))
        .await
        .unwrap()
        .unwrap();

    // 가격 조건 불충족
    let outcomes = rig.paper.on_quote(&quote(dec!(69900), dec!(70000))).await;
    assert!(outcomes.is_empty());

    let later = Utc::now() + chrono::Duration::seconds(181);
    let requested = rig.engine.orders().monitor_unfilled_at(later).await;
    assert_eq!(requested, vec![order_id]);
    assert_eq!(rig.engine.orders().active_count().await, 0);
    assert!(rig.paper.pending_orders().await.is_empty());
}

#[tokio::test]
async fn test_settlement_rejection_closes_order() {
    let mut rig = rig().await;
    rig.engine.start().await;

    // 보유 수량 없는 시장가 청산은 접수되지만 정산에서 거부됨
    let exit = Signal::new("035720", SignalSide::Exit, Decimal::ZERO);
    let order_id = rig.engine.on_signal(&exit, dec!(5)).await.unwrap().unwrap();
    assert_eq!(rig.store.load_active_orders().await.unwrap().len(), 1);

    let outcomes = rig
        .paper
        .on_quote(&quote_for("035720", dec!(48000), dec!(48050)))
        .await;
    assert!(matches!(
        &outcomes[..],
        [MatchOutcome::Rejected { order_id: id, .. }] if *id == order_id
    ));

    let report = rig.reports.try_recv().unwrap();
    assert!(matches!(&report, ExecutionReport::Rejected(r) if r.order_id == order_id));
    let event = rig.engine.handle_report(&report).await.unwrap();
    assert!(matches!(event, OrderEvent::Rejected { .. }));

    assert!(rig.engine.orders().get(&order_id).await.is_none());
    assert_eq!(rig.engine.orders().active_count().await, 0);
    assert!(rig.store.load_active_orders().await.unwrap().is_empty());
    assert!(rig.engine.account().snapshot().position("035720").is_none());
}
