//! 재시작 복구 테스트.
//!
//! 같은 SQLite 파일로 주문 관리자와 모의 거래소를 다시 만들어
//! 활성 주문과 모의 원장이 그대로 돌아오는지 확인합니다.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use trader_core::{OrderOrigin, OrderStatus, Quote, Side};
use trader_data::{OrderStore, SqliteStore};
use trader_exchange::{PaperConfig, PaperExchange};
use trader_execution::{OrderManager, OrderManagerConfig};

fn temp_db_url() -> (std::path::PathBuf, String) {
    let path = std::env::temp_dir().join(format!("trader-exec-{}.db", uuid::Uuid::new_v4()));
    let url = format!("sqlite://{}", path.display());
    (path, url)
}

fn paper(store: Arc<SqliteStore>) -> Arc<PaperExchange> {
    Arc::new(
        PaperExchange::with_seed(
            PaperConfig {
                max_slippage_rate: Decimal::ZERO,
                ..Default::default()
            },
            42,
        )
        .with_store(store),
    )
}

#[tokio::test]
async fn test_active_orders_and_ledger_survive_restart() {
    let (path, url) = temp_db_url();

    let (pending_id, before, cash_before) = {
        let store = Arc::new(SqliteStore::connect(&url).await.unwrap());
        let exchange = paper(store.clone());
        let orders = OrderManager::restore(exchange.clone(), store.clone(), OrderManagerConfig::default())
            .await
            .unwrap();

        // 원장 변경용 즉시 체결 주문
        orders
            .submit_manual("000660", Side::Buy, dec!(150000), dec!(2))
            .await
            .unwrap();
        exchange
            .on_quote(&Quote {
                symbol: "000660".to_string(),
                bid: dec!(149900),
                ask: dec!(150000),
                bid_size: dec!(100),
                ask_size: dec!(100),
                last: None,
                timestamp: Utc::now(),
            })
            .await;

        // 체결되지 않고 남는 주문
        let pending_id = orders
            .submit_manual("005930", Side::Buy, dec!(60000), dec!(5))
            .await
            .unwrap();
        let before = orders.get(&pending_id).await.unwrap();
        let cash_before = exchange.ledger().await.cash;

        store.pool().close().await;
        (pending_id, before, cash_before)
    };

    // 재시작
    let store = Arc::new(SqliteStore::connect(&url).await.unwrap());
    let exchange = paper(store.clone());
    assert!(exchange.restore().await.unwrap());
    assert_eq!(exchange.ledger().await.cash, cash_before);
    assert_eq!(exchange.ledger().await.holding("000660"), dec!(2));

    let orders = OrderManager::restore(exchange.clone(), store.clone(), OrderManagerConfig::default())
        .await
        .unwrap();

    // 000660 주문은 체결 이벤트 채널이 없어 활성으로 남음
    assert_eq!(orders.active_count().await, 2);

    let restored = orders.get(&pending_id).await.unwrap();
    assert_eq!(restored.order_id, before.order_id);
    assert_eq!(restored.symbol, before.symbol);
    assert_eq!(restored.side, before.side);
    assert_eq!(restored.quantity, before.quantity);
    assert_eq!(restored.filled_quantity, before.filled_quantity);
    assert_eq!(restored.price, before.price);
    assert_eq!(restored.status, OrderStatus::Accepted);
    assert_eq!(restored.origin, OrderOrigin::Manual);
    assert_eq!(
        restored.created_at.timestamp_millis(),
        before.created_at.timestamp_millis()
    );

    // 재시작한 모의 거래소에는 대기 주문이 없으므로 로컬에서 정리
    orders.cancel(&pending_id).await.unwrap();
    assert!(orders.get(&pending_id).await.is_none());
    let persisted = store.load_active_orders().await.unwrap();
    assert!(persisted.iter().all(|o| o.order_id != pending_id));

    store.pool().close().await;
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn test_submit_after_restart_keeps_restored_orders() {
    let (path, url) = temp_db_url();

    let first_id = {
        let store = Arc::new(SqliteStore::connect(&url).await.unwrap());
        let exchange = paper(store.clone());
        let orders = OrderManager::restore(exchange, store.clone(), OrderManagerConfig::default())
            .await
            .unwrap();
        let id = orders
            .submit_manual("005930", Side::Buy, dec!(60000), dec!(5))
            .await
            .unwrap();
        store.pool().close().await;
        id
    };

    // 같은 시드로 재시작해도 새 주문 ID는 복원된 주문과 겹치지 않음
    let store = Arc::new(SqliteStore::connect(&url).await.unwrap());
    let exchange = paper(store.clone());
    exchange.restore().await.unwrap();
    let orders = OrderManager::restore(exchange, store.clone(), OrderManagerConfig::default())
        .await
        .unwrap();
    assert_eq!(orders.active_count().await, 1);

    let second_id = orders
        .submit_manual("000660", Side::Buy, dec!(150000), dec!(1))
        .await
        .unwrap();
    assert_ne!(second_id, first_id);
    assert_eq!(orders.active_count().await, 2);

    let restored = orders.get(&first_id).await.unwrap();
    assert_eq!(restored.symbol, "005930");
    assert_eq!(restored.quantity, dec!(5));
    assert_eq!(restored.origin, OrderOrigin::Manual);

    let persisted = store.load_active_orders().await.unwrap();
    assert_eq!(persisted.len(), 2);
    assert!(persisted.iter().any(|o| o.order_id == first_id && o.symbol == "005930"));
    assert!(persisted.iter().any(|o| o.order_id == second_id && o.symbol == "000660"));

    store.pool().close().await;
    let _ = std::fs::remove_file(path);
}
