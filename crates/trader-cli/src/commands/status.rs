//! `trader status`: 저장된 활성 주문과 모의 원장을 읽어 출력합니다.

use anyhow::{Context, Result};
use serde::Serialize;

use trader_core::Order;
use trader_data::{OrderStore, PaperLedgerSnapshot, PaperLedgerStore, SqliteStore};

/// 저장소 상태.
#[derive(Debug, Serialize)]
pub struct StoredStatus {
    pub active_orders: Vec<Order>,
    /// 모의 원장 (모의 모드로 실행한 적이 없으면 None)
    pub paper_ledger: Option<PaperLedgerSnapshot>,
}

pub async fn load_status(database_url: &str) -> Result<StoredStatus> {
    let store = SqliteStore::connect(database_url)
        .await
        .context("저장소 초기화 실패")?;

    let status = StoredStatus {
        active_orders: store.load_active_orders().await?,
        paper_ledger: store.load_paper_ledger().await?,
    };
    store.pool().close().await;
    Ok(status)
}
