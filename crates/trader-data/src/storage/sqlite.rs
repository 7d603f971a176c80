//! SQLite 저장소.
//!
//! 활성 주문, 전략 상태, 모의 계좌 원장을 하나의 SQLite 데이터베이스에 저장합니다.
//! 금액과 수량은 정밀도 손실을 막기 위해 TEXT로 저장합니다.
//!
//! # 테이블
//!
//! ```text
//! active_orders    (order_id PK, symbol, side, quantity, filled_quantity, price, status, origin, created_at, strategy_id)
//! strategy_state   (strategy_id, symbol, position, avg_price, accumulated_profit, indicators, last_update)
//! paper_account    (id = 1, cash, realized_pnl, initial_cash, updated_at)
//! paper_positions  (symbol PK, name, quantity, avg_price, last_price)
//! ```

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use trader_core::{Order, OrderOrigin, OrderStatus, Position, Side, StrategyState};

use crate::error::{Result, StoreError};
use crate::repository::{OrderStore, PaperLedgerSnapshot, PaperLedgerStore, StrategyStateStore};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS active_orders (
        order_id        TEXT PRIMARY KEY,
        symbol          TEXT NOT NULL,
        side            TEXT NOT NULL,
        quantity        TEXT NOT NULL,
        filled_quantity TEXT NOT NULL,
        price           TEXT NOT NULL,
        status          TEXT NOT NULL,
        origin          TEXT NOT NULL,
        created_at      TEXT NOT NULL,
        strategy_id     TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS strategy_state (
        strategy_id        TEXT NOT NULL,
        symbol             TEXT NOT NULL,
        position           TEXT NOT NULL,
        avg_price          TEXT NOT NULL,
        accumulated_profit TEXT NOT NULL,
        indicators         TEXT NOT NULL,
        last_update        TEXT NOT NULL,
        PRIMARY KEY (strategy_id, symbol)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS paper_account (
        id           INTEGER PRIMARY KEY CHECK (id = 1),
        cash         TEXT NOT NULL,
        realized_pnl TEXT NOT NULL,
        initial_cash TEXT NOT NULL,
        updated_at   TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS paper_positions (
        symbol     TEXT PRIMARY KEY,
        name       TEXT,
        quantity   TEXT NOT NULL,
        avg_price  TEXT NOT NULL,
        last_price TEXT NOT NULL
    )
    "#,
];

/// SQLite 저장소.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// 데이터베이스 연결 및 스키마 생성.
    ///
    /// `sqlite::memory:`는 연결마다 별도 DB가 되므로 단일 연결로 고정합니다.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        let in_memory = url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        info!(url = %url, "SQLite 저장소 연결 완료");
        Ok(store)
    }

    /// 기존 풀로 생성 (스키마 생성 포함).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// 내부 연결 풀.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("스키마 확인 완료");
        Ok(())
    }
}

// ==================== 변환 헬퍼 ====================

fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw)
        .map_err(|e| StoreError::Corrupt(format!("{} 값 해석 실패 ({}): {}", column, raw, e)))
}

fn parsed_column<T>(row: &SqliteRow, column: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(StoreError::Corrupt)
}

fn order_from_row(row: &SqliteRow) -> Result<Order> {
    Ok(Order {
        order_id: row.try_get("order_id")?,
        symbol: row.try_get("symbol")?,
        side: parsed_column::<Side>(row, "side")?,
        quantity: decimal_column(row, "quantity")?,
        filled_quantity: decimal_column(row, "filled_quantity")?,
        price: decimal_column(row, "price")?,
        status: parsed_column::<OrderStatus>(row, "status")?,
        origin: parsed_column::<OrderOrigin>(row, "origin")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        strategy_id: row.try_get("strategy_id")?,
    })
}

// ==================== 활성 주문 ====================

#[async_trait]
impl OrderStore for SqliteStore {
    async fn upsert_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO active_orders
                (order_id, symbol, side, quantity, filled_quantity, price, status, origin, created_at, strategy_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(order_id) DO UPDATE SET
                symbol = excluded.symbol,
                side = excluded.side,
                quantity = excluded.quantity,
                filled_quantity = excluded.filled_quantity,
                price = excluded.price,
                status = excluded.status,
                origin = excluded.origin,
                strategy_id = excluded.strategy_id
            "#,
        )
        .bind(&order.order_id)
        .bind(&order.symbol)
        .bind(order.side.to_string())
        .bind(order.quantity.to_string())
        .bind(order.filled_quantity.to_string())
        .bind(order.price.to_string())
        .bind(order.status.to_string())
        .bind(order.origin.to_string())
        .bind(order.created_at)
        .bind(&order.strategy_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_order(&self, order_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM active_orders WHERE order_id = ?")
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_active_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query("SELECT * FROM active_orders ORDER BY created_at, order_id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(order_from_row).collect()
    }
}

// ==================== 전략 상태 ====================

#[async_trait]
impl StrategyStateStore for SqliteStore {
    async fn load_strategy_state(
        &self,
        strategy_id: &str,
        symbol: &str,
    ) -> Result<Option<StrategyState>> {
        let row = sqlx::query("SELECT * FROM strategy_state WHERE strategy_id = ? AND symbol = ?")
            .bind(strategy_id)
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let indicators_raw: String = row.try_get("indicators")?;
        let indicators = serde_json::from_str(&indicators_raw)
            .map_err(|e| StoreError::Corrupt(format!("indicators 해석 실패: {}", e)))?;

        Ok(Some(StrategyState {
            strategy_id: row.try_get("strategy_id")?,
            symbol: row.try_get("symbol")?,
            position: decimal_column(&row, "position")?,
            avg_price: decimal_column(&row, "avg_price")?,
            accumulated_profit: decimal_column(&row, "accumulated_profit")?,
            indicators,
            last_update: row.try_get("last_update")?,
        }))
    }

    async fn save_strategy_state(&self, state: &StrategyState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO strategy_state
                (strategy_id, symbol, position, avg_price, accumulated_profit, indicators, last_update)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(strategy_id, symbol) DO UPDATE SET
                position = excluded.position,
                avg_price = excluded.avg_price,
                accumulated_profit = excluded.accumulated_profit,
                indicators = excluded.indicators,
                last_update = excluded.last_update
            "#,
        )
        .bind(&state.strategy_id)
        .bind(&state.symbol)
        .bind(state.position.to_string())
        .bind(state.avg_price.to_string())
        .bind(state.accumulated_profit.to_string())
        .bind(state.indicators.to_string())
        .bind(state.last_update)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ==================== 모의 계좌 원장 ====================

#[async_trait]
impl PaperLedgerStore for SqliteStore {
    async fn save_paper_ledger(&self, ledger: &PaperLedgerSnapshot) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO paper_account (id, cash, realized_pnl, initial_cash, updated_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                cash = excluded.cash,
                realized_pnl = excluded.realized_pnl,
                initial_cash = excluded.initial_cash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(ledger.cash.to_string())
        .bind(ledger.realized_pnl.to_string())
        .bind(ledger.initial_cash.to_string())
        .bind(ledger.updated_at)
        .execute(&mut *tx)
        .await?;

        // 포지션은 전체 교체
        sqlx::query("DELETE FROM paper_positions")
            .execute(&mut *tx)
            .await?;

        for position in &ledger.positions {
            sqlx::query(
                r#"
                INSERT INTO paper_positions (symbol, name, quantity, avg_price, last_price)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&position.symbol)
            .bind(&position.name)
            .bind(position.quantity.to_string())
            .bind(position.avg_price.to_string())
            .bind(position.current_price.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            cash = %ledger.cash,
            positions = ledger.positions.len(),
            "모의 원장 저장 완료"
        );
        Ok(())
    }

    async fn load_paper_ledger(&self) -> Result<Option<PaperLedgerSnapshot>> {
        let account = sqlx::query("SELECT * FROM paper_account WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        let Some(account) = account else {
            return Ok(None);
        };

        let rows = sqlx::query("SELECT * FROM paper_positions ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;

        let positions = rows
            .iter()
            .map(|row| -> Result<Position> {
                Ok(Position {
                    symbol: row.try_get("symbol")?,
                    name: row.try_get("name")?,
                    quantity: decimal_column(row, "quantity")?,
                    avg_price: decimal_column(row, "avg_price")?,
                    current_price: decimal_column(row, "last_price")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(PaperLedgerSnapshot {
            cash: decimal_column(&account, "cash")?,
            realized_pnl: decimal_column(&account, "realized_pnl")?,
            initial_cash: decimal_column(&account, "initial_cash")?,
            positions,
            updated_at: account.try_get("updated_at")?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    async fn memory_store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    fn sample_order(id: &str) -> Order {
        Order::accepted(id, "005930", Side::Buy, dec!(10), dec!(70000), OrderOrigin::Strategy)
            .with_strategy(Some("rsi".to_string()))
    }

    #[tokio::test]
    async fn test_order_upsert_and_delete() {
        let store = memory_store().await;
        let mut order = sample_order("0000117057");
        store.upsert_order(&order).await.unwrap();

        order.apply_fill(dec!(4));
        store.upsert_order(&order).await.unwrap();

        let loaded = store.load_active_orders().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].filled_quantity, dec!(4));
        assert_eq!(loaded[0].status, OrderStatus::PartiallyFilled);
        assert_eq!(loaded[0].strategy_id.as_deref(), Some("rsi"));

        store.delete_order("0000117057").await.unwrap();
        assert!(store.load_active_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_strategy_state_roundtrip() {
        let store = memory_store().await;
        assert!(store.load_strategy_state("rsi", "005930").await.unwrap().is_none());

        let mut state = StrategyState::new("rsi", "005930");
        state.apply_fill(Side::Buy, dec!(10), dec!(70000));
        state.indicators = json!({ "rsi": 28.5 });
        store.save_strategy_state(&state).await.unwrap();

        let loaded = store
            .load_strategy_state("rsi", "005930")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.position, dec!(10));
        assert_eq!(loaded.avg_price, dec!(70000));
        assert_eq!(loaded.indicators["rsi"], json!(28.5));
    }

    #[tokio::test]
    async fn test_paper_ledger_replaces_positions() {
        let store = memory_store().await;
        assert!(store.load_paper_ledger().await.unwrap().is_none());

        let mut ledger = PaperLedgerSnapshot {
            cash: dec!(9000000),
            realized_pnl: Decimal::ZERO,
            initial_cash: dec!(10000000),
            positions: vec![
                Position::new("005930", dec!(10), dec!(70000)),
                Position::new("000660", dec!(2), dec!(150000)),
            ],
            updated_at: Utc::now(),
        };
        store.save_paper_ledger(&ledger).await.unwrap();

        ledger.positions.truncate(1);
        ledger.cash = dec!(9300000);
        store.save_paper_ledger(&ledger).await.unwrap();

        let loaded = store.load_paper_ledger().await.unwrap().unwrap();
        assert_eq!(loaded.cash, dec!(9300000));
        assert_eq!(loaded.positions.len(), 1);
        assert_eq!(loaded.positions[0].symbol, "005930");
    }
}
