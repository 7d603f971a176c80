//! 단위 테스트용 거래소/저장소 대역.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use trader_core::{
    BalancePayload, Exchange, ExchangeError, FillEvent, MarketClock, Order, OrderAck,
    OrderRequest, Side,
};
use trader_data::{OrderStore, Result as StoreResult};

/// 호출을 기록하고 미리 정한 응답을 돌려주는 거래소.
pub struct ScriptedExchange {
    next_id: AtomicU64,
    fail_submit: AtomicBool,
    modify_new_id: AtomicBool,
    hold_submit: AtomicBool,
    submit_gate: Semaphore,
    held: AtomicUsize,
    cancel_error: Mutex<Option<Box<dyn Fn() -> ExchangeError + Send + Sync>>>,
    balance: Mutex<Value>,
    pub submits: Mutex<Vec<OrderRequest>>,
    pub cancels: Mutex<Vec<(String, Decimal)>>,
}

impl Default for ScriptedExchange {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            fail_submit: AtomicBool::new(false),
            modify_new_id: AtomicBool::new(false),
            hold_submit: AtomicBool::new(false),
            submit_gate: Semaphore::new(0),
            held: AtomicUsize::new(0),
            cancel_error: Mutex::new(None),
            balance: Mutex::new(json!({ "cash": "10000000", "total_asset": "10000000" })),
            submits: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedExchange {
    pub fn fail_submits(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    /// 이후 제출을 `release_submits`까지 붙잡아 둡니다.
    pub fn hold_submits(&self) {
        self.hold_submit.store(true, Ordering::SeqCst);
    }

    pub fn release_submits(&self) {
        self.submit_gate.add_permits(1);
    }

    /// 붙잡힌 적이 있는 제출 수.
    pub fn held_submits(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    pub fn set_cancel_error(&self, make: impl Fn() -> ExchangeError + Send + Sync + 'static) {
        *self.cancel_error.lock().unwrap() = Some(Box::new(make));
    }

    pub fn set_modify_new_id(&self, enabled: bool) {
        self.modify_new_id.store(enabled, Ordering::SeqCst);
    }

    pub fn set_balance(&self, payload: Value) {
        *self.balance.lock().unwrap() = payload;
    }

    fn issue_id(&self) -> String {
        format!("{:010}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl Exchange for ScriptedExchange {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(ExchangeError::Network("connection reset".to_string()));
        }
        if self.hold_submit.load(Ordering::SeqCst) {
            self.held.fetch_add(1, Ordering::SeqCst);
            let _permit = self
                .submit_gate
                .acquire()
                .await
                .map_err(|e| ExchangeError::Network(e.to_string()))?;
        }
        self.submits.lock().unwrap().push(request.clone());
        Ok(OrderAck::new(self.issue_id()))
    }

    async fn cancel_order(
        &self,
        order_id: &str,
        _symbol: &str,
        quantity: Decimal,
    ) -> Result<(), ExchangeError> {
        self.cancels
            .lock()
            .unwrap()
            .push((order_id.to_string(), quantity));
        match self.cancel_error.lock().unwrap().as_ref() {
            Some(make) => Err(make()),
            None => Ok(()),
        }
    }

    async fn modify_order(
        &self,
        order_id: &str,
        _symbol: &str,
        _quantity: Decimal,
        _price: Decimal,
    ) -> Result<OrderAck, ExchangeError> {
        if self.modify_new_id.load(Ordering::SeqCst) {
            Ok(OrderAck::new(self.issue_id()))
        } else {
            Ok(OrderAck::new(order_id))
        }
    }

    async fn fetch_balance(&self) -> Result<BalancePayload, ExchangeError> {
        Ok(BalancePayload(self.balance.lock().unwrap().clone()))
    }
}

/// 메모리 주문 저장소 (일시 정지 시간 테스트용).
#[derive(Default)]
pub struct MemoryOrderStore {
    orders: Mutex<HashMap<String, Order>>,
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn upsert_order(&self, order: &Order) -> StoreResult<()> {
        self.orders
            .lock()
            .unwrap()
            .insert(order.order_id.clone(), order.clone());
        Ok(())
    }

    async fn delete_order(&self, order_id: &str) -> StoreResult<()> {
        self.orders.lock().unwrap().remove(order_id);
        Ok(())
    }

    async fn load_active_orders(&self) -> StoreResult<Vec<Order>> {
        let mut orders: Vec<Order> = self.orders.lock().unwrap().values().cloned().collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }
}

/// 수동으로 개폐를 바꾸는 시계.
pub struct ToggleClock {
    open: AtomicBool,
}

impl ToggleClock {
    pub fn new(open: bool) -> Self {
        Self {
            open: AtomicBool::new(open),
        }
    }

    pub fn set(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }
}

impl MarketClock for ToggleClock {
    fn is_open_at(&self, _now: DateTime<Utc>) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// 증분 체결 이벤트.
pub fn fill(order_id: &str, increment: Decimal) -> FillEvent {
    FillEvent {
        order_id: order_id.to_string(),
        symbol: "005930".to_string(),
        side: Side::Buy,
        price: dec!(70000),
        quantity: increment,
        fill_quantity: Some(increment),
        timestamp: Utc::now(),
    }
}
