//! 주문 관리자.
//!
//! 활성 주문 집합과 저장소 미러를 단독으로 소유합니다.
//!
//! # 상태 전이
//!
//! ```text
//! PENDING → ACCEPTED → PARTIALLY_FILLED → FILLED
//!     └──────────┴─────────────┴──────→ CANCELLED
//! ```
//!
//! 종료 상태(FILLED, CANCELLED)에 도달한 주문은 같은 잠금 구간 안에서
//! 메모리와 저장소 양쪽에서 제거됩니다. 저장소 실패는 로그만 남기며
//! 현재 프로세스에서는 메모리 상태가 기준입니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use trader_core::{
    Exchange, ExchangeError, FillEvent, Order, OrderOrigin, OrderRejection, OrderRequest, Side,
    Signal,
};
use trader_data::OrderStore;

use crate::error::{Result, TradingError};

/// 주문 이벤트 채널 용량.
const EVENT_CAPACITY: usize = 256;

/// 주문 관리자 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderManagerConfig {
    /// 미체결 허용 시간 (초과 시 자동 취소)
    pub max_unfilled: StdDuration,
    /// 같은 주문 취소 재시도 간격
    pub cancel_cooldown: StdDuration,
    /// 일괄 요청 간 지연
    pub request_pacing: StdDuration,
}

impl Default for OrderManagerConfig {
    fn default() -> Self {
        Self {
            max_unfilled: StdDuration::from_secs(180),
            cancel_cooldown: StdDuration::from_secs(10),
            request_pacing: StdDuration::from_millis(200),
        }
    }
}

/// 주문 도메인 이벤트.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderEvent {
    /// 거래소 접수 및 등록
    Submitted(Order),
    /// 체결 (부분 체결 포함)
    Filled {
        order_id: String,
        symbol: String,
        side: Side,
        price: Decimal,
        /// 이번 이벤트로 반영된 수량
        quantity: Decimal,
        strategy_id: Option<String>,
        /// 전량 체결 여부
        completed: bool,
    },
    /// 취소 완료
    Cancelled { order_id: String, symbol: String },
    /// 접수 후 거래소가 거부 (종료)
    Rejected {
        order_id: String,
        symbol: String,
        side: Side,
        reason: String,
    },
}

/// 주문 관리자.
pub struct OrderManager {
    exchange: Arc<dyn Exchange>,
    store: Arc<dyn OrderStore>,
    config: OrderManagerConfig,
    /// 활성 주문 (order_id → Order)
    active: Mutex<HashMap<String, Order>>,
    /// 마지막 취소 시도 시각
    cancel_attempts: Mutex<HashMap<String, DateTime<Utc>>>,
    events: broadcast::Sender<OrderEvent>,
}

impl OrderManager {
    /// 저장소의 활성 주문을 모두 불러온 뒤 관리자를 생성합니다.
    ///
    /// 복원이 끝나기 전에는 인스턴스가 존재하지 않으므로 다른 주문 작업이
    /// 먼저 실행될 수 없습니다.
    ///
    /// # Errors
    ///
    /// 저장소 조회 실패 시 `TradingError::Persistence`. 시작을 중단해야 합니다.
    pub async fn restore(
        exchange: Arc<dyn Exchange>,
        store: Arc<dyn OrderStore>,
        config: OrderManagerConfig,
    ) -> Result<Self> {
        let orders = store.load_active_orders().await?;

        let mut active = HashMap::with_capacity(orders.len());
        for order in orders {
            if order.status.is_terminal() {
                warn!(order_id = %order.order_id, status = %order.status, "종료 상태 주문이 저장소에 남아 있음, 무시");
                continue;
            }
            active.insert(order.order_id.clone(), order);
        }

        info!(
            exchange = exchange.name(),
            restored = active.len(),
            "활성 주문 복원 완료"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            exchange,
            store,
            config,
            active: Mutex::new(active),
            cancel_attempts: Mutex::new(HashMap::new()),
            events,
        })
    }

    /// 설정 조회.
    pub fn config(&self) -> &OrderManagerConfig {
        &self.config
    }

    /// 주문 이벤트 구독.
    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.events.subscribe()
    }

    /// 활성 주문 목록 (생성 시각 순).
    pub async fn active_orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.active.lock().await.values().cloned().collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }

    /// 활성 주문 수.
    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    /// 주문 조회.
    pub async fn get(&self, order_id: &str) -> Option<Order> {
        self.active.lock().await.get(order_id).cloned()
    }

    // ==================== 제출 ====================

    /// 전략 신호로 주문 제출.
    ///
    /// EXIT 신호는 매도 주문이 되며, 수량은 호출자가 정합니다.
    pub async fn submit(&self, signal: &Signal, quantity: Decimal) -> Result<String> {
        if signal.symbol.trim().is_empty() {
            return Err(TradingError::Validation("종목 코드가 비어 있습니다".to_string()));
        }
        self.submit_inner(
            &signal.symbol,
            signal.side.order_side(),
            signal.price,
            quantity,
            OrderOrigin::Strategy,
            signal.strategy_id.clone(),
        )
        .await
    }

    /// 수동 주문 제출.
    pub async fn submit_manual(
        &self,
        symbol: &str,
        side: Side,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<String> {
        self.submit_inner(symbol, side, price, quantity, OrderOrigin::Manual, None)
            .await
    }

    async fn submit_inner(
        &self,
        symbol: &str,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        origin: OrderOrigin,
        strategy_id: Option<String>,
    ) -> Result<String> {
        if quantity <= Decimal::ZERO {
            return Err(TradingError::Validation(format!(
                "주문 수량은 0보다 커야 합니다: {}",
                quantity
            )));
        }

        let request = OrderRequest::from_price(symbol, side, quantity, price);
        let ack = self.exchange.submit_order(&request).await.map_err(|e| {
            warn!(symbol, side = %side, error = %e, "주문 제출 실패");
            TradingError::from(e)
        })?;

        let order = Order::accepted(&ack.order_id, symbol, side, quantity, request.price, origin)
            .with_strategy(strategy_id);

        let registered = {
            let mut active = self.active.lock().await;
            let mut registered = order;
            match active.get(&ack.order_id) {
                // 접수 응답보다 체결 이벤트가 먼저 도착한 경우 체결 수량 유지
                Some(early) if early.origin == OrderOrigin::Unknown => {
                    registered.apply_fill(early.filled_quantity);
                    active.remove(&ack.order_id);
                }
                // 이미 추적 중인 주문과 ID 충돌: 기존 주문을 덮어쓰지 않음
                Some(existing) => {
                    error!(
                        order_id = %ack.order_id,
                        symbol,
                        existing_symbol = %existing.symbol,
                        existing_origin = %existing.origin,
                        "거래소가 추적 중인 주문과 같은 ID를 발급했습니다"
                    );
                    return Err(TradingError::InvalidState(format!(
                        "주문 ID 충돌: {}",
                        ack.order_id
                    )));
                }
                None => {}
            }
            if registered.status.is_terminal() {
                self.forget(&registered.order_id).await;
            } else {
                self.persist(&registered).await;
                active.insert(registered.order_id.clone(), registered.clone());
            }
            registered
        };

        info!(
            order_id = %registered.order_id,
            symbol = %registered.symbol,
            side = %registered.side,
            quantity = %registered.quantity,
            price = %registered.price,
            kind = ?registered.kind(),
            origin = %registered.origin,
            "주문 등록"
        );

        let _ = self.events.send(OrderEvent::Submitted(registered));
        Ok(ack.order_id)
    }

    // ==================== 정정/취소 ====================

    /// 주문 정정.
    ///
    /// 원 주문 ID로 거래소에 정정을 요청합니다. 거래소가 새 ID를 발급하면
    /// 활성 집합과 저장소의 키를 교체합니다.
    pub async fn modify(&self, order_id: &str, price: Decimal, quantity: Decimal) -> Result<String> {
        let current = self
            .get(order_id)
            .await
            .ok_or_else(|| TradingError::OrderNotFound(order_id.to_string()))?;

        if quantity <= Decimal::ZERO || quantity < current.filled_quantity {
            return Err(TradingError::Validation(format!(
                "정정 수량이 잘못되었습니다: {} (체결 {})",
                quantity, current.filled_quantity
            )));
        }

        let ack = self
            .exchange
            .modify_order(order_id, &current.symbol, quantity, price)
            .await?;

        let mut active = self.active.lock().await;
        let Some(mut order) = active.remove(order_id) else {
            // 정정 응답 대기 중 전량 체결됨
            return Err(TradingError::OrderNotFound(order_id.to_string()));
        };

        order.quantity = quantity;
        order.price = price;
        if ack.order_id != order_id {
            if let Err(e) = self.store.delete_order(order_id).await {
                error!(order_id, error = %e, "정정 전 주문 삭제 실패");
            }
            order.order_id = ack.order_id.clone();
        }
        self.persist(&order).await;

        info!(
            order_id,
            new_order_id = %order.order_id,
            quantity = %quantity,
            price = %price,
            "주문 정정"
        );
        active.insert(order.order_id.clone(), order);
        Ok(ack.order_id)
    }

    /// 주문 취소.
    ///
    /// 거래소에 주문이 없으면(이미 종료) 로컬에서도 취소로 정리합니다.
    pub async fn cancel(&self, order_id: &str) -> Result<()> {
        self.cancel_at(order_id, Utc::now()).await
    }

    async fn cancel_at(&self, order_id: &str, now: DateTime<Utc>) -> Result<()> {
        let order = self
            .get(order_id)
            .await
            .ok_or_else(|| TradingError::OrderNotFound(order_id.to_string()))?;

        self.cancel_attempts
            .lock()
            .await
            .insert(order_id.to_string(), now);

        match self
            .exchange
            .cancel_order(order_id, &order.symbol, order.remaining_quantity())
            .await
        {
            Ok(()) => {}
            Err(ExchangeError::OrderNotFound(_)) => {
                warn!(order_id, "거래소에 주문 없음, 로컬 취소 처리");
            }
            Err(e) => {
                warn!(order_id, error = %e, "주문 취소 실패");
                return Err(e.into());
            }
        }

        self.finalize_cancel(order_id).await;
        Ok(())
    }

    async fn finalize_cancel(&self, order_id: &str) {
        let removed = {
            let mut active = self.active.lock().await;
            let removed = active.remove(order_id);
            if removed.is_some() {
                self.forget(order_id).await;
            }
            removed
        };
        self.cancel_attempts.lock().await.remove(order_id);

        if let Some(order) = removed {
            info!(order_id, symbol = %order.symbol, filled = %order.filled_quantity, "주문 취소 완료");
            let _ = self.events.send(OrderEvent::Cancelled {
                order_id: order.order_id,
                symbol: order.symbol,
            });
        }
    }

    /// 모든 활성 주문 취소. 성공 건수를 반환합니다.
    pub async fn cancel_all(&self) -> usize {
        let ids: Vec<String> = self
            .active_orders()
            .await
            .into_iter()
            .map(|o| o.order_id)
            .collect();

        let mut cancelled = 0;
        for (idx, order_id) in ids.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(self.config.request_pacing).await;
            }
            match self.cancel(order_id).await {
                Ok(()) => cancelled += 1,
                Err(e) => warn!(order_id = %order_id, error = %e, "일괄 취소 중 실패"),
            }
        }

        info!(requested = ids.len(), cancelled, "일괄 취소 완료");
        cancelled
    }

    /// 보유 포지션 전량 시장가 매도. 제출 건수를 반환합니다.
    pub async fn liquidate_all(&self) -> Result<usize> {
        let payload = self.exchange.fetch_balance().await?;
        let snapshot = payload
            .normalize()
            .map_err(|e| TradingError::Transport(ExchangeError::Parse(e.to_string())))?;

        let targets: Vec<_> = snapshot
            .positions
            .iter()
            .filter(|p| p.quantity > Decimal::ZERO)
            .collect();

        let mut submitted = 0;
        for (idx, position) in targets.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(self.config.request_pacing).await;
            }
            match self
                .submit_manual(&position.symbol, Side::Sell, Decimal::ZERO, position.quantity)
                .await
            {
                Ok(_) => submitted += 1,
                Err(e) => error!(symbol = %position.symbol, error = %e, "청산 주문 실패"),
            }
        }

        warn!(positions = targets.len(), submitted, "전량 청산 주문 제출");
        Ok(submitted)
    }

    // ==================== 체결 ====================

    /// 체결 이벤트 반영.
    ///
    /// 로컬 기록이 없는 주문은 출처 UNKNOWN의 ACCEPTED 주문으로 편입한 뒤 반영합니다.
    /// 실제로 반영된 수량이 없으면(중복, 초과 보고) `None`을 반환합니다.
    pub async fn apply_fill_event(&self, event: &FillEvent) -> Option<OrderEvent> {
        let mut active = self.active.lock().await;

        let order = active.entry(event.order_id.clone()).or_insert_with(|| {
            warn!(order_id = %event.order_id, symbol = %event.symbol, "외부 체결 주문 편입");
            Order::accepted(
                &event.order_id,
                &event.symbol,
                event.side,
                event.quantity.max(event.increment()),
                event.price,
                OrderOrigin::Unknown,
            )
        });

        let applied = order.apply_fill(event.increment());
        if applied.is_zero() {
            debug!(order_id = %event.order_id, "반영할 체결 수량 없음");
            return None;
        }

        let completed = order.status.is_terminal();
        let filled = OrderEvent::Filled {
            order_id: order.order_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            price: event.price,
            quantity: applied,
            strategy_id: order.strategy_id.clone(),
            completed,
        };

        info!(
            order_id = %order.order_id,
            symbol = %order.symbol,
            applied = %applied,
            filled = %order.filled_quantity,
            quantity = %order.quantity,
            status = %order.status,
            "체결 반영"
        );

        if completed {
            active.remove(&event.order_id);
            self.forget(&event.order_id).await;
            drop(active);
            self.cancel_attempts.lock().await.remove(&event.order_id);
        } else {
            let snapshot = order.clone();
            self.persist(&snapshot).await;
        }

        let _ = self.events.send(filled.clone());
        Some(filled)
    }

    /// 접수 후 거부 보고 반영.
    ///
    /// 주문을 활성 집합과 저장소에서 제거합니다. 추적하지 않는 주문이면 `None`.
    pub async fn apply_rejection(&self, rejection: &OrderRejection) -> Option<OrderEvent> {
        let removed = {
            let mut active = self.active.lock().await;
            let removed = active.remove(&rejection.order_id);
            if removed.is_some() {
                self.forget(&rejection.order_id).await;
            }
            removed
        };
        self.cancel_attempts.lock().await.remove(&rejection.order_id);

        let Some(order) = removed else {
            debug!(order_id = %rejection.order_id, "추적하지 않는 주문의 거부 보고");
            return None;
        };

        warn!(
            order_id = %order.order_id,
            symbol = %order.symbol,
            filled = %order.filled_quantity,
            reason = %rejection.reason,
            "주문 거부로 종료"
        );
        let event = OrderEvent::Rejected {
            order_id: order.order_id,
            symbol: order.symbol,
            side: order.side,
            reason: rejection.reason.clone(),
        };
        let _ = self.events.send(event.clone());
        Some(event)
    }

    // ==================== 미체결 감시 ====================

    /// 미체결 주문 정리 (현재 시각).
    pub async fn monitor_unfilled(&self) -> Vec<String> {
        self.monitor_unfilled_at(Utc::now()).await
    }

    /// 허용 시간을 넘긴 주문에 취소를 요청합니다.
    ///
    /// 같은 주문은 쿨다운 안에 다시 요청하지 않습니다. 요청한 주문 ID를 반환합니다.
    pub async fn monitor_unfilled_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let max_unfilled = to_chrono(self.config.max_unfilled);
        let cooldown = to_chrono(self.config.cancel_cooldown);

        let stale: Vec<String> = {
            let attempts = self.cancel_attempts.lock().await;
            self.active
                .lock()
                .await
                .values()
                .filter(|o| o.age(now) >= max_unfilled)
                .filter(|o| {
                    attempts
                        .get(&o.order_id)
                        .map_or(true, |last| now - *last >= cooldown)
                })
                .map(|o| o.order_id.clone())
                .collect()
        };

        for (idx, order_id) in stale.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(self.config.request_pacing).await;
            }
            info!(order_id = %order_id, "미체결 시간 초과, 취소 요청");
            if let Err(e) = self.cancel_at(order_id, now).await {
                warn!(order_id = %order_id, error = %e, "미체결 취소 실패, 쿨다운 후 재시도");
            }
        }

        stale
    }

    // ==================== 저장소 ====================

    async fn persist(&self, order: &Order) {
        if let Err(e) = self.store.upsert_order(order).await {
            error!(order_id = %order.order_id, error = %e, "주문 저장 실패, 재시작 시 복구 불가");
        }
    }

    async fn forget(&self, order_id: &str) {
        if let Err(e) = self.store.delete_order(order_id).await {
            error!(order_id, error = %e, "주문 삭제 실패");
        }
    }
}

fn to_chrono(duration: StdDuration) -> Duration {
    Duration::from_std(duration).unwrap_or_else(|_| Duration::days(365))
}
