//! 모의 거래소.
//!
//! 실거래와 같은 `Exchange` 인터페이스를 제공하며, 주문은 호가 수신 시에만 체결됩니다.
//!
//! # 아키텍처
//!
//! ```text
//! PaperExchange
//! ├── Exchange 구현 (주문 접수/취소/정정, 잔고 조회)
//! ├── PaperOrderEngine (대기 주문 매칭)
//! ├── PaperLedger (현금/포지션 정산)
//! ├── 체결/거부 보고 송신 (mpsc)
//! └── 원장 영속성 (PaperLedgerStore)
//! ```

mod engine;

pub use engine::{
    MatchOutcome, PaperConfig, PaperLedger, PaperOrderEngine, PaperPendingOrder, PaperTrade,
};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use trader_core::{
    BalancePayload, Exchange, ExchangeError, ExecutionReport, FillEvent, OrderAck, OrderKind,
    OrderRejection, OrderRequest, Quote,
};
use trader_data::{PaperLedgerSnapshot, PaperLedgerStore, StoreError};

/// 잠금 안에서 함께 변경되는 상태.
struct PaperState {
    engine: PaperOrderEngine,
    ledger: PaperLedger,
    rng: StdRng,
}

/// 프로세스마다 새로 발급하는 주문 ID 구분자.
fn session_tag() -> String {
    let mut tag = Uuid::new_v4().simple().to_string();
    tag.truncate(8);
    tag
}

/// 모의 거래소.
pub struct PaperExchange {
    config: PaperConfig,
    state: RwLock<PaperState>,
    report_tx: Option<mpsc::UnboundedSender<ExecutionReport>>,
    store: Option<Arc<dyn PaperLedgerStore>>,
}

impl PaperExchange {
    /// 새 모의 거래소 생성.
    pub fn new(config: PaperConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// 고정 시드로 생성 (재현 가능한 슬리피지).
    pub fn with_seed(config: PaperConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: PaperConfig, rng: StdRng) -> Self {
        let ledger = PaperLedger::new(config.initial_cash);
        Self {
            config,
            state: RwLock::new(PaperState {
                engine: PaperOrderEngine::with_session(session_tag()),
                ledger,
                rng,
            }),
            report_tx: None,
            store: None,
        }
    }

    /// 주문 결과(체결/거부) 송신 채널 연결.
    pub fn with_report_sender(mut self, tx: mpsc::UnboundedSender<ExecutionReport>) -> Self {
        self.report_tx = Some(tx);
        self
    }

    /// 원장 저장소 연결.
    pub fn with_store(mut self, store: Arc<dyn PaperLedgerStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 설정 조회.
    pub fn config(&self) -> &PaperConfig {
        &self.config
    }

    /// 저장된 원장 복원. 저장본이 없으면 `false`를 반환합니다.
    pub async fn restore(&self) -> Result<bool, StoreError> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let Some(snapshot) = store.load_paper_ledger().await? else {
            return Ok(false);
        };

        let mut state = self.state.write().await;
        state.ledger = PaperLedger {
            cash: snapshot.cash,
            realized_pnl: snapshot.realized_pnl,
            initial_cash: snapshot.initial_cash,
            positions: snapshot
                .positions
                .into_iter()
                .map(|p| (p.symbol.clone(), p))
                .collect(),
        };

        info!(
            cash = %state.ledger.cash,
            positions = state.ledger.positions.len(),
            "[Paper] 원장 복원 완료"
        );
        Ok(true)
    }

    /// 현재 원장 저장.
    pub async fn persist(&self) -> Result<(), StoreError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let snapshot = {
            let state = self.state.read().await;
            PaperLedgerSnapshot {
                cash: state.ledger.cash,
                realized_pnl: state.ledger.realized_pnl,
                initial_cash: state.ledger.initial_cash,
                positions: state.ledger.positions.values().cloned().collect(),
                updated_at: Utc::now(),
            }
        };
        store.save_paper_ledger(&snapshot).await
    }

    /// 호가 수신 처리.
    ///
    /// 체결된 주문마다 체결 보고를, 정산 불가로 제거된 주문마다 거부 보고를
    /// 송신합니다. 체결이 있었으면 원장을 저장합니다.
    pub async fn on_quote(&self, quote: &Quote) -> Vec<MatchOutcome> {
        let outcomes = {
            let mut guard = self.state.write().await;
            let PaperState {
                engine,
                ledger,
                rng,
            } = &mut *guard;
            engine.on_quote(quote, ledger, &self.config, rng)
        };

        let mut filled = false;
        for outcome in &outcomes {
            let report = match outcome {
                MatchOutcome::Filled(trade) => {
                    filled = true;
                    ExecutionReport::Fill(FillEvent {
                        order_id: trade.order_id.clone(),
                        symbol: trade.symbol.clone(),
                        side: trade.side,
                        price: trade.price,
                        quantity: trade.quantity,
                        fill_quantity: Some(trade.quantity),
                        timestamp: trade.timestamp,
                    })
                }
                MatchOutcome::Rejected {
                    order_id,
                    symbol,
                    side,
                    reason,
                } => ExecutionReport::Rejected(OrderRejection {
                    order_id: order_id.clone(),
                    symbol: symbol.clone(),
                    side: *side,
                    reason: reason.clone(),
                    timestamp: quote.timestamp,
                }),
            };
            self.emit(report);
        }

        if filled {
            if let Err(e) = self.persist().await {
                error!(error = %e, "[Paper] 원장 저장 실패");
            }
        }

        outcomes
    }

    fn emit(&self, report: ExecutionReport) {
        let Some(tx) = &self.report_tx else {
            return;
        };
        let order_id = report.order_id().to_string();
        if tx.send(report).is_err() {
            warn!(order_id = %order_id, "[Paper] 주문 결과 수신단이 닫혀 있음");
        }
    }

    /// 대기 주문 목록.
    pub async fn pending_orders(&self) -> Vec<PaperPendingOrder> {
        self.state.read().await.engine.pending_orders()
    }

    /// 원장 복사본.
    pub async fn ledger(&self) -> PaperLedger {
        self.state.read().await.ledger.clone()
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        if request.quantity <= Decimal::ZERO {
            return Err(ExchangeError::Rejected(format!(
                "주문 수량은 0보다 커야 합니다: {}",
                request.quantity
            )));
        }
        if request.kind == OrderKind::Limit && request.price <= Decimal::ZERO {
            return Err(ExchangeError::Rejected(format!(
                "지정가는 0보다 커야 합니다: {}",
                request.price
            )));
        }

        let order_id = self.state.write().await.engine.submit(request, Utc::now());
        Ok(OrderAck::new(order_id))
    }

    async fn cancel_order(
        &self,
        order_id: &str,
        symbol: &str,
        _quantity: Decimal,
    ) -> Result<(), ExchangeError> {
        match self.state.write().await.engine.cancel(order_id) {
            Some(_) => {
                debug!(order_id, symbol, "[Paper] 주문 취소");
                Ok(())
            }
            None => Err(ExchangeError::OrderNotFound(order_id.to_string())),
        }
    }

    async fn modify_order(
        &self,
        order_id: &str,
        _symbol: &str,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<OrderAck, ExchangeError> {
        if quantity <= Decimal::ZERO {
            return Err(ExchangeError::Rejected(format!(
                "정정 수량은 0보다 커야 합니다: {}",
                quantity
            )));
        }
        if self.state.write().await.engine.modify(order_id, quantity, price) {
            Ok(OrderAck::new(order_id))
        } else {
            Err(ExchangeError::OrderNotFound(order_id.to_string()))
        }
    }

    async fn fetch_balance(&self) -> Result<BalancePayload, ExchangeError> {
        Ok(BalancePayload(self.state.read().await.ledger.balance_json()))
    }
}
