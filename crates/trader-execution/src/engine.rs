//! 실행 엔진.
//!
//! 신호 → 매수 가능 금액 → 리스크 → 주문 → 알림 흐름을 조율하고
//! 엔진 상태(시작/일시정지/정지/패닉)와 장 개폐 전환을 관리합니다.
//!
//! # 상태
//!
//! ```text
//! STOPPED → RUNNING ⇄ PAUSED
//!              └── stop(panic) → 전량 취소 + 청산 → STOPPED
//! ```

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use chrono_tz::Asia::Seoul;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use trader_core::{
    AccountBalance, ExecutionReport, FillEvent, MarketClock, OrderRejection, Signal,
};
use trader_notification::{DailyReport, NotificationEvent, NotificationPriority, NotificationQueue};
use trader_risk::{RiskDecision, RiskManager};

use crate::account_manager::AccountManager;
use crate::error::{Result, TradingError};
use crate::order_manager::{OrderEvent, OrderManager};
use crate::strategy_sync::StrategyStateSync;

// ==================== 상태 타입 ====================

/// 엔진 실행 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EngineState {
    Stopped,
    Running,
    Paused,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "STOPPED"),
            EngineState::Running => write!(f, "RUNNING"),
            EngineState::Paused => write!(f, "PAUSED"),
        }
    }
}

/// 운용 모드.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    /// 모의 거래소
    Paper,
    /// 실거래 (KIS)
    Live,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Paper => write!(f, "paper"),
            TradingMode::Live => write!(f, "live"),
        }
    }
}

impl FromStr for TradingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "paper" | "sim" | "simulation" => Ok(TradingMode::Paper),
            "live" | "real" => Ok(TradingMode::Live),
            other => Err(format!("알 수 없는 운용 모드: {}", other)),
        }
    }
}

/// 장 개폐 전환.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    Opened,
    Closed,
}

/// 관찰자용 엔진 스냅샷.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub state: EngineState,
    pub mode: TradingMode,
    pub balance: AccountBalance,
    pub position_count: usize,
    pub active_orders: usize,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// 마지막 장 상태 폴링 결과 (아직 폴링 전이면 None)
    pub market_open: Option<bool>,
}

#[derive(Debug)]
struct Control {
    state: EngineState,
    /// 폐장 전환으로 일시정지된 경우에만 개장 시 자동 재개
    paused_by_session: bool,
    market_open: Option<bool>,
    last_heartbeat: Option<DateTime<Utc>>,
}

// ==================== 엔진 ====================

/// 실행 엔진.
pub struct ExecutionEngine {
    mode: TradingMode,
    orders: Arc<OrderManager>,
    account: Arc<AccountManager>,
    /// 신호 처리 직렬화 겸 리스크 상태
    risk: tokio::sync::Mutex<RiskManager>,
    notifier: NotificationQueue,
    clock: Arc<dyn MarketClock>,
    strategy_sync: Option<StrategyStateSync>,
    control: Mutex<Control>,
}

impl ExecutionEngine {
    /// 새 엔진 생성. 초기 상태는 STOPPED입니다.
    pub fn new(
        mode: TradingMode,
        orders: Arc<OrderManager>,
        account: Arc<AccountManager>,
        risk: RiskManager,
        notifier: NotificationQueue,
        clock: Arc<dyn MarketClock>,
    ) -> Self {
        Self {
            mode,
            orders,
            account,
            risk: tokio::sync::Mutex::new(risk),
            notifier,
            clock,
            strategy_sync: None,
            control: Mutex::new(Control {
                state: EngineState::Stopped,
                paused_by_session: false,
                market_open: None,
                last_heartbeat: None,
            }),
        }
    }

    /// 체결 시 전략 상태 동기화 연결.
    pub fn with_strategy_sync(mut self, sync: StrategyStateSync) -> Self {
        self.strategy_sync = Some(sync);
        self
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    pub fn orders(&self) -> &Arc<OrderManager> {
        &self.orders
    }

    pub fn account(&self) -> &Arc<AccountManager> {
        &self.account
    }

    /// 현재 실행 상태.
    pub fn state(&self) -> EngineState {
        self.control().state
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_state(&self, state: EngineState, message: impl Into<String>) {
        self.notifier.notify(NotificationEvent::EngineState {
            state: state.to_string(),
            message: message.into(),
        });
    }

    // ==================== 제어 ====================

    /// STOPPED/PAUSED → RUNNING.
    ///
    /// 정지 상태에서 시작하면 먼저 계좌를 한 번 동기화합니다.
    pub async fn start(&self) {
        let previous = self.state();
        if previous == EngineState::Running {
            debug!("엔진이 이미 실행 중");
            return;
        }

        if previous == EngineState::Stopped {
            if let Err(e) = self.account.reconcile().await {
                warn!(error = %e, "시작 시 계좌 동기화 실패, 이전 스냅샷으로 진행");
            }
        }

        {
            let mut control = self.control();
            control.state = EngineState::Running;
            control.paused_by_session = false;
        }

        info!(mode = %self.mode, from = %previous, "엔진 시작");
        self.notify_state(EngineState::Running, format!("엔진 시작 ({})", self.mode));
    }

    /// RUNNING → PAUSED (운영자 조작).
    ///
    /// 운영자가 일시정지한 엔진은 개장 전환으로 자동 재개되지 않습니다.
    pub fn pause(&self) -> Result<()> {
        {
            let mut control = self.control();
            if control.state != EngineState::Running {
                return Err(TradingError::InvalidState(format!(
                    "{} 상태에서는 일시정지할 수 없습니다",
                    control.state
                )));
            }
            control.state = EngineState::Paused;
            control.paused_by_session = false;
        }

        info!("엔진 일시정지");
        self.notify_state(EngineState::Paused, "운영자 일시정지");
        Ok(())
    }

    /// 엔진 정지.
    ///
    /// `panic`이면 신규 신호를 막은 뒤 모든 주문을 취소하고 보유 포지션을
    /// 시장가로 청산합니다. 각 일괄 작업은 요청 간격을 지킵니다.
    pub async fn stop(&self, panic: bool) -> Result<()> {
        {
            let mut control = self.control();
            control.state = EngineState::Stopped;
            control.paused_by_session = false;
        }

        if !panic {
            info!("엔진 정지");
            self.notify_state(EngineState::Stopped, "엔진 정지");
            return Ok(());
        }

        error!("패닉 정지: 전량 취소 및 청산 시작");
        // 처리 중인 신호의 주문 등록이 끝난 뒤 취소
        let _gate = self.risk.lock().await;
        let cancelled = self.orders.cancel_all().await;
        let liquidation = self.orders.liquidate_all().await;

        match &liquidation {
            Ok(submitted) => {
                self.notifier.send(
                    format!(
                        "🚨 패닉 정지: 주문 {}건 취소, 청산 주문 {}건 제출",
                        cancelled, submitted
                    ),
                    NotificationPriority::Critical,
                );
            }
            Err(e) => {
                error!(error = %e, "패닉 청산 실패");
                self.notifier.notify(NotificationEvent::SystemError {
                    error_code: "PANIC_LIQUIDATION".to_string(),
                    message: format!("주문 {}건 취소 후 청산 실패: {}", cancelled, e),
                });
            }
        }

        liquidation.map(|_| ())
    }

    // ==================== 신호 처리 ====================

    /// 전략 신호 처리.
    ///
    /// RUNNING이 아니면 무시하고 `Ok(None)`을 반환합니다. 매수는 매수 가능 금액을
    /// 먼저 확인한 뒤 리스크 검사를 거칩니다. 거부나 실패는 재시도하지 않습니다.
    pub async fn on_signal(&self, signal: &Signal, quantity: Decimal) -> Result<Option<String>> {
        let state = self.state();
        if state != EngineState::Running {
            debug!(symbol = %signal.symbol, state = %state, "엔진 비실행 상태, 신호 무시");
            return Ok(None);
        }

        // 신호 처리는 한 번에 하나씩 (주문 빈도 윈도우 일관성)
        let mut risk = self.risk.lock().await;
        let state = self.state();
        if state != EngineState::Running {
            debug!(symbol = %signal.symbol, state = %state, "대기 중 엔진 상태 변경, 신호 무시");
            return Ok(None);
        }
        let snapshot = self.account.snapshot();

        if signal.side.is_buy() {
            let amount = signal.price * quantity;
            // 시장가 신호는 가격을 모르므로 리스크 검사에 맡김
            if amount > Decimal::ZERO && !self.account.check_buying_power(amount) {
                let reason = format!(
                    "요청 {} / 예수금 {} / 총자산 {}",
                    amount, snapshot.balance.cash, snapshot.balance.total_asset
                );
                warn!(symbol = %signal.symbol, %reason, "매수 가능 금액 부족");
                self.notify_rejected(signal, &reason);
                return Err(TradingError::BuyingPowerRejected(reason));
            }
        }

        if let RiskDecision::Deny(violation) = risk.check(signal, &snapshot.balance) {
            return Err(TradingError::RiskRejected(violation.to_string()));
        }

        match self.orders.submit(signal, quantity).await {
            Ok(order_id) => {
                risk.record_dispatch();
                self.notifier.notify(NotificationEvent::OrderSubmitted {
                    order_id: order_id.clone(),
                    symbol: signal.symbol.clone(),
                    side: signal.side.order_side().to_string(),
                    quantity,
                    price: signal.price,
                });
                Ok(Some(order_id))
            }
            Err(e) => {
                error!(symbol = %signal.symbol, side = %signal.side, error = %e, "신호 주문 실패");
                self.notify_rejected(signal, &e.to_string());
                Err(e)
            }
        }
    }

    fn notify_rejected(&self, signal: &Signal, reason: &str) {
        self.notifier.notify(NotificationEvent::OrderRejected {
            symbol: signal.symbol.clone(),
            side: signal.side.to_string(),
            reason: reason.to_string(),
        });
    }

    // ==================== 체결 ====================

    /// 체결 이벤트 처리: 주문 갱신 → 전략 상태 → 계좌 동기화 → 알림.
    pub async fn handle_fill_event(&self, event: &FillEvent) -> Option<OrderEvent> {
        let applied = self.orders.apply_fill_event(event).await?;

        if let Some(sync) = &self.strategy_sync {
            if let Err(e) = sync.apply(&applied).await {
                error!(order_id = %event.order_id, error = %e, "전략 상태 갱신 실패");
            }
        }

        if let Err(e) = self.account.reconcile().await {
            warn!(error = %e, "체결 후 계좌 동기화 실패");
        }

        if let OrderEvent::Filled {
            order_id,
            symbol,
            side,
            price,
            quantity,
            completed,
            ..
        } = &applied
        {
            self.notifier.notify(NotificationEvent::OrderFilled {
                order_id: order_id.clone(),
                symbol: symbol.clone(),
                side: side.to_string(),
                quantity: *quantity,
                price: *price,
                completed: *completed,
            });
        }

        Some(applied)
    }

    /// 접수 후 거부 처리: 주문 종료 → 알림.
    pub async fn handle_rejection(&self, rejection: &OrderRejection) -> Option<OrderEvent> {
        let rejected = self.orders.apply_rejection(rejection).await?;
        self.notifier.notify(NotificationEvent::OrderRejected {
            symbol: rejection.symbol.clone(),
            side: rejection.side.to_string(),
            reason: rejection.reason.clone(),
        });
        Some(rejected)
    }

    /// 거래소 주문 결과 처리.
    pub async fn handle_report(&self, report: &ExecutionReport) -> Option<OrderEvent> {
        match report {
            ExecutionReport::Fill(fill) => self.handle_fill_event(fill).await,
            ExecutionReport::Rejected(rejection) => self.handle_rejection(rejection).await,
        }
    }

    /// 주문 결과 채널을 소비하는 태스크 시작.
    pub fn spawn_report_pump(
        self: &Arc<Self>,
        mut reports: mpsc::UnboundedReceiver<ExecutionReport>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    report = reports.recv() => match report {
                        Some(report) => {
                            engine.handle_report(&report).await;
                        }
                        None => {
                            debug!("주문 결과 채널 종료");
                            break;
                        }
                    },
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }

    // ==================== 장 개폐 ====================

    /// 장 상태 폴링 (현재 시각).
    pub async fn check_market_session(&self) -> Option<SessionTransition> {
        self.check_market_session_at(Utc::now()).await
    }

    /// 직전 폴링과 비교해 개장/폐장 전환을 처리합니다.
    ///
    /// 첫 폴링은 상태만 기록합니다. 폐장 전환 시 모든 주문을 취소하고 실행 중이면
    /// 일시정지하며, 개장 전환 시에는 폐장으로 일시정지된 경우에만 재개합니다.
    pub async fn check_market_session_at(&self, now: DateTime<Utc>) -> Option<SessionTransition> {
        let open = self.clock.is_open_at(now);
        let previous = {
            let mut control = self.control();
            control.market_open.replace(open)
        };

        match (previous, open) {
            (Some(false), true) => {
                let resumed = {
                    let mut control = self.control();
                    if control.state == EngineState::Paused && control.paused_by_session {
                        control.state = EngineState::Running;
                        control.paused_by_session = false;
                        true
                    } else {
                        false
                    }
                };
                info!(resumed, "장 개장");
                if resumed {
                    self.notify_state(EngineState::Running, "장 개장, 신호 처리 재개");
                }
                Some(SessionTransition::Opened)
            }
            (Some(true), false) => {
                let cancelled = self.orders.cancel_all().await;
                let paused = {
                    let mut control = self.control();
                    if control.state == EngineState::Running {
                        control.state = EngineState::Paused;
                        control.paused_by_session = true;
                        true
                    } else {
                        false
                    }
                };
                info!(cancelled, paused, "장 마감");
                self.notify_state(
                    if paused { EngineState::Paused } else { self.state() },
                    format!("장 마감, 미체결 {}건 취소", cancelled),
                );
                Some(SessionTransition::Closed)
            }
            _ => None,
        }
    }

    // ==================== 주기 작업 ====================

    /// 워치독 하트비트 기록.
    pub fn heartbeat(&self) {
        let now = Utc::now();
        let state = {
            let mut control = self.control();
            control.last_heartbeat = Some(now);
            control.state
        };
        debug!(state = %state, "하트비트");
    }

    /// 계좌 동기화.
    pub async fn reconcile(&self) -> Result<()> {
        self.account.reconcile().await.map(|_| ())
    }

    /// 일일 리포트를 만들어 알림 큐로 보냅니다.
    pub async fn send_daily_report(&self) -> DailyReport {
        if let Err(e) = self.account.reconcile().await {
            warn!(error = %e, "리포트용 계좌 동기화 실패, 마지막 스냅샷 사용");
        }
        let snapshot = self.account.snapshot();

        let report = DailyReport {
            date: Utc::now().with_timezone(&Seoul).date_naive(),
            mode: self.mode.to_string(),
            total_asset: snapshot.balance.total_asset,
            cash: snapshot.balance.cash,
            daily_pnl: snapshot.daily_pnl(),
            total_return_pct: snapshot.balance.total_return_pct,
            position_count: snapshot.positions.len(),
            active_orders: self.orders.active_count().await,
        };

        info!(summary = %report.summary(), "일일 리포트");
        self.notifier.send_daily_report(report.clone());
        report
    }

    /// 관찰자용 상태 스냅샷.
    pub async fn get_state(&self) -> EngineSnapshot {
        let account = self.account.snapshot();
        let active_orders = self.orders.active_count().await;
        let control = self.control();

        EngineSnapshot {
            state: control.state,
            mode: self.mode,
            balance: account.balance,
            position_count: account.positions.len(),
            active_orders,
            last_heartbeat: control.last_heartbeat,
            market_open: control.market_open,
        }
    }
}
