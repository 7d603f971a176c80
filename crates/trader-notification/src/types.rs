//! 알림 메시지 타입.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// 알림 우선순위.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationPriority::Low => write!(f, "low"),
            NotificationPriority::Normal => write!(f, "normal"),
            NotificationPriority::High => write!(f, "high"),
            NotificationPriority::Critical => write!(f, "critical"),
        }
    }
}

/// 일일 리포트.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    /// 기준일 (KST)
    pub date: NaiveDate,
    /// 운용 모드 (paper / live)
    pub mode: String,
    /// 총 자산
    pub total_asset: Decimal,
    /// 예수금
    pub cash: Decimal,
    /// 당일 손익
    pub daily_pnl: Decimal,
    /// 누적 수익률 (%)
    pub total_return_pct: Decimal,
    /// 보유 종목 수
    pub position_count: usize,
    /// 미체결 주문 수
    pub active_orders: usize,
}

impl DailyReport {
    /// 한 줄 요약.
    pub fn summary(&self) -> String {
        let sign = if self.daily_pnl >= Decimal::ZERO { "+" } else { "" };
        format!(
            "[{}] {} 총자산 {} / 예수금 {} / 당일손익 {}{} / 수익률 {}% / 보유 {}종목 / 미체결 {}건",
            self.date,
            self.mode,
            self.total_asset.round_dp(0),
            self.cash.round_dp(0),
            sign,
            self.daily_pnl.round_dp(0),
            self.total_return_pct.round_dp(2),
            self.position_count,
            self.active_orders
        )
    }
}

/// 알림 이벤트.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// 주문 제출
    OrderSubmitted {
        order_id: String,
        symbol: String,
        side: String,
        quantity: Decimal,
        price: Decimal,
    },
    /// 주문 체결 (부분 체결 포함)
    OrderFilled {
        order_id: String,
        symbol: String,
        side: String,
        quantity: Decimal,
        price: Decimal,
        completed: bool,
    },
    /// 주문 거부 또는 실패
    OrderRejected {
        symbol: String,
        side: String,
        reason: String,
    },
    /// 리스크 한도 차단
    RiskAlert { symbol: String, reason: String },
    /// 엔진 상태 변경
    EngineState { state: String, message: String },
    /// 일일 리포트
    DailyReport(DailyReport),
    /// 시스템 오류
    SystemError { error_code: String, message: String },
    /// 자유 형식 메시지
    Custom { title: String, message: String },
}

impl NotificationEvent {
    /// 이벤트 유형별 기본 우선순위.
    pub fn default_priority(&self) -> NotificationPriority {
        match self {
            NotificationEvent::OrderSubmitted { .. } => NotificationPriority::Normal,
            NotificationEvent::OrderFilled { .. } => NotificationPriority::Normal,
            NotificationEvent::OrderRejected { .. } => NotificationPriority::High,
            NotificationEvent::RiskAlert { .. } => NotificationPriority::High,
            NotificationEvent::EngineState { .. } => NotificationPriority::Normal,
            NotificationEvent::DailyReport(_) => NotificationPriority::Low,
            NotificationEvent::SystemError { .. } => NotificationPriority::Critical,
            NotificationEvent::Custom { .. } => NotificationPriority::Normal,
        }
    }
}

/// 알림.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub event: NotificationEvent,
    pub priority: NotificationPriority,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// 이벤트 기본 우선순위로 알림 생성.
    pub fn new(event: NotificationEvent) -> Self {
        let priority = event.default_priority();
        Self {
            id: Uuid::new_v4(),
            event,
            priority,
            timestamp: Utc::now(),
        }
    }

    /// 텍스트 알림 생성.
    pub fn text(message: impl Into<String>, priority: NotificationPriority) -> Self {
        Self::new(NotificationEvent::Custom {
            title: "알림".to_string(),
            message: message.into(),
        })
        .with_priority(priority)
    }

    /// 우선순위 지정.
    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    /// 평문 요약 (로그 및 단순 채널용).
    pub fn summary(&self) -> String {
        match &self.event {
            NotificationEvent::OrderSubmitted {
                order_id,
                symbol,
                side,
                quantity,
                price,
            } => format!("주문 제출: {} {} {}주 @ {} ({})", symbol, side, quantity, price, order_id),
            NotificationEvent::OrderFilled {
                order_id,
                symbol,
                side,
                quantity,
                price,
                completed,
            } => format!(
                "{}: {} {} {}주 @ {} ({})",
                if *completed { "주문 체결" } else { "부분 체결" },
                symbol,
                side,
                quantity,
                price,
                order_id
            ),
            NotificationEvent::OrderRejected {
                symbol,
                side,
                reason,
            } => format!("주문 거부: {} {} - {}", symbol, side, reason),
            NotificationEvent::RiskAlert { symbol, reason } => {
                format!("리스크 차단: {} - {}", symbol, reason)
            }
            NotificationEvent::EngineState { state, message } => {
                format!("엔진 {}: {}", state, message)
            }
            NotificationEvent::DailyReport(report) => report.summary(),
            NotificationEvent::SystemError {
                error_code,
                message,
            } => format!("시스템 오류 [{}]: {}", error_code, message),
            NotificationEvent::Custom { title, message } => format!("{}: {}", title, message),
        }
    }
}

/// 알림 에러.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// 네트워크 에러
    #[error("네트워크 에러: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// 요청 한도 초과 (재시도 대기 초)
    #[error("요청 한도 초과, {0}초 후 재시도")]
    RateLimited(u64),

    /// 전송 실패
    #[error("전송 실패: {0}")]
    SendFailed(String),

    /// 큐가 가득 참
    #[error("알림 큐가 가득 찼습니다")]
    QueueFull,

    /// 워커 종료
    #[error("알림 큐가 닫혔습니다")]
    QueueClosed,
}

/// 알림 Result 타입.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// 알림 전송 채널 trait.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// 알림 전송.
    async fn send(&self, notification: &Notification) -> NotificationResult<()>;

    /// 활성화 여부.
    fn is_enabled(&self) -> bool;

    /// 채널 이름.
    fn name(&self) -> &str;
}
