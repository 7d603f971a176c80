//! Slack 알림 서비스.
//!
//! Slack Incoming Webhook을 통해 주문, 리스크, 엔진 상태 알림을 전송합니다.

use crate::types::{
    Notification, NotificationError, NotificationEvent, NotificationPriority, NotificationResult,
    NotificationSender,
};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error, info, warn};

/// Slack 알림 전송 설정.
#[derive(Debug, Clone)]
pub struct SlackConfig {
    /// Slack Incoming Webhook URL
    pub webhook_url: String,
    /// 전송 활성화 여부
    pub enabled: bool,
}

impl SlackConfig {
    /// 새 Slack 설정을 생성합니다.
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            enabled: true,
        }
    }

    /// 환경 변수에서 설정을 생성합니다.
    pub fn from_env() -> Option<Self> {
        let webhook_url = std::env::var("SLACK_WEBHOOK_URL").ok()?;
        let enabled = std::env::var("SLACK_ENABLED")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(true);

        Some(Self {
            webhook_url,
            enabled,
        })
    }
}

/// Slack 알림 전송기.
pub struct SlackSender {
    config: SlackConfig,
    client: reqwest::Client,
}

impl SlackSender {
    /// 새 Slack 전송기를 생성합니다.
    pub fn new(config: SlackConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// 환경 변수에서 전송기를 생성합니다.
    pub fn from_env() -> Option<Self> {
        SlackConfig::from_env().map(Self::new)
    }

    /// 우선순위에 따른 이모지를 반환합니다.
    fn get_priority_emoji(&self, priority: &NotificationPriority) -> &'static str {
        match priority {
            NotificationPriority::Low => "ℹ️",
            NotificationPriority::Normal => "📊",
            NotificationPriority::High => "⚠️",
            NotificationPriority::Critical => "🚨",
        }
    }

    /// 알림을 Slack Block Kit 형식으로 포맷합니다.
    fn format_blocks(&self, notification: &Notification) -> serde_json::Value {
        let timestamp = notification.timestamp.format("%Y-%m-%d %H:%M:%S UTC");
        let priority_emoji = self.get_priority_emoji(&notification.priority);

        let (header, fields): (String, Vec<(&str, String)>) = match &notification.event {
            NotificationEvent::OrderFilled {
                order_id,
                symbol,
                side,
                quantity,
                price,
                completed,
            } => {
                let side_emoji = if side.eq_ignore_ascii_case("buy") { "🟢" } else { "🔴" };
                let title = if *completed { "주문 체결" } else { "부분 체결" };
                (
                    format!("{} {}", side_emoji, title),
                    vec![
                        ("심볼", format!("`{}`", symbol)),
                        ("방향", side.clone()),
                        ("수량", quantity.to_string()),
                        ("가격", price.to_string()),
                        ("주문ID", format!("`{}`", order_id)),
                    ],
                )
            }
            NotificationEvent::OrderSubmitted {
                order_id,
                symbol,
                side,
                quantity,
                price,
            } => (
                "📨 주문 제출".to_string(),
                vec![
                    ("심볼", format!("`{}`", symbol)),
                    ("방향", side.clone()),
                    ("수량", quantity.to_string()),
                    ("가격", price.to_string()),
                    ("주문ID", format!("`{}`", order_id)),
                ],
            ),
            NotificationEvent::OrderRejected {
                symbol,
                side,
                reason,
            } => (
                "⛔ 주문 거부".to_string(),
                vec![
                    ("심볼", format!("`{}`", symbol)),
                    ("방향", side.clone()),
                    ("사유", reason.clone()),
                ],
            ),
            NotificationEvent::RiskAlert { symbol, reason } => (
                "⚠️ 리스크 경고".to_string(),
                vec![("심볼", format!("`{}`", symbol)), ("사유", reason.clone())],
            ),
            NotificationEvent::EngineState { state, message } => (
                format!("{} 엔진 {}", priority_emoji, state),
                vec![("내용", message.clone())],
            ),
            NotificationEvent::DailyReport(report) => (
                "📈 일일 리포트".to_string(),
                vec![
                    ("기준일", report.date.to_string()),
                    ("총자산", report.total_asset.round_dp(0).to_string()),
                    ("예수금", report.cash.round_dp(0).to_string()),
                    ("당일손익", report.daily_pnl.round_dp(0).to_string()),
                    ("수익률", format!("{}%", report.total_return_pct.round_dp(2))),
                    ("보유/미체결", format!("{} / {}", report.position_count, report.active_orders)),
                ],
            ),
            NotificationEvent::SystemError {
                error_code,
                message,
            } => (
                "🚨 시스템 오류".to_string(),
                vec![("오류 코드", format!("`{}`", error_code)), ("메시지", message.clone())],
            ),
            NotificationEvent::Custom { title, message } => (
                format!("{} {}", priority_emoji, title),
                vec![("내용", message.clone())],
            ),
        };

        let fields: Vec<serde_json::Value> = fields
            .into_iter()
            .map(|(name, value)| json!({ "type": "mrkdwn", "text": format!("*{}*\n{}", name, value) }))
            .collect();

        json!({
            "blocks": [
                {
                    "type": "header",
                    "text": { "type": "plain_text", "text": header, "emoji": true }
                },
                {
                    "type": "section",
                    "fields": fields
                },
                {
                    "type": "context",
                    "elements": [
                        { "type": "mrkdwn", "text": timestamp.to_string() }
                    ]
                }
            ]
        })
    }

    /// Slack Webhook을 통해 메시지를 전송합니다.
    async fn send_webhook(&self, payload: serde_json::Value) -> NotificationResult<()> {
        debug!("Sending Slack webhook message");

        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(NotificationError::NetworkError)?;

        if response.status().is_success() {
            info!("Slack 알림 전송 완료");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            // 요청 한도 제한 확인
            if status.as_u16() == 429 {
                warn!("Slack rate limited");
                return Err(NotificationError::RateLimited(60));
            }

            error!("Slack webhook 전송 실패: {} - {}", status, body);
            Err(NotificationError::SendFailed(format!(
                "HTTP {}: {}",
                status, body
            )))
        }
    }
}

#[async_trait]
impl NotificationSender for SlackSender {
    async fn send(&self, notification: &Notification) -> NotificationResult<()> {
        if !self.is_enabled() {
            debug!("Slack 알림이 비활성화되어 있습니다");
            return Ok(());
        }

        let payload = self.format_blocks(notification);
        self.send_webhook(payload).await
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.webhook_url.is_empty()
    }

    fn name(&self) -> &str {
        "slack"
    }
}
