//! Discord 알림 서비스.
//!
//! Discord Webhook을 통해 트레이딩 알림을 Embed 형식으로 전송합니다.

use crate::types::{
    Notification, NotificationError, NotificationEvent, NotificationPriority, NotificationResult,
    NotificationSender,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, error, info, warn};

/// Discord 알림 전송 설정.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    /// Discord Webhook URL
    pub webhook_url: String,
    /// 표시 이름 (봇 이름으로 표시)
    pub display_name: Option<String>,
    /// 전송 활성화 여부
    pub enabled: bool,
}

impl DiscordConfig {
    /// 새 Discord 설정을 생성합니다.
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            display_name: None,
            enabled: true,
        }
    }

    /// 표시 이름을 설정합니다.
    pub fn with_display_name(mut self, name: String) -> Self {
        self.display_name = Some(name);
        self
    }

    /// 환경 변수에서 설정을 생성합니다.
    pub fn from_env() -> Option<Self> {
        let webhook_url = std::env::var("DISCORD_WEBHOOK_URL").ok()?;
        let display_name = std::env::var("DISCORD_DISPLAY_NAME").ok();
        let enabled = std::env::var("DISCORD_ENABLED")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(true);

        Some(Self {
            webhook_url,
            display_name,
            enabled,
        })
    }
}

/// Discord 알림 전송기.
pub struct DiscordSender {
    config: DiscordConfig,
    client: reqwest::Client,
}

impl DiscordSender {
    /// 새 Discord 전송기를 생성합니다.
    pub fn new(config: DiscordConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// 환경 변수에서 전송기를 생성합니다.
    pub fn from_env() -> Option<Self> {
        DiscordConfig::from_env().map(Self::new)
    }

    /// 우선순위에 따른 색상을 반환합니다 (Discord embed color는 decimal 값 사용).
    fn get_priority_color(&self, priority: &NotificationPriority) -> u32 {
        match priority {
            NotificationPriority::Low => 0x6c757d,      // 회색
            NotificationPriority::Normal => 0x007bff,   // 파랑
            NotificationPriority::High => 0xfd7e14,     // 주황
            NotificationPriority::Critical => 0xdc3545, // 빨강
        }
    }

    /// 알림을 Discord Embed로 포맷합니다.
    fn format_embed(&self, notification: &Notification) -> serde_json::Value {
        let color = self.get_priority_color(&notification.priority);
        let timestamp = notification.timestamp.to_rfc3339();

        match &notification.event {
            NotificationEvent::OrderFilled {
                order_id,
                symbol,
                side,
                quantity,
                price,
                completed,
            } => {
                let is_buy = side.eq_ignore_ascii_case("buy");
                json!({
                    "title": format!("{} {}", if is_buy { "🟢" } else { "🔴" },
                        if *completed { "주문 체결" } else { "부분 체결" }),
                    "color": if is_buy { 0x28a745 } else { 0xdc3545 },
                    "fields": [
                        { "name": "심볼", "value": format!("`{}`", symbol), "inline": true },
                        { "name": "방향", "value": side, "inline": true },
                        { "name": "수량", "value": quantity.to_string(), "inline": true },
                        { "name": "가격", "value": price.to_string(), "inline": true },
                    ],
                    "footer": { "text": format!("주문ID: {}", order_id) },
                    "timestamp": timestamp
                })
            }

            NotificationEvent::DailyReport(report) => {
                let pnl_color = if report.daily_pnl >= Decimal::ZERO {
                    0x28a745
                } else {
                    0xdc3545
                };
                json!({
                    "title": format!("📈 일일 리포트 ({})", report.date),
                    "color": pnl_color,
                    "fields": [
                        { "name": "총자산", "value": report.total_asset.round_dp(0).to_string(), "inline": true },
                        { "name": "예수금", "value": report.cash.round_dp(0).to_string(), "inline": true },
                        { "name": "당일손익", "value": report.daily_pnl.round_dp(0).to_string(), "inline": true },
                        { "name": "수익률", "value": format!("{}%", report.total_return_pct.round_dp(2)), "inline": true },
                        { "name": "보유 종목", "value": report.position_count.to_string(), "inline": true },
                        { "name": "미체결", "value": report.active_orders.to_string(), "inline": true },
                    ],
                    "footer": { "text": report.mode.clone() },
                    "timestamp": timestamp
                })
            }

            NotificationEvent::RiskAlert { symbol, reason } => {
                json!({
                    "title": "⚠️ 리스크 경고",
                    "color": 0xfd7e14,
                    "fields": [
                        { "name": "심볼", "value": format!("`{}`", symbol), "inline": true },
                        { "name": "사유", "value": reason, "inline": false },
                    ],
                    "timestamp": timestamp
                })
            }

            _ => {
                json!({
                    "description": notification.summary(),
                    "color": color,
                    "timestamp": timestamp
                })
            }
        }
    }

    /// Discord Webhook을 통해 메시지를 전송합니다.
    async fn send_webhook(&self, embed: serde_json::Value) -> NotificationResult<()> {
        let mut payload = json!({
            "embeds": [embed],
        });

        // 봇 이름 설정
        if let Some(ref name) = self.config.display_name {
            payload["username"] = json!(name);
        }

        debug!("Sending Discord webhook message");

        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(NotificationError::NetworkError)?;

        if response.status().is_success() {
            info!("Discord 알림 전송 완료");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                warn!("Discord rate limited");
                return Err(NotificationError::RateLimited(60));
            }

            error!("Discord webhook 전송 실패: {} - {}", status, body);
            Err(NotificationError::SendFailed(format!(
                "HTTP {}: {}",
                status, body
            )))
        }
    }
}

#[async_trait]
impl NotificationSender for DiscordSender {
    async fn send(&self, notification: &Notification) -> NotificationResult<()> {
        if !self.is_enabled() {
            debug!("Discord 알림이 비활성화되어 있습니다");
            return Ok(());
        }

        let embed = self.format_embed(notification);
        self.send_webhook(embed).await
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.webhook_url.is_empty()
    }

    fn name(&self) -> &str {
        "discord"
    }
}
