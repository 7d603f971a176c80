//! 로그 알림 전송기.
//!
//! Webhook이 설정되지 않은 환경에서도 모든 알림을 tracing 로그로 남깁니다.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::types::{Notification, NotificationPriority, NotificationResult, NotificationSender};

/// tracing 기반 알림 전송기.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, notification: &Notification) -> NotificationResult<()> {
        let summary = notification.summary();
        match notification.priority {
            NotificationPriority::Low | NotificationPriority::Normal => {
                info!(priority = %notification.priority, "[알림] {}", summary)
            }
            NotificationPriority::High => {
                warn!(priority = %notification.priority, "[알림] {}", summary)
            }
            NotificationPriority::Critical => {
                error!(priority = %notification.priority, "[알림] {}", summary)
            }
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "log"
    }
}
