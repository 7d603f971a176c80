//! 알림 전송.
//!
//! 이 crate는 다음을 제공합니다:
//! - 알림 메시지 타입과 `NotificationSender` trait
//! - Slack, Discord Webhook 전송기와 로그 전송기
//! - 트레이딩 경로와 전송을 분리하는 알림 큐와 워커
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_notification::{NotificationQueue, NotificationWorker, NotificationPriority};
//!
//! let (queue, rx) = NotificationQueue::channel(256);
//! NotificationWorker::new(rx, senders).spawn();
//!
//! queue.send("엔진 시작", NotificationPriority::Normal);
//! ```

pub mod discord;
pub mod log_sender;
pub mod slack;
pub mod types;
pub mod worker;

pub use discord::{DiscordConfig, DiscordSender};
pub use log_sender::LogSender;
pub use slack::{SlackConfig, SlackSender};
pub use types::{
    DailyReport, Notification, NotificationError, NotificationEvent, NotificationPriority,
    NotificationResult, NotificationSender,
};
pub use worker::{NotificationQueue, NotificationWorker};
