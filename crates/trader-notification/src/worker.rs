//! 알림 큐와 전송 워커.
//!
//! 트레이딩 경로는 `NotificationQueue`에 알림을 넣기만 하고 즉시 반환합니다.
//! 실제 전송은 `NotificationWorker`가 별도 태스크에서 수행하며,
//! 전송 실패는 로그로만 남고 호출자에게 전파되지 않습니다.
//!
//! ```text
//! RiskManager / ExecutionEngine ──try_send──▶ [mpsc] ──▶ NotificationWorker ──▶ Slack / Discord / Log
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::types::{
    DailyReport, Notification, NotificationError, NotificationEvent, NotificationPriority,
    NotificationResult, NotificationSender,
};

/// 기본 큐 용량.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// 알림 큐 핸들.
///
/// 복제해서 여러 컴포넌트가 공유합니다. 모든 전송은 논블로킹입니다.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<Notification>,
}

impl NotificationQueue {
    /// 큐와 수신단 생성.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// 알림을 큐에 넣습니다. 큐가 가득 차거나 닫혀 있으면 에러를 반환합니다.
    pub fn try_send(&self, notification: Notification) -> NotificationResult<()> {
        self.tx.try_send(notification).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotificationError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => NotificationError::QueueClosed,
        })
    }

    /// 이벤트 알림 (best-effort).
    pub fn notify(&self, event: NotificationEvent) {
        self.push(Notification::new(event));
    }

    /// 텍스트 알림 (best-effort).
    pub fn send(&self, message: impl Into<String>, priority: NotificationPriority) {
        self.push(Notification::text(message, priority));
    }

    /// 일일 리포트 전송 (best-effort).
    pub fn send_daily_report(&self, report: DailyReport) {
        self.push(Notification::new(NotificationEvent::DailyReport(report)));
    }

    fn push(&self, notification: Notification) {
        if let Err(e) = self.try_send(notification) {
            warn!(error = %e, "알림 큐 적재 실패");
        }
    }
}

/// 알림 전송 워커.
pub struct NotificationWorker {
    rx: mpsc::Receiver<Notification>,
    senders: Vec<Arc<dyn NotificationSender>>,
}

impl NotificationWorker {
    /// 새 워커 생성.
    pub fn new(rx: mpsc::Receiver<Notification>, senders: Vec<Arc<dyn NotificationSender>>) -> Self {
        Self { rx, senders }
    }

    /// 모든 큐 핸들이 닫힐 때까지 전송.
    pub async fn run(mut self) {
        let channels: Vec<&str> = self.senders.iter().map(|s| s.name()).collect();
        info!(channels = ?channels, "알림 워커 시작");

        while let Some(notification) = self.rx.recv().await {
            self.dispatch(&notification).await;
        }

        info!("알림 워커 종료");
    }

    /// 백그라운드 태스크로 실행.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// 활성화된 모든 채널로 전송. 실패는 로그만 남깁니다.
    async fn dispatch(&self, notification: &Notification) {
        for sender in self.senders.iter().filter(|s| s.is_enabled()) {
            match sender.send(notification).await {
                Ok(()) => debug!(channel = sender.name(), id = %notification.id, "알림 전송"),
                Err(e) => warn!(channel = sender.name(), error = %e, "알림 전송 실패"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 수신한 알림을 기록하는 테스트 전송기.
    #[derive(Default)]
    struct RecordingSender {
        received: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSender for RecordingSender {
        async fn send(&self, notification: &Notification) -> NotificationResult<()> {
            self.received.lock().unwrap().push(notification.summary());
            if self.fail {
                return Err(NotificationError::SendFailed("HTTP 500".to_string()));
            }
            Ok(())
        }

        fn is_enabled(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    #[tokio::test]
    async fn test_worker_delivers_to_all_channels() {
        let (queue, rx) = NotificationQueue::channel(8);
        let failing = Arc::new(RecordingSender {
            fail: true,
            ..Default::default()
        });
        let ok = Arc::new(RecordingSender::default());

        let senders: Vec<Arc<dyn NotificationSender>> = vec![failing.clone(), ok.clone()];
        let handle = NotificationWorker::new(rx, senders).spawn();

        queue.send("엔진 시작", NotificationPriority::Normal);
        queue.send("엔진 정지", NotificationPriority::High);
        drop(queue);
        handle.await.unwrap();

        // 한 채널의 실패가 다른 채널 전송을 막지 않음
        assert_eq!(failing.received.lock().unwrap().len(), 2);
        assert_eq!(ok.received.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_full_queue_is_non_blocking() {
        let (queue, _rx) = NotificationQueue::channel(1);
        assert!(queue
            .try_send(Notification::text("1", NotificationPriority::Low))
            .is_ok());
        assert!(matches!(
            queue.try_send(Notification::text("2", NotificationPriority::Low)),
            Err(NotificationError::QueueFull)
        ));
        // best-effort 경로는 에러를 삼킴
        queue.send("3", NotificationPriority::Low);
    }

    #[test]
    fn test_closed_queue() {
        let (queue, rx) = NotificationQueue::channel(4);
        drop(rx);
        assert!(matches!(
            queue.try_send(Notification::text("x", NotificationPriority::Low)),
            Err(NotificationError::QueueClosed)
        ));
    }
}
