//! 작업 스케줄러.
//!
//! 단일 폴링 루프가 등록된 작업의 실행 시점을 판단합니다.
//!
//! - 주기 작업: 마지막 실행 후 경과 시간이 주기 이상이면 실행 (첫 폴링에서 즉시 실행)
//! - 시각 작업: 지정 시:분에 하루 한 번 실행, 날짜가 바뀌면 다시 실행 가능.
//!   직전 폴링이 지정 시각 전이었다면 폴링이 늦어져 그 분을 지나쳤어도 실행합니다.
//!   첫 폴링에서는 지정 시:분과 일치할 때만 실행합니다.
//!
//! 각 작업은 별도 태스크에서 동시에 실행되므로 에러나 panic, 오래 걸리는 작업이
//! 같은 폴링의 다른 작업을 멈추지 않습니다.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use futures::future::{join_all, BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Result, TradingError};

/// 작업 콜백.
pub type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

fn boxed_task<F, Fut>(f: F) -> TaskFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// 스케줄러 설정.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// 폴링 간격
    pub poll_interval: Duration,
    /// 시각 작업 기준 시간대
    pub timezone: Tz,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timezone: chrono_tz::Asia::Seoul,
        }
    }
}

#[derive(Debug, Clone)]
enum Schedule {
    Interval {
        period: chrono::Duration,
        last_run: Option<DateTime<Utc>>,
    },
    Cron {
        hour: u32,
        minute: u32,
        last_date: Option<NaiveDate>,
    },
}

struct ScheduledTask {
    name: String,
    schedule: Schedule,
    callback: TaskFn,
}

/// 협조적 작업 스케줄러.
pub struct Scheduler {
    config: SchedulerConfig,
    tasks: Vec<ScheduledTask>,
    /// 직전 폴링 시각
    last_tick: Option<DateTime<Utc>>,
}

impl Scheduler {
    /// 새 스케줄러 생성.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            tasks: Vec::new(),
            last_tick: None,
        }
    }

    /// 등록된 작업 이름.
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    /// 주기 작업 등록.
    pub fn register_interval<F, Fut>(&mut self, period: Duration, name: impl Into<String>, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let period = chrono::Duration::from_std(period).unwrap_or_else(|_| chrono::Duration::days(1));
        self.tasks.push(ScheduledTask {
            name: name.into(),
            schedule: Schedule::Interval {
                period,
                last_run: None,
            },
            callback: boxed_task(callback),
        });
    }

    /// 시각 작업 등록 (설정 시간대 기준).
    pub fn register_cron<F, Fut>(
        &mut self,
        hour: u32,
        minute: u32,
        name: impl Into<String>,
        callback: F,
    ) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        if hour > 23 || minute > 59 {
            return Err(TradingError::Validation(format!(
                "잘못된 실행 시각 ({}): {:02}:{:02}",
                name, hour, minute
            )));
        }
        self.tasks.push(ScheduledTask {
            name,
            schedule: Schedule::Cron {
                hour,
                minute,
                last_date: None,
            },
            callback: boxed_task(callback),
        });
        Ok(())
    }

    /// 주어진 시각 기준으로 실행할 작업을 모두 실행합니다. 실행한 작업 이름을 반환합니다.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let tz = self.config.timezone;
        let local = now.with_timezone(&tz).naive_local();
        let previous = self
            .last_tick
            .replace(now)
            .map(|prev| prev.with_timezone(&tz).naive_local());
        let mut due = Vec::new();

        for task in &mut self.tasks {
            let fire = match &mut task.schedule {
                Schedule::Interval { period, last_run } => {
                    let fire = last_run.map_or(true, |last| now - last >= *period);
                    if fire {
                        *last_run = Some(now);
                    }
                    fire
                }
                Schedule::Cron {
                    hour,
                    minute,
                    last_date,
                } => {
                    let today = local.date();
                    let fire = *last_date != Some(today)
                        && cron_due(today, *hour, *minute, local, previous);
                    if fire {
                        *last_date = Some(today);
                    }
                    fire
                }
            };

            if fire {
                due.push((task.name.clone(), task.callback.clone()));
            }
        }

        join_all(
            due.iter()
                .map(|(name, callback)| run_isolated(name, callback.clone())),
        )
        .await;
        due.into_iter().map(|(name, _)| name).collect()
    }

    /// 취소될 때까지 폴링 루프 실행.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(tasks = ?self.task_names(), poll_ms = self.config.poll_interval.as_millis() as u64, "스케줄러 시작");

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Utc::now()).await;
                }
                _ = shutdown.cancelled() => {
                    info!("스케줄러 종료");
                    break;
                }
            }
        }
    }
}

/// 오늘의 지정 시각에 도달했는지 판단합니다.
fn cron_due(
    today: NaiveDate,
    hour: u32,
    minute: u32,
    local: NaiveDateTime,
    previous: Option<NaiveDateTime>,
) -> bool {
    let Some(target) = today.and_hms_opt(hour, minute, 0) else {
        return false;
    };
    if local < target {
        return false;
    }
    match previous {
        Some(prev) => prev < target,
        None => local < target + chrono::Duration::minutes(1),
    }
}

/// 작업 하나를 별도 태스크에서 실행하고 결과를 로그로 남깁니다.
async fn run_isolated(name: &str, callback: TaskFn) {
    debug!(task = name, "작업 실행");
    match tokio::spawn(callback()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(task = name, error = %e, "작업 실패"),
        Err(e) => error!(task = name, error = %e, "작업 비정상 종료"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Asia::Seoul;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_task(
        counter: &Arc<AtomicUsize>,
    ) -> impl Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static {
        let counter = counter.clone();
        move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        }
    }

    fn explode() -> anyhow::Result<()> {
        panic!("task panic")
    }

    fn kst(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Seoul
            .with_ymd_and_hms(2024, 3, 4, h, m, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_cron_fires_once_per_day() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_cron(15, 40, "daily_report", counter_task(&count))
            .unwrap();

        assert!(scheduler.tick(kst(15, 39, 59)).await.is_empty());
        assert_eq!(scheduler.tick(kst(15, 40, 0)).await, vec!["daily_report"]);
        assert!(scheduler.tick(kst(15, 40, 1)).await.is_empty());
        assert!(scheduler.tick(kst(15, 40, 59)).await.is_empty());
        assert!(scheduler.tick(kst(18, 0, 0)).await.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let next_day = kst(15, 40, 0) + chrono::Duration::days(1);
        scheduler.tick(next_day).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cron_catches_up_after_late_poll() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_cron(15, 40, "daily_report", counter_task(&count))
            .unwrap();

        assert!(scheduler.tick(kst(15, 39, 58)).await.is_empty());
        // 다른 작업 때문에 폴링이 늦어져 15:40을 건너뜀
        assert_eq!(scheduler.tick(kst(15, 42, 10)).await, vec!["daily_report"]);
        assert!(scheduler.tick(kst(15, 42, 11)).await.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let next_day = kst(15, 39, 0) + chrono::Duration::days(1);
        assert!(scheduler.tick(next_day).await.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cron_not_fired_when_started_late() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_cron(15, 40, "daily_report", counter_task(&count))
            .unwrap();

        assert!(scheduler.tick(kst(20, 0, 0)).await.is_empty());
        assert!(scheduler.tick(kst(20, 0, 1)).await.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let next_day = kst(15, 40, 0) + chrono::Duration::days(1);
        assert_eq!(scheduler.tick(next_day).await, vec!["daily_report"]);
    }

    #[tokio::test]
    async fn test_slow_task_does_not_delay_others() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());

        scheduler.register_interval(Duration::from_secs(60), "slow", {
            let started = started.clone();
            let release = release.clone();
            move || {
                let started = started.clone();
                let release = release.clone();
                async move {
                    started.notify_one();
                    release.notified().await;
                    Ok::<(), anyhow::Error>(())
                }
            }
        });
        scheduler.register_interval(Duration::from_secs(60), "fast", counter_task(&count));

        let tick = tokio::spawn(async move { scheduler.tick(kst(10, 0, 0)).await });
        started.notified().await;
        // 느린 작업이 끝나기 전에 다음 작업이 이미 실행됨
        while count.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        release.notify_one();

        let fired = tick.await.unwrap();
        assert_eq!(fired, vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn test_interval_fires_on_period() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.register_interval(Duration::from_secs(30), "market_check", counter_task(&count));

        let t0 = kst(9, 0, 0);
        scheduler.tick(t0).await;
        scheduler.tick(t0 + chrono::Duration::seconds(29)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        scheduler.tick(t0 + chrono::Duration::seconds(30)).await;
        scheduler.tick(t0 + chrono::Duration::seconds(31)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failing_task_does_not_stop_others() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        let count = Arc::new(AtomicUsize::new(0));

        scheduler.register_interval(Duration::from_secs(1), "failing", || async {
            anyhow::bail!("boom")
        });
        scheduler.register_interval(Duration::from_secs(1), "panicking", || async { explode() });
        scheduler.register_interval(Duration::from_secs(1), "healthy", counter_task(&count));

        let fired = scheduler.tick(kst(10, 0, 0)).await;
        assert_eq!(fired.len(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalid_cron_rejected() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        assert!(scheduler
            .register_cron(24, 0, "bad", counter_task(&count))
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_cancelled() {
        let mut scheduler = Scheduler::new(SchedulerConfig {
            poll_interval: Duration::from_millis(100),
            ..Default::default()
        });
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.register_interval(Duration::from_millis(0), "every_poll", counter_task(&count));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(350)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert!(count.load(Ordering::SeqCst) >= 3);
    }
}
