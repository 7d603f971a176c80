//! 거래소 조회 재시도.
//!
//! 잔고 조회처럼 멱등한 호출에만 사용합니다. 주문 제출과 취소는 중복 실행 위험이 있어
//! 재시도하지 않습니다.

use std::{future::Future, time::Duration};

use rand::Rng;
use tracing::{debug, warn};

use trader_core::ExchangeError;

/// 재시도 설정.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 최대 재시도 횟수 (초기 시도 제외)
    pub max_retries: u32,
    /// 첫 재시도 대기 시간
    pub base_delay: Duration,
    /// 최대 대기 시간
    pub max_delay: Duration,
    /// 백오프 배수
    pub backoff_multiplier: f64,
    /// ±25% 지터 추가 여부
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    /// 짧은 지연, 적은 재시도.
    pub fn fast() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            ..Default::default()
        }
    }

    /// 단일 시도.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// `attempt`번째 재시도 전 대기 시간.
    fn delay_for(&self, attempt: u32, error: &ExchangeError) -> Duration {
        // 한도 초과는 최소 1초 대기
        let base = match error {
            ExchangeError::RateLimited => self.base_delay.max(Duration::from_secs(1)),
            _ => self.base_delay,
        };

        let scaled = base.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let delay = Duration::from_secs_f64(scaled).min(self.max_delay);

        if !self.add_jitter {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_secs_f64(delay.as_secs_f64() * factor)
    }
}

/// 재시도 가능한 에러(`ExchangeError::is_retryable`)에 한해 작업을 반복 실행합니다.
///
/// 재시도 불가 에러는 즉시, 재시도 소진 시에는 마지막 에러를 반환합니다.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: F) -> Result<T, ExchangeError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ExchangeError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempts = attempt + 1, "재시도 후 성공");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= config.max_retries => {
                warn!(error = %e, attempts = attempt + 1, "최대 재시도 횟수 초과");
                return Err(e);
            }
            Err(e) => {
                let delay = config.delay_for(attempt, &e);
                warn!(
                    error = %e,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "재시도 대기"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
