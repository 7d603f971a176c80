//! 환경 변수 기반 설정.
//!
//! `.env` 파일을 먼저 읽고 `TRADER_*` 변수로 기본값을 덮어씁니다.
//! KIS 자격 증명은 `KIS_*` 변수에서 읽어 `SecretString`으로 보관합니다.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use secrecy::SecretString;

use trader_exchange::{KisConfig, PaperConfig};
use trader_execution::{
    AccountConfig, JobConfig, OrderManagerConfig, SchedulerConfig, TradingMode,
};
use trader_risk::RiskConfig;

const DEFAULT_DATABASE_URL: &str = "sqlite://trader.db";
const DEFAULT_NOTIFICATION_QUEUE: usize = 256;

/// 애플리케이션 설정.
#[derive(Debug)]
pub struct AppConfig {
    pub mode: TradingMode,
    pub database_url: String,
    pub risk: RiskConfig,
    pub orders: OrderManagerConfig,
    pub account: AccountConfig,
    pub paper: PaperConfig,
    /// 모의 거래소 슬리피지 시드 (없으면 무작위)
    pub paper_seed: Option<u64>,
    pub scheduler: SchedulerConfig,
    pub jobs: JobConfig,
    /// KRX 휴장일 (YYYY-MM-DD)
    pub holidays: Vec<String>,
    pub notification_queue: usize,
    /// 실거래 설정 (live 모드에서만 필요)
    pub kis: Option<KisConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: TradingMode::Paper,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            risk: RiskConfig::default(),
            orders: OrderManagerConfig::default(),
            account: AccountConfig::default(),
            paper: PaperConfig::default(),
            paper_seed: None,
            scheduler: SchedulerConfig::default(),
            jobs: JobConfig::default(),
            holidays: Vec::new(),
            notification_queue: DEFAULT_NOTIFICATION_QUEUE,
            kis: None,
        }
    }
}

impl AppConfig {
    /// 환경 변수에서 설정 로드.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mode = match std::env::var("TRADER_MODE") {
            Ok(raw) => raw
                .parse::<TradingMode>()
                .map_err(anyhow::Error::msg)
                .context("TRADER_MODE 파싱 실패")?,
            Err(_) => TradingMode::Paper,
        };

        let risk_defaults = RiskConfig::default();
        let order_defaults = OrderManagerConfig::default();
        let paper_defaults = PaperConfig::default();
        let job_defaults = JobConfig::default();
        let scheduler_defaults = SchedulerConfig::default();

        let daily_report_at = match std::env::var("TRADER_DAILY_REPORT_TIME") {
            Ok(raw) => parse_report_time(&raw)?,
            Err(_) => job_defaults.daily_report_at,
        };

        Ok(Self {
            mode,
            database_url: std::env::var("TRADER_DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            risk: RiskConfig {
                max_orders_per_minute: env_var_parse(
                    "TRADER_MAX_ORDERS_PER_MINUTE",
                    risk_defaults.max_orders_per_minute,
                ),
                max_daily_loss_pct: env_var_parse(
                    "TRADER_MAX_DAILY_LOSS_PCT",
                    risk_defaults.max_daily_loss_pct,
                ),
                max_exposure_pct: env_var_parse(
                    "TRADER_MAX_EXPOSURE_PCT",
                    risk_defaults.max_exposure_pct,
                ),
            },
            orders: OrderManagerConfig {
                max_unfilled: env_var_secs("TRADER_MAX_UNFILLED_SECS", order_defaults.max_unfilled),
                cancel_cooldown: env_var_secs(
                    "TRADER_CANCEL_COOLDOWN_SECS",
                    order_defaults.cancel_cooldown,
                ),
                request_pacing: Duration::from_millis(env_var_parse(
                    "TRADER_REQUEST_PACING_MS",
                    order_defaults.request_pacing.as_millis() as u64,
                )),
            },
            account: AccountConfig {
                min_cash_buffer_pct: env_var_parse(
                    "TRADER_MIN_CASH_BUFFER_PCT",
                    AccountConfig::default().min_cash_buffer_pct,
                ),
            },
            paper: PaperConfig {
                initial_cash: env_var_parse("TRADER_PAPER_INITIAL_CASH", paper_defaults.initial_cash),
                max_slippage_rate: env_var_parse(
                    "TRADER_PAPER_MAX_SLIPPAGE",
                    paper_defaults.max_slippage_rate,
                ),
                ..paper_defaults
            },
            paper_seed: std::env::var("TRADER_PAPER_SEED")
                .ok()
                .and_then(|v| v.parse().ok()),
            scheduler: SchedulerConfig {
                poll_interval: Duration::from_millis(env_var_parse(
                    "TRADER_POLL_INTERVAL_MS",
                    scheduler_defaults.poll_interval.as_millis() as u64,
                )),
                ..scheduler_defaults
            },
            jobs: JobConfig {
                heartbeat: env_var_secs("TRADER_HEARTBEAT_SECS", job_defaults.heartbeat),
                market_check: env_var_secs("TRADER_MARKET_CHECK_SECS", job_defaults.market_check),
                unfilled_sweep: env_var_secs("TRADER_SWEEP_SECS", job_defaults.unfilled_sweep),
                reconcile: env_var_secs("TRADER_RECONCILE_SECS", job_defaults.reconcile),
                daily_report_at,
            },
            holidays: env_var_list("TRADER_HOLIDAYS"),
            notification_queue: env_var_parse("TRADER_NOTIFICATION_QUEUE", DEFAULT_NOTIFICATION_QUEUE),
            kis: kis_from_env(),
        })
    }

    /// 실거래 설정을 꺼냅니다. 없으면 에러.
    pub fn take_kis(&mut self) -> Result<KisConfig> {
        match self.kis.take() {
            Some(kis) => Ok(kis),
            None => bail!(
                "live 모드에는 KIS_APP_KEY, KIS_APP_SECRET, KIS_ACCESS_TOKEN, KIS_ACCOUNT_NO가 필요합니다"
            ),
        }
    }
}

/// KIS 자격 증명 로드. 필수 값이 하나라도 없으면 None.
fn kis_from_env() -> Option<KisConfig> {
    let app_key = std::env::var("KIS_APP_KEY").ok()?;
    let app_secret = std::env::var("KIS_APP_SECRET").ok()?;
    let access_token = std::env::var("KIS_ACCESS_TOKEN").ok()?;
    let account_no = std::env::var("KIS_ACCOUNT_NO").ok()?;
    let mock = env_var_bool("KIS_MOCK", true);

    Some(KisConfig {
        base_url: std::env::var("KIS_BASE_URL")
            .unwrap_or_else(|_| KisConfig::default_base_url(mock).to_string()),
        app_key: SecretString::from(app_key),
        app_secret: SecretString::from(app_secret),
        access_token: SecretString::from(access_token),
        account_no,
        product_code: std::env::var("KIS_PRODUCT_CODE").unwrap_or_else(|_| "01".to_string()),
        mock,
    })
}

/// `HH:MM` 형식의 리포트 시각 파싱.
pub fn parse_report_time(raw: &str) -> Result<(u32, u32)> {
    let (h, m) = raw
        .trim()
        .split_once(':')
        .with_context(|| format!("리포트 시각 형식 오류 (HH:MM): {}", raw))?;
    let hour: u32 = h.parse().with_context(|| format!("잘못된 시: {}", h))?;
    let minute: u32 = m.parse().with_context(|| format!("잘못된 분: {}", m))?;
    if hour > 23 || minute > 59 {
        bail!("리포트 시각 범위 초과: {}", raw);
    }
    Ok((hour, minute))
}

/// 환경변수에서 값을 파싱 (실패 시 기본값 사용)
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// 환경변수에서 bool 값 파싱
fn env_var_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

/// 초 단위 환경변수
fn env_var_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_var_parse(key, default.as_secs()))
}

/// 쉼표로 구분된 리스트
fn env_var_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
