//! `trader replay`: JSON Lines 파일을 모의 거래소로 재생합니다.
//!
//! 한 줄에 레코드 하나이며 `type` 필드로 구분합니다.
//!
//! ```text
//! {"type":"signal","signal":{"symbol":"005930","side":"BUY","price":70000},"quantity":10}
//! {"type":"quote","symbol":"005930","bid":69900,"ask":70000,"bid_size":100,"ask_size":100}
//! ```
//!
//! 빈 줄과 `#`로 시작하는 줄은 건너뜁니다.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use trader_core::{AlwaysOpen, Order, Quote, Signal};
use trader_execution::{EngineSnapshot, OrderEvent, TradingError, TradingMode};

use crate::config::AppConfig;
use crate::runtime;

/// 재생 레코드.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplayRecord {
    Quote(Quote),
    Signal { signal: Signal, quantity: Decimal },
}

/// 재생 통계.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    pub quotes: usize,
    pub signals: usize,
    pub submitted: usize,
    /// 엔진이 RUNNING이 아니어서 무시된 신호
    pub ignored: usize,
    /// 리스크/매수 가능 금액 거부
    pub rejected: usize,
    /// 검증/전송 실패
    pub failed: usize,
    pub fills: usize,
    /// 접수 후 정산 단계에서 거부된 주문
    pub settlement_rejected: usize,
    pub malformed: usize,
}

/// 재생 결과.
#[derive(Debug, Serialize)]
pub struct ReplaySummary {
    pub engine: EngineSnapshot,
    pub ledger: Value,
    pub active_orders: Vec<Order>,
    pub stats: ReplayStats,
}

/// 파일 재생.
pub async fn replay_file(config: &mut AppConfig, path: &Path) -> Result<ReplaySummary> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("재생 파일 읽기 실패: {}", path.display()))?;
    replay_lines(config, &content).await
}

/// 문자열로 주어진 레코드 재생.
///
/// 항상 모의 모드로 실행하며 장 운영 시간은 확인하지 않습니다.
pub async fn replay_lines(config: &mut AppConfig, content: &str) -> Result<ReplaySummary> {
    config.mode = TradingMode::Paper;
    let rt = runtime::build(config, Arc::new(AlwaysOpen)).await?;
    let engine = rt.engine;
    let paper = rt.paper.context("모의 거래소가 생성되지 않았습니다")?;
    let mut reports = rt.reports.context("주문 결과 채널이 생성되지 않았습니다")?;

    engine.start().await;

    let mut stats = ReplayStats::default();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let record: ReplayRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = index + 1, error = %e, "잘못된 레코드 건너뜀");
                stats.malformed += 1;
                continue;
            }
        };

        match record {
            ReplayRecord::Quote(quote) => {
                stats.quotes += 1;
                paper.on_quote(&quote).await;
                while let Ok(report) = reports.try_recv() {
                    match engine.handle_report(&report).await {
                        Some(OrderEvent::Filled { .. }) => stats.fills += 1,
                        Some(OrderEvent::Rejected { .. }) => stats.settlement_rejected += 1,
                        _ => {}
                    }
                }
            }
            ReplayRecord::Signal { signal, quantity } => {
                stats.signals += 1;
                match engine.on_signal(&signal, quantity).await {
                    Ok(Some(_)) => stats.submitted += 1,
                    Ok(None) => stats.ignored += 1,
                    Err(TradingError::RiskRejected(_) | TradingError::BuyingPowerRejected(_)) => {
                        stats.rejected += 1
                    }
                    Err(e) => {
                        warn!(line = index + 1, error = %e, "신호 처리 실패");
                        stats.failed += 1;
                    }
                }
            }
        }
    }

    engine.stop(false).await?;
    let summary = ReplaySummary {
        engine: engine.get_state().await,
        ledger: paper.ledger().await.balance_json(),
        active_orders: engine.orders().active_orders().await,
        stats,
    };
    info!(
        quotes = summary.stats.quotes,
        signals = summary.stats.signals,
        fills = summary.stats.fills,
        "재생 완료"
    );

    drop(engine);
    let _ = rt.notifications.await;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trader_execution::EngineState;

    fn test_config() -> AppConfig {
        let mut config = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            paper_seed: Some(3),
            ..Default::default()
        };
        config.paper.max_slippage_rate = Decimal::ZERO;
        config
    }

    const SESSION: &str = r#"
# 삼성전자 지정가 매수 후 체결
{"type":"signal","signal":{"symbol":"005930","side":"BUY","price":70000,"strategy_id":"replay"},"quantity":10}
{"type":"quote","symbol":"005930","bid":69900,"ask":70100,"bid_size":500,"ask_size":500}
{"type":"quote","symbol":"005930","bid":69900,"ask":70000,"bid_size":500,"ask_size":500}

{"type":"signal","signal":{"symbol":"000660","side":"BUY","price":100000},"quantity":3}
{"type":"trade","symbol":"005930"}
not json
"#;

    #[tokio::test]
    async fn test_replay_fills_and_counts() {
        let mut config = test_config();
        let summary = replay_lines(&mut config, SESSION).await.unwrap();

        assert_eq!(
            summary.stats,
            ReplayStats {
                quotes: 2,
                signals: 2,
                submitted: 2,
                fills: 1,
                malformed: 2,
                ..Default::default()
            }
        );

        assert_eq!(summary.engine.state, EngineState::Stopped);
        assert_eq!(summary.engine.mode, TradingMode::Paper);
        assert_eq!(summary.engine.position_count, 1);

        // 000660 주문은 호가가 없어 대기 중
        assert_eq!(summary.active_orders.len(), 1);
        assert_eq!(summary.active_orders[0].symbol, "000660");

        let positions = summary.ledger["positions"].as_array().unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0]["symbol"], "005930");
        assert_eq!(positions[0]["quantity"], "10");
    }

    #[tokio::test]
    async fn test_replay_counts_settlement_rejections() {
        let mut config = test_config();
        let session = r#"
{"type":"signal","signal":{"symbol":"035720","side":"EXIT","price":0},"quantity":5}
{"type":"quote","symbol":"035720","bid":48000,"ask":48050,"bid_size":100,"ask_size":100}
"#;
        let summary = replay_lines(&mut config, session).await.unwrap();

        assert_eq!(summary.stats.submitted, 1);
        assert_eq!(summary.stats.settlement_rejected, 1);
        assert_eq!(summary.stats.fills, 0);
        assert!(summary.active_orders.is_empty());
    }

    #[tokio::test]
    async fn test_replay_forces_paper_mode() {
        let mut config = AppConfig {
            mode: TradingMode::Live,
            ..test_config()
        };
        let summary = replay_lines(&mut config, "").await.unwrap();
        assert_eq!(summary.engine.mode, TradingMode::Paper);
        assert_eq!(summary.stats, ReplayStats::default());
        assert!(summary.active_orders.is_empty());
    }
}
