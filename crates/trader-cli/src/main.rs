//! 주문 실행 엔진 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # 모의 모드로 엔진 실행 (Ctrl-C로 종료)
//! TRADER_MODE=paper trader run
//!
//! # 호가/신호 JSON Lines 파일을 모의 거래소로 재생
//! trader replay data/session.jsonl
//!
//! # 저장된 활성 주문과 모의 원장 출력
//! trader status --database sqlite://trader.db
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;
mod runtime;

use config::AppConfig;

#[derive(Parser)]
#[command(name = "trader")]
#[command(about = "KRX 주식 주문 실행 엔진", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 로그 레벨 (RUST_LOG가 있으면 무시)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// 엔진과 스케줄러를 종료 신호까지 실행
    Run {
        /// 종료 시 미체결 취소 후 전량 시장가 청산
        #[arg(long)]
        liquidate_on_exit: bool,
    },

    /// JSON Lines 파일의 호가와 신호를 모의 거래소로 재생
    Replay {
        /// 입력 파일 경로
        file: PathBuf,

        /// 데이터베이스 URL (기본: 메모리)
        #[arg(long)]
        database: Option<String>,
    },

    /// 저장된 활성 주문과 모의 원장 출력
    Status {
        /// 데이터베이스 URL (기본: TRADER_DATABASE_URL)
        #[arg(long)]
        database: Option<String>,
    },
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!(
                "trader={lvl},trader_execution={lvl},trader_exchange={lvl},trader_data={lvl},\
                 trader_risk={lvl},trader_notification={lvl}",
                lvl = level
            )
            .into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let mut config = AppConfig::from_env()?;

    match cli.command {
        Commands::Run { liquidate_on_exit } => {
            commands::run::run(&mut config, liquidate_on_exit).await
        }
        Commands::Replay { file, database } => {
            config.database_url = database.unwrap_or_else(|| "sqlite::memory:".to_string());
            let summary = commands::replay::replay_file(&mut config, &file).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::Status { database } => {
            if let Some(url) = database {
                config.database_url = url;
            }
            let status = commands::status::load_status(&config.database_url).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}
