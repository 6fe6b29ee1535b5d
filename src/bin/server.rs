//! SWFT 서버 (수신자)
//!
//! 여러 클라이언트의 파일을 동시에 받아 저장 디렉토리에 기록한다.
//!
//! 사용법:
//!   cargo run --release --bin swft-server -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin swft-server -- --bind 0.0.0.0:12345 --save-dir ./received

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use swft::{Config, Observer, Server, ServerConfig};

/// 네트워크 환경별 프로토콜 설정
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Preset {
    Default,
    Local,
    Lossy,
}

impl Preset {
    fn config(self) -> Config {
        match self {
            Preset::Default => Config::default(),
            Preset::Local => Config::local_network(),
            Preset::Lossy => Config::lossy_network(),
        }
    }
}

/// SWFT 서버 - UDP stop-and-wait 파일 수신
#[derive(Parser, Debug)]
#[command(name = "swft-server", version, about)]
struct Args {
    /// 바인드 주소
    #[arg(short, long, default_value = "0.0.0.0:12345")]
    bind: SocketAddr,

    /// 수신 파일 저장 디렉토리
    #[arg(short, long, default_value = ".")]
    save_dir: PathBuf,

    /// 프로토콜 설정 프리셋
    #[arg(long, value_enum, default_value = "default")]
    preset: Preset,

    /// 재전송 횟수 제한 (0이면 무제한)
    #[arg(long)]
    max_retries: Option<u32>,

    /// 진행 알림을 JSON 줄로 stdout에 출력
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정 (RUST_LOG 우선)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = ServerConfig::new(args.bind, args.save_dir);
    config.protocol = args.preset.config();
    if let Some(max) = args.max_retries {
        config.protocol.retry.max_attempts = (max > 0).then_some(max);
    }

    info!("SWFT Server starting...");
    info!("Bind address: {}", config.bind_addr);
    info!("Save directory: {:?}", config.save_dir);
    info!(
        "Resend interval: {}~{}ms, max retries: {:?}",
        config.protocol.retry.resend_min_ms,
        config.protocol.retry.resend_max_ms,
        config.protocol.retry.max_attempts
    );

    let (observer, mut notifications) = Observer::channel();
    let json = args.json;
    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            if json {
                println!("{}", notification.to_json());
            }
        }
    });

    let server = Server::bind(config, observer).await?;
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
