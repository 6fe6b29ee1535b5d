//! SWFT 클라이언트 (송신자)
//!
//! 파일 전송, 채팅 메시지 전송, 서버측 전송 중단
//!
//! 사용법:
//!   cargo run --release --bin swft-client -- --server <ADDR> <COMMAND>
//!
//! 예시:
//!   # 파일 두 개씩 동시 전송
//!   cargo run --release --bin swft-client -- -s 127.0.0.1:12345 send a.bin b.bin c.bin
//!
//!   # 채팅
//!   cargo run --release --bin swft-client -- -s 127.0.0.1:12345 chat "hello"
//!
//!   # 이 호스트의 모든 전송 중단
//!   cargo run --release --bin swft-client -- -s 127.0.0.1:12345 abort

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use swft::{abort_remote, send_chat, ClientConfig, Config, Observer, TransferScheduler};

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

/// SWFT 클라이언트 - UDP stop-and-wait 파일 전송
#[derive(Parser, Debug)]
#[command(name = "swft-client", version, about)]
struct Cli {
    /// 서버 주소
    #[arg(short, long, default_value = "127.0.0.1:12345")]
    server: SocketAddr,

    /// 프로토콜 설정 프리셋
    #[arg(long, value_enum, default_value = "default")]
    preset: Preset,

    /// 재전송 횟수 제한 (0이면 무제한)
    #[arg(long)]
    max_retries: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 파일 전송
    Send {
        /// 전송할 파일들
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// 동시 전송 파일 수
        #[arg(short = 'j', long, default_value_t = 2)]
        max_concurrent: usize,

        /// MD5 검증 통과 후 원본 삭제
        #[arg(long)]
        delete_source: bool,
    },

    /// 채팅 메시지 전송
    Chat {
        message: String,
    },

    /// 서버에서 이 호스트의 모든 전송 중단
    Abort,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::new(cli.server);
    config.protocol = cli.preset.config();
    if let Some(max) = cli.max_retries {
        config.protocol.retry.max_attempts = (max > 0).then_some(max);
    }

    let (observer, mut notifications) = Observer::channel();
    let printer = tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            println!("{}", notification.to_json());
        }
    });

    match cli.command {
        Command::Send {
            files,
            max_concurrent,
            delete_source,
        } => {
            config.max_concurrent_transfers = max_concurrent;
            config.delete_source = delete_source;

            info!(
                "전송 시작: 파일 {}개 -> {} (동시 {}개)",
                files.len(),
                config.server_addr,
                config.max_concurrent_transfers
            );

            let mut scheduler = TransferScheduler::new(config, observer);
            scheduler.submit_all(files);

            // Ctrl+C: 로컬 세션 정리 후 서버에 abort
            let outcomes = tokio::select! {
                outcomes = scheduler.join_all() => outcomes,
                _ = tokio::signal::ctrl_c() => {
                    warn!("중단 요청 수신");
                    // 서버 확인 실패는 scheduler가 이미 경고로 남김
                    scheduler.abort().await.local
                }
            };

            let total = outcomes.len();
            let mut passed = 0;
            for outcome in outcomes {
                match outcome.verified() {
                    Ok(_) => passed += 1,
                    Err(e) => warn!("{}", e),
                }
            }
            info!("전송 종료: {}/{} 통과", passed, total);
        }
        Command::Chat { message } => {
            drop(observer);
            send_chat(config.server_addr, &message, &config.protocol).await?;
            info!("채팅 전달 완료");
        }
        Command::Abort => {
            let result = abort_remote(config.server_addr, &config.protocol, &observer).await;
            drop(observer);
            let _ = printer.await;
            result?;
            return Ok(());
        }
    }

    // 모든 관찰자 핸들이 drop되면 출력 태스크도 끝남
    let _ = printer.await;
    Ok(())
}
