//! # SWFT (Stop-and-Wait File Transfer)
//!
//! UDP 기반 신뢰성 파일 전송 + 채팅 프로토콜
//!
//! ## 핵심 특징
//! - **Stop-and-wait ARQ**: 청크 하나씩 보내고 get(다음 인덱스)을 ACK으로 사용
//! - **재전송 타이머**: 무작위 간격으로 ACK이 올 때까지 재전송
//! - **MD5 무결성 검증**: 송신측은 전송과 병행해 계산, 수신측은 기록 후 재계산
//! - **동시 전송 제한**: 클라이언트는 세마포어로 동시 파일 수 제한
//! - **세션 다중화**: 서버는 `(peer, 파일 이름)`별 세션 태스크로 분배
//! - **중단 / 채팅**: 호스트 단위 abort, 단일 메시지 채팅

pub mod cancel;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod digest;
pub mod error;
pub mod message;
pub mod observer;
pub mod receiver;
pub mod router;
pub mod scheduler;
pub mod sender;
pub mod stats;
pub mod timer;

pub use cancel::abort_remote;
pub use chat::send_chat;
pub use chunk::{Chunk, ChunkReader};
pub use config::{ClientConfig, Config, RetryPolicy, ServerConfig};
pub use digest::Verdict;
pub use error::{Error, Result};
pub use message::{ControlKind, Datagram, Header};
pub use observer::{InfoKind, Notification, Observer};
pub use receiver::ReceiverSession;
pub use router::Server;
pub use scheduler::{AbortOutcome, TransferOutcome, TransferScheduler};
pub use sender::{SenderSession, SessionConfig};
pub use stats::TransferStats;

/// 청크 페이로드 크기 (바이트)
pub const CHUNK_SIZE: usize = 65000;
