//! 에러 타입 정의

use std::net::SocketAddr;

use thiserror::Error;

/// 헤더 디코딩 실패
///
/// 손상된 데이터그램은 유실된 것과 구분할 수 없으므로 수신 경계에서 조용히 버려진다.
#[derive(Error, Debug)]
pub enum ProtocolDecodeError {
    #[error("헤더 JSON 파싱 실패: {0}")]
    Json(#[from] serde_json::Error),

    #[error("빈 데이터그램")]
    Empty,
}

/// SWFT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Json(#[from] serde_json::Error),

    #[error("프로토콜 디코딩 에러: {0}")]
    Decode(#[from] ProtocolDecodeError),

    #[error("소켓 바인드 실패: {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("상대방 응답 없음: {attempts}회 재전송 후 포기")]
    PeerUnresponsive { attempts: u32 },

    #[error("연결 타임아웃: {file_id}")]
    ConnectTimeout { file_id: String },

    #[error("MD5 불일치: {file_id}")]
    DigestMismatch { file_id: String },

    #[error("MD5 계산 태스크 실패: {0}")]
    DigestTask(String),

    #[error("파일이 너무 큼: {size} bytes")]
    FileTooLarge { size: u64 },

    #[error("유효하지 않은 파일 이름: {0:?}")]
    InvalidFileName(String),

    #[error("전송 중단됨")]
    Aborted,

    #[error("채널 에러")]
    ChannelError,

    #[error("연결 종료")]
    ConnectionClosed,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
