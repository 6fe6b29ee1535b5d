//! 프로토콜 설정

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;

/// 재전송 정책
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 최소 재전송 간격 (밀리초)
    pub resend_min_ms: u64,

    /// 최대 재전송 간격 (밀리초)
    /// 경쟁하는 재전송자끼리 동기화되지 않도록 [min, max] 구간에서 무작위 선택
    pub resend_max_ms: u64,

    /// 최대 재전송 횟수
    /// None이면 ACK이 올 때까지 무한 재전송
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            resend_min_ms: 100,
            resend_max_ms: 300,
            max_attempts: Some(100),
        }
    }
}

impl RetryPolicy {
    /// 다음 재전송까지의 간격 (jitter 포함)
    pub fn next_interval(&self) -> Duration {
        let min = self.resend_min_ms.min(self.resend_max_ms);
        let max = self.resend_min_ms.max(self.resend_max_ms);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    /// 재전송 횟수 제한 없음
    pub fn unbounded(mut self) -> Self {
        self.max_attempts = None;
        self
    }
}

/// SWFT 프로토콜 설정 (클라이언트/서버 공통)
#[derive(Debug, Clone)]
pub struct Config {
    /// 재전송 정책
    pub retry: RetryPolicy,

    /// 첫 get(part=0) 대기 타임아웃 (밀리초)
    pub connect_timeout_ms: u64,

    /// abort 응답(aborted) 대기 타임아웃 (밀리초)
    pub abort_timeout_ms: u64,

    /// 채팅 ACK 대기 타임아웃 (밀리초)
    pub chat_timeout_ms: u64,

    /// 수신 버퍼 크기
    pub recv_buffer_size: usize,

    /// 세션 inbox 채널 용량
    pub session_queue_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            connect_timeout_ms: 10_000,       // 10초
            abort_timeout_ms: 10_000,         // 10초
            chat_timeout_ms: 10_000,          // 10초
            recv_buffer_size: 65_536,
            session_queue_size: 256,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn abort_timeout(&self) -> Duration {
        Duration::from_millis(self.abort_timeout_ms)
    }

    pub fn chat_timeout(&self) -> Duration {
        Duration::from_millis(self.chat_timeout_ms)
    }

    /// 로컬 네트워크용 설정 (짧은 재전송 간격)
    pub fn local_network() -> Self {
        Self {
            retry: RetryPolicy {
                resend_min_ms: 20,
                resend_max_ms: 60,
                max_attempts: Some(200),
            },
            connect_timeout_ms: 3_000,
            abort_timeout_ms: 3_000,
            chat_timeout_ms: 3_000,
            ..Self::default()
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn lossy_network() -> Self {
        Self {
            retry: RetryPolicy {
                resend_min_ms: 200,
                resend_max_ms: 500,
                max_attempts: Some(300),
            },
            connect_timeout_ms: 30_000,
            abort_timeout_ms: 15_000,
            chat_timeout_ms: 15_000,
            ..Self::default()
        }
    }
}

/// 클라이언트 설정
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// 서버 주소
    pub server_addr: SocketAddr,

    /// 동시에 전송할 최대 파일 수
    pub max_concurrent_transfers: usize,

    /// MD5 검증 통과 후 원본 파일 삭제
    pub delete_source: bool,

    /// 프로토콜 설정
    pub protocol: Config,
}

impl ClientConfig {
    pub fn new(server_addr: SocketAddr) -> Self {
        Self {
            server_addr,
            max_concurrent_transfers: 2,
            delete_source: false,
            protocol: Config::default(),
        }
    }
}

/// 서버 설정
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 바인드 주소
    pub bind_addr: SocketAddr,

    /// 수신 파일 저장 디렉토리
    pub save_dir: PathBuf,

    /// 프로토콜 설정
    pub protocol: Config,
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr, save_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr,
            save_dir: save_dir.into(),
            protocol: Config::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_within_band() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let interval = policy.next_interval();
            assert!(interval >= Duration::from_millis(100));
            assert!(interval <= Duration::from_millis(300));
        }
    }

    #[test]
    fn test_inverted_band_is_tolerated() {
        let policy = RetryPolicy {
            resend_min_ms: 50,
            resend_max_ms: 10,
            max_attempts: None,
        };
        let interval = policy.next_interval();
        assert!(interval >= Duration::from_millis(10) && interval <= Duration::from_millis(50));
    }
}
