//! 재전송 타이머
//!
//! 신뢰성이 필요한 메시지를 보낼 때마다 `arm`으로 같은 메시지의 재전송을 예약하고,
//! 기대하는 ACK을 받으면 `cancel`로 멈춘다. ACK 수신이 재전송을 멈추는 유일한 정상 경로다.
//!
//! 세션 태스크의 `tokio::select!` 안에서 `expired()`를 기다리는 방식으로 사용하며,
//! 모든 상태 변경은 세션 태스크 안에서 직렬화된다.

use std::future;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::config::RetryPolicy;
use crate::message::Datagram;
use crate::{Error, Result};

/// 타이머 만료 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expiry<T> {
    /// 같은 단위를 다시 보내야 함 (타이머는 이미 재무장됨)
    Resend(T),

    /// 재전송 한도 초과, 타이머 해제됨
    Exhausted { attempts: u32 },
}

#[derive(Debug)]
struct Pending<T> {
    unit: T,
    deadline: Instant,
    attempts: u32,
}

/// 취소/재무장 가능한 재전송 타이머
#[derive(Debug)]
pub struct ReliabilityTimer<T> {
    policy: RetryPolicy,
    pending: Option<Pending<T>>,
    total_resends: u64,
}

impl<T: Clone> ReliabilityTimer<T> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            pending: None,
            total_resends: 0,
        }
    }

    /// 대기 중인 타이머를 취소하고 `unit` 재전송을 새로 예약
    pub fn arm(&mut self, unit: T) {
        self.pending = Some(Pending {
            unit,
            deadline: Instant::now() + self.policy.next_interval(),
            attempts: 0,
        });
    }

    /// 타이머 해제, 대기 중이던 단위 반환
    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|p| p.unit)
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// 현재 재전송 대기 중인 단위
    pub fn pending(&self) -> Option<&T> {
        self.pending.as_ref().map(|p| &p.unit)
    }

    /// 현재 단위의 재전송 횟수
    pub fn attempts(&self) -> u32 {
        self.pending.as_ref().map_or(0, |p| p.attempts)
    }

    /// 이 타이머가 지금까지 요청한 총 재전송 수
    pub fn total_resends(&self) -> u64 {
        self.total_resends
    }

    /// 만료 대기
    ///
    /// 해제 상태면 영원히 대기한다. cancel-safe: 완료 전에 drop되면 상태가 바뀌지 않는다.
    pub async fn expired(&mut self) -> Expiry<T> {
        let deadline = match &self.pending {
            Some(pending) => pending.deadline,
            None => return future::pending().await,
        };

        sleep_until(deadline).await;

        let interval = self.policy.next_interval();
        let max_attempts = self.policy.max_attempts;

        let Some(pending) = self.pending.as_mut() else {
            return future::pending().await;
        };

        if let Some(max) = max_attempts {
            if pending.attempts >= max {
                let attempts = pending.attempts;
                self.pending = None;
                return Expiry::Exhausted { attempts };
            }
        }

        pending.attempts += 1;
        pending.deadline = Instant::now() + interval;
        self.total_resends += 1;

        Expiry::Resend(pending.unit.clone())
    }
}

/// 단일 요청-응답 교환
///
/// 연결된 `socket`으로 `request`를 재전송 타이머와 함께 보내고 `accept`가 참인 응답을 기다린다.
/// `timeout` 안에 응답이 없으면 `PeerUnresponsive`.
pub async fn exchange<F>(
    socket: &UdpSocket,
    request: Bytes,
    policy: RetryPolicy,
    timeout: Duration,
    mut accept: F,
) -> Result<Datagram>
where
    F: FnMut(&Datagram) -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut timer = ReliabilityTimer::new(policy);
    let mut buf = vec![0u8; 65_536];

    if let Err(e) = socket.send(&request).await {
        debug!("송신 에러 (재전송 대기): {}", e);
    }
    timer.arm(request);

    loop {
        tokio::select! {
            result = socket.recv(&mut buf) => match result {
                Ok(len) => match Datagram::from_bytes(&buf[..len]) {
                    Ok(datagram) if accept(&datagram) => return Ok(datagram),
                    Ok(_) => {}
                    Err(e) => debug!("손상된 데이터그램 무시: {}", e),
                },
                Err(e) => debug!("수신 에러 (무시): {}", e),
            },

            expiry = timer.expired() => match expiry {
                Expiry::Resend(bytes) => {
                    if let Err(e) = socket.send(&bytes).await {
                        debug!("재전송 에러: {}", e);
                    }
                }
                Expiry::Exhausted { attempts } => {
                    return Err(Error::PeerUnresponsive { attempts });
                }
            },

            _ = sleep_until(deadline) => {
                return Err(Error::PeerUnresponsive {
                    attempts: timer.attempts(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Header;

    fn policy(max_attempts: Option<u32>) -> RetryPolicy {
        RetryPolicy {
            resend_min_ms: 100,
            resend_max_ms: 100,
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resend_after_interval() {
        let mut timer = ReliabilityTimer::new(policy(None));
        timer.arm("unit");

        let start = Instant::now();
        assert_eq!(timer.expired().await, Expiry::Resend("unit"));
        assert_eq!(start.elapsed(), Duration::from_millis(100));

        // 재무장되어 있으므로 다시 만료됨
        assert_eq!(timer.expired().await, Expiry::Resend("unit"));
        assert_eq!(timer.attempts(), 2);
        assert_eq!(timer.total_resends(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_resending() {
        let mut timer = ReliabilityTimer::new(policy(None));
        timer.arm(1u32);
        assert_eq!(timer.cancel(), Some(1));
        assert!(!timer.is_armed());

        let fired = tokio::time::timeout(Duration::from_secs(5), timer.expired()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_unit() {
        let mut timer = ReliabilityTimer::new(policy(None));
        timer.arm("old");
        timer.arm("new");

        assert_eq!(timer.pending(), Some(&"new"));
        assert_eq!(timer.expired().await, Expiry::Resend("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_cap() {
        let mut timer = ReliabilityTimer::new(policy(Some(2)));
        timer.arm(());

        assert_eq!(timer.expired().await, Expiry::Resend(()));
        assert_eq!(timer.expired().await, Expiry::Resend(()));
        assert_eq!(timer.expired().await, Expiry::Exhausted { attempts: 2 });
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_drop_keeps_state() {
        let mut timer = ReliabilityTimer::new(policy(None));
        timer.arm(7u8);

        tokio::select! {
            _ = timer.expired() => panic!("timer fired early"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }

        assert!(timer.is_armed());
        assert_eq!(timer.attempts(), 0);
        assert_eq!(timer.expired().await, Expiry::Resend(7));
    }

    #[tokio::test]
    async fn test_exchange_retries_until_reply() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server.local_addr().unwrap()).await.unwrap();

        // 첫 요청은 무시하고 두 번째에 응답
        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let (_, _) = server.recv_from(&mut buf).await.unwrap();
            let (_, from) = server.recv_from(&mut buf).await.unwrap();
            let reply = Datagram::new(Header::aborted()).to_bytes();
            server.send_to(&reply, from).await.unwrap();
        });

        let policy = RetryPolicy {
            resend_min_ms: 10,
            resend_max_ms: 20,
            max_attempts: None,
        };
        let reply = exchange(
            &client,
            Datagram::new(Header::abort()).to_bytes(),
            policy,
            Duration::from_secs(5),
            |d| d.header == Header::aborted(),
        )
        .await
        .unwrap();

        assert_eq!(reply.header, Header::aborted());
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_gives_up() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(silent.local_addr().unwrap()).await.unwrap();

        let policy = RetryPolicy {
            resend_min_ms: 10,
            resend_max_ms: 10,
            max_attempts: None,
        };
        let result = exchange(
            &client,
            Datagram::new(Header::abort()).to_bytes(),
            policy,
            Duration::from_millis(100),
            |_| true,
        )
        .await;

        assert!(matches!(result, Err(Error::PeerUnresponsive { .. })));
    }
}
