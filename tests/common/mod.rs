//! 통합 테스트 공용 도구

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use swft::{Config, InfoKind, Notification, Observer, RetryPolicy, Server, ServerConfig};

/// 루프백 테스트용 빠른 설정
pub fn fast_config() -> Config {
    Config {
        retry: RetryPolicy {
            resend_min_ms: 20,
            resend_max_ms: 40,
            max_attempts: Some(250),
        },
        connect_timeout_ms: 5_000,
        abort_timeout_ms: 3_000,
        chat_timeout_ms: 3_000,
        ..Config::default()
    }
}

/// 실행 중인 테스트 서버
pub struct TestServer {
    pub addr: SocketAddr,
    pub dir: tempfile::TempDir,
    pub events: mpsc::UnboundedReceiver<Notification>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::new("127.0.0.1:0".parse().unwrap(), dir.path());
        config.protocol = fast_config();

        let (observer, events) = Observer::channel();
        let server = Server::bind(config, observer).await.unwrap();
        let addr = server.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let _ = server.run().await;
        });

        Self {
            addr,
            dir,
            events,
            task,
        }
    }

    pub fn save_dir(&self) -> &Path {
        self.dir.path()
    }

    /// 지금까지 쌓인 알림
    pub fn drain_events(&mut self) -> Vec<Notification> {
        drain(&mut self.events)
    }

    /// 조건을 만족하는 알림이 올 때까지 대기
    pub async fn wait_for<F>(&mut self, mut pred: F) -> Notification
    where
        F: FnMut(&Notification) -> bool,
    {
        wait_for(&mut self.events, &mut pred).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub async fn wait_for<F>(rx: &mut mpsc::UnboundedReceiver<Notification>, pred: &mut F) -> Notification
where
    F: FnMut(&Notification) -> bool,
{
    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            match rx.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => {}
                None => panic!("notification channel closed"),
            }
        }
    })
    .await
    .expect("expected notification did not arrive")
}

/// 이름이 있는 info 알림 추출
pub fn info_events(events: &[Notification]) -> Vec<(String, InfoKind)> {
    events
        .iter()
        .filter_map(|event| match event {
            Notification::Info {
                name: Some(name),
                message,
                ..
            } => Some((name.clone(), *message)),
            _ => None,
        })
        .collect()
}

pub fn is_info(event: &Notification, kind: InfoKind) -> bool {
    matches!(event, Notification::Info { message, .. } if *message == kind)
}

/// 결정적인 테스트 데이터
pub fn pattern(size: usize, seed: u8) -> Vec<u8> {
    (0..size)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

/// 유실/지연을 흉내내는 UDP 중계기
///
/// 클라이언트 주소마다 서버쪽 소켓을 하나씩 만들어 양방향으로 전달한다.
/// 데이터그램은 방향과 무관하게 `loss` 확률로 버려진다.
/// `cut` 이후에는 모두 버려진다.
pub struct LossyRelay {
    pub addr: SocketAddr,
    severed: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl LossyRelay {
    pub async fn start(server: SocketAddr, loss: f64, seed: u64) -> Self {
        Self::with_delay(server, loss, seed, Duration::ZERO).await
    }

    pub async fn with_delay(server: SocketAddr, loss: f64, seed: u64, delay: Duration) -> Self {
        let front = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = front.local_addr().unwrap();
        let rng = Arc::new(Mutex::new(StdRng::seed_from_u64(seed)));
        let severed = Arc::new(AtomicBool::new(false));
        let link = Link {
            rng,
            loss,
            severed: severed.clone(),
        };

        let task = tokio::spawn(async move {
            let mut upstreams: HashMap<SocketAddr, Arc<UdpSocket>> = HashMap::new();
            let mut backs = Vec::new();
            let mut buf = vec![0u8; 65_536];

            loop {
                let Ok((len, client)) = front.recv_from(&mut buf).await else {
                    continue;
                };

                let upstream = match upstreams.get(&client) {
                    Some(upstream) => upstream.clone(),
                    None => {
                        let upstream = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
                        upstream.connect(server).await.unwrap();
                        upstreams.insert(client, upstream.clone());
                        backs.push(spawn_back(
                            upstream.clone(),
                            front.clone(),
                            client,
                            link.clone(),
                            delay,
                        ));
                        upstream
                    }
                };

                if link.dropped() {
                    continue;
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let _ = upstream.send(&buf[..len]).await;
            }
        });

        Self {
            addr,
            severed,
            task,
        }
    }

    /// 이후 양방향 데이터그램을 모두 버림
    pub fn cut(&self) {
        self.severed.store(true, Ordering::SeqCst);
    }
}

impl Drop for LossyRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn spawn_back(
    upstream: Arc<UdpSocket>,
    front: Arc<UdpSocket>,
    client: SocketAddr,
    link: Link,
    delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65_536];
        loop {
            let Ok(len) = upstream.recv(&mut buf).await else {
                continue;
            };
            if link.dropped() {
                continue;
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = front.send_to(&buf[..len], client).await;
        }
    })
}

/// 두 방향이 공유하는 유실 판정
#[derive(Clone)]
struct Link {
    rng: Arc<Mutex<StdRng>>,
    loss: f64,
    severed: Arc<AtomicBool>,
}

impl Link {
    fn dropped(&self) -> bool {
        if self.severed.load(Ordering::SeqCst) {
            return true;
        }
        self.loss > 0.0 && self.rng.lock().unwrap().gen_bool(self.loss)
    }
}
