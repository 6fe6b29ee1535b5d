//! 송신 세션 (클라이언트측)
//!
//! 파일 하나를 stop-and-wait 방식으로 전송한다.
//!
//! `Connecting → Sending(k) → AwaitingDigest → AwaitingVerdict → Closed`
//!
//! - established를 보내고 get(part=0)을 기다림
//! - get(part=k)을 받으면 청크 k를 전송, 다음 청크를 미리 읽어 둠
//! - 마지막 청크는 MD5를 싣고 가며, 백그라운드 MD5 계산이 끝나지 않았으면 그때만 대기
//! - MD5_passed / MD5_failed 수신 시 terminated를 보내고 종료

use std::future;
use std::net::SocketAddr;
use std::path::PathBuf;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{watch, OwnedSemaphorePermit};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::chunk::{Chunk, ChunkReader};
use crate::digest::{DigestTask, Verdict};
use crate::message::{ControlKind, Datagram, Header};
use crate::observer::{InfoKind, Observer};
use crate::stats::TransferStats;
use crate::timer::{Expiry, ReliabilityTimer};
use crate::{Config, Error, Result};

/// 송신 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// established 전송, get(0) 대기
    Connecting,

    /// 청크 k 전송 후 ACK 대기
    Sending(u32),

    /// 마지막 청크 준비 완료, MD5 계산 대기
    AwaitingDigest,

    /// 마지막 청크 전송 완료, 판정 대기
    AwaitingVerdict,

    Closed,
}

/// 송신 세션 생성 인자
#[derive(Debug)]
pub struct SessionConfig {
    /// 전송할 파일
    pub path: PathBuf,

    /// 서버 주소
    pub server_addr: SocketAddr,

    /// 프로토콜 설정
    pub protocol: Config,

    /// 진행 알림 채널
    pub observer: Observer,

    /// 동시 전송 슬롯 (판정 수신 시 반납)
    pub permit: Option<OwnedSemaphorePermit>,

    /// MD5 통과 후 원본 삭제
    pub delete_source: bool,

    /// 로컬 중단 신호
    pub shutdown: Option<watch::Receiver<bool>>,
}

impl SessionConfig {
    pub fn new(path: impl Into<PathBuf>, server_addr: SocketAddr) -> Self {
        Self {
            path: path.into(),
            server_addr,
            protocol: Config::default(),
            observer: Observer::silent(),
            permit: None,
            delete_source: false,
            shutdown: None,
        }
    }
}

/// 송신 세션
pub struct SenderSession {
    socket: UdpSocket,
    path: PathBuf,
    reader: ChunkReader,

    /// 서버가 다음에 요청할 청크
    next: Option<Chunk>,

    digest: Option<DigestTask>,
    timer: ReliabilityTimer<Bytes>,
    state: SenderState,
    stats: TransferStats,
    config: Config,
    observer: Observer,
    delete_source: bool,
    shutdown: Option<watch::Receiver<bool>>,

    // 세션이 끝날 때 drop되며 슬롯 반납
    _permit: Option<OwnedSemaphorePermit>,
}

impl SenderSession {
    /// 소켓 바인드 + 서버 연결, 첫 청크 준비, MD5 계산 시작
    pub async fn connect(session: SessionConfig) -> Result<Self> {
        let mut reader = ChunkReader::open(&session.path).await?;

        let socket = connect_udp(session.server_addr).await?;

        let next = reader.next_chunk().await?;
        let digest = DigestTask::spawn(session.path.clone());

        Ok(Self {
            socket,
            path: session.path,
            reader,
            next,
            digest: Some(digest),
            timer: ReliabilityTimer::new(session.protocol.retry.clone()),
            state: SenderState::Connecting,
            stats: TransferStats::new(),
            config: session.protocol,
            observer: session.observer,
            delete_source: session.delete_source,
            shutdown: session.shutdown,
            _permit: session.permit,
        })
    }

    pub fn file_id(&self) -> &str {
        self.reader.file_id()
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    /// 판정까지 전송 진행
    ///
    /// 세션이 끝나면 (판정/에러/중단 무관) 동시 전송 슬롯이 반납된다.
    pub async fn run(mut self) -> Result<Verdict> {
        let result = self.drive().await;
        self.state = SenderState::Closed;
        let file_id = self.file_id().to_owned();

        match &result {
            Ok(verdict) => {
                info!("전송 종료: {} ({:?}) | {}", file_id, verdict, self.stats.summary());

                if verdict.is_passed() && self.delete_source {
                    match tokio::fs::remove_file(&self.path).await {
                        Ok(()) => debug!("원본 삭제: {:?}", self.path),
                        Err(e) => {
                            warn!("원본 삭제 실패: {:?}: {}", self.path, e);
                            self.observer.error(Some(&file_id), e);
                        }
                    }
                }
            }
            Err(Error::Aborted) => {
                info!("전송 중단: {}", file_id);
                self.observer.info(Some(&file_id), InfoKind::Aborted);
            }
            Err(e) => {
                warn!("전송 실패: {}: {}", file_id, e);
                self.observer.error(Some(&file_id), e);
            }
        }

        result
    }

    async fn drive(&mut self) -> Result<Verdict> {
        let mut buf = vec![0u8; self.config.recv_buffer_size];
        let connect_deadline = Instant::now() + self.config.connect_timeout();

        info!(
            "전송 시작: {} ({} bytes, {} parts) -> {}",
            self.file_id(),
            self.reader.file_size(),
            self.reader.part_count(),
            self.socket.peer_addr()?,
        );

        let established = Datagram::new(Header::established(self.file_id())).to_bytes();
        self.transmit(established).await;

        loop {
            let connecting = self.state == SenderState::Connecting;

            tokio::select! {
                result = self.socket.recv(&mut buf) => match result {
                    Ok(len) => {
                        if let Some(verdict) = self.handle_datagram(&buf[..len]).await? {
                            return Ok(verdict);
                        }
                    }
                    // 연결된 UDP 소켓은 ICMP 에러를 recv로 돌려줌, 유실과 동일하게 취급
                    Err(e) => debug!("수신 에러 (무시): {}", e),
                },

                expiry = self.timer.expired() => match expiry {
                    Expiry::Resend(bytes) => {
                        self.stats.record_retransmission();
                        self.send_raw(&bytes).await;
                    }
                    Expiry::Exhausted { attempts } => {
                        return Err(Error::PeerUnresponsive { attempts });
                    }
                },

                _ = sleep_until(connect_deadline), if connecting => {
                    return Err(Error::ConnectTimeout {
                        file_id: self.file_id().to_owned(),
                    });
                }

                _ = cancelled(&mut self.shutdown) => {
                    self.timer.cancel();
                    return Err(Error::Aborted);
                }
            }
        }
    }

    async fn handle_datagram(&mut self, bytes: &[u8]) -> Result<Option<Verdict>> {
        let datagram = match Datagram::from_bytes(bytes) {
            Ok(datagram) => datagram,
            Err(e) => {
                debug!("손상된 데이터그램 무시: {}", e);
                return Ok(None);
            }
        };

        let Header::Message { data, name, part } = datagram.header else {
            return Ok(None);
        };

        match data {
            ControlKind::Get if name.as_deref() == Some(self.file_id()) => {
                if let Some(part) = part {
                    self.on_get(part).await?;
                }
            }
            ControlKind::Complete if name.as_deref() == Some(self.file_id()) => {
                // 서버측 기록 완료: 마지막 청크 재전송만 멈추고 판정을 기다림
                debug!("complete 수신: {}", self.file_id());
                self.timer.cancel();
            }
            kind if kind.is_verdict() && name.as_deref().map_or(true, |n| n == self.file_id()) => {
                return Ok(Some(self.on_verdict(kind).await));
            }
            _ => {}
        }

        Ok(None)
    }

    async fn on_get(&mut self, part: u32) -> Result<()> {
        // 이미 보낸 청크에 대한 늦은 get은 무시, 재전송은 타이머가 담당
        match &self.next {
            Some(next) if next.part_index == part => {}
            _ => return Ok(()),
        }
        let Some(mut chunk) = self.next.take() else {
            return Ok(());
        };

        self.timer.cancel();
        self.observer.progress(self.reader.file_id(), part);

        if chunk.is_last() {
            self.state = SenderState::AwaitingDigest;
            let digest = self.await_digest().await?;
            chunk = chunk.with_digest(digest);
            self.state = SenderState::AwaitingVerdict;
        } else {
            self.state = SenderState::Sending(part);
        }

        debug!(
            "청크 전송: {} part {}/{} ({} bytes)",
            chunk.file_id,
            chunk.part_index + 1,
            chunk.part_count,
            chunk.payload.len()
        );
        self.stats.record_chunk(chunk.payload.len());
        self.transmit(chunk.to_bytes()).await;

        if self.state != SenderState::AwaitingVerdict {
            self.next = self.reader.next_chunk().await?;
        }

        Ok(())
    }

    /// MD5 결과를 한 번만 기다림
    async fn await_digest(&mut self) -> Result<String> {
        let task = self
            .digest
            .take()
            .ok_or_else(|| Error::DigestTask("MD5 결과가 이미 소비됨".into()))?;

        if !task.is_ready() {
            debug!("MD5 계산 대기: {}", self.file_id());
        }
        task.wait().await
    }

    async fn on_verdict(&mut self, kind: ControlKind) -> Verdict {
        self.timer.cancel();

        let (verdict, info_kind) = if kind == ControlKind::Md5Passed {
            (Verdict::Passed, InfoKind::Md5Passed)
        } else {
            (Verdict::Failed, InfoKind::Md5Failed)
        };
        self.observer.info(Some(self.reader.file_id()), info_kind);

        let terminated = Datagram::new(Header::terminated(self.file_id())).to_bytes();
        self.send_raw(&terminated).await;

        verdict
    }

    /// 전송 + 재전송 타이머 무장
    async fn transmit(&mut self, bytes: Bytes) {
        self.send_raw(&bytes).await;
        self.timer.arm(bytes);
    }

    async fn send_raw(&self, bytes: &[u8]) {
        if let Err(e) = self.socket.send(bytes).await {
            debug!("송신 에러 (재전송 대기): {}", e);
        }
    }
}

/// 임의 포트에 바인드하고 서버에 연결된 UDP 소켓
pub(crate) async fn connect_udp(server_addr: SocketAddr) -> Result<UdpSocket> {
    let bind_addr: SocketAddr = if server_addr.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };

    let socket = UdpSocket::bind(bind_addr)
        .await
        .map_err(|source| Error::Bind {
            addr: bind_addr,
            source,
        })?;
    socket.connect(server_addr).await?;

    Ok(socket)
}

/// 중단 신호 대기. 신호원이 없으면 영원히 대기
pub(crate) async fn cancelled(shutdown: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = shutdown.as_mut() else {
        return future::pending().await;
    };

    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return future::pending().await;
        }
    }
}
