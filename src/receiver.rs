//! 수신 세션 (서버측)
//!
//! `(peer, 파일 이름)`마다 하나씩 생성되며 자신의 태스크 안에서만 상태가 바뀐다.
//!
//! `Awaiting(0) → Awaiting(k) → … → Verifying → Done`
//!
//! - 기대 인덱스의 청크만 기록하고 다음 get을 타이머와 함께 보냄
//! - 그 외 인덱스는 중복/순서 어긋남으로 보고 부작용 없이 버림
//! - 마지막 청크 기록 후 complete, 디스크에서 다시 읽어 MD5 판정 (블로킹 풀에서, 세션 루프는 계속 돎)
//! - 판정 후에는 terminated가 올 때까지 판정을 재전송하며 남아 있음

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chunk::Chunk;
use crate::digest::{verify_in_background, Verdict};
use crate::message::{Datagram, Header};
use crate::observer::{InfoKind, Observer};
use crate::stats::TransferStats;
use crate::timer::{Expiry, ReliabilityTimer};
use crate::{Config, Error, Result};

/// 세션 키: 송신 소켓 주소 + 와이어상의 파일 이름
pub type SessionKey = (SocketAddr, String);

/// 라우터가 세션에 전달하는 명령
#[derive(Debug)]
pub enum SessionCommand {
    /// established 재수신 (get(0) 유실)
    Established,

    Chunk(Chunk),

    Terminated,

    /// 호스트 전체 중단, 정리가 끝나면 응답
    Abort(oneshot::Sender<()>),
}

/// 세션이 끝났음을 라우터에 알리는 메시지
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retired {
    pub key: SessionKey,
    pub session_id: u64,
}

/// 수신 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// 청크 k 대기
    Awaiting(u32),

    /// 기록 완료, MD5 계산 중
    Verifying,

    /// 판정 완료 (terminated 대기)
    Done(Verdict),
}

/// 명령 처리 후 세션 계속 여부
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Finished,
}

/// 진행 중인 MD5 검증
type Verification = JoinHandle<Result<Verdict>>;

/// 수신 세션
pub struct ReceiverSession {
    peer: SocketAddr,
    file_id: String,
    path: PathBuf,
    file: Option<File>,
    state: ReceiverState,

    /// 마지막 청크 인덱스 (기록 완료 후에만 Some)
    last_part: Option<u32>,

    verification: Option<Verification>,
    socket: Arc<UdpSocket>,
    timer: ReliabilityTimer<Bytes>,
    stats: TransferStats,
    observer: Observer,
}

impl ReceiverSession {
    /// 저장 경로 예약 후 세션 생성
    pub async fn open(
        peer: SocketAddr,
        file_id: &str,
        save_dir: &Path,
        socket: Arc<UdpSocket>,
        config: &Config,
        observer: Observer,
    ) -> Result<Self> {
        let name = sanitize_file_name(file_id)?;
        let (path, file) = reserve_path(save_dir, &name).await?;

        info!("수신 세션 생성: {} ({}) -> {:?}", file_id, peer, path);

        Ok(Self {
            peer,
            file_id: file_id.to_owned(),
            path,
            file: Some(file),
            state: ReceiverState::Awaiting(0),
            last_part: None,
            verification: None,
            socket,
            timer: ReliabilityTimer::new(config.retry.clone()),
            stats: TransferStats::new(),
            observer,
        })
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    /// 실제 저장 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// get(0) 전송
    pub async fn start(&mut self) {
        self.observer.info(Some(&self.file_id), InfoKind::Started);
        self.request(0).await;
    }

    async fn handle(&mut self, command: SessionCommand) -> Flow {
        match command {
            SessionCommand::Established => {
                if self.state == ReceiverState::Awaiting(0) {
                    debug!("established 재수신: {}", self.file_id);
                    self.request(0).await;
                }
                Flow::Continue
            }
            SessionCommand::Chunk(chunk) => {
                self.on_chunk(chunk).await;
                Flow::Continue
            }
            SessionCommand::Terminated => self.on_terminated(),
            SessionCommand::Abort(done) => {
                self.abort().await;
                let _ = done.send(());
                Flow::Finished
            }
        }
    }

    /// 청크 수신 처리
    pub async fn on_chunk(&mut self, chunk: Chunk) {
        let expected = match self.state {
            ReceiverState::Awaiting(expected) => expected,
            ReceiverState::Verifying => {
                // complete 유실: 송신측이 판정 전에 재전송 타이머를 멈추도록
                if self.last_part == Some(chunk.part_index) {
                    debug!("검증 중 마지막 청크 재수신, complete 재전송: {}", self.file_id);
                    self.send(Header::complete(&self.file_id)).await;
                }
                return;
            }
            ReceiverState::Done(verdict) => {
                // 판정이 유실되어 마지막 청크가 재전송된 경우
                if self.last_part == Some(chunk.part_index) {
                    debug!("마지막 청크 재수신, 판정 재전송: {}", self.file_id);
                    self.send(Header::complete(&self.file_id)).await;
                    self.deliver_verdict(verdict).await;
                }
                return;
            }
        };

        if chunk.part_index != expected {
            debug!(
                "청크 무시: {} part {} (기대 {})",
                self.file_id, chunk.part_index, expected
            );
            self.stats.record_dropped(chunk.part_index, expected);
            return;
        }

        self.timer.cancel();

        if let Err(e) = self.append(&chunk.payload).await {
            warn!("파일 기록 실패: {:?}: {}", self.path, e);
            self.fail(e).await;
            return;
        }

        self.stats.record_chunk(chunk.payload.len());
        self.observer.progress(&self.file_id, chunk.part_index);
        debug!(
            "청크 기록: {} part {}/{}",
            self.file_id,
            chunk.part_index + 1,
            chunk.part_count
        );

        if is_final(&chunk) {
            self.finish(chunk.part_index, chunk.digest).await;
        } else {
            let next = chunk.part_index + 1;
            self.state = ReceiverState::Awaiting(next);
            self.request(next).await;
        }
    }

    async fn append(&mut self, payload: &[u8]) -> Result<()> {
        let file = self.file.as_mut().ok_or(Error::ConnectionClosed)?;
        file.write_all(payload).await?;
        // tokio File은 백그라운드로 쓰므로 flush까지 해야 디스크에 반영됨
        file.flush().await?;
        Ok(())
    }

    /// 기록 마무리 + 검증 시작
    ///
    /// 판정은 `run_session`이 검증 완료를 받아 `on_verified`에서 내린다.
    async fn finish(&mut self, last_part: u32, expected: Option<String>) {
        self.state = ReceiverState::Verifying;
        self.last_part = Some(last_part);

        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush().await {
                warn!("파일 flush 실패: {:?}: {}", self.path, e);
            }
        }

        self.send(Header::complete(&self.file_id)).await;
        self.observer.info(Some(&self.file_id), InfoKind::Complete);
        info!("파일 수신 완료: {} | {}", self.file_id, self.stats.summary());

        self.verification = Some(verify_in_background(self.path.clone(), expected));
    }

    pub fn is_verifying(&self) -> bool {
        self.verification.is_some()
    }

    /// 검증 결과로 판정
    async fn on_verified(&mut self, result: Result<Verdict>) {
        self.verification = None;

        let verdict = match result {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("MD5 검증 실패: {:?}: {}", self.path, e);
                self.observer.error(Some(&self.file_id), &e);
                Verdict::Failed
            }
        };

        if verdict.is_passed() {
            info!("MD5 통과: {}", self.file_id);
        } else {
            warn!("MD5 불일치: {}", self.file_id);
        }

        self.state = ReceiverState::Done(verdict);

        // 관찰자가 판정을 먼저 본 뒤 송신측에 전달
        let kind = if verdict.is_passed() {
            InfoKind::Md5Passed
        } else {
            InfoKind::Md5Failed
        };
        self.observer.info(Some(&self.file_id), kind);

        self.deliver_verdict(verdict).await;
    }

    async fn deliver_verdict(&mut self, verdict: Verdict) {
        let bytes = Datagram::new(Header::verdict(&self.file_id, verdict.is_passed())).to_bytes();
        self.transmit(bytes).await;
    }

    fn on_terminated(&mut self) -> Flow {
        match self.state {
            ReceiverState::Done(_) => {
                info!("송신측 종료 확인: {} ({})", self.file_id, self.peer);
                self.timer.cancel();
                self.observer.info(Some(&self.file_id), InfoKind::Terminated);
                Flow::Finished
            }
            _ => {
                debug!("전송 중 terminated 수신 (무시): {}", self.file_id);
                Flow::Continue
            }
        }
    }

    async fn on_expiry(&mut self, expiry: Expiry<Bytes>) -> Flow {
        match expiry {
            Expiry::Resend(bytes) => {
                self.stats.record_retransmission();
                self.send_raw(&bytes).await;
                Flow::Continue
            }
            Expiry::Exhausted { attempts } => match self.state {
                ReceiverState::Done(_) => {
                    debug!("판정 재전송 중단: {} ({}회)", self.file_id, attempts);
                    Flow::Finished
                }
                _ => {
                    warn!("송신측 무응답, 세션 포기: {} ({}회)", self.file_id, attempts);
                    self.fail(Error::PeerUnresponsive { attempts }).await;
                    Flow::Finished
                }
            },
        }
    }

    /// 미완성 파일 삭제 후 에러 알림
    async fn fail(&mut self, error: Error) {
        self.timer.cancel();
        self.remove_partial().await;
        self.observer.error(Some(&self.file_id), &error);
    }

    /// 중단: 타이머 해제, 미완성 파일 삭제
    pub async fn abort(&mut self) {
        self.timer.cancel();
        if let Some(verification) = self.verification.take() {
            verification.abort();
        }
        if matches!(self.state, ReceiverState::Done(_)) {
            return;
        }
        info!("수신 중단: {} ({})", self.file_id, self.peer);
        self.remove_partial().await;
    }

    async fn remove_partial(&mut self) {
        self.file = None;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!("미완성 파일 삭제: {:?}", self.path),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("미완성 파일 삭제 실패: {:?}: {}", self.path, e),
        }
    }

    async fn request(&mut self, part: u32) {
        let bytes = Datagram::new(Header::get(&self.file_id, part)).to_bytes();
        self.transmit(bytes).await;
    }

    /// 전송 + 재전송 타이머 무장
    async fn transmit(&mut self, bytes: Bytes) {
        self.send_raw(&bytes).await;
        self.timer.arm(bytes);
    }

    async fn send(&self, header: Header) {
        self.send_raw(&Datagram::new(header).to_bytes()).await;
    }

    async fn send_raw(&self, bytes: &[u8]) {
        if let Err(e) = self.socket.send_to(bytes, self.peer).await {
            debug!("송신 에러 (재전송 대기): {}", e);
        }
    }
}

/// 세션 태스크 본체
///
/// inbox가 닫히거나 세션이 끝나면 `retired`로 알리고 종료한다.
pub async fn run_session(
    mut session: ReceiverSession,
    session_id: u64,
    mut inbox: mpsc::Receiver<SessionCommand>,
    retired: mpsc::UnboundedSender<Retired>,
) {
    session.start().await;

    loop {
        let flow = tokio::select! {
            command = inbox.recv() => match command {
                Some(command) => session.handle(command).await,
                None => {
                    session.abort().await;
                    Flow::Finished
                }
            },
            expiry = session.timer.expired() => session.on_expiry(expiry).await,
            result = verified(&mut session.verification), if session.verification.is_some() => {
                session.on_verified(result).await;
                Flow::Continue
            }
        };

        if flow == Flow::Finished {
            break;
        }
    }

    let _ = retired.send(Retired {
        key: (session.peer, session.file_id.clone()),
        session_id,
    });
}

/// 검증 완료 대기 (검증 중이 아니면 끝나지 않음)
async fn verified(verification: &mut Option<Verification>) -> Result<Verdict> {
    match verification.as_mut() {
        Some(handle) => handle
            .await
            .map_err(|e| Error::DigestTask(e.to_string()))?,
        None => std::future::pending().await,
    }
}

fn is_final(chunk: &Chunk) -> bool {
    chunk.part_index >= chunk.part_count.saturating_sub(1)
}

/// 와이어상의 이름을 저장 가능한 파일 이름으로 정리
///
/// 마지막 경로 요소만 사용한다.
pub fn sanitize_file_name(name: &str) -> Result<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();

    if base.is_empty() || base == "." || base == ".." || base.contains('\0') {
        return Err(Error::InvalidFileName(name.to_owned()));
    }

    Ok(base.to_owned())
}

/// 충돌하지 않는 경로를 찾아 파일 생성
///
/// `name.ext`가 있으면 `name_1.ext`, `name_2.ext`, … 순으로 시도한다.
/// `create_new`로 생성까지 한 번에 하므로 동시에 같은 이름이 와도 겹치지 않는다.
pub async fn reserve_path(dir: &Path, name: &str) -> Result<(PathBuf, File)> {
    let requested = Path::new(name);
    let stem = requested
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    let extension = requested.extension().and_then(|s| s.to_str());

    let mut n: u32 = 0;
    loop {
        let candidate = match (n, extension) {
            (0, _) => dir.join(name),
            (_, Some(ext)) => dir.join(format!("{stem}_{n}.{ext}")),
            (_, None) => dir.join(format!("{stem}_{n}")),
        };

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e.into()),
        }
    }
}
