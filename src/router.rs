//! 서버: 세션 다중화
//!
//! 바인드된 소켓 하나를 라우터 태스크가 소유하고, 헤더를 보고 데이터그램을
//! `(peer, 파일 이름)`별 수신 세션 태스크로 전달한다.
//! 세션 테이블은 라우터만 수정하며, 세션은 끝날 때 채널로 은퇴를 알린다.

use std::collections::{HashMap, HashSet};
use std::future::{self, Future};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::chat::chat_reply;
use crate::chunk::Chunk;
use crate::message::{ControlKind, Datagram, Header};
use crate::observer::{InfoKind, Observer};
use crate::receiver::{run_session, ReceiverSession, Retired, SessionCommand, SessionKey};
use crate::{Error, Result, ServerConfig};

/// 세션 테이블 항목
#[derive(Debug)]
struct Slot {
    id: u64,
    inbox: mpsc::Sender<SessionCommand>,
}

/// 활성 수신 세션 테이블
#[derive(Debug, Default)]
pub struct SessionTable {
    slots: HashMap<SessionKey, Slot>,
}

impl SessionTable {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.slots.contains_key(key)
    }

    fn insert(&mut self, key: SessionKey, slot: Slot) {
        self.slots.insert(key, slot);
    }

    fn get(&self, key: &SessionKey) -> Option<&Slot> {
        self.slots.get(key)
    }

    /// 같은 키에 새 세션이 들어섰으면 건드리지 않음
    fn retire(&mut self, retired: &Retired) -> bool {
        match self.slots.get(&retired.key) {
            Some(slot) if slot.id == retired.session_id => {
                self.slots.remove(&retired.key);
                true
            }
            _ => false,
        }
    }

    /// 한 호스트(IP)의 세션을 모두 꺼냄
    fn drain_host(&mut self, ip: IpAddr) -> Vec<(SessionKey, Slot)> {
        let keys: Vec<SessionKey> = self
            .slots
            .keys()
            .filter(|(peer, _)| peer.ip() == ip)
            .cloned()
            .collect();

        keys.into_iter()
            .filter_map(|key| self.slots.remove(&key).map(|slot| (key, slot)))
            .collect()
    }

    /// 한 송신 소켓의 세션들
    fn of_peer(&self, peer: SocketAddr) -> impl Iterator<Item = (&SessionKey, &Slot)> {
        self.slots.iter().filter(move |((p, _), _)| *p == peer)
    }
}

/// 수신 서버
pub struct Server {
    socket: Arc<UdpSocket>,
    config: ServerConfig,
    observer: Observer,
    sessions: SessionTable,

    /// abort를 처리한 호스트 (새 established 전까지 추가 abort 무시)
    aborted_hosts: HashSet<IpAddr>,

    retired_tx: mpsc::UnboundedSender<Retired>,
    retired_rx: mpsc::UnboundedReceiver<Retired>,
    next_session_id: u64,
}

impl Server {
    /// 소켓 바인드 + 저장 디렉토리 준비
    pub async fn bind(config: ServerConfig, observer: Observer) -> Result<Self> {
        tokio::fs::create_dir_all(&config.save_dir).await?;

        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|source| Error::Bind {
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = socket.local_addr()?;

        info!("SWFT 서버 대기 중: {} (저장: {:?})", local_addr, config.save_dir);
        observer.info(None, InfoKind::Ready);

        let (retired_tx, retired_rx) = mpsc::unbounded_channel();

        Ok(Self {
            socket: Arc::new(socket),
            config,
            observer,
            sessions: SessionTable::default(),
            aborted_hosts: HashSet::new(),
            retired_tx,
            retired_rx,
            next_session_id: 0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// 계속 실행
    pub async fn run(self) -> Result<()> {
        self.run_until(future::pending()).await
    }

    /// `shutdown`이 끝날 때까지 실행
    ///
    /// 종료 시 세션 inbox가 모두 닫히므로 진행 중이던 세션은 미완성 파일을 지우고 끝난다.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut buf = vec![0u8; self.config.protocol.recv_buffer_size];
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((len, peer)) => self.dispatch(&buf[..len], peer).await,
                    // Windows/Linux에서 ICMP port unreachable이 recv 에러로 올라옴
                    Err(e) => debug!("수신 에러 (무시): {}", e),
                },

                Some(retired) = self.retired_rx.recv() => {
                    if self.sessions.retire(&retired) {
                        debug!(
                            "세션 은퇴: {} ({}), 남은 세션 {}",
                            retired.key.1,
                            retired.key.0,
                            self.sessions.len()
                        );
                    }
                }

                _ = &mut shutdown => {
                    info!("서버 종료 (활성 세션 {})", self.sessions.len());
                    return Ok(());
                }
            }
        }
    }

    async fn dispatch(&mut self, bytes: &[u8], peer: SocketAddr) {
        let datagram = match Datagram::from_bytes(bytes) {
            Ok(datagram) => datagram,
            Err(e) => {
                debug!("손상된 데이터그램 무시 ({}): {}", peer, e);
                return;
            }
        };

        match datagram.header {
            Header::Message { data, ref name, .. } => {
                let name = name.clone();
                self.on_control(data, name, peer).await;
            }
            Header::Data { .. } => {
                if let Some(chunk) = Chunk::from_datagram(datagram) {
                    self.on_chunk(chunk, peer);
                }
            }
            Header::Chat { ref message, .. } => {
                if let Some(reply) = chat_reply(&datagram.header) {
                    info!("채팅 수신 ({}): {}", peer, message);
                    self.observer.chat(peer, message);
                    self.send_to(&reply, peer).await;
                }
            }
        }
    }

    async fn on_control(&mut self, kind: ControlKind, name: Option<String>, peer: SocketAddr) {
        match (kind, name) {
            (ControlKind::Established, Some(name)) => self.on_established(name, peer).await,
            (ControlKind::Terminated, name) => self.on_terminated(name, peer),
            (ControlKind::Abort, _) => self.on_abort(peer),
            (kind, _) => debug!("처리하지 않는 제어 메시지 ({}): {}", peer, kind.as_str()),
        }
    }

    async fn on_established(&mut self, name: String, peer: SocketAddr) {
        self.aborted_hosts.remove(&peer.ip());

        let key: SessionKey = (peer, name);
        if let Some(slot) = self.sessions.get(&key) {
            // get(0) 유실로 인한 재요청
            let _ = slot.inbox.try_send(SessionCommand::Established);
            return;
        }

        let session = match ReceiverSession::open(
            peer,
            &key.1,
            &self.config.save_dir,
            self.socket.clone(),
            &self.config.protocol,
            self.observer.clone(),
        )
        .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!("수신 세션 생성 실패: {} ({}): {}", key.1, peer, e);
                self.observer.error(Some(&key.1), &e);
                return;
            }
        };

        self.next_session_id += 1;
        let id = self.next_session_id;
        let (inbox_tx, inbox_rx) = mpsc::channel(self.config.protocol.session_queue_size);

        tokio::spawn(run_session(session, id, inbox_rx, self.retired_tx.clone()));
        self.sessions.insert(key, Slot { id, inbox: inbox_tx });
    }

    fn on_chunk(&mut self, chunk: Chunk, peer: SocketAddr) {
        let key: SessionKey = (peer, chunk.file_id.clone());
        let Some(slot) = self.sessions.get(&key) else {
            debug!("알 수 없는 세션의 청크 무시: {} ({})", key.1, peer);
            return;
        };

        match slot.inbox.try_send(SessionCommand::Chunk(chunk)) {
            Ok(()) => {}
            // 유실과 동일하게 취급, 송신측이 재전송함
            Err(TrySendError::Full(_)) => debug!("세션 큐 가득 참, 청크 버림: {}", key.1),
            Err(TrySendError::Closed(_)) => debug!("종료 중인 세션의 청크 무시: {}", key.1),
        }
    }

    fn on_terminated(&mut self, name: Option<String>, peer: SocketAddr) {
        info!(
            "terminated 수신 ({}): {}",
            peer,
            name.as_deref().unwrap_or("-")
        );

        match name {
            Some(name) => {
                if let Some(slot) = self.sessions.get(&(peer, name)) {
                    let _ = slot.inbox.try_send(SessionCommand::Terminated);
                }
            }
            None => {
                for (_, slot) in self.sessions.of_peer(peer) {
                    let _ = slot.inbox.try_send(SessionCommand::Terminated);
                }
            }
        }
    }

    fn on_abort(&mut self, peer: SocketAddr) {
        let host = peer.ip();
        if !self.aborted_hosts.insert(host) {
            debug!("이미 중단된 호스트의 abort 무시: {}", host);
            return;
        }

        let drained = self.sessions.drain_host(host);
        info!("호스트 중단: {} (세션 {}개)", host, drained.len());

        let socket = self.socket.clone();
        let observer = self.observer.clone();

        // 정리가 끝난 뒤에 aborted 응답, 라우터는 기다리지 않음
        tokio::spawn(async move {
            let mut pending = Vec::with_capacity(drained.len());
            for ((_, name), slot) in drained {
                let (done_tx, done_rx) = oneshot::channel();
                if slot.inbox.send(SessionCommand::Abort(done_tx)).await.is_ok() {
                    pending.push(done_rx);
                } else {
                    debug!("이미 종료된 세션: {}", name);
                }
            }
            for done in pending {
                let _ = done.await;
            }

            let reply = Datagram::new(Header::aborted()).to_bytes();
            if let Err(e) = socket.send_to(&reply, peer).await {
                warn!("aborted 전송 실패 ({}): {}", peer, e);
            }
            observer.info(None, InfoKind::Aborted);
        });
    }

    async fn send_to(&self, datagram: &Datagram, peer: SocketAddr) {
        if let Err(e) = self.socket.send_to(&datagram.to_bytes(), peer).await {
            debug!("송신 에러 ({}): {}", peer, e);
        }
    }
}
