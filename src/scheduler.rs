//! 동시 전송 제한 (클라이언트측)
//!
//! 파일마다 태스크 하나를 띄우고, 각 태스크는 세마포어 슬롯을 얻은 뒤에만
//! established를 보낸다. 슬롯은 송신 세션이 끝날 때 반납된다.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cancel::abort_remote;
use crate::digest::Verdict;
use crate::observer::Observer;
use crate::sender::{cancelled, SenderSession, SessionConfig};
use crate::{ClientConfig, Error, Result};

/// 파일 하나의 전송 결과
#[derive(Debug)]
pub struct TransferOutcome {
    pub path: PathBuf,
    pub result: Result<Verdict>,
}

impl TransferOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self.result, Ok(Verdict::Passed))
    }

    /// MD5 불일치도 에러로 취급
    pub fn verified(self) -> Result<PathBuf> {
        match self.result? {
            Verdict::Passed => Ok(self.path),
            Verdict::Failed => Err(Error::DigestMismatch {
                file_id: self.path.display().to_string(),
            }),
        }
    }
}

/// 전체 중단 결과
///
/// 로컬 세션 정리 결과와 서버의 aborted 확인은 따로 보고된다.
#[derive(Debug)]
pub struct AbortOutcome {
    /// 중단 시점까지 끝난 전송들 (중단된 것 포함)
    pub local: Vec<TransferOutcome>,

    /// 서버 확인 결과
    pub remote: Result<()>,
}

/// 전송 스케줄러
pub struct TransferScheduler {
    config: ClientConfig,
    observer: Observer,
    semaphore: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
    tasks: JoinSet<TransferOutcome>,
}

impl TransferScheduler {
    pub fn new(config: ClientConfig, observer: Observer) -> Self {
        // 슬롯 0개면 아무것도 시작하지 못하므로 최소 1
        let permits = config.max_concurrent_transfers.max(1);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            observer,
            semaphore: Arc::new(Semaphore::new(permits)),
            shutdown_tx,
            tasks: JoinSet::new(),
        }
    }

    /// 파일 전송 예약 (슬롯이 나면 시작)
    pub fn submit(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        let semaphore = self.semaphore.clone();
        let mut shutdown = Some(self.shutdown_tx.subscribe());

        let mut session = SessionConfig::new(path.clone(), self.config.server_addr);
        session.protocol = self.config.protocol.clone();
        session.observer = self.observer.clone();
        session.delete_source = self.config.delete_source;

        debug!("전송 예약: {:?}", path);

        self.tasks.spawn(async move {
            let permit = tokio::select! {
                permit = semaphore.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        return TransferOutcome { path, result: Err(Error::ChannelError) };
                    }
                },
                _ = cancelled(&mut shutdown) => {
                    return TransferOutcome { path, result: Err(Error::Aborted) };
                }
            };

            session.permit = Some(permit);
            session.shutdown = shutdown;
            let observer = session.observer.clone();

            let result = match SenderSession::connect(session).await {
                Ok(sender) => sender.run().await,
                Err(e) => {
                    warn!("전송 준비 실패: {:?}: {}", path, e);
                    observer.error(path.file_name().and_then(|n| n.to_str()), &e);
                    Err(e)
                }
            };

            TransferOutcome { path, result }
        });
    }

    pub fn submit_all<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        for path in paths {
            self.submit(path);
        }
    }

    /// 현재 슬롯을 점유한 전송 수
    pub fn active_transfers(&self) -> usize {
        self.config.max_concurrent_transfers.max(1) - self.semaphore.available_permits()
    }

    /// 아직 끝나지 않은 태스크 수 (대기 중 포함)
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// 다음으로 끝난 전송 결과
    pub async fn join_next(&mut self) -> Option<TransferOutcome> {
        loop {
            match self.tasks.join_next().await? {
                Ok(outcome) => return Some(outcome),
                Err(e) => warn!("전송 태스크 패닉: {}", e),
            }
        }
    }

    /// 모든 전송 완료 대기
    pub async fn join_all(&mut self) -> Vec<TransferOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.join_next().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    /// 전체 중단
    ///
    /// 로컬 세션을 모두 멈추고 정리가 끝나길 기다린 뒤 서버에 abort를 보낸다.
    /// 서버가 응답하지 않아도 로컬 결과는 `local`에 그대로 남는다.
    pub async fn abort(&mut self) -> AbortOutcome {
        info!("전체 전송 중단 요청");
        self.shutdown_tx.send_replace(true);
        let local = self.join_all().await;

        // 이후 submit은 다시 진행 가능
        self.shutdown_tx.send_replace(false);

        let remote =
            abort_remote(self.config.server_addr, &self.config.protocol, &self.observer).await;
        if let Err(e) = &remote {
            warn!("서버 중단 확인 실패: {}", e);
        }

        AbortOutcome { local, remote }
    }
}
