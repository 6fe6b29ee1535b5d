//! 중단 서브 프로토콜 (클라이언트측)
//!
//! 진행 중인 파일과 무관한 "중단자" 소켓이 abort를 보내고 aborted를 기다린다.
//! 무한 재전송하지 않고 정해진 시간 안에 응답이 없으면 상대방 무응답으로 포기한다.

use std::net::SocketAddr;

use tracing::{info, warn};

use crate::message::{ControlKind, Datagram, Header, MessageKind};
use crate::observer::{InfoKind, Observer};
use crate::sender::connect_udp;
use crate::timer::exchange;
use crate::{Config, Error, Result};

/// 서버에 이 호스트의 모든 세션 중단을 요청
pub async fn abort_remote(server_addr: SocketAddr, config: &Config, observer: &Observer) -> Result<()> {
    let socket = connect_udp(server_addr).await?;
    let request = Datagram::new(Header::abort()).to_bytes();

    // 전체 대기 시간으로만 제한
    let policy = config.retry.clone().unbounded();

    info!("abort 전송 -> {}", server_addr);
    let result = exchange(&socket, request, policy, config.abort_timeout(), |datagram| {
        datagram.kind() == MessageKind::Control(ControlKind::Aborted)
    })
    .await;

    match result {
        Ok(_) => {
            info!("서버 중단 확인: {}", server_addr);
            observer.info(None, InfoKind::Aborted);
            Ok(())
        }
        Err(e @ Error::PeerUnresponsive { .. }) => {
            warn!("수신측 무응답, 중단 확인 실패: {}", server_addr);
            observer.error(None, &e);
            Err(e)
        }
        Err(e) => Err(e),
    }
}
