//! 채팅 메시지 마이크로 프로토콜
//!
//! 메시지 하나를 청크 하나짜리 전송처럼 재전송 타이머로 보내고,
//! 같은 내용의 get 응답을 받으면 끝난다. 동시 전송 슬롯은 쓰지 않는다.

use std::net::SocketAddr;

use tracing::{debug, warn};

use crate::message::{ControlKind, Datagram, Header};
use crate::sender::connect_udp;
use crate::timer::exchange;
use crate::{Config, Result};

/// 채팅 메시지 전송, ACK 수신 시 완료
pub async fn send_chat(server_addr: SocketAddr, message: &str, config: &Config) -> Result<()> {
    let socket = connect_udp(server_addr).await?;
    let request = Datagram::new(Header::chat(message)).to_bytes();

    let result = exchange(
        &socket,
        request,
        config.retry.clone().unbounded(),
        config.chat_timeout(),
        |datagram| is_chat_ack(datagram, message),
    )
    .await;

    match &result {
        Ok(_) => debug!("채팅 전달 완료 -> {}", server_addr),
        Err(e) => warn!("채팅 전달 실패 -> {}: {}", server_addr, e),
    }

    result.map(|_| ())
}

/// 수신한 채팅 메시지에 대한 응답 (None이면 이미 ACK인 메시지)
pub fn chat_reply(header: &Header) -> Option<Datagram> {
    match header {
        Header::Chat {
            message,
            data: None,
        } => Some(Datagram::new(Header::chat_ack(message))),
        _ => None,
    }
}

fn is_chat_ack(datagram: &Datagram, sent: &str) -> bool {
    matches!(
        &datagram.header,
        Header::Chat {
            message,
            data: Some(ControlKind::Get),
        } if message == sent
    )
}
