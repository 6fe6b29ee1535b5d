//! 진행/완료 알림
//!
//! 세션은 공유 상태 대신 채널로 외부 관찰자(GUI, 로그, 테스트)에게 이벤트를 보낸다.

use std::net::SocketAddr;

use serde::Serialize;
use tokio::sync::mpsc;

/// 정보성 이벤트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InfoKind {
    /// 서버 바인드 완료
    #[serde(rename = "ready")]
    Ready,

    /// 수신 세션 시작
    #[serde(rename = "started")]
    Started,

    /// 파일 기록 완료 (판정 전)
    #[serde(rename = "complete")]
    Complete,

    #[serde(rename = "MD5_passed")]
    Md5Passed,

    #[serde(rename = "MD5_failed")]
    Md5Failed,

    #[serde(rename = "aborted")]
    Aborted,

    #[serde(rename = "terminated")]
    Terminated,

    #[serde(rename = "error")]
    Error,
}

/// 관찰자에게 전달되는 구조화된 알림
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Notification {
    /// 청크 ACK 진행
    Prog { name: String, part: u32 },

    /// 상태 변화
    Info {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,

        message: InfoKind,

        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },

    /// 수신한 채팅 메시지
    Chat { from: SocketAddr, message: String },
}

impl Notification {
    /// JSON 한 줄로 직렬화
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// 알림 송신 핸들
///
/// 수신자가 없거나 이미 닫혀도 세션 진행에는 영향이 없다.
#[derive(Debug, Clone, Default)]
pub struct Observer {
    tx: Option<mpsc::UnboundedSender<Notification>>,
}

impl Observer {
    /// 새 알림 채널 생성
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// 아무에게도 전달하지 않는 관찰자
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn notify(&self, notification: Notification) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(notification);
        }
    }

    pub fn progress(&self, name: &str, part: u32) {
        self.notify(Notification::Prog {
            name: name.to_owned(),
            part,
        });
    }

    pub fn info(&self, name: Option<&str>, message: InfoKind) {
        self.notify(Notification::Info {
            name: name.map(str::to_owned),
            message,
            detail: None,
        });
    }

    pub fn error(&self, name: Option<&str>, detail: impl ToString) {
        self.notify(Notification::Info {
            name: name.map(str::to_owned),
            message: InfoKind::Error,
            detail: Some(detail.to_string()),
        });
    }

    pub fn chat(&self, from: SocketAddr, message: &str) {
        self.notify(Notification::Chat {
            from,
            message: message.to_owned(),
        });
    }
}
