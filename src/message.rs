//! 프로토콜 메시지 정의 (와이어 코덱)
//!
//! 데이터그램 = JSON 헤더 + 구분자 + 원시 페이로드
//!
//! - control: `{"type":"message","data":"get","name":..,"part":..}`
//! - chunk:   `{"type":"data","name":..,"size":..,"part":..,"all":..,"md5":..}`
//! - chat:    `{"type":"chat","message":..,"data":"get"}`

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolDecodeError;

/// 헤더와 페이로드 사이의 구분자
pub const DELIMITER: &[u8] = b"---+++data+++---";

/// 제어 메시지 종류 (ACK/핸드쉐이크 어휘)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlKind {
    /// 전송 시작 요청
    #[serde(rename = "established")]
    Established,

    /// 다음 청크 요청 (= 이전 청크 ACK)
    #[serde(rename = "get")]
    Get,

    /// 서버측 파일 기록 완료
    #[serde(rename = "complete")]
    Complete,

    /// 송신측 세션 종료 알림
    #[serde(rename = "terminated")]
    Terminated,

    /// 전체 중단 요청
    #[serde(rename = "abort")]
    Abort,

    /// 중단 완료 응답
    #[serde(rename = "aborted")]
    Aborted,

    #[serde(rename = "MD5_passed")]
    Md5Passed,

    #[serde(rename = "MD5_failed")]
    Md5Failed,
}

impl ControlKind {
    /// 와이어상의 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlKind::Established => "established",
            ControlKind::Get => "get",
            ControlKind::Complete => "complete",
            ControlKind::Terminated => "terminated",
            ControlKind::Abort => "abort",
            ControlKind::Aborted => "aborted",
            ControlKind::Md5Passed => "MD5_passed",
            ControlKind::Md5Failed => "MD5_failed",
        }
    }

    /// 최종 판정(verdict) 여부
    pub fn is_verdict(&self) -> bool {
        matches!(self, ControlKind::Md5Passed | ControlKind::Md5Failed)
    }
}

/// 메시지 헤더
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Header {
    /// 제어 메시지
    Message {
        data: ControlKind,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        part: Option<u32>,
    },

    /// 파일 청크
    Data {
        name: String,
        size: u64,
        part: u32,
        all: u32,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        md5: Option<String>,
    },

    /// 채팅 메시지 (data = get 이면 ACK)
    Chat {
        message: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<ControlKind>,
    },
}

impl Header {
    fn control(data: ControlKind, name: Option<&str>, part: Option<u32>) -> Self {
        Header::Message {
            data,
            name: name.map(str::to_owned),
            part,
        }
    }

    pub fn established(name: &str) -> Self {
        Self::control(ControlKind::Established, Some(name), None)
    }

    pub fn get(name: &str, part: u32) -> Self {
        Self::control(ControlKind::Get, Some(name), Some(part))
    }

    pub fn complete(name: &str) -> Self {
        Self::control(ControlKind::Complete, Some(name), None)
    }

    pub fn terminated(name: &str) -> Self {
        Self::control(ControlKind::Terminated, Some(name), None)
    }

    pub fn abort() -> Self {
        Self::control(ControlKind::Abort, None, None)
    }

    pub fn aborted() -> Self {
        Self::control(ControlKind::Aborted, None, None)
    }

    /// MD5 판정
    pub fn verdict(name: &str, passed: bool) -> Self {
        let kind = if passed {
            ControlKind::Md5Passed
        } else {
            ControlKind::Md5Failed
        };
        Self::control(kind, Some(name), None)
    }

    pub fn chat(message: &str) -> Self {
        Header::Chat {
            message: message.to_owned(),
            data: None,
        }
    }

    pub fn chat_ack(message: &str) -> Self {
        Header::Chat {
            message: message.to_owned(),
            data: Some(ControlKind::Get),
        }
    }

    /// 헤더를 바이트로 직렬화
    fn to_vec(&self) -> Vec<u8> {
        // 문자열 키와 원시 타입만 있으므로 직렬화는 실패하지 않음
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// 메시지 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Control(ControlKind),
    Data,
    Chat,
}

/// 디코딩된 데이터그램
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub header: Header,
    pub payload: Bytes,
}

impl Datagram {
    /// 페이로드 없는 데이터그램
    pub fn new(header: Header) -> Self {
        Self {
            header,
            payload: Bytes::new(),
        }
    }

    pub fn with_payload(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// 메시지 분류
    pub fn kind(&self) -> MessageKind {
        match &self.header {
            Header::Message { data, .. } => MessageKind::Control(*data),
            Header::Data { .. } => MessageKind::Data,
            Header::Chat { .. } => MessageKind::Chat,
        }
    }

    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> Bytes {
        encode(&self.header, &self.payload)
    }

    /// 바이트에서 역직렬화
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolDecodeError> {
        decode(bytes)
    }
}

/// 헤더 + 구분자 + 페이로드로 인코딩
pub fn encode(header: &Header, payload: &[u8]) -> Bytes {
    let header_bytes = header.to_vec();

    let mut buf = BytesMut::with_capacity(header_bytes.len() + DELIMITER.len() + payload.len());
    buf.put_slice(&header_bytes);
    buf.put_slice(DELIMITER);
    buf.put_slice(payload);
    buf.freeze()
}

/// 첫 번째 구분자에서 분리 후 헤더 파싱
///
/// 구분자 이후는 불투명한 페이로드로 취급하므로 페이로드 안에 구분자가 다시 나와도 무방하다.
/// 구분자가 아예 없으면 전체를 헤더로 본다 (구분자 없이 제어 메시지를 보내는 피어 호환).
pub fn decode(bytes: &[u8]) -> Result<Datagram, ProtocolDecodeError> {
    if bytes.is_empty() {
        return Err(ProtocolDecodeError::Empty);
    }

    let (head, payload) = match find_delimiter(bytes) {
        Some(pos) => (&bytes[..pos], &bytes[pos + DELIMITER.len()..]),
        None => (bytes, &[][..]),
    };

    let header: Header = serde_json::from_slice(head)?;

    Ok(Datagram {
        header,
        payload: Bytes::copy_from_slice(payload),
    })
}

fn find_delimiter(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(DELIMITER.len())
        .position(|window| window == DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_wire_format() {
        let bytes = Datagram::new(Header::get("a.txt", 3)).to_bytes();
        let text = String::from_utf8_lossy(&bytes);

        assert!(text.starts_with(r#"{"type":"message","data":"get","name":"a.txt","part":3}"#));
        assert!(bytes.ends_with(DELIMITER));
    }

    #[test]
    fn test_verdict_names_on_wire() {
        let passed = String::from_utf8_lossy(&encode(&Header::verdict("f", true), &[])).into_owned();
        let failed = String::from_utf8_lossy(&encode(&Header::verdict("f", false), &[])).into_owned();

        assert!(passed.contains(r#""data":"MD5_passed""#));
        assert!(failed.contains(r#""data":"MD5_failed""#));
    }

    #[test]
    fn test_chunk_with_payload_containing_delimiter() {
        let mut payload = b"head".to_vec();
        payload.extend_from_slice(DELIMITER);
        payload.extend_from_slice(b"tail");

        let header = Header::Data {
            name: "x.bin".into(),
            size: payload.len() as u64,
            part: 0,
            all: 1,
            md5: Some("abc".into()),
        };
        let bytes = encode(&header, &payload);
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.header, header);
        assert_eq!(decoded.payload.as_ref(), payload.as_slice());
        assert_eq!(decoded.kind(), MessageKind::Data);
    }

    #[test]
    fn test_bare_header_without_delimiter() {
        // 구분자 없는 제어 메시지
        let decoded = decode(br#"{"type": "message", "data": "terminated"}"#).unwrap();
        assert_eq!(decoded.kind(), MessageKind::Control(ControlKind::Terminated));
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_null_md5_is_absent() {
        let decoded =
            decode(br#"{"type":"data","name":"n","size":1,"part":0,"all":1,"md5":null}"#).unwrap();
        match decoded.header {
            Header::Data { md5, .. } => assert!(md5.is_none()),
            other => panic!("unexpected header: {other:?}"),
        }
    }

    #[test]
    fn test_chat_ack_classification() {
        let decoded = decode(&Datagram::new(Header::chat_ack("hi")).to_bytes()).unwrap();
        assert_eq!(decoded.kind(), MessageKind::Chat);
        assert_eq!(
            decoded.header,
            Header::Chat {
                message: "hi".into(),
                data: Some(ControlKind::Get)
            }
        );
    }

    #[test]
    fn test_malformed_headers_rejected() {
        assert!(matches!(decode(b""), Err(ProtocolDecodeError::Empty)));
        assert!(decode(b"not json").is_err());
        assert!(decode(br#"{"type":"message","data":"bogus"}"#).is_err());
        assert!(decode(br#"{"type":"unknown"}"#).is_err());
        assert!(decode(br#"{"type":"data","name":"n"}"#).is_err());
        assert!(decode(&[0xff, 0xfe, 0x00]).is_err());
    }
}
