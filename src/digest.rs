//! 무결성 검증 (MD5)
//!
//! 송신측은 청크 전송과 겹쳐서 백그라운드로 원본 파일의 MD5를 계산하고,
//! 수신측은 파일을 모두 기록한 뒤 디스크에 쓰인 바이트를 다시 읽어 계산한다.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tokio::task::JoinHandle;

use crate::{Error, Result};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// 판정 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed,
}

impl Verdict {
    pub fn is_passed(&self) -> bool {
        matches!(self, Verdict::Passed)
    }
}

/// 바이트열의 MD5 (hex)
pub fn bytes_digest(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// 파일 전체의 MD5 (hex), 스트리밍 계산
pub fn file_digest(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// 기록된 파일과 기대 MD5 비교
pub fn verify(path: &Path, expected: Option<&str>) -> Result<Verdict> {
    let actual = file_digest(path)?;
    let passed = expected.is_some_and(|expected| expected.eq_ignore_ascii_case(&actual));

    Ok(if passed {
        Verdict::Passed
    } else {
        Verdict::Failed
    })
}

/// 블로킹 풀에서 실행되는 MD5 계산
///
/// 결과는 한 번만 발행되고 `wait`로 한 번만 소비된다.
#[derive(Debug)]
pub struct DigestTask {
    handle: JoinHandle<Result<String>>,
}

impl DigestTask {
    pub fn spawn(path: PathBuf) -> Self {
        let handle = tokio::task::spawn_blocking(move || file_digest(&path));
        Self { handle }
    }

    /// 계산 완료 여부 (대기하지 않음)
    pub fn is_ready(&self) -> bool {
        self.handle.is_finished()
    }

    /// 결과 대기
    pub async fn wait(self) -> Result<String> {
        self.handle
            .await
            .map_err(|e| Error::DigestTask(e.to_string()))?
    }
}

/// 블로킹 풀에서 수신 파일 검증
///
/// 세션 태스크가 `select!` 안에서 다른 이벤트와 함께 기다릴 수 있도록 핸들을 돌려준다.
pub fn verify_in_background(
    path: PathBuf,
    expected: Option<String>,
) -> JoinHandle<Result<Verdict>> {
    tokio::task::spawn_blocking(move || verify(&path, expected.as_deref()))
}
