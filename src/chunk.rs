//! 청크 정의
//!
//! - Chunk: 파일 조각 + 위치 메타데이터 (전송 단위, 최대 65000 bytes)
//! - ChunkReader: 파일을 순서대로 읽어 청크를 생성 (송신측)

use std::path::Path;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::message::{Datagram, Header, DELIMITER};
use crate::{Error, Result, CHUNK_SIZE};

/// 파일 크기에서 청크 수 계산
///
/// `all = size / 65000 + 1`: 0바이트 파일은 빈 청크 하나, 크기가 정확히 65000의 배수면
/// 마지막에 빈 청크가 하나 붙는다. 청크 인덱스는 u32이므로 그 범위를 넘는 파일은 거부한다.
pub fn part_count(file_size: u64) -> Result<u32> {
    u32::try_from(file_size / CHUNK_SIZE as u64 + 1)
        .map_err(|_| Error::FileTooLarge { size: file_size })
}

/// 경로에서 와이어상의 파일 ID(파일 이름) 추출
pub fn file_id_of(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::InvalidFileName(path.display().to_string()))?;

    // 헤더 안에 구분자가 있으면 수신측이 헤더를 잘못 자른다
    if name.as_bytes().windows(DELIMITER.len()).any(|w| w == DELIMITER) {
        return Err(Error::InvalidFileName(name.to_owned()));
    }

    Ok(name.to_owned())
}

/// 청크 (전송 단위)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 파일 ID (파일 이름)
    pub file_id: String,

    /// 전체 파일 크기
    pub file_size: u64,

    /// 청크 인덱스
    pub part_index: u32,

    /// 총 청크 수
    pub part_count: u32,

    /// 실제 데이터
    pub payload: Bytes,

    /// 파일 전체 MD5 (마지막 청크에만)
    pub digest: Option<String>,
}

impl Chunk {
    /// 마지막 청크 여부
    pub fn is_last(&self) -> bool {
        self.part_index.checked_add(1) == Some(self.part_count)
    }

    pub fn with_digest(mut self, digest: String) -> Self {
        self.digest = Some(digest);
        self
    }

    pub fn header(&self) -> Header {
        Header::Data {
            name: self.file_id.clone(),
            size: self.file_size,
            part: self.part_index,
            all: self.part_count,
            md5: self.digest.clone(),
        }
    }

    pub fn to_datagram(&self) -> Datagram {
        Datagram::with_payload(self.header(), self.payload.clone())
    }

    /// 청크를 바이트로 직렬화
    pub fn to_bytes(&self) -> Bytes {
        self.to_datagram().to_bytes()
    }

    /// 데이터그램에서 청크 추출 (data 타입만)
    pub fn from_datagram(datagram: Datagram) -> Option<Self> {
        match datagram.header {
            Header::Data {
                name,
                size,
                part,
                all,
                md5,
            } => Some(Self {
                file_id: name,
                file_size: size,
                part_index: part,
                part_count: all,
                payload: datagram.payload,
                digest: md5,
            }),
            _ => None,
        }
    }
}

/// 메모리 데이터를 청크들로 분할
pub fn split_into_chunks(file_id: &str, data: &[u8]) -> Result<Vec<Chunk>> {
    let file_size = data.len() as u64;
    let total = part_count(file_size)?;

    let chunks = (0..total)
        .map(|idx| {
            let start = (idx as usize * CHUNK_SIZE).min(data.len());
            let end = (start + CHUNK_SIZE).min(data.len());
            Chunk {
                file_id: file_id.to_owned(),
                file_size,
                part_index: idx,
                part_count: total,
                payload: Bytes::copy_from_slice(&data[start..end]),
                digest: None,
            }
        })
        .collect();

    Ok(chunks)
}

/// 파일을 앞에서부터 순서대로 읽어 청크를 생성
#[derive(Debug)]
pub struct ChunkReader {
    file: File,
    file_id: String,
    file_size: u64,
    part_count: u32,
    next_part: u32,
}

impl ChunkReader {
    pub async fn open(path: &Path) -> Result<Self> {
        let file_id = file_id_of(path)?;
        let file = File::open(path).await?;
        let file_size = file.metadata().await?.len();

        Ok(Self {
            file,
            file_id,
            file_size,
            part_count: part_count(file_size)?,
            next_part: 0,
        })
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn part_count(&self) -> u32 {
        self.part_count
    }

    /// 다음 청크 읽기. 모든 청크를 읽었으면 None
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.next_part >= self.part_count {
            return Ok(None);
        }

        let mut buf = Vec::with_capacity(CHUNK_SIZE);
        (&mut self.file)
            .take(CHUNK_SIZE as u64)
            .read_to_end(&mut buf)
            .await?;

        let chunk = Chunk {
            file_id: self.file_id.clone(),
            file_size: self.file_size,
            part_index: self.next_part,
            part_count: self.part_count,
            payload: Bytes::from(buf),
            digest: None,
        };
        self.next_part += 1;

        Ok(Some(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_count_rule() {
        assert_eq!(part_count(0).unwrap(), 1);
        assert_eq!(part_count(1).unwrap(), 1);
        assert_eq!(part_count(64_999).unwrap(), 1);
        assert_eq!(part_count(130_001).unwrap(), 3);
        assert_eq!(part_count(650_000).unwrap(), 11);
    }

    #[test]
    fn test_part_count_bounded_by_index_range() {
        // 마지막 인덱스가 u32::MAX - 1 인 가장 큰 파일
        let largest = (u32::MAX as u64 - 1) * CHUNK_SIZE as u64 + (CHUNK_SIZE as u64 - 1);
        assert_eq!(part_count(largest).unwrap(), u32::MAX);

        assert!(matches!(
            part_count(largest + 1),
            Err(Error::FileTooLarge { .. })
        ));
        assert!(part_count(u64::MAX).is_err());
    }

    #[test]
    fn test_is_last_at_index_limit() {
        let chunk = Chunk {
            file_id: "x".into(),
            file_size: 0,
            part_index: u32::MAX,
            part_count: 1,
            payload: Bytes::new(),
            digest: None,
        };
        assert!(!chunk.is_last());
    }

    #[test]
    fn test_split_sizes_and_reassembly() {
        let data: Vec<u8> = (0..130_001u32).map(|i| (i % 251) as u8).collect();
        let chunks = split_into_chunks("f.bin", &data).unwrap();

        let sizes: Vec<usize> = chunks.iter().map(|c| c.payload.len()).collect();
        assert_eq!(sizes, vec![65_000, 65_000, 1]);
        assert!(chunks[2].is_last());

        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.payload.to_vec()).collect();
        assert_eq!(joined, data);
    }

    #[test]
    fn test_empty_file_is_one_empty_chunk() {
        let chunks = split_into_chunks("empty", &[]).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].payload.is_empty());
        assert!(chunks[0].is_last());
    }

    #[test]
    fn test_datagram_conversion() {
        let chunk = split_into_chunks("a", b"hello").unwrap().remove(0).with_digest("d".into());
        let decoded = Datagram::from_bytes(&chunk.to_bytes()).unwrap();
        assert_eq!(Chunk::from_datagram(decoded), Some(chunk));

        assert!(Chunk::from_datagram(Datagram::new(Header::abort())).is_none());
    }

    #[test]
    fn test_file_id_rejects_delimiter() {
        assert_eq!(file_id_of(Path::new("/tmp/dir/a.txt")).unwrap(), "a.txt");
        assert!(file_id_of(Path::new("/tmp/x---+++data+++---y")).is_err());
        assert!(file_id_of(Path::new("/")).is_err());
    }

    #[tokio::test]
    async fn test_reader_matches_split() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i * 7) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let mut reader = ChunkReader::open(&path).await.unwrap();
        assert_eq!(reader.part_count(), 4);
        assert_eq!(reader.file_id(), "src.bin");

        let mut read = Vec::new();
        while let Some(chunk) = reader.next_chunk().await.unwrap() {
            read.push(chunk);
        }

        assert_eq!(read, split_into_chunks("src.bin", &data).unwrap());
    }
}
