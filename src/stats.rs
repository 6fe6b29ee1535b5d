//! 전송 통계

use std::time::{Duration, Instant};

/// 세션별 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 처리한 청크 수 (송신: ACK 받은 청크, 수신: 기록한 청크)
    pub chunks: u64,

    /// 처리한 페이로드 바이트
    pub bytes: u64,

    /// 재전송 횟수
    pub retransmissions: u64,

    /// 버려진 중복 청크 수
    pub duplicates_dropped: u64,

    /// 버려진 순서 어긋난 청크 수
    pub out_of_order_dropped: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            chunks: 0,
            bytes: 0,
            retransmissions: 0,
            duplicates_dropped: 0,
            out_of_order_dropped: 0,
        }
    }

    /// 청크 처리 기록
    pub fn record_chunk(&mut self, size: usize) {
        self.chunks += 1;
        self.bytes += size as u64;
    }

    pub fn record_retransmission(&mut self) {
        self.retransmissions += 1;
    }

    /// 기대 인덱스가 아닌 청크 기록
    pub fn record_dropped(&mut self, part: u32, expected: u32) {
        if part < expected {
            self.duplicates_dropped += 1;
        } else {
            self.out_of_order_dropped += 1;
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Chunks: {} | Bytes: {} | Throughput: {:.2} MB/s | Resends: {} | Dropped: {} dup / {} ooo",
            self.elapsed().as_secs_f64(),
            self.chunks,
            self.bytes,
            self.throughput() / 1_000_000.0,
            self.retransmissions,
            self.duplicates_dropped,
            self.out_of_order_dropped,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}
