//! 전송 통계

use std::time::{Duration, Instant};

/// 단일 전송 통계 (송신/수신 공용)
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 총 페이로드 바이트
    pub total_bytes: u64,

    /// 처리한 청크 수
    pub total_chunks: u64,

    /// 페이로드 CRC32 (진단용)
    hasher: crc32fast::Hasher,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_bytes: 0,
            total_chunks: 0,
            hasher: crc32fast::Hasher::new(),
        }
    }

    /// 청크 기록
    pub fn record_chunk(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.total_chunks += 1;
        self.total_bytes += data.len() as u64;
        self.hasher.update(data);
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
        self.total_bytes as f64 / elapsed
    }

    /// 지금까지의 CRC32
    pub fn crc32(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Chunks: {} | Bytes: {} | Throughput: {:.2} MB/s | CRC32: {:08X}",
            self.elapsed().as_secs_f64(),
            self.total_chunks,
            self.total_bytes,
            self.throughput() / 1_000_000.0,
            self.crc32(),
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_crc() {
        let mut stats = TransferStats::new();
        stats.record_chunk(b"hello ");
        stats.record_chunk(b"");
        stats.record_chunk(b"world");

        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.total_bytes, 11);
        assert_eq!(stats.crc32(), crc32fast::hash(b"hello world"));
        assert!(stats.summary().contains("Bytes: 11"));
    }
}
