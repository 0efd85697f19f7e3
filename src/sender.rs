//! 전송 엔진 (서버측)
//!
//! - 고정 크기 청크 순차 전송 (raw 바이너리, codec 우회)
//! - 선택적 `STOP_STREAM` 취소 (청크마다 non-blocking 확인)
//! - 종료 방식과 무관하게 완료 프레임 `STREAM_END` 송신

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::codec::{send_message, FrameReader};
use crate::events::{EventSink, SessionEvent};
use crate::message::ControlMessage;
use crate::stats::TransferStats;
use crate::{CancelPolicy, Config, Result};

/// 전송 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// 실제로 채널에 쓴 바이트
    pub bytes_sent: u64,

    /// `STOP_STREAM` 으로 조기 종료되었는지 여부
    pub cancelled: bool,

    /// 보낸 페이로드의 CRC32
    pub crc32: u32,

    /// 취소 확인 중 받은 다른 제어 프레임 (도착 순서)
    pub deferred: Vec<String>,
}

/// 전송 세션
///
/// 소스 하나를 클라이언트 하나에게 보내는 동안만 존재
#[derive(Debug)]
pub struct TransferSession {
    name: String,
    path: PathBuf,
    file: File,
    size: u64,
    chunk_size: usize,
    policy: CancelPolicy,
    bytes_sent: u64,
    cancelled: bool,
    stats: TransferStats,
}

impl TransferSession {
    /// 소스 열기
    ///
    /// `STREAMING:` 응답 전에 호출해서 열기 실패가 바이너리 모드 진입 후에 나지 않게 함
    pub async fn open(name: &str, path: &Path, config: &Config) -> Result<Self> {
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();

        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            file,
            size,
            chunk_size: config.chunk_size.max(1),
            policy: config.cancel_policy,
            bytes_sent: 0,
            cancelled: false,
            stats: TransferStats::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// 전송 실행
    ///
    /// 전송 중 채널 에러가 나도 완료 프레임 송신은 한 번 시도한 뒤 에러 반환
    pub async fn run<R, W>(
        mut self,
        reader: &mut FrameReader<R>,
        writer: &mut W,
        events: &dyn EventSink,
    ) -> Result<TransferOutcome>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(
            "Transfer start: {} ({} bytes, {:?}) from {:?}",
            self.name, self.size, self.policy, self.path
        );
        events.emit(SessionEvent::TransferStarted {
            name: self.name.clone(),
            size: self.size,
        });

        let mut deferred = Vec::new();
        let streamed = self.stream_chunks(reader, writer, events, &mut deferred).await;
        let completed = send_message(writer, &ControlMessage::StreamEnd).await;

        if let Err(e) = streamed {
            if let Err(end_err) = completed {
                debug!("completion frame not delivered: {}", end_err);
            }
            warn!(
                "Transfer aborted: {} after {} bytes: {}",
                self.name, self.bytes_sent, e
            );
            return Err(e);
        }
        completed?;

        info!("Transfer {}: {}", if self.cancelled { "cancelled" } else { "complete" }, self.stats.summary());
        events.emit(SessionEvent::TransferFinished {
            name: self.name.clone(),
            bytes_sent: self.bytes_sent,
            cancelled: self.cancelled,
            crc32: self.stats.crc32(),
        });

        Ok(TransferOutcome {
            bytes_sent: self.bytes_sent,
            cancelled: self.cancelled,
            crc32: self.stats.crc32(),
            deferred,
        })
    }

    async fn stream_chunks<R, W>(
        &mut self,
        reader: &mut FrameReader<R>,
        writer: &mut W,
        events: &dyn EventSink,
        deferred: &mut Vec<String>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            let n = read_full(&mut self.file, &mut buf).await?;
            if n == 0 {
                break;
            }

            writer.write_all(&buf[..n]).await?;
            self.bytes_sent += n as u64;
            self.stats.record_chunk(&buf[..n]);

            events.emit(SessionEvent::TransferProgress {
                name: self.name.clone(),
                bytes_sent: self.bytes_sent,
            });

            if self.policy == CancelPolicy::Cancellable && self.stop_requested(reader, deferred).await? {
                self.cancelled = true;
                info!("STOP_STREAM received after {} bytes", self.bytes_sent);
                break;
            }
        }

        writer.flush().await?;
        Ok(())
    }

    /// 대기 중인 제어 프레임을 모두 확인. 데이터가 없으면 바로 반환
    async fn stop_requested<R>(
        &self,
        reader: &mut FrameReader<R>,
        deferred: &mut Vec<String>,
    ) -> Result<bool>
    where
        R: AsyncRead + Unpin,
    {
        while let Some(text) = reader.try_receive().await? {
            match ControlMessage::parse(&text) {
                ControlMessage::StopStream => return Ok(true),
                _ => {
                    debug!("frame deferred during transfer: {:?}", text);
                    deferred.push(text);
                }
            }
        }
        Ok(false)
    }
}

/// 버퍼가 가득 차거나 EOF 일 때까지 읽기
async fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
