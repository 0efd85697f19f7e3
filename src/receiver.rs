//! 수신 버퍼 (클라이언트측)
//!
//! - 바이너리 모드 raw 청크 수신
//! - 청크 경계에 걸친 센티널 `STREAM_END#` 탐지
//! - 임계치 도달 시 점진 재생 신호 (전송당 한 번)
//! - 임시 파일 싱크는 모든 종료 경로에서 정리

use std::path::{Path, PathBuf};

use bytes::{Buf, Bytes, BytesMut};
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::codec::FrameReader;
use crate::events::{EventSink, SessionEvent};
use crate::stats::TransferStats;
use crate::{Config, Error, Result, SENTINEL};

/// 청크 하나를 먹인 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// 싱크에 써도 되는 페이로드
    pub payload: Bytes,

    /// 이번 청크에서 재생 시작 신호가 발생했는지
    pub playback: bool,

    /// 센티널 발견 시 그 뒤에 남은 바이트 (다음 제어 프레임)
    pub complete: Option<Bytes>,
}

/// 수신 누산기
///
/// 센티널의 앞부분일 수 있는 꼬리(최대 `SENTINEL.len() - 1` 바이트)만 보류하고
/// 나머지는 즉시 싱크로 내보냄
#[derive(Debug)]
pub struct ReceiveAccumulator {
    rolling: BytesMut,
    received: u64,
    threshold: u64,
    playback_started: bool,
}

impl ReceiveAccumulator {
    pub fn new(threshold: u64) -> Self {
        Self {
            rolling: BytesMut::with_capacity(SENTINEL.len()),
            received: 0,
            threshold,
            playback_started: false,
        }
    }

    /// 청크 추가
    pub fn feed(&mut self, chunk: &[u8]) -> Step {
        self.rolling.extend_from_slice(chunk);

        if let Some(pos) = find_sentinel(&self.rolling) {
            let payload = self.rolling.split_to(pos).freeze();
            self.rolling.advance(SENTINEL.len());
            let trailing = std::mem::take(&mut self.rolling).freeze();
            self.received += payload.len() as u64;

            // 임계치 전에 끝난 작은 파일은 완료 시점에 재생
            let playback = !self.playback_started;
            self.playback_started = true;

            return Step {
                payload,
                playback,
                complete: Some(trailing),
            };
        }

        let hold = partial_sentinel_len(&self.rolling);
        let payload = self.rolling.split_to(self.rolling.len() - hold).freeze();
        self.received += payload.len() as u64;

        // 보류 중인 꼬리도 도착한 바이트로 셈
        let arrived = self.received + self.rolling.len() as u64;
        let playback = !self.playback_started && arrived >= self.threshold;
        if playback {
            self.playback_started = true;
        }

        Step {
            payload,
            playback,
            complete: None,
        }
    }

    /// 싱크로 내보낸 누적 바이트
    pub fn received(&self) -> u64 {
        self.received
    }

    /// 센티널 판정을 위해 보류 중인 바이트 수
    pub fn pending(&self) -> usize {
        self.rolling.len()
    }
}

fn find_sentinel(buf: &[u8]) -> Option<usize> {
    buf.windows(SENTINEL.len()).position(|window| window == SENTINEL)
}

/// 버퍼 끝이 센티널의 진부분 접두사와 일치하는 최대 길이
fn partial_sentinel_len(buf: &[u8]) -> usize {
    (1..SENTINEL.len())
        .rev()
        .find(|&len| buf.ends_with(&SENTINEL[..len]))
        .unwrap_or(0)
}

/// 수신 중인 임시 파일
///
/// `finish` 없이 drop 되면 파일 삭제 (중단된 전송 폐기)
#[derive(Debug)]
pub struct MediaSink {
    file: File,
    path: TempPath,
    written: u64,
}

impl MediaSink {
    /// 소스 확장자를 유지한 임시 파일 생성
    pub fn create(dir: Option<&Path>, name: &str) -> Result<Self> {
        let suffix = Path::new(name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        let mut builder = tempfile::Builder::new();
        builder.prefix("hms-").suffix(&suffix);
        let named = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let (file, path) = named.into_parts();

        Ok(Self {
            file: File::from_std(file),
            path,
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// 추가 쓰기. 재생 중인 플레이어가 바로 읽을 수 있도록 flush 까지 대기
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data).await?;
        self.file.flush().await?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// 수신 완료, 파일 핸들 해제
    pub async fn finish(mut self) -> Result<ReceivedMedia> {
        self.file.flush().await?;
        self.file.sync_data().await?;
        Ok(ReceivedMedia { path: self.path })
    }
}

/// 수신 완료된 파일
///
/// drop 시 삭제. 보존하려면 `keep`
#[derive(Debug)]
pub struct ReceivedMedia {
    path: TempPath,
}

impl ReceivedMedia {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 파일을 영구 보존하고 경로 반환
    pub fn keep(self) -> Result<PathBuf> {
        self.path.keep().map_err(|e| Error::Channel(e.error))
    }
}

/// 전송 완료 결과
#[derive(Debug)]
pub struct ReceiveOutcome {
    pub media: ReceivedMedia,
    pub bytes: u64,
    pub crc32: u32,
}

/// 바이너리 모드 수신기
///
/// 전송 하나 동안 읽기 채널을 독점
pub struct StreamReceiver<'a> {
    chunk_size: usize,
    threshold: u64,
    download_dir: Option<PathBuf>,
    events: &'a dyn EventSink,
}

impl<'a> StreamReceiver<'a> {
    pub fn new(config: &Config, events: &'a dyn EventSink) -> Self {
        Self {
            chunk_size: config.chunk_size.max(SENTINEL.len()),
            threshold: config.playback_threshold,
            download_dir: config.download_dir.clone(),
            events,
        }
    }

    /// `STREAMING:<name>` 직후 호출. 센티널까지 수신
    ///
    /// 센티널 뒤 바이트는 `reader` 버퍼로 되돌려 제어 모드가 이어서 읽음
    pub async fn receive<R>(&self, name: &str, reader: &mut FrameReader<R>) -> Result<ReceiveOutcome>
    where
        R: AsyncRead + Unpin,
    {
        let mut sink = MediaSink::create(self.download_dir.as_deref(), name)?;
        let mut accumulator = ReceiveAccumulator::new(self.threshold);
        let mut stats = TransferStats::new();

        info!("Receiving {} into {:?}", name, sink.path());
        self.events.emit(SessionEvent::StreamingStarted {
            name: name.to_string(),
            sink: sink.path().to_path_buf(),
        });

        loop {
            let chunk = reader.read_chunk(self.chunk_size).await?;
            if chunk.is_empty() {
                let received = accumulator.received();
                warn!("Stream interrupted: {} after {} bytes", name, received);
                self.events.emit(SessionEvent::StreamInterrupted { received });
                return Err(Error::StreamInterrupted { received });
            }

            let step = accumulator.feed(&chunk);
            if !step.payload.is_empty() {
                sink.write(&step.payload).await?;
                stats.record_chunk(&step.payload);
            }

            if let Some(trailing) = step.complete {
                reader.unread(&trailing);
                let sink_path = sink.path().to_path_buf();
                let media = sink.finish().await?;

                info!("Stream ended: {} {}", name, stats.summary());
                if step.playback {
                    self.events.emit(SessionEvent::PlaybackReady {
                        sink: sink_path.clone(),
                    });
                }
                self.events.emit(SessionEvent::TransferComplete {
                    sink: sink_path,
                    bytes: stats.total_bytes,
                    crc32: stats.crc32(),
                });

                return Ok(ReceiveOutcome {
                    media,
                    bytes: stats.total_bytes,
                    crc32: stats.crc32(),
                });
            }

            self.events.emit(SessionEvent::BytesReceived {
                total: accumulator.received(),
            });

            if step.playback {
                debug!("playback threshold reached at {} bytes", accumulator.received());
                self.events.emit(SessionEvent::PlaybackReady {
                    sink: sink.path().to_path_buf(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use tokio::io::AsyncWriteExt;

    fn feed_all(acc: &mut ReceiveAccumulator, parts: &[&[u8]]) -> (Vec<u8>, usize, Option<Bytes>) {
        let mut sink = Vec::new();
        let mut completions = 0;
        let mut trailing = None;
        for part in parts {
            let step = acc.feed(part);
            sink.extend_from_slice(&step.payload);
            if let Some(rest) = step.complete {
                completions += 1;
                trailing = Some(rest);
                break;
            }
        }
        (sink, completions, trailing)
    }

    #[test]
    fn test_sentinel_in_single_chunk() {
        let mut acc = ReceiveAccumulator::new(u64::MAX);
        let (sink, completions, trailing) = feed_all(&mut acc, &[b"movie bytesSTREAM_END#MOVIES:a#"]);

        assert_eq!(sink, b"movie bytes");
        assert_eq!(completions, 1);
        assert_eq!(trailing.as_deref(), Some(&b"MOVIES:a#"[..]));
        assert_eq!(acc.received(), 11);
    }

    #[test]
    fn test_sentinel_split_at_every_boundary() {
        let payload: Vec<u8> = (0..200u32).map(|i| (i % 251) as u8).collect();
        let mut stream = payload.clone();
        stream.extend_from_slice(SENTINEL);

        // 두 조각
        for cut in 1..stream.len() {
            let mut acc = ReceiveAccumulator::new(u64::MAX);
            let (sink, completions, trailing) =
                feed_all(&mut acc, &[&stream[..cut], &stream[cut..]]);
            assert_eq!(sink, payload, "cut at {cut}");
            assert_eq!(completions, 1);
            assert_eq!(trailing.as_deref(), Some(&b""[..]));
        }

        // 센티널 안쪽을 세 조각으로
        let start = payload.len();
        for a in start..stream.len() {
            for b in a + 1..stream.len() {
                let mut acc = ReceiveAccumulator::new(u64::MAX);
                let (sink, completions, _) =
                    feed_all(&mut acc, &[&stream[..a], &stream[a..b], &stream[b..]]);
                assert_eq!(sink, payload, "cuts at {a}, {b}");
                assert_eq!(completions, 1);
            }
        }

        // 1바이트씩 N 조각
        let parts: Vec<&[u8]> = stream.chunks(1).collect();
        let mut acc = ReceiveAccumulator::new(u64::MAX);
        let (sink, completions, _) = feed_all(&mut acc, &parts);
        assert_eq!(sink, payload);
        assert_eq!(completions, 1);
    }

    #[test]
    fn test_false_prefix_is_released() {
        let mut acc = ReceiveAccumulator::new(u64::MAX);

        let step = acc.feed(b"dataSTREAM_");
        assert_eq!(&step.payload[..], b"data");
        assert_eq!(acc.pending(), 7);

        let step = acc.feed(b"ENDING.");
        assert_eq!(&step.payload[..], b"STREAM_ENDING.");
        assert!(step.complete.is_none());
        assert_eq!(acc.pending(), 0);
        assert_eq!(acc.received(), 18);
    }

    #[test]
    fn test_threshold_fires_once() {
        let mut acc = ReceiveAccumulator::new(100);
        let chunk = [0u8; 30];

        let fired: Vec<bool> = (0..6).map(|_| acc.feed(&chunk).playback).collect();
        assert_eq!(fired, vec![false, false, false, true, false, false]);

        // 경계와 정확히 같을 때
        let mut acc = ReceiveAccumulator::new(90);
        let fired: Vec<bool> = (0..4).map(|_| acc.feed(&chunk).playback).collect();
        assert_eq!(fired, vec![false, false, true, false]);

        // 임계치 이후 완료 시 재신호 없음
        let step = acc.feed(SENTINEL);
        assert!(step.complete.is_some());
        assert!(!step.playback);
    }

    #[test]
    fn test_threshold_counts_held_back_tail() {
        let mut acc = ReceiveAccumulator::new(100);

        // 임계치에 닿는 청크가 센티널 접두사로 끝남
        let mut chunk = vec![0u8; 99];
        chunk.push(b'S');
        let step = acc.feed(&chunk);
        assert!(step.playback);
        assert_eq!(acc.received(), 99);
        assert_eq!(acc.pending(), 1);

        assert!(!acc.feed(b"ome more").playback);
        assert_eq!(acc.received(), 108);
    }

    #[test]
    fn test_small_transfer_plays_on_completion() {
        let mut acc = ReceiveAccumulator::new(1000);
        assert!(!acc.feed(b"tiny").playback);
        let step = acc.feed(b" fileSTREAM_END#");
        assert!(step.playback);
        assert!(step.complete.is_some());
    }

    #[tokio::test]
    async fn test_receive_into_sink() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            chunk_size: 64,
            playback_threshold: 256,
            download_dir: Some(dir.path().to_path_buf()),
            ..Config::default()
        };
        let events = MemorySink::new();
        let receiver = StreamReceiver::new(&config, &events);

        let payload: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 256) as u8).collect();
        let (mut tx, rx) = tokio::io::duplex(128);
        let mut reader = FrameReader::new(rx);

        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            for part in expected.chunks(100) {
                tx.write_all(part).await.unwrap();
            }
            tx.write_all(b"STREAM_END#ERROR:after#").await.unwrap();
            tx
        });

        let outcome = receiver.receive("a.mkv", &mut reader).await.unwrap();
        assert_eq!(outcome.bytes, 1000);
        assert_eq!(outcome.crc32, crc32fast::hash(&payload));
        assert_eq!(outcome.media.path().extension().unwrap(), "mkv");
        assert_eq!(tokio::fs::read(outcome.media.path()).await.unwrap(), payload);

        // 센티널 뒤 프레임은 제어 모드로 돌아감
        assert_eq!(reader.receive().await.unwrap().as_deref(), Some("ERROR:after"));
        drop(writer.await.unwrap());

        assert_eq!(
            events.count(|e| matches!(e, SessionEvent::PlaybackReady { .. })),
            1
        );
        assert_eq!(
            events.count(|e| matches!(e, SessionEvent::TransferComplete { bytes: 1000, .. })),
            1
        );

        // drop 시 임시 파일 정리
        let path = outcome.media.path().to_path_buf();
        drop(outcome);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_interrupted_stream_discards_sink() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            chunk_size: 64,
            download_dir: Some(dir.path().to_path_buf()),
            ..Config::default()
        };
        let events = MemorySink::new();
        let receiver = StreamReceiver::new(&config, &events);

        let (mut tx, rx) = tokio::io::duplex(1024);
        tx.write_all(&[1u8; 300]).await.unwrap();
        tx.write_all(b"STREAM_E").await.unwrap();
        drop(tx);

        let mut reader = FrameReader::new(rx);
        let err = receiver.receive("b.mp4", &mut reader).await.unwrap_err();
        assert!(matches!(err, Error::StreamInterrupted { received: 300 }));

        let sink_path = events
            .events()
            .into_iter()
            .find_map(|e| match e {
                SessionEvent::StreamingStarted { sink, .. } => Some(sink),
                _ => None,
            })
            .unwrap();
        assert!(!sink_path.exists());
        assert_eq!(
            events.count(|e| matches!(e, SessionEvent::TransferComplete { .. })),
            0
        );
    }

    #[tokio::test]
    async fn test_keep_persists_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = MediaSink::create(Some(dir.path()), "c.webm").unwrap();
        sink.write(b"abc").await.unwrap();
        assert_eq!(sink.written(), 3);

        let kept = sink.finish().await.unwrap().keep().unwrap();
        assert!(kept.exists());
        assert_eq!(std::fs::read(&kept).unwrap(), b"abc");
    }
}
