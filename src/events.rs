//! 세션 이벤트
//!
//! 코어는 UI/로깅 계층에 의존하지 않고 `EventSink` 로 구조화된 이벤트만 밀어 넣음.
//! `emit` 은 절대 블로킹하면 안 됨 (수신 워커가 UI 를 기다리지 않도록)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// 세션 이벤트
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    // ── 서버측 ──────────────────────────────────────────────
    /// 클라이언트 접속
    ClientConnected { peer: SocketAddr },

    /// 존재하지 않는 소스 선택
    SelectionMissed { name: String },

    /// 전송 시작
    TransferStarted { name: String, size: u64 },

    /// 청크 전송 진행
    TransferProgress { name: String, bytes_sent: u64 },

    /// 전송 종료 (완료 또는 취소)
    TransferFinished {
        name: String,
        bytes_sent: u64,
        cancelled: bool,
        crc32: u32,
    },

    /// 클라이언트 접속 종료
    ClientDisconnected { peer: SocketAddr },

    // ── 클라이언트측 ────────────────────────────────────────
    /// 서버가 광고한 소스 목록
    MoviesListed { names: Vec<String> },

    /// 바이너리 수신 모드 진입
    StreamingStarted { name: String, sink: PathBuf },

    /// 누적 수신량
    BytesReceived { total: u64 },

    /// 임계치 도달, 부분 파일로 재생 시작 가능 (전송당 한 번)
    PlaybackReady { sink: PathBuf },

    /// 센티널 수신, 전송 완료
    TransferComplete {
        sink: PathBuf,
        bytes: u64,
        crc32: u32,
    },

    /// 센티널 없이 연결 끊김. 플레이어는 정지해야 함
    StreamInterrupted { received: u64 },

    /// 서버 `ERROR:` 응답
    ServerError { reason: String },

    // ── 공통 ────────────────────────────────────────────────
    /// 일반 텍스트 메시지
    Message { text: String },

    /// 세션 종료 사유 (정보성)
    Closed { reason: String },
}

/// 이벤트 구독 인터페이스
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, event: SessionEvent) {
        (**self).emit(event)
    }
}

/// tracing 로그로 이벤트 출력
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: SessionEvent) {
        match &event {
            SessionEvent::TransferProgress { .. } | SessionEvent::BytesReceived { .. } => {
                debug!("{:?}", event)
            }
            SessionEvent::StreamInterrupted { .. } | SessionEvent::ServerError { .. } => {
                warn!("{:?}", event)
            }
            _ => info!("{:?}", event),
        }
    }
}

/// 무제한 채널로 이벤트 전달 (UI 스레드용, append-only)
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<SessionEvent>,
}

impl ChannelSink {
    /// 싱크와 UI 쪽 수신기 생성
    pub fn new() -> (Self, Receiver<SessionEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: SessionEvent) {
        // UI 가 먼저 종료되었으면 버림
        let _ = self.tx.send(event);
    }
}

/// 메모리에 이벤트 기록 (테스트/진단용)
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<SessionEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 지금까지 기록된 이벤트 복사본
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    /// 조건에 맞는 이벤트 개수
    pub fn count(&self, predicate: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: SessionEvent) {
        self.events.lock().push(event);
    }
}

/// 여러 싱크로 동시에 전달
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: SessionEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}
