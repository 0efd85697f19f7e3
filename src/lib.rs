//! # HMS (Hybrid Media Stream)
//!
//! 단일 TCP 연결 위에서 텍스트 제어 프레임과 바이너리 전송을 함께 다루는 미디어 배포 프로토콜
//!
//! ## 핵심 특징
//! - **구분자 프레이밍**: 제어 메시지는 `#` 으로 끝나는 UTF-8 텍스트
//! - **모드 전환**: `STREAMING:` 이후부터 `STREAM_END#` 까지는 raw 바이너리
//! - **청크 전송**: 1MB 단위 순차 전송, 선택적 `STOP_STREAM` 취소
//! - **점진 재생**: 누적 수신량이 임계치를 넘으면 전송 완료 전에 재생 시작
//! - **연결당 태스크**: 서버는 연결마다 하나의 워커, 종료 시 모두 join

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod library;
pub mod message;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod session;
pub mod stats;

pub use client::{Client, ClientHandle};
pub use codec::{send_frame, FrameReader};
pub use config::{CancelPolicy, Config};
pub use error::{Error, Result};
pub use events::{ChannelSink, EventSink, MemorySink, SessionEvent, TracingSink};
pub use library::MediaLibrary;
pub use message::ControlMessage;
pub use receiver::{MediaSink, ReceiveAccumulator, ReceiveOutcome, ReceivedMedia, StreamReceiver};
pub use sender::{TransferOutcome, TransferSession};
pub use server::Server;
pub use session::SessionState;
pub use stats::TransferStats;

/// 제어 프레임 구분자
pub const DELIMITER: u8 = b'#';

/// 전송 완료 센티널 (구분자 포함, 바이너리 스트림 안에서 탐색되는 형태)
pub const SENTINEL: &[u8] = b"STREAM_END#";

/// 기본 전송 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024; // 1MB

/// 제어 프레임 수신 단위 (바이트)
pub const DEFAULT_RECV_INCREMENT: usize = 1024; // 1KB

/// 제어 프레임 최대 길이 (바이트)
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024; // 64KB

/// 재생 시작 임계치 (바이트)
pub const DEFAULT_PLAYBACK_THRESHOLD: u64 = 50 * 1024 * 1024; // 50MB

/// 기본 포트
pub const DEFAULT_PORT: u16 = 8080;

/// 서버 기본 바인드 주소
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// 클라이언트 기본 접속 주소
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:8080";
