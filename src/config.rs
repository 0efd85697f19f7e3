//! 프로토콜 설정

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::{
    Error, Result, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FRAME_LEN, DEFAULT_PLAYBACK_THRESHOLD,
    DEFAULT_PORT, DEFAULT_RECV_INCREMENT, SENTINEL,
};

/// 전송 중 취소 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelPolicy {
    /// 파일 끝까지 무조건 전송
    #[default]
    NonCancellable,

    /// 청크마다 `STOP_STREAM` 을 non-blocking 으로 확인
    Cancellable,
}

/// HMS 설정
///
/// 서버/클라이언트/전송 엔진 생성 시 명시적으로 전달됨
#[derive(Debug, Clone)]
pub struct Config {
    /// 서버 바인드 주소
    pub bind_addr: SocketAddr,

    /// 클라이언트 접속 주소
    pub server_addr: SocketAddr,

    /// 서버 미디어 디렉터리
    pub media_dir: PathBuf,

    /// 전송 청크 크기 (바이트)
    pub chunk_size: usize,

    /// 제어 프레임 수신 단위 (바이트)
    pub recv_increment: usize,

    /// 제어 프레임 최대 길이 (바이트)
    pub max_frame_len: usize,

    /// 재생 시작 임계치 (바이트)
    pub playback_threshold: u64,

    /// 취소 정책
    pub cancel_policy: CancelPolicy,

    /// 허용 확장자 (소문자, 점 제외)
    pub extensions: Vec<String>,

    /// 수신 파일 저장 디렉터리 (None 이면 OS 임시 디렉터리)
    pub download_dir: Option<PathBuf>,

    /// 수신 완료 파일을 세션 종료 후에도 남길지 여부
    pub keep_downloads: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            server_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            media_dir: PathBuf::from("movies"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            recv_increment: DEFAULT_RECV_INCREMENT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            playback_threshold: DEFAULT_PLAYBACK_THRESHOLD,
            cancel_policy: CancelPolicy::NonCancellable,
            extensions: ["mp4", "mkv", "avi", "mov", "webm", "mp3", "wav"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            download_dir: None,
            keep_downloads: false,
        }
    }
}

impl Config {
    /// 취소 가능한 스트리밍 설정
    pub fn cancellable() -> Self {
        Self {
            cancel_policy: CancelPolicy::Cancellable,
            ..Self::default()
        }
    }

    /// 저사양 클라이언트용 설정
    pub fn low_memory() -> Self {
        Self {
            chunk_size: 256 * 1024,                 // 256KB
            playback_threshold: 8 * 1024 * 1024,    // 8MB
            max_frame_len: 16 * 1024,
            ..Self::default()
        }
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be non-zero".into()));
        }
        if self.recv_increment == 0 {
            return Err(Error::InvalidConfig("recv_increment must be non-zero".into()));
        }
        // 센티널이 한 프레임 안에 들어가야 함
        if self.max_frame_len < SENTINEL.len() {
            return Err(Error::InvalidConfig(format!(
                "max_frame_len must be at least {} bytes",
                SENTINEL.len()
            )));
        }
        if self.extensions.is_empty() {
            return Err(Error::InvalidConfig("extension allow-list is empty".into()));
        }
        Ok(())
    }
}
