//! 에러 타입 정의

use thiserror::Error;

/// HMS 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    /// 연결 또는 로컬 파일 I/O 실패
    #[error("채널 에러: {0}")]
    Channel(#[from] std::io::Error),

    /// 상대방이 연결을 정상 종료함 (0바이트 read)
    #[error("연결 종료")]
    Disconnected,

    #[error("요청한 소스 없음: {name}")]
    SelectionNotFound { name: String },

    /// 센티널 없이 바이너리 전송이 끊김
    #[error("스트림 중단: {received} bytes 수신 후 연결 끊김")]
    StreamInterrupted { received: u64 },

    #[error("제어 프레임에 구분자 포함: {0:?}")]
    DelimiterInPayload(String),

    #[error("프레임 길이 초과: 최대 크기 {max_size} 초과")]
    FrameTooLarge { max_size: usize },

    #[error("UTF-8 디코딩 에러: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("잘못된 설정: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// 세션을 종료시키는 에러인지 여부
    ///
    /// `SelectionNotFound` 와 송신 전 거부된 `DelimiterInPayload` 만 복구 가능,
    /// 나머지는 연결을 정리해야 함
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Error::SelectionNotFound { .. } | Error::DelimiterInPayload(_)
        )
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
