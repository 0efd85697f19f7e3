//! 제어 메시지 정의
//!
//! 모든 제어 프레임은 `PREFIX:payload` 형태의 텍스트이며 구분자 `#` 는 codec 에서 붙임

/// 소스 목록 구분자
pub const LIST_SEPARATOR: char = ';';

const MOVIES_PREFIX: &str = "MOVIES:";
const SELECT_PREFIX: &str = "SELECT:";
const STREAMING_PREFIX: &str = "STREAMING:";
const ERROR_PREFIX: &str = "ERROR:";
const STREAM_END: &str = "STREAM_END";
const STOP_STREAM: &str = "STOP_STREAM";

/// 통합 제어 메시지
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// 사용 가능한 소스 목록 (서버 → 클라이언트)
    Movies(Vec<String>),

    /// 전송 요청 (클라이언트 → 서버)
    Select(String),

    /// 전송 시작 알림, 직후부터 바이너리 모드 (서버 → 클라이언트)
    Streaming(String),

    /// 전송 완료 (서버 → 클라이언트)
    StreamEnd,

    /// 조기 취소 요청 (클라이언트 → 서버)
    StopStream,

    /// 선택 실패 (서버 → 클라이언트)
    Error(String),

    /// 일반 텍스트 (진단용 echo)
    Text(String),
}

impl ControlMessage {
    /// 프레임 텍스트 파싱
    ///
    /// 알려진 prefix 가 없으면 `Text` 로 취급하므로 실패하지 않음
    pub fn parse(text: &str) -> Self {
        if let Some(list) = text.strip_prefix(MOVIES_PREFIX) {
            let names = list
                .split(LIST_SEPARATOR)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
            ControlMessage::Movies(names)
        } else if let Some(name) = text.strip_prefix(SELECT_PREFIX) {
            ControlMessage::Select(name.to_string())
        } else if let Some(name) = text.strip_prefix(STREAMING_PREFIX) {
            ControlMessage::Streaming(name.to_string())
        } else if let Some(reason) = text.strip_prefix(ERROR_PREFIX) {
            ControlMessage::Error(reason.to_string())
        } else if text == STREAM_END {
            ControlMessage::StreamEnd
        } else if text == STOP_STREAM {
            ControlMessage::StopStream
        } else {
            ControlMessage::Text(text.to_string())
        }
    }

    /// 프레임 텍스트로 변환 (구분자 제외)
    pub fn encode(&self) -> String {
        match self {
            ControlMessage::Movies(names) => {
                let sep = LIST_SEPARATOR.to_string();
                format!("{}{}", MOVIES_PREFIX, names.join(&sep))
            }
            ControlMessage::Select(name) => format!("{}{}", SELECT_PREFIX, name),
            ControlMessage::Streaming(name) => format!("{}{}", STREAMING_PREFIX, name),
            ControlMessage::StreamEnd => STREAM_END.to_string(),
            ControlMessage::StopStream => STOP_STREAM.to_string(),
            ControlMessage::Error(reason) => format!("{}{}", ERROR_PREFIX, reason),
            ControlMessage::Text(text) => text.clone(),
        }
    }

    /// 일반 텍스트에 대한 길이 기반 응답
    pub fn acknowledge(text: &str) -> Self {
        ControlMessage::Text(format!(
            "Message received. Length: {}",
            text.chars().count()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_movies() {
        let msg = ControlMessage::parse("MOVIES:a.mkv;b.mp4;");
        assert_eq!(
            msg,
            ControlMessage::Movies(vec!["a.mkv".to_string(), "b.mp4".to_string()])
        );
        assert_eq!(ControlMessage::parse("MOVIES:"), ControlMessage::Movies(vec![]));
    }

    #[test]
    fn test_parse_keeps_colons_in_payload() {
        assert_eq!(
            ControlMessage::parse("ERROR:not found: x.mkv"),
            ControlMessage::Error("not found: x.mkv".to_string())
        );
        assert_eq!(
            ControlMessage::parse("SELECT:a:b.mkv"),
            ControlMessage::Select("a:b.mkv".to_string())
        );
    }

    #[test]
    fn test_sentinels_are_exact() {
        assert_eq!(ControlMessage::parse("STREAM_END"), ControlMessage::StreamEnd);
        assert_eq!(ControlMessage::parse("STOP_STREAM"), ControlMessage::StopStream);
        assert_eq!(
            ControlMessage::parse("STREAM_END now"),
            ControlMessage::Text("STREAM_END now".to_string())
        );
    }

    #[test]
    fn test_encode_matches_wire_vocabulary() {
        let movies = ControlMessage::Movies(vec!["a.mkv".into(), "b.mp4".into()]);
        assert_eq!(movies.encode(), "MOVIES:a.mkv;b.mp4");
        assert_eq!(ControlMessage::Select("a.mkv".into()).encode(), "SELECT:a.mkv");
        assert_eq!(ControlMessage::Streaming("a.mkv".into()).encode(), "STREAMING:a.mkv");
        assert_eq!(ControlMessage::StreamEnd.encode(), "STREAM_END");
        assert_eq!(ControlMessage::StopStream.encode(), "STOP_STREAM");
        assert_eq!(ControlMessage::Error("nope".into()).encode(), "ERROR:nope");
    }

    #[test]
    fn test_acknowledge_counts_chars() {
        assert_eq!(
            ControlMessage::acknowledge("hello"),
            ControlMessage::Text("Message received. Length: 5".to_string())
        );
        assert_eq!(
            ControlMessage::acknowledge("안녕"),
            ControlMessage::Text("Message received. Length: 2".to_string())
        );
    }
}
