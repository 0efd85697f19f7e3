//! 세션 상태 머신
//!
//! ```text
//! Idle → Handshake → Ready ⇄ AwaitingSelection → Transferring → Ready … → Closed
//!                  (어느 상태에서든) → Error → Closed
//! ```

use std::fmt;

use tracing::{debug, warn};

/// 연결당 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 연결 전
    Idle,

    /// 연결 직후, 소스 목록 교환 중
    Handshake,

    /// 제어 프레임 대기
    Ready,

    /// `SELECT` 처리 중 (서버: 소스 검증, 클라이언트: 응답 대기)
    AwaitingSelection,

    /// 바이너리 전송 중
    Transferring,

    /// 채널 에러 또는 연결 끊김
    Error,

    /// 채널 해제 완료
    Closed,
}

impl SessionState {
    /// 허용된 전이인지 여부
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Error) | (_, Closed) => true,
            (Idle, Handshake) => true,
            (Handshake, Ready) => true,
            (Ready, AwaitingSelection) => true,
            (AwaitingSelection, Ready) => true,
            (Ready, Transferring) | (AwaitingSelection, Transferring) => true,
            (Transferring, Ready) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Error | SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "IDLE",
            SessionState::Handshake => "HANDSHAKE",
            SessionState::Ready => "READY",
            SessionState::AwaitingSelection => "AWAITING_SELECTION",
            SessionState::Transferring => "TRANSFERRING",
            SessionState::Error => "ERROR",
            SessionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// 상태 추적기 (로그용 라벨 포함)
#[derive(Debug)]
pub struct StateMachine {
    label: String,
    state: SessionState,
}

impl StateMachine {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 상태 전이. 허용되지 않은 전이는 무시하고 false 반환
    pub fn transition(&mut self, next: SessionState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_transition_to(next) {
            warn!("[{}] invalid transition {} -> {}", self.label, self.state, next);
            return false;
        }
        debug!("[{}] {} -> {}", self.label, self.state, next);
        self.state = next;
        true
    }

    /// Error 를 거쳐 Closed 로
    pub fn fail(&mut self) {
        self.transition(SessionState::Error);
        self.transition(SessionState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut sm = StateMachine::new("test");
        for next in [
            SessionState::Handshake,
            SessionState::Ready,
            SessionState::AwaitingSelection,
            SessionState::Ready,
            SessionState::AwaitingSelection,
            SessionState::Transferring,
            SessionState::Ready,
            SessionState::Transferring,
            SessionState::Ready,
            SessionState::Closed,
        ] {
            assert!(sm.transition(next), "-> {next}");
        }
        assert_eq!(sm.state(), SessionState::Closed);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut sm = StateMachine::new("test");
        assert!(!sm.transition(SessionState::Transferring));
        assert_eq!(sm.state(), SessionState::Idle);

        sm.transition(SessionState::Handshake);
        assert!(!sm.transition(SessionState::AwaitingSelection));
    }

    #[test]
    fn test_fail_from_any_state() {
        for start in [SessionState::Handshake, SessionState::Ready, SessionState::Transferring] {
            assert!(start.can_transition_to(SessionState::Error));
        }

        let mut sm = StateMachine::new("test");
        sm.transition(SessionState::Handshake);
        sm.fail();
        assert_eq!(sm.state(), SessionState::Closed);
        assert!(sm.state().is_terminal());
        assert!(!sm.transition(SessionState::Ready));
    }
}
