//! 클라이언트 (수신자)
//!
//! 세션당 두 활동만 존재
//! - UI/플레이어 쪽: `ClientHandle` 이 쓰기 방향을 소유하고 사용자 의도를 제어 프레임으로 송신
//! - 백그라운드 수신 태스크: 읽기 방향을 소유 (codec + 수신 버퍼), 이벤트만 밀어 넣음

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::{send_message, FrameReader};
use crate::events::{EventSink, SessionEvent};
use crate::message::ControlMessage;
use crate::receiver::{ReceivedMedia, StreamReceiver};
use crate::session::{SessionState, StateMachine};
use crate::{send_frame, Config, Error, Result};

/// 접속된 클라이언트
pub struct Client {
    handle: ClientHandle,
    worker: JoinHandle<Result<()>>,
}

impl Client {
    /// 서버 접속 후 수신 태스크 시작
    pub async fn connect(config: Config, events: Arc<dyn EventSink>) -> Result<Self> {
        config.validate()?;

        let stream = TcpStream::connect(config.server_addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        info!("Connected to {}", peer);

        let (read_half, writer) = stream.into_split();
        let reader = FrameReader::from_config(read_half, &config);
        let worker = tokio::spawn(ReceiveLoop::new(config, events, reader).run());

        Ok(Self {
            handle: ClientHandle { writer, peer },
            worker,
        })
    }

    pub fn handle(&mut self) -> &mut ClientHandle {
        &mut self.handle
    }

    /// UI 쪽 핸들과 수신 태스크로 분리
    pub fn split(self) -> (ClientHandle, JoinHandle<Result<()>>) {
        (self.handle, self.worker)
    }

    /// 쓰기 방향을 닫고 수신 태스크 종료까지 대기
    pub async fn close(mut self) -> Result<()> {
        self.handle.shutdown().await;
        join_worker(self.worker).await
    }
}

/// 수신 태스크 결과 회수
pub async fn join_worker(worker: JoinHandle<Result<()>>) -> Result<()> {
    worker.await.map_err(|e| Error::Channel(io::Error::other(e)))?
}

/// UI 쪽 명령 송신 핸들
#[derive(Debug)]
pub struct ClientHandle {
    writer: OwnedWriteHalf,
    peer: SocketAddr,
}

impl ClientHandle {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// `SELECT:<name>`
    pub async fn select(&mut self, name: &str) -> Result<()> {
        info!("Selected movie: {}", name);
        send_message(&mut self.writer, &ControlMessage::Select(name.to_string())).await
    }

    /// `STOP_STREAM` (서버가 취소 가능 정책일 때만 효과 있음)
    pub async fn stop_stream(&mut self) -> Result<()> {
        send_message(&mut self.writer, &ControlMessage::StopStream).await
    }

    /// 일반 텍스트
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        send_frame(&mut self.writer, text).await
    }

    /// 쓰기 방향 종료 (서버는 disconnect 로 인식)
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!("shutdown: {}", e);
        }
    }
}

/// 백그라운드 수신 루프
struct ReceiveLoop {
    config: Config,
    events: Arc<dyn EventSink>,
    reader: FrameReader<OwnedReadHalf>,
    state: StateMachine,
    /// 마지막으로 완료된 수신 파일 (다음 전송 시작 또는 세션 종료 시 삭제)
    current: Option<ReceivedMedia>,
}

impl ReceiveLoop {
    fn new(config: Config, events: Arc<dyn EventSink>, reader: FrameReader<OwnedReadHalf>) -> Self {
        let mut state = StateMachine::new("client");
        state.transition(SessionState::Handshake);
        Self {
            config,
            events,
            reader,
            state,
            current: None,
        }
    }

    async fn run(mut self) -> Result<()> {
        let result = self.receive_frames().await;

        let reason = match &result {
            Ok(()) => {
                self.state.transition(SessionState::Closed);
                "Disconnected from server.".to_string()
            }
            Err(e) => {
                self.state.fail();
                e.to_string()
            }
        };
        self.events.emit(SessionEvent::Closed { reason });
        result
    }

    async fn receive_frames(&mut self) -> Result<()> {
        loop {
            let Some(text) = self.reader.receive().await? else {
                return Ok(());
            };

            match ControlMessage::parse(&text) {
                ControlMessage::Movies(names) => {
                    info!("{} movie(s) available", names.len());
                    if self.state.state() == SessionState::Handshake {
                        self.state.transition(SessionState::Ready);
                    }
                    self.events.emit(SessionEvent::MoviesListed { names });
                }
                ControlMessage::Streaming(name) => {
                    self.stream(&name).await?;
                }
                ControlMessage::Error(reason) => {
                    warn!("Server error: {}", reason);
                    self.state.transition(SessionState::Ready);
                    self.events.emit(SessionEvent::ServerError { reason });
                }
                ControlMessage::StreamEnd => {
                    debug!("stray STREAM_END outside transfer");
                }
                _ => {
                    self.events.emit(SessionEvent::Message { text });
                }
            }
        }
    }

    /// 바이너리 모드: 센티널까지 수신 후 제어 모드 복귀
    async fn stream(&mut self, name: &str) -> Result<()> {
        self.state.transition(SessionState::Transferring);
        // 이전 전송 파일 정리
        self.current = None;

        let receiver = StreamReceiver::new(&self.config, self.events.as_ref());
        let outcome = receiver.receive(name, &mut self.reader).await?;

        if self.config.keep_downloads {
            let kept = outcome.media.keep()?;
            info!("Kept {} at {:?}", name, kept);
        } else {
            self.current = Some(outcome.media);
        }

        self.state.transition(SessionState::Ready);
        Ok(())
    }
}
