//! 서버 (송신자)
//!
//! - 연결마다 하나의 태스크, accept 루프가 `JoinSet` 으로 소유
//! - `CancellationToken` 으로 종료 시 모든 연결 태스크를 취소 후 join
//! - 연결 간 공유 세션 상태 없음 (레지스트리는 관찰용)

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::{send_message, FrameReader};
use crate::events::{EventSink, SessionEvent};
use crate::library::MediaLibrary;
use crate::message::ControlMessage;
use crate::sender::TransferSession;
use crate::session::{SessionState, StateMachine};
use crate::{Config, Error, Result};

/// 활성 연결 레지스트리 (연결 ID → 피어 주소)
///
/// 연결 태스크 종료 시 제거됨. 종료 로그와 외부 관찰용
pub type ConnectionRegistry = Arc<DashMap<u64, SocketAddr>>;

/// 미디어 서버
pub struct Server {
    config: Arc<Config>,
    library: Arc<MediaLibrary>,
    listener: TcpListener,
    events: Arc<dyn EventSink>,
    connections: ConnectionRegistry,
}

impl Server {
    /// 설정 검증 후 바인딩
    pub async fn bind(config: Config, events: Arc<dyn EventSink>) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);
        info!("Media directory: {:?}", config.media_dir);
        info!("Cancel policy: {:?}", config.cancel_policy);

        Ok(Self {
            library: Arc::new(MediaLibrary::from_config(&config)),
            config: Arc::new(config),
            listener,
            events,
            connections: Arc::new(DashMap::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// 활성 연결 레지스트리
    pub fn connections(&self) -> ConnectionRegistry {
        self.connections.clone()
    }

    /// accept 루프
    ///
    /// `shutdown` 이 취소되면 새 연결을 받지 않고 기존 연결 태스크를 모두 취소/join 후 반환
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let mut tasks = JoinSet::new();
        let mut next_id = 0u64;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        next_id += 1;
                        let id = next_id;
                        self.connections.insert(id, peer);

                        let connection = Connection {
                            peer,
                            config: self.config.clone(),
                            library: self.library.clone(),
                            events: self.events.clone(),
                            token: shutdown.child_token(),
                        };
                        let registry = self.connections.clone();

                        tasks.spawn(async move {
                            let result = connection.serve(stream).await;
                            registry.remove(&id);
                            (peer, result)
                        });
                    }
                    Err(e) => {
                        // 프로세스 fd 고갈 등: 잠시 쉬고 계속 accept
                        warn!("accept error: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    log_connection_end(joined);
                }
            }
        }

        info!(
            "Server shutting down, {} connection(s) open",
            self.connections.len()
        );
        for entry in self.connections.iter() {
            debug!("closing connection #{} ({})", entry.key(), entry.value());
        }
        while let Some(joined) = tasks.join_next().await {
            log_connection_end(joined);
        }
        info!("Server stopped");
        Ok(())
    }
}

fn log_connection_end(joined: std::result::Result<(SocketAddr, Result<()>), tokio::task::JoinError>) {
    match joined {
        Ok((peer, Ok(()))) => debug!("connection task finished: {}", peer),
        Ok((peer, Err(e))) => info!("Connection {} closed: {}", peer, e),
        Err(e) => error!("connection task failed: {}", e),
    }
}

/// 연결 하나의 서버측 세션
struct Connection {
    peer: SocketAddr,
    config: Arc<Config>,
    library: Arc<MediaLibrary>,
    events: Arc<dyn EventSink>,
    token: CancellationToken,
}

impl Connection {
    async fn serve(self, stream: TcpStream) -> Result<()> {
        let mut state = StateMachine::new(format!("server {}", self.peer));
        state.transition(SessionState::Handshake);

        info!("Client connected: {}", self.peer);
        self.events.emit(SessionEvent::ClientConnected { peer: self.peer });

        stream.set_nodelay(true)?;
        let (read_half, mut writer) = stream.into_split();
        let mut reader = FrameReader::from_config(read_half, &self.config);

        let result = self.session(&mut state, &mut reader, &mut writer).await;

        if result.is_ok() {
            state.transition(SessionState::Closed);
        } else {
            state.fail();
        }
        let _ = writer.shutdown().await;

        info!("Client disconnected: {}", self.peer);
        self.events.emit(SessionEvent::ClientDisconnected { peer: self.peer });
        result
    }

    async fn session(
        &self,
        state: &mut StateMachine,
        reader: &mut FrameReader<OwnedReadHalf>,
        writer: &mut OwnedWriteHalf,
    ) -> Result<()> {
        self.handshake(writer).await?;
        state.transition(SessionState::Ready);

        // 전송 중 취소 확인 과정에서 미뤄진 프레임
        let mut pending: VecDeque<String> = VecDeque::new();

        loop {
            if self.token.is_cancelled() {
                return Ok(());
            }

            let text = match pending.pop_front() {
                Some(text) => text,
                None => {
                    let received = tokio::select! {
                        _ = self.token.cancelled() => {
                            debug!("connection {} cancelled by shutdown", self.peer);
                            return Ok(());
                        }
                        received = reader.receive() => received?,
                    };
                    match received {
                        Some(text) => text,
                        None => return Ok(()),
                    }
                }
            };

            match ControlMessage::parse(&text) {
                ControlMessage::Select(name) => {
                    let deferred = self.select(state, &name, reader, writer).await?;
                    pending.extend(deferred);
                }
                ControlMessage::StopStream => {
                    debug!("STOP_STREAM outside transfer ignored ({})", self.peer);
                }
                _ => {
                    self.events.emit(SessionEvent::Message { text: text.clone() });
                    send_message(writer, &ControlMessage::acknowledge(&text)).await?;
                }
            }
        }
    }

    /// 소스 목록 광고
    async fn handshake(&self, writer: &mut OwnedWriteHalf) -> Result<()> {
        let names = match self.library.list().await {
            Ok(names) => names,
            Err(e) => {
                warn!("cannot list {:?}: {}", self.library.root(), e);
                Vec::new()
            }
        };
        info!("Advertising {} source(s) to {}", names.len(), self.peer);
        send_message(writer, &ControlMessage::Movies(names)).await
    }

    /// `SELECT:<name>` 처리. 전송 중 미뤄진 프레임 반환
    async fn select(
        &self,
        state: &mut StateMachine,
        name: &str,
        reader: &mut FrameReader<OwnedReadHalf>,
        writer: &mut OwnedWriteHalf,
    ) -> Result<Vec<String>> {
        state.transition(SessionState::AwaitingSelection);

        let opened = match self.library.resolve(name).await {
            Ok(path) => TransferSession::open(name, &path, &self.config).await,
            Err(e) => Err(e),
        };

        let transfer = match opened {
            Ok(transfer) => transfer,
            Err(e @ Error::SelectionNotFound { .. }) | Err(e @ Error::Channel(_)) => {
                info!("Selection failed ({}): {}", self.peer, e);
                self.events.emit(SessionEvent::SelectionMissed {
                    name: name.to_string(),
                });
                send_message(writer, &ControlMessage::Error(format!("Movie not found: {}", name))).await?;
                state.transition(SessionState::Ready);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        info!(
            "Streaming {} ({} bytes) to {}",
            transfer.name(),
            transfer.size(),
            self.peer
        );
        send_message(writer, &ControlMessage::Streaming(name.to_string())).await?;
        state.transition(SessionState::Transferring);

        let outcome = tokio::select! {
            _ = self.token.cancelled() => {
                warn!("Transfer of {} to {} aborted by shutdown", name, self.peer);
                return Ok(Vec::new());
            }
            outcome = transfer.run(reader, writer, self.events.as_ref()) => outcome?,
        };

        state.transition(SessionState::Ready);
        Ok(outcome.deferred)
    }
}
