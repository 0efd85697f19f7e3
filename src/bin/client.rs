//! HMS 클라이언트 (수신자)
//!
//! 콘솔 UI: 서버의 목록을 보여주고 선택한 파일을 수신.
//! 수신량이 임계치를 넘으면 `--player` 로 지정한 외부 플레이어를 실행
//!
//! 사용법:
//!   cargo run --release --bin hms-client -- [OPTIONS]
//!
//! 명령:
//!   list             목록 다시 출력
//!   select <name>    파일 선택 (목록 번호도 가능)
//!   stop             진행 중인 전송 취소 요청
//!   quit             종료
//!   (그 외)          일반 텍스트 메시지로 전송

use std::io::BufRead;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::Arc;
use std::thread;

use clap::Parser;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use hms::client::join_worker;
use hms::events::FanoutSink;
use hms::{ChannelSink, Client, ClientHandle, Config, EventSink, SessionEvent, TracingSink};

/// HMS Client - 하이브리드 미디어 스트림 수신 클라이언트
#[derive(Debug, Parser)]
#[command(name = "hms-client", version)]
struct Args {
    /// 서버 주소
    #[arg(short, long, default_value = hms::DEFAULT_SERVER_ADDR)]
    server: SocketAddr,

    /// 재생 시작 임계치 (바이트, 기본 50MB / --low-memory 8MB)
    #[arg(long)]
    threshold: Option<u64>,

    /// 저사양 설정 (작은 수신 청크, 낮은 임계치)
    #[arg(long)]
    low_memory: bool,

    /// 임계치 도달 시 실행할 플레이어 (수신 파일 경로가 인자로 붙음)
    #[arg(long, value_name = "CMD")]
    player: Option<String>,

    /// 수신 파일 저장 디렉터리 (기본: OS 임시 디렉터리)
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// 수신 완료 파일을 종료 후에도 보존
    #[arg(long)]
    keep: bool,

    /// debug 로그 출력
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn to_config(&self) -> Config {
        let base = if self.low_memory {
            Config::low_memory()
        } else {
            Config::default()
        };
        Config {
            server_addr: self.server,
            playback_threshold: self.threshold.unwrap_or(base.playback_threshold),
            download_dir: self.download_dir.clone(),
            keep_downloads: self.keep,
            ..base
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// 외부 플레이어 프로세스
struct Player {
    command: Option<String>,
    child: Option<Child>,
}

impl Player {
    fn new(command: Option<String>) -> Self {
        Self { command, child: None }
    }

    fn start(&mut self, media: &Path) {
        let Some(command) = self.command.clone() else {
            println!("Ready to play: {}", media.display());
            return;
        };
        self.stop();
        match Command::new(&command).arg(media).spawn() {
            Ok(child) => {
                info!("Player started (pid {})", child.id());
                self.child = Some(child);
            }
            Err(e) => warn!("Failed to start player {:?}: {}", command, e),
        }
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!("player kill: {}", e);
            }
            let _ = child.wait();
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

fn print_movies(names: &[String]) {
    if names.is_empty() {
        println!("No movies available.");
        return;
    }
    println!("Available movies:");
    for (i, name) in names.iter().enumerate() {
        println!("  {}. {}", i + 1, name);
    }
}

/// UI 스레드: 이벤트 출력 + 플레이어 제어
fn ui_loop(events: Receiver<SessionEvent>, movies: Arc<Mutex<Vec<String>>>, mut player: Player) {
    for event in events {
        match event {
            SessionEvent::MoviesListed { names } => {
                print_movies(&names);
                *movies.lock() = names;
            }
            SessionEvent::StreamingStarted { name, .. } => {
                player.stop();
                println!("Streaming {}...", name);
            }
            SessionEvent::BytesReceived { total } => {
                debug!("received {} bytes", total);
            }
            SessionEvent::PlaybackReady { sink } => {
                player.start(&sink);
            }
            SessionEvent::TransferComplete { sink, bytes, crc32 } => {
                println!(
                    "Transfer complete: {} bytes (crc32 {:08x}) -> {}",
                    bytes,
                    crc32,
                    sink.display()
                );
            }
            SessionEvent::StreamInterrupted { received } => {
                player.stop();
                println!("Stream interrupted after {} bytes.", received);
            }
            SessionEvent::ServerError { reason } => {
                println!("Server error: {}", reason);
            }
            SessionEvent::Message { text } => {
                println!("Server: {}", text);
            }
            SessionEvent::Closed { reason } => {
                player.stop();
                println!("{}", reason);
            }
            other => debug!("{:?}", other),
        }
    }
}

/// 입력 한 줄 처리. false 면 종료
async fn handle_command(
    line: &str,
    handle: &mut ClientHandle,
    movies: &Mutex<Vec<String>>,
) -> hms::Result<bool> {
    let line = line.trim();
    let (command, arg) = match line.split_once(' ') {
        Some((command, arg)) => (command, arg.trim()),
        None => (line, ""),
    };

    match command {
        "" => {}
        "quit" | "exit" => return Ok(false),
        "list" => print_movies(&movies.lock()),
        "stop" => handle.stop_stream().await?,
        "select" if !arg.is_empty() => {
            // 번호 선택 지원
            let name = match arg.parse::<usize>() {
                Ok(n) if n >= 1 => movies.lock().get(n - 1).cloned(),
                _ => None,
            }
            .unwrap_or_else(|| arg.to_string());
            handle.select(&name).await?;
        }
        _ => handle.send_text(line).await?,
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = args.to_config();
    info!("Connecting to {}", config.server_addr);

    let (sink, events) = ChannelSink::new();
    // UI 채널 + 로그 (-v 일 때 보임)
    let sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(sink), Arc::new(TracingSink)];
    let client = Client::connect(config, Arc::new(FanoutSink::new(sinks))).await?;
    let (mut handle, mut worker) = client.split();
    println!("Connected to {}", handle.peer());

    let movies = Arc::new(Mutex::new(Vec::new()));
    let ui = {
        let movies = movies.clone();
        let player = Player::new(args.player.clone());
        thread::spawn(move || ui_loop(events, movies, player))
    };

    // stdin 은 별도 스레드에서 읽음 (종료 시 join 하지 않음)
    let (line_tx, mut lines) = mpsc::unbounded_channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });
    let mut worker_done = false;

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                match handle_command(&line, &mut handle, &movies).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) if !e.is_terminal() => println!("Cannot send: {}", e),
                    Err(e) => {
                        warn!("Send failed: {}", e);
                        break;
                    }
                }
            }
            result = &mut worker => {
                worker_done = true;
                if let Ok(Err(e)) = result {
                    warn!("Session ended: {}", e);
                }
                break;
            }
        }
    }

    handle.shutdown().await;
    if !worker_done {
        if let Err(e) = join_worker(worker).await {
            warn!("Session ended: {}", e);
        }
    }

    if ui.join().is_err() {
        warn!("UI thread panicked");
    }
    Ok(())
}
