//! HMS 서버 (송신자)
//!
//! 미디어 디렉터리의 파일 목록을 접속한 클라이언트에게 알리고,
//! 선택된 파일을 같은 TCP 연결 위에서 raw 바이너리로 전송
//!
//! 사용법:
//!   cargo run --release --bin hms-server -- [OPTIONS]
//!
//! 예시:
//!   # 기본 (0.0.0.0:8080, ./movies)
//!   cargo run --release --bin hms-server
//!
//!   # STOP_STREAM 으로 취소 가능한 전송
//!   cargo run --release --bin hms-server -- --dir /srv/media --cancellable

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hms::{Config, Server, TracingSink};

/// HMS Server - 단일 TCP 연결 위 하이브리드 미디어 전송 서버
#[derive(Debug, Parser)]
#[command(name = "hms-server", version)]
struct Args {
    /// 바인드 주소
    #[arg(short, long, default_value = hms::DEFAULT_BIND_ADDR)]
    bind: SocketAddr,

    /// 미디어 디렉터리
    #[arg(short, long, default_value = "movies")]
    dir: PathBuf,

    /// STOP_STREAM 으로 진행 중인 전송 취소 허용
    #[arg(long)]
    cancellable: bool,

    /// 전송 청크 크기 (바이트)
    #[arg(long, default_value_t = hms::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// debug 로그 출력
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Config {
        let base = if self.cancellable {
            Config::cancellable()
        } else {
            Config::default()
        };
        Config {
            bind_addr: self.bind,
            media_dir: self.dir,
            chunk_size: self.chunk_size,
            ..base
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = args.into_config();

    info!("HMS Server starting...");
    info!("Chunk size: {} bytes", config.chunk_size);

    let server = Server::bind(config, Arc::new(TracingSink)).await?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                signal.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.run(shutdown).await?;
    Ok(())
}
