//! 제어 프레임 codec
//!
//! - 프레임 = UTF-8 텍스트 + 구분자 `#`
//! - 길이 prefix 없음: 페이로드에 `#` 가 들어가면 프레이밍이 깨지므로 송신 시 거부
//! - 구분자 뒤에 이어서 읽힌 바이트는 버리지 않고 다음 프레임/바이너리 읽기에 사용

use std::future::{poll_fn, Future};
use std::pin::pin;
use std::task::Poll;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::message::ControlMessage;
use crate::{Config, Error, Result, DEFAULT_MAX_FRAME_LEN, DEFAULT_RECV_INCREMENT, DELIMITER};

/// 제어 프레임 송신
///
/// 구분자를 붙여 한 번에 write 후 flush
pub async fn send_frame<W>(writer: &mut W, text: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if text.as_bytes().contains(&DELIMITER) {
        return Err(Error::DelimiterInPayload(text.to_string()));
    }

    let mut frame = Vec::with_capacity(text.len() + 1);
    frame.extend_from_slice(text.as_bytes());
    frame.push(DELIMITER);

    writer.write_all(&frame).await?;
    writer.flush().await?;

    trace!("frame sent: {:?}", text);
    Ok(())
}

/// 타입 메시지 송신
pub async fn send_message<W>(writer: &mut W, message: &ControlMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    send_frame(writer, &message.encode()).await
}

/// 수신측 프레임 리더
///
/// 연결의 읽기 방향을 소유하며, 제어 모드에서는 `receive`,
/// 바이너리 모드에서는 `read_chunk` 로 같은 버퍼를 공유
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    increment: usize,
    max_frame_len: usize,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    /// 기본 수신 단위(1KB)와 최대 프레임 길이(64KB)로 생성
    pub fn new(inner: R) -> Self {
        Self::with_limits(inner, DEFAULT_RECV_INCREMENT, DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_limits(inner: R, increment: usize, max_frame_len: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(increment),
            increment: increment.max(1),
            max_frame_len,
        }
    }

    pub fn from_config(inner: R, config: &Config) -> Self {
        Self::with_limits(inner, config.recv_increment, config.max_frame_len)
    }

    /// 다음 제어 프레임 수신
    ///
    /// 구분자 이전에 연결이 닫히면 `Ok(None)` (정상 종료 신호)
    pub async fn receive(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(text) = self.take_frame()? {
                return Ok(Some(text));
            }

            let n = self.fill().await?;
            if n == 0 {
                if !self.buf.is_empty() {
                    trace!("connection closed mid-frame, {} bytes dropped", self.buf.len());
                    self.buf.clear();
                }
                return Ok(None);
            }
        }
    }

    /// non-blocking 프레임 확인
    ///
    /// 지금 당장 완성된 프레임이 없으면 `Ok(None)`, 연결이 닫혔으면 `Err(Disconnected)`
    pub async fn try_receive(&mut self) -> Result<Option<String>> {
        if let Some(text) = self.take_frame()? {
            return Ok(Some(text));
        }

        let increment = self.increment;
        self.buf.reserve(increment);
        let mut limited = (&mut self.inner).take(increment as u64);
        let polled = poll_once(limited.read_buf(&mut self.buf)).await;

        match polled {
            None => Ok(None),
            Some(Ok(0)) => Err(Error::Disconnected),
            Some(Ok(_)) => self.take_frame(),
            Some(Err(e)) => Err(e.into()),
        }
    }

    /// 바이너리 모드 raw 읽기
    ///
    /// 버퍼에 남은 바이트가 있으면 먼저 반환. 빈 `Bytes` 는 연결 종료를 의미
    pub async fn read_chunk(&mut self, max: usize) -> Result<Bytes> {
        if !self.buf.is_empty() {
            let n = self.buf.len().min(max);
            return Ok(self.buf.split_to(n).freeze());
        }

        let mut chunk = BytesMut::with_capacity(max);
        (&mut self.inner)
            .take(max as u64)
            .read_buf(&mut chunk)
            .await?;
        Ok(chunk.freeze())
    }

    /// 바이너리 모드에서 센티널 뒤로 읽힌 바이트를 되돌림
    pub fn unread(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut restored = BytesMut::with_capacity(bytes.len() + self.buf.len());
        restored.extend_from_slice(bytes);
        restored.extend_from_slice(&self.buf);
        self.buf = restored;
    }

    /// 아직 소비되지 않은 버퍼 바이트 수
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn take_frame(&mut self) -> Result<Option<String>> {
        if let Some(pos) = self.buf.iter().position(|&b| b == DELIMITER) {
            let frame = self.buf.split_to(pos + 1);
            let text = String::from_utf8(frame[..pos].to_vec())?;
            trace!("frame received: {:?}", text);
            return Ok(Some(text));
        }

        if self.buf.len() > self.max_frame_len {
            self.buf.clear();
            return Err(Error::FrameTooLarge {
                max_size: self.max_frame_len,
            });
        }

        Ok(None)
    }

    async fn fill(&mut self) -> Result<usize> {
        let increment = self.increment;
        self.buf.reserve(increment);
        let n = (&mut self.inner)
            .take(increment as u64)
            .read_buf(&mut self.buf)
            .await?;
        Ok(n)
    }
}

/// future 를 한 번만 poll (pending 이면 None)
async fn poll_once<F: Future>(future: F) -> Option<F::Output> {
    let mut future = pin!(future);
    poll_fn(|cx| match future.as_mut().poll(cx) {
        Poll::Ready(output) => Poll::Ready(Some(output)),
        Poll::Pending => Poll::Ready(None),
    })
    .await
}
