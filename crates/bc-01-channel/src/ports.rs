//! # Channel Port
//!
//! The uniform interface over files, sockets and the console.

use std::future::Future;
use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::sync::watch;

use crate::domain::{ChannelError, ChannelId, END_LINE};

/// A bidirectional byte stream with an open/close lifecycle announced on
/// the bus.
///
/// ## Semantics
///
/// - `open()` publishes `ON_OPEN` with this channel's id once ready
/// - `close()` performs `ON_CLOSE` only on the open → closed transition,
///   then releases the resource; pending reads and writes fail with
///   [`ChannelError::Aborted`]
/// - `read(0)` returns one line without its terminator
/// - `read(n)` returns exactly `n` bytes
#[async_trait]
pub trait Channel: Send + Sync {
    fn id(&self) -> ChannelId;

    async fn open(&self) -> Result<(), ChannelError>;

    async fn close(&self);

    fn is_open(&self) -> bool;

    async fn read(&self, size: usize) -> Result<Vec<u8>, ChannelError>;

    async fn write(&self, data: &[u8]) -> Result<(), ChannelError>;
}

/// Read a line (`size == 0`) or exactly `size` bytes.
pub(crate) async fn read_from<R>(reader: &mut R, size: usize) -> io::Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin + Send,
{
    if size > 0 {
        let mut buffer = vec![0; size];
        reader.read_exact(&mut buffer).await?;
        return Ok(buffer);
    }

    let mut line = Vec::new();
    if reader.read_until(END_LINE, &mut line).await? == 0 {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    if line.last() == Some(&END_LINE) {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
    Ok(line)
}

/// Run `io` until it completes or `closed` turns true.
pub(crate) async fn abortable<T, F>(closed: &watch::Sender<bool>, io: F) -> Result<T, ChannelError>
where
    F: Future<Output = Result<T, ChannelError>> + Send,
{
    let mut signal = closed.subscribe();
    let aborted = async move {
        loop {
            if *signal.borrow_and_update() {
                return;
            }
            if signal.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        result = io => result,
        () = aborted => Err(ChannelError::Aborted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_read_line_strips_terminator() {
        let mut reader = BufReader::new(&b"alice@example\r\nsecond\n"[..]);
        assert_eq!(read_from(&mut reader, 0).await.unwrap(), b"alice@example");
        assert_eq!(read_from(&mut reader, 0).await.unwrap(), b"second");
        assert!(read_from(&mut reader, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_read_partial_last_line() {
        let mut reader = BufReader::new(&b"tail"[..]);
        assert_eq!(read_from(&mut reader, 0).await.unwrap(), b"tail");
    }

    #[tokio::test]
    async fn test_read_exact_size() {
        let mut reader = BufReader::new(&b"r12345678rest"[..]);
        assert_eq!(read_from(&mut reader, 1).await.unwrap(), b"r");
        assert_eq!(read_from(&mut reader, 8).await.unwrap(), b"12345678");
        let short = read_from(&mut reader, 8).await.unwrap_err();
        assert_eq!(short.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_abortable_observes_close() {
        let (closed, _) = watch::channel(false);
        closed.send_replace(true);
        let result: Result<(), _> = abortable(&closed, std::future::pending()).await;
        assert!(result.unwrap_err().is_aborted());
    }
}
