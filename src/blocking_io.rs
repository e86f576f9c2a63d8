//! Bridges a blocking `std::io::Read` pipe end (a raw fd on Linux, a
//! `HANDLE` on Windows, both read synchronously by the platform backends)
//! into [`tokio::io::AsyncRead`], the shape the supervisor needs to
//! drain the report stream and redirected stdio without blocking the
//! reactor thread. Grounded on tokio's own spawn-a-thread-plus-channel
//! idiom for foreign blocking I/O (the same shape `windows/wait.rs`
//! already uses for `WaitForSingleObject`, generalized here from "wait for
//! one event" to "stream bytes").

use std::collections::VecDeque;
use std::io::{self, Read};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

enum Message {
    Chunk(Vec<u8>),
    Eof,
    Err(io::Error),
}

/// Adapts any `Read + Send + 'static` into an `AsyncRead` by running the
/// blocking reads on a dedicated thread and forwarding chunks over a
/// bounded channel.
pub struct BlockingReader {
    rx: mpsc::Receiver<Message>,
    pending: VecDeque<u8>,
    done: bool,
}

impl BlockingReader {
    pub fn new<R: Read + Send + 'static>(mut reader: R) -> Self {
        let (tx, rx) = mpsc::channel(4);
        std::thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) => {
                        let _ = tx.blocking_send(Message::Eof);
                        return;
                    }
                    Ok(n) => {
                        if tx.blocking_send(Message::Chunk(chunk[..n].to_vec())).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.blocking_send(Message::Err(e));
                        return;
                    }
                }
            }
        });
        BlockingReader {
            rx,
            pending: VecDeque::new(),
            done: false,
        }
    }
}

impl AsyncRead for BlockingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.pending.is_empty() {
            let n = self.pending.len().min(buf.remaining());
            let chunk: Vec<u8> = self.pending.drain(..n).collect();
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        if self.done {
            return Poll::Ready(Ok(()));
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Message::Chunk(data))) => {
                let n = data.len().min(buf.remaining());
                buf.put_slice(&data[..n]);
                if n < data.len() {
                    self.pending.extend(data[n..].iter().copied());
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Some(Message::Eof)) | Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Some(Message::Err(e))) => {
                self.done = true;
                Poll::Ready(Err(e))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn forwards_all_bytes_then_eof() {
        let data: &[u8] = b"hello world";
        let mut reader = BlockingReader::new(data);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn surfaces_read_errors() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "boom"))
            }
        }
        let mut reader = BlockingReader::new(Failing);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }
}
