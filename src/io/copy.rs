//! Bidirectional copy with per-direction inactivity deadlines
//!
//! Splices bytes between the redirected client and the upstream tunnel until
//! either side closes or a direction sits idle past its deadline. Closing
//! either side finishes the whole future; the caller drops both streams.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Instant, Sleep};
use tracing::debug;

/// Default per-transfer buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Result of a bidirectional copy operation
#[derive(Debug, Clone, Copy)]
pub struct CopyResult {
    /// Bytes transferred from client to upstream
    pub client_to_upstream: u64,
    /// Bytes transferred from upstream to client
    pub upstream_to_client: u64,
}

impl CopyResult {
    /// Total bytes transferred in both directions
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.client_to_upstream + self.upstream_to_client
    }
}

/// State for one direction of transfer
struct TransferState {
    buf: Box<[u8]>,
    read_done: bool,
    write_done: bool,
    pos: usize,
    cap: usize,
    bytes_transferred: u64,
    idle: Duration,
    deadline: Pin<Box<Sleep>>,
}

impl TransferState {
    fn new(buf_size: usize, idle: Duration) -> Self {
        Self {
            buf: vec![0u8; buf_size].into_boxed_slice(),
            read_done: false,
            write_done: false,
            pos: 0,
            cap: 0,
            bytes_transferred: 0,
            idle,
            deadline: Box::pin(sleep(idle)),
        }
    }

    fn touch(&mut self) {
        self.deadline.as_mut().reset(Instant::now() + self.idle);
    }

    fn poll_transfer<R, W>(
        &mut self,
        cx: &mut Context<'_>,
        mut reader: Pin<&mut R>,
        mut writer: Pin<&mut W>,
    ) -> Poll<io::Result<()>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            // Data pending in the buffer: push it to the writer first
            if self.pos < self.cap {
                let n = match writer.as_mut().poll_write(cx, &self.buf[self.pos..self.cap]) {
                    Poll::Ready(Ok(0)) => {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "write zero bytes",
                        )));
                    }
                    Poll::Ready(Ok(n)) => n,
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return self.poll_idle(cx),
                };
                self.pos += n;
                self.bytes_transferred += n as u64;
                self.touch();

                if self.pos == self.cap {
                    self.pos = 0;
                    self.cap = 0;
                }
            } else if self.read_done {
                // Source drained: flush and propagate the shutdown
                if !self.write_done {
                    match writer.as_mut().poll_flush(cx) {
                        Poll::Ready(Ok(())) => {}
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                    match writer.as_mut().poll_shutdown(cx) {
                        Poll::Ready(Ok(())) => {
                            self.write_done = true;
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                return Poll::Ready(Ok(()));
            } else {
                let mut read_buf = ReadBuf::new(&mut self.buf);
                match reader.as_mut().poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        if n == 0 {
                            self.read_done = true;
                        } else {
                            self.cap = n;
                            self.touch();
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return self.poll_idle(cx),
                }
            }
        }
    }

    /// I/O is pending: surface a timeout once the idle deadline elapses.
    fn poll_idle(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.deadline.as_mut().poll(cx) {
            Poll::Ready(()) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "direction idle past deadline",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Bidirectional copy future
struct BidirectionalCopy<'a, A, B>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    a: &'a mut A,
    b: &'a mut B,
    a_to_b: TransferState,
    b_to_a: TransferState,
}

impl<A, B> std::future::Future for BidirectionalCopy<'_, A, B>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    type Output = io::Result<CopyResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        // Closing either side closes both: the first direction to finish,
        // whether by clean EOF, error, or idle timeout, ends the splice.
        // The caller drops both streams; no half-close lingering.
        match this
            .a_to_b
            .poll_transfer(cx, Pin::new(&mut this.a), Pin::new(&mut this.b))
        {
            Poll::Ready(Ok(())) => {
                return Poll::Ready(Ok(CopyResult {
                    client_to_upstream: this.a_to_b.bytes_transferred,
                    upstream_to_client: this.b_to_a.bytes_transferred,
                }));
            }
            Poll::Ready(Err(e)) => {
                debug!("client->upstream transfer ended: {}", e);
                return Poll::Ready(Ok(CopyResult {
                    client_to_upstream: this.a_to_b.bytes_transferred,
                    upstream_to_client: this.b_to_a.bytes_transferred,
                }));
            }
            Poll::Pending => {}
        }

        match this
            .b_to_a
            .poll_transfer(cx, Pin::new(&mut this.b), Pin::new(&mut this.a))
        {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(CopyResult {
                client_to_upstream: this.a_to_b.bytes_transferred,
                upstream_to_client: this.b_to_a.bytes_transferred,
            })),
            Poll::Ready(Err(e)) => {
                debug!("upstream->client transfer ended: {}", e);
                Poll::Ready(Ok(CopyResult {
                    client_to_upstream: this.a_to_b.bytes_transferred,
                    upstream_to_client: this.b_to_a.bytes_transferred,
                }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Copy bytes in both directions until either side closes or a direction is
/// idle for longer than `idle`.
///
/// # Errors
///
/// Transfer errors end the splice but are reported per-direction at debug
/// level; the future itself resolves with the byte counts.
pub async fn copy_bidirectional_idle<A, B>(
    a: &mut A,
    b: &mut B,
    idle: Duration,
) -> io::Result<CopyResult>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    BidirectionalCopy {
        a,
        b,
        a_to_b: TransferState::new(DEFAULT_BUFFER_SIZE, idle),
        b_to_a: TransferState::new(DEFAULT_BUFFER_SIZE, idle),
    }
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_copy_both_directions() {
        let (mut client_side, mut client_far) = tokio::io::duplex(256);
        let (mut upstream_side, mut upstream_far) = tokio::io::duplex(256);

        let splice = tokio::spawn(async move {
            copy_bidirectional_idle(&mut client_side, &mut upstream_side, Duration::from_secs(5))
                .await
        });

        // Request out, response back, then the client closes
        client_far.write_all(b"request").await.unwrap();
        let mut buf = [0u8; 7];
        upstream_far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"request");

        upstream_far.write_all(b"response!").await.unwrap();
        let mut out = [0u8; 9];
        client_far.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"response!");

        client_far.shutdown().await.unwrap();

        let result = splice.await.unwrap().unwrap();
        assert_eq!(result.client_to_upstream, 7);
        assert_eq!(result.upstream_to_client, 9);
        assert_eq!(result.total(), 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_deadline_ends_splice() {
        let (mut client_side, client_far) = tokio::io::duplex(64);
        let (mut upstream_side, upstream_far) = tokio::io::duplex(64);

        let result = copy_bidirectional_idle(
            &mut client_side,
            &mut upstream_side,
            Duration::from_secs(600),
        )
        .await
        .unwrap();

        // Nothing ever flowed; the idle deadline fired under the paused clock
        assert_eq!(result.total(), 0);
        drop(client_far);
        drop(upstream_far);
    }

    #[tokio::test]
    async fn test_one_side_close_closes_both() {
        let (mut client_side, client_far) = tokio::io::duplex(64);
        let (mut upstream_side, mut upstream_far) = tokio::io::duplex(64);

        // Client disappears immediately. The splice must end right away,
        // even though the upstream leg is silent and nowhere near its
        // 600-second idle deadline.
        drop(client_far);

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            copy_bidirectional_idle(
                &mut client_side,
                &mut upstream_side,
                Duration::from_secs(600),
            ),
        )
        .await
        .expect("splice must end on EOF, not at the idle deadline")
        .unwrap();
        assert_eq!(result.total(), 0);

        drop(upstream_side);
        // The upstream far end observes EOF once the splice is done
        let mut buf = Vec::new();
        upstream_far.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }
}
