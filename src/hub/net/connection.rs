use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{ErrorCode, HubError, Result};
use crate::hub::config::Limits;
use crate::hub::types::ConnectionId;
use crate::wire::message::{Envelope, Frame, MAX_FRAME_SIZE};
use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{channel, error::TrySendError, Receiver, Sender};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type CloseCallback = Box<dyn FnOnce() + Send + 'static>;

/// A delivery target as seen by the registry and the liveness monitor
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Queue a frame without waiting. Fails once the connection is closed
    /// or its outbound queue is full.
    fn send(&self, frame: &Frame) -> Result<()>;

    /// Run `callback` once when the connection closes. Runs immediately if
    /// it is already closed.
    fn on_close(&self, callback: CloseCallback);

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Runs queued close callbacks exactly once
pub struct CloseHooks {
    // `None` once closed
    pending: Mutex<Option<Vec<CloseCallback>>>,
}

impl CloseHooks {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Some(Vec::new())),
        }
    }

    pub fn register(&self, callback: CloseCallback) {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        match pending.as_mut() {
            Some(callbacks) => callbacks.push(callback),
            None => {
                drop(pending);
                callback();
            }
        }
    }

    /// Callbacks waiting for close; zero once fired
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map_or(0, Vec::len)
    }

    /// Returns false if already fired
    pub fn fire(&self) -> bool {
        let callbacks = self.pending.lock().unwrap_or_else(|p| p.into_inner()).take();
        match callbacks {
            Some(callbacks) => {
                for callback in callbacks {
                    callback();
                }
                true
            }
            None => false,
        }
    }
}

/// Write side of one client: a bounded outbound queue drained by a writer task
pub struct ClientConnection {
    id: ConnectionId,
    peer: String,
    write_tx: Sender<Frame>,
    cancel_token: CancellationToken,
    closed: AtomicBool,
    hooks: CloseHooks,
}

impl ClientConnection {
    pub fn spawn<W>(writer: W, peer: impl Into<String>, limits: &Limits) -> Arc<Self>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (write_tx, write_rx) = channel::<Frame>(limits.outbound_capacity);

        let client = Arc::new(Self {
            id: Uuid::new_v4(),
            peer: peer.into(),
            write_tx,
            cancel_token: CancellationToken::new(),
            closed: AtomicBool::new(false),
            hooks: CloseHooks::new(),
        });
        info!("Connection {} opened for {}", client.id, client.peer);

        let weak = Arc::downgrade(&client);
        let cancel = client.cancel_token.clone();
        let write_timeout = limits.write_timeout();
        let id = client.id;
        tokio::spawn(async move {
            if let Err(e) = Self::write_task(writer, write_rx, cancel, write_timeout).await {
                warn!("Write task error on {}: {}", id, e);
            }
            if let Some(client) = weak.upgrade() {
                client.close();
            }
        });

        client
    }

    async fn write_task<W>(
        mut writer: W,
        mut rx: Receiver<Frame>,
        cancel: CancellationToken,
        write_timeout: Duration,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        debug!("Starting write task");
        loop {
            tokio::select! {
                frame = rx.recv() => match frame {
                    Some(frame) => Self::write_frame(&mut writer, &frame, write_timeout).await?,
                    None => break,
                },
                _ = cancel.cancelled() => {
                    // flush whatever was queued before the close, e.g. an error frame
                    while let Ok(frame) = rx.try_recv() {
                        Self::write_frame(&mut writer, &frame, write_timeout).await?;
                    }
                    break;
                }
            }
        }

        let _ = timeout(write_timeout, writer.shutdown()).await;
        debug!("Write task completed");
        Ok(())
    }

    async fn write_frame<W>(writer: &mut W, frame: &Frame, write_timeout: Duration) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let write = async {
            writer.write_all(frame).await?;
            writer.flush().await
        };

        match timeout(write_timeout, write).await {
            Ok(Ok(())) => {
                debug!("Wrote frame of {} bytes", frame.len());
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Failed to write frame: {}", e);
                Err(HubError::new(ErrorCode::SendFailed, format!("Write failed: {}", e)))
            }
            Err(_) => {
                error!("Write timed out after {:?}", write_timeout);
                Err(HubError::new(ErrorCode::SendFailed, "Write timed out"))
            }
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Resolves once the connection has been closed
    pub async fn closed(&self) {
        self.cancel_token.cancelled().await
    }
}

impl Connection for ClientConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, frame: &Frame) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HubError::new(ErrorCode::ConnectionClosed, "Connection is closed"));
        }

        match self.write_tx.try_send(frame.clone()) {
            Ok(()) => {
                debug!("Queued frame for {}", self.id);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue full for {}", self.id);
                Err(HubError::new(ErrorCode::SendFailed, "Outbound queue is full"))
            }
            Err(TrySendError::Closed(_)) => {
                Err(HubError::new(ErrorCode::ConnectionClosed, "Writer has stopped"))
            }
        }
    }

    fn on_close(&self, callback: CloseCallback) {
        self.hooks.register(callback);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Closing connection {} ({}), {} close hooks", self.id, self.peer, self.hooks.pending_count());
        self.cancel_token.cancel();
        self.hooks.fire();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        debug!("Connection {} dropped", self.id);
        self.close();
    }
}

/// Read side of one client: newline-delimited JSON envelopes
pub struct FrameReader<R> {
    reader: BufReader<R>,
    line: String,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: String::new(),
        }
    }

    /// Next envelope, or `None` once the peer has closed its side.
    /// Blank lines are skipped.
    pub async fn next_frame(&mut self) -> Result<Option<Envelope>> {
        loop {
            self.line.clear();
            let read = (&mut self.reader)
                .take(MAX_FRAME_SIZE as u64 + 1)
                .read_line(&mut self.line)
                .await
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::InvalidData => {
                        HubError::new(ErrorCode::MalformedFrame, "Frame is not valid UTF-8")
                    }
                    _ => HubError::Io(e),
                })?;

            if read == 0 {
                return Ok(None);
            }
            if read > MAX_FRAME_SIZE && !self.line.ends_with('\n') {
                return Err(HubError::new(ErrorCode::MalformedFrame, "Frame exceeds maximum size"));
            }

            let raw = self.line.trim();
            if raw.is_empty() {
                continue;
            }

            debug!("Received frame of {} bytes", raw.len());
            return Envelope::parse(raw).map(Some);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::duplex;
    use crate::wire::message::encode;

    fn limits() -> Limits {
        Limits {
            outbound_capacity: 2,
            write_timeout_ms: 100,
            ..Limits::default()
        }
    }

    #[tokio::test]
    async fn frames_reach_the_peer_in_order() {
        let (ours, theirs) = duplex(4096);
        let conn = ClientConnection::spawn(ours, "test", &limits());
        conn.send(&encode(&Envelope::texting(1, "a")).unwrap()).unwrap();
        conn.send(&encode(&Envelope::texting(1, "b")).unwrap()).unwrap();

        let mut reader = FrameReader::new(theirs);
        assert_eq!(reader.next_frame().await.unwrap(), Some(Envelope::texting(1, "a")));
        assert_eq!(reader.next_frame().await.unwrap(), Some(Envelope::texting(1, "b")));
    }

    #[tokio::test]
    async fn close_runs_callbacks_once_and_fails_later_sends() {
        let (ours, _theirs) = duplex(4096);
        let conn = ClientConnection::spawn(ours, "test", &limits());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        conn.on_close(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        conn.close();
        conn.close();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let err = conn.send(&encode(&Envelope::texting(1, "late")).unwrap()).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ConnectionClosed));

        let counter = calls.clone();
        conn.on_close(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stalled_peer_gets_closed_by_write_timeout() {
        // a pipe this small fills on the first frame and nobody reads it
        let (ours, _theirs) = duplex(8);
        let conn = ClientConnection::spawn(ours, "test", &limits());
        conn.send(&encode(&Envelope::texting(1, "this frame does not fit")).unwrap()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), conn.closed())
            .await
            .expect("write timeout should close the connection");
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn reader_skips_blank_lines_and_reports_eof() {
        let (mut ours, theirs) = duplex(4096);
        ours.write_all(b"\n{\"token\":\"t\"}\n").await.unwrap();
        drop(ours);

        let mut reader = FrameReader::new(theirs);
        assert_eq!(reader.next_frame().await.unwrap(), Some(Envelope::credential("t")));
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_malformed_frame() {
        let (mut ours, theirs) = duplex(4096);
        ours.write_all(b"{\"token\":\"\xff\xfe\"}\n").await.unwrap();

        let mut reader = FrameReader::new(theirs);
        let err = reader.next_frame().await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::MalformedFrame));
        assert!(err.is_fatal());
    }
}
