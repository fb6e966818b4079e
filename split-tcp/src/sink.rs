//! Output streams for the receiver.
//!
//! The receiver opens a fresh writer each time a session starts (packet id 0)
//! and shuts it down at the end-of-session marker.  [`SessionSink`] is the
//! factory for those writers.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use tokio::fs::File;
use tokio::io::{AsyncWrite, BufWriter};

/// Opens the output stream for a new session.
pub trait SessionSink {
    type Writer: AsyncWrite + Unpin + Send;

    fn open(&mut self) -> impl Future<Output = io::Result<Self::Writer>> + Send;
}

/// Writes each session to `path`, truncating what the previous one left.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionSink for FileSink {
    type Writer = BufWriter<File>;

    async fn open(&mut self) -> io::Result<Self::Writer> {
        let file = File::create(&self.path).await?;
        Ok(BufWriter::new(file))
    }
}

/// Collects each session's bytes in memory.
///
/// Clones share the same storage, so a test can keep one handle while the
/// receiver owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    sessions: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of every session opened so far, oldest first.
    pub fn sessions(&self) -> Vec<Vec<u8>> {
        lock(&self.sessions).clone()
    }

    /// Bytes of the most recent session.
    pub fn last_session(&self) -> Option<Vec<u8>> {
        lock(&self.sessions).last().cloned()
    }
}

impl SessionSink for MemorySink {
    type Writer = MemoryWriter;

    async fn open(&mut self) -> io::Result<Self::Writer> {
        let mut sessions = lock(&self.sessions);
        sessions.push(Vec::new());
        Ok(MemoryWriter {
            sessions: Arc::clone(&self.sessions),
            index: sessions.len() - 1,
        })
    }
}

/// Writer half of a [`MemorySink`] session.
#[derive(Debug)]
pub struct MemoryWriter {
    sessions: Arc<Mutex<Vec<Vec<u8>>>>,
    index: usize,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut sessions = lock(&self.sessions);
        match sessions.get_mut(self.index) {
            Some(session) => {
                session.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            None => Poll::Ready(Err(io::Error::other("memory session vanished"))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}
