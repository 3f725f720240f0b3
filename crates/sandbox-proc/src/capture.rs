use std::sync::{Arc, Mutex};
use std::time::Duration;

use sandbox::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::debug;

/// Read buffer size for a single pipe read.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Bytes captured from one child stream.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// Output was dropped: the cap was reached or a read failed.
    pub truncated: bool,
    pub error: Option<String>,
    /// The writer side closed (EOF observed). `false` after [`OutputCapture::finish`]
    /// means a writer still held the pipe when draining gave up.
    pub closed: bool,
}

impl Captured {
    /// Append as much of `data` as fits under `cap`; the rest is dropped.
    fn push(&mut self, data: &[u8], cap: usize) {
        let room = cap.saturating_sub(self.bytes.len());
        let take = room.min(data.len());
        if let Some(head) = data.get(..take) {
            self.bytes.extend_from_slice(head);
        }
        if take < data.len() {
            self.truncated = true;
        }
    }
}

/// Background reader that drains one child stream into a capped buffer.
///
/// The reader keeps consuming (and discarding) output past the cap so the
/// child never blocks on a full pipe.
pub(crate) struct OutputCapture {
    stream: Stream,
    buffer: Arc<Mutex<Captured>>,
    task: JoinHandle<()>,
}

impl OutputCapture {
    pub(crate) fn spawn<R>(stream: Stream, reader: R, cap: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Captured::default()));
        let task = tokio::spawn(drain(stream, reader, cap, Arc::clone(&buffer)));
        Self {
            stream,
            buffer,
            task,
        }
    }

    /// Wait up to `timeout` for the stream to reach EOF, then return whatever
    /// was captured. A stream still open at the deadline comes back with
    /// `closed == false`.
    pub(crate) async fn finish(self, timeout: Duration) -> Captured {
        let Self {
            stream,
            buffer,
            mut task,
        } = self;

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(%stream, error = %e, "output reader task failed"),
            Err(_) => {
                debug!(%stream, "output drain timed out");
                task.abort();
            }
        }

        std::mem::take(&mut *lock(&buffer))
    }
}

async fn drain<R>(stream: Stream, mut reader: R, cap: usize, buffer: Arc<Mutex<Captured>>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                lock(&buffer).closed = true;
                return;
            }
            Ok(n) => {
                let data = chunk.get(..n).unwrap_or_default();
                lock(&buffer).push(data, cap);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(%stream, error = %e, "output read failed");
                let mut captured = lock(&buffer);
                captured.error = Some(format!("{stream}: {e}"));
                captured.truncated = true;
                captured.closed = true;
                return;
            }
        }
    }
}

/// Recover from a poisoned mutex: a panicked reader must not cost us the
/// output captured so far.
fn lock(buffer: &Mutex<Captured>) -> std::sync::MutexGuard<'_, Captured> {
    buffer.lock().unwrap_or_else(|e| e.into_inner())
}
