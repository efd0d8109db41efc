//! Captured output streams.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

/// Buffer size for reading child pipes.
const READ_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Default)]
struct BufferState {
    data: Vec<u8>,
    /// Position of the built-in incremental reader.
    read_pos: usize,
    /// Set once the stream hit EOF.
    closed: bool,
}

/// Append-only capture of one output stream (stdout or stderr).
///
/// Cloning yields another handle to the same buffer. The built-in
/// incremental reader ([`read_new`](Self::read_new),
/// [`next_lines`](Self::next_lines)) is shared by all handles; use
/// [`cursor`](Self::cursor) for an independent reader.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    shared: Arc<Mutex<BufferState>>,
}

impl OutputBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BufferState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn append(&self, bytes: &[u8]) {
        self.state().data.extend_from_slice(bytes);
    }

    pub(crate) fn close(&self) {
        self.state().closed = true;
    }

    /// True once the underlying stream reached EOF.
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Number of bytes captured so far.
    pub fn len(&self) -> usize {
        self.state().data.len()
    }

    /// True if nothing has been captured.
    pub fn is_empty(&self) -> bool {
        self.state().data.is_empty()
    }

    /// Raw captured bytes.
    pub fn bytes(&self) -> Vec<u8> {
        self.state().data.clone()
    }

    /// Full captured text with trailing line terminators removed.
    pub fn text(&self) -> String {
        let state = self.state();
        String::from_utf8_lossy(&state.data)
            .trim_end_matches(&['\n', '\r'][..])
            .to_string()
    }

    /// Captured text split into lines. Empty output yields no lines.
    pub fn lines(&self) -> Vec<String> {
        let state = self.state();
        String::from_utf8_lossy(&state.data)
            .lines()
            .map(str::to_owned)
            .collect()
    }

    /// Text appended since the previous incremental read.
    pub fn read_new(&self) -> String {
        let mut state = self.state();
        let BufferState {
            data,
            read_pos,
            closed,
        } = &mut *state;
        take_text(data, read_pos, *closed)
    }

    /// Complete lines appended since the previous incremental read.
    ///
    /// A trailing partial line stays unread until its newline arrives or
    /// the stream closes.
    pub fn next_lines(&self) -> Vec<String> {
        let mut state = self.state();
        let BufferState {
            data,
            read_pos,
            closed,
        } = &mut *state;
        take_lines(data, read_pos, *closed)
    }

    /// Create an independent incremental reader starting at the beginning.
    pub fn cursor(&self) -> OutputCursor {
        OutputCursor {
            buffer: self.clone(),
            pos: 0,
        }
    }
}

/// Incremental reader over an [`OutputBuffer`] with its own position.
#[derive(Debug, Clone)]
pub struct OutputCursor {
    buffer: OutputBuffer,
    pos: usize,
}

impl OutputCursor {
    /// Text appended since this cursor's previous read.
    pub fn read_new(&mut self) -> String {
        let state = self.buffer.state();
        take_text(&state.data, &mut self.pos, state.closed)
    }

    /// Complete lines appended since this cursor's previous read.
    pub fn next_lines(&mut self) -> Vec<String> {
        let state = self.buffer.state();
        take_lines(&state.data, &mut self.pos, state.closed)
    }

    /// Bytes not yet consumed by this cursor.
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.pos
    }
}

/// Consume pending bytes as text, holding back an incomplete UTF-8
/// sequence at the end unless the stream is closed.
fn take_text(data: &[u8], pos: &mut usize, closed: bool) -> String {
    let pending = &data[*pos..];
    let end = match std::str::from_utf8(pending) {
        Err(e) if !closed && e.error_len().is_none() => e.valid_up_to(),
        _ => pending.len(),
    };
    *pos += end;
    String::from_utf8_lossy(&pending[..end]).into_owned()
}

fn take_lines(data: &[u8], pos: &mut usize, closed: bool) -> Vec<String> {
    let pending = &data[*pos..];
    let end = if closed {
        pending.len()
    } else {
        pending
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |i| i + 1)
    };
    *pos += end;
    String::from_utf8_lossy(&pending[..end])
        .lines()
        .map(str::to_owned)
        .collect()
}

/// Copy a child pipe into `buffer` until EOF, then mark it closed.
pub(crate) async fn pump<R>(mut reader: R, buffer: OutputBuffer, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                trace!(stream, "EOF");
                break;
            }
            Ok(n) => {
                trace!(stream, "read {} bytes", n);
                buffer.append(&buf[..n]);
            }
            Err(e) => {
                debug!(stream, error = %e, "pipe read failed");
                break;
            }
        }
    }
    buffer.close();
}
