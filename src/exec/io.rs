//! Captured guest output streams with incremental line extraction.
//!
//! Guest stdout/stderr are backed by in-memory pipes. The host drains them
//! while the guest is still running: each drain returns the complete lines
//! written since the previous drain, so the relay can stream output in
//! arrival order instead of waiting for the execution to finish.

use wasmtime_wasi::pipe::MemoryOutputPipe;

/// Pull newly completed lines out of a growing buffer snapshot.
///
/// `cursor` tracks how far the buffer has been consumed; bytes after the
/// last newline stay unconsumed until a later snapshot completes the line.
fn take_complete_lines(buffer: &[u8], cursor: &mut usize) -> Vec<String> {
    let fresh = &buffer[*cursor..];
    let Some(last_newline) = fresh.iter().rposition(|&b| b == b'\n') else {
        return Vec::new();
    };

    let complete = &fresh[..=last_newline];
    *cursor += last_newline + 1;

    complete
        .split(|&b| b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect()
}

/// One captured guest stream.
pub struct CapturedStream {
    pipe: MemoryOutputPipe,
    cursor: usize,
}

impl CapturedStream {
    /// Create a captured stream bounded at `capacity` bytes. Writes beyond
    /// the capacity fail inside the guest, they never grow host memory.
    pub fn new(capacity: usize) -> Self {
        Self {
            pipe: MemoryOutputPipe::new(capacity),
            cursor: 0,
        }
    }

    /// Clone of the underlying pipe, for wiring into a WASI context. The
    /// clone shares the buffer with this stream.
    pub fn pipe(&self) -> MemoryOutputPipe {
        self.pipe.clone()
    }

    /// Complete lines written since the last drain, in write order.
    pub fn drain_lines(&mut self) -> Vec<String> {
        let contents = self.pipe.contents();
        take_complete_lines(&contents, &mut self.cursor)
    }

    /// Any trailing output without a final newline. Called once after the
    /// guest has exited.
    pub fn drain_rest(&mut self) -> Option<String> {
        let contents = self.pipe.contents();
        let rest = &contents[self.cursor..];
        if rest.is_empty() {
            return None;
        }
        self.cursor = contents.len();
        Some(String::from_utf8_lossy(rest).into_owned())
    }
}
