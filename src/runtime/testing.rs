//! Scripted non-blocking stream for exercising the drain loops, and a
//! log sink for checking what the handlers report.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use tracing::Level;

/// Stream that replays a fixed script of read and write results.
///
/// Once a script runs out the stream reports `WouldBlock`, which is what
/// a drained non-blocking socket does.
#[derive(Debug, Default)]
pub struct ScriptedStream {
    reads: VecDeque<io::Result<Vec<u8>>>,
    writes: VecDeque<io::Result<usize>>,
    /// Everything the stream accepted through `write`.
    pub output: Vec<u8>,
    /// Number of `read` calls made, including ones that failed.
    pub read_calls: usize,
}

impl ScriptedStream {
    /// Make the next read return `data` (split across calls if needed).
    pub fn push_read(&mut self, data: &[u8]) -> &mut Self {
        self.reads.push_back(Ok(data.to_vec()));
        self
    }

    /// Make the next read report an orderly shutdown.
    pub fn push_eof(&mut self) -> &mut Self {
        self.reads.push_back(Ok(Vec::new()));
        self
    }

    /// Make the next read fail with `kind`.
    pub fn push_read_err(&mut self, kind: io::ErrorKind) -> &mut Self {
        self.reads.push_back(Err(io::Error::from(kind)));
        self
    }

    /// Accept at most `caps[i]` bytes on the i-th subsequent write.
    pub fn accept_writes(&mut self, caps: &[usize]) -> &mut Self {
        self.writes.extend(caps.iter().map(|&cap| Ok(cap)));
        self
    }

    /// Make the next write fail with `kind`.
    pub fn push_write_err(&mut self, kind: io::ErrorKind) -> &mut Self {
        self.writes.push_back(Err(io::Error::from(kind)));
        self
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_calls += 1;
        match self.reads.pop_front() {
            None => Err(io::ErrorKind::WouldBlock.into()),
            Some(Err(e)) => Err(e),
            Some(Ok(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.reads.push_front(Ok(data[n..].to_vec()));
                }
                Ok(n)
            }
        }
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writes.pop_front() {
            None => Err(io::ErrorKind::WouldBlock.into()),
            Some(Err(e)) => Err(e),
            Some(Ok(cap)) => {
                let n = cap.min(buf.len());
                self.output.extend_from_slice(&buf[..n]);
                Ok(n)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// In-memory sink for formatted log lines.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// A plain-text subscriber at trace level that writes into this sink.
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        let sink = self.clone();
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .with_ansi(false)
            .with_target(false)
            .with_writer(move || sink.clone())
            .finish()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
