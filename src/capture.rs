//! Asynchronous capture of supervised daemon output.
//!
//! Each long-running daemon gets its output drained on background tasks into
//! an unbounded queue, so the daemon can never block on pipe backpressure and
//! the orchestrator can print accumulated lines whenever it likes without
//! touching the daemon directly.

use std::io::Write;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::runner::Daemon;

/// How long a drain task waits before re-polling a quiet pipe.
const DRAIN_RETRY: Duration = Duration::from_millis(100);

type Stream = Box<dyn AsyncRead + Send + Unpin>;

/// Collects a daemon's output lines and replays them, source-tagged, on
/// demand.
///
/// Lifecycle: `register` the spawned daemon once, `start` the drain tasks,
/// call `flush` from the main loop as often as wanted, and `stop` before
/// tearing the daemon down - after `stop` returns no further line can be
/// queued.
pub struct OutputCapture {
    name: &'static str,
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
    shutdown: watch::Sender<bool>,
    registered: Vec<Stream>,
    tasks: Vec<JoinHandle<()>>,
}

impl OutputCapture {
    pub fn new(name: &'static str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            name,
            tx,
            rx,
            shutdown,
            registered: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Attach to the daemon's output streams. Call exactly once per daemon.
    pub fn register(&mut self, daemon: &mut Daemon) {
        let (stdout, stderr) = daemon.take_output();
        if let Some(stream) = stdout {
            self.registered.push(Box::new(stream));
        }
        if let Some(stream) = stderr {
            self.registered.push(Box::new(stream));
        }
    }

    #[cfg(test)]
    fn register_stream(&mut self, stream: Stream) {
        self.registered.push(stream);
    }

    /// Begin draining the registered streams on background tasks.
    pub fn start(&mut self) {
        for stream in self.registered.drain(..) {
            let tx = self.tx.clone();
            let shutdown = self.shutdown.subscribe();
            self.tasks.push(tokio::spawn(drain(stream, tx, shutdown)));
        }
    }

    /// Write every currently queued line to stdout, prefixed by the source
    /// name. Never blocks; a drained queue writes nothing.
    pub fn flush(&mut self) {
        let _ = self.flush_into(&mut std::io::stdout());
    }

    fn flush_into<W: Write>(&mut self, out: &mut W) -> std::io::Result<()> {
        while let Ok(line) = self.rx.try_recv() {
            writeln!(out, "[{}] {}", self.name, line)?;
        }
        Ok(())
    }

    /// Signal the drain tasks to end and wait for them to exit.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

async fn drain(stream: Stream, tx: mpsc::UnboundedSender<String>, mut shutdown: watch::Receiver<bool>) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !line.is_empty() {
                        let _ = tx.send(line);
                    }
                }
                // A quiet or not-yet-open pipe: the daemon may still be
                // starting. Back off and poll again.
                Ok(None) | Err(_) => tokio::time::sleep(DRAIN_RETRY).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn capture_with_input(name: &'static str, input: &str) -> OutputCapture {
        let mut capture = OutputCapture::new(name);
        capture.register_stream(Box::new(Cursor::new(input.as_bytes().to_vec())));
        capture
    }

    async fn flushed_lines(capture: &mut OutputCapture, expected: usize) -> String {
        // The drain task runs concurrently; poll until it has delivered
        // everything we expect.
        let mut buffer = Vec::new();
        for _ in 0..200 {
            capture.flush_into(&mut buffer).unwrap();
            if buffer.iter().filter(|b| **b == b'\n').count() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        String::from_utf8(buffer).unwrap()
    }

    #[tokio::test]
    async fn flush_emits_lines_in_fifo_order_with_prefix() {
        let mut capture = capture_with_input("DHCP", "first\nsecond\nthird\n");
        capture.start();

        let output = flushed_lines(&mut capture, 3).await;
        assert_eq!(output, "[DHCP] first\n[DHCP] second\n[DHCP] third\n");

        capture.stop().await;
    }

    #[tokio::test]
    async fn empty_lines_are_dropped() {
        let mut capture = capture_with_input("DNS", "one\n\n\ntwo\n");
        capture.start();

        let output = flushed_lines(&mut capture, 2).await;
        assert_eq!(output, "[DNS] one\n[DNS] two\n");

        capture.stop().await;
    }

    #[test]
    fn flush_on_an_empty_queue_writes_nothing() {
        let mut capture = OutputCapture::new("TFTP");
        let mut buffer = Vec::new();
        capture.flush_into(&mut buffer).unwrap();
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn stop_joins_the_drain_tasks() {
        let mut capture = capture_with_input("TFTP", "line\n");
        capture.start();
        capture.stop().await;
        assert!(capture.tasks.is_empty());

        // stop is idempotent and safe with nothing running
        capture.stop().await;
    }
}
