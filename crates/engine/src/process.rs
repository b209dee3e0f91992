use std::collections::VecDeque;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use log::{debug, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::task::JoinHandle;

/// Encoder output lines kept for failure reports
pub const MAX_DIAGNOSTIC_LINES: usize = 200;

/// Bounded tail of an encoder's stderr
#[derive(Debug)]
pub struct DiagnosticTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl DiagnosticTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn push(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    pub fn into_text(self) -> String {
        Vec::from(self.lines).join("\n")
    }
}

/// Read up to the next `\n` or `\r`; ffmpeg rewrites its progress line with `\r`
async fn read_segment<R: AsyncBufRead + Unpin>(reader: &mut R, out: &mut Vec<u8>) -> io::Result<usize> {
    let mut total = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(total);
        }
        match available.iter().position(|b| *b == b'\n' || *b == b'\r') {
            Some(i) => {
                out.extend_from_slice(&available[..i]);
                reader.consume(i + 1);
                return Ok(total + i + 1);
            }
            None => {
                let n = available.len();
                out.extend_from_slice(available);
                reader.consume(n);
                total += n;
            }
        }
    }
}

async fn collect_tail<R: AsyncBufRead + Unpin>(mut reader: R, tag: &str, capacity: usize) -> String {
    let mut tail = DiagnosticTail::new(capacity);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match read_segment(&mut reader, &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                if !line.trim().is_empty() {
                    debug!("[{}] {}", tag, line.trim());
                }
                tail.push(&line);
            }
            Err(e) => {
                debug!("[{}] stderr read ended: {}", tag, e);
                break;
            }
        }
    }
    tail.into_text()
}

/// Drain an encoder's stderr in the background; resolves to its last lines
pub fn spawn_stderr_collector(stderr: ChildStderr, tag: String) -> JoinHandle<String> {
    tokio::spawn(async move { collect_tail(BufReader::new(stderr), &tag, MAX_DIAGNOSTIC_LINES).await })
}

/// Ask a process to exit, then force-kill it once `grace` has passed
pub async fn terminate(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    send_terminate_signal(child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(
                "Process {:?} ignored termination for {}s, killing it",
                child.id(),
                grace.as_secs()
            );
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn send_terminate_signal(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        // Already reaped
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!("Failed to send SIGTERM to {}: {}", pid, e);
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
fn send_terminate_signal(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!("Failed to terminate process {:?}: {}", child.id(), e);
    }
}
