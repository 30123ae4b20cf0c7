//! Progress reporting across a process boundary.
//!
//! The fetching side owns a [`ProgressChannel`] and is its only writer. Each
//! change is sent as one JSON [`Snapshot`] per line to a renderer process
//! (`malq render-progress`) that draws a spinner on its own schedule, so a
//! slow terminal never stalls the fetch loop and a slow fetch never freezes
//! the spinner.

use std::env;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::{cursor, queue, terminal};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::MalqError;

/// Total used when the amount of work is unknown; no percentage is drawn.
pub const INDETERMINATE: i64 = -1;

pub const RENDER_TICK: Duration = Duration::from_millis(100);

/// How long `finish` waits for the renderer to see the done flag and exit.
pub const FINISH_GRACE: Duration = Duration::from_millis(200);

pub const RENDERER_SUBCOMMAND: &str = "render-progress";

pub const SPINNER_FRAMES: &[&str] = &["⠋", "⠙", "⠚", "⠞", "⠖", "⠦", "⠴", "⠲", "⠳", "⠓"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub completed: u64,
    pub total: i64,
    pub done: bool,
}

impl Snapshot {
    pub fn new(total: i64) -> Self {
        Self {
            completed: 0,
            total,
            done: false,
        }
    }

    pub fn percent(&self) -> Option<u64> {
        let total = u64::try_from(self.total).ok()?;
        if total == 0 {
            return Some(100);
        }
        Some((self.completed.min(total) * 100) / total)
    }
}

pub trait ProgressSink {
    fn open(&self, prefix: &str, total: i64) -> ProgressChannel;
}

/// Spawns a renderer process per session. Falls back to a detached channel
/// when the process cannot be started.
#[derive(Debug, Clone, Copy, Default)]
pub struct RendererSink;

impl ProgressSink for RendererSink {
    fn open(&self, prefix: &str, total: i64) -> ProgressChannel {
        match ProgressChannel::spawn(prefix, total) {
            Ok(channel) => channel,
            Err(err) => {
                warn!(error = %err, "progress renderer unavailable");
                ProgressChannel::detached(total)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SilentSink;

impl ProgressSink for SilentSink {
    fn open(&self, _prefix: &str, total: i64) -> ProgressChannel {
        ProgressChannel::detached(total)
    }
}

pub struct ProgressChannel {
    prefix: String,
    snapshot: Snapshot,
    writer: Option<Box<dyn Write + Send>>,
    renderer: Option<Child>,
    renderer_exit: Option<ExitStatus>,
    announce: bool,
}

impl ProgressChannel {
    pub fn spawn(prefix: &str, total: i64) -> Result<Self, MalqError> {
        let exe = env::current_exe().map_err(|err| MalqError::Progress(err.to_string()))?;
        let mut channel = Self::spawn_with(&exe, prefix, total, Stdio::inherit())?;
        channel.announce = true;
        Ok(channel)
    }

    /// Starts `exe render-progress` with its frames going to `stdout`.
    pub fn spawn_with(
        exe: &Path,
        prefix: &str,
        total: i64,
        stdout: Stdio,
    ) -> Result<Self, MalqError> {
        let mut child = Command::new(exe)
            .arg(RENDERER_SUBCOMMAND)
            .arg("--prefix")
            .arg(prefix)
            .stdin(Stdio::piped())
            .stdout(stdout)
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| MalqError::Progress(err.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MalqError::Progress("renderer stdin unavailable".to_string()))?;
        debug!(pid = child.id(), total, "progress renderer started");

        let mut channel = Self {
            prefix: prefix.to_string(),
            snapshot: Snapshot::new(total),
            writer: Some(Box::new(stdin)),
            renderer: Some(child),
            renderer_exit: None,
            announce: false,
        };
        channel.send();
        Ok(channel)
    }

    pub fn with_writer(prefix: &str, total: i64, writer: Box<dyn Write + Send>) -> Self {
        let mut channel = Self {
            prefix: prefix.to_string(),
            snapshot: Snapshot::new(total),
            writer: Some(writer),
            renderer: None,
            renderer_exit: None,
            announce: false,
        };
        channel.send();
        channel
    }

    pub fn detached(total: i64) -> Self {
        Self {
            prefix: String::new(),
            snapshot: Snapshot::new(total),
            writer: None,
            renderer: None,
            renderer_exit: None,
            announce: false,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
    }

    pub fn renderer_pid(&self) -> Option<u32> {
        self.renderer.as_ref().map(Child::id)
    }

    /// Exit status of the renderer once `finish` has reaped it. A renderer
    /// killed after the grace period reports a non-success status.
    pub fn renderer_exit(&self) -> Option<ExitStatus> {
        self.renderer_exit
    }

    pub fn advance(&mut self) {
        if self.snapshot.done {
            debug!("advance after finish ignored");
            return;
        }
        self.snapshot.completed += 1;
        self.send();
    }

    pub fn finish(&mut self) {
        if self.snapshot.done {
            return;
        }
        self.snapshot.done = true;
        self.send();
        // Closing the pipe is the renderer's second exit signal.
        self.writer = None;

        if let Some(mut child) = self.renderer.take() {
            let deadline = Instant::now() + FINISH_GRACE;
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        self.renderer_exit = Some(status);
                        break;
                    }
                    Ok(None) if Instant::now() < deadline => {
                        thread::sleep(Duration::from_millis(10));
                    }
                    _ => {
                        debug!("renderer outlived grace period, killing");
                        let _ = child.kill();
                        self.renderer_exit = child.wait().ok();
                        break;
                    }
                }
            }
        }

        if self.announce {
            println!("{}done.", self.prefix);
        }
    }

    fn send(&mut self) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let result = serde_json::to_string(&self.snapshot)
            .map_err(io::Error::other)
            .and_then(|line| {
                writer.write_all(line.as_bytes())?;
                writer.write_all(b"\n")?;
                writer.flush()
            });
        if let Err(err) = result {
            warn!(error = %err, "progress renderer went away");
            self.writer = None;
        }
    }
}

impl Drop for ProgressChannel {
    fn drop(&mut self) {
        self.finish();
    }
}

pub fn render_frame(prefix: &str, tick: usize, snapshot: &Snapshot) -> String {
    let spinner = SPINNER_FRAMES[tick % SPINNER_FRAMES.len()];
    match snapshot.percent() {
        Some(percent) => format!("\r {prefix}{spinner} {percent}%"),
        None => format!("\r {prefix}{spinner}"),
    }
}

/// Renderer loop. Redraws on every `tick` and whenever a snapshot arrives.
/// Returns the number of frames drawn once it has drawn a done snapshot or
/// the input is closed.
pub fn run_renderer<R, W>(prefix: &str, input: R, out: &mut W, tick: Duration) -> io::Result<usize>
where
    R: Read + Send + 'static,
    W: Write,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(input).lines() {
            let Ok(line) = line else { break };
            if let Ok(snapshot) = serde_json::from_str::<Snapshot>(&line) {
                if tx.send(snapshot).is_err() {
                    break;
                }
            }
        }
    });

    queue!(out, cursor::Hide)?;
    let mut latest = Snapshot::new(INDETERMINATE);
    let mut frames = 0usize;
    let mut closed = false;
    loop {
        out.write_all(render_frame(prefix, frames, &latest).as_bytes())?;
        out.flush()?;
        frames += 1;

        if latest.done || closed {
            break;
        }
        match rx.recv_timeout(tick) {
            Ok(snapshot) => latest = snapshot,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                closed = true;
                continue;
            }
        }
        loop {
            match rx.try_recv() {
                Ok(snapshot) => latest = snapshot,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }
    }

    queue!(
        out,
        cursor::MoveToColumn(0),
        terminal::Clear(terminal::ClearType::CurrentLine),
        cursor::Show
    )?;
    out.flush()?;
    Ok(frames)
}
