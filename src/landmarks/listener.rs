//! Landmark listener for the external pose estimator
//!
//! Reads newline-delimited JSON frames from stdin or from a child
//! process. Runs on a dedicated thread since reads block.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::frame::Frame;
use crate::config::LandmarkSource;

/// Events sent from the landmark listener to the gesture pipeline
#[derive(Debug, Clone)]
pub enum FrameEvent {
    /// A decoded frame and the moment it was read
    Frame { frame: Frame, at: Instant },
    /// The estimator stopped producing output
    SourceClosed,
}

/// Errors that can occur in the landmark listener
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("landmark listener is already running")]
    AlreadyRunning,

    #[error("failed to start pose estimator `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pose estimator has no stdout")]
    NoStdout,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),
}

/// Listener that forwards estimator frames into the pipeline
pub struct LandmarkListener {
    source: LandmarkSource,
    event_tx: mpsc::Sender<FrameEvent>,
    running: Arc<AtomicBool>,
    child: Arc<Mutex<Option<Child>>>,
}

impl LandmarkListener {
    /// Create a new landmark listener
    pub fn new(source: LandmarkSource, event_tx: mpsc::Sender<FrameEvent>) -> Self {
        Self {
            source,
            event_tx,
            running: Arc::new(AtomicBool::new(false)),
            child: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the listener
    ///
    /// For a command source the child process is spawned here, so a
    /// missing estimator is reported to the caller before any frame is
    /// read.
    pub fn start(&self) -> Result<(), ListenerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ListenerError::AlreadyRunning);
        }

        let reader: Box<dyn Read + Send> = match &self.source {
            LandmarkSource::Stdin => Box::new(std::io::stdin()),
            LandmarkSource::Command(command) => match self.spawn_estimator(command) {
                Ok(stdout) => stdout,
                Err(e) => {
                    self.running.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            },
        };

        self.start_with_reader(reader)
    }

    /// Start reading frames from an arbitrary reader
    pub fn start_with_reader<R>(&self, reader: R) -> Result<(), ListenerError>
    where
        R: Read + Send + 'static,
    {
        self.running.store(true, Ordering::SeqCst);

        let event_tx = self.event_tx.clone();
        let running = Arc::clone(&self.running);

        thread::Builder::new()
            .name("landmark-listener".to_string())
            .spawn(move || {
                info!("landmark listener thread started");

                read_frames(BufReader::new(reader), &event_tx, &running);

                running.store(false, Ordering::SeqCst);
                let _ = event_tx.blocking_send(FrameEvent::SourceClosed);
                info!("landmark listener thread stopped");
            })
            .map_err(|e| ListenerError::ThreadSpawn(e.to_string()))?;

        Ok(())
    }

    /// Stop the listener and the estimator process, if any
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        let child = match self.child.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut child) = child {
            if let Err(e) = child.kill() {
                debug!(?e, "pose estimator already exited");
            }
            let _ = child.wait();
        }
    }

    /// Check if the listener is currently running
    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn spawn_estimator(&self, command: &str) -> Result<Box<dyn Read + Send>, ListenerError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ListenerError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(ListenerError::NoStdout)?;
        info!(pid = child.id(), command, "pose estimator started");

        match self.child.lock() {
            Ok(mut guard) => *guard = Some(child),
            Err(poisoned) => *poisoned.into_inner() = Some(child),
        }

        Ok(Box::new(stdout))
    }
}

/// Pump lines from the reader into the channel until EOF or stop
///
/// Lines that are not UTF-8 or not a valid frame are skipped; only EOF,
/// a read error or a closed channel end the loop.
fn read_frames<R: BufRead>(mut reader: R, event_tx: &mpsc::Sender<FrameEvent>, running: &AtomicBool) {
    let mut buf = Vec::new();
    let mut line_no = 0usize;

    while running.load(Ordering::SeqCst) {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => line_no += 1,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(?e, "failed to read from pose estimator");
                break;
            }
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping non-UTF-8 landmark frame");
                continue;
            }
        };

        if line.is_empty() {
            continue;
        }

        let frame = match Frame::parse(line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping landmark frame");
                continue;
            }
        };

        let event = FrameEvent::Frame {
            frame,
            at: Instant::now(),
        };
        if event_tx.blocking_send(event).is_err() {
            warn!("failed to send frame - channel closed?");
            break;
        }
    }
}
