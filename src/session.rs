//! Session lifecycle: one PTY, its emulated screen, and the thread and
//! tasks serving them.
//!
//! Each session owns a dedicated OS reader thread because PTY reads block
//! and the emulator's stream parser must be fed whole chunks under a mutex;
//! coupling either to the event loop would stall it. The reader's only
//! outputs are mutated emulator state (under the session mutex) and wake
//! tokens on the session's wake channel; it never touches clients, the
//! registry, or any socket.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io::Read;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::pty::{self, Pty, PtyError, SpawnCommand};
use crate::registry::ClientId;
use crate::term::Term;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Pty(#[from] PtyError),

    #[error("failed to spawn reader thread: {0}")]
    ReaderThread(#[source] std::io::Error),
}

/// A single terminal session: PTY, emulator state, and attachment tracking.
///
/// Exclusively owned by the registry. All fields that the dispatcher and
/// frame scheduler touch are guarded by the registry lock; the emulator is
/// additionally behind its own mutex, shared with the reader thread.
pub struct Session {
    pub id: u64,
    /// PID of the child process, if the platform exposes one.
    pub pid: Option<u32>,
    pub rows: u16,
    pub cols: u16,
    /// Set by an explicit detach; a session with keep-alive survives its
    /// attached-client count reaching zero.
    pub keep_alive: bool,
    /// Clients receiving redraws, in attach order.
    pub attached: Vec<ClientId>,
    /// Clients whose next redraw must be a full capture.
    pub pending_full: HashSet<ClientId>,
    /// Emulator state, shared with the reader thread.
    pub term: Arc<Mutex<Term>>,
    pty: Pty,
    input_tx: mpsc::Sender<Bytes>,
    wake_tx: mpsc::Sender<()>,
    running: Arc<AtomicBool>,
    reader: Option<std::thread::JoinHandle<()>>,
}

impl Session {
    /// Spawn a new session: open the PTY, start the writer task and the
    /// reader thread.
    ///
    /// Returns the session and the receive end of its wake channel, which
    /// the caller hands to the frame scheduler.
    pub fn spawn(
        id: u64,
        rows: u16,
        cols: u16,
        command: &SpawnCommand,
    ) -> Result<(Self, mpsc::Receiver<()>), SessionError> {
        let mut pty = Pty::spawn(rows, cols, command)?;
        let pid = pty.child_pid();
        let pty_reader = pty.take_reader()?;
        let pty_writer = pty.take_writer()?;
        let child = pty.take_child();

        let term = Arc::new(Mutex::new(Term::new(rows as usize, cols as usize)));
        let (input_tx, input_rx) = mpsc::channel::<Bytes>(64);
        // Capacity 1: multiple wakes between frames coalesce into one token.
        let (wake_tx, wake_rx) = mpsc::channel::<()>(1);
        let running = Arc::new(AtomicBool::new(true));

        spawn_pty_writer(id, pty_writer, input_rx);

        let reader = {
            let term = Arc::clone(&term);
            let input_tx = input_tx.clone();
            let wake_tx = wake_tx.clone();
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name(format!("pty-read-{id}"))
                .spawn(move || {
                    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        read_loop(id, pty_reader, &term, &input_tx, &wake_tx, &running);
                    }));
                    if let Err(e) = result {
                        tracing::error!(session = id, "PTY reader thread panicked: {e:?}");
                    }
                    // Reap the child on the way out so it never lingers as
                    // a zombie.
                    if let Some(mut child) = child {
                        match child.wait() {
                            Ok(status) => {
                                tracing::debug!(session = id, ?status, "session child exited")
                            }
                            Err(e) => {
                                tracing::error!(session = id, ?e, "error waiting for child")
                            }
                        }
                    }
                })
                .map_err(SessionError::ReaderThread)?
        };

        tracing::info!(session = id, ?pid, rows, cols, "session spawned");

        let session = Session {
            id,
            pid,
            rows,
            cols,
            keep_alive: false,
            attached: Vec::new(),
            pending_full: HashSet::new(),
            term,
            pty,
            input_tx,
            wake_tx,
            running,
            reader: Some(reader),
        };
        Ok((session, wake_rx))
    }

    /// Sender for bytes destined for the PTY master (client input,
    /// key-input encodings, device-query replies).
    pub fn input_sender(&self) -> mpsc::Sender<Bytes> {
        self.input_tx.clone()
    }

    /// Request a render. A full wake channel means one is already pending.
    pub fn poke_wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    /// Resize the PTY window and the emulated screen.
    pub fn resize(&mut self, rows: u16, cols: u16) -> Result<(), PtyError> {
        self.pty.resize(rows, cols)?;
        self.rows = rows;
        self.cols = cols;
        self.term.lock().resize(rows as usize, cols as usize);
        self.poke_wake();
        Ok(())
    }

    /// Tear the session down: SIGHUP the child, stop the reader, join it.
    ///
    /// The join (which also reaps the child) completes on a detached joiner
    /// thread so a child that ignores SIGHUP cannot stall the loop; such a
    /// child gets SIGKILL after three seconds.
    pub fn destroy(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(pid) = self.pid {
            pty::send_signal(pid, libc::SIGHUP);
        }

        if let Some(handle) = self.reader.take() {
            let id = self.id;
            let pid = self.pid;
            let joiner = std::thread::Builder::new()
                .name(format!("pty-join-{id}"))
                .spawn(move || {
                    let deadline = std::time::Instant::now() + Duration::from_secs(3);
                    while !handle.is_finished() {
                        if std::time::Instant::now() >= deadline {
                            if let Some(pid) = pid {
                                tracing::warn!(
                                    session = id,
                                    pid,
                                    "child ignored SIGHUP, sending SIGKILL"
                                );
                                pty::send_signal(pid, libc::SIGKILL);
                            }
                            break;
                        }
                        std::thread::sleep(Duration::from_millis(50));
                    }
                    let _ = handle.join();
                });
            if let Err(e) = joiner {
                tracing::error!(session = id, ?e, "failed to spawn joiner thread");
            }
        }

        tracing::info!(session = self.id, "session destroyed");
        // Dropping self closes the PTY master and the wake channel; the
        // frame scheduler exits when the channel closes.
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("attached", &self.attached)
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}

/// Reader-thread loop. Blocks on the PTY master; each chunk is fed into the
/// emulator under the session mutex, then a wake token is sent unless the
/// application holds synchronized-output mode.
fn read_loop(
    id: u64,
    mut reader: Box<dyn Read + Send>,
    term: &Mutex<Term>,
    input_tx: &mpsc::Sender<Bytes>,
    wake_tx: &mpsc::Sender<()>,
    running: &AtomicBool,
) {
    let mut buf = [0u8; 4096];
    while running.load(Ordering::Relaxed) {
        let n = match reader.read(&mut buf) {
            Ok(0) => {
                tracing::debug!(session = id, "PTY reader: EOF");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(session = id, ?e, "PTY reader: read error");
                break;
            }
        };

        let synchronized = {
            let mut term = term.lock();
            term.feed(&buf[..n], |reply| {
                // Must not block while holding the session mutex.
                let _ = input_tx.try_send(Bytes::copy_from_slice(reply));
            });
            term.synchronized_output()
        };

        if !synchronized {
            let _ = wake_tx.try_send(());
        }
    }
}

/// PTY writer thread: drains the input channel into the master, in order.
///
/// A dedicated thread rather than a runtime task: PTY writes can block, and
/// the thread must outlive any runtime the daemon happens to shut down.
fn spawn_pty_writer(
    id: u64,
    mut writer: Box<dyn std::io::Write + Send>,
    mut input_rx: mpsc::Receiver<Bytes>,
) {
    let spawned = std::thread::Builder::new()
        .name(format!("pty-write-{id}"))
        .spawn(move || {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                while let Some(data) = input_rx.blocking_recv() {
                    if let Err(e) = writer.write_all(&data) {
                        tracing::debug!(session = id, ?e, "PTY writer: write error");
                        break;
                    }
                    let _ = writer.flush();
                }
            }));
            if let Err(e) = result {
                tracing::error!(session = id, "PTY writer thread panicked: {e:?}");
            }
        });
    if let Err(e) = spawned {
        tracing::error!(session = id, ?e, "failed to spawn PTY writer thread");
    }
}
