//! Client/session registry.
//!
//! Owns every session and every connected client. All mutation happens on
//! the loop thread under one mutex; the per-session reader threads never
//! touch it. The registry also decides session lifetime: a session whose
//! attached-client set is empty and whose keep-alive flag is false is
//! destroyed, and with `exit_on_idle` the daemon shuts down once the last
//! client disconnects.

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::session::Session;

/// Clients are identified by their accepted socket file descriptor, which
/// is unique while the socket is open.
pub type ClientId = std::os::unix::io::RawFd;

/// A connected front-end.
///
/// The send queue is a FIFO channel drained by the client's writer task;
/// that task has at most one write in flight, so queued buffers go out
/// strictly in order.
pub struct Client {
    pub id: ClientId,
    /// Cancelled before the client's fd is closed, voiding any pending I/O.
    pub cancel: CancellationToken,
    /// Sessions this client is attached to.
    pub attached: BTreeSet<u64>,
    /// Style IDs already defined to this client.
    pub seen_styles: HashSet<u16>,
    send_tx: mpsc::UnboundedSender<Bytes>,
}

impl Client {
    /// Queue bytes for transmission to this client.
    pub fn send_data(&self, data: Bytes) {
        // A closed channel means the writer task is gone and the client is
        // mid-teardown; the bytes would never arrive anyway.
        if self.send_tx.send(data).is_err() {
            tracing::debug!(client = self.id, "send queue closed, dropping data");
        }
    }
}

/// Daemon-level behavior switches.
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// Stop accepting connections and shut down when the client list
    /// becomes empty.
    pub exit_on_idle: bool,
    /// Default shell for spawned sessions (overrides $SHELL).
    pub shell: Option<String>,
}

pub(crate) struct Inner {
    pub sessions: BTreeMap<u64, Session>,
    pub clients: HashMap<ClientId, Client>,
    next_session_id: u64,
}

/// Shared handle to the registry.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Mutex<Inner>>,
    options: Arc<RegistryOptions>,
    shutdown: CancellationToken,
}

impl Registry {
    pub fn new(options: RegistryOptions) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                sessions: BTreeMap::new(),
                clients: HashMap::new(),
                next_session_id: 0,
            })),
            options: Arc::new(options),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// Token cancelled when the daemon should stop accepting and return.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock()
    }

    /// Reserve the next session ID. IDs are strictly increasing and never
    /// reused, even when a subsequent spawn fails.
    pub fn allocate_session_id(&self) -> u64 {
        let mut inner = self.lock();
        let id = inner.next_session_id;
        inner.next_session_id += 1;
        id
    }

    pub fn insert_session(&self, session: Session) {
        self.lock().sessions.insert(session.id, session);
    }

    /// Register a newly accepted client connection.
    pub fn add_client(
        &self,
        id: ClientId,
        send_tx: mpsc::UnboundedSender<Bytes>,
        cancel: CancellationToken,
    ) {
        let client = Client {
            id,
            cancel,
            attached: BTreeSet::new(),
            seen_styles: HashSet::new(),
            send_tx,
        };
        self.lock().clients.insert(id, client);
    }

    /// Disconnect a client and cascade session cleanup.
    ///
    /// Removes the client from every session it was attached to, then
    /// destroys every session left with no attached clients and
    /// keep-alive unset. With `exit_on_idle`, an empty client list triggers
    /// daemon shutdown.
    pub fn remove_client(&self, id: ClientId) {
        let idle = {
            let mut inner = self.lock();
            let Some(client) = inner.clients.remove(&id) else {
                return;
            };
            client.cancel.cancel();

            for sid in &client.attached {
                if let Some(session) = inner.sessions.get_mut(sid) {
                    session.attached.retain(|c| c != &id);
                    session.pending_full.remove(&id);
                }
            }

            let doomed: Vec<u64> = inner
                .sessions
                .iter()
                .filter(|(_, s)| s.attached.is_empty() && !s.keep_alive)
                .map(|(sid, _)| *sid)
                .collect();
            for sid in doomed {
                if let Some(session) = inner.sessions.remove(&sid) {
                    session.destroy();
                }
            }

            inner.clients.is_empty()
        };

        tracing::debug!(client = id, "client removed");

        if idle && self.options.exit_on_idle {
            tracing::info!("last client disconnected, shutting down");
            self.shutdown.cancel();
        }
    }

    /// Destroy every session. Called on daemon shutdown.
    pub fn drain(&self) {
        let sessions: Vec<Session> = {
            let mut inner = self.lock();
            let ids: Vec<u64> = inner.sessions.keys().copied().collect();
            ids.into_iter()
                .filter_map(|id| inner.sessions.remove(&id))
                .collect()
        };
        for session in sessions {
            session.destroy();
        }
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn client_count(&self) -> usize {
        self.lock().clients.len()
    }

    /// Whether a session currently exists.
    pub fn has_session(&self, id: u64) -> bool {
        self.lock().sessions.contains_key(&id)
    }
}
