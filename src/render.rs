//! Per-session frame scheduler.
//!
//! The reader thread pokes the session's wake channel after feeding output;
//! this task turns those wakes into screen captures and redraw
//! notifications, pacing frames so no session exceeds one redraw per
//! [`FRAME_INTERVAL`] while the most recent emulator state is always
//! delivered within one frame.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::redraw;
use crate::registry::Registry;
use crate::term::Term;

/// Target inter-frame time: bounds redraws to ~125 Hz per session.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(8);

/// Spawn the scheduler task for a session.
///
/// The task exits when the wake channel closes (session destroyed) or the
/// session disappears from the registry.
pub fn spawn(registry: Registry, session_id: u64, term: Arc<Mutex<Term>>, wake_rx: mpsc::Receiver<()>) {
    tokio::spawn(async move {
        let result = AssertUnwindSafe(run(registry, session_id, term, wake_rx))
            .catch_unwind()
            .await;
        if let Err(e) = result {
            tracing::error!(session = session_id, "frame scheduler panicked: {e:?}");
        }
    });
}

async fn run(
    registry: Registry,
    session_id: u64,
    term: Arc<Mutex<Term>>,
    mut wake_rx: mpsc::Receiver<()>,
) {
    let mut last_render: Option<Instant> = None;

    while wake_rx.recv().await.is_some() {
        // Coalesce: every wake queued behind this one is part of this frame.
        while wake_rx.try_recv().is_ok() {}

        if let Some(last) = last_render {
            let elapsed = last.elapsed();
            if elapsed < FRAME_INTERVAL {
                tokio::time::sleep(FRAME_INTERVAL - elapsed).await;
                // Absorb wakes that arrived while we waited out the frame gap.
                while wake_rx.try_recv().is_ok() {}
            }
        }

        if !render_frame(&registry, session_id, &term) {
            break;
        }
        last_render = Some(Instant::now());
    }

    tracing::debug!(session = session_id, "frame scheduler stopped");
}

/// Capture one frame and multicast redraw notifications to every attached
/// client. Returns false when the session no longer exists.
fn render_frame(registry: &Registry, session_id: u64, term: &Mutex<Term>) -> bool {
    let mut inner = registry.lock();

    let Some(session) = inner.sessions.get_mut(&session_id) else {
        return false;
    };
    let attached = session.attached.clone();
    let pending_full: HashSet<_> = session.pending_full.drain().collect();

    if attached.is_empty() {
        // Nothing to deliver; dirty state keeps accumulating until the next
        // attach replays it as a full redraw.
        return true;
    }

    // Capture under the session mutex, with the registry lock held so the
    // attachment set cannot change mid-frame. The reader thread only ever
    // takes the term mutex, so this nesting cannot deadlock.
    let any_full = !pending_full.is_empty();
    let snapshot = term.lock().snapshot(any_full);

    for client_id in attached {
        let Some(client) = inner.clients.get_mut(&client_id) else {
            continue;
        };
        // A screen-level dirty condition promotes everyone to a full
        // redraw; a fresh attachment promotes just that client.
        let full = snapshot.promoted || pending_full.contains(&client_id);
        let notification = redraw::build(&snapshot, session_id, full, &mut client.seen_styles);
        client.send_data(notification.encode());
    }

    true
}
