// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::UnboundedSender;

/// Identifies one WebSocket connection for the lifetime of the process.
/// Used to tell a stale close of a replaced socket from a live one, and
/// to address individual spectators.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// What the server actor pushes to a socket task.
#[derive(Debug)]
pub enum ObserverUpdate<O> {
    Send { message: O },
    /// Send a close frame with this code and hang up.
    Close { code: u16 },
}

/// Outbound half of one connection, held by the server actor.
pub type Observer<O> = UnboundedSender<ObserverUpdate<O>>;

/// Best-effort send; the socket task may already be gone.
pub fn observe<O>(observer: &Observer<O>, message: O) -> bool {
    observer.send(ObserverUpdate::Send { message }).is_ok()
}

/// Ask the socket task to close with `code`.
pub fn observe_close<O>(observer: &Observer<O>, code: u16) {
    let _ = observer.send(ObserverUpdate::Close { code });
}
