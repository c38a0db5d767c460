//! Hand-off of in-flight turn streams between the request that starts a turn
//! and the SSE request that consumes it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::pipeline::TurnEvents;

/// Streams not claimed within this window are dropped.
pub const STREAM_CLAIM_TTL: Duration = Duration::from_secs(300);

/// A turn stream waiting to be consumed.
pub struct PendingStream {
    pub events: TurnEvents,
    created: Instant,
}

impl PendingStream {
    fn is_expired(&self) -> bool {
        self.created.elapsed() >= STREAM_CLAIM_TTL
    }
}

#[derive(Default)]
pub struct StreamRegistry {
    pending: Mutex<HashMap<Uuid, PendingStream>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `events` and return the id that claims it.
    pub fn register(&self, events: TurnEvents) -> Uuid {
        let id = Uuid::new_v4();
        let mut pending = self.pending.lock();
        purge_expired(&mut pending);
        pending.insert(
            id,
            PendingStream {
                events,
                created: Instant::now(),
            },
        );
        id
    }

    /// Remove and return the stream for `id`. Each stream can be claimed once.
    pub fn claim(&self, id: &Uuid) -> Option<PendingStream> {
        let mut pending = self.pending.lock();
        purge_expired(&mut pending);
        pending.remove(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

fn purge_expired(pending: &mut HashMap<Uuid, PendingStream>) {
    let before = pending.len();
    pending.retain(|_, s| !s.is_expired());
    let dropped = before - pending.len();
    if dropped > 0 {
        tracing::debug!("Dropped {dropped} unclaimed streams");
    }
}
