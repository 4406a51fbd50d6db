//! # Event Router
//!
//! Owns the set of current subscribers, routes asynchronous reply-groups to
//! them, and keeps Tor's `SETEVENTS` active set synchronized with demand.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::proto::{EventKind, ReplyGroup};

/// Identity returned from [`EventRouter::add`], used to remove a single
/// subscription later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// An (EventKind, tag, delivery-callback) triple. The tag is optional and
/// exists purely to let a caller remove a batch of subscriptions together.
struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    tag: Option<String>,
    callback: Arc<dyn Fn(&str) + Send + Sync>,
}

/// Routes parsed event groups to subscriber callbacks and reconciles Tor's
/// `SETEVENTS` active set as subscriptions change.
pub struct EventRouter {
    subs: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
    active_set: Mutex<HashSet<String>>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        EventRouter {
            subs: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            active_set: Mutex::new(HashSet::new()),
        }
    }

    /// Registers a subscriber. The returned id can be passed to
    /// [`EventRouter::remove`]. Callers needing the active set reconciled
    /// against Tor must additionally call [`EventRouter::reconcile`].
    pub fn add<F>(&self, kind: EventKind, tag: Option<String>, callback: F) -> SubscriptionId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subs.lock().push(Subscription {
            id,
            kind,
            tag,
            callback: Arc::new(callback),
        });
        id
    }

    pub fn remove(&self, id: SubscriptionId) {
        self.subs.lock().retain(|s| s.id != id);
    }

    pub fn remove_by_tag(&self, tag: &str) {
        self.subs.lock().retain(|s| s.tag.as_deref() != Some(tag));
    }

    pub fn remove_by_event(&self, kind: &EventKind) {
        self.subs.lock().retain(|s| &s.kind != kind);
    }

    pub fn clear(&self) {
        self.subs.lock().clear();
    }

    /// The set of event kinds with at least one current subscriber.
    fn desired_set(&self) -> HashSet<String> {
        self.subs
            .lock()
            .iter()
            .map(|s| s.kind.as_str().to_string())
            .collect()
    }

    /// Computes the desired active set and, if it differs from what was last
    /// sent to Tor, returns the sorted kind list a `SETEVENTS` command should
    /// carry, optimistically recording it as the new active set. Returns
    /// `None` if nothing changed.
    ///
    /// The caller (Session Controller) is responsible for actually enqueuing
    /// the command and retrying once on failure, per the debounced
    /// reconciliation policy — this method only decides whether one is due.
    pub fn reconcile_kinds(&self) -> Option<Vec<String>> {
        let desired = self.desired_set();
        let mut active = self.active_set.lock();
        if *active == desired {
            return None;
        }
        let mut kinds: Vec<String> = desired.iter().cloned().collect();
        kinds.sort();
        *active = desired;
        Some(kinds)
    }

    /// Clears the locally-tracked active set without sending another
    /// `SETEVENTS` — used on session destruction, a best-effort cleanup.
    pub fn forget_active_set(&self) {
        self.active_set.lock().clear();
    }

    /// Dispatches one parsed event group. `group` must be asynchronous
    /// (status `6xx`); the first token of its first reply is the event-kind
    /// name. Unknown kinds are silently dropped. Subscriber panics are caught
    /// and logged; they never escape to the caller.
    pub fn dispatch(&self, group: &ReplyGroup) {
        debug_assert!(group.is_event());
        let first = group.first_message();
        let (token, rest) = first.split_once(' ').unwrap_or((first, ""));
        let kind = EventKind::parse(token);

        let payload = if group.replies[0].body.is_some() {
            group.replies[0].body.clone().unwrap_or_default()
        } else {
            rest.to_string()
        };

        // Snapshot under the lock, then invoke callbacks outside it so a slow
        // or reentrant subscriber never blocks `add`/`remove`.
        let matching: Vec<Arc<dyn Fn(&str) + Send + Sync>> = {
            let subs = self.subs.lock();
            subs.iter()
                .filter(|s| s.kind == kind)
                .map(|s| s.callback.clone())
                .collect()
        };
        if matching.is_empty() {
            if !matches!(kind, EventKind::Unknown(_)) {
                debug!(%kind, "event with no current subscriber");
            }
            return;
        }

        for callback in matching {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(&payload);
            }));
            if outcome.is_err() {
                warn!(%kind, "event subscriber callback panicked");
            }
        }
    }

    /// Invoked once at session destruction: every subscriber is dropped
    /// without further notification (the spec's "final session destroyed
    /// signal" is delivered by the Session Controller via `on_destroy`, not
    /// replayed per-subscription here).
    pub fn shutdown(&self) {
        self.clear();
        self.forget_active_set();
    }
}
