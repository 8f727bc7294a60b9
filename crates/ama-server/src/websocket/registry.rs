//! Which live connections are watching which room.

use std::collections::HashMap;
use std::sync::Arc;

use ama_core::RoomId;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::cancel::CancelSignal;
use super::connection::{ClientId, ConnectionHandle};

/// One connection's interest in one room.
#[derive(Clone, Debug)]
pub struct Subscription {
    pub connection: Arc<ConnectionHandle>,
    pub cancel: CancelSignal,
}

type SubscriberSet = HashMap<ClientId, Subscription>;

/// Room id → subscriber set, behind a single lock.
///
/// Critical sections only touch the map; every send and every signal
/// trigger happens after the guard is dropped.
pub struct SubscriberRegistry {
    rooms: Mutex<HashMap<RoomId, SubscriberSet>>,
    shutdown: CancellationToken,
    max_per_room: usize,
    drained: Notify,
}

impl SubscriberRegistry {
    /// A registry whose signals are only ever triggered individually.
    pub fn new(max_per_room: usize) -> Self {
        Self::with_shutdown(CancellationToken::new(), max_per_room)
    }

    /// A registry whose signals all fire when `shutdown` is cancelled.
    pub fn with_shutdown(shutdown: CancellationToken, max_per_room: usize) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            shutdown,
            max_per_room,
            drained: Notify::new(),
        }
    }

    /// Add `connection` to `room` and hand back its stop signal.
    pub fn register(&self, room: &RoomId, connection: Arc<ConnectionHandle>) -> CancelSignal {
        let cancel = CancelSignal::child_of(&self.shutdown);
        let client_id = connection.id().clone();
        let subscription = Subscription {
            connection,
            cancel: cancel.clone(),
        };

        let (replaced, room_size) = {
            let mut rooms = self.rooms.lock();
            let set = rooms.entry(*room).or_default();
            let replaced = set.insert(client_id.clone(), subscription);
            (replaced, set.len())
        };

        if let Some(old) = replaced {
            warn!(room_id = %room, client_id = %client_id, "connection registered twice, stopping stale subscription");
            old.cancel.trigger();
        }
        debug!(room_id = %room, client_id = %client_id, room_size, "subscriber registered");
        cancel
    }

    /// Remove the registration that handed out `cancel`.
    ///
    /// Returns `false` if it was already gone or has been replaced by a newer
    /// registration of the same connection, which stays untouched.
    pub fn unregister(&self, room: &RoomId, client_id: &ClientId, cancel: &CancelSignal) -> bool {
        let (removed, now_empty) = {
            let mut rooms = self.rooms.lock();
            let Some(set) = rooms.get_mut(room) else {
                return false;
            };
            let owned = set
                .get(client_id)
                .is_some_and(|sub| sub.cancel.same_as(cancel));
            if owned {
                let _ = set.remove(client_id);
            }
            if set.is_empty() {
                let _ = rooms.remove(room);
            }
            (owned, rooms.is_empty())
        };

        if removed {
            debug!(room_id = %room, client_id = %client_id, "subscriber unregistered");
        }
        if now_empty {
            self.drained.notify_waiters();
        }
        removed
    }

    /// Resolve once no room has any subscriber left.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.room_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Copy of the room's current subscriptions, in no particular order.
    pub fn snapshot(&self, room: &RoomId) -> Vec<Subscription> {
        self.rooms
            .lock()
            .get(room)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `room` is below the per-room subscriber cap.
    ///
    /// Checked before the transport upgrade; concurrent subscribers can
    /// overshoot the cap by the number racing through this check.
    pub fn has_capacity(&self, room: &RoomId) -> bool {
        self.subscriber_count(room) < self.max_per_room
    }

    pub fn subscriber_count(&self, room: &RoomId) -> usize {
        self.rooms.lock().get(room).map_or(0, HashMap::len)
    }

    /// Rooms with at least one subscriber.
    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }

    pub fn total_subscribers(&self) -> usize {
        self.rooms.lock().values().map(HashMap::len).sum()
    }

    /// Trigger every live subscription's signal. Sessions unregister themselves.
    pub fn cancel_all(&self) -> usize {
        let signals: Vec<CancelSignal> = self
            .rooms
            .lock()
            .values()
            .flat_map(|set| set.values().map(|s| s.cancel.clone()))
            .collect();

        for signal in &signals {
            signal.trigger();
        }
        signals.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Utf8Bytes;
    use tokio::sync::mpsc;

    fn make_connection() -> (Arc<ConnectionHandle>, mpsc::Receiver<Utf8Bytes>) {
        let (tx, rx) = mpsc::channel(8);
        (Arc::new(ConnectionHandle::new(ClientId::new(), None, tx)), rx)
    }

    #[test]
    fn register_and_snapshot() {
        let registry = SubscriberRegistry::new(10);
        let room = RoomId::new();
        let (c1, _rx1) = make_connection();
        let (c2, _rx2) = make_connection();

        let _ = registry.register(&room, c1.clone());
        let _ = registry.register(&room, c2.clone());

        let snap = registry.snapshot(&room);
        assert_eq!(snap.len(), 2);
        let mut ids: Vec<_> = snap.iter().map(|s| s.connection.id().clone()).collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        let mut expected = vec![c1.id().clone(), c2.id().clone()];
        expected.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(ids, expected);
    }

    #[test]
    fn snapshot_of_unknown_room_is_empty() {
        let registry = SubscriberRegistry::new(10);
        assert!(registry.snapshot(&RoomId::new()).is_empty());
    }

    #[test]
    fn snapshot_is_a_copy() {
        let registry = SubscriberRegistry::new(10);
        let room = RoomId::new();
        let (c1, _rx) = make_connection();
        let s1 = registry.register(&room, c1.clone());

        let snap = registry.snapshot(&room);
        assert!(registry.unregister(&room, c1.id(), &s1));
        assert_eq!(snap.len(), 1);
        assert_eq!(registry.subscriber_count(&room), 0);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = SubscriberRegistry::new(10);
        let room = RoomId::new();
        let (c1, _rx) = make_connection();
        let s1 = registry.register(&room, c1.clone());

        assert!(registry.unregister(&room, c1.id(), &s1));
        assert!(!registry.unregister(&room, c1.id(), &s1));
        assert!(!registry.unregister(&RoomId::new(), c1.id(), &s1));
    }

    #[test]
    fn empty_rooms_are_pruned() {
        let registry = SubscriberRegistry::new(10);
        let room = RoomId::new();
        let (c1, _rx1) = make_connection();
        let (c2, _rx2) = make_connection();
        let s1 = registry.register(&room, c1.clone());
        let s2 = registry.register(&room, c2.clone());
        assert_eq!(registry.room_count(), 1);

        let _ = registry.unregister(&room, c1.id(), &s1);
        assert_eq!(registry.room_count(), 1);
        let _ = registry.unregister(&room, c2.id(), &s2);
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn rooms_are_isolated() {
        let registry = SubscriberRegistry::new(10);
        let room_a = RoomId::new();
        let room_b = RoomId::new();
        let (c1, _rx1) = make_connection();
        let (c2, _rx2) = make_connection();
        let _ = registry.register(&room_a, c1);
        let _ = registry.register(&room_b, c2.clone());

        let snap_a = registry.snapshot(&room_a);
        assert_eq!(snap_a.len(), 1);
        assert_ne!(snap_a[0].connection.id(), c2.id());
        assert_eq!(registry.total_subscribers(), 2);
    }

    #[test]
    fn same_connection_in_two_rooms() {
        let registry = SubscriberRegistry::new(10);
        let room_a = RoomId::new();
        let room_b = RoomId::new();
        let (c1, _rx) = make_connection();
        let sig_a = registry.register(&room_a, c1.clone());
        let sig_b = registry.register(&room_b, c1.clone());

        sig_a.trigger();
        assert!(!sig_b.is_triggered());
        assert!(registry.unregister(&room_a, c1.id(), &sig_a));
        assert_eq!(registry.subscriber_count(&room_b), 1);
    }

    #[test]
    fn re_register_replaces_and_stops_stale_signal() {
        let registry = SubscriberRegistry::new(10);
        let room = RoomId::new();
        let (c1, _rx) = make_connection();
        let first = registry.register(&room, c1.clone());
        let second = registry.register(&room, c1.clone());

        assert!(first.is_triggered());
        assert!(!second.is_triggered());
        assert_eq!(registry.subscriber_count(&room), 1);
    }

    #[test]
    fn stale_teardown_keeps_replacement() {
        let registry = SubscriberRegistry::new(10);
        let room = RoomId::new();
        let (c1, _rx) = make_connection();
        let stale = registry.register(&room, c1.clone());
        let fresh = registry.register(&room, c1.clone());

        // The replaced session sees its signal and cleans up after itself.
        assert!(stale.is_triggered());
        assert!(!registry.unregister(&room, c1.id(), &stale));

        assert!(!fresh.is_triggered());
        assert_eq!(registry.subscriber_count(&room), 1);
        assert!(registry.snapshot(&room)[0].cancel.same_as(&fresh));

        assert!(registry.unregister(&room, c1.id(), &fresh));
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn foreign_signal_removes_nothing() {
        let registry = SubscriberRegistry::new(10);
        let room = RoomId::new();
        let (c1, _rx) = make_connection();
        let _ = registry.register(&room, c1.clone());

        assert!(!registry.unregister(&room, c1.id(), &CancelSignal::new()));
        assert_eq!(registry.subscriber_count(&room), 1);
    }

    #[test]
    fn fresh_signal_per_registration() {
        let registry = SubscriberRegistry::new(10);
        let room = RoomId::new();
        let (c1, _rx1) = make_connection();
        let (c2, _rx2) = make_connection();
        let s1 = registry.register(&room, c1);
        let s2 = registry.register(&room, c2);
        s1.trigger();
        assert!(!s2.is_triggered());
    }

    #[test]
    fn capacity_cap() {
        let registry = SubscriberRegistry::new(2);
        let room = RoomId::new();
        let (c1, _rx1) = make_connection();
        let (c2, _rx2) = make_connection();
        assert!(registry.has_capacity(&room));
        let _ = registry.register(&room, c1);
        assert!(registry.has_capacity(&room));
        let _ = registry.register(&room, c2);
        assert!(!registry.has_capacity(&room));
        assert!(registry.has_capacity(&RoomId::new()));
    }

    #[test]
    fn cancel_all_triggers_every_signal() {
        let registry = SubscriberRegistry::new(10);
        let (c1, _rx1) = make_connection();
        let (c2, _rx2) = make_connection();
        let s1 = registry.register(&RoomId::new(), c1);
        let s2 = registry.register(&RoomId::new(), c2);

        assert_eq!(registry.cancel_all(), 2);
        assert!(s1.is_triggered());
        assert!(s2.is_triggered());
        // Entries stay until their sessions unregister.
        assert_eq!(registry.total_subscribers(), 2);
    }

    #[test]
    fn shutdown_token_reaches_signals() {
        let shutdown = CancellationToken::new();
        let registry = SubscriberRegistry::with_shutdown(shutdown.clone(), 10);
        let (c1, _rx) = make_connection();
        let signal = registry.register(&RoomId::new(), c1);
        shutdown.cancel();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn concurrent_register_unregister() {
        let registry = Arc::new(SubscriberRegistry::new(1000));
        let room = RoomId::new();

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let (conn, _rx) = make_connection();
                    let signal = registry.register(&room, conn.clone());
                    tokio::task::yield_now().await;
                    registry.unregister(&room, conn.id(), &signal)
                })
            })
            .collect();

        for h in handles {
            assert!(h.await.unwrap());
        }
        assert_eq!(registry.subscriber_count(&room), 0);
        assert_eq!(registry.room_count(), 0);
    }

    #[tokio::test]
    async fn wait_drained_resolves_after_last_unregister() {
        let registry = Arc::new(SubscriberRegistry::new(10));
        let room = RoomId::new();
        let (c1, _rx) = make_connection();
        let signal = registry.register(&room, c1.clone());

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_drained().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        assert!(registry.unregister(&room, c1.id(), &signal));
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn wait_drained_on_empty_registry_returns_immediately() {
        let registry = SubscriberRegistry::new(10);
        tokio::time::timeout(std::time::Duration::from_millis(100), registry.wait_drained())
            .await
            .unwrap();
    }
}
