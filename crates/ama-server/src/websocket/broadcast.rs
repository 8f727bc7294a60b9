//! Envelope fan-out to a room's live subscribers.

use std::sync::Arc;

use ama_core::Envelope;
use axum::extract::ws::Utf8Bytes;
use tracing::{debug, warn};

use super::registry::SubscriberRegistry;

/// Outcome of one `notify` call, for logging and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
}

impl DeliveryReport {
    pub fn failed(&self) -> usize {
        self.attempted - self.delivered
    }
}

/// Delivers envelopes to every subscriber of the envelope's room.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<SubscriberRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Best-effort delivery of `envelope` to its room.
    ///
    /// A subscriber whose send fails has its cancel signal triggered and the
    /// remaining subscribers are still attempted.
    pub fn notify(&self, envelope: &Envelope) -> DeliveryReport {
        let subscribers = self.registry.snapshot(&envelope.room);
        if subscribers.is_empty() {
            return DeliveryReport::default();
        }

        let frame: Utf8Bytes = match envelope.to_wire() {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(kind = envelope.kind(), room_id = %envelope.room, error = %e, "failed to serialize envelope");
                return DeliveryReport::default();
            }
        };

        let mut report = DeliveryReport {
            attempted: subscribers.len(),
            delivered: 0,
        };
        for sub in &subscribers {
            match sub.connection.send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        room_id = %envelope.room,
                        client_id = %sub.connection.id(),
                        error = %e,
                        "failed to send message to client"
                    );
                    sub.cancel.trigger();
                }
            }
        }

        debug!(
            kind = envelope.kind(),
            room_id = %envelope.room,
            recipients = report.attempted,
            delivered = report.delivered,
            "broadcast envelope to room"
        );
        report
    }

    /// Run `notify` on a detached task. Nothing is reported back.
    pub fn spawn_notify(&self, envelope: Envelope) {
        let broadcaster = self.clone();
        drop(tokio::spawn(async move {
            let _ = broadcaster.notify(&envelope);
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ama_core::{MessageId, RoomEvent, RoomId};
    use tokio::sync::mpsc;

    use crate::websocket::cancel::CancelSignal;
    use crate::websocket::connection::{ClientId, ConnectionHandle};

    fn make_connection(capacity: usize) -> (Arc<ConnectionHandle>, mpsc::Receiver<Utf8Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(ConnectionHandle::new(ClientId::new(), None, tx)), rx)
    }

    fn setup() -> (Broadcaster, Arc<SubscriberRegistry>) {
        let registry = Arc::new(SubscriberRegistry::new(100));
        (Broadcaster::new(registry.clone()), registry)
    }

    /// Stand-in for a room session: waits for the signal, then unregisters.
    fn spawn_session(
        registry: Arc<SubscriberRegistry>,
        room: RoomId,
        conn: Arc<ConnectionHandle>,
        signal: CancelSignal,
    ) -> tokio::task::JoinHandle<bool> {
        tokio::spawn(async move {
            signal.wait().await;
            let removed = registry.unregister(&room, conn.id(), &signal);
            conn.close();
            removed
        })
    }

    fn decode(frame: &Utf8Bytes) -> RoomEvent {
        serde_json::from_str(frame.as_str()).unwrap()
    }

    #[test]
    fn notify_without_subscribers_is_noop() {
        let (broadcaster, _) = setup();
        let env = Envelope::message_created(RoomId::new(), MessageId::new(), "hi");
        assert_eq!(broadcaster.notify(&env), DeliveryReport::default());
    }

    #[tokio::test]
    async fn delivers_to_every_subscriber() {
        let (broadcaster, registry) = setup();
        let room = RoomId::new();
        let (c1, mut rx1) = make_connection(8);
        let (c2, mut rx2) = make_connection(8);
        let _ = registry.register(&room, c1);
        let _ = registry.register(&room, c2);

        let id = MessageId::new();
        let report = broadcaster.notify(&Envelope::message_created(room, id, "hello"));
        assert_eq!(report, DeliveryReport { attempted: 2, delivered: 2 });

        for rx in [&mut rx1, &mut rx2] {
            let frame = rx.recv().await.unwrap();
            match decode(&frame) {
                RoomEvent::MessageCreated(m) => {
                    assert_eq!(m.id, id);
                    assert_eq!(m.message, "hello");
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn failing_subscriber_is_cancelled_others_still_receive() {
        let (broadcaster, registry) = setup();
        let room = RoomId::new();
        let (c1, rx1) = make_connection(8);
        let (c2, mut rx2) = make_connection(8);
        let s1 = registry.register(&room, c1.clone());
        let s2 = registry.register(&room, c2.clone());
        let session1 = spawn_session(registry.clone(), room, c1, s1.clone());

        drop(rx1);
        let report = broadcaster.notify(&Envelope::answered(room, MessageId::new()));
        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed(), 1);

        assert!(rx2.recv().await.is_some());
        assert!(s1.is_triggered());
        assert!(!s2.is_triggered());

        let removed = tokio::time::timeout(Duration::from_secs(1), session1)
            .await
            .unwrap()
            .unwrap();
        assert!(removed);
        assert_eq!(registry.subscriber_count(&room), 1);
        assert_eq!(registry.snapshot(&room)[0].connection.id(), c2.id());
    }

    #[tokio::test]
    async fn full_queue_counts_as_failure() {
        let (broadcaster, registry) = setup();
        let room = RoomId::new();
        let (c1, _rx1) = make_connection(1);
        let signal = registry.register(&room, c1);

        let first = broadcaster.notify(&Envelope::answered(room, MessageId::new()));
        assert_eq!(first.delivered, 1);
        assert!(!signal.is_triggered());

        let second = broadcaster.notify(&Envelope::answered(room, MessageId::new()));
        assert_eq!(second.delivered, 0);
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn other_rooms_never_receive() {
        let (broadcaster, registry) = setup();
        let room_a = RoomId::new();
        let room_b = RoomId::new();
        let (c_b, mut rx_b) = make_connection(8);
        let _ = registry.register(&room_b, c_b);

        let report = broadcaster.notify(&Envelope::message_created(room_a, MessageId::new(), "x"));
        assert_eq!(report.attempted, 0);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn double_failure_unregisters_once() {
        let (broadcaster, registry) = setup();
        let room = RoomId::new();
        let (c1, rx1) = make_connection(8);
        let s1 = registry.register(&room, c1.clone());
        drop(rx1);

        // Two broadcasts racing the same dead subscriber plus a local close.
        let b1 = broadcaster.clone();
        let b2 = broadcaster.clone();
        let t1 = tokio::spawn(async move { b1.notify(&Envelope::answered(room, MessageId::new())) });
        let t2 = tokio::spawn(async move { b2.notify(&Envelope::answered(room, MessageId::new())) });
        s1.trigger();
        let _ = t1.await.unwrap();
        let _ = t2.await.unwrap();

        let first = registry.unregister(&room, c1.id(), &s1);
        let second = registry.unregister(&room, c1.id(), &s1);
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn serializes_once_per_notify() {
        let (broadcaster, registry) = setup();
        let room = RoomId::new();
        let (c1, mut rx1) = make_connection(8);
        let (c2, mut rx2) = make_connection(8);
        let _ = registry.register(&room, c1);
        let _ = registry.register(&room, c2);

        let _ = broadcaster.notify(&Envelope::reaction_increased(room, MessageId::new(), 4));
        let f1 = rx1.recv().await.unwrap();
        let f2 = rx2.recv().await.unwrap();
        assert_eq!(f1.as_str(), f2.as_str());
        assert!(!f1.as_str().contains(&room.to_string()));
    }

    #[tokio::test]
    async fn spawn_notify_is_fire_and_forget() {
        let (broadcaster, registry) = setup();
        let room = RoomId::new();
        let (c1, mut rx1) = make_connection(8);
        let _ = registry.register(&room, c1);

        broadcaster.spawn_notify(Envelope::message_created(room, MessageId::new(), "later"));

        let frame = tokio::time::timeout(Duration::from_secs(1), rx1.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(decode(&frame), RoomEvent::MessageCreated(_)));
    }

    #[tokio::test]
    async fn per_caller_order_preserved() {
        let (broadcaster, registry) = setup();
        let room = RoomId::new();
        let (c1, mut rx1) = make_connection(8);
        let _ = registry.register(&room, c1);

        let ids: Vec<MessageId> = (0..5).map(|_| MessageId::new()).collect();
        for id in &ids {
            let _ = broadcaster.notify(&Envelope::answered(room, *id));
        }
        for id in &ids {
            match decode(&rx1.recv().await.unwrap()) {
                RoomEvent::MessageAnswered(a) => assert_eq!(a.id, *id),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }
}
