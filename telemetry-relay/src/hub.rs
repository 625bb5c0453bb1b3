//! Shared relay state and the fan-out algorithm.
//!
//! A single [`Hub`] is shared by every connection task. Registry and cache
//! sit behind one mutex, so promoting the producer, updating the cache and
//! taking the recipient snapshot happen as one step. The lock is released
//! before any message is queued for a recipient. Queuing never waits: a
//! recipient that vanished in between, or whose queue is full, counts as a
//! failed send and is dropped.

use std::{
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::sync::{
    Mutex,
    mpsc::{self, error::TrySendError},
};
use tracing::{debug, info, warn};

use crate::{
    cache::LatestValueCache,
    config::{RelayConfig, RelayMode},
    error::RelayError,
    message::{CacheSlot, Classification, Envelope, Inbound, classify, encode},
    registry::{ConnectionId, ConnectionRegistry, Recipient, Role},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Cacheable message: stored and fanned out.
    Broadcast {
        delivered: usize,
        dropped: Vec<ConnectionId>,
    },
    /// Echo mode reply queued for the sender.
    Echoed,
    /// Not cached, not forwarded.
    Ignored,
}

pub struct Hub {
    state: Mutex<HubState>,
    next_id: AtomicU64,
    config: RelayConfig,
}

#[derive(Default)]
struct HubState {
    registry: ConnectionRegistry,
    cache: LatestValueCache,
}

impl Hub {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    /// Registers a new connection and queues its welcome followed by the
    /// cached frame and stats. The returned receiver is the connection's
    /// outbound queue; it closes once the connection is unregistered.
    pub async fn accept(&self, peer: Option<SocketAddr>) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (outbound, inbox) = mpsc::channel(self.config.queue_capacity());

        let mut state = self.state.lock().await;
        enqueue(&outbound, id, encode(&Envelope::info(self.config.mode.welcome())));
        for cached in state.cache.replay() {
            enqueue(&outbound, id, cached.text.clone());
        }
        state.registry.register(id, peer, outbound);
        debug!(conn = %id, ?peer, live = state.registry.len(), "connection registered");

        (id, inbox)
    }

    /// Removes a connection, clearing the producer role if it held it.
    pub async fn disconnect(&self, id: ConnectionId) -> Option<Role> {
        let role = self.state.lock().await.registry.unregister(id);
        if role == Some(Role::Producer) {
            info!(conn = %id, "producer disconnected");
        }
        role
    }

    pub async fn handle(&self, sender: ConnectionId, message: Inbound) -> RelayOutcome {
        match self.config.mode {
            RelayMode::Relay => self.relay(sender, message).await,
            RelayMode::Echo => self.echo(sender, &message.envelope).await,
        }
    }

    async fn relay(&self, sender: ConnectionId, message: Inbound) -> RelayOutcome {
        let slot = match classify(&message.envelope) {
            Classification::Cacheable(slot) => slot,
            Classification::Transient(kind) => {
                debug!(conn = %sender, kind, "transient message not relayed");
                return RelayOutcome::Ignored;
            }
        };

        let text = message.text.clone();
        let recipients = {
            let mut state = self.state.lock().await;
            state.cache.put(slot, message);
            if state.registry.producer() != Some(sender) && state.registry.promote_producer(sender) {
                info!(conn = %sender, "connection promoted to producer");
            }
            state.registry.snapshot_recipients(sender)
        };

        debug!(
            conn = %sender,
            kind = slot.kind(),
            recipients = recipients.len(),
            "relaying message"
        );
        self.fan_out(recipients, text).await
    }

    async fn fan_out(&self, recipients: Vec<Recipient>, text: String) -> RelayOutcome {
        let mut delivered = 0;
        let mut dropped = Vec::new();
        let mut failures = Vec::new();

        for recipient in recipients {
            match deliver(&recipient, text.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => failures.push((recipient.id, err)),
            }
        }

        if !failures.is_empty() {
            let mut state = self.state.lock().await;
            for (id, err) in failures {
                let peer = state.registry.peer_of(id);
                warn!(conn = %id, ?peer, error = %err, "dropping unreachable recipient");
                state.registry.unregister(id);
                dropped.push(id);
            }
        }

        RelayOutcome::Broadcast { delivered, dropped }
    }

    async fn echo(&self, sender: ConnectionId, envelope: &Envelope) -> RelayOutcome {
        let Some(outbound) = self.state.lock().await.registry.outbound(sender) else {
            return RelayOutcome::Ignored;
        };
        let recipient = Recipient {
            id: sender,
            outbound,
        };

        match deliver(&recipient, encode(&Envelope::echo(envelope))) {
            Ok(()) => RelayOutcome::Echoed,
            Err(err) => {
                warn!(conn = %sender, error = %err, "failed to queue echo reply");
                self.state.lock().await.registry.unregister(sender);
                RelayOutcome::Ignored
            }
        }
    }

    pub async fn producer(&self) -> Option<ConnectionId> {
        self.state.lock().await.registry.producer()
    }

    pub async fn cached(&self, slot: CacheSlot) -> Option<Inbound> {
        self.state.lock().await.cache.get(slot).cloned()
    }

    pub async fn role_of(&self, id: ConnectionId) -> Option<Role> {
        self.state.lock().await.registry.role_of(id)
    }

    /// Ids that a message from `exclude` would currently be fanned out to.
    pub async fn recipients(&self, exclude: ConnectionId) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .state
            .lock()
            .await
            .registry
            .snapshot_recipients(exclude)
            .into_iter()
            .map(|recipient| recipient.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.registry.len()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}

fn enqueue(outbound: &mpsc::Sender<String>, id: ConnectionId, text: String) {
    if let Err(err) = outbound.try_send(text) {
        warn!(conn = %id, error = %err, "failed to queue message for new connection");
    }
}

/// Queues `text` without waiting. A full queue means the connection stopped
/// reading, which is as terminal as a closed one.
fn deliver(recipient: &Recipient, text: String) -> Result<(), RelayError> {
    recipient.outbound.try_send(text).map_err(|err| match err {
        TrySendError::Full(_) => RelayError::Backlogged(recipient.id),
        TrySendError::Closed(_) => RelayError::Send(recipient.id),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::message::{ECHO, FRAME, INFO, STATS, decode};

    async fn connect(hub: &Hub) -> (ConnectionId, mpsc::Receiver<String>) {
        let (id, mut inbox) = hub.accept(None).await;
        let welcome = next_envelope(&mut inbox);
        assert_eq!(welcome.kind, INFO);
        (id, inbox)
    }

    fn next_envelope(inbox: &mut mpsc::Receiver<String>) -> Envelope {
        let text = inbox.try_recv().expect("expected a queued message");
        decode(&text).expect("queued text should decode")
    }

    async fn cached_envelope(hub: &Hub, slot: CacheSlot) -> Option<Envelope> {
        hub.cached(slot).await.map(|message| message.envelope)
    }

    fn frame(timestamp: u64) -> Envelope {
        Envelope::new(
            FRAME,
            json!({
                "timestamp": timestamp,
                "width": 640,
                "height": 480,
                "fps": 24.0,
                "processingMode": 1,
                "processingTime": 12.5
            }),
        )
    }

    fn stats(total_frames: u64) -> Envelope {
        Envelope::new(STATS, json!({ "averageFPS": 20.0, "totalFrames": total_frames }))
    }

    #[tokio::test]
    async fn new_connection_gets_welcome_then_latest_frame_and_stats() {
        let hub = Hub::default();
        let (producer, _producer_inbox) = connect(&hub).await;
        hub.handle(producer, stats(10).into()).await;
        hub.handle(producer, frame(1000).into()).await;
        hub.handle(producer, frame(2000).into()).await;

        let (_late, mut inbox) = connect(&hub).await;
        assert_eq!(next_envelope(&mut inbox), frame(2000));
        assert_eq!(next_envelope(&mut inbox), stats(10));
        assert!(inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn new_connection_gets_nothing_for_uncached_types() {
        let hub = Hub::default();
        let (producer, _producer_inbox) = connect(&hub).await;
        hub.handle(producer, frame(1000).into()).await;

        let (_late, mut inbox) = connect(&hub).await;
        assert_eq!(next_envelope(&mut inbox).kind, FRAME);
        assert!(inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn frame_reaches_consumers_but_not_producer() {
        let hub = Hub::default();
        let (_c1, mut c1_inbox) = connect(&hub).await;
        let (_c2, mut c2_inbox) = connect(&hub).await;
        let (producer, mut producer_inbox) = connect(&hub).await;

        let outcome = hub.handle(producer, frame(1000).into()).await;
        assert_eq!(
            outcome,
            RelayOutcome::Broadcast {
                delivered: 2,
                dropped: vec![]
            }
        );

        let expected = encode(&frame(1000));
        assert_eq!(c1_inbox.try_recv().expect("c1 frame"), expected);
        assert_eq!(c2_inbox.try_recv().expect("c2 frame"), expected);
        assert!(producer_inbox.try_recv().is_err());
        assert_eq!(hub.producer().await, Some(producer));
        assert_eq!(cached_envelope(&hub, CacheSlot::Frame).await, Some(frame(1000)));
    }

    #[tokio::test]
    async fn later_sender_takes_over_producer_role() {
        let hub = Hub::default();
        let (a, mut a_inbox) = connect(&hub).await;
        let (b, _b_inbox) = connect(&hub).await;
        let (_viewer, mut viewer_inbox) = connect(&hub).await;

        hub.handle(a, frame(1).into()).await;
        hub.handle(b, frame(2).into()).await;

        assert_eq!(hub.producer().await, Some(b));
        assert_eq!(cached_envelope(&hub, CacheSlot::Frame).await, Some(frame(2)));
        assert_eq!(hub.role_of(a).await, Some(Role::Consumer));
        // a was displaced, so it now receives b's traffic like any consumer.
        assert_eq!(next_envelope(&mut a_inbox), frame(2));
        assert_eq!(next_envelope(&mut viewer_inbox), frame(1));
        assert_eq!(next_envelope(&mut viewer_inbox), frame(2));

        // a sending again reclaims the role; b and the viewer now receive.
        hub.handle(a, frame(3).into()).await;
        assert_eq!(hub.producer().await, Some(a));
        assert_eq!(hub.recipients(a).await.len(), 2);
    }

    #[tokio::test]
    async fn unreachable_recipient_is_dropped_without_affecting_others() {
        let hub = Hub::default();
        let (broken, broken_inbox) = connect(&hub).await;
        let (_s, mut s_inbox) = connect(&hub).await;
        let (_t, mut t_inbox) = connect(&hub).await;
        let (producer, _producer_inbox) = connect(&hub).await;
        drop(broken_inbox);

        let outcome = hub.handle(producer, stats(5).into()).await;
        assert_eq!(
            outcome,
            RelayOutcome::Broadcast {
                delivered: 2,
                dropped: vec![broken]
            }
        );
        assert_eq!(next_envelope(&mut s_inbox), stats(5));
        assert_eq!(next_envelope(&mut t_inbox), stats(5));
        assert!(!hub.recipients(producer).await.contains(&broken));
        assert_eq!(hub.connection_count().await, 3);
    }

    #[tokio::test]
    async fn stalled_consumer_is_dropped_and_others_keep_receiving() {
        let hub = Hub::new(RelayConfig {
            outbound_queue: 3,
            ..RelayConfig::default()
        });
        let (stalled, mut stalled_inbox) = connect(&hub).await;
        let (_healthy, mut healthy_inbox) = connect(&hub).await;
        let (producer, _producer_inbox) = connect(&hub).await;

        let mut dropped = Vec::new();
        for timestamp in 1..=6 {
            match hub.handle(producer, frame(timestamp).into()).await {
                RelayOutcome::Broadcast { dropped: d, .. } => dropped.extend(d),
                other => panic!("unexpected outcome {other:?}"),
            }
            assert_eq!(next_envelope(&mut healthy_inbox), frame(timestamp));
        }

        assert_eq!(dropped, vec![stalled]);
        assert!(!hub.recipients(producer).await.contains(&stalled));
        // The stalled queue keeps what fit, then closes.
        for timestamp in 1..=3 {
            assert_eq!(next_envelope(&mut stalled_inbox), frame(timestamp));
        }
        assert!(matches!(
            stalled_inbox.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn flat_frame_is_relayed_and_replayed_verbatim() {
        let hub = Hub::default();
        let (producer, _producer_inbox) = connect(&hub).await;
        let (_viewer, mut viewer_inbox) = connect(&hub).await;

        let raw = r#"{"type":"frame","timestamp":1000,"width":640,"id":123456789012345678901234567890}"#;
        let message = Inbound::decode(raw).expect("flat frame decodes");
        hub.handle(producer, message).await;

        assert_eq!(viewer_inbox.try_recv().expect("viewer frame"), raw);
        let (_late, mut late_inbox) = connect(&hub).await;
        let replayed = late_inbox.try_recv().expect("replayed frame");
        assert_eq!(replayed, raw);
        assert_eq!(decode(&replayed).expect("decode").extra["width"], 640);
    }

    #[tokio::test]
    async fn transient_messages_are_neither_cached_nor_relayed() {
        let hub = Hub::default();
        let (sender, _sender_inbox) = connect(&hub).await;
        let (_viewer, mut viewer_inbox) = connect(&hub).await;

        let outcome = hub.handle(sender, Envelope::info("hello").into()).await;
        assert_eq!(outcome, RelayOutcome::Ignored);
        assert!(viewer_inbox.try_recv().is_err());
        assert_eq!(hub.producer().await, None);
        assert_eq!(hub.role_of(sender).await, Some(Role::Unknown));
    }

    #[tokio::test]
    async fn disconnecting_producer_clears_the_role() {
        let hub = Hub::default();
        let (producer, _producer_inbox) = connect(&hub).await;
        let (viewer, _viewer_inbox) = connect(&hub).await;
        hub.handle(producer, frame(1).into()).await;

        assert_eq!(hub.disconnect(producer).await, Some(Role::Producer));
        assert_eq!(hub.producer().await, None);
        assert_eq!(hub.recipients(viewer).await, Vec::<ConnectionId>::new());
        // Cached state outlives the producer.
        assert_eq!(cached_envelope(&hub, CacheSlot::Frame).await, Some(frame(1)));
    }

    #[tokio::test]
    async fn echo_mode_answers_only_the_sender() {
        let hub = Hub::new(RelayConfig::echo());
        let (sender, mut sender_inbox) = connect(&hub).await;
        let (_other, mut other_inbox) = connect(&hub).await;

        let outcome = hub.handle(sender, frame(7).into()).await;
        assert_eq!(outcome, RelayOutcome::Echoed);

        let reply = next_envelope(&mut sender_inbox);
        assert_eq!(reply.kind, ECHO);
        assert_eq!(reply.data, frame(7).to_value());
        assert!(other_inbox.try_recv().is_err());
        assert_eq!(cached_envelope(&hub, CacheSlot::Frame).await, None);
        assert_eq!(hub.producer().await, None);
    }
}
