//! Hub: client registry, topic membership and fan-out.
//!
//! All membership changes and broadcasts flow through a bounded command
//! queue drained by a single control loop, so they are applied one at a
//! time in submission order. Reads go straight to the shared state under a
//! read lock and never block on the loop.
//!
//! # Slow consumers
//!
//! Broadcasts never wait on a client. If a client's outbound queue is full
//! or its consumer is gone, the client is evicted on the spot: it leaves
//! every topic and its queue's producer is dropped, which tells its write
//! loop to close the connection.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::client::{ClientHandle, ClientId, Delivery};
use crate::topic::{validate_topic_name, TopicName};

/// Hub errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("Hub control loop has stopped")]
    Closed,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the command queue. Submitters wait when it is full.
    pub command_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: 1024,
        }
    }
}

/// Point-in-time hub statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub client_count: usize,
    pub topic_count: usize,
    pub total_subscriptions: usize,
    /// Clients evicted as slow or dead consumers since start.
    pub evicted_total: u64,
}

enum Command {
    Register(ClientHandle),
    Unregister(ClientId),
    Subscribe { client: ClientId, topic: TopicName },
    Unsubscribe { client: ClientId, topic: TopicName },
    BroadcastAll(Bytes),
    BroadcastToTopic { topic: TopicName, payload: Bytes },
    Flush(oneshot::Sender<()>),
}

struct Member {
    handle: ClientHandle,
    topics: HashSet<TopicName>,
}

#[derive(Default)]
struct HubState {
    clients: HashMap<ClientId, Member>,
    topics: HashMap<TopicName, HashSet<ClientId>>,
    evicted_total: u64,
}

impl HubState {
    fn register(&mut self, handle: ClientHandle) {
        let id = handle.id().clone();
        if self.clients.contains_key(&id) {
            warn!(client = %id, "Client already registered, ignoring");
            return;
        }
        self.clients.insert(
            id,
            Member {
                handle,
                topics: HashSet::new(),
            },
        );
    }

    fn unregister(&mut self, id: &ClientId) -> bool {
        let Some(member) = self.clients.remove(id) else {
            return false;
        };
        for topic in &member.topics {
            if let Some(subscribers) = self.topics.get_mut(topic) {
                subscribers.remove(id);
                if subscribers.is_empty() {
                    self.topics.remove(topic);
                    trace!(topic = %topic, "Removed empty topic");
                }
            }
        }
        // `member` drops here, closing the client's outbound queue.
        true
    }

    fn subscribe(&mut self, id: &ClientId, topic: TopicName) -> bool {
        let Some(member) = self.clients.get_mut(id) else {
            return false;
        };
        if !member.topics.insert(topic.clone()) {
            return false;
        }
        self.topics.entry(topic).or_default().insert(id.clone());
        true
    }

    fn unsubscribe(&mut self, id: &ClientId, topic: &str) -> bool {
        let Some(member) = self.clients.get_mut(id) else {
            return false;
        };
        if !member.topics.remove(topic) {
            return false;
        }
        if let Some(subscribers) = self.topics.get_mut(topic) {
            subscribers.remove(id);
            if subscribers.is_empty() {
                self.topics.remove(topic);
            }
        }
        true
    }
}

/// Clients whose queue refused a delivery.
fn offer<'a>(
    members: impl Iterator<Item = &'a ClientHandle>,
    payload: &Bytes,
) -> Vec<(ClientId, Delivery)> {
    members
        .filter_map(|handle| match handle.try_deliver(payload.clone()) {
            Delivery::Queued => None,
            refused => Some((handle.id().clone(), refused)),
        })
        .collect()
}

/// The hub's control loop.
///
/// Returned by [`Hub::new`] for callers that want to drive it themselves;
/// [`Hub::spawn`] runs it on the current runtime. It stops once every
/// [`Hub`] handle has been dropped.
pub struct ControlLoop {
    commands: mpsc::Receiver<Command>,
    state: Arc<RwLock<HubState>>,
}

impl ControlLoop {
    /// Apply commands until every hub handle is gone.
    pub async fn run(mut self) {
        debug!("Hub control loop started");
        while let Some(command) = self.commands.recv().await {
            self.apply(command);
        }
        info!("Hub control loop stopped");
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Register(handle) => {
                debug!(client = %handle.id(), "Registering client");
                self.state.write().register(handle);
            }
            Command::Unregister(id) => {
                if self.state.write().unregister(&id) {
                    debug!(client = %id, "Unregistered client");
                }
            }
            Command::Subscribe { client, topic } => {
                if self.state.write().subscribe(&client, topic.clone()) {
                    debug!(client = %client, topic = %topic, "Client subscribed");
                }
            }
            Command::Unsubscribe { client, topic } => {
                if self.state.write().unsubscribe(&client, &topic) {
                    debug!(client = %client, topic = %topic, "Client unsubscribed");
                }
            }
            Command::BroadcastAll(payload) => {
                let refused = {
                    let state = self.state.read();
                    offer(state.clients.values().map(|m| &m.handle), &payload)
                };
                self.evict(refused);
            }
            Command::BroadcastToTopic { topic, payload } => {
                let refused = {
                    let state = self.state.read();
                    let Some(subscribers) = state.topics.get(&topic) else {
                        trace!(topic = %topic, "No subscribers for topic");
                        return;
                    };
                    let members = subscribers
                        .iter()
                        .filter_map(|id| state.clients.get(id))
                        .map(|m| &m.handle);
                    offer(members, &payload)
                };
                self.evict(refused);
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    fn evict(&mut self, refused: Vec<(ClientId, Delivery)>) {
        if refused.is_empty() {
            return;
        }
        let mut state = self.state.write();
        for (id, reason) in refused {
            if state.unregister(&id) {
                state.evicted_total += 1;
                match reason {
                    Delivery::Full => warn!(client = %id, "Outbound queue full, evicting client"),
                    _ => debug!(client = %id, "Outbound queue closed, evicting client"),
                }
            }
        }
    }
}

/// Handle to a hub.
///
/// Cheap to clone. Mutating operations are queued for the control loop and
/// return once accepted; they fail only if the loop has stopped.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<Command>,
    state: Arc<RwLock<HubState>>,
}

impl Hub {
    /// Create a hub and its control loop without starting the loop.
    #[must_use]
    pub fn new(config: HubConfig) -> (Self, ControlLoop) {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let state = Arc::new(RwLock::new(HubState::default()));
        (
            Self {
                commands: tx,
                state: Arc::clone(&state),
            },
            ControlLoop {
                commands: rx,
                state,
            },
        )
    }

    /// Create a hub and run its control loop on the current runtime.
    #[must_use]
    pub fn spawn(config: HubConfig) -> Self {
        let (hub, control) = Self::new(config);
        tokio::spawn(control.run());
        hub
    }

    async fn submit(&self, command: Command) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Add a client with no subscriptions.
    ///
    /// The handle carries the only producer the hub will use for the
    /// client's outbound queue.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the control loop has stopped.
    pub async fn register(&self, client: ClientHandle) -> Result<(), HubError> {
        self.submit(Command::Register(client)).await
    }

    /// Remove a client from the hub and every topic, closing its outbound
    /// queue. Unknown clients are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the control loop has stopped.
    pub async fn unregister(&self, client: &ClientId) -> Result<(), HubError> {
        self.submit(Command::Unregister(client.clone())).await
    }

    /// Add a client to a topic.
    ///
    /// Ignored if the client is not registered, is already subscribed or
    /// the name is not a valid topic.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the control loop has stopped.
    pub async fn subscribe(
        &self,
        client: &ClientId,
        topic: impl Into<TopicName>,
    ) -> Result<(), HubError> {
        let topic = topic.into();
        if let Err(reason) = validate_topic_name(&topic) {
            debug!(client = %client, reason, "Ignoring subscription to invalid topic");
            return Ok(());
        }
        self.submit(Command::Subscribe {
            client: client.clone(),
            topic,
        })
        .await
    }

    /// Remove a client from a topic. Ignored if it was not subscribed.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the control loop has stopped.
    pub async fn unsubscribe(
        &self,
        client: &ClientId,
        topic: impl Into<TopicName>,
    ) -> Result<(), HubError> {
        self.submit(Command::Unsubscribe {
            client: client.clone(),
            topic: topic.into(),
        })
        .await
    }

    /// Queue a payload for every registered client.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the control loop has stopped.
    pub async fn broadcast_all(&self, payload: impl Into<Bytes>) -> Result<(), HubError> {
        self.submit(Command::BroadcastAll(payload.into())).await
    }

    /// Queue a payload for every subscriber of a topic.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the control loop has stopped.
    pub async fn broadcast_to_topic(
        &self,
        topic: impl Into<TopicName>,
        payload: impl Into<Bytes>,
    ) -> Result<(), HubError> {
        self.submit(Command::BroadcastToTopic {
            topic: topic.into(),
            payload: payload.into(),
        })
        .await
    }

    /// Wait until every command submitted before this call has been applied.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the control loop has stopped.
    pub async fn flush(&self) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::Flush(tx)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Topics that currently have at least one subscriber.
    #[must_use]
    pub fn connected_topics(&self) -> BTreeSet<TopicName> {
        self.state.read().topics.keys().cloned().collect()
    }

    /// Number of registered clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.state.read().clients.len()
    }

    /// Number of subscribers of a topic.
    #[must_use]
    pub fn topic_subscriber_count(&self, topic: &str) -> usize {
        self.state.read().topics.get(topic).map_or(0, HashSet::len)
    }

    /// Check if a client is registered.
    #[must_use]
    pub fn is_registered(&self, client: &ClientId) -> bool {
        self.state.read().clients.contains_key(client)
    }

    /// Topics a client is subscribed to.
    #[must_use]
    pub fn subscriptions(&self, client: &ClientId) -> BTreeSet<TopicName> {
        self.state
            .read()
            .clients
            .get(client)
            .map(|m| m.topics.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let state = self.state.read();
        HubStats {
            client_count: state.clients.len(),
            topic_count: state.topics.len(),
            total_subscriptions: state.topics.values().map(HashSet::len).sum(),
            evicted_total: state.evicted_total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::outbound_queue;

    fn client(id: &str, capacity: usize) -> (ClientHandle, mpsc::Receiver<Bytes>) {
        let (tx, rx) = outbound_queue(capacity);
        (ClientHandle::new(id.into(), tx), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let hub = Hub::spawn(HubConfig::default());
        let (a, _rx_a) = client("a", 4);
        let (b, _rx_b) = client("b", 4);

        hub.register(a).await.unwrap();
        hub.register(b).await.unwrap();
        hub.flush().await.unwrap();
        assert_eq!(hub.client_count(), 2);

        hub.unregister(&"a".into()).await.unwrap();
        hub.unregister(&"a".into()).await.unwrap();
        hub.unregister(&"nobody".into()).await.unwrap();
        hub.flush().await.unwrap();

        assert_eq!(hub.client_count(), 1);
        assert!(!hub.is_registered(&"a".into()));
        assert!(hub.is_registered(&"b".into()));
    }

    #[tokio::test]
    async fn test_register_replay() {
        let hub = Hub::spawn(HubConfig::default());
        let mut receivers = Vec::new();
        for i in 0..20 {
            let (handle, rx) = client(&format!("c{i}"), 4);
            receivers.push(rx);
            hub.register(handle).await.unwrap();
        }
        for i in (0..20).step_by(2) {
            hub.unregister(&format!("c{i}").into()).await.unwrap();
        }
        hub.flush().await.unwrap();

        assert_eq!(hub.client_count(), 10);
        for i in 0..20 {
            assert_eq!(hub.is_registered(&format!("c{i}").into()), i % 2 == 1);
        }
    }

    #[tokio::test]
    async fn test_unregister_closes_queue() {
        let hub = Hub::spawn(HubConfig::default());
        let (a, mut rx) = client("a", 4);
        hub.register(a).await.unwrap();
        hub.unregister(&"a".into()).await.unwrap();
        hub.flush().await.unwrap();

        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_topic_broadcast_reaches_only_subscribers() {
        let hub = Hub::spawn(HubConfig::default());
        let (a, mut rx_a) = client("A", 8);
        let (b, mut rx_b) = client("B", 8);
        hub.register(a).await.unwrap();
        hub.register(b).await.unwrap();
        hub.subscribe(&"A".into(), "GameX").await.unwrap();

        hub.broadcast_to_topic("GameX", Bytes::from_static(b"m1"))
            .await
            .unwrap();
        hub.flush().await.unwrap();

        assert_eq!(drain(&mut rx_a), vec![Bytes::from_static(b"m1")]);
        assert!(drain(&mut rx_b).is_empty());

        hub.subscribe(&"B".into(), "GameX").await.unwrap();
        hub.unsubscribe(&"A".into(), "GameX").await.unwrap();
        hub.broadcast_to_topic("GameX", Bytes::from_static(b"m2"))
            .await
            .unwrap();
        hub.flush().await.unwrap();

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec![Bytes::from_static(b"m2")]);
    }

    #[tokio::test]
    async fn test_broadcast_all() {
        let hub = Hub::spawn(HubConfig::default());
        let (a, mut rx_a) = client("a", 4);
        let (b, mut rx_b) = client("b", 4);
        hub.register(a).await.unwrap();
        hub.register(b).await.unwrap();
        hub.subscribe(&"a".into(), "Tetris").await.unwrap();

        hub.broadcast_all(Bytes::from_static(b"hello")).await.unwrap();
        hub.flush().await.unwrap();

        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_topic() {
        let hub = Hub::spawn(HubConfig::default());
        let (a, mut rx) = client("a", 4);
        hub.register(a).await.unwrap();

        hub.broadcast_to_topic("Nobody", Bytes::from_static(b"x"))
            .await
            .unwrap();
        hub.flush().await.unwrap();

        assert!(drain(&mut rx).is_empty());
        assert_eq!(hub.client_count(), 1);
        assert!(hub.connected_topics().is_empty());
    }

    #[tokio::test]
    async fn test_per_topic_order() {
        let hub = Hub::spawn(HubConfig::default());
        let (a, mut rx) = client("a", 16);
        hub.register(a).await.unwrap();
        hub.subscribe(&"a".into(), "Snake").await.unwrap();

        for i in 0..5 {
            hub.broadcast_to_topic("Snake", format!("m{i}")).await.unwrap();
        }
        hub.flush().await.unwrap();

        let received: Vec<_> = drain(&mut rx)
            .into_iter()
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
            .collect();
        assert_eq!(received, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_subscribe_then_unsubscribe() {
        let hub = Hub::spawn(HubConfig::default());
        let (a, _rx) = client("a", 4);
        hub.register(a).await.unwrap();

        hub.subscribe(&"a".into(), "Pong").await.unwrap();
        hub.subscribe(&"a".into(), "Pong").await.unwrap();
        hub.flush().await.unwrap();
        assert_eq!(hub.topic_subscriber_count("Pong"), 1);
        assert!(hub.connected_topics().contains("Pong"));

        hub.unsubscribe(&"a".into(), "Pong").await.unwrap();
        hub.unsubscribe(&"a".into(), "Pong").await.unwrap();
        hub.flush().await.unwrap();
        assert_eq!(hub.topic_subscriber_count("Pong"), 0);
        assert!(!hub.connected_topics().contains("Pong"));
    }

    #[tokio::test]
    async fn test_subscribe_ignored_cases() {
        let hub = Hub::spawn(HubConfig::default());
        let (a, _rx) = client("a", 4);
        hub.register(a).await.unwrap();

        hub.subscribe(&"ghost".into(), "Tetris").await.unwrap();
        hub.subscribe(&"a".into(), "").await.unwrap();
        hub.flush().await.unwrap();

        assert!(hub.connected_topics().is_empty());
        assert!(hub.subscriptions(&"a".into()).is_empty());
    }

    #[tokio::test]
    async fn test_unregister_leaves_all_topics() {
        let hub = Hub::spawn(HubConfig::default());
        let (a, _rx_a) = client("a", 4);
        let (b, _rx_b) = client("b", 4);
        hub.register(a).await.unwrap();
        hub.register(b).await.unwrap();
        for topic in ["T1", "T2", "T3"] {
            hub.subscribe(&"a".into(), topic).await.unwrap();
        }
        hub.subscribe(&"b".into(), "T1").await.unwrap();
        hub.flush().await.unwrap();
        assert_eq!(hub.subscriptions(&"a".into()).len(), 3);

        hub.unregister(&"a".into()).await.unwrap();
        hub.flush().await.unwrap();

        let topics: Vec<_> = hub.connected_topics().into_iter().collect();
        assert_eq!(topics, vec!["T1".to_string()]);
        assert_eq!(hub.topic_subscriber_count("T1"), 1);
        assert!(hub.subscriptions(&"a".into()).is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_evicts_client() {
        let hub = Hub::spawn(HubConfig::default());
        let (slow, mut rx_slow) = client("slow", 1);
        let (fast, mut rx_fast) = client("fast", 8);
        hub.register(slow).await.unwrap();
        hub.register(fast).await.unwrap();
        hub.subscribe(&"slow".into(), "Doom").await.unwrap();
        hub.subscribe(&"fast".into(), "Doom").await.unwrap();

        hub.broadcast_to_topic("Doom", Bytes::from_static(b"1"))
            .await
            .unwrap();
        hub.broadcast_to_topic("Doom", Bytes::from_static(b"2"))
            .await
            .unwrap();
        hub.flush().await.unwrap();

        assert!(!hub.is_registered(&"slow".into()));
        assert!(hub.is_registered(&"fast".into()));
        assert_eq!(hub.topic_subscriber_count("Doom"), 1);
        assert_eq!(drain(&mut rx_fast).len(), 2);

        // The queued message survives, then the queue reports closed.
        assert_eq!(rx_slow.recv().await, Some(Bytes::from_static(b"1")));
        assert_eq!(rx_slow.recv().await, None);
        assert_eq!(hub.stats().evicted_total, 1);
    }

    #[tokio::test]
    async fn test_dead_consumer_evicted() {
        let hub = Hub::spawn(HubConfig::default());
        let (a, rx) = client("a", 8);
        hub.register(a).await.unwrap();
        drop(rx);

        hub.broadcast_all(Bytes::from_static(b"x")).await.unwrap();
        hub.flush().await.unwrap();

        assert_eq!(hub.client_count(), 0);
        assert_eq!(hub.stats().evicted_total, 1);
    }

    #[tokio::test]
    async fn test_many_slow_clients_evicted() {
        let hub = Hub::spawn(HubConfig::default());
        let mut receivers = Vec::new();
        for i in 0..300 {
            let (handle, rx) = client(&format!("c{i}"), 1);
            receivers.push(rx);
            hub.register(handle).await.unwrap();
        }
        hub.flush().await.unwrap();
        assert_eq!(hub.client_count(), 300);

        hub.broadcast_all(Bytes::from_static(b"first")).await.unwrap();
        hub.flush().await.unwrap();
        assert_eq!(hub.client_count(), 300);

        hub.broadcast_all(Bytes::from_static(b"second")).await.unwrap();
        hub.flush().await.unwrap();
        assert_eq!(hub.client_count(), 0);
        assert_eq!(hub.stats().evicted_total, 300);
    }

    #[tokio::test]
    async fn test_stats() {
        let hub = Hub::spawn(HubConfig::default());
        let (a, _rx_a) = client("a", 4);
        let (b, _rx_b) = client("b", 4);
        hub.register(a).await.unwrap();
        hub.register(b).await.unwrap();
        hub.subscribe(&"a".into(), "T1").await.unwrap();
        hub.subscribe(&"a".into(), "T2").await.unwrap();
        hub.subscribe(&"b".into(), "T1").await.unwrap();
        hub.flush().await.unwrap();

        assert_eq!(
            hub.stats(),
            HubStats {
                client_count: 2,
                topic_count: 2,
                total_subscriptions: 3,
                evicted_total: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_control_loop_stops_with_last_handle() {
        let (hub, control) = Hub::new(HubConfig::default());
        let task = tokio::spawn(control.run());
        let other = hub.clone();

        drop(hub);
        other.flush().await.unwrap();
        drop(other);

        task.await.unwrap();
    }
}
