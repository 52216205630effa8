//! External broker interface (§6 "Broker interface consumed").
//!
//! This crate is a hook plugin, not a broker: it never owns connection
//! state, topic trees, or QoS delivery — that lives in the broker process
//! itself. The four operations below are the entire surface it calls back
//! into that process for, narrowed down from `MqttBroker`'s much larger
//! method set (`client_connect`, `client_subscribe`, `get_connected_clients`,
//! …) to just what §6 names.

use crate::error::Result;
use async_trait::async_trait;

/// One active connection, as the broker reports it back (§6
/// `list_connections`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub client_id: String,
    pub agent_id: String,
}

/// The operations this plugin needs from whatever broker process hosts it.
/// A production deployment implements this against the broker's native
/// plugin API (e.g. an RPC shim over VerneMQ/EMQX hooks); tests use the
/// in-memory `FakeBroker` below.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish `payload` to `topic` with the given retain flag, as the
    /// broker's own identity (used for multicast/unicast events the
    /// pipeline emits itself — e.g. `agent.enter`/`agent.leave`, dynsub
    /// replies).
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()>;

    /// Open a subscription to `topic` on behalf of `agent_id` (used by the
    /// dynamic-subscription engine, §4.7).
    async fn subscribe(&self, agent_id: &str, topic: &str) -> Result<()>;

    /// Close a subscription to `topic` on behalf of `agent_id`.
    async fn unsubscribe(&self, agent_id: &str, topic: &str) -> Result<()>;

    /// Every currently-connected client, for diagnostics and dynsub
    /// cleanup sweeps.
    async fn list_connections(&self) -> Result<Vec<Connection>>;
}

pub use fake::FakeBroker;

/// An in-memory `Broker`, shared by unit tests across modules and by the
/// end-to-end pipeline test — not behind `cfg(test)` so integration tests
/// under `tests/` can use it too (§B4 test tooling).
mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// An in-memory `Broker` for pipeline tests: records every publish and
    /// tracks subscriptions per agent without any real network I/O.
    #[derive(Default)]
    pub struct FakeBroker {
        pub published: Mutex<Vec<(String, Vec<u8>, bool)>>,
        pub subscriptions: Mutex<HashMap<String, Vec<String>>>,
        pub connections: Mutex<Vec<Connection>>,
    }

    impl FakeBroker {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl Broker for FakeBroker {
        async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()> {
            self.published.lock().unwrap().push((topic.to_string(), payload, retain));
            Ok(())
        }

        async fn subscribe(&self, agent_id: &str, topic: &str) -> Result<()> {
            self.subscriptions
                .lock()
                .unwrap()
                .entry(agent_id.to_string())
                .or_default()
                .push(topic.to_string());
            Ok(())
        }

        async fn unsubscribe(&self, agent_id: &str, topic: &str) -> Result<()> {
            if let Some(topics) = self.subscriptions.lock().unwrap().get_mut(agent_id) {
                topics.retain(|t| t != topic);
            }
            Ok(())
        }

        async fn list_connections(&self) -> Result<Vec<Connection>> {
            Ok(self.connections.lock().unwrap().clone())
        }
    }

    #[tokio::test]
    async fn fake_broker_records_publishes() {
        let broker = FakeBroker::new();
        broker.publish("agents/a.b.c/api/v1/out/x", b"payload".to_vec(), false).await.unwrap();
        let published = broker.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "agents/a.b.c/api/v1/out/x");
    }

    #[tokio::test]
    async fn fake_broker_tracks_subscribe_and_unsubscribe() {
        let broker = FakeBroker::new();
        broker.subscribe("a.b.c", "agents/a.b.c/api/v1/out/x").await.unwrap();
        assert_eq!(broker.subscriptions.lock().unwrap().get("a.b.c").unwrap().len(), 1);

        broker.unsubscribe("a.b.c", "agents/a.b.c/api/v1/out/x").await.unwrap();
        assert!(broker.subscriptions.lock().unwrap().get("a.b.c").unwrap().is_empty());
    }
}
