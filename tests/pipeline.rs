//! End-to-end hook pipeline tests against the public API, covering the
//! worked scenarios from the specification (connect, publish, subscribe,
//! deliver + dynamic subscription, disconnect cleanup).

use mqtt_gateway_hooks::broker::FakeBroker;
use mqtt_gateway_hooks::client_id::AgentId;
use mqtt_gateway_hooks::config::{Config, StatConfig};
use mqtt_gateway_hooks::dynsub::DynSubState;
use mqtt_gateway_hooks::{Outcome, Pipeline};
use std::sync::Arc;

fn broker_agent_id() -> AgentId {
    AgentId { agent_label: "broker".into(), account_label: "svc".into(), audience: "example.org".into() }
}

fn pipeline() -> (Pipeline, Arc<FakeBroker>) {
    let config = Arc::new(Config {
        id: broker_agent_id(),
        authn: Default::default(),
        authz: Default::default(),
        stat: StatConfig::Disabled,
    });
    let broker = Arc::new(FakeBroker::new());
    let pipeline = Pipeline::new(config, broker.clone(), Arc::new(DynSubState::new()));
    (pipeline, broker)
}

#[tokio::test]
async fn connect_publish_subscribe_round_trip() {
    let (pipeline, _broker) = pipeline();

    let connect = pipeline.auth_on_register_v5("v1/agents/a.b.example.net", b"anything", true).await;
    assert_eq!(connect, Outcome::Ok);

    let payload = br#"{"payload":"hi","properties":{"local_timestamp":"100"}}"#;
    let publish = pipeline
        .auth_on_publish_v5(
            "v1/agents/a.b.example.net",
            "agents/a.b.example.net/api/v1/out/c.example.org",
            payload,
            false,
            150,
        )
        .await;
    let message = match publish {
        Outcome::OkWithModifiers(m) => m,
        other => panic!("expected accept-with-modifiers, got {other:?}"),
    };
    assert_eq!(message.get("agent_label"), Some("a"));
    assert_eq!(message.get("local_initial_timediff"), Some("50"));

    let subscribe = pipeline
        .auth_on_subscribe_v5("v1/agents/a.b.example.net", &["agents/a.b.example.net/api/v1/in/anything".to_string()])
        .await;
    assert_eq!(subscribe, Outcome::Ok);

    let denied = pipeline
        .auth_on_subscribe_v5("v1/agents/a.b.example.net", &["apps/x/api/v1/foo".to_string()])
        .await;
    assert_eq!(denied, Outcome::Error { reason_code: "not_authorized" });
}

#[tokio::test]
async fn connect_with_dirty_session_on_untrusted_mode_is_denied() {
    let (pipeline, _broker) = pipeline();
    let outcome = pipeline.auth_on_register_v3("v1/agents/a.b.example.net", b"x", false).await;
    assert_eq!(outcome, Outcome::Error { reason_code: "impl_specific_error" });
}

#[tokio::test]
async fn untrusted_service_connect_is_denied() {
    let (pipeline, _broker) = pipeline();
    let outcome = pipeline.auth_on_register_v5("v1/service-agents/a.b.c.example.net", b"x", true).await;
    assert_eq!(outcome, Outcome::Error { reason_code: "not_authorized" });
}

#[tokio::test]
async fn bridge_publish_without_client_supplied_identity_is_denied() {
    let (pipeline, _broker) = pipeline();
    let payload = br#"{"payload":"hi"}"#;
    let outcome = pipeline
        .auth_on_publish_v3(
            "v1/bridge-agents/a.b.example.net",
            "agents/a.b.example.net/api/v1/out/c.example.org",
            payload,
            false,
            10,
        )
        .await;
    assert_eq!(outcome, Outcome::Error { reason_code: "impl_specific_error" });
}

#[tokio::test]
async fn retained_publish_requires_service_mode() {
    let (pipeline, _broker) = pipeline();
    let payload = br#"{"payload":"hi","properties":{"local_timestamp":"1"}}"#;

    let denied = pipeline
        .auth_on_publish_v5(
            "v1/agents/a.b.example.net",
            "agents/a.b.example.net/api/v1/out/c.example.org",
            payload,
            true,
            5,
        )
        .await;
    assert_eq!(denied, Outcome::Error { reason_code: "not_authorized" });

    let allowed = pipeline
        .auth_on_publish_v5(
            "v1/service-agents/a.b.example.net",
            "agents/a.b.example.net/api/v1/out/c.example.org",
            payload,
            true,
            5,
        )
        .await;
    assert!(allowed.is_ok());
}

#[tokio::test]
async fn deliver_dynsub_create_opens_a_broker_subscription_and_replies() {
    let (pipeline, broker) = pipeline();

    let recipient = "v1/agents/s.svc.example.org";
    let topic = "agents/s.svc.example.org/api/v1/in/app.example.org";
    let request_body = serde_json::json!({
        "subject": recipient,
        "app": "app.example.org",
        "version": "v1",
        "object": ["rooms", "42"],
    })
    .to_string();
    let envelope = serde_json::json!({
        "payload": request_body,
        "properties": {
            "type": "request",
            "method": "subscription.create",
            "correlation_data": "corr-1",
            "response_topic": topic,
        }
    });
    let payload = serde_json::to_vec(&envelope).unwrap();

    let outcome = pipeline.on_deliver_v5(recipient, topic, &payload, 10).await;
    assert_eq!(outcome, Outcome::Ok);

    let subscriptions = broker.subscriptions.lock().unwrap();
    assert_eq!(
        subscriptions.get(recipient).unwrap(),
        &vec!["apps/app.example.org/api/v1/rooms/42".to_string()]
    );
    drop(subscriptions);

    let published = broker.published.lock().unwrap();
    assert_eq!(published.len(), 2);
    let reply: serde_json::Value = serde_json::from_slice(&published[1].1).unwrap();
    assert_eq!(reply["properties"]["status"], "200");
    assert_eq!(reply["properties"]["correlation_data"], "corr-1");
}

#[tokio::test]
async fn disconnect_revokes_every_dynsub_grant_held_by_the_agent() {
    let (pipeline, broker) = pipeline();

    let recipient = "v1/agents/s.svc.example.org";
    let topic = "agents/s.svc.example.org/api/v1/in/app.example.org";
    for object in [["rooms", "1"], ["rooms", "2"]] {
        let request_body = serde_json::json!({
            "subject": recipient,
            "app": "app.example.org",
            "version": "v1",
            "object": object,
        })
        .to_string();
        let envelope = serde_json::json!({
            "payload": request_body,
            "properties": {
                "method": "subscription.create",
                "correlation_data": "corr",
                "response_topic": topic,
            }
        });
        let payload = serde_json::to_vec(&envelope).unwrap();
        pipeline.on_deliver_v5(recipient, topic, &payload, 10).await;
    }

    assert_eq!(broker.subscriptions.lock().unwrap().get(recipient).unwrap().len(), 2);

    pipeline.on_client_gone(recipient).await;

    assert!(broker.subscriptions.lock().unwrap().get(recipient).unwrap().is_empty());
}
