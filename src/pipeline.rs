//! C8 — connect/publish/deliver/subscribe/disconnect pipelines.
//!
//! Orchestrates C1–C7 for each of the ten broker hooks (§6) and returns an
//! accept / accept-with-modifications / deny outcome. Grounded in
//! `mockforge-mqtt`'s broker-side per-event method shape (`client_connect`,
//! `client_disconnect`, `client_subscribe`, `handle_publish`), generalized
//! from owning broker state to composing the narrower `Broker` interface.

use crate::acl;
use crate::authn;
use crate::authz;
use crate::broker::Broker;
use crate::client_id::ClientId;
use crate::config::{Config, StatConfig};
use crate::dynsub::{self, DynSubMethod, DynSubRequest, DynSubState};
use crate::envelope::{Envelope, Message};
use crate::error::GatewayError;
use crate::rewriter;
use std::sync::Arc;

/// A hook's return shape (§6 "Return shapes"): accept unchanged, accept
/// with payload/property changes, or deny with a reason code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    OkWithModifiers(Message),
    Error { reason_code: &'static str },
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        !matches!(self, Outcome::Error { .. })
    }
}

/// Orchestrates every hook over a shared config snapshot, broker handle,
/// and dynamic-subscription side-table (§5 "Shared state").
pub struct Pipeline {
    config: Arc<Config>,
    broker: Arc<dyn Broker>,
    dynsub: Arc<DynSubState>,
}

impl Pipeline {
    pub fn new(config: Arc<Config>, broker: Arc<dyn Broker>, dynsub: Arc<DynSubState>) -> Self {
        Self { config, broker, dynsub }
    }

    // -- connect ----------------------------------------------------------

    pub async fn auth_on_register_v3(&self, client_id_raw: &str, password: &[u8], clean_session: bool) -> Outcome {
        self.connect(client_id_raw, password, clean_session).await
    }

    pub async fn auth_on_register_v5(&self, client_id_raw: &str, password: &[u8], clean_session: bool) -> Outcome {
        self.connect(client_id_raw, password, clean_session).await
    }

    async fn connect(&self, client_id_raw: &str, password: &[u8], clean_session: bool) -> Outcome {
        let client_id = match ClientId::parse(client_id_raw) {
            Ok(c) => c,
            Err(e) => return self.deny("connect", client_id_raw, None, e),
        };

        if let Err(e) = acl::check_clean_session(&client_id, clean_session) {
            return self.deny("connect", client_id_raw, Some(&client_id), e);
        }

        let account = match authn::authenticate(&self.config.authn, &client_id, password) {
            Ok(a) => a,
            Err(e) => return self.deny("connect", client_id_raw, Some(&client_id), e),
        };

        if let Err(e) = authz::authorize_connect(&self.config.authz, &client_id, &account, &self.config.id.audience) {
            return self.deny("connect", client_id_raw, Some(&client_id), e);
        }

        self.emit_audience_event("agent.enter", &client_id).await;
        Outcome::Ok
    }

    // -- publish ------------------------------------------------------------

    pub async fn auth_on_publish_v3(
        &self,
        client_id_raw: &str,
        topic: &str,
        payload: &[u8],
        retain: bool,
        now_ms: i64,
    ) -> Outcome {
        self.publish(client_id_raw, topic, payload, retain, now_ms).await
    }

    pub async fn auth_on_publish_v5(
        &self,
        client_id_raw: &str,
        topic: &str,
        payload: &[u8],
        retain: bool,
        now_ms: i64,
    ) -> Outcome {
        self.publish(client_id_raw, topic, payload, retain, now_ms).await
    }

    async fn publish(&self, client_id_raw: &str, topic: &str, payload: &[u8], retain: bool, now_ms: i64) -> Outcome {
        let client_id = match ClientId::parse(client_id_raw) {
            Ok(c) => c,
            Err(e) => return self.deny("publish", client_id_raw, None, e),
        };

        if let Err(e) = acl::check_retain(&client_id, retain) {
            return self.deny("publish", topic, Some(&client_id), e);
        }

        let payload_only = client_id.mode == crate::client_id::Mode::ServicePayloadOnly;
        let mut message = match crate::envelope::parse_inbound(payload, payload_only) {
            Ok(m) => m,
            Err(e) => return self.deny("publish", topic, Some(&client_id), e),
        };

        if let Err(e) = rewriter::rewrite(&mut message, &client_id, &self.config.id, now_ms) {
            return self.deny("publish", topic, Some(&client_id), e);
        }

        if let Err(e) = acl::check_publish(&client_id, topic) {
            return self.deny("publish", topic, Some(&client_id), e);
        }

        Outcome::OkWithModifiers(message)
    }

    // -- deliver --------------------------------------------------------------

    pub async fn on_deliver_v3(&self, recipient_raw: &str, topic: &str, payload: &[u8], now_ms: i64) -> Outcome {
        self.deliver(recipient_raw, topic, payload, now_ms).await
    }

    pub async fn on_deliver_v5(&self, recipient_raw: &str, topic: &str, payload: &[u8], now_ms: i64) -> Outcome {
        self.deliver(recipient_raw, topic, payload, now_ms).await
    }

    async fn deliver(&self, recipient_raw: &str, topic: &str, payload: &[u8], now_ms: i64) -> Outcome {
        let recipient = match ClientId::parse(recipient_raw) {
            Ok(c) => c,
            Err(e) => return self.deny("deliver", recipient_raw, None, e),
        };

        let message = match Envelope::parse(payload) {
            Ok(m) => m,
            Err(e) => return self.deny("deliver", topic, Some(&recipient), e),
        };

        // Dynsub requests are only processed on deliver, gated on the
        // response topic matching the delivery topic (§4.7, §9 open
        // question: this codifies the runtime behavior, not the commented
        // publish-side intent).
        if message.response_topic.as_deref() == Some(topic) {
            match dynsub::parse_request(&message) {
                Ok(Some(request)) => {
                    if request.subject == recipient.format() {
                        self.process_dynsub(&recipient, &message, request, now_ms).await;
                    }
                }
                Ok(None) => {}
                Err(e) => return self.deny("deliver", topic, Some(&recipient), e),
            }
        }

        Outcome::Ok
    }

    async fn process_dynsub(&self, recipient: &ClientId, original: &Message, request: DynSubRequest, _now_ms: i64) {
        let broker_result = match request.method {
            DynSubMethod::Create => self.broker.subscribe(&request.subject, &request.data.topic()).await,
            DynSubMethod::Delete => self.broker.unsubscribe(&request.subject, &request.data.topic()).await,
        };

        if let Err(e) = broker_result {
            tracing::warn!(event = "dynsub", subject = %request.subject, reason = %e, "broker call failed, dynsub discarded");
            return;
        }

        match request.method {
            DynSubMethod::Create => self.dynsub.put(&request.subject, request.data.clone()).await,
            DynSubMethod::Delete => {
                self.dynsub.remove(&request.subject, &request.data).await;
            }
        }

        self.emit_dynsub_event(&request).await;
        self.reply_dynsub(recipient, original, &request).await;
    }

    async fn emit_dynsub_event(&self, request: &DynSubRequest) {
        let label = match request.method {
            DynSubMethod::Create => "subscription.create",
            DynSubMethod::Delete => "subscription.delete",
        };
        let topic = format!("agents/{}/api/v1/out/{}", self.config.id.agent_id(), request.data.app);

        let mut event = Message::default();
        event.set("type", "event");
        event.set("label", label);
        event.payload =
            serde_json::json!({ "object": request.data.object, "subject": request.subject }).to_string().into_bytes();

        self.publish_or_log(&topic, &event, "dynsub event").await;
    }

    async fn reply_dynsub(&self, recipient: &ClientId, original: &Message, request: &DynSubRequest) {
        let topic = format!("agents/{}/api/v1/in/{}", recipient.agent_id(), request.data.app);

        let mut reply = Message::default();
        reply.set("type", "response");
        reply.set("status", "200");
        reply.correlation_data = original.correlation_data.clone();
        reply.payload = b"{}".to_vec();

        self.publish_or_log(&topic, &reply, "dynsub reply").await;
    }

    // -- subscribe --------------------------------------------------------

    pub async fn auth_on_subscribe_v3(&self, client_id_raw: &str, topic_filters: &[String]) -> Outcome {
        self.subscribe(client_id_raw, topic_filters).await
    }

    pub async fn auth_on_subscribe_v5(&self, client_id_raw: &str, topic_filters: &[String]) -> Outcome {
        self.subscribe(client_id_raw, topic_filters).await
    }

    async fn subscribe(&self, client_id_raw: &str, topic_filters: &[String]) -> Outcome {
        let client_id = match ClientId::parse(client_id_raw) {
            Ok(c) => c,
            Err(e) => return self.deny("subscribe", client_id_raw, None, e),
        };

        for filter in topic_filters {
            if let Err(e) = acl::check_subscribe(&client_id, filter) {
                return self.deny("subscribe", filter, Some(&client_id), e);
            }
        }

        Outcome::Ok
    }

    // -- disconnect ---------------------------------------------------------

    pub async fn on_client_offline(&self, client_id_raw: &str) {
        self.cleanup(client_id_raw).await;
    }

    pub async fn on_client_gone(&self, client_id_raw: &str) {
        self.cleanup(client_id_raw).await;
    }

    async fn cleanup(&self, client_id_raw: &str) {
        let client_id = match ClientId::parse(client_id_raw) {
            Ok(c) => c,
            Err(_) => return,
        };
        let subject = client_id.format();

        let grants = self.dynsub.take_all(&subject).await;
        self.revoke_grants("disconnect", &subject, grants).await;

        self.emit_audience_event("agent.leave", &client_id).await;
    }

    /// Broker-shutdown sweep (§4.7 "On client disconnect... and on broker
    /// shutdown"): every subject still holding dynamic-subscription grants
    /// gets them revoked and a `subscription.delete` event emitted, exactly
    /// as on a single client's disconnect — just for the whole table at
    /// once, since the broker process itself is going away.
    pub async fn shutdown(&self) {
        for (subject, grants) in self.dynsub.take_everything().await {
            self.revoke_grants("shutdown", &subject, grants).await;
        }
    }

    async fn revoke_grants(&self, event: &'static str, subject: &str, grants: Vec<dynsub::DynSubData>) {
        for data in grants {
            if let Err(e) = self.broker.unsubscribe(subject, &data.topic()).await {
                tracing::warn!(event, subject, reason = %e, "failed to unsubscribe on cleanup");
            }
            let request = DynSubRequest { method: DynSubMethod::Delete, subject: subject.to_string(), data };
            self.emit_dynsub_event(&request).await;
        }
    }

    // -- shared helpers -----------------------------------------------------

    /// Audience lifecycle events (§6 "Configuration inputs"): published only
    /// when stats are enabled, to `apps/<broker_account_id>/api/v1/
    /// audiences/<client_audience>/events`, authored as the stat identity
    /// rather than the connect-time broker identity.
    async fn emit_audience_event(&self, label: &str, client_id: &ClientId) {
        let stat_id = match &self.config.stat {
            StatConfig::Enabled(id) => id,
            StatConfig::Disabled => return,
        };

        let topic =
            format!("apps/{}/api/v1/audiences/{}/events", self.config.id.account_id(), client_id.audience);

        let mut event = Message::default();
        event.set("type", "event");
        event.set("label", label);
        event.set("agent_label", client_id.agent_label.clone());
        event.set("account_label", client_id.account_label.clone());
        event.set("audience", client_id.audience.clone());
        event.set("broker_agent_label", stat_id.agent_label.clone());
        event.set("broker_account_label", stat_id.account_label.clone());
        event.set("broker_audience", stat_id.audience.clone());
        event.payload = b"{}".to_vec();

        self.publish_or_log(&topic, &event, "audience event").await;
    }

    /// Audit/dynsub emissions that themselves fail are logged and
    /// swallowed — they must never turn into a deny (§5 "Cancellation",
    /// §7).
    async fn publish_or_log(&self, topic: &str, message: &Message, what: &'static str) {
        let bytes = match Envelope::emit(message) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(topic, reason = %e, "failed to encode {what}");
                return;
            }
        };
        if let Err(e) = self.broker.publish(topic, bytes, false).await {
            tracing::warn!(topic, reason = %e, "failed to publish {what}");
        }
    }

    /// §7 logging policy: connect denials warn, every other hook's denial
    /// errors; both carry the event kind, offending input, agent-id, mode,
    /// and reason — never the password or verification key.
    fn deny(&self, hook: &'static str, offending_input: &str, client_id: Option<&ClientId>, err: GatewayError) -> Outcome {
        let reason_code = err.kind().reason_code();
        let agent_id = client_id.map(ClientId::agent_id).unwrap_or_default();
        let mode = client_id.map(|c| format!("{:?}", c.mode)).unwrap_or_else(|| "unknown".to_string());

        if hook == "connect" {
            tracing::warn!(event = hook, reason_code, offending_input, agent_id, mode, reason = %err, "hook denied");
        } else {
            tracing::error!(event = hook, reason_code, offending_input, agent_id, mode, reason = %err, "hook denied");
        }

        Outcome::Error { reason_code }
    }
}
