//! C6 — property rewriter.
//!
//! Stamps authentication, connection, broker, and timing user-properties
//! onto an outbound message and validates the required-field invariants
//! from §3/§4.6. This is the component most invariant-heavy in the spec —
//! every step below is numbered to match §4.6 exactly.

use crate::client_id::{AgentId, ClientId, Mode};
use crate::envelope::Message;
use crate::error::{GatewayError, Result};

fn is_service_mode(mode: Mode) -> bool {
    matches!(mode, Mode::Service | Mode::ServicePayloadOnly)
}

/// Rewrite `message` in place per §4.6 steps 1–7, then validate the result
/// per step 8 / §3's invariants. `now_ms` is the current timestamp in
/// milliseconds since epoch (the broker's clock, injected so the rewriter
/// stays pure and testable).
pub fn rewrite(message: &mut Message, client_id: &ClientId, broker: &AgentId, now_ms: i64) -> Result<()> {
    // Step 1: type defaults to "event".
    if !message.has("type") {
        message.set("type", "event");
    }

    // Step 2: bridge mode preserves client-supplied identity (only
    // validated); every other mode is overwritten from the verified
    // Client-ID — never taken from the client (§3 invariant).
    if client_id.mode == Mode::Bridge {
        for key in ["agent_label", "account_label", "audience"] {
            if !message.has(key) {
                return Err(GatewayError::invalid(format!(
                    "bridge mode requires client-supplied {key}"
                )));
            }
        }
    } else {
        message.set("agent_label", client_id.agent_label.clone());
        message.set("account_label", client_id.account_label.clone());
        message.set("audience", client_id.audience.clone());
    }

    // Step 3: connection_version / connection_mode from the Client-ID.
    message.set("connection_version", client_id.mode.connection_version());
    message.set("connection_mode", client_id.mode.connection_mode());

    // Step 4: broker_* identity from the broker's own AgentId.
    message.set("broker_agent_label", broker.agent_label.clone());
    message.set("broker_account_label", broker.account_label.clone());
    message.set("broker_audience", broker.audience.clone());

    // Step 5: broker_processing_timestamp is always refreshed;
    // broker_initial_processing_timestamp is set-once (§3, §8 invariant 5).
    message.set("broker_processing_timestamp", now_ms.to_string());
    if !message.has("broker_initial_processing_timestamp") {
        message.set("broker_initial_processing_timestamp", now_ms.to_string());
    }

    // Step 6: initial_timestamp preserved if present, else seeded from
    // timestamp if present.
    if !message.has("initial_timestamp") {
        if let Some(timestamp) = message.get("timestamp").map(str::to_string) {
            message.set("initial_timestamp", timestamp);
        }
    }

    // Step 7: timediff handling.
    let has_local_timestamp = message.has("local_timestamp");
    let has_local_diff = message.has("local_initial_timediff");

    if client_id.mode == Mode::Default && has_local_diff && !has_local_timestamp {
        message.remove("local_initial_timediff");
    }

    if has_local_timestamp && !message.has("local_initial_timediff") {
        if let Some(local_timestamp) = message.get("local_timestamp").and_then(|s| s.parse::<i64>().ok()) {
            message.set("local_initial_timediff", (now_ms - local_timestamp).to_string());
        }
    }

    validate(message, client_id)
}

/// Step 8 / §3 invariant validation. Any violation maps to
/// `impl_specific_error` at the hook boundary (§4.8).
fn validate(message: &Message, client_id: &ClientId) -> Result<()> {
    // mode=default must end up carrying local_initial_timediff — the only
    // way to get it is by supplying local_timestamp (step 7).
    if client_id.mode == Mode::Default && !message.has("local_initial_timediff") {
        return Err(GatewayError::invalid(
            "mode=default messages must carry local_initial_timediff (via local_timestamp)",
        ));
    }

    match message.get("type") {
        Some("request") => {
            for field in ["method", "correlation_data", "response_topic"] {
                if field == "correlation_data" {
                    if message.correlation_data_absent() {
                        return Err(GatewayError::invalid("type=request requires correlation_data"));
                    }
                } else if field == "response_topic" {
                    if message.response_topic.is_none() {
                        return Err(GatewayError::invalid("type=request requires response_topic"));
                    }
                } else if !message.has(field) {
                    return Err(GatewayError::invalid(format!("type=request requires {field}")));
                }
            }
        }
        Some("response") => {
            if !message.has("status") {
                return Err(GatewayError::invalid("type=response requires status"));
            }
            if message.correlation_data_absent() {
                return Err(GatewayError::invalid("type=response requires correlation_data"));
            }
        }
        _ => {}
    }

    // Non-service senders: response_topic must address the sender's own
    // inbound unicast topic (§3 invariant).
    if !is_service_mode(client_id.mode) {
        if let Some(response_topic) = &message.response_topic {
            let expected_prefix = format!("agents/{}/api/", client_id.agent_id());
            let valid = response_topic
                .strip_prefix(&expected_prefix)
                .map(|rest| rest.contains("/in/"))
                .unwrap_or(false);
            if !valid {
                return Err(GatewayError::invalid(format!(
                    "response_topic {response_topic:?} must be agents/{}/api/<ver>/in/<...>",
                    client_id.agent_id()
                )));
            }
        }
    }

    Ok(())
}

impl Message {
    fn correlation_data_absent(&self) -> bool {
        self.correlation_data.is_none()
    }
}
