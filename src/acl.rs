//! C5 — topic ACL.
//!
//! Per-mode publish/subscribe topic grammar (§4.5). Topics are segmented
//! arrays (split on `/`) to avoid ambiguity around `/` inside labels —
//! mirrored from the broker interface's own `topic: [str]` shape (§6).

use crate::client_id::{ClientId, Mode};
use crate::error::{GatewayError, Result};

/// Split a topic string into its `/`-delimited segments.
pub fn segments(topic: &str) -> Vec<&str> {
    topic.split('/').collect()
}

fn is_service_like(mode: Mode) -> bool {
    matches!(mode, Mode::Service | Mode::ServicePayloadOnly | Mode::Observer | Mode::Bridge)
}

fn is_service_or_bridge(mode: Mode) -> bool {
    matches!(mode, Mode::Service | Mode::ServicePayloadOnly | Mode::Bridge)
}

/// Check a publish topic against the connector's mode (§4.5 "Publish").
pub fn check_publish(client_id: &ClientId, topic: &str) -> Result<()> {
    let segs = segments(topic);
    let account_id = client_id.account_id();
    let agent_id = client_id.agent_id();

    // broadcast: apps/<ACCOUNT_ID=ME>/api/<ver>/…
    if segs.len() >= 4 && segs[0] == "apps" && segs[2] == "api" {
        if segs[1] == account_id {
            return if is_service_like(client_id.mode) {
                Ok(())
            } else {
                Err(deny_publish(topic, client_id.mode))
            };
        }
        return Err(deny_publish(topic, client_id.mode));
    }

    // multicast: agents/<AGENT_ID=ME>/api/<ver>/out/<ACCOUNT_ID>
    if segs.len() == 6 && segs[0] == "agents" && segs[2] == "api" && segs[4] == "out" {
        if segs[1] == agent_id {
            return Ok(());
        }
        return Err(deny_publish(topic, client_id.mode));
    }

    // unicast-in: agents/<AGENT_ID>/api/<ver>/in/<ACCOUNT_ID=ME>
    if segs.len() == 6 && segs[0] == "agents" && segs[2] == "api" && segs[4] == "in" {
        if segs[5] == account_id {
            return if is_service_like(client_id.mode) {
                Ok(())
            } else {
                Err(deny_publish(topic, client_id.mode))
            };
        }
        return Err(deny_publish(topic, client_id.mode));
    }

    Err(deny_publish(topic, client_id.mode))
}

fn deny_publish(topic: &str, mode: Mode) -> GatewayError {
    GatewayError::not_authorized(format!("publish to {topic:?} denied for mode {mode:?}"))
}

/// Strip a `$share/<group>/…` prefix for ACL purposes — equivalent to the
/// bare topic filter underneath (§4.5, §8 invariant 6).
pub fn strip_share<'a>(segs: &[&'a str]) -> Vec<&'a str> {
    if segs.len() >= 2 && segs[0] == "$share" {
        segs[2..].to_vec()
    } else {
        segs.to_vec()
    }
}

/// Check a subscribe topic filter against the connector's mode (§4.5
/// "Subscribe").
pub fn check_subscribe(client_id: &ClientId, topic_filter: &str) -> Result<()> {
    let raw_segs = segments(topic_filter);
    let segs = strip_share(&raw_segs);

    if client_id.mode == Mode::Observer {
        return Ok(());
    }

    let account_id = client_id.account_id();
    let agent_id = client_id.agent_id();

    // broadcast: apps/*/api/*/…
    if segs.len() >= 4 && segs[0] == "apps" && segs[2] == "api" {
        return if is_service_or_bridge(client_id.mode) {
            Ok(())
        } else {
            Err(deny_subscribe(topic_filter, client_id.mode))
        };
    }

    // multicast: agents/+/api/*/out/<ACCOUNT_ID=ME>
    if segs.len() == 6 && segs[0] == "agents" && segs[2] == "api" && segs[4] == "out" {
        if segs[5] == account_id && is_service_or_bridge(client_id.mode) {
            return Ok(());
        }
        return Err(deny_subscribe(topic_filter, client_id.mode));
    }

    // unicast-in: agents/<AGENT_ID=ME>/api/*/in/*
    if segs.len() == 6 && segs[0] == "agents" && segs[2] == "api" && segs[4] == "in" {
        if segs[1] == agent_id {
            return Ok(());
        }
        return Err(deny_subscribe(topic_filter, client_id.mode));
    }

    Err(deny_subscribe(topic_filter, client_id.mode))
}

fn deny_subscribe(topic: &str, mode: Mode) -> GatewayError {
    GatewayError::not_authorized(format!("subscribe to {topic:?} denied for mode {mode:?}"))
}

/// Connect-time topic/session constraints (§4.5 "Connect constraints").
/// QoS is unconstrained; only `service` may publish retained messages, and
/// non-trusted modes must connect with `clean_session=true`.
pub fn check_retain(client_id: &ClientId, retain: bool) -> Result<()> {
    if retain && client_id.mode != Mode::Service {
        return Err(GatewayError::not_authorized(format!(
            "mode {:?} may not publish retained messages",
            client_id.mode
        )));
    }
    Ok(())
}

pub fn check_clean_session(client_id: &ClientId, clean_session: bool) -> Result<()> {
    if !client_id.mode.requires_trust() && !clean_session {
        return Err(GatewayError::invalid(
            "non-trusted connection modes must connect with clean_session=true",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(raw: &str) -> ClientId {
        ClientId::parse(raw).unwrap()
    }

    #[test]
    fn default_mode_cannot_publish_broadcast() {
        let id = cid("v1/agents/a.b.example.net");
        let err = check_publish(&id, "apps/b.example.net/api/v1/foo").unwrap_err();
        assert_eq!(err.kind().reason_code(), "not_authorized");
    }

    #[test]
    fn service_mode_can_publish_broadcast_to_own_account() {
        let id = cid("v1/service-agents/a.b.example.net");
        check_publish(&id, "apps/b.example.net/api/v1/foo").unwrap();
    }

    #[test]
    fn any_mode_can_publish_multicast_from_own_agent() {
        let id = cid("v1/agents/a.b.example.net");
        check_publish(&id, "agents/a.b.example.net/api/v1/out/c.example.org").unwrap();
    }

    #[test]
    fn default_mode_cannot_publish_unicast_in() {
        let id = cid("v1/agents/a.b.example.net");
        let err =
            check_publish(&id, "agents/x.y.example.net/api/v1/in/b.example.net").unwrap_err();
        assert_eq!(err.kind().reason_code(), "not_authorized");
    }

    #[test]
    fn service_mode_can_publish_unicast_in_addressed_to_self() {
        let id = cid("v1/service-agents/a.b.example.net");
        check_publish(&id, "agents/x.y.example.net/api/v1/in/b.example.net").unwrap();
    }

    #[test]
    fn publish_to_unrelated_topic_is_denied() {
        let id = cid("v1/bridge-agents/a.b.example.net");
        let err = check_publish(&id, "some/random/topic").unwrap_err();
        assert_eq!(err.kind().reason_code(), "not_authorized");
    }

    #[test]
    fn default_subscribe_to_broadcast_is_denied() {
        let id = cid("v1/agents/a.b.example.net");
        let err = check_subscribe(&id, "apps/x/api/v1/foo").unwrap_err();
        assert_eq!(err.kind().reason_code(), "not_authorized");
    }

    #[test]
    fn observer_may_subscribe_to_anything() {
        let id = cid("v1/observer-agents/a.b.example.net");
        check_subscribe(&id, "apps/x/api/v1/foo").unwrap();
        check_subscribe(&id, "totally/unstructured/topic").unwrap();
    }

    #[test]
    fn service_may_subscribe_to_broadcast() {
        let id = cid("v1/service-agents/a.b.example.net");
        check_subscribe(&id, "apps/x/api/v1/foo").unwrap();
    }

    #[test]
    fn any_mode_may_subscribe_unicast_in_for_self() {
        let id = cid("v1/agents/a.b.example.net");
        check_subscribe(&id, "agents/a.b.example.net/api/v1/in/anything").unwrap();
    }

    #[test]
    fn share_prefix_is_equivalent_to_bare_topic() {
        let id = cid("v1/agents/a.b.example.net");
        let plain = check_subscribe(&id, "agents/a.b.example.net/api/v1/in/x");
        let shared = check_subscribe(&id, "$share/group1/agents/a.b.example.net/api/v1/in/x");
        assert_eq!(plain.is_ok(), shared.is_ok());
    }

    #[test]
    fn only_service_may_retain() {
        let service = cid("v1/service-agents/a.b.example.net");
        let default = cid("v1/agents/a.b.example.net");
        check_retain(&service, true).unwrap();
        assert!(check_retain(&default, true).is_err());
        check_retain(&default, false).unwrap();
    }

    #[test]
    fn non_trusted_modes_require_clean_session() {
        let default = cid("v1/agents/a.b.example.net");
        check_clean_session(&default, true).unwrap();
        assert!(check_clean_session(&default, false).is_err());

        let service = cid("v1/service-agents/a.b.example.net");
        check_clean_session(&service, false).unwrap();
    }
}
