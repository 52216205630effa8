//! C1 — identifier codec.
//!
//! Parses and formats the structured Client-ID:
//! `<mode-prefix>/<agent>.<account>.<audience>`, where `mode-prefix`
//! selects one of five connection modes (§4.1).

use crate::error::{GatewayError, Result};
use std::fmt;

/// The role of a connection; governs ACL and property-rewrite behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Default,
    Service,
    ServicePayloadOnly,
    Observer,
    Bridge,
}

impl Mode {
    /// The `(version, mode_label)` pair re-used verbatim when rewriting
    /// `connection_version`/`connection_mode` user properties (§4.1).
    fn version_and_label(&self) -> (&'static str, &'static str) {
        match self {
            Mode::Default => ("v1", "agents"),
            Mode::Service => ("v1", "service-agents"),
            Mode::ServicePayloadOnly => ("v1.payload-only", "service-agents"),
            Mode::Observer => ("v1", "observer-agents"),
            Mode::Bridge => ("v1", "bridge-agents"),
        }
    }

    pub fn connection_version(&self) -> &'static str {
        self.version_and_label().0
    }

    pub fn connection_mode(&self) -> &'static str {
        self.version_and_label().1
    }

    fn prefix(&self) -> String {
        let (ver, label) = self.version_and_label();
        format!("{ver}/{label}")
    }

    fn from_prefix(prefix: &str) -> Option<Mode> {
        match prefix {
            "v1/agents" => Some(Mode::Default),
            "v1/service-agents" => Some(Mode::Service),
            "v1.payload-only/service-agents" => Some(Mode::ServicePayloadOnly),
            "v1/observer-agents" => Some(Mode::Observer),
            "v1/bridge-agents" => Some(Mode::Bridge),
            _ => None,
        }
    }

    /// Non-default modes are only permitted for accounts in the audience's
    /// trusted set (§4.4).
    pub fn requires_trust(&self) -> bool {
        !matches!(self, Mode::Default)
    }
}

/// A parsed, structured client identifier (§3 `ClientId`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId {
    pub mode: Mode,
    pub agent_label: String,
    pub account_label: String,
    pub audience: String,
}

/// `agent`/`account` segments are bounded by `.` and so may not themselves
/// contain one; `audience` runs to end-of-string (§4.1) and is typically a
/// DNS name, so `.` is permitted there — only the other reserved
/// characters are rejected.
fn validate_segment(segment: &str, what: &str, dot_reserved: bool) -> Result<()> {
    if segment.is_empty() {
        return Err(GatewayError::bad_client_id(format!("empty {what} segment")));
    }
    let reserved_hit = segment.contains(['/', '+', '#']) || (dot_reserved && segment.contains('.'));
    if reserved_hit {
        return Err(GatewayError::bad_client_id(format!(
            "{what} segment contains a reserved character: {segment:?}"
        )));
    }
    Ok(())
}

impl ClientId {
    /// `agent_id = "<agent>.<account>.<audience>"` (§3).
    pub fn agent_id(&self) -> String {
        format!("{}.{}.{}", self.agent_label, self.account_label, self.audience)
    }

    /// `account_id = "<account>.<audience>"` (§3).
    pub fn account_id(&self) -> String {
        format!("{}.{}", self.account_label, self.audience)
    }

    /// Parse a raw MQTT Client-ID string per the grammar in §4.1. Parse
    /// failure, an empty segment, or an unknown mode prefix all map to
    /// `client_identifier_not_valid`.
    pub fn parse(raw: &str) -> Result<ClientId> {
        let (prefix, rest) = raw
            .rsplit_once('/')
            .ok_or_else(|| GatewayError::bad_client_id(format!("no mode prefix in {raw:?}")))?;

        let mode = Mode::from_prefix(prefix)
            .ok_or_else(|| GatewayError::bad_client_id(format!("unknown mode prefix {prefix:?}")))?;

        let mut parts = rest.splitn(3, '.');
        let agent_label = parts
            .next()
            .ok_or_else(|| GatewayError::bad_client_id("missing agent segment"))?;
        let account_label = parts
            .next()
            .ok_or_else(|| GatewayError::bad_client_id("missing account segment"))?;
        let audience = parts
            .next()
            .ok_or_else(|| GatewayError::bad_client_id("missing audience segment"))?;

        validate_segment(agent_label, "agent", true)?;
        validate_segment(account_label, "account", true)?;
        validate_segment(audience, "audience", false)?;

        Ok(ClientId {
            mode,
            agent_label: agent_label.to_string(),
            account_label: account_label.to_string(),
            audience: audience.to_string(),
        })
    }

    /// Format back into the wire Client-ID string. `parse(format(id)) = id`
    /// for all well-formed ids (§8 invariant 1).
    pub fn format(&self) -> String {
        format!(
            "{}/{}.{}.{}",
            self.mode.prefix(),
            self.agent_label,
            self.account_label,
            self.audience
        )
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

/// The broker's own identity (§3 `AgentId`): same shape as `ClientId` minus
/// the mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentId {
    pub agent_label: String,
    pub account_label: String,
    pub audience: String,
}

impl AgentId {
    pub fn agent_id(&self) -> String {
        format!("{}.{}.{}", self.agent_label, self.account_label, self.audience)
    }

    pub fn account_id(&self) -> String {
        format!("{}.{}", self.account_label, self.audience)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn label_strategy() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_-]{1,12}"
    }

    fn mode_strategy() -> impl Strategy<Value = Mode> {
        prop_oneof![
            Just(Mode::Default),
            Just(Mode::Service),
            Just(Mode::ServicePayloadOnly),
            Just(Mode::Observer),
            Just(Mode::Bridge),
        ]
    }

    proptest! {
        #[test]
        fn parse_format_round_trip(
            mode in mode_strategy(),
            agent in label_strategy(),
            account in label_strategy(),
            audience in label_strategy(),
        ) {
            let id = ClientId { mode, agent_label: agent, account_label: account, audience };
            let formatted = id.format();
            let parsed = ClientId::parse(&formatted).unwrap();
            prop_assert_eq!(parsed, id);
        }
    }
}
