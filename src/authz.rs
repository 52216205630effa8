//! C4 — connect authorizer.
//!
//! `mode=default` is always allowed once authenticated. Any other mode
//! requires the account to be in the *broker's own audience*'s trusted set
//! (§4.4) — note this is the broker's audience, not the connector's.

use crate::authn::AccountId;
use crate::client_id::{ClientId, Mode};
use crate::error::{GatewayError, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

/// A single audience's authorization policy (§3 `AuthzConfig`). Only the
/// `trusted` policy type is modeled — §3 names it as the sole variant.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AudiencePolicy {
    #[serde(default)]
    pub trusted: HashSet<AccountId>,
}

/// `audience → AudiencePolicy` (§3 `AuthzConfig`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthzConfig {
    #[serde(flatten)]
    pub audiences: HashMap<String, AudiencePolicy>,
}

/// Authorize the connector's mode against the broker's own audience policy.
/// Returns `Ok(())` for `mode=default` unconditionally (once authenticated);
/// for any other mode, requires `{account_label, audience_of_account}` to
/// be in the trusted set of `broker_audience` (§4.4).
pub fn authorize_connect(
    config: &AuthzConfig,
    client_id: &ClientId,
    account: &AccountId,
    broker_audience: &str,
) -> Result<()> {
    if !client_id.mode.requires_trust() {
        return Ok(());
    }

    debug_assert!(matches!(
        client_id.mode,
        Mode::Service | Mode::ServicePayloadOnly | Mode::Observer | Mode::Bridge
    ));

    let policy = config.audiences.get(broker_audience);
    let trusted = policy.map(|p| p.trusted.contains(account)).unwrap_or(false);

    if trusted {
        Ok(())
    } else {
        Err(GatewayError::not_authorized(format!(
            "account {}.{} is not trusted for audience {broker_audience}",
            account.label, account.audience
        )))
    }
}
