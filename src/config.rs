//! C9 — process-wide config holder.
//!
//! Loads the broker's own identity plus the C3/C4 policy tables from a TOML
//! file into an immutable `Arc<Config>` snapshot (§3 `Config`, §9
//! re-architecture away from a global mutable registry — config is loaded
//! once at startup and handed to every hook invocation by reference).

use crate::authn::{AuthnConfig, IssuerConfig};
use crate::authz::{AudiencePolicy, AuthzConfig};
use crate::client_id::AgentId;
use crate::error::{GatewayError, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// Stat-topic publication: off, or on with the identity the stat events are
/// published as (§3 `StatConfig`, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatConfig {
    Disabled,
    Enabled(AgentId),
}

/// The fully-resolved, process-wide configuration snapshot (§3 `Config`).
#[derive(Debug, Clone)]
pub struct Config {
    pub id: AgentId,
    pub authn: AuthnConfig,
    pub authz: AuthzConfig,
    pub stat: StatConfig,
}

#[derive(Debug, Deserialize)]
struct AgentIdFile {
    agent_label: String,
    account_label: String,
    audience: String,
}

impl From<AgentIdFile> for AgentId {
    fn from(f: AgentIdFile) -> Self {
        AgentId { agent_label: f.agent_label, account_label: f.account_label, audience: f.audience }
    }
}

#[derive(Debug, Deserialize)]
struct IssuerConfigFile {
    algorithm: String,
    allowed_audiences: Vec<String>,
    /// Raw PEM text or HMAC secret, as written in the TOML file.
    verification_key: String,
}

#[derive(Debug, Deserialize, Default)]
struct AuthnConfigFile {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    issuers: HashMap<String, IssuerConfigFile>,
}

#[derive(Debug, Deserialize)]
struct AccountIdFile {
    label: String,
    audience: String,
}

#[derive(Debug, Deserialize, Default)]
struct AudiencePolicyFile {
    #[serde(default)]
    trusted: Vec<AccountIdFile>,
}

#[derive(Debug, Deserialize, Default)]
struct AuthzConfigFile {
    #[serde(default)]
    audiences: HashMap<String, AudiencePolicyFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StatConfigFile {
    #[serde(default)]
    enabled: bool,
    id: Option<AgentIdFile>,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    id: AgentIdFile,
    #[serde(default)]
    authn: AuthnConfigFile,
    #[serde(default)]
    authz: AuthzConfigFile,
    #[serde(default)]
    stat: StatConfigFile,
}

/// The environment variable that, when set, is the sole determinant of
/// whether stat events are published: `"0"` disables them, any other value
/// enables them, overriding the TOML file's `[stat] enabled` either way
/// (§6 "stat toggle").
pub const STAT_ENABLED_ENV_VAR: &str = "APP_STAT_ENABLED";

/// `None` when the variable is unset, so the TOML file's own flag decides.
fn env_override_stat() -> Option<bool> {
    std::env::var(STAT_ENABLED_ENV_VAR).ok().map(|v| v != "0")
}

fn build(file: ConfigFile) -> Result<Config> {
    let id: AgentId = file.id.into();

    let mut issuers = HashMap::new();
    for (name, issuer) in file.authn.issuers {
        issuers.insert(
            name,
            IssuerConfig {
                algorithm: issuer.algorithm,
                allowed_audiences: issuer.allowed_audiences,
                verification_key: issuer.verification_key.into_bytes(),
            },
        );
    }
    let authn = AuthnConfig { issuers, enabled: file.authn.enabled };

    let mut audiences = HashMap::new();
    for (audience, policy) in file.authz.audiences {
        let trusted: HashSet<_> = policy
            .trusted
            .into_iter()
            .map(|a| crate::authn::AccountId { label: a.label, audience: a.audience })
            .collect();
        audiences.insert(audience, AudiencePolicy { trusted });
    }
    let authz = AuthzConfig { audiences };

    let stat_enabled = env_override_stat().unwrap_or(file.stat.enabled);
    let stat = if stat_enabled {
        let stat_id = file
            .stat
            .id
            .map(AgentId::from)
            .ok_or_else(|| GatewayError::invalid("stat.enabled requires stat.id"))?;
        StatConfig::Enabled(stat_id)
    } else {
        StatConfig::Disabled
    };

    Ok(Config { id, authn, authz, stat })
}

/// Load configuration from a TOML file at `path` and return it as an
/// `Arc<Config>` snapshot, ready to be shared across every hook invocation.
pub async fn load<P: AsRef<Path>>(path: P) -> Result<Arc<Config>> {
    let content = tokio::fs::read_to_string(&path).await?;
    let file: ConfigFile = toml::from_str(&content)?;
    let config = build(file)?;
    tracing::info!(path = %path.as_ref().display(), broker_agent_id = %config.id.agent_id(), "loaded gateway configuration");
    Ok(Arc::new(config))
}
