//! C7 — dynamic-subscription engine.
//!
//! Lets a connected broker-service agent ask (via a `subscription.create`/
//! `subscription.delete` request routed through `on_deliver`) for a
//! multicast subscription to be opened on behalf of another agent, and
//! keeps a side-table of who asked for what so a disconnect or broker
//! shutdown can clean them all up (§4.7, §9 "dynamic-subscription shadow
//! state").

use crate::envelope::Message;
use crate::error::{GatewayError, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// The `{app, object, version}` triple a dynamic subscription grants
/// access to (§3 `DynSub record`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DynSubData {
    pub app: String,
    pub object: Vec<String>,
    pub version: String,
}

impl DynSubData {
    /// `apps/<app>/api/<version>/<object...>` (§4.7 step 2).
    pub fn topic(&self) -> String {
        let mut segments = vec!["apps".to_string(), self.app.clone(), "api".to_string(), self.version.clone()];
        segments.extend(self.object.iter().cloned());
        segments.join("/")
    }
}

/// Concurrent `subject → {data}` side-table (§3 `DynSubState`, §5, §9
/// re-architecture away from a global mutable registry). One instance is
/// shared across all connections via `Arc`.
#[derive(Debug, Default)]
pub struct DynSubState {
    inner: RwLock<HashMap<String, Vec<DynSubData>>>,
}

impl DynSubState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, subject: &str, data: DynSubData) {
        let mut guard = self.inner.write().await;
        let entries = guard.entry(subject.to_string()).or_default();
        if !entries.contains(&data) {
            entries.push(data);
        }
    }

    pub async fn remove(&self, subject: &str, data: &DynSubData) -> Option<DynSubData> {
        let mut guard = self.inner.write().await;
        let entries = guard.get_mut(subject)?;
        let index = entries.iter().position(|d| d == data)?;
        let removed = entries.remove(index);
        if entries.is_empty() {
            guard.remove(subject);
        }
        Some(removed)
    }

    pub async fn get(&self, subject: &str) -> Vec<DynSubData> {
        self.inner.read().await.get(subject).cloned().unwrap_or_default()
    }

    /// Every grant held by `subject`, removed from the table — used on
    /// `on_client_offline`/`on_client_gone`/broker shutdown to sweep a
    /// disconnecting agent's subscriptions (§4.7 "On client disconnect...").
    pub async fn take_all(&self, subject: &str) -> Vec<DynSubData> {
        self.inner.write().await.remove(subject).unwrap_or_default()
    }

    /// Drain the entire table — every `(subject, grants)` pair currently
    /// held, with the table left empty. Used for the broker-shutdown sweep
    /// (§4.7 "On client disconnect... and on broker shutdown"), where every
    /// outstanding subject needs its grants revoked, not just one.
    pub async fn take_everything(&self) -> Vec<(String, Vec<DynSubData>)> {
        std::mem::take(&mut *self.inner.write().await).into_iter().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynSubMethod {
    Create,
    Delete,
}

/// A parsed `subscription.create`/`subscription.delete` request (§4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynSubRequest {
    pub method: DynSubMethod,
    /// The Client-ID string of the agent the subscription is opened for —
    /// not necessarily the delivering sender.
    pub subject: String,
    pub data: DynSubData,
}

/// Parse a dynamic-subscription request out of a message's `method`
/// property and JSON payload `{subject, app, object: [...], version}`. Any
/// other shape is `impl_specific_error` (§9 "malformed dynsub request"
/// resolution — no placeholder payload is reproduced, it's denied like any
/// other malformed deliver-side request).
pub fn parse_request(message: &Message) -> Result<Option<DynSubRequest>> {
    let method = match message.get("method") {
        Some(m) => m,
        None => return Ok(None),
    };
    let method = match method {
        "subscription.create" => DynSubMethod::Create,
        "subscription.delete" => DynSubMethod::Delete,
        _ => return Ok(None),
    };

    let payload: serde_json::Value = serde_json::from_slice(&message.payload)
        .map_err(|_| GatewayError::invalid("dynsub request payload is not valid JSON"))?;

    let subject = payload
        .get("subject")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::invalid("dynsub request missing subject"))?
        .to_string();
    let app = payload
        .get("app")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::invalid("dynsub request missing app"))?
        .to_string();
    let version = payload
        .get("version")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::invalid("dynsub request missing version"))?
        .to_string();
    let object = payload
        .get("object")
        .and_then(|v| v.as_array())
        .ok_or_else(|| GatewayError::invalid("dynsub request missing object"))?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| GatewayError::invalid("dynsub request object must be an array of strings"))?;

    Ok(Some(DynSubRequest { method, subject, data: DynSubData { app, object, version } }))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Grants are isolated per subject, regardless of how many unrelated
        /// subjects also hold grants.
        #[test]
        fn grants_are_isolated_per_subject(
            subject_a in "[a-z0-9]{1,8}",
            subject_b in "[a-z0-9]{1,8}",
            app in "[a-z0-9]{1,8}",
        ) {
            prop_assume!(subject_a != subject_b);
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let state = DynSubState::new();
                let data = DynSubData { app: app.clone(), object: vec!["o".into()], version: "v1".into() };
                state.put(&subject_a, data.clone()).await;

                prop_assert_eq!(state.get(&subject_a).await, vec![data]);
                prop_assert!(state.get(&subject_b).await.is_empty());
                Ok(())
            })?;
        }
    }
}
