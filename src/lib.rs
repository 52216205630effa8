//! An MQTT broker hook plugin that authenticates connections, authorizes
//! non-default connection modes, enforces a topic ACL, rewrites message
//! properties, and services a small dynamic-subscription protocol.
//!
//! The crate never speaks MQTT wire protocol or owns connection state
//! itself — see [`broker::Broker`] for the narrow interface it calls back
//! into the hosting broker process, and [`pipeline::Pipeline`] for the
//! hook entry points a broker plugin shim wires up.

pub mod acl;
pub mod authn;
pub mod authz;
pub mod broker;
pub mod client_id;
pub mod config;
pub mod dynsub;
pub mod envelope;
pub mod error;
pub mod pipeline;
pub mod rewriter;

pub use broker::Broker;
pub use client_id::{AgentId, ClientId, Mode};
pub use config::Config;
pub use error::{ErrorKind, GatewayError, Result};
pub use pipeline::{Outcome, Pipeline};
