//! API objects delivered by the watch layer.
//!
//! These mirror the Route and Endpoints resources as they arrive on the
//! wire. The router trusts them verbatim; see [`crate::validation`] for the
//! checks the admission layer normally performs upstream.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name and namespace of an API object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

/// Build the internal service key for a namespaced name.
///
/// Objects without a namespace are keyed by their bare name.
pub fn service_key(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}/{name}")
    }
}

// ── Route ──────────────────────────────────────────────────────────

/// A rule binding a host (and optional path) to a backing service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Alias/DNS name that points to the service.
    pub host: String,
    /// Optional path the router matches; empty means the root route.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// Name of the service this route points to.
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

impl Route {
    /// Key of the service unit that owns this route.
    pub fn service_key(&self) -> String {
        service_key(&self.metadata.namespace, &self.service_name)
    }

    /// Termination requested by the route, if any.
    pub fn termination(&self) -> Option<TlsTermination> {
        self.tls.as_ref().and_then(|tls| tls.termination)
    }
}

/// Certificates and termination policy for a route.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// Where TLS stops. Absent means the other fields are ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<TlsTermination>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub certificate: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ca_certificate: String,
    /// Trust anchor used to verify the backend under reencrypt termination.
    #[serde(
        rename = "destinationCACertificate",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub destination_ca_certificate: String,
    /// Not supported by any proxy template yet; carried through untouched.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_pass_phrase: String,
}

/// Where secure communication stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsTermination {
    /// Terminate at the edge proxy.
    Edge,
    /// Forward encrypted traffic; the destination decrypts.
    Passthrough,
    /// Terminate at the edge and re-encrypt toward the backend.
    Reencrypt,
}

impl TlsTermination {
    /// Whether the proxy itself needs certificate material for this mode.
    pub fn terminates_at_edge(self) -> bool {
        matches!(self, TlsTermination::Edge | TlsTermination::Reencrypt)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TlsTermination::Edge => "edge",
            TlsTermination::Passthrough => "passthrough",
            TlsTermination::Reencrypt => "reencrypt",
        }
    }
}

impl fmt::Display for TlsTermination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Endpoints ──────────────────────────────────────────────────────

/// The full current set of endpoints behind a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Raw `IP[:port]` strings.
    #[serde(default)]
    pub endpoints: Vec<String>,
}

impl Endpoints {
    /// Key of the service unit these endpoints belong to.
    pub fn service_key(&self) -> String {
        service_key(&self.metadata.namespace, &self.metadata.name)
    }
}

// ── Watch events ───────────────────────────────────────────────────

/// Kind of change carried by a watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::Added => "ADDED",
            EventType::Modified => "MODIFIED",
            EventType::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// A single change notification, carrying the full current object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum WatchEvent {
    Endpoints {
        #[serde(rename = "type")]
        event_type: EventType,
        object: Endpoints,
    },
    Route {
        #[serde(rename = "type")]
        event_type: EventType,
        object: Route,
    },
}

impl WatchEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            WatchEvent::Endpoints { event_type, .. } | WatchEvent::Route { event_type, .. } => {
                *event_type
            }
        }
    }

    /// The `kind` tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            WatchEvent::Endpoints { .. } => "Endpoints",
            WatchEvent::Route { .. } => "Route",
        }
    }
}
