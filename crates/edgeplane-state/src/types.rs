//! Domain types for the router state.
//!
//! These are plain records; all behavior lives in the store. Everything is
//! serializable so the full mapping can be persisted and handed to the
//! templates as-is.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use edge_core::{Route, TlsTermination};

/// Internal identifier of a service unit (`namespace/name` or `name`).
pub type ServiceUnitId = String;

/// Port assumed when an endpoint string carries only an IP.
pub const DEFAULT_ENDPOINT_PORT: u16 = 80;

/// Suffix of the certificate slot holding a route's CA chain.
pub const CA_CERT_SUFFIX: &str = "_ca";

/// Suffix of the certificate slot holding the reencrypt destination trust anchor.
pub const DEST_CERT_SUFFIX: &str = "_pod";

/// Key of a route within its service unit.
pub fn route_key(host: &str, path: &str) -> String {
    format!("{host}-{path}")
}

/// Slot key of the CA chain for `host`.
pub fn ca_cert_key(host: &str) -> String {
    format!("{host}{CA_CERT_SUFFIX}")
}

/// Slot key of the destination trust anchor for `host`.
pub fn dest_cert_key(host: &str) -> String {
    format!("{host}{DEST_CERT_SUFFIX}")
}

// ── Service unit ───────────────────────────────────────────────────

/// Aggregate routing and endpoint state for one backing service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceUnit {
    pub name: ServiceUnitId,
    /// Live endpoints, keyed by their canonical `IP:port` id.
    #[serde(default)]
    pub endpoint_table: BTreeMap<String, Endpoint>,
    /// One entry per (host, path), keyed by [`route_key`].
    #[serde(default)]
    pub service_alias_configs: BTreeMap<String, ServiceAliasConfig>,
}

impl ServiceUnit {
    pub fn new(name: impl Into<ServiceUnitId>) -> Self {
        Self {
            name: name.into(),
            endpoint_table: BTreeMap::new(),
            service_alias_configs: BTreeMap::new(),
        }
    }
}

// ── Endpoint ───────────────────────────────────────────────────────

/// A live `IP:port` behind a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub ip: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        let id = match ip {
            IpAddr::V4(v4) => format!("{v4}:{port}"),
            IpAddr::V6(v6) => format!("[{v6}]:{port}"),
        };
        Self {
            id,
            ip: ip.to_string(),
            port,
        }
    }

    /// Parse a raw endpoint string.
    ///
    /// Accepts `IP`, `IP:port`, `[IPv6]:port` and bare IPv6 addresses. A
    /// bare address gets port 80. Returns `None` for anything else.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if let Ok(ip) = raw.parse::<IpAddr>() {
            return Some(Self::new(ip, DEFAULT_ENDPOINT_PORT));
        }

        if let Some(rest) = raw.strip_prefix('[') {
            let (host, tail) = rest.split_once(']')?;
            let ip: Ipv6Addr = host.parse().ok()?;
            let port = match tail {
                "" => DEFAULT_ENDPOINT_PORT,
                _ => tail.strip_prefix(':')?.parse().ok()?,
            };
            return Some(Self::new(IpAddr::V6(ip), port));
        }

        let (host, port) = raw.rsplit_once(':')?;
        let ip: IpAddr = host.parse().ok()?;
        let port: u16 = port.parse().ok()?;
        Some(Self::new(ip, port))
    }
}

// ── Service alias config ───────────────────────────────────────────

/// Per-route configuration: one entry per distinct (host, path).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceAliasConfig {
    pub host: String,
    #[serde(default)]
    pub path: String,
    /// `None` when the route is served without TLS.
    #[serde(default)]
    pub tls_termination: Option<TlsTermination>,
    /// Certificate slots, keyed by host, `host_ca` and `host_pod`.
    #[serde(default)]
    pub certificates: BTreeMap<String, Certificate>,
}

impl ServiceAliasConfig {
    /// Build the alias config for a route.
    ///
    /// Certificate slots are only populated for modes that terminate at the
    /// proxy. Passthrough routes never carry material here, even if the
    /// route supplied some.
    pub fn from_route(route: &Route) -> Self {
        let mut config = Self {
            host: route.host.clone(),
            path: route.path.clone(),
            tls_termination: route.termination(),
            certificates: BTreeMap::new(),
        };

        let (Some(tls), Some(termination)) = (&route.tls, config.tls_termination) else {
            return config;
        };
        if !termination.terminates_at_edge() {
            return config;
        }

        config.certificates.insert(
            route.host.clone(),
            Certificate {
                id: route.host.clone(),
                contents: tls.certificate.clone(),
                private_key: tls.key.clone(),
                private_key_password: tls.key_pass_phrase.clone(),
            },
        );

        if !tls.ca_certificate.is_empty() {
            let id = ca_cert_key(&route.host);
            config
                .certificates
                .insert(id.clone(), Certificate::public(id, tls.ca_certificate.clone()));
        }

        if termination == TlsTermination::Reencrypt && !tls.destination_ca_certificate.is_empty() {
            let id = dest_cert_key(&route.host);
            config.certificates.insert(
                id.clone(),
                Certificate::public(id, tls.destination_ca_certificate.clone()),
            );
        }

        config
    }

    pub fn key(&self) -> String {
        route_key(&self.host, &self.path)
    }

    /// The certificate served to clients for this route.
    pub fn primary_certificate(&self) -> Option<&Certificate> {
        self.certificates.get(&self.host)
    }

    pub fn ca_certificate(&self) -> Option<&Certificate> {
        self.certificates.get(&ca_cert_key(&self.host))
    }

    pub fn destination_certificate(&self) -> Option<&Certificate> {
        self.certificates.get(&dest_cert_key(&self.host))
    }
}

// ── Certificate ────────────────────────────────────────────────────

/// PEM material stored in one certificate slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: String,
    /// Public certificate (PEM).
    #[serde(default)]
    pub contents: String,
    /// Private key (PEM); empty for CA slots.
    #[serde(default)]
    pub private_key: String,
    /// Not consumed by any template yet.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub private_key_password: String,
}

impl Certificate {
    /// A slot that carries only public material.
    pub fn public(id: String, contents: String) -> Self {
        Self {
            id,
            contents,
            ..Default::default()
        }
    }
}
