//! Route validation.
//!
//! These are the checks the admission layer applies before a Route is
//! accepted. The router does not depend on them; the template plugin can
//! re-run them when `validate_routes` is enabled.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::api::{Route, TlsConfig, TlsTermination};

/// DNS-1123 subdomain, optionally with a leading wildcard label.
static HOST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\*\.)?[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("host pattern is valid")
});

const MAX_HOST_LEN: usize = 253;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0}: required value")]
    Required(&'static str),
    #[error("{field}: invalid value: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("{0}: not supported")]
    NotSupported(&'static str),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ValidationError {
    ValidationError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Validate a route, returning every problem found.
pub fn validate_route(route: &Route) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if route.host.is_empty() {
        errors.push(ValidationError::Required("host"));
    } else if route.host.len() > MAX_HOST_LEN || !HOST_RE.is_match(&route.host) {
        errors.push(invalid("host", "must be a DNS subdomain"));
    }

    if route.service_name.is_empty() {
        errors.push(ValidationError::Required("serviceName"));
    }

    if let Some(tls) = &route.tls {
        errors.extend(validate_tls(tls));
    }

    errors
}

fn validate_tls(tls: &TlsConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let Some(termination) = tls.termination else {
        return errors;
    };

    match termination {
        TlsTermination::Reencrypt => {
            if tls.destination_ca_certificate.is_empty() {
                errors.push(invalid(
                    "destinationCACertificate",
                    "reencrypt termination must specify a destination CA certificate",
                ));
            }
        }
        TlsTermination::Passthrough => {
            let fields = [
                ("certificate", &tls.certificate),
                ("key", &tls.key),
                ("caCertificate", &tls.ca_certificate),
                ("destinationCACertificate", &tls.destination_ca_certificate),
            ];
            for (field, value) in fields {
                if !value.is_empty() {
                    errors.push(invalid(
                        field,
                        "specifying certificates with passthrough termination is not valid",
                    ));
                }
            }
        }
        TlsTermination::Edge => {
            let required = [
                ("certificate", &tls.certificate),
                ("key", &tls.key),
                ("caCertificate", &tls.ca_certificate),
            ];
            for (field, value) in required {
                if value.is_empty() {
                    errors.push(invalid(field, format!("edge termination requires {field}")));
                }
            }
            if !tls.destination_ca_certificate.is_empty() {
                errors.push(invalid(
                    "destinationCACertificate",
                    "edge termination does not support destination certificates",
                ));
            }
        }
    }

    if !tls.key_pass_phrase.is_empty() {
        errors.push(ValidationError::NotSupported("keyPassPhrase"));
    }

    errors
}
