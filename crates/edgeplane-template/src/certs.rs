//! Certificate material on disk.
//!
//! Edge and reencrypt routes need their key and certificate as one PEM
//! file the proxy can load directly. Reencrypt routes additionally need the
//! destination trust anchor in a separate directory.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use edgeplane_state::{ServiceAliasConfig, dest_cert_key};

use crate::error::{RouterError, RouterResult};

const DIGEST_SUFFIX_LEN: usize = 8;

/// Writes and removes the certificate files of service alias configs.
#[derive(Debug, Clone)]
pub struct CertManager {
    cert_dir: PathBuf,
    ca_cert_dir: PathBuf,
}

impl CertManager {
    pub fn new(cert_dir: impl Into<PathBuf>, ca_cert_dir: impl Into<PathBuf>) -> Self {
        Self {
            cert_dir: cert_dir.into(),
            ca_cert_dir: ca_cert_dir.into(),
        }
    }

    pub fn cert_dir(&self) -> &Path {
        &self.cert_dir
    }

    pub fn ca_cert_dir(&self) -> &Path {
        &self.ca_cert_dir
    }

    /// Path of the combined PEM for `host`.
    pub fn primary_path(&self, host: &str) -> PathBuf {
        self.cert_dir.join(cert_file_name(host))
    }

    /// Path of the destination trust anchor for `host`.
    pub fn destination_path(&self, host: &str) -> PathBuf {
        self.ca_cert_dir.join(cert_file_name(&dest_cert_key(host)))
    }

    /// Write the certificate files for one config.
    ///
    /// The primary file holds the key, the certificate and the CA chain (if
    /// any), in that order. Returns the number of files written. Stops at
    /// the first failure.
    pub fn write_certificates_for_config(&self, config: &ServiceAliasConfig) -> RouterResult<usize> {
        let Some(termination) = config.tls_termination else {
            return Ok(0);
        };
        if !termination.terminates_at_edge() || config.certificates.is_empty() {
            return Ok(0);
        }

        let mut written = 0;

        if let Some(cert) = config.primary_certificate() {
            let mut pem = String::new();
            append_pem(&mut pem, &cert.private_key);
            append_pem(&mut pem, &cert.contents);
            if let Some(ca) = config.ca_certificate() {
                append_pem(&mut pem, &ca.contents);
            }
            write_file(&self.primary_path(&config.host), pem.as_bytes(), true)?;
            written += 1;
        }

        if let Some(dest) = config.destination_certificate() {
            write_file(&self.destination_path(&config.host), dest.contents.as_bytes(), false)?;
            written += 1;
        }

        debug!(host = %config.host, files = written, "certificates written");
        Ok(written)
    }

    /// Remove every certificate file that may exist for one config.
    ///
    /// Files that are already gone are not an error.
    pub fn delete_certificates_for_config(&self, config: &ServiceAliasConfig) -> RouterResult<usize> {
        let mut removed = 0;
        for path in [self.primary_path(&config.host), self.destination_path(&config.host)] {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(source) => return Err(RouterError::CertificateRemove { path, source }),
            }
        }
        if removed > 0 {
            debug!(host = %config.host, files = removed, "certificates removed");
        }
        Ok(removed)
    }
}

/// File name used for a certificate slot key.
///
/// Keeps `[A-Za-z0-9._*-]` and replaces everything else (including path
/// separators) with `_`. A key that had to be rewritten gets a short digest
/// of the original appended, so `a/b` and `a_b` do not share a file.
pub fn cert_file_name(key: &str) -> String {
    let mut name: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '*') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.starts_with('.') {
        name.replace_range(..1, "_");
    }
    if name != key {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        name.push('-');
        name.push_str(&digest[..DIGEST_SUFFIX_LEN]);
    }
    name.push_str(".pem");
    name
}

fn append_pem(buf: &mut String, part: &str) {
    if part.is_empty() {
        return;
    }
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str(part);
}

fn write_file(path: &Path, data: &[u8], private: bool) -> RouterResult<()> {
    let wrap = |source: std::io::Error| RouterError::CertificateWrite {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(wrap)?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(if private { 0o600 } else { 0o644 });
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options.open(path).map_err(wrap)?;
    file.write_all(data).map_err(wrap)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_core::{Route, TlsConfig, TlsTermination};

    fn config(termination: TlsTermination) -> ServiceAliasConfig {
        let route = Route {
            host: "www.example.com".to_string(),
            service_name: "svc".to_string(),
            tls: Some(TlsConfig {
                termination: Some(termination),
                certificate: "CERT\n".to_string(),
                key: "KEY".to_string(),
                ca_certificate: "CA\n".to_string(),
                destination_ca_certificate: "DEST\n".to_string(),
                key_pass_phrase: String::new(),
            }),
            ..Default::default()
        };
        ServiceAliasConfig::from_route(&route)
    }

    fn manager(dir: &Path) -> CertManager {
        CertManager::new(dir.join("certs"), dir.join("cacerts"))
    }

    #[test]
    fn edge_writes_combined_pem() {
        let dir = tempfile::tempdir().unwrap();
        let certs = manager(dir.path());

        let written = certs.write_certificates_for_config(&config(TlsTermination::Edge)).unwrap();
        assert_eq!(written, 1);

        let pem = std::fs::read_to_string(certs.primary_path("www.example.com")).unwrap();
        assert_eq!(pem, "KEY\nCERT\nCA\n");
        assert!(!certs.destination_path("www.example.com").exists());
    }

    #[test]
    fn reencrypt_writes_destination_separately() {
        let dir = tempfile::tempdir().unwrap();
        let certs = manager(dir.path());

        let written = certs
            .write_certificates_for_config(&config(TlsTermination::Reencrypt))
            .unwrap();
        assert_eq!(written, 2);

        let dest = certs.destination_path("www.example.com");
        assert_eq!(dest, dir.path().join("cacerts").join("www.example.com_pod.pem"));
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "DEST\n");
    }

    #[test]
    fn passthrough_and_insecure_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let certs = manager(dir.path());

        let mut cfg = config(TlsTermination::Edge);
        cfg.tls_termination = None;
        assert_eq!(certs.write_certificates_for_config(&cfg).unwrap(), 0);
        assert_eq!(
            certs
                .write_certificates_for_config(&config(TlsTermination::Passthrough))
                .unwrap(),
            0
        );
        assert!(!dir.path().join("certs").exists());
    }

    #[cfg(unix)]
    #[test]
    fn primary_pem_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let certs = manager(dir.path());
        certs.write_certificates_for_config(&config(TlsTermination::Edge)).unwrap();

        let mode = std::fs::metadata(certs.primary_path("www.example.com"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn delete_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let certs = manager(dir.path());
        let cfg = config(TlsTermination::Reencrypt);
        certs.write_certificates_for_config(&cfg).unwrap();

        assert_eq!(certs.delete_certificates_for_config(&cfg).unwrap(), 2);
        assert!(!certs.primary_path("www.example.com").exists());
        assert!(!certs.destination_path("www.example.com").exists());

        // Second delete finds nothing and still succeeds.
        assert_eq!(certs.delete_certificates_for_config(&cfg).unwrap(), 0);
    }

    #[test]
    fn write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the certificate directory should be.
        let blocker = dir.path().join("certs");
        std::fs::write(&blocker, b"").unwrap();
        let certs = CertManager::new(&blocker, dir.path().join("cacerts"));

        let err = certs
            .write_certificates_for_config(&config(TlsTermination::Edge))
            .unwrap_err();
        assert!(matches!(err, RouterError::CertificateWrite { .. }));
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(cert_file_name("www.example.com"), "www.example.com.pem");
        assert_eq!(cert_file_name("*.apps.example.com"), "*.apps.example.com.pem");
        assert_eq!(cert_file_name("host_pod"), "host_pod.pem");

        let escaped = cert_file_name("../etc/passwd");
        assert!(escaped.starts_with("_._etc_passwd-"));
        assert!(escaped.ends_with(".pem"));
        assert!(!escaped.contains('/'));
        assert_eq!(escaped.len(), "_._etc_passwd-".len() + 8 + ".pem".len());
    }

    #[test]
    fn rewritten_names_do_not_collide() {
        assert_eq!(cert_file_name("a_b"), "a_b.pem");
        let slashed = cert_file_name("a/b");
        assert_ne!(slashed, cert_file_name("a_b"));
        assert_ne!(slashed, cert_file_name("a:b"));
        // Stable across calls so delete finds what write created.
        assert_eq!(slashed, cert_file_name("a/b"));
    }

    #[test]
    fn colliding_hosts_keep_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let certs = manager(dir.path());
        let edge = |host: &str, key: &str| {
            ServiceAliasConfig::from_route(&Route {
                host: host.to_string(),
                service_name: "svc".to_string(),
                tls: Some(TlsConfig {
                    termination: Some(TlsTermination::Edge),
                    certificate: "CERT".to_string(),
                    key: key.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            })
        };

        certs.write_certificates_for_config(&edge("a/b", "KEY1")).unwrap();
        certs.write_certificates_for_config(&edge("a_b", "KEY2")).unwrap();

        assert_ne!(certs.primary_path("a/b"), certs.primary_path("a_b"));
        assert_eq!(std::fs::read_to_string(certs.primary_path("a/b")).unwrap(), "KEY1\nCERT");
        assert_eq!(std::fs::read_to_string(certs.primary_path("a_b")).unwrap(), "KEY2\nCERT");
    }
}
