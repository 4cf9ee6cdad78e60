//! StateStore: the router state engine.
//!
//! Owns the in-memory mapping from service unit id to [`ServiceUnit`] and
//! its persisted copy. The store is single-writer: callers that dispatch
//! events concurrently must serialize access around both mutation and
//! commit.

use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use edge_core::Route;

use crate::error::{StateError, StateResult};
use crate::types::*;

/// Service unit mapping plus the file it is persisted to.
#[derive(Debug, Default)]
pub struct StateStore {
    units: BTreeMap<ServiceUnitId, ServiceUnit>,
    path: Option<PathBuf>,
}

impl StateStore {
    /// Open the store persisted at `path`.
    ///
    /// A missing or malformed file yields an empty store; only an
    /// unreadable file is an error.
    pub fn open(path: &Path) -> StateResult<Self> {
        let units = match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(units) => units,
                Err(e) => {
                    warn!(?path, error = %e, "state file is malformed, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(?path, "no state file, starting empty");
                BTreeMap::new()
            }
            Err(source) => {
                return Err(StateError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        debug!(?path, units = units.len(), "state store opened");
        Ok(Self {
            units,
            path: Some(path.to_path_buf()),
        })
    }

    /// Create a store that is never written to disk (for testing).
    pub fn open_in_memory() -> Self {
        Self::default()
    }

    /// Path of the persisted document, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Overwrite the persisted document with the full current mapping.
    pub fn persist(&self) -> StateResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let data = serde_json::to_vec_pretty(&self.units)?;
        write_atomic(path, &data).map_err(|source| StateError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(?path, units = self.units.len(), bytes = data.len(), "state persisted");
        Ok(())
    }

    /// The full mapping, in key order.
    pub fn service_units(&self) -> &BTreeMap<ServiceUnitId, ServiceUnit> {
        &self.units
    }

    // ── Service units ──────────────────────────────────────────────

    /// Insert an empty unit unless one already exists.
    pub fn create_service_unit(&mut self, id: &str) {
        self.units.entry(id.to_string()).or_insert_with(|| {
            debug!(service = %id, "service unit created");
            ServiceUnit::new(id)
        });
    }

    pub fn find_service_unit(&self, id: &str) -> Option<&ServiceUnit> {
        self.units.get(id)
    }

    /// Remove a unit entirely, returning it if it existed.
    pub fn delete_service_unit(&mut self, id: &str) -> Option<ServiceUnit> {
        let removed = self.units.remove(id);
        debug!(service = %id, existed = removed.is_some(), "service unit deleted");
        removed
    }

    // ── Endpoints ──────────────────────────────────────────────────

    /// Reset a unit's endpoint table to empty.
    pub fn delete_endpoints(&mut self, id: &str) {
        if let Some(unit) = self.units.get_mut(id) {
            unit.endpoint_table.clear();
        }
    }

    /// Add endpoints whose id is not already present; existing ids are
    /// left untouched.
    pub fn add_endpoints(&mut self, id: &str, endpoints: Vec<Endpoint>) {
        let Some(unit) = self.units.get_mut(id) else {
            return;
        };
        for endpoint in endpoints {
            unit.endpoint_table
                .entry(endpoint.id.clone())
                .or_insert(endpoint);
        }
        debug!(service = %id, endpoints = unit.endpoint_table.len(), "endpoints added");
    }

    // ── Routes ─────────────────────────────────────────────────────

    /// Create or replace the alias config for `route`.
    ///
    /// Returns the config that was replaced, if any.
    pub fn add_route(&mut self, id: &str, route: &Route) -> Option<ServiceAliasConfig> {
        let unit = self.units.get_mut(id)?;
        let config = ServiceAliasConfig::from_route(route);
        let key = config.key();
        debug!(
            service = %id,
            route = %key,
            termination = ?config.tls_termination,
            certificates = config.certificates.len(),
            "route added"
        );
        unit.service_alias_configs.insert(key, config)
    }

    /// Remove the alias config for `route`, returning it if it existed.
    pub fn remove_route(&mut self, id: &str, route: &Route) -> Option<ServiceAliasConfig> {
        let unit = self.units.get_mut(id)?;
        let key = route_key(&route.host, &route.path);
        let removed = unit.service_alias_configs.remove(&key);
        debug!(service = %id, route = %key, existed = removed.is_some(), "route removed");
        removed
    }
}

/// Write `data` next to `path` and rename it into place.
///
/// The document carries private keys, so on unix it is only readable by
/// the owner.
fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        // A leftover temp file keeps its old mode; `mode` only applies on create.
        if let Ok(meta) = std::fs::metadata(&tmp) {
            if meta.permissions().mode() & 0o077 != 0 {
                std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
            }
        }
    }

    let mut file = options.open(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&tmp, path)
}
