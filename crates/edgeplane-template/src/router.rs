//! Template router: the commit pipeline.
//!
//! `TemplateRouter` bridges the state store to the proxy: every commit
//! rewrites the persisted state, all certificate files and all rendered
//! configuration, then runs the reload script. Nothing is incremental; the
//! files produced depend only on the current state.

use std::time::Instant;

use tracing::{debug, error, info};

use edge_core::{Route, RouterConfig};
use edgeplane_state::{Endpoint, ServiceAliasConfig, ServiceUnit, StateStore};

use crate::certs::CertManager;
use crate::error::RouterResult;
use crate::plugin::Router;
use crate::reload::ReloadScript;
use crate::render::TemplateSet;

/// Counts from one successful commit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommitStats {
    pub service_units: usize,
    pub routes: usize,
    /// Certificate files written.
    pub certificates: usize,
    /// Templates rendered.
    pub templates: usize,
}

/// Router that renders proxy configuration from templates.
pub struct TemplateRouter {
    store: StateStore,
    templates: TemplateSet,
    certs: CertManager,
    reload: ReloadScript,
    /// Configs removed or replaced since the last commit whose certificate
    /// files may still be on disk.
    displaced: Vec<ServiceAliasConfig>,
}

impl TemplateRouter {
    /// Open the persisted state and compile the templates named in `config`.
    pub fn open(config: &RouterConfig, reload: ReloadScript) -> RouterResult<Self> {
        let store = StateStore::open(&config.router.state_file)?;
        let templates = TemplateSet::load(&config.templates)?;
        let certs = CertManager::new(&config.certificates.cert_dir, &config.certificates.ca_cert_dir);

        info!(
            state_file = ?config.router.state_file,
            service_units = store.service_units().len(),
            templates = templates.len(),
            reload = ?reload.path(),
            "template router initialized"
        );

        Ok(Self::from_parts(store, templates, certs, reload))
    }

    pub fn from_parts(
        store: StateStore,
        templates: TemplateSet,
        certs: CertManager,
        reload: ReloadScript,
    ) -> Self {
        Self {
            store,
            templates,
            certs,
            reload,
            displaced: Vec::new(),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn certs(&self) -> &CertManager {
        &self.certs
    }

    /// Number of configs waiting for their certificate files to be removed.
    pub fn pending_removals(&self) -> usize {
        self.displaced.len()
    }

    /// Persist, write certificates, render and reload.
    ///
    /// A failure before the reload step returns without reloading. A reload
    /// failure is returned after every file has been written; nothing is
    /// rolled back.
    pub fn commit(&mut self) -> RouterResult<CommitStats> {
        let started = Instant::now();

        let stats = self
            .materialize()
            .inspect_err(|e| error!(error = %e, "commit aborted before reload"))?;

        self.reload.run()?;

        info!(
            service_units = stats.service_units,
            routes = stats.routes,
            certificates = stats.certificates,
            templates = stats.templates,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "commit complete"
        );
        Ok(stats)
    }

    /// Steps 1 to 3 of a commit: everything up to the reload.
    fn materialize(&mut self) -> RouterResult<CommitStats> {
        self.store.persist()?;

        for config in &self.displaced {
            self.certs.delete_certificates_for_config(config)?;
        }

        let mut stats = CommitStats::default();
        for unit in self.store.service_units().values() {
            stats.service_units += 1;
            for config in unit.service_alias_configs.values() {
                stats.routes += 1;
                stats.certificates += self.certs.write_certificates_for_config(config)?;
            }
        }
        self.displaced.clear();

        stats.templates = self.templates.render_all(self.store.service_units(), &self.certs)?;
        Ok(stats)
    }

    fn displace(&mut self, config: ServiceAliasConfig) {
        debug!(route = %config.key(), "queued certificate removal");
        self.displaced.push(config);
    }
}

impl Router for TemplateRouter {
    fn create_service_unit(&mut self, id: &str) {
        self.store.create_service_unit(id);
    }

    fn find_service_unit(&self, id: &str) -> Option<&ServiceUnit> {
        self.store.find_service_unit(id)
    }

    fn delete_service_unit(&mut self, id: &str) {
        if let Some(unit) = self.store.delete_service_unit(id) {
            for config in unit.service_alias_configs.into_values() {
                self.displace(config);
            }
        }
    }

    fn add_endpoints(&mut self, id: &str, endpoints: Vec<Endpoint>) {
        self.store.add_endpoints(id, endpoints);
    }

    fn delete_endpoints(&mut self, id: &str) {
        self.store.delete_endpoints(id);
    }

    fn add_route(&mut self, id: &str, route: &Route) {
        if let Some(previous) = self.store.add_route(id, route) {
            self.displace(previous);
        }
    }

    fn remove_route(&mut self, id: &str, route: &Route) {
        if let Some(removed) = self.store.remove_route(id, route) {
            self.displace(removed);
        }
    }

    fn commit(&mut self) -> RouterResult<()> {
        TemplateRouter::commit(self).map(|_| ())
    }
}
