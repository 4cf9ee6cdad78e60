//! Template plugin: translates watch events into router calls.
//!
//! Every event is applied to the router state and followed by a commit,
//! whatever its type. Events for a service that has no unit yet create one
//! first.

use tracing::{debug, warn};

use edge_core::{Endpoints, EventType, Plugin, Route, validate_route};
use edgeplane_state::{Endpoint, ServiceUnit};

use crate::error::{RouterError, RouterResult};

/// Operations the plugin needs from a router backend.
///
/// Mutations never fail: an unknown unit id is a no-op, and the plugin
/// always creates the unit before mutating it. Only `commit` can fail.
pub trait Router {
    fn create_service_unit(&mut self, id: &str);
    fn find_service_unit(&self, id: &str) -> Option<&ServiceUnit>;
    fn delete_service_unit(&mut self, id: &str);

    fn add_endpoints(&mut self, id: &str, endpoints: Vec<Endpoint>);
    fn delete_endpoints(&mut self, id: &str);

    fn add_route(&mut self, id: &str, route: &Route);
    fn remove_route(&mut self, id: &str, route: &Route);

    /// Persist state and push it to the proxy.
    fn commit(&mut self) -> RouterResult<()>;

    /// Get-or-create accessor used by every event handler.
    fn ensure_service_unit(&mut self, id: &str) {
        if self.find_service_unit(id).is_none() {
            debug!(service = %id, "creating service unit");
            self.create_service_unit(id);
        }
    }
}

/// Plugin backed by a template router.
pub struct TemplatePlugin<R> {
    router: R,
    validate_routes: bool,
}

impl<R: Router> TemplatePlugin<R> {
    pub fn new(router: R) -> Self {
        Self {
            router,
            validate_routes: false,
        }
    }

    /// Re-check routes before applying them; invalid ones are skipped.
    pub fn with_route_validation(mut self, enabled: bool) -> Self {
        self.validate_routes = enabled;
        self
    }

    pub fn router(&self) -> &R {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut R {
        &mut self.router
    }

    pub fn into_router(self) -> R {
        self.router
    }

    fn route_is_acceptable(&self, route: &Route) -> bool {
        if !self.validate_routes {
            return true;
        }
        let errors = validate_route(route);
        if errors.is_empty() {
            return true;
        }
        let reasons: Vec<String> = errors.iter().map(ToString::to_string).collect();
        warn!(
            host = %route.host,
            service = %route.service_name,
            errors = %reasons.join("; "),
            "skipping invalid route"
        );
        false
    }
}

impl<R: Router> Plugin for TemplatePlugin<R> {
    type Error = RouterError;

    fn handle_endpoints(&mut self, event_type: EventType, endpoints: &Endpoints) -> RouterResult<()> {
        let key = endpoints.service_key();
        debug!(
            service = %key,
            event = %event_type,
            count = endpoints.endpoints.len(),
            "processing endpoints"
        );

        self.router.ensure_service_unit(&key);

        // The event carries the full list; start from empty every time.
        self.router.delete_endpoints(&key);

        match event_type {
            EventType::Added | EventType::Modified => {
                let parsed = router_endpoints(endpoints);
                debug!(service = %key, endpoints = parsed.len(), "replacing endpoints");
                self.router.add_endpoints(&key, parsed);
            }
            // The unit stays, with an empty endpoint table.
            EventType::Deleted => {}
        }

        self.router.commit()
    }

    fn handle_route(&mut self, event_type: EventType, route: &Route) -> RouterResult<()> {
        let key = route.service_key();
        debug!(service = %key, host = %route.host, path = %route.path, event = %event_type, "processing route");

        self.router.ensure_service_unit(&key);

        match event_type {
            EventType::Added | EventType::Modified => {
                if self.route_is_acceptable(route) {
                    self.router.add_route(&key, route);
                }
            }
            EventType::Deleted => self.router.remove_route(&key, route),
        }

        self.router.commit()
    }
}

/// Parse the raw endpoint strings, skipping the ones that do not parse.
fn router_endpoints(endpoints: &Endpoints) -> Vec<Endpoint> {
    endpoints
        .endpoints
        .iter()
        .filter_map(|raw| {
            let parsed = Endpoint::parse(raw);
            if parsed.is_none() {
                warn!(
                    service = %endpoints.metadata.name,
                    endpoint = %raw,
                    "unable to convert to endpoint, skipping"
                );
            }
            parsed
        })
        .collect()
}
