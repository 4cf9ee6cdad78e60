//! The contract every router backend implements.

use crate::api::{Endpoints, EventType, Route};

/// Receives watch events, one at a time, from the dispatch loop.
///
/// Each call carries the full current object rather than a diff. Errors are
/// returned to the dispatch loop, which decides whether to log or retry;
/// implementations do not retry internally.
pub trait Plugin {
    type Error: std::error::Error + Send + Sync + 'static;

    fn handle_endpoints(
        &mut self,
        event_type: EventType,
        endpoints: &Endpoints,
    ) -> Result<(), Self::Error>;

    fn handle_route(&mut self, event_type: EventType, route: &Route) -> Result<(), Self::Error>;
}
