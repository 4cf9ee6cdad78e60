//! edgeplane-state: the router's system of record.
//!
//! Holds one [`ServiceUnit`] per backing service, keyed by the service's
//! internal identifier, and persists the whole mapping as a single pretty
//! printed JSON document that is overwritten on every commit.
//!
//! # Architecture
//!
//! All mutation goes through [`StateStore`] methods. Lookups of absent
//! units or route keys are no-ops, never errors; callers create the unit
//! first (see `ensure_service_unit` in the template router).
//!
//! Service units are kept in a `BTreeMap` so the persisted document and
//! anything rendered from it are byte-for-byte stable for a given state.

pub mod error;
pub mod store;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
