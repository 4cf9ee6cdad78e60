//! Edgeplane template router: turns router state into proxy configuration.
//!
//! This crate provides the backend-agnostic template router and the plugin
//! that feeds it watch events.
//!
//! # Components
//!
//! - **`certs`**: Writes and removes per-route PEM files
//! - **`render`**: Renders the configured templates against the full state
//! - **`reload`**: Runs the external reload script
//! - **`router`**: The commit pipeline tying state, certs, templates and reload together
//! - **`plugin`**: Translates Route/Endpoints events into router calls

pub mod certs;
pub mod error;
pub mod plugin;
pub mod reload;
pub mod render;
pub mod router;

pub use certs::CertManager;
pub use error::{RouterError, RouterResult};
pub use plugin::{Router, TemplatePlugin};
pub use reload::{ReloadOutput, ReloadScript};
pub use render::TemplateSet;
pub use router::{CommitStats, TemplateRouter};
