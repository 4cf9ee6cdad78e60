pub mod api;
pub mod config;
pub mod plugin;
pub mod validation;

pub use api::*;
pub use config::RouterConfig;
pub use plugin::Plugin;
pub use validation::{ValidationError, validate_route};
