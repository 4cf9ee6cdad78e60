//! Template router error types.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the commit pipeline and the plugin built on it.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("state store error: {0}")]
    State(#[from] edgeplane_state::StateError),

    #[error("failed to write certificate {path}: {source}")]
    CertificateWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove certificate {path}: {source}")]
    CertificateRemove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read template {path}: {source}")]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template {name} is invalid: {source}")]
    TemplateSyntax {
        name: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("failed to render template {name}: {source}")]
    Render {
        name: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("failed to write config {path}: {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run reload script {path}: {source}")]
    ReloadSpawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reload script exited with {status}: {output}")]
    Reload { status: ExitStatus, output: String },

    #[error("reload script did not finish within {timeout:?}")]
    ReloadTimeout { timeout: Duration },
}

pub type RouterResult<T> = Result<T, RouterError>;
