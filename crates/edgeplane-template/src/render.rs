//! Proxy configuration rendering.
//!
//! Templates are loaded once at startup and rendered on every commit
//! against the full service unit mapping. The context exposes:
//!
//! - `state`: map of service unit id to service unit
//! - `cert_dir`, `ca_cert_dir`: certificate directories
//!
//! and the `cert_file` filter, which maps a certificate slot key to the file
//! name the certificate manager writes it under.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use minijinja::{Environment, UndefinedBehavior, context};
use tracing::debug;

use edge_core::config::TemplateConfig;
use edgeplane_state::{ServiceUnit, ServiceUnitId};

use crate::certs::{CertManager, cert_file_name};
use crate::error::{RouterError, RouterResult};

#[derive(Debug, Clone)]
struct RenderTarget {
    name: String,
    output: PathBuf,
}

/// The compiled output templates, rendered in configuration order.
pub struct TemplateSet {
    env: Environment<'static>,
    targets: Vec<RenderTarget>,
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateSet {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_filter("cert_file", cert_file);
        Self {
            env,
            targets: Vec::new(),
        }
    }

    /// Read and compile every configured template.
    pub fn load(configs: &[TemplateConfig]) -> RouterResult<Self> {
        let mut set = Self::new();
        for config in configs {
            let source =
                std::fs::read_to_string(&config.source).map_err(|source| RouterError::TemplateRead {
                    path: config.source.clone(),
                    source,
                })?;
            set.add(&config.name, source, &config.output)?;
        }
        Ok(set)
    }

    /// Compile one template and register where its output goes.
    pub fn add(&mut self, name: &str, source: String, output: &Path) -> RouterResult<()> {
        self.env
            .add_template_owned(name.to_string(), source)
            .map_err(|source| RouterError::TemplateSyntax {
                name: name.to_string(),
                source,
            })?;
        self.targets.push(RenderTarget {
            name: name.to_string(),
            output: output.to_path_buf(),
        });
        debug!(template = %name, output = ?output, "template loaded");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Render one template to a string.
    pub fn render(
        &self,
        name: &str,
        units: &BTreeMap<ServiceUnitId, ServiceUnit>,
        certs: &CertManager,
    ) -> RouterResult<String> {
        let wrap = |source: minijinja::Error| RouterError::Render {
            name: name.to_string(),
            source,
        };
        let template = self.env.get_template(name).map_err(wrap)?;
        template
            .render(context! {
                state => units,
                cert_dir => certs.cert_dir().display().to_string(),
                ca_cert_dir => certs.ca_cert_dir().display().to_string(),
            })
            .map_err(wrap)
    }

    /// Render every template and write it to its output path.
    ///
    /// Each template is rendered fully before its file is touched, so a
    /// render error leaves that output as it was. Outputs written before the
    /// failing template keep their new content.
    pub fn render_all(
        &self,
        units: &BTreeMap<ServiceUnitId, ServiceUnit>,
        certs: &CertManager,
    ) -> RouterResult<usize> {
        for target in &self.targets {
            let rendered = self.render(&target.name, units, certs)?;
            write_output(&target.output, rendered.as_bytes())?;
            debug!(
                template = %target.name,
                output = ?target.output,
                bytes = rendered.len(),
                "config written"
            );
        }
        Ok(self.targets.len())
    }
}

fn cert_file(key: &str) -> String {
    cert_file_name(key)
}

fn write_output(path: &Path, data: &[u8]) -> RouterResult<()> {
    let wrap = |source: std::io::Error| RouterError::OutputWrite {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(wrap)?;
    }
    std::fs::write(path, data).map_err(wrap)
}
