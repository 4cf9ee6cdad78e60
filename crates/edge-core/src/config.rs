//! Router configuration (`edgeplane.toml`).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_STATE_FILE: &str = "/var/lib/containers/router/routes.json";
pub const DEFAULT_CERT_DIR: &str = "/var/lib/containers/router/certs";
pub const DEFAULT_CA_CERT_DIR: &str = "/var/lib/containers/router/cacerts";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub router: RouterSection,
    #[serde(default)]
    pub certificates: CertificatesSection,
    #[serde(default)]
    pub templates: Vec<TemplateConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSection {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Command that makes the proxy adopt newly rendered configuration.
    #[serde(default)]
    pub reload_script: PathBuf,
    /// Upper bound on a single reload, e.g. `"30s"`. Unset waits forever.
    pub reload_timeout: Option<String>,
    /// Re-run route validation before applying Route events.
    #[serde(default)]
    pub validate_routes: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificatesSection {
    #[serde(default = "default_cert_dir")]
    pub cert_dir: PathBuf,
    #[serde(default = "default_ca_cert_dir")]
    pub ca_cert_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub name: String,
    /// Template source file.
    pub source: PathBuf,
    /// Where the rendered output is written.
    pub output: PathBuf,
}

fn default_state_file() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_FILE)
}

fn default_cert_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CERT_DIR)
}

fn default_ca_cert_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CA_CERT_DIR)
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            reload_script: PathBuf::new(),
            reload_timeout: None,
            validate_routes: false,
        }
    }
}

impl Default for CertificatesSection {
    fn default() -> Self {
        Self {
            cert_dir: default_cert_dir(),
            ca_cert_dir: default_ca_cert_dir(),
        }
    }
}

impl RouterConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: RouterConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Semantic checks that serde cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.router.reload_script.as_os_str().is_empty() {
            bail!("router.reload_script must be specified");
        }
        if self.templates.is_empty() {
            bail!("at least one [[templates]] entry must be specified");
        }

        let mut names = HashSet::new();
        for template in &self.templates {
            if template.name.is_empty() {
                bail!("template name must not be empty");
            }
            if !names.insert(template.name.as_str()) {
                bail!("duplicate template name: {}", template.name);
            }
        }

        if self.reload_timeout()? == Some(Duration::ZERO) {
            bail!("router.reload_timeout must be greater than zero");
        }
        Ok(())
    }

    /// Parsed `router.reload_timeout`.
    pub fn reload_timeout(&self) -> anyhow::Result<Option<Duration>> {
        match &self.router.reload_timeout {
            None => Ok(None),
            Some(raw) => parse_duration(raw)
                .map(Some)
                .with_context(|| format!("invalid router.reload_timeout: {raw:?}")),
        }
    }
}

/// Parse `500ms`, `30s`, `2m`, or a bare number of seconds.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let duration = if let Some(ms) = s.strip_suffix("ms") {
        Duration::from_millis(ms.parse()?)
    } else if let Some(secs) = s.strip_suffix('s') {
        Duration::from_secs(secs.parse()?)
    } else if let Some(mins) = s.strip_suffix('m') {
        let secs = mins
            .parse::<u64>()?
            .checked_mul(60)
            .with_context(|| format!("duration out of range: {s:?}"))?;
        Duration::from_secs(secs)
    } else {
        Duration::from_secs(s.parse()?)
    };
    Ok(duration)
}
