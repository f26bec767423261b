//! Gateway configuration
//!
//! Built once at start-up from defaults, an optional YAML file and the
//! process environment, then shared read-only for the life of the process.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_BACKEND_HOST: &str = "http://backend:8000";
pub const DEFAULT_AGENTS_PROXY: &str = "http://agents-proxy.agents.svc.cluster.local:80";
pub const DEFAULT_API_PREFIX: &str = "/api";
pub const DEFAULT_AGENT_PREFIX: &str = "/agent";
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Resolved gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub upstreams: UpstreamConfig,
    pub routes: RoutesConfig,
    pub forwarding: ForwardingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
}

/// Upstream origins, validated at load time.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub backend_host: Url,
    pub agents_proxy: Url,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutesConfig {
    pub api_prefix: String,
    pub agent_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Applied to both connect and idle reads.
    pub timeout_secs: u64,
    /// Adds X-Forwarded-* headers to upstream requests.
    pub forward_client_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            agent_prefix: DEFAULT_AGENT_PREFIX.to_string(),
        }
    }
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            forward_client_headers: true,
        }
    }
}

impl ForwardingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// On-disk YAML shape. Every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: ServerConfig,
    pub upstreams: FileUpstreams,
    pub routes: RoutesConfig,
    pub forwarding: ForwardingConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FileUpstreams {
    pub backend_host: String,
    pub agents_proxy: String,
}

impl Default for FileUpstreams {
    fn default() -> Self {
        Self {
            backend_host: DEFAULT_BACKEND_HOST.to_string(),
            agents_proxy: DEFAULT_AGENTS_PROXY.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `GATEWAY_CONFIG` (if set) and the environment.
    ///
    /// `LISTEN`, `BACKEND_HOST` and `AGENTS_PROXY` take precedence over the file.
    pub fn load() -> Result<Self> {
        let file = match std::env::var("GATEWAY_CONFIG") {
            Ok(path) => FileConfig::from_path(&path)?,
            Err(_) => FileConfig::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Parse a YAML document and apply no environment overrides.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: FileConfig = serde_yaml::from_str(yaml).context("Invalid gateway config")?;
        Self::resolve(file, |_| None)
    }

    /// Merge a file config with overrides looked up through `env`.
    pub fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let FileConfig {
            mut server,
            upstreams,
            routes,
            forwarding,
        } = file;

        if let Some(listen) = env("LISTEN") {
            server.listen_addr = listen;
        }
        let backend_host = env("BACKEND_HOST").unwrap_or(upstreams.backend_host);
        let agents_proxy = env("AGENTS_PROXY").unwrap_or(upstreams.agents_proxy);

        let upstreams = UpstreamConfig {
            backend_host: parse_origin("BACKEND_HOST", &backend_host)?,
            agents_proxy: parse_origin("AGENTS_PROXY", &agents_proxy)?,
        };

        for prefix in [&routes.api_prefix, &routes.agent_prefix] {
            if !prefix.starts_with('/') {
                anyhow::bail!("Route prefix must start with '/': {}", prefix);
            }
        }
        if routes.api_prefix == routes.agent_prefix {
            anyhow::bail!("Route prefixes must differ: {}", routes.api_prefix);
        }

        Ok(Self {
            server,
            upstreams,
            routes,
            forwarding,
        })
    }
}

impl FileConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("Invalid gateway config in {}", path.display()))
    }
}

fn parse_origin(name: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value).with_context(|| format!("{} is not a valid URL: {}", name, value))?;
    if url.scheme() != "http" {
        anyhow::bail!("{} must use http, got {}", name, url.scheme());
    }
    if url.host_str().is_none() {
        anyhow::bail!("{} is missing a host: {}", name, value);
    }
    Ok(url)
}
