//! Relay configuration and the websites document loader

use crate::dom::transform::{MoveRule, Position};
use crate::error::{RelayError, Result};
use crate::fetcher::FetcherConfig;
use crate::site::{compile_selector, CredentialValue, SiteDescriptor, SiteRegistry};
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Default location of the websites document
pub const DEFAULT_SITES_PATH: &str = "websites_config.json";

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the HTTP server binds to
    pub bind_addr: SocketAddr,

    /// Path of the websites document
    pub sites_path: PathBuf,

    /// Upper bound on one relayed request, login included
    pub request_deadline: Duration,

    /// Upstream client settings
    pub fetcher: FetcherConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            sites_path: PathBuf::from(DEFAULT_SITES_PATH),
            request_deadline: Duration::from_secs(60),
            fetcher: FetcherConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Create a new config builder
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::default()
    }
}

/// Builder for RelayConfig
#[derive(Default)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    /// Set bind address
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set websites document path
    pub fn sites_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.sites_path = path.into();
        self
    }

    /// Set per-request deadline
    pub fn request_deadline(mut self, duration: Duration) -> Self {
        self.config.request_deadline = duration;
        self
    }

    /// Set per-request deadline in seconds
    pub fn request_deadline_secs(mut self, secs: u64) -> Self {
        self.config.request_deadline = Duration::from_secs(secs);
        self
    }

    /// Set upstream request timeout
    pub fn upstream_timeout(mut self, duration: Duration) -> Self {
        self.config.fetcher.request_timeout = duration;
        self
    }

    /// Set the User-Agent sent upstream
    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.config.fetcher.user_agent = user_agent.to_string();
        self
    }

    /// Set redirect limit
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.fetcher.max_redirects = max;
        self
    }

    /// Build the config
    pub fn build(self) -> RelayConfig {
        self.config
    }
}

#[derive(Debug, Deserialize)]
struct WebsitesDocument {
    websites: HashMap<String, WebsiteEntry>,
}

#[derive(Debug, Deserialize)]
struct WebsiteEntry {
    login_url: String,
    #[serde(default)]
    login: BTreeMap<String, String>,
    #[serde(default)]
    not_logged_in: String,
    #[serde(default)]
    strip: Vec<String>,
    #[serde(default, rename = "move")]
    moves: Vec<Vec<String>>,
}

/// Read, interpolate and compile the websites document at `path`.
pub fn load_registry(path: &Path) -> Result<SiteRegistry> {
    info!("Loading site configuration from {}", path.display());
    let raw = std::fs::read_to_string(path).map_err(|e| {
        RelayError::ConfigError(format!("cannot read {}: {}", path.display(), e))
    })?;
    let interpolated = interpolate_env(&raw, |name| std::env::var(name).ok());
    let registry = parse_registry(&interpolated)?;
    info!("Loaded {} site descriptors", registry.len());
    Ok(registry)
}

/// Replace every `$NAME$` with the value `lookup` returns for `NAME`.
///
/// Unknown variables become empty strings.
pub fn interpolate_env(raw: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    static VAR_RE: OnceLock<Regex> = OnceLock::new();
    let re = VAR_RE.get_or_init(|| Regex::new(r"\$([^\s$]+)\$").expect("invalid env var regex"));

    re.replace_all(raw, |captures: &Captures| {
        let name = &captures[1];
        lookup(name).unwrap_or_else(|| {
            warn!("Environment variable {} is not set; substituting an empty string", name);
            String::new()
        })
    })
    .into_owned()
}

/// Parse an already interpolated websites document.
pub fn parse_registry(json: &str) -> Result<SiteRegistry> {
    let document: WebsitesDocument = serde_json::from_str(json)
        .map_err(|e| RelayError::ConfigError(format!("malformed websites document: {e}")))?;

    let mut sites = Vec::with_capacity(document.websites.len());
    for (hostname, entry) in document.websites {
        let site = build_descriptor(&hostname, entry)
            .map_err(|e| RelayError::ConfigError(format!("site `{hostname}`: {e}")))?;
        sites.push(site);
    }
    Ok(SiteRegistry::new(sites))
}

fn build_descriptor(hostname: &str, entry: WebsiteEntry) -> Result<SiteDescriptor> {
    let login_url = Url::parse(&entry.login_url)
        .map_err(|e| RelayError::InvalidUrl(format!("{} ({})", entry.login_url, e)))?;

    let credentials = entry
        .login
        .iter()
        .map(|(field, value)| Ok((field.clone(), CredentialValue::parse(value)?)))
        .collect::<Result<BTreeMap<_, _>>>()?;

    let login_probe = if entry.not_logged_in.trim().is_empty() {
        None
    } else {
        Some(compile_selector(&entry.not_logged_in)?)
    };

    let strip_rules = entry
        .strip
        .iter()
        .map(|selector| compile_selector(selector))
        .collect::<Result<Vec<_>>>()?;

    let move_rules = entry
        .moves
        .iter()
        .map(|parts| parse_move_rule(parts))
        .collect::<Result<Vec<_>>>()?;

    Ok(SiteDescriptor {
        hostname: hostname.to_string(),
        login_url,
        credentials,
        login_probe,
        strip_rules,
        move_rules,
    })
}

/// `[source, destination]` or `[source, destination, position]`.
fn parse_move_rule(parts: &[String]) -> Result<MoveRule> {
    let (source, destination, position) = match parts {
        [source, destination] => (source, destination, Position::default()),
        [source, destination, position] => (source, destination, position.parse()?),
        _ => {
            return Err(RelayError::ConfigError(format!(
                "move rule needs 2 or 3 entries, got {}",
                parts.len()
            )))
        }
    };

    Ok(MoveRule {
        source: compile_selector(source)?,
        destination: compile_selector(destination)?,
        position,
    })
}
