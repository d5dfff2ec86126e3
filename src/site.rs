//! Site descriptors and the registry that maps hostnames to them

use crate::dom::transform::MoveRule;
use crate::dom::xpath::XPath;
use crate::error::Result;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use url::Url;

/// Pull the expression out of an `xpath(...)` marker.
pub fn unwrap_xpath_marker(raw: &str) -> Option<&str> {
    static MARKER_RE: OnceLock<Regex> = OnceLock::new();
    let re = MARKER_RE.get_or_init(|| {
        Regex::new(r"(?s)^\s*xpath\((.*)\)\s*$").expect("invalid xpath marker regex")
    });
    re.captures(raw)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

/// Compile a selector written either as `xpath(<expr>)` or as a bare expression.
pub fn compile_selector(raw: &str) -> Result<XPath> {
    XPath::compile(unwrap_xpath_marker(raw).unwrap_or(raw).trim())
}

/// A credential form field: a fixed value, or a query against the login page.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialValue {
    Literal(String),
    Query {
        /// The value as written, sent verbatim when the query finds nothing.
        raw: String,
        xpath: XPath,
    },
}

impl CredentialValue {
    /// Decide between literal and query from the `xpath(...)` marker.
    pub fn parse(raw: &str) -> Result<Self> {
        match unwrap_xpath_marker(raw) {
            Some(expression) => Ok(CredentialValue::Query {
                raw: raw.to_string(),
                xpath: XPath::compile(expression.trim())?,
            }),
            None => Ok(CredentialValue::Literal(raw.to_string())),
        }
    }

    pub fn is_query(&self) -> bool {
        matches!(self, CredentialValue::Query { .. })
    }
}

/// Login and rewrite behavior for one website.
#[derive(Debug, Clone)]
pub struct SiteDescriptor {
    pub hostname: String,
    pub login_url: Url,
    /// Form fields in submission order.
    pub credentials: BTreeMap<String, CredentialValue>,
    /// Selector whose presence means "logged out". `None` means always log in.
    pub login_probe: Option<XPath>,
    pub strip_rules: Vec<XPath>,
    pub move_rules: Vec<MoveRule>,
}

impl SiteDescriptor {
    pub fn has_rules(&self) -> bool {
        !self.strip_rules.is_empty() || !self.move_rules.is_empty()
    }
}

/// Read-only hostname → descriptor map.
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    sites: HashMap<String, Arc<SiteDescriptor>>,
}

impl SiteRegistry {
    pub fn new(sites: impl IntoIterator<Item = SiteDescriptor>) -> Self {
        Self {
            sites: sites
                .into_iter()
                .map(|site| (site.hostname.to_ascii_lowercase(), Arc::new(site)))
                .collect(),
        }
    }

    pub fn lookup(&self, hostname: &str) -> Option<&SiteDescriptor> {
        self.sites
            .get(&hostname.to_ascii_lowercase())
            .map(|site| site.as_ref())
    }

    /// Configured hostnames, sorted.
    pub fn hostnames(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sites.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(hostname: &str) -> SiteDescriptor {
        SiteDescriptor {
            hostname: hostname.to_string(),
            login_url: Url::parse("https://example.com/login").unwrap(),
            credentials: BTreeMap::new(),
            login_probe: None,
            strip_rules: Vec::new(),
            move_rules: Vec::new(),
        }
    }

    #[test]
    fn unwraps_the_marker() {
        assert_eq!(unwrap_xpath_marker("xpath(//a[@x='(y)'])"), Some("//a[@x='(y)']"));
        assert_eq!(unwrap_xpath_marker("hunter2"), None);
        assert_eq!(unwrap_xpath_marker("myxpath(//a)"), None);
    }

    #[test]
    fn credential_values_are_classified_at_parse_time() {
        assert_eq!(
            CredentialValue::parse("alice").unwrap(),
            CredentialValue::Literal("alice".to_string())
        );
        let query = CredentialValue::parse("xpath(//input[@name='csrf']/@value)").unwrap();
        assert!(query.is_query());
        let CredentialValue::Query { raw, xpath } = query else {
            unreachable!()
        };
        assert_eq!(raw, "xpath(//input[@name='csrf']/@value)");
        assert_eq!(xpath.as_str(), "//input[@name='csrf']/@value");
    }

    #[test]
    fn invalid_credential_query_is_rejected() {
        assert!(CredentialValue::parse("xpath(//input[)").is_err());
    }

    #[test]
    fn selectors_accept_marker_or_bare_form() {
        assert_eq!(compile_selector("xpath(//nav)").unwrap().as_str(), "//nav");
        assert_eq!(compile_selector(" //nav ").unwrap().as_str(), "//nav");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = SiteRegistry::new([site("Example.com"), site("other.org")]);
        assert!(registry.lookup("example.com").is_some());
        assert!(registry.lookup("EXAMPLE.COM").is_some());
        assert!(registry.lookup("missing.net").is_none());
        assert_eq!(registry.hostnames(), vec!["example.com", "other.org"]);
        assert_eq!(registry.len(), 2);
    }
}
