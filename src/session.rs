//! Per-origin cookie store shared by every upstream request

use cookie::Cookie;
use dashmap::DashMap;
use reqwest::header::{HeaderMap, SET_COOKIE};
use std::fmt;
use time::OffsetDateTime;
use tracing::{debug, warn};
use url::Url;

/// Scheme, host and port of a URL; the scope of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin(String);

impl Origin {
    pub fn of(url: &Url) -> Self {
        Self(url.origin().ascii_serialization())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
struct StoredCookie {
    name: String,
    value: String,
    expires_at: Option<OffsetDateTime>,
}

impl StoredCookie {
    fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Cookie jar keyed by origin.
///
/// Each origin's cookies sit behind their own map entry; `record` holds that
/// entry's write lock for the whole merge, so concurrent responses from the
/// same origin never overwrite each other's cookies.
#[derive(Debug, Default)]
pub struct SessionStore {
    jars: DashMap<Origin, Vec<StoredCookie>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live cookies for an origin as `(name, value)` pairs, oldest first.
    pub fn cookies_for(&self, origin: &Origin) -> Vec<(String, String)> {
        let now = OffsetDateTime::now_utc();
        self.jars
            .get(origin)
            .map(|jar| {
                jar.iter()
                    .filter(|c| !c.is_expired(now))
                    .map(|c| (c.name.clone(), c.value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `Cookie` request header value for an origin, if it has any cookies.
    pub fn cookie_header(&self, origin: &Origin) -> Option<String> {
        let cookies = self.cookies_for(origin);
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Merge every `Set-Cookie` header of a response. Returns how many were accepted.
    pub fn record(&self, origin: &Origin, headers: &HeaderMap) -> usize {
        let lines: Vec<&str> = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| match value.to_str() {
                Ok(line) => Some(line),
                Err(_) => {
                    warn!("Ignoring non-ASCII Set-Cookie header from {}", origin);
                    None
                }
            })
            .collect();
        if lines.is_empty() {
            return 0;
        }
        self.record_lines(origin, &lines)
    }

    /// Merge raw `Set-Cookie` lines under a single lock of the origin's jar.
    pub fn record_lines(&self, origin: &Origin, lines: &[&str]) -> usize {
        let now = OffsetDateTime::now_utc();
        let mut jar = self.jars.entry(origin.clone()).or_default();
        let mut accepted = 0;

        for line in lines {
            let parsed = match Cookie::parse(*line) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("Failed to parse cookie from {}: {}", origin, e);
                    continue;
                }
            };

            // Max-Age wins over Expires.
            let expires_at = match parsed.max_age() {
                Some(max_age) => Some(now + max_age),
                None => parsed.expires_datetime(),
            };
            let cookie = StoredCookie {
                name: parsed.name().to_string(),
                value: parsed.value().to_string(),
                expires_at,
            };

            if cookie.is_expired(now) {
                debug!("Cookie {} deleted by {}", cookie.name, origin);
                jar.retain(|c| c.name != cookie.name);
            } else if let Some(existing) = jar.iter_mut().find(|c| c.name == cookie.name) {
                *existing = cookie;
            } else {
                jar.push(cookie);
            }
            accepted += 1;
        }

        jar.retain(|c| !c.is_expired(now));
        accepted
    }

    /// Number of live cookies across all origins.
    pub fn len(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        self.jars
            .iter()
            .map(|jar| jar.value().iter().filter(|c| !c.is_expired(now)).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
