//! Rewrite Relay - an authenticating, content-rewriting HTTP relay
//!
//! Given a target URL, the relay fetches the page on the caller's behalf,
//! logs in first when the site reports the session as logged out, and then
//! reshapes the returned markup with per-site XPath rules:
//! - `strip` rules remove every selected subtree
//! - `move` rules relocate a subtree next to another node
//!
//! Sites are described in a JSON document keyed by hostname (see
//! [`config::parse_registry`]). Cookies are kept per origin in a
//! [`SessionStore`] shared by all requests.

pub mod auth;
pub mod config;
pub mod dom;
pub mod error;
pub mod fetcher;
pub mod relay;
pub mod server;
pub mod session;
pub mod site;

pub use auth::Authenticator;
pub use config::{load_registry, parse_registry, RelayConfig};
pub use dom::{Document, MoveRule, Position, XPath};
pub use error::{RelayError, Result};
pub use fetcher::{FetchRequest, FetchResponse, Fetcher, FetcherConfig};
pub use relay::Relay;
pub use session::{Origin, SessionStore};
pub use site::{CredentialValue, SiteDescriptor, SiteRegistry};

use std::sync::Arc;

/// Build a relay from configuration: load the websites document and set up
/// a fresh session store and fetcher.
///
/// # Example
/// ```ignore
/// use rewrite_relay::{build_relay, RelayConfig};
///
/// #[tokio::main]
/// async fn main() -> rewrite_relay::Result<()> {
///     let relay = build_relay(&RelayConfig::builder().sites_path("websites_config.json").build())?;
///     let page = relay.fetch_and_transform("https://example.com/account").await?;
///     println!("{}", String::from_utf8_lossy(&page));
///     Ok(())
/// }
/// ```
pub fn build_relay(config: &RelayConfig) -> Result<Relay> {
    let registry = load_registry(&config.sites_path)?;
    let session = Arc::new(SessionStore::new());
    let fetcher = Fetcher::with_config(config.fetcher.clone(), session)?;
    Ok(Relay::new(registry, fetcher))
}
