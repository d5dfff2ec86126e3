//! Error types for rewrite-relay

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to fetch URL: {url}")]
    FetchError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Stopped after {hops} redirects starting from: {url}")]
    TooManyRedirects { url: String, hops: usize },

    #[error("Login via {login_url} failed")]
    AuthError {
        login_url: String,
        #[source]
        source: Box<RelayError>,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid XPath expression `{expression}`: {reason}")]
    XPathError { expression: String, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RelayError {
    /// Whether the failure was caused by the caller's input rather than the upstream site.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidUrl(_))
    }

    /// Whether the failure happened while talking to an upstream server.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            Self::FetchError { .. } | Self::TooManyRedirects { .. } | Self::AuthError { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
