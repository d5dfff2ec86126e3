//! Login flow: credential resolution and form submission

use crate::dom::Document;
use crate::error::{RelayError, Result};
use crate::fetcher::{FetchRequest, Fetcher};
use crate::site::{CredentialValue, SiteDescriptor};
use tracing::{debug, info, warn};

/// Logs the shared session into a site
pub struct Authenticator<'a> {
    fetcher: &'a Fetcher,
}

impl<'a> Authenticator<'a> {
    pub fn new(fetcher: &'a Fetcher) -> Self {
        Self { fetcher }
    }

    /// Resolve the site's credentials and POST them to its login URL.
    ///
    /// Cookies set by the login page and the submission land in the session
    /// store through the fetcher.
    pub async fn login(&self, site: &SiteDescriptor) -> Result<()> {
        info!("Logging in to {} via {}", site.hostname, site.login_url);

        let fields = self.resolve_credentials(site).await?;
        let body = encode_form(&fields);

        let response = self
            .fetcher
            .fetch(FetchRequest::post_form(site.login_url.clone(), body))
            .await
            .map_err(|e| auth_error(site, e))?;

        if response.status.is_success() || response.status.is_redirection() {
            info!("✓ Login form submitted to {} ({})", site.hostname, response.status);
        } else {
            warn!(
                "Login submission to {} answered {}; continuing with current session",
                site.login_url, response.status
            );
        }
        Ok(())
    }

    /// Resolve every credential field in submission order.
    ///
    /// The login page is fetched at most once, and only if some field is a
    /// query. A query that selects nothing falls back to its raw text.
    pub async fn resolve_credentials(&self, site: &SiteDescriptor) -> Result<Vec<(String, String)>> {
        let mut login_page: Option<Document> = None;
        let mut fields = Vec::with_capacity(site.credentials.len());

        for (name, value) in &site.credentials {
            let resolved = match value {
                CredentialValue::Literal(text) => text.clone(),
                CredentialValue::Query { raw, xpath } => {
                    let page = match login_page.take() {
                        Some(page) => page,
                        None => {
                            debug!("Fetching login page {} for credential fields", site.login_url);
                            let response = self
                                .fetcher
                                .get(&site.login_url)
                                .await
                                .map_err(|e| auth_error(site, e))?;
                            Document::parse(&response.body)
                        }
                    };

                    let extracted = xpath.string(&page);
                    login_page = Some(page);

                    match extracted {
                        Some(text) => text,
                        None => {
                            debug!(
                                "Credential field `{}` matched nothing on the login page; sending it literally",
                                name
                            );
                            raw.clone()
                        }
                    }
                }
            };
            fields.push((name.clone(), resolved));
        }

        Ok(fields)
    }
}

/// `application/x-www-form-urlencoded` body for the given fields.
pub fn encode_form(fields: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish()
}

fn auth_error(site: &SiteDescriptor, source: RelayError) -> RelayError {
    RelayError::AuthError {
        login_url: site.login_url.to_string(),
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::encode_form;

    #[test]
    fn form_encoding_escapes_reserved_characters() {
        let fields = vec![
            ("csrf".to_string(), "abc123".to_string()),
            ("password".to_string(), "p&ss word=1".to_string()),
        ];
        assert_eq!(encode_form(&fields), "csrf=abc123&password=p%26ss+word%3D1");
    }

    #[test]
    fn empty_form_encodes_to_empty_body() {
        assert_eq!(encode_form(&[]), "");
    }
}
