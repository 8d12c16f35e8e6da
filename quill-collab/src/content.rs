//! Client for the authoritative content store.
//!
//! The store speaks plain HTTP: `GET <name>` returns the authored HTML,
//! `PUT <name>` accepts a multipart form with one `data` field. Document
//! names are full URLs, so no base address is configured here.
//!
//! Writes aggregate the credentials of every connected session into one
//! comma-separated `Authorization` value; the store accepts the request
//! if any of them is valid. Writes never raise, they report an outcome.

use futures_util::future::BoxFuture;
use reqwest::header::AUTHORIZATION;

/// Canonical body served for documents that do not exist yet.
pub const EMPTY_DOC: &str = "<main></main>";

/// Marker header identifying collaborative writes to the store.
pub const INITIATOR_HEADER: &str = "X-DA-Initiator";

/// Result of a store write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub ok: bool,
    pub status: u16,
    pub status_text: String,
}

impl PutOutcome {
    /// Outcome for requests that never reached the store.
    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            status: 0,
            status_text: message.into(),
        }
    }
}

/// Content-store read failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    /// The store answered with an unexpected status.
    Unavailable(u16),
    /// The request never completed.
    Transport(String),
}

impl std::fmt::Display for ContentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentError::Unavailable(status) => {
                write!(f, "Content store returned status {status}")
            }
            ContentError::Transport(e) => write!(f, "Content store unreachable: {e}"),
        }
    }
}

impl std::error::Error for ContentError {}

/// Interface to the content store, object-safe so the coordinator can be
/// driven against a scripted double in tests.
pub trait ContentApi: Send + Sync + 'static {
    /// Fetch the authored HTML for a document.
    fn fetch<'a>(
        &'a self,
        name: &'a str,
        auth: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String, ContentError>>;

    /// Write the authored HTML for a document.
    fn store<'a>(
        &'a self,
        name: &'a str,
        html: String,
        auths: Vec<String>,
    ) -> BoxFuture<'a, PutOutcome>;
}

/// Deduplicate session credentials preserving first-seen order.
pub fn aggregate_auth(auths: &[String]) -> Option<String> {
    let mut seen: Vec<&str> = Vec::new();
    for auth in auths {
        if !auth.is_empty() && !seen.contains(&auth.as_str()) {
            seen.push(auth);
        }
    }
    if seen.is_empty() {
        None
    } else {
        Some(seen.join(","))
    }
}

/// HTTP implementation backed by `reqwest`.
pub struct HttpContentStore {
    http: reqwest::Client,
}

impl HttpContentStore {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentApi for HttpContentStore {
    fn fetch<'a>(
        &'a self,
        name: &'a str,
        auth: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String, ContentError>> {
        Box::pin(async move {
            let mut request = self.http.get(name);
            if let Some(auth) = auth {
                request = request.header(AUTHORIZATION, auth);
            }
            let response = request
                .send()
                .await
                .map_err(|e| ContentError::Transport(e.to_string()))?;
            match response.status().as_u16() {
                404 => Ok(EMPTY_DOC.to_string()),
                status if response.status().is_success() => {
                    log::debug!("fetched {name} ({status})");
                    response
                        .text()
                        .await
                        .map_err(|e| ContentError::Transport(e.to_string()))
                }
                status => Err(ContentError::Unavailable(status)),
            }
        })
    }

    fn store<'a>(
        &'a self,
        name: &'a str,
        html: String,
        auths: Vec<String>,
    ) -> BoxFuture<'a, PutOutcome> {
        Box::pin(async move {
            let part = match reqwest::multipart::Part::text(html).mime_str("text/html") {
                Ok(part) => part,
                Err(e) => return PutOutcome::transport_failure(e.to_string()),
            };
            let form = reqwest::multipart::Form::new().part("data", part);

            let mut request = self
                .http
                .put(name)
                .multipart(form)
                .header(INITIATOR_HEADER, "collab");
            if let Some(joined) = aggregate_auth(&auths) {
                request = request.header(AUTHORIZATION, joined);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    PutOutcome {
                        ok: status.is_success(),
                        status: status.as_u16(),
                        status_text: status
                            .canonical_reason()
                            .unwrap_or_default()
                            .to_string(),
                    }
                }
                Err(e) => {
                    log::warn!("store write for {name} failed in transit: {e}");
                    PutOutcome::transport_failure(e.to_string())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_auth_dedups_in_order() {
        let auths = vec![
            "Bearer a".to_string(),
            "Bearer b".to_string(),
            "Bearer a".to_string(),
        ];
        assert_eq!(
            aggregate_auth(&auths),
            Some("Bearer a,Bearer b".to_string())
        );
    }

    #[test]
    fn test_aggregate_auth_skips_empty() {
        let auths = vec![String::new(), "Bearer x".to_string(), String::new()];
        assert_eq!(aggregate_auth(&auths), Some("Bearer x".to_string()));
    }

    #[test]
    fn test_aggregate_auth_none_when_no_credentials() {
        assert_eq!(aggregate_auth(&[]), None);
        assert_eq!(aggregate_auth(&[String::new()]), None);
    }

    #[test]
    fn test_transport_failure_outcome() {
        let outcome = PutOutcome::transport_failure("connection refused");
        assert!(!outcome.ok);
        assert_eq!(outcome.status, 0);
        assert_eq!(outcome.status_text, "connection refused");
    }

    #[test]
    fn test_content_error_display() {
        assert_eq!(
            ContentError::Unavailable(503).to_string(),
            "Content store returned status 503"
        );
        assert!(ContentError::Transport("refused".into())
            .to_string()
            .contains("refused"));
    }
}
