//! Transport adapter - the HTTP GET primitive the engine calls into
//!
//! The engine never talks to `reqwest` directly. Each request runs inside its
//! own task, so aborting that task is how an in-flight request is cancelled.

use crate::error::ShareError;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION};
use reqwest::Client;
use shareget_types::Settings;
use std::time::Duration;
use tracing::debug;

/// A fully received HTTP response
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Raw `Content-Disposition` value, if present and valid UTF-8.
    ///
    /// `HeaderValue::to_str` only accepts visible ASCII, but senders put raw
    /// UTF-8 file names in the quoted `filename` parameter.
    pub fn content_disposition(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_DISPOSITION)
            .and_then(|v| std::str::from_utf8(v.as_bytes()).ok())
    }
}

/// Asynchronous GET. Implementations must be cheap to call concurrently.
pub trait Transport: Send + Sync + 'static {
    fn get(&self, url: &str) -> BoxFuture<'static, Result<TransportResponse, ShareError>>;
}

/// `reqwest`-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build a transport from settings.
    ///
    /// Only a connect timeout is set: a stalled transfer is cleaned up by the
    /// run's idle-abort timer or an explicit cancel.
    pub fn new(settings: &Settings) -> Result<Self, ShareError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .build()
            .map_err(|e| ShareError::Unknown(e.to_string()))?;

        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> BoxFuture<'static, Result<TransportResponse, ShareError>> {
        let client = self.client.clone();
        let url = url.to_string();

        async move {
            debug!("GET {}", url);
            let response = client.get(&url).send().await?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            // The exchange started; a failure now means the body was cut short
            let body = response
                .bytes()
                .await
                .map_err(|e| {
                    ShareError::Transport(format!("body of {} cut short: {}", url, e))
                })?
                .to_vec();
            debug!("GET {} -> {} ({} bytes)", url, status, body.len());

            Ok(TransportResponse {
                status,
                headers,
                body,
            })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn with_disposition(raw: &[u8]) -> TransportResponse {
        let mut response = TransportResponse {
            status: 200,
            ..Default::default()
        };
        response
            .headers
            .insert(CONTENT_DISPOSITION, HeaderValue::from_bytes(raw).unwrap());
        response
    }

    #[test]
    fn test_content_disposition_accepts_utf8() {
        let response = with_disposition("attachment; filename=\"фото.jpg\"".as_bytes());
        assert_eq!(
            response.content_disposition(),
            Some("attachment; filename=\"фото.jpg\"")
        );
    }

    #[test]
    fn test_content_disposition_rejects_invalid_utf8() {
        let response = with_disposition(b"attachment; filename=\"\xff.bin\"");
        assert_eq!(response.content_disposition(), None);
        assert_eq!(TransportResponse::default().content_disposition(), None);
    }

    #[test]
    fn test_success_range() {
        let mut response = TransportResponse::default();
        for (status, ok) in [(200, true), (204, true), (299, true), (304, false), (404, false)] {
            response.status = status;
            assert_eq!(response.is_success(), ok, "status {}", status);
        }
    }
}
