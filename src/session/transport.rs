//! HTTP transport abstraction.
//!
//! Everything above this layer speaks [`PortalRequest`]/[`PortalResponse`];
//! the reqwest adapter is the only place concrete wire concerns (cookie
//! store, redirects, timeouts) live. Tests swap in scripted implementations
//! of [`Transport`] instead of a network.

use std::borrow::Cow;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use crate::config::HttpConfig;

/// One outbound request. Form bodies are URL-encoded key/value pairs —
/// the portals accept nothing else.
#[derive(Debug, Clone)]
pub struct PortalRequest {
    pub method: Method,
    pub url: Url,
    pub query: Vec<(String, String)>,
    pub form: Option<Vec<(String, String)>>,
}

impl PortalRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            query: Vec::new(),
            form: None,
        }
    }

    pub fn post_form(url: Url, fields: Vec<(String, String)>) -> Self {
        Self {
            method: Method::POST,
            url,
            query: Vec::new(),
            form: Some(fields),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Read-only response as seen after redirects settled.
///
/// `url` is the final URL, which is how the session guard notices a bounce
/// to the central-auth host.
#[derive(Debug, Clone)]
pub struct PortalResponse {
    pub status: u16,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl PortalResponse {
    /// Body as UTF-8 text. The portals serve Latin-flavored HTML; lossy
    /// conversion is the pragmatic choice.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Decode a JSON body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// The configured per-request timeout elapsed. One hung call must not
    /// starve the whole client.
    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("http transport error: {0}")]
    Transport(String),
}

/// Contract for the underlying HTTP stack.
///
/// Implementations must carry cookies across calls for the lifetime of one
/// logical identity — the portals keep all session state (login, selected
/// term) server-side, keyed by the cookie jar.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &PortalRequest) -> Result<PortalResponse, TransportError>;
}

/// Reqwest-backed transport with a shared cookie store.
///
/// Redirects are followed (the central-auth flow depends on them); the final
/// URL after redirects is reported in the response.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &HttpConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .build()
            .map_err(|err| TransportError::Transport(err.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing reqwest client. The client should already have a
    /// cookie store enabled, or the session will never survive the first
    /// redirect.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &PortalRequest) -> Result<PortalResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref form) = request.form {
            builder = builder.form(form);
        }

        let response = builder.send().await.map_err(convert_error)?;
        let status = response.status().as_u16();
        let url = response.url().clone();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(convert_error)?;

        Ok(PortalResponse {
            status,
            url,
            headers,
            body,
        })
    }
}

fn convert_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        let url = err
            .url()
            .map(|url| url.to_string())
            .unwrap_or_else(|| "<unknown>".into());
        TransportError::Timeout(url)
    } else {
        TransportError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builders_compose() {
        let url = Url::parse("https://sis.example.edu/menu").unwrap();
        let request = PortalRequest::get(url)
            .with_query("termCode", "202410")
            .with_query("ShowDebug", "0");
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.query.len(), 2);
        assert!(request.form.is_none());
    }

    #[test]
    fn response_text_is_lossy() {
        let response = PortalResponse {
            status: 200,
            url: Url::parse("https://sis.example.edu/").unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::from_static(&[b'o', b'k', 0xFF]),
        };
        assert!(response.text().starts_with("ok"));
    }
}
