//! Client configuration.
//!
//! Base origins for the portals plus HTTP-level knobs. Every origin is
//! configurable — campuses move hosts around — with a preset for the
//! reference deployment.

use std::time::Duration;

use url::Url;

/// Default browser-shaped user agent; the portals refuse obviously
/// non-browser clients.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Transport-level settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    /// Per-request timeout. Always finite: one hung call must not stall
    /// the whole client.
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Origins of the portal family plus shared HTTP settings.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// Central-auth login endpoint.
    pub cas_login: Url,
    /// Student records portal base (the `owa` service root).
    pub records_base: Url,
    /// Public course catalog base.
    pub catalog_base: Url,
    /// Schedule builder base.
    pub builder_base: Url,
    pub http: HttpConfig,
}

impl PortalConfig {
    pub fn new(cas_login: Url, records_base: Url, catalog_base: Url, builder_base: Url) -> Self {
        Self {
            cas_login,
            records_base,
            catalog_base,
            builder_base,
            http: HttpConfig::default(),
        }
    }

    pub fn with_http(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    /// Preset for the reference campus deployment.
    pub fn ucdavis() -> Self {
        Self::new(
            Url::parse("https://cas.ucdavis.edu/cas/login").expect("preset URL"),
            Url::parse("https://sisweb.ucdavis.edu/owa_service/owa").expect("preset URL"),
            Url::parse("https://registrar.ucdavis.edu").expect("preset URL"),
            Url::parse("https://my.ucdavis.edu/schedulebuilder").expect("preset URL"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_origins_parse() {
        let config = PortalConfig::ucdavis();
        assert_eq!(config.cas_login.host_str(), Some("cas.ucdavis.edu"));
        assert_eq!(config.http.timeout, Duration::from_secs(30));
    }
}
