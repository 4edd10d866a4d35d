//! Session guard: transparent re-authentication around every request.
//!
//! Wraps the transport for one identity. Each `perform` sends the request,
//! classifies the raw response, and — when the portal answered with a login
//! wall — re-authenticates synchronously and re-issues the identical
//! request exactly once. A second login wall surfaces as an authentication
//! failure instead of looping against a misbehaving server.

use std::sync::Arc;

use crate::classify::{Classification, ClassifyRules, classify_response};
use crate::error::{PortalError, PortalResult};
use crate::session::cas::CasAuthenticator;
use crate::session::identity::Identity;
use crate::session::transport::{PortalRequest, PortalResponse};

pub struct SessionGuard {
    identity: Arc<Identity>,
    authenticator: CasAuthenticator,
    rules: ClassifyRules,
}

impl SessionGuard {
    pub fn new(identity: Arc<Identity>, authenticator: CasAuthenticator) -> Self {
        let auth_host = authenticator
            .config()
            .login_url
            .host_str()
            .unwrap_or_default()
            .to_string();
        Self {
            identity,
            authenticator,
            rules: ClassifyRules::for_auth_host(auth_host),
        }
    }

    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    /// Log in now, without sending a portal request first.
    pub async fn authenticate(&self) -> PortalResult<()> {
        let _gate = self.identity.acquire().await;
        self.authenticator.authenticate(&self.identity).await
    }

    /// Send a request, recovering a mid-session expiry once.
    ///
    /// Safe to repeat for GETs. For mutating calls the retry-after-reauth
    /// cannot know whether the first attempt was silently applied before
    /// the wall appeared — the portals expose no transaction id — so the
    /// contract is at-most-once best effort.
    pub async fn perform(&self, request: PortalRequest) -> PortalResult<PortalResponse> {
        let _gate = self.identity.acquire().await;
        let transport = self.identity.transport();

        let response = transport.send(&request).await?;
        if !self.is_login_wall(&response) {
            return Ok(response);
        }

        log::info!(
            "session expired for {}; re-authenticating and retrying {} {}",
            self.identity.credentials().username(),
            request.method,
            request.url.path(),
        );
        self.authenticator.authenticate(&self.identity).await?;

        let retried = transport.send(&request).await?;
        if self.is_login_wall(&retried) {
            return Err(PortalError::AuthenticationFailed(
                "login wall persisted after re-authentication".into(),
            ));
        }
        Ok(retried)
    }

    fn is_login_wall(&self, response: &PortalResponse) -> bool {
        matches!(
            classify_response(response, &self.rules),
            Classification::AuthRequired
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use http::HeaderMap;
    use url::Url;

    use crate::session::cas::CasConfig;
    use crate::session::identity::Credentials;
    use crate::session::transport::{Transport, TransportError};

    const LOGIN_PAGE: &str = r#"<html><form id="fm1" action="/cas/login">
        <input type="hidden" name="execution" value="e1s1" />
    </form></html>"#;

    const SUCCESS_PAGE: &str =
        r#"<html><div id="msg" class="success">Log In Successful</div></html>"#;

    struct ScriptedTransport {
        responses: Mutex<Vec<PortalResponse>>,
        sent: Mutex<Vec<PortalRequest>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<PortalResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().rev().collect()),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<PortalRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: &PortalRequest) -> Result<PortalResponse, TransportError> {
            self.sent.lock().unwrap().push(request.clone());
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop()
                .expect("no more scripted responses"))
        }
    }

    fn response(url: &str, body: &str) -> PortalResponse {
        PortalResponse {
            status: 200,
            url: Url::parse(url).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn guard_over(transport: Arc<ScriptedTransport>) -> SessionGuard {
        let identity = Identity::new(Credentials::new("student", "pw"), transport);
        let cas = CasAuthenticator::new(CasConfig::new(
            Url::parse("https://cas.example.edu/cas/login").unwrap(),
        ));
        SessionGuard::new(identity, cas)
    }

    #[tokio::test]
    async fn authenticated_response_passes_straight_through() {
        let transport = ScriptedTransport::new(vec![response(
            "https://sis.example.edu/menu",
            "<html>main menu</html>",
        )]);
        let guard = guard_over(transport.clone());

        let response = guard
            .perform(PortalRequest::get(
                Url::parse("https://sis.example.edu/menu").unwrap(),
            ))
            .await
            .unwrap();

        assert!(response.text().contains("main menu"));
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn login_wall_triggers_one_reauth_and_one_retry() {
        let protected = Url::parse("https://sis.example.edu/schedule").unwrap();
        let transport = ScriptedTransport::new(vec![
            // First attempt bounced to the auth host.
            response("https://cas.example.edu/cas/login?service=sis", LOGIN_PAGE),
            // Authenticator: fetch login page, then submit.
            response("https://cas.example.edu/cas/login", LOGIN_PAGE),
            response("https://cas.example.edu/cas/login", SUCCESS_PAGE),
            // Retried request succeeds.
            response("https://sis.example.edu/schedule", "<html>schedule detail</html>"),
        ]);
        let guard = guard_over(transport.clone());

        let outcome = guard
            .perform(PortalRequest::get(protected.clone()))
            .await
            .unwrap();
        assert!(outcome.text().contains("schedule detail"));

        let sent = transport.sent();
        assert_eq!(sent.len(), 4);
        // The retried request is identical to the first.
        assert_eq!(sent[0].url, protected);
        assert_eq!(sent[3].url, protected);
        // Exactly one authenticator round: one fetch + one submission.
        let cas_calls = sent
            .iter()
            .filter(|req| req.url.host_str() == Some("cas.example.edu"))
            .count();
        assert_eq!(cas_calls, 2);
    }

    #[tokio::test]
    async fn persistent_login_wall_is_bounded_to_one_retry() {
        let protected = Url::parse("https://sis.example.edu/schedule").unwrap();
        let transport = ScriptedTransport::new(vec![
            response("https://cas.example.edu/cas/login?service=sis", LOGIN_PAGE),
            // Authenticator sees the success marker straight away (cookie
            // present but the portal refuses to honor it).
            response("https://cas.example.edu/cas/login", SUCCESS_PAGE),
            // The retried request bounces again.
            response("https://cas.example.edu/cas/login?service=sis", LOGIN_PAGE),
        ]);
        let guard = guard_over(transport.clone());

        let err = guard.perform(PortalRequest::get(protected)).await.unwrap_err();
        assert!(matches!(err, PortalError::AuthenticationFailed(_)));
        // No second retry loop: three sends and we stop.
        assert_eq!(transport.sent().len(), 3);
    }

    #[tokio::test]
    async fn bad_credentials_abort_before_any_retry() {
        let protected = Url::parse("https://sis.example.edu/schedule").unwrap();
        let failure_page = r#"<html><div id="msg" class="errors">denied</div></html>"#;
        let transport = ScriptedTransport::new(vec![
            response("https://cas.example.edu/cas/login?service=sis", LOGIN_PAGE),
            response("https://cas.example.edu/cas/login", LOGIN_PAGE),
            response("https://cas.example.edu/cas/login", failure_page),
        ]);
        let guard = guard_over(transport.clone());

        let err = guard.perform(PortalRequest::get(protected)).await.unwrap_err();
        assert!(matches!(err, PortalError::AuthenticationFailed(_)));
        assert_eq!(transport.sent().len(), 3);
    }
}
