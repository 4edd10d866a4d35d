//! Term-scoped navigation cache.
//!
//! Some endpoints only answer correctly after a prior "select this term"
//! request; the selection is kept server-side against the cookie jar. The
//! navigator remembers the last term it selected for this client instance
//! and skips the selection round-trip when it is unchanged.
//!
//! The cache is per-instance, not per-identity: two clients sharing an
//! Identity track their own "current term", but the server only has one.
//! Callers that share an identity while expecting different current terms
//! must use separate navigator instances and accept that each selection
//! overwrites the other's server-side context.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use url::Url;

use crate::error::PortalResult;
use crate::models::Term;
use crate::session::guard::SessionGuard;
use crate::session::transport::PortalRequest;

pub struct TermNavigator {
    guard: Arc<SessionGuard>,
    select_url: Url,
    term_param: String,
    last_visited: Mutex<Option<Term>>,
}

impl TermNavigator {
    /// `select_url` is the endpoint whose plain GET (with `term_param` set
    /// to the term code) switches the server-side context.
    pub fn new(guard: Arc<SessionGuard>, select_url: Url, term_param: impl Into<String>) -> Self {
        Self {
            guard,
            select_url,
            term_param: term_param.into(),
            last_visited: Mutex::new(None),
        }
    }

    pub async fn last_visited(&self) -> Option<Term> {
        *self.last_visited.lock().await
    }

    /// Make sure `term` is the selected context, issuing the selection
    /// request only when it differs from the remembered one.
    ///
    /// The portal sends no confirmation; selection is taken as successful
    /// when the request does not raise.
    pub async fn ensure(&self, term: Term) -> PortalResult<()> {
        let mut last = self.last_visited.lock().await;
        if *last == Some(term) {
            return Ok(());
        }

        let request = PortalRequest::get(self.select_url.clone())
            .with_query(self.term_param.clone(), term.code());
        self.guard.perform(request).await?;
        log::debug!("selected term {term} on {}", self.select_url.path());
        *last = Some(term);
        Ok(())
    }

    /// Run a term-sensitive operation with the selection pre-applied.
    ///
    /// Explicit composition instead of decoration: the navigator wraps a
    /// plain future-returning closure and injects the pre-call side effect.
    pub async fn visit<T, F, Fut>(&self, term: Term, op: F) -> PortalResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PortalResult<T>>,
    {
        self.ensure(term).await?;
        op().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use http::HeaderMap;

    use crate::models::TermSession;
    use crate::session::cas::{CasAuthenticator, CasConfig};
    use crate::session::identity::{Credentials, Identity};
    use crate::session::transport::{PortalResponse, Transport, TransportError};

    /// Answers every request with the same harmless page and counts them.
    struct CountingTransport {
        sent: StdMutex<Vec<PortalRequest>>,
    }

    impl CountingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: StdMutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<PortalRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send(&self, request: &PortalRequest) -> Result<PortalResponse, TransportError> {
            self.sent.lock().unwrap().push(request.clone());
            Ok(PortalResponse {
                status: 200,
                url: request.url.clone(),
                headers: HeaderMap::new(),
                body: Bytes::from_static(b"<html>schedule builder</html>"),
            })
        }
    }

    fn navigator_over(transport: Arc<CountingTransport>) -> TermNavigator {
        let identity = Identity::new(Credentials::new("student", "pw"), transport);
        let cas = CasAuthenticator::new(CasConfig::new(
            Url::parse("https://cas.example.edu/cas/login").unwrap(),
        ));
        let guard = Arc::new(SessionGuard::new(identity, cas));
        TermNavigator::new(
            guard,
            Url::parse("https://builder.example.edu/index.cfm").unwrap(),
            "termCode",
        )
    }

    #[tokio::test]
    async fn repeated_term_short_circuits() {
        let transport = CountingTransport::new();
        let navigator = navigator_over(transport.clone());
        let fall = Term::new(2024, TermSession::FallQuarter);

        navigator.ensure(fall).await.unwrap();
        navigator.ensure(fall).await.unwrap();
        assert_eq!(transport.sent().len(), 1);

        let spring = Term::new(2024, TermSession::SpringQuarter);
        navigator.ensure(spring).await.unwrap();
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1].query,
            vec![("termCode".to_string(), "202403".to_string())]
        );
        assert_eq!(navigator.last_visited().await, Some(spring));
    }

    #[tokio::test]
    async fn visit_selects_before_running_the_operation() {
        let transport = CountingTransport::new();
        let navigator = navigator_over(transport.clone());
        let fall = Term::new(2024, TermSession::FallQuarter);

        let ran = Arc::new(AtomicUsize::new(0));
        let observed = {
            let transport = transport.clone();
            let ran = ran.clone();
            navigator
                .visit(fall, || async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    // Selection already happened by the time we run.
                    Ok(transport.sent().len())
                })
                .await
                .unwrap()
        };

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(observed, 1);

        // A second visit for the same term skips the selection entirely.
        navigator.visit(fall, || async { Ok(()) }).await.unwrap();
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn independent_navigators_track_their_own_term() {
        let transport = CountingTransport::new();
        let first = navigator_over(transport.clone());
        let second = navigator_over(transport.clone());
        let fall = Term::new(2024, TermSession::FallQuarter);

        first.ensure(fall).await.unwrap();
        // The second instance has no memory of the first's selection.
        second.ensure(fall).await.unwrap();
        assert_eq!(transport.sent().len(), 2);
    }
}
