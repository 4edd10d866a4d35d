//! One logical identity: a credential pair plus its live cookie-backed
//! session.
//!
//! Sibling portal clients share an [`Identity`] by reference so cookies set
//! by one client are visible to the others (the portals simulate single
//! sign-on through the shared jar). The identity also owns the request gate
//! that serializes traffic — the remote keeps login state and the selected
//! term per cookie jar, not per request, so interleaved requests from two
//! tasks would trample each other's server-side context.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::config::HttpConfig;
use crate::session::transport::{ReqwestTransport, Transport, TransportError};

/// Username/secret pair for the central-auth service.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Credential pair + transport (and therefore cookie jar) for one user.
///
/// Lives in an `Arc`; every portal client constructed from the same handle
/// shares the session. Dropped with the process — there is no durable
/// session state, and a restart requires a fresh login.
pub struct Identity {
    credentials: Credentials,
    transport: Arc<dyn Transport>,
    gate: Mutex<()>,
}

impl Identity {
    /// Build an identity over an explicit transport (tests use this with
    /// scripted transports).
    pub fn new(credentials: Credentials, transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            credentials,
            transport,
            gate: Mutex::new(()),
        })
    }

    /// Build an identity with a fresh reqwest transport and cookie store.
    pub fn open(credentials: Credentials, http: &HttpConfig) -> Result<Arc<Self>, TransportError> {
        let transport = Arc::new(ReqwestTransport::new(http)?);
        Ok(Self::new(credentials, transport))
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Take the per-identity request gate.
    ///
    /// Held for the duration of one send+classify round (including the
    /// re-auth retry); long scheduled waits must sleep *before* acquiring
    /// it so unrelated traffic on the identity is not starved.
    pub(crate) async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::session::transport::{PortalRequest, PortalResponse};

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send(
            &self,
            _request: &PortalRequest,
        ) -> Result<PortalResponse, TransportError> {
            Err(TransportError::Transport("unreachable".into()))
        }
    }

    #[test]
    fn debug_never_prints_the_secret() {
        let identity = Identity::new(
            Credentials::new("student", "hunter2"),
            Arc::new(NullTransport),
        );
        let printed = format!("{identity:?}");
        assert!(printed.contains("student"));
        assert!(!printed.contains("hunter2"));
    }

    #[tokio::test]
    async fn gate_is_reentrant_across_sequential_holds() {
        let identity = Identity::new(
            Credentials::new("student", "pw"),
            Arc::new(NullTransport),
        );
        drop(identity.acquire().await);
        drop(identity.acquire().await);
    }
}
