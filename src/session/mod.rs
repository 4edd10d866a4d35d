//! Session and authentication state machine.
//!
//! Layered bottom-up: [`transport`] issues HTTP, [`identity`] owns the
//! credential pair and the shared cookie-backed session, [`cas`] drives the
//! central-auth login form, and [`guard`] wraps every outbound request with
//! login-wall detection and a single transparent re-authentication.

pub mod cas;
pub mod guard;
pub mod identity;
pub mod transport;

pub use cas::{CasAuthenticator, CasConfig};
pub use guard::SessionGuard;
pub use identity::{Credentials, Identity};
pub use transport::{
    PortalRequest, PortalResponse, ReqwestTransport, Transport, TransportError,
};
