//! Crate-level error taxonomy.
//!
//! Callers need to tell three situations apart: the portal rejected their
//! input (domain faults, never retried), the portal's markup drifted away
//! from what the parsers expect (malformed page, a hard failure), and the
//! session is not authenticated (recovered once by the guard, surfaced when
//! recovery does not take). Network failures pass through untouched so the
//! caller's own retry policy can deal with them.

use thiserror::Error;

use crate::session::transport::TransportError;

/// Result alias used across the crate.
pub type PortalResult<T> = Result<T, PortalError>;

/// High-level error surfaced by portal clients.
#[derive(Debug, Error)]
pub enum PortalError {
    /// Credentials were rejected, or the login form changed shape.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A structural anchor the parser relies on is gone; the remote changed
    /// its markup or served a different page than requested.
    #[error("page no longer matches the expected structure: {0}")]
    MalformedPage(String),

    /// The portal accepted the request but rejected its content.
    #[error(transparent)]
    Domain(#[from] DomainFault),

    /// A registration attempt was turned down for a named reason.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// Connection-level failure; left to the caller's retry policy.
    #[error("http transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    /// A JSON endpoint answered with a payload the client cannot decode.
    #[error("unexpected payload shape: {0}")]
    Json(#[from] serde_json::Error),
}

/// Business rejections the portal expresses as prose inside an otherwise
/// well-formed page. Surfaced verbatim, never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainFault {
    #[error("query matched too many sections; narrow the search")]
    QueryTooBroad,

    /// The portal signals a bad course lookup with an inline script alert.
    #[error("invalid course reference number or term")]
    InvalidCrnOrTerm,

    /// The requested term is not listed for this view (no enrollment or
    /// grade data exists for it).
    #[error("term {0} is not available for this view")]
    TermUnavailable(String),

    /// No saved schedule with the requested name exists for the term.
    #[error("no saved schedule named {0}")]
    UnknownSchedule(String),
}

/// Named reasons the registration endpoint turns a request down. Each maps
/// to a fixed marker string in the response body.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("already enrolled or waitlisted for this course")]
    AlreadyEnrolled,

    #[error("registration is not yet open for this term")]
    NotYetOpen,

    #[error("the portal could not register this course")]
    Rejected,
}
