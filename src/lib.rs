//! # campusport
//!
//! A session-driven client for CAS-protected, form-driven campus web
//! portals — the kind that have no formal API and answer everything with
//! server-rendered HTML, inline script literals, and the occasional JSON
//! payload.
//!
//! The crate keeps one live session per identity across many logically
//! related requests: it authenticates against the central-auth service
//! once, detects mid-session expiry and recovers it transparently,
//! remembers the selected academic term so scope-selection round-trips are
//! skipped, and can hold a registration request until an exact pass time.
//!
//! ## Features
//!
//! - CAS login flow with verbatim hidden-field harvesting
//! - Session guard with bounded (single) re-auth + retry
//! - Term-scoped navigation cache per client instance
//! - Scheduled execution for registration pass times
//! - Marker-based response classification with typed domain faults
//! - Portal clients: student records, public catalog, schedule builder
//!
//! ## Example
//!
//! ```no_run
//! use campusport::{
//!     Credentials, Identity, PortalConfig, ScheduleBuilder, Term, TermSession,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PortalConfig::ucdavis();
//!     let identity = Identity::open(Credentials::new("student", "secret"), &config.http)?;
//!     let builder = ScheduleBuilder::new(identity, &config)?;
//!
//!     let term = Term::new(2024, TermSession::FallQuarter);
//!     if let Some((first_pass, _)) = builder.pass_times(term).await? {
//!         let at = first_pass.and_local_timezone(chrono::Local).unwrap();
//!         builder
//!             .register_schedule(term, "Primary", true, Some(at))
//!             .await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod models;
pub mod navigator;
pub mod portals;
pub mod schedule;
pub mod session;

pub use crate::classify::{Classification, ClassifyRules, classify, classify_response};

pub use crate::config::{HttpConfig, PortalConfig};

pub use crate::error::{
    DomainFault,
    PortalError,
    PortalResult,
    RegistrationError,
};

pub use crate::models::{
    Course,
    DropPolicy,
    FinalExam,
    GradeReport,
    Meeting,
    ScheduleEntry,
    Term,
    TermSession,
    Units,
};

pub use crate::navigator::TermNavigator;

pub use crate::portals::{
    BuilderQuery,
    Catalog,
    CatalogQuery,
    ScheduleBuilder,
    StudentRecords,
};

pub use crate::schedule::{check_registration, execute_at};

pub use crate::session::{
    CasAuthenticator,
    CasConfig,
    Credentials,
    Identity,
    PortalRequest,
    PortalResponse,
    ReqwestTransport,
    SessionGuard,
    Transport,
    TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
