//! Scheduled execution of time-gated actions.
//!
//! Registration opens at an exact pass time; the executor computes the wait
//! and suspends the calling task until the instant arrives, then runs the
//! action and classifies the outcome. Pass-time windows are minute-granular
//! on the remote side, so the coarse timer precision here is plenty.
//!
//! There is no cancellation: callers must not schedule until they are
//! certain execution should proceed. The wait itself holds no identity
//! lock — the action acquires it only for its own send+classify step, so
//! other traffic keeps flowing while a registration sits parked.

use std::future::Future;

use chrono::{DateTime, Local};
use tokio::time::sleep;

use crate::error::{PortalResult, RegistrationError};
use crate::session::transport::PortalResponse;

/// Failure strings the registration endpoint embeds in an otherwise normal
/// page, and the faults they map to.
const REGISTRATION_MARKERS: &[(&str, RegistrationError)] = &[
    (
        "You are already enrolled or waitlisted for this course",
        RegistrationError::AlreadyEnrolled,
    ),
    (
        "Registration is not yet available for this term",
        RegistrationError::NotYetOpen,
    ),
    (
        "Could not register you for this course",
        RegistrationError::Rejected,
    ),
];

/// Wait until `at`, then run `action` and return its result.
///
/// An instant at or before now executes immediately. The action is invoked
/// exactly once; a fired action is never re-run.
pub async fn execute_at<T, F, Fut>(at: DateTime<Local>, action: F) -> PortalResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = PortalResult<T>>,
{
    let delay = (at - Local::now()).to_std().unwrap_or_default();
    if !delay.is_zero() {
        log::info!("holding scheduled action for {delay:?} (until {at})");
        sleep(delay).await;
    }
    action().await
}

/// Classify a registration response against the known failure markers.
///
/// The portal never confirms success explicitly; a body free of failure
/// markers is the only success signal it gives, so that is what we accept.
pub fn check_registration(response: &PortalResponse) -> PortalResult<()> {
    let body = response.text();
    for (marker, fault) in REGISTRATION_MARKERS {
        if body.contains(marker) {
            return Err((*fault).into());
        }
    }
    log::debug!(
        "no failure marker in registration response from {}; treating as success",
        response.url.path()
    );
    Ok(())
}
