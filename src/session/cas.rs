//! Central-auth (CAS) login flow.
//!
//! A single `authenticate` call is a complete attempt: fetch the login
//! page, bail out early if the session is already valid, otherwise harvest
//! the form's hidden fields verbatim (anti-CSRF tokens, flow nonces), add
//! the credentials, and submit to the form's declared action URL. The
//! action is never hardcoded — the service moves it between releases.
//!
//! This component never retries on its own; retry policy belongs to the
//! session guard.

use scraper::{Html, Selector};

use crate::error::{PortalError, PortalResult};
use crate::session::identity::Identity;
use crate::session::transport::PortalRequest;

/// Marker present on the CAS page once a session is established.
const SUCCESS_MARKER: &str = r#"<div id="msg" class="success""#;

/// Selector of the CAS credential form.
const FORM_SELECTOR: &str = "form#fm1";

/// Knobs for a CAS deployment.
#[derive(Debug, Clone)]
pub struct CasConfig {
    /// Full login endpoint, e.g. `https://cas.example.edu/cas/login`.
    pub login_url: url::Url,
    /// Body marker proving the session is (or became) valid.
    pub success_marker: String,
    /// CSS selector of the credential form.
    pub form_selector: String,
    /// Form field names the service expects the credentials under.
    pub username_field: String,
    pub secret_field: String,
}

impl CasConfig {
    pub fn new(login_url: url::Url) -> Self {
        Self {
            login_url,
            success_marker: SUCCESS_MARKER.to_string(),
            form_selector: FORM_SELECTOR.to_string(),
            username_field: "username".to_string(),
            secret_field: "password".to_string(),
        }
    }
}

/// Drives the `unauthenticated -> authenticated` transition for one
/// identity. Stateless between calls; the only persisted effect is the
/// auth cookies the service drops into the shared jar.
#[derive(Debug, Clone)]
pub struct CasAuthenticator {
    config: CasConfig,
}

impl CasAuthenticator {
    pub fn new(config: CasConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CasConfig {
        &self.config
    }

    /// Run one complete login attempt.
    ///
    /// Idempotent: if a prior client sharing this identity already signed
    /// in, the success marker is present on the login page and nothing is
    /// submitted.
    pub async fn authenticate(&self, identity: &Identity) -> PortalResult<()> {
        let transport = identity.transport();
        let username = identity.credentials().username().to_string();

        let page = transport
            .send(&PortalRequest::get(self.config.login_url.clone()))
            .await?;
        let body = page.text();
        if body.contains(&self.config.success_marker) {
            log::debug!("session already valid for {username}; skipping login submission");
            return Ok(());
        }

        let form = parse_login_form(&body, &self.config.form_selector)?;
        // The action may be relative; resolve it against the page we
        // actually landed on, not the configured login URL.
        let action = page.url.join(&form.action)?;

        let mut fields = form.fields;
        fields.push((self.config.username_field.clone(), username.clone()));
        fields.push((
            self.config.secret_field.clone(),
            identity.credentials().secret().to_string(),
        ));

        let outcome = transport
            .send(&PortalRequest::post_form(action, fields))
            .await?;
        if outcome.text().contains(&self.config.success_marker) {
            log::info!("authenticated {username}");
            Ok(())
        } else {
            Err(PortalError::AuthenticationFailed(format!(
                "central-auth service rejected the login for {username}"
            )))
        }
    }
}

/// Credential form snapshot: declared action plus every harvested field.
#[derive(Debug)]
struct LoginForm {
    action: String,
    fields: Vec<(String, String)>,
}

/// Pull the form action and its pre-filled fields out of the login page.
///
/// Only *element* nodes carrying both a `name` and a `value` attribute are
/// fields; surrounding text nodes and the empty credential inputs are not.
fn parse_login_form(body: &str, form_selector: &str) -> PortalResult<LoginForm> {
    let document = Html::parse_document(body);
    let form_sel = Selector::parse(form_selector).map_err(|err| {
        PortalError::AuthenticationFailed(format!(
            "invalid login form selector `{form_selector}`: {err:?}"
        ))
    })?;
    let form = document.select(&form_sel).next().ok_or_else(|| {
        PortalError::AuthenticationFailed(
            "login form not found; the central-auth page changed shape".into(),
        )
    })?;
    let action = form
        .value()
        .attr("action")
        .ok_or_else(|| {
            PortalError::AuthenticationFailed("login form carries no action URL".into())
        })?
        .to_string();

    let descendants =
        Selector::parse("*").unwrap_or_else(|err| panic!("invalid wildcard selector: {err:?}"));
    let mut fields = Vec::new();
    for element in form.select(&descendants) {
        let value = element.value();
        if let (Some(name), Some(value)) = (value.attr("name"), value.attr("value")) {
            fields.push((name.to_string(), value.to_string()));
        }
    }

    Ok(LoginForm { action, fields })
}
