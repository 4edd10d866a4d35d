//! Response classification.
//!
//! The portals report almost everything as `200 OK` HTML, so the only way to
//! know what actually happened is to inspect the final URL and the body for
//! fixed markers. That matching is inherent to scraping an undocumented
//! service; it lives here, behind one interface, so the rules stay swappable
//! and testable independent of the transport.

use scraper::{Html, Selector};
use url::Url;

use crate::error::{DomainFault, PortalError, PortalResult};
use crate::session::transport::PortalResponse;

/// Outcome of inspecting one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Nothing suspicious; the caller may extract fields.
    Ok,
    /// The origin bounced us to the central-auth host, or served a login
    /// form in place of the requested page.
    AuthRequired,
    /// A required structural anchor is absent from the page.
    MalformedPage { missing: &'static str },
    /// A known inline failure string is present.
    Domain(DomainFault),
}

impl Classification {
    /// Convert to a result for call sites past the session guard, where an
    /// auth wall can no longer be recovered.
    pub fn into_result(self) -> PortalResult<()> {
        match self {
            Classification::Ok => Ok(()),
            Classification::AuthRequired => Err(PortalError::AuthenticationFailed(
                "portal answered with a login wall".into(),
            )),
            Classification::MalformedPage { missing } => {
                Err(PortalError::MalformedPage(format!("missing {missing}")))
            }
            Classification::Domain(fault) => Err(fault.into()),
        }
    }
}

/// A structural anchor the page must contain to be considered well-formed.
#[derive(Debug, Clone)]
struct Anchor {
    selector: Selector,
    label: &'static str,
}

/// Marker data driving [`classify`].
///
/// The base rule set only knows how to recognize the central-auth wall;
/// each portal extends a copy with its own inline failure strings and the
/// anchors its parsers rely on.
#[derive(Debug, Clone)]
pub struct ClassifyRules {
    auth_host: Option<String>,
    login_markers: Vec<&'static str>,
    domain_markers: Vec<(&'static str, DomainFault)>,
    anchors: Vec<Anchor>,
}

impl ClassifyRules {
    /// Rules recognizing redirects to the given central-auth host.
    pub fn for_auth_host(auth_host: impl Into<String>) -> Self {
        Self {
            auth_host: Some(auth_host.into()),
            login_markers: vec![LOGIN_FORM_MARKER],
            domain_markers: Vec::new(),
            anchors: Vec::new(),
        }
    }

    /// Rules for an unauthenticated portal: no auth wall to detect.
    pub fn open() -> Self {
        Self {
            auth_host: None,
            login_markers: Vec::new(),
            domain_markers: Vec::new(),
            anchors: Vec::new(),
        }
    }

    /// Add a body substring that identifies a login wall.
    pub fn with_login_marker(mut self, marker: &'static str) -> Self {
        self.login_markers.push(marker);
        self
    }

    /// Add an inline failure string and the fault it maps to.
    pub fn with_domain_marker(mut self, marker: &'static str, fault: DomainFault) -> Self {
        self.domain_markers.push((marker, fault));
        self
    }

    /// Require a CSS-selectable anchor to be present in the page.
    ///
    /// Panics on an invalid selector; anchors are programmer constants.
    pub fn with_anchor(mut self, selector: &str, label: &'static str) -> Self {
        let selector = Selector::parse(selector)
            .unwrap_or_else(|err| panic!("invalid anchor selector `{selector}`: {err:?}"));
        self.anchors.push(Anchor { selector, label });
        self
    }
}

/// Body marker of the central-auth login form.
const LOGIN_FORM_MARKER: &str = "<form id=\"fm1\"";

/// Inspect a response body and its final URL against a rule set.
///
/// Pure with respect to the rules: same body + url + rules, same answer.
/// Precedence is auth wall, then domain markers, then anchors — a login
/// page or a rejection page legitimately lacks the content anchors, and
/// must not be reported as markup drift.
pub fn classify(body: &str, url: &Url, rules: &ClassifyRules) -> Classification {
    if let Some(ref auth_host) = rules.auth_host {
        if url.host_str().is_some_and(|host| host == auth_host) {
            return Classification::AuthRequired;
        }
        if rules.login_markers.iter().any(|marker| body.contains(marker)) {
            return Classification::AuthRequired;
        }
    }

    for (marker, fault) in &rules.domain_markers {
        if body.contains(marker) {
            return Classification::Domain(fault.clone());
        }
    }

    if !rules.anchors.is_empty() {
        let document = Html::parse_document(body);
        for anchor in &rules.anchors {
            if document.select(&anchor.selector).next().is_none() {
                return Classification::MalformedPage {
                    missing: anchor.label,
                };
            }
        }
    }

    Classification::Ok
}

/// Classify a whole [`PortalResponse`].
pub fn classify_response(response: &PortalResponse, rules: &ClassifyRules) -> Classification {
    classify(&response.text(), &response.url, rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    fn cas_rules() -> ClassifyRules {
        ClassifyRules::for_auth_host("cas.example.edu")
    }

    #[test]
    fn auth_host_redirect_is_auth_required() {
        let classification = classify(
            "<html>please sign in</html>",
            &url("https://cas.example.edu/cas/login?service=x"),
            &cas_rules(),
        );
        assert_eq!(classification, Classification::AuthRequired);
    }

    #[test]
    fn login_form_body_is_auth_required() {
        let body = r#"<html><body><form id="fm1" action="/cas/login"></form></body></html>"#;
        let classification = classify(body, &url("https://sis.example.edu/menu"), &cas_rules());
        assert_eq!(classification, Classification::AuthRequired);
    }

    #[test]
    fn refine_search_marker_is_domain_fault_never_ok() {
        let rules = ClassifyRules::open()
            .with_domain_marker("Please refine your search", DomainFault::QueryTooBroad);
        let body = "<table><tr><td>Please refine your search</td></tr></table>";
        let classification = classify(body, &url("https://registrar.example.edu/search"), &rules);
        assert_eq!(
            classification,
            Classification::Domain(DomainFault::QueryTooBroad)
        );
    }

    #[test]
    fn missing_anchor_is_malformed_page() {
        let rules = ClassifyRules::open().with_anchor("table.datadisplaytable", "course table");
        let body = "<html><body><p>maintenance window</p></body></html>";
        let classification = classify(body, &url("https://sis.example.edu/schedule"), &rules);
        assert_eq!(
            classification,
            Classification::MalformedPage {
                missing: "course table"
            }
        );
    }

    #[test]
    fn present_anchor_is_ok() {
        let rules = ClassifyRules::open().with_anchor("table.datadisplaytable", "course table");
        let body = r#"<html><table class="datadisplaytable"><tr><td>74382</td></tr></table></html>"#;
        let classification = classify(body, &url("https://sis.example.edu/schedule"), &rules);
        assert_eq!(classification, Classification::Ok);
    }

    #[test]
    fn auth_wall_wins_over_missing_anchors() {
        let rules = ClassifyRules::for_auth_host("cas.example.edu")
            .with_anchor("table.datadisplaytable", "course table");
        let body = r#"<form id="fm1" action="/cas/login"></form>"#;
        let classification = classify(body, &url("https://sis.example.edu/schedule"), &rules);
        assert_eq!(classification, Classification::AuthRequired);
    }
}
