//! Student records portal (enrollment history, schedule detail, grades).
//!
//! A quirk of this portal: when its own session id has lapsed while the
//! central-auth ticket is still good, it answers with a meta-refresh stub
//! instead of the requested page. The stub also re-establishes the session
//! id, so re-issuing the request once is all it takes.

use std::collections::HashMap;
use std::sync::Arc;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::PortalConfig;
use crate::error::{DomainFault, PortalError, PortalResult};
use crate::models::{GradeReport, Term};
use crate::session::cas::{CasAuthenticator, CasConfig};
use crate::session::guard::SessionGuard;
use crate::session::identity::Identity;
use crate::session::transport::{PortalRequest, PortalResponse};

const GRADE_TERM_SELECT_ENDPOINT: &str = "/bwskogrd.P_ViewTermGrde";
const GRADE_ENDPOINT: &str = "/bwskogrd.P_ViewGrde";
const REGISTRATION_TERM_SELECT_ENDPOINT: &str = "/bwskflib.P_SelDefTerm";
const REGISTRATION_TERM_STORE_ENDPOINT: &str = "/bwcklibs.P_StoreTerm";
const COURSE_SCHEDULE_ENDPOINT: &str = "/bwskfshd.P_CrseSchdDetl";

/// Stub served in place of the real page when the portal-side session id
/// expired.
const SESSION_STUB_MARKER: &str = r#"<meta http-equiv="refresh" content="0;url="#;

/// Caption of the grade table we extract from.
const GRADE_TABLE_CAPTION: &str = "Undergraduate Level - Qtr. Course work";

pub struct StudentRecords {
    guard: Arc<SessionGuard>,
    base: Url,
}

impl StudentRecords {
    pub fn new(identity: Arc<Identity>, config: &PortalConfig) -> Self {
        let cas = CasAuthenticator::new(CasConfig::new(config.cas_login.clone()));
        let guard = Arc::new(SessionGuard::new(identity, cas));
        Self::with_guard(guard, config.records_base.clone())
    }

    pub fn with_guard(guard: Arc<SessionGuard>, base: Url) -> Self {
        Self { guard, base }
    }

    /// Terms the student has enrollment data for.
    pub async fn terms_enrolled(&self) -> PortalResult<Vec<Term>> {
        let response = self
            .fetch(PortalRequest::get(
                self.endpoint(REGISTRATION_TERM_SELECT_ENDPOINT)?,
            ))
            .await?;
        parse_term_list(&response.text())
    }

    /// Terms the student has final grades for.
    pub async fn terms_completed(&self) -> PortalResult<Vec<Term>> {
        let response = self
            .fetch(PortalRequest::get(self.endpoint(GRADE_TERM_SELECT_ENDPOINT)?))
            .await?;
        parse_term_list(&response.text())
    }

    /// Reference numbers of the courses enrolled in for `term`.
    pub async fn enrolled_crns(&self, term: Term) -> PortalResult<Vec<String>> {
        // The schedule page only answers for the stored term; verify the
        // term is offered, store it, then read the schedule.
        let select = self
            .fetch(PortalRequest::get(
                self.endpoint(REGISTRATION_TERM_SELECT_ENDPOINT)?,
            ))
            .await?;
        let offered = parse_term_list(&select.text())?;
        if !offered.contains(&term) {
            return Err(DomainFault::TermUnavailable(term.code()).into());
        }

        self.fetch(PortalRequest::post_form(
            self.endpoint(REGISTRATION_TERM_STORE_ENDPOINT)?,
            vec![("term_in".into(), term.code())],
        ))
        .await?;

        let schedule = self
            .fetch(PortalRequest::get(self.endpoint(COURSE_SCHEDULE_ENDPOINT)?))
            .await?;
        parse_schedule_crns(&schedule.text())
    }

    /// Final grades for a completed term, keyed by reference number.
    pub async fn grades(&self, term: Term) -> PortalResult<HashMap<String, GradeReport>> {
        let select = self
            .fetch(PortalRequest::get(self.endpoint(GRADE_TERM_SELECT_ENDPOINT)?))
            .await?;
        let graded = parse_term_list(&select.text())?;
        if !graded.contains(&term) {
            return Err(DomainFault::TermUnavailable(term.code()).into());
        }

        let response = self
            .fetch(PortalRequest::post_form(
                self.endpoint(GRADE_ENDPOINT)?,
                vec![("term_in".into(), term.code())],
            ))
            .await?;
        parse_grades(&response.text())
    }

    /// Guarded fetch with the expired-session-stub refetch applied.
    async fn fetch(&self, request: PortalRequest) -> PortalResult<PortalResponse> {
        let response = self.guard.perform(request.clone()).await?;
        if response.text().contains(SESSION_STUB_MARKER) {
            log::debug!(
                "records portal served a session stub; re-fetching {}",
                request.url.path()
            );
            return self.guard.perform(request).await;
        }
        Ok(response)
    }

    // The portal routes everything through one `owa` path prefix, so
    // endpoints are appended to the base rather than URL-joined.
    fn endpoint(&self, path: &str) -> PortalResult<Url> {
        Ok(Url::parse(&format!("{}{}", self.base, path))?)
    }
}

/// Parse the `<select id="term_id">` options into terms.
fn parse_term_list(body: &str) -> PortalResult<Vec<Term>> {
    let document = Html::parse_document(body);
    let select = selector("select#term_id");
    let option = selector("option");

    let Some(term_select) = document.select(&select).next() else {
        return Err(PortalError::MalformedPage("missing term select".into()));
    };

    let mut terms = Vec::new();
    for opt in term_select.select(&option) {
        let Some(value) = opt.value().attr("value") else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        terms.push(Term::from_code(value)?);
    }
    Ok(terms)
}

/// Pull the CRN out of each per-course detail table on the schedule page.
fn parse_schedule_crns(body: &str) -> PortalResult<Vec<String>> {
    let document = Html::parse_document(body);
    let table = selector("table.datadisplaytable");
    let row = selector("tr");
    let cell = selector("td");

    let mut crns = Vec::new();
    for course_table in document.select(&table) {
        let summary = course_table.value().attr("summary").unwrap_or_default();
        if !summary.ends_with("course detail") {
            continue;
        }
        // Row 0 is the header; the CRN sits in the first cell of row 1.
        let Some(crn_row) = course_table.select(&row).nth(1) else {
            return Err(PortalError::MalformedPage(
                "course detail table has no data row".into(),
            ));
        };
        let Some(crn_cell) = crn_row.select(&cell).next() else {
            return Err(PortalError::MalformedPage(
                "course detail row has no cells".into(),
            ));
        };
        crns.push(cell_text(&crn_cell));
    }
    Ok(crns)
}

/// Extract the undergraduate coursework grade table.
fn parse_grades(body: &str) -> PortalResult<HashMap<String, GradeReport>> {
    let document = Html::parse_document(body);
    let table = selector("table.datadisplaytable");
    let caption = selector("caption");
    let row = selector("tr");
    let cell = selector("td");

    let course_table = document
        .select(&table)
        .find(|candidate| {
            candidate
                .select(&caption)
                .next()
                .is_some_and(|c| cell_text(&c) == GRADE_TABLE_CAPTION)
        })
        .ok_or_else(|| PortalError::MalformedPage("missing grade table".into()))?;

    let mut grades = HashMap::new();
    for course_row in course_table.select(&row).skip(1) {
        let cells: Vec<String> = course_row.select(&cell).map(|c| cell_text(&c)).collect();
        if cells.len() < 10 {
            continue;
        }
        let report = GradeReport {
            letter: cells[5].clone(),
            units_enrolled: parse_units(&cells[6])?,
            units_completed: parse_units(&cells[7])?,
            units_attempted: parse_units(&cells[8])?,
            grade_points: parse_units(&cells[9])?,
        };
        grades.insert(cells[0].clone(), report);
    }
    Ok(grades)
}

fn parse_units(text: &str) -> PortalResult<f32> {
    text.parse()
        .map_err(|_| PortalError::MalformedPage(format!("unreadable grade figure `{text}`")))
}

fn cell_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|err| panic!("invalid selector `{css}`: {err:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use http::HeaderMap;

    use crate::models::TermSession;
    use crate::session::identity::Credentials;
    use crate::session::transport::{Transport, TransportError};

    const TERM_SELECT_PAGE: &str = r#"<html><body>
        <select id="term_id" name="term_in">
          <option value="202410">Fall Quarter 2024</option>
          <option value="202403">Spring Quarter 2024</option>
          <option value="202401">Winter Quarter 2024</option>
        </select>
    </body></html>"#;

    const SCHEDULE_PAGE: &str = r#"<html><body>
        <table class="datadisplaytable" summary="This table lists the scheduled meeting times - course detail">
          <tr><th>CRN</th></tr>
          <tr><td>74382</td></tr>
        </table>
        <table class="datadisplaytable" summary="Unrelated layout table">
          <tr><td>noise</td></tr>
        </table>
        <table class="datadisplaytable" summary="second course detail">
          <tr><th>CRN</th></tr>
          <tr><td> 81001 </td></tr>
        </table>
    </body></html>"#;

    const GRADES_PAGE: &str = r#"<html><body>
        <table class="datadisplaytable">
          <caption>Undergraduate Level - Qtr. Course work</caption>
          <tr><th>CRN</th><th>Subj</th><th>Crse</th><th>Sec</th><th>Title</th>
              <th>Grade</th><th>Enrolled</th><th>Completed</th><th>Attempted</th><th>Points</th></tr>
          <tr><td>74382</td><td>ECS</td><td>040</td><td>A01</td><td>Intro</td>
              <td>A-</td><td>4.000</td><td>4.000</td><td>4.000</td><td>14.800</td></tr>
        </table>
    </body></html>"#;

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

    fn records_over(transport: Arc<ScriptedTransport>) -> StudentRecords {
        let identity = Identity::new(Credentials::new("student", "pw"), transport);
        let cas = CasAuthenticator::new(CasConfig::new(
            Url::parse("https://cas.example.edu/cas/login").unwrap(),
        ));
        let guard = Arc::new(SessionGuard::new(identity, cas));
        StudentRecords::with_guard(
            guard,
            Url::parse("https://sis.example.edu/owa_service/owa").unwrap(),
        )
    }

    #[test]
    fn term_list_parses_select_options() {
        let terms = parse_term_list(TERM_SELECT_PAGE).unwrap();
        assert_eq!(
            terms,
            vec![
                Term::new(2024, TermSession::FallQuarter),
                Term::new(2024, TermSession::SpringQuarter),
                Term::new(2024, TermSession::WinterQuarter),
            ]
        );
    }

    #[test]
    fn missing_term_select_is_malformed() {
        let err = parse_term_list("<html><body>nothing here</body></html>").unwrap_err();
        assert!(matches!(err, PortalError::MalformedPage(_)));
    }

    #[test]
    fn schedule_crns_only_come_from_course_detail_tables() {
        let crns = parse_schedule_crns(SCHEDULE_PAGE).unwrap();
        assert_eq!(crns, vec!["74382".to_string(), "81001".to_string()]);
    }

    #[test]
    fn grades_index_by_crn() {
        let grades = parse_grades(GRADES_PAGE).unwrap();
        let report = &grades["74382"];
        assert_eq!(report.letter, "A-");
        assert_eq!(report.units_enrolled, 4.0);
        assert_eq!(report.grade_points, 14.8);
    }

    #[tokio::test]
    async fn enrolled_crns_walks_select_store_fetch() {
        let transport = ScriptedTransport::new(vec![
            response("https://sis.example.edu/owa_service/owa/bwskflib.P_SelDefTerm", TERM_SELECT_PAGE),
            response("https://sis.example.edu/owa_service/owa/bwcklibs.P_StoreTerm", "<html>stored</html>"),
            response("https://sis.example.edu/owa_service/owa/bwskfshd.P_CrseSchdDetl", SCHEDULE_PAGE),
        ]);
        let records = records_over(transport.clone());

        let crns = records
            .enrolled_crns(Term::new(2024, TermSession::FallQuarter))
            .await
            .unwrap();
        assert_eq!(crns, vec!["74382".to_string(), "81001".to_string()]);

        let sent = transport.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(
            sent[1].form,
            Some(vec![("term_in".to_string(), "202410".to_string())])
        );
    }

    #[tokio::test]
    async fn unoffered_term_is_a_domain_fault() {
        let transport = ScriptedTransport::new(vec![response(
            "https://sis.example.edu/owa_service/owa/bwskflib.P_SelDefTerm",
            TERM_SELECT_PAGE,
        )]);
        let records = records_over(transport);

        let err = records
            .enrolled_crns(Term::new(1999, TermSession::FallQuarter))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PortalError::Domain(DomainFault::TermUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn session_stub_triggers_exactly_one_refetch() {
        let stub = r#"<html><meta http-equiv="refresh" content="0;url=/owa_service/owa/bwskflib.P_SelDefTerm"></html>"#;
        let transport = ScriptedTransport::new(vec![
            response("https://sis.example.edu/owa_service/owa/bwskflib.P_SelDefTerm", stub),
            response("https://sis.example.edu/owa_service/owa/bwskflib.P_SelDefTerm", TERM_SELECT_PAGE),
        ]);
        let records = records_over(transport.clone());

        let terms = records.terms_enrolled().await.unwrap();
        assert_eq!(terms.len(), 3);
        assert_eq!(transport.sent().len(), 2);
    }
}
