//! Schedule builder portal: course search, saved schedules, pass times,
//! and registration.
//!
//! Every data-bearing endpoint here is term-sensitive — the server renders
//! for whichever term was last selected on the session — so the client
//! routes term-scoped calls through a [`TermNavigator`] bound to the home
//! endpoint. Most state lives in inline script literals rather than markup;
//! the extractors below scan for the fixed script shapes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use url::Url;

use crate::config::PortalConfig;
use crate::error::{DomainFault, PortalError, PortalResult};
use crate::models::{Course, DropPolicy, FinalExam, Meeting, ScheduleEntry, Term, Units};
use crate::navigator::TermNavigator;
use crate::schedule::{check_registration, execute_at};
use crate::session::cas::{CasAuthenticator, CasConfig};
use crate::session::guard::SessionGuard;
use crate::session::identity::Identity;
use crate::session::transport::PortalRequest;

const HOME_ENDPOINT: &str = "/index.cfm";
const COURSE_SEARCH_ENDPOINT: &str = "/course_search/course_search_results.cfm";
const REGISTER_ENDPOINT: &str = "/addCourseRegistration.cfm";
const ADD_COURSE_ENDPOINT: &str = "/addCourseToSchedule.cfm";
const REMOVE_COURSE_ENDPOINT: &str = "/removeCourseFromSchedule.cfm";

/// Query parameter selecting the term context on the home endpoint.
const TERM_PARAM: &str = "termCode";

/// GE area names keyed by the short codes the search payload uses.
const GE_AREA_NAMES: &[(&str, &str)] = &[
    ("AH", "Arts & Humanities"),
    ("SE", "Science & Engineering"),
    ("SS", "Social Sciences"),
    ("ACGH", "American Cultures, Governance & History"),
    ("DD", "Domestic Diversity"),
    ("OL", "Oral Literacy"),
    ("QL", "Quantitative Literacy"),
    ("SL", "Scientific Literacy"),
    ("VL", "Visual Literacy"),
    ("WC", "World Cultures"),
    ("WE", "Writing Experience"),
];

/// Search parameters for the builder's JSON course search.
///
/// The form wants `-` placeholders for unset selects; `to_form` fills
/// those in.
#[derive(Debug, Clone, Default)]
pub struct BuilderQuery {
    pub course_number: Option<String>,
    /// Subject short code, length 3.
    pub subject: Option<String>,
    /// Instructor first *or* last name — the portal cannot search full
    /// names.
    pub instructor: Option<String>,
    /// Start/end bounds in the portal's own `H:MM` form notation.
    pub start: Option<String>,
    pub end: Option<String>,
    /// Unit range string, e.g. `001-099`.
    pub level: Option<String>,
    pub units: Option<u8>,
}

impl BuilderQuery {
    fn to_form(&self, term: Term) -> Vec<(String, String)> {
        let field = |value: &Option<String>| value.clone().unwrap_or_default();
        let select = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".into());

        vec![
            ("course_number".into(), field(&self.course_number)),
            ("subject".into(), field(&self.subject)),
            ("instructor".into(), field(&self.instructor)),
            ("course_start_eval".into(), "After".into()),
            ("course_start_time".into(), select(&self.start)),
            ("course_end_eval".into(), "Before".into()),
            ("course_end_time".into(), select(&self.end)),
            ("course_level".into(), select(&self.level)),
            (
                "course_units".into(),
                self.units
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "-".into()),
            ),
            ("course_status".into(), "ALL".into()),
            ("sortBy".into(), String::new()),
            ("showMe".into(), String::new()),
            ("runMe".into(), "1".into()),
            ("clearMe".into(), "1".into()),
            (TERM_PARAM.into(), term.code()),
            ("expandFilters".into(), String::new()),
        ]
    }
}

pub struct ScheduleBuilder {
    guard: Arc<SessionGuard>,
    navigator: TermNavigator,
    base: Url,
}

impl ScheduleBuilder {
    pub fn new(identity: Arc<Identity>, config: &PortalConfig) -> PortalResult<Self> {
        let cas = CasAuthenticator::new(CasConfig::new(config.cas_login.clone()));
        let guard = Arc::new(SessionGuard::new(identity, cas));
        Self::with_guard(guard, config.builder_base.clone())
    }

    pub fn with_guard(guard: Arc<SessionGuard>, base: Url) -> PortalResult<Self> {
        let home = Url::parse(&format!("{base}{HOME_ENDPOINT}"))?;
        let navigator = TermNavigator::new(guard.clone(), home, TERM_PARAM);
        Ok(Self {
            guard,
            navigator,
            base,
        })
    }

    /// Run the JSON course search and build full course records.
    pub async fn course_query(&self, term: Term, query: &BuilderQuery) -> PortalResult<Vec<Course>> {
        self.navigator.ensure(term).await?;

        let request = PortalRequest::post_form(
            self.endpoint(COURSE_SEARCH_ENDPOINT)?,
            query.to_form(term),
        );
        let mut payload: Value = self.guard.perform(request.clone()).await?.json()?;
        if payload.get("Results").is_none() {
            // The search endpoint intermittently answers with an empty
            // shell on the first hit of a fresh session; one more try
            // settles it.
            log::debug!("search payload missing Results; retrying once");
            payload = self.guard.perform(request).await?.json()?;
        }
        let results = payload.get("Results").ok_or_else(|| {
            PortalError::MalformedPage("search payload carries no Results".into())
        })?;

        normalize_query_rows(results)?
            .iter()
            .map(|row| course_from_row(term, row))
            .collect()
    }

    /// Reference numbers currently registered or waitlisted for `term`.
    pub async fn registered_crns(&self, term: Term) -> PortalResult<Vec<String>> {
        static STATUS_RE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r#"CourseDetails\.t(.+?)\.REGISTRATION_STATUS = "(?:Registered|Waitlisted)""#)
                .expect("registration status regex")
        });

        let response = self.guard.perform(self.home_request(term)?).await?;
        let body = response.text();
        Ok(STATUS_RE
            .captures_iter(&body)
            .map(|caps| caps[1].to_string())
            .collect())
    }

    /// Registration pass times for `term`, or `None` when the portal has
    /// not published them yet.
    pub async fn pass_times(
        &self,
        term: Term,
    ) -> PortalResult<Option<(NaiveDateTime, NaiveDateTime)>> {
        static PASS_TIME_RE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r#""PassTime1":new Date\((.+?)\),"PassTime2":new Date\((.+?)\)\}"#)
                .expect("pass time regex")
        });

        let response = self.guard.perform(self.home_request(term)?).await?;
        let body = response.text();
        let Some(caps) = PASS_TIME_RE.captures(&body) else {
            return Ok(None);
        };

        match (parse_js_date(&caps[1]), parse_js_date(&caps[2])) {
            (Some(first), Some(second)) => Ok(Some((first, second))),
            _ => Err(PortalError::MalformedPage(
                "pass time literal no longer parses".into(),
            )),
        }
    }

    /// Saved schedules for `term`: name to schedule entries.
    pub async fn schedules(&self, term: Term) -> PortalResult<HashMap<String, Vec<ScheduleEntry>>> {
        static NAME_RE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r#"Schedules\[Schedules\.length\] = \{"Name":"(.+?)""#)
                .expect("schedule name regex")
        });
        static COURSE_RE: Lazy<Regex> = Lazy::new(|| {
            RegexBuilder::new(
                r#"Schedules\[Schedules\.length - 1\]\.SelectedList\.t([0-9A-Z]+) =.+?"UNITS":"([0-9])""#,
            )
            .dot_matches_new_line(true)
            .build()
            .expect("schedule course regex")
        });

        let response = self.guard.perform(self.home_request(term)?).await?;
        let body = response.text();

        let name_matches: Vec<_> = NAME_RE.captures_iter(&body).collect();
        let mut schedules = HashMap::new();
        for (idx, caps) in name_matches.iter().enumerate() {
            let name = html_escape::decode_html_entities(&caps[1]).to_string();
            let block_start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            let block_end = name_matches
                .get(idx + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(body.len());

            let entries = COURSE_RE
                .captures_iter(&body[block_start..block_end])
                .map(|course| ScheduleEntry {
                    crn: course[1].to_string(),
                    units: course[2].parse().unwrap_or(0),
                })
                .collect();
            schedules.insert(name, entries);
        }
        Ok(schedules)
    }

    /// Add a course to a saved schedule.
    pub async fn add_course(&self, term: Term, schedule: &str, crn: &str) -> PortalResult<()> {
        let request = self.roster_request(ADD_COURSE_ENDPOINT, term, schedule, crn)?;
        self.navigator
            .visit(term, || self.guard.perform(request))
            .await?;
        Ok(())
    }

    /// Remove a course from a saved schedule.
    pub async fn remove_course(&self, term: Term, schedule: &str, crn: &str) -> PortalResult<()> {
        let request = self.roster_request(REMOVE_COURSE_ENDPOINT, term, schedule, crn)?;
        self.navigator
            .visit(term, || self.guard.perform(request))
            .await?;
        Ok(())
    }

    /// Register every course in the named saved schedule.
    pub async fn register_schedule(
        &self,
        term: Term,
        schedule: &str,
        allow_waitlisting: bool,
        at: Option<DateTime<Local>>,
    ) -> PortalResult<()> {
        let mut schedules = self.schedules(term).await?;
        let entries = schedules
            .remove(schedule)
            .ok_or_else(|| DomainFault::UnknownSchedule(schedule.to_string()))?;
        self.register_courses(term, schedule, &entries, allow_waitlisting, at)
            .await
    }

    /// Register the given entries, optionally waiting until `at` (a pass
    /// time) before firing.
    ///
    /// The wait happens before the identity lock is taken, so other traffic
    /// on the identity proceeds while the registration sits parked. The
    /// outcome is classified against the portal's known failure markers;
    /// anything else is best-effort success (the portal never confirms
    /// positively).
    pub async fn register_courses(
        &self,
        term: Term,
        schedule: &str,
        entries: &[ScheduleEntry],
        allow_waitlisting: bool,
        at: Option<DateTime<Local>>,
    ) -> PortalResult<()> {
        if entries.is_empty() {
            log::debug!("no entries to register for {term}; skipping");
            return Ok(());
        }
        self.navigator.ensure(term).await?;

        let crns = entries
            .iter()
            .map(|entry| entry.crn.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let units = entries
            .iter()
            .map(|entry| entry.units.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let request = PortalRequest::get(self.endpoint(REGISTER_ENDPOINT)?)
            .with_query("Term", term.code())
            .with_query("CourseCRNs", crns)
            .with_query("Schedule", schedule)
            .with_query("WaitlistedFlags", if allow_waitlisting { "Y" } else { "N" })
            .with_query("Units", units)
            .with_query("ShowDebug", "0")
            .with_query("_", cache_buster());

        let response = match at {
            Some(at) => execute_at(at, || self.guard.perform(request)).await?,
            None => self.guard.perform(request).await?,
        };
        check_registration(&response)
    }

    fn home_request(&self, term: Term) -> PortalResult<PortalRequest> {
        Ok(PortalRequest::get(self.endpoint(HOME_ENDPOINT)?)
            .with_query(TERM_PARAM, term.code()))
    }

    fn roster_request(
        &self,
        endpoint: &str,
        term: Term,
        schedule: &str,
        crn: &str,
    ) -> PortalResult<PortalRequest> {
        Ok(PortalRequest::get(self.endpoint(endpoint)?)
            .with_query("Term", term.code())
            .with_query("Schedule", schedule)
            .with_query("CourseID", crn)
            .with_query("ShowDebug", "0")
            .with_query("_", cache_buster()))
    }

    fn endpoint(&self, path: &str) -> PortalResult<Url> {
        Ok(Url::parse(&format!("{}{}", self.base, path))?)
    }
}

/// Millisecond timestamp the portal's own frontend appends to defeat
/// caches.
fn cache_buster() -> String {
    Utc::now().timestamp_millis().to_string()
}

/// Reshape the column/row search payload into one map per course, decoding
/// embedded `{"QUERY": …}` string payloads recursively.
fn normalize_query_rows(results: &Value) -> PortalResult<Vec<serde_json::Map<String, Value>>> {
    let columns: Vec<&str> = results
        .get("COLUMNS")
        .and_then(Value::as_array)
        .ok_or_else(|| PortalError::MalformedPage("search payload carries no COLUMNS".into()))?
        .iter()
        .filter_map(Value::as_str)
        .collect();
    let data = results
        .get("DATA")
        .and_then(Value::as_array)
        .ok_or_else(|| PortalError::MalformedPage("search payload carries no DATA".into()))?;

    let mut rows = Vec::with_capacity(data.len());
    for row in data {
        let values = row
            .as_array()
            .ok_or_else(|| PortalError::MalformedPage("search row is not an array".into()))?;
        let mut normalized = serde_json::Map::new();
        for (column, value) in columns.iter().zip(values) {
            let value = match value.as_str() {
                Some(text) if text.starts_with(r#"{"QUERY":"#) => {
                    let nested: Value = serde_json::from_str(text)?;
                    let nested_rows = nested
                        .get("QUERY")
                        .map(normalize_query_rows)
                        .transpose()?
                        .unwrap_or_default();
                    Value::Array(nested_rows.into_iter().map(Value::Object).collect())
                }
                _ => value.clone(),
            };
            normalized.insert((*column).to_string(), value);
        }
        rows.push(normalized);
    }
    Ok(rows)
}

/// Build a full course record from one normalized search row.
fn course_from_row(term: Term, row: &serde_json::Map<String, Value>) -> PortalResult<Course> {
    let text = |key: &str| -> Option<String> {
        row.get(key).and_then(Value::as_str).map(str::to_string)
    };
    let number = |key: &str| -> Option<f64> {
        match row.get(key) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    };

    let crn = match row.get("PASSEDCRN") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            return Err(PortalError::MalformedPage(
                "search row carries no reference number".into(),
            ));
        }
    };
    let mut course = Course::new(crn, term);

    course.subject_code = text("SUBJECT_CODE");
    course.number = text("COURSE_NUMBER");
    course.section = text("SEC");
    course.title = text("TITLE").map(|title| title.trim().to_string());
    if let (Some(subject), Some(num)) = (&course.subject_code, &course.number) {
        course.name = Some(format!("{subject} {num}"));
    }
    course.description = text("DESCRIPTION").map(|description| {
        description.replace('\n', " ").replace('\r', "").trim().to_string()
    });
    course.instructor_consent_required =
        number("CONSENTOFINSRUCTORREQUIRED").map(|flag| flag != 0.0);

    if let (Some(low), Some(high)) = (number("UNITS_LOW"), number("UNITS_HIGH")) {
        course.units = Some(Units::range(low as f32, high as f32));
    }

    if let Some(instructors) = row.get("INSTRUCTORS").and_then(Value::as_array) {
        let primary = instructors
            .iter()
            .find(|instr| instr.get("PRIMARY_IND").and_then(Value::as_str) == Some("Y"));
        if let Some(primary) = primary {
            let first = primary.get("FIRST_NAME").and_then(Value::as_str).unwrap_or("");
            let last = primary.get("LAST_NAME").and_then(Value::as_str).unwrap_or("");
            let name = format!("{first} {last}").trim().to_string();
            if !name.is_empty() {
                course.instructor = Some(name);
            }
            course.instructor_email = primary
                .get("EMAIL")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
    }

    if let Some(codes) = text("GE3CREDIT") {
        for code in codes.split(',').filter(|code| !code.is_empty()) {
            match GE_AREA_NAMES.iter().find(|(short, _)| *short == code) {
                Some((_, name)) => course.ge_areas.push((*name).to_string()),
                None => log::warn!("unrecognized GE area code `{code}`"),
            }
        }
    }

    course.available_seats = number("BLEND_SEATS_AVAIL").map(|n| n as i32);
    course.waitlist_length = number("BLEND_WAIT_COUNT").map(|n| n as i32);

    if let Some(meetings) = row.get("COURSEMEETINGDATA").and_then(Value::as_array) {
        for meeting in meetings {
            let field =
                |key: &str| meeting.get(key).and_then(Value::as_str).unwrap_or("");
            let mut location = field("BLDG_DESC").to_string();
            let room = field("ROOM");
            if !room.is_empty() {
                location.push(' ');
                location.push_str(room);
            }
            course.meetings.push(Meeting {
                days: field("WEEKDAYS").replace(',', ""),
                start: parse_hhmm(field("BEGIN_TIME")),
                end: parse_hhmm(field("END_TIME")),
                location,
                kind: meeting
                    .get("MEET_TYPE_DESC_SHORT")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
    }

    if let Some(exam) = text("FINALEXAMSTARTDATE") {
        course.final_exam = NaiveDateTime::parse_from_str(&exam, "%B, %d %Y %H:%M:%S")
            .ok()
            .map(FinalExam::At);
    }
    course.drop_policy = text("ALLOWEDDROPDESC")
        .map(|description| DropPolicy::parse(&description));
    course.prerequisites = text("PREREQUISITES")
        .map(|prereq| prereq.split_whitespace().collect::<Vec<_>>().join(" "));

    Ok(course)
}

/// `0810`-style clock strings; empty or null means TBA.
fn parse_hhmm(raw: &str) -> Option<NaiveTime> {
    if raw.len() != 4 {
        return None;
    }
    let hours: u32 = raw[..2].parse().ok()?;
    let minutes: u32 = raw[2..].parse().ok()?;
    NaiveTime::from_hms_opt(hours, minutes, 0)
}

/// Argument list of a script `new Date(year, month, day, hour, minute)`
/// literal. Each argument may carry trailing arithmetic (the month is
/// written `8 - 1` for script consumption); the leading integer is the
/// 1-based human value.
fn parse_js_date(args: &str) -> Option<NaiveDateTime> {
    let mut parts = args.split(',').map(|part| {
        part.split_whitespace()
            .next()
            .and_then(|token| token.parse::<i64>().ok())
    });
    let mut next = || parts.next().flatten();
    let (year, month, day, hour, minute) = (next()?, next()?, next()?, next()?, next()?);

    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?
        .and_hms_opt(hour as u32, minute as u32, 0)
}
