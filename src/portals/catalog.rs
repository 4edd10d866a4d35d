//! Public course catalog (no authentication required).
//!
//! Two page shapes: a search results table that only yields reference
//! numbers, and a per-course detail page that carries the full record. The
//! search endpoint rejects broad queries with an inline prose marker, and
//! the detail endpoint flags a bad crn/term pair with an inline script
//! alert — both surface as domain faults, never as parse errors.

use std::sync::Arc;

use chrono::{NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::classify::{ClassifyRules, classify_response};
use crate::config::PortalConfig;
use crate::error::{DomainFault, PortalError, PortalResult};
use crate::models::{Course, DropPolicy, FinalExam, Meeting, Term, Units};
use crate::session::identity::Identity;
use crate::session::transport::{PortalRequest, Transport};

const COURSE_DETAIL_ENDPOINT: &str = "/courses/search/course.cfm";
const COURSE_SEARCH_ENDPOINT: &str = "/courses/search/course_search_results.cfm";

/// Weekday codes the search form accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Day {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Day {
    fn form_value(self) -> &'static str {
        match self {
            Day::Monday => "M",
            Day::Tuesday => "T",
            Day::Wednesday => "W",
            Day::Thursday => "TR",
            Day::Friday => "F",
            Day::Saturday => "S",
        }
    }
}

/// Course level buckets offered by the search form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    LowerDivision,
    UpperDivision100,
    UpperDivision200,
    UpperDivision300,
}

impl Level {
    fn form_value(self) -> &'static str {
        match self {
            Level::LowerDivision => "001-099",
            Level::UpperDivision100 => "100-199",
            Level::UpperDivision200 => "200-299",
            Level::UpperDivision300 => "300-399",
        }
    }
}

/// General-education areas, with the form field each one toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeArea {
    ArtsHumanities,
    ScienceEngineering,
    SocialSciences,
    AmericanCultureGovernmentHistory,
    DomesticDiversity,
    OralLiteracy,
    QuantitativeLiteracy,
    ScientificLiteracy,
    VisualLiteracy,
    WorldCulture,
    WritingExperience,
}

impl GeArea {
    fn form_field(self) -> &'static str {
        match self {
            GeArea::ArtsHumanities => "G3AH",
            GeArea::ScienceEngineering => "G3SE",
            GeArea::SocialSciences => "G3SS",
            GeArea::AmericanCultureGovernmentHistory => "G3CGH",
            GeArea::DomesticDiversity => "G3DD",
            GeArea::OralLiteracy => "G3O",
            GeArea::QuantitativeLiteracy => "G3Q",
            GeArea::ScientificLiteracy => "G3S",
            GeArea::VisualLiteracy => "G3V",
            GeArea::WorldCulture => "G3WC",
            GeArea::WritingExperience => "G3W",
        }
    }
}

/// Search parameters. Unset fields are simply left out of the form.
#[derive(Debug, Clone, Default)]
pub struct CatalogQuery {
    /// Five-digit reference number; takes precedence over `course_name`
    /// (the form carries both in one field).
    pub crn: Option<String>,
    /// Partial or complete course name, e.g. `ASA` or `ASA 001`.
    pub course_name: Option<String>,
    pub title: Option<String>,
    /// Instructor first *or* last name.
    pub instructor: Option<String>,
    pub subject: Option<String>,
    /// Earliest desired start, hour in 24h format.
    pub start: Option<u8>,
    /// Latest desired end, hour in 24h format.
    pub end: Option<u8>,
    pub days: Vec<Day>,
    pub only_open: bool,
    pub level: Option<Level>,
    /// Unit count, 1..=9.
    pub units: Option<u8>,
    pub only_virtual: bool,
    pub ge_areas: Vec<GeArea>,
}

impl CatalogQuery {
    /// Map the query onto the registrar's form field names.
    fn to_form(&self, term: Term) -> Vec<(String, String)> {
        let mut form: Vec<(String, String)> = Vec::new();
        let mut push = |key: &str, value: String| form.push((key.to_string(), value));

        push("termYear", term.year.to_string());
        push("term", term.session.code().to_string());

        if let Some(ref crn) = self.crn {
            push("course_number", crn.clone());
        } else if let Some(ref name) = self.course_name {
            push("course_number", name.clone());
        }
        if let Some(ref title) = self.title {
            push("course_title", title.clone());
        }
        if let Some(ref instructor) = self.instructor {
            push("instructor", instructor.clone());
        }
        if let Some(ref subject) = self.subject {
            push("subject", subject.clone());
        }

        // Morning sections start on the hour; afternoon sections start ten
        // minutes past. The inverse holds for end times.
        if let Some(start) = self.start {
            push("course_start_eval", "After".into());
            if start < 12 {
                push("course_start_time", format!("{start}:00"));
            } else {
                push("course_start_time", format!("{start}:10"));
            }
        }
        if let Some(end) = self.end {
            push("course_end_eval", "Before".into());
            if end < 12 {
                push("course_end_time", format!("{}:50", end - 1));
            } else {
                push("course_end_time", format!("{end}:00"));
            }
        }

        for day in &self.days {
            push("days", day.form_value().into());
        }
        if self.only_open {
            push("course_status", "Open".into());
        }
        if let Some(level) = self.level {
            push("course_level", level.form_value().into());
        }
        if let Some(units) = self.units {
            push("course_units", units.to_string());
        }
        if self.only_virtual {
            push("virtual", "Y".into());
        }
        for area in &self.ge_areas {
            push(area.form_field(), "Y".into());
        }

        form
    }
}

pub struct Catalog {
    transport: Arc<dyn Transport>,
    base: Url,
    search_rules: ClassifyRules,
    detail_rules: ClassifyRules,
}

impl Catalog {
    pub fn new(transport: Arc<dyn Transport>, config: &PortalConfig) -> Self {
        Self {
            transport,
            base: config.catalog_base.clone(),
            search_rules: ClassifyRules::open()
                .with_domain_marker("Please refine your search", DomainFault::QueryTooBroad),
            // The catalog flags a bad crn/term lookup with a script alert.
            detail_rules: ClassifyRules::open()
                .with_domain_marker("alert(", DomainFault::InvalidCrnOrTerm),
        }
    }

    /// Reuse an identity's transport so catalog lookups share its
    /// connection pool and cookies.
    pub fn for_identity(identity: &Identity, config: &PortalConfig) -> Self {
        Self::new(identity.transport().clone(), config)
    }

    /// Full record for one course.
    pub async fn course_detail(&self, term: Term, crn: &str) -> PortalResult<Course> {
        let request = PortalRequest::get(self.endpoint(COURSE_DETAIL_ENDPOINT)?)
            .with_query("crn", crn)
            .with_query("termCode", term.code());
        let response = self.transport.send(&request).await?;
        classify_response(&response, &self.detail_rules).into_result()?;

        let mut course = parse_course_detail(&response.text())?;
        course.crn = crn.to_string();
        course.term = Some(term);
        Ok(course)
    }

    /// Reference numbers matching the query.
    pub async fn course_query(&self, term: Term, query: &CatalogQuery) -> PortalResult<Vec<String>> {
        let request = PortalRequest::post_form(
            self.endpoint(COURSE_SEARCH_ENDPOINT)?,
            query.to_form(term),
        );
        let response = self.transport.send(&request).await?;
        classify_response(&response, &self.search_rules).into_result()?;
        Ok(parse_search_crns(&response.text()))
    }

    /// Search, then fill every hit with a detail fetch.
    pub async fn courses(&self, term: Term, query: &CatalogQuery) -> PortalResult<Vec<Course>> {
        let crns = self.course_query(term, query).await?;
        let mut courses = Vec::with_capacity(crns.len());
        for crn in crns {
            courses.push(self.course_detail(term, &crn).await?);
        }
        Ok(courses)
    }

    fn endpoint(&self, path: &str) -> PortalResult<Url> {
        Ok(Url::parse(&format!("{}{}", self.base, path))?)
    }
}

/// CRNs appear as the leading digits of `<strong>` cells in the results
/// table.
fn parse_search_crns(body: &str) -> Vec<String> {
    static LEADING_DIGITS: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^\d+").expect("leading digit regex"));

    let document = Html::parse_document(body);
    let strong_cell = selector("tr td strong");

    let mut crns = Vec::new();
    for strong in document.select(&strong_cell) {
        let text = cell_text(&strong);
        if let Some(found) = LEADING_DIGITS.find(&text) {
            crns.push(found.as_str().to_string());
        }
    }
    crns
}

/// Parse the course detail page into a (term-less) course record.
fn parse_course_detail(body: &str) -> PortalResult<Course> {
    let document = Html::parse_document(body);
    let mut course = Course::default();

    let header = document
        .select(&selector("h1"))
        .next()
        .ok_or_else(|| PortalError::MalformedPage("missing course header".into()))?;
    let name = header
        .select(&selector("strong"))
        .next()
        .map(|strong| cell_text(&strong))
        .ok_or_else(|| PortalError::MalformedPage("missing course name".into()))?;
    // The header reads `<strong>ECS 040 A01</strong> - Intro to Programming`.
    let full_header = cell_text(&header);
    let title = full_header
        .strip_prefix(&name)
        .unwrap_or("")
        .trim_start_matches([' ', '-'])
        .trim()
        .to_string();
    course.section = name.split(' ').nth(2).map(str::to_string);
    course.name = Some(name);
    if !title.is_empty() {
        course.title = Some(title);
    }

    for cell in document.select(&selector("td")) {
        let Some(label_el) = cell.select(&selector("strong")).next() else {
            continue;
        };
        let label = cell_text(&label_el);
        let value = cell_value_after_label(&cell, &label);

        match label.as_str() {
            "Subject Area:" => course.subject = Some(value),
            "Instructor:" => course.instructor = Some(value),
            "Units:" => course.units = parse_detail_units(&value),
            "Available Seats:" => course.available_seats = value.parse().ok(),
            "Maximum Enrollment:" => course.max_enrollment = value.parse().ok(),
            "Final Exam:" => course.final_exam = Some(parse_final_exam(&value)),
            "Description:" => course.description = Some(value),
            "Course Drop:" => course.drop_policy = Some(DropPolicy::parse(&value)),
            other if other.contains("New GE Credit") => {
                course.ge_areas = cell
                    .text()
                    .map(str::trim)
                    .filter(|text| !text.is_empty() && !text.contains("New GE Credit"))
                    .map(str::to_string)
                    .collect();
            }
            _ => {}
        }
    }

    course.meetings = parse_meetings(&document);
    Ok(course)
}

/// Text of a key/value cell with the `<strong>` label stripped and the
/// whitespace collapsed.
fn cell_value_after_label(cell: &ElementRef<'_>, label: &str) -> String {
    let full = cell.text().collect::<String>();
    let value = full.replacen(label, "", 1);
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_detail_units(value: &str) -> Option<Units> {
    if let Ok(fixed) = value.parse::<f32>() {
        return Some(Units::Fixed(fixed));
    }
    // Variable-unit courses read `1 TO 5`.
    let mut bounds = value.split(" TO ");
    let low: f32 = bounds.next()?.trim().parse().ok()?;
    let high: f32 = bounds.next()?.trim().parse().ok()?;
    Some(Units::range(low, high))
}

/// `Friday, June 13 at 1:00 PM` style, year-less; anything unparseable is
/// "see instructor".
fn parse_final_exam(value: &str) -> FinalExam {
    static EXAM_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?P<month>[A-Z][a-z]+) (?P<day>\d{1,2}) at (?P<time>\d{1,2}:\d{2} [AP]M)")
            .expect("final exam regex")
    });
    let Some(caps) = EXAM_RE.captures(value) else {
        return FinalExam::SeeInstructor;
    };
    // The page omits the year; borrow a leap-safe placeholder so the
    // month/day/time survive. Callers combine with the term's year.
    let stamp = format!("2000 {} {} {}", &caps["month"], &caps["day"], &caps["time"]);
    match NaiveDateTime::parse_from_str(&stamp, "%Y %B %d %I:%M %p") {
        Ok(instant) => FinalExam::At(instant),
        Err(_) => FinalExam::SeeInstructor,
    }
}

/// The second table on the page lists meetings as days / hours / location.
fn parse_meetings(document: &Html) -> Vec<Meeting> {
    let table = selector("table");
    let row = selector("tr");
    let cell = selector("td");

    let Some(meeting_table) = document.select(&table).nth(1) else {
        return Vec::new();
    };

    let mut meetings = Vec::new();
    for meeting_row in meeting_table.select(&row).skip(1) {
        let cells: Vec<String> = meeting_row.select(&cell).map(|c| cell_text(&c)).collect();
        if cells.len() < 3 {
            continue;
        }
        let (start, end) = parse_meeting_hours(&cells[1]);
        meetings.push(Meeting {
            days: cells[0].clone(),
            start,
            end,
            location: cells[2].clone(),
            kind: None,
        });
    }
    meetings
}

/// `10:00 - 11:50 AM` → start/end times; TBA and friends stay unset.
fn parse_meeting_hours(hours: &str) -> (Option<NaiveTime>, Option<NaiveTime>) {
    static HOURS_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?P<start>\d{1,2}:\d{2})\s*-\s*(?P<end>\d{1,2}:\d{2})\s*(?P<ap>[AP]M)?")
            .expect("meeting hours regex")
    });
    let Some(caps) = HOURS_RE.captures(hours) else {
        return (None, None);
    };
    let meridiem = caps.name("ap").map(|m| m.as_str()).unwrap_or("AM");
    let parse = |clock: &str| {
        NaiveTime::parse_from_str(&format!("{clock} {meridiem}"), "%I:%M %p").ok()
    };
    (parse(&caps["start"]), parse(&caps["end"]))
}

fn cell_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|err| panic!("invalid selector `{css}`: {err:?}"))
}
