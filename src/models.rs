//! Data containers shared by every portal client.
//!
//! The central type is [`Course`], the portal-agnostic record assembled from
//! one or more source-specific parses. Two courses are the same course iff
//! their natural key (reference number + term) matches, independent of which
//! portal filled in the remaining fields.

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::PortalError;

/// Annual term sessions and their two-digit wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TermSession {
    FallQuarter,
    FallSemester,
    SummerSession2,
    SummerSpecial,
    SummerSession1,
    SpringQuarter,
    SpringSemester,
    WinterQuarter,
}

impl TermSession {
    /// Two-digit code used by every portal to identify the session.
    pub fn code(self) -> &'static str {
        match self {
            TermSession::FallQuarter => "10",
            TermSession::FallSemester => "09",
            TermSession::SummerSession2 => "07",
            TermSession::SummerSpecial => "06",
            TermSession::SummerSession1 => "05",
            TermSession::SpringQuarter => "03",
            TermSession::SpringSemester => "02",
            TermSession::WinterQuarter => "01",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "10" => TermSession::FallQuarter,
            "09" => TermSession::FallSemester,
            "07" => TermSession::SummerSession2,
            "06" => TermSession::SummerSpecial,
            "05" => TermSession::SummerSession1,
            "03" => TermSession::SpringQuarter,
            "02" => TermSession::SpringSemester,
            "01" => TermSession::WinterQuarter,
            _ => return None,
        })
    }

    /// Loose human names accepted when building terms by hand
    /// (`"fall"`, `"summer 2"`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.trim().to_ascii_lowercase().as_str() {
            "fall" => TermSession::FallQuarter,
            "fall semester" => TermSession::FallSemester,
            "summer 2" => TermSession::SummerSession2,
            "summer special" => TermSession::SummerSpecial,
            "summer 1" => TermSession::SummerSession1,
            "spring" => TermSession::SpringQuarter,
            "spring semester" => TermSession::SpringSemester,
            "winter" => TermSession::WinterQuarter,
            _ => return None,
        })
    }
}

impl fmt::Display for TermSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TermSession::FallQuarter => "Fall Quarter",
            TermSession::FallSemester => "Fall Semester",
            TermSession::SummerSession2 => "Summer Session 2",
            TermSession::SummerSpecial => "Summer Special",
            TermSession::SummerSession1 => "Summer Session 1",
            TermSession::SpringQuarter => "Spring Quarter",
            TermSession::SpringSemester => "Spring Semester",
            TermSession::WinterQuarter => "Winter Quarter",
        };
        f.write_str(name)
    }
}

/// A term code the portals do not recognize.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unrecognized term code: {0}")]
pub struct TermCodeError(pub String);

impl From<TermCodeError> for PortalError {
    // A term select populated with codes we cannot read means the markup
    // drifted, same as any other missing anchor.
    fn from(err: TermCodeError) -> Self {
        PortalError::MalformedPage(err.to_string())
    }
}

/// An academic term, the scope key for every term-sensitive endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Term {
    pub year: u16,
    pub session: TermSession,
}

impl Term {
    pub fn new(year: u16, session: TermSession) -> Self {
        Self { year, session }
    }

    /// Six-digit wire code, e.g. `201410` for Fall Quarter 2014.
    pub fn code(&self) -> String {
        format!("{}{}", self.year, self.session.code())
    }

    /// Parse a six-digit wire code back into a term.
    pub fn from_code(code: &str) -> Result<Self, TermCodeError> {
        let (year, session) = match code.len() {
            6 => code.split_at(4),
            _ => return Err(TermCodeError(code.to_string())),
        };
        let year: u16 = year
            .parse()
            .map_err(|_| TermCodeError(code.to_string()))?;
        let session =
            TermSession::from_code(session).ok_or_else(|| TermCodeError(code.to_string()))?;
        Ok(Self { year, session })
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.session, self.year)
    }
}

/// Course units: a fixed amount or a low/high range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Units {
    Fixed(f32),
    Range { low: f32, high: f32 },
}

impl Units {
    /// The search endpoint occasionally reports a range whose low bound
    /// exceeds its high bound when the actual unit count is constant;
    /// collapse that shape to a fixed amount.
    pub fn range(low: f32, high: f32) -> Self {
        if low >= high {
            Units::Fixed(low)
        } else {
            Units::Range { low, high }
        }
    }
}

/// A single course meeting slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    /// Weekday letters as the portal prints them, e.g. `MWF` or `TR`.
    pub days: String,
    /// Missing times mean the meeting is listed as TBA.
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
    pub location: String,
    /// Meeting type short code (`LEC`, `DIS`, ...) where the source has one.
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FinalExam {
    At(NaiveDateTime),
    SeeInstructor,
}

/// Drop window for a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DropPolicy {
    Days(u32),
    Other(String),
}

impl DropPolicy {
    /// Parse a drop description such as `"20 Day Drop"`; anything without a
    /// leading day count is kept verbatim.
    pub fn parse(text: &str) -> Self {
        let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
        match digits.parse() {
            Ok(days) => DropPolicy::Days(days),
            Err(_) => DropPolicy::Other(text.to_string()),
        }
    }
}

/// The unified course record.
///
/// Only `crn` and `term` are guaranteed; every other field depends on which
/// portal produced the record, and an incomplete record can be filled by a
/// supplementary detail fetch without changing its identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Course {
    /// Course reference number, e.g. `74382`.
    pub crn: String,
    pub term: Option<Term>,
    /// Subject + number, e.g. `ECS 040`.
    pub name: Option<String>,
    pub number: Option<String>,
    /// Section code, e.g. `A01`.
    pub section: Option<String>,
    pub title: Option<String>,
    pub units: Option<Units>,
    pub instructor: Option<String>,
    pub instructor_email: Option<String>,
    pub instructor_consent_required: Option<bool>,
    /// Subject short code, e.g. `ECS`.
    pub subject_code: Option<String>,
    pub subject: Option<String>,
    /// General-education areas satisfied, by human name.
    pub ge_areas: Vec<String>,
    pub available_seats: Option<i32>,
    pub max_enrollment: Option<i32>,
    pub waitlist_capacity: Option<i32>,
    pub waitlist_length: Option<i32>,
    pub crosslist_capacity: Option<i32>,
    pub crosslist_length: Option<i32>,
    pub meetings: Vec<Meeting>,
    pub description: Option<String>,
    pub final_exam: Option<FinalExam>,
    pub drop_policy: Option<DropPolicy>,
    pub prerequisites: Option<String>,
}

impl Course {
    pub fn new(crn: impl Into<String>, term: Term) -> Self {
        Self {
            crn: crn.into(),
            term: Some(term),
            ..Self::default()
        }
    }
}

impl PartialEq for Course {
    // Natural-key equality: same reference number in the same term is the
    // same course no matter which portal populated the rest.
    fn eq(&self, other: &Self) -> bool {
        self.crn == other.crn && self.term == other.term
    }
}

impl Eq for Course {}

impl Hash for Course {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.crn.hash(state);
        self.term.hash(state);
    }
}

impl fmt::Display for Course {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -- CRN {}",
            self.name.as_deref().unwrap_or("?"),
            self.title.as_deref().unwrap_or("?"),
            self.crn,
        )?;
        if let Some(term) = self.term {
            write!(f, " ({term})")?;
        }
        Ok(())
    }
}

/// Final grade line for one course in a completed term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeReport {
    pub letter: String,
    pub units_enrolled: f32,
    pub units_completed: f32,
    pub units_attempted: f32,
    pub grade_points: f32,
}

/// One course inside a saved schedule, with the unit count the registration
/// endpoint wants submitted alongside the reference number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub crn: String,
    pub units: u32,
}
