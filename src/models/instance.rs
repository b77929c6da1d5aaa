use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::models::Course;

pub const MIN_SEMESTER: u8 = 1;
pub const MAX_SEMESTER: u8 = 8;

/// Semester number as it travels on the wire, always within 1..=8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Semester(u8);

impl Semester {
    pub const SPRING: Semester = Semester(1);
    pub const SUMMER: Semester = Semester(2);
    pub const FALL: Semester = Semester(3);

    pub fn new(value: u8) -> Result<Self, InvalidSemester> {
        if (MIN_SEMESTER..=MAX_SEMESTER).contains(&value) {
            Ok(Semester(value))
        } else {
            Err(InvalidSemester(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Term of a three-term academic year containing `date`.
    pub fn for_date(date: NaiveDate) -> Self {
        match date.month() {
            1..=5 => Semester::SPRING,
            6..=7 => Semester::SUMMER,
            _ => Semester::FALL,
        }
    }

    pub fn label(self) -> String {
        match self.0 {
            1 => "Spring".to_string(),
            2 => "Summer".to_string(),
            3 => "Fall".to_string(),
            n => format!("Semester {}", n),
        }
    }

    pub fn all() -> impl Iterator<Item = Semester> {
        (MIN_SEMESTER..=MAX_SEMESTER).map(Semester)
    }
}

impl TryFrom<u8> for Semester {
    type Error = InvalidSemester;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Semester::new(value)
    }
}

impl From<Semester> for u8 {
    fn from(value: Semester) -> Self {
        value.0
    }
}

impl fmt::Display for Semester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("semester must be between 1 and 8, got {0}")]
pub struct InvalidSemester(pub u8);

/// A `(year, semester)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AcademicPeriod {
    pub year: i32,
    pub semester: Semester,
}

impl AcademicPeriod {
    pub fn new(year: i32, semester: Semester) -> Self {
        Self { year, semester }
    }

    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            semester: Semester::for_date(date),
        }
    }

    pub fn current() -> Self {
        Self::for_date(chrono::Local::now().date_naive())
    }
}

impl fmt::Display for AcademicPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.year, self.semester)
    }
}

/// A course offered in a given period. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseInstance {
    pub course_id: String,
    pub year: i32,
    pub semester: Semester,
    /// Some servers embed the referenced course.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<Course>,
}

impl CourseInstance {
    pub fn period(&self) -> AcademicPeriod {
        AcademicPeriod::new(self.year, self.semester)
    }

    pub fn id(&self) -> InstanceId {
        InstanceId {
            year: self.year,
            semester: self.semester,
            course_id: self.course_id.clone(),
        }
    }

    pub fn course_title(&self) -> Option<&str> {
        self.course.as_ref().map(|c| c.title.as_str())
    }
}

/// Composite identity of a course instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId {
    pub year: i32,
    pub semester: Semester,
    pub course_id: String,
}

impl InstanceId {
    pub fn new(year: i32, semester: Semester, course_id: impl Into<String>) -> Self {
        Self {
            year,
            semester,
            course_id: course_id.into(),
        }
    }

    pub fn period(&self) -> AcademicPeriod {
        AcademicPeriod::new(self.year, self.semester)
    }
}

/// Payload for `POST /instance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInstanceRequest {
    pub course_id: String,
    pub year: i32,
    pub semester: u8,
}

impl NewInstanceRequest {
    pub fn new(course_id: impl Into<String>, year: i32, semester: u8) -> Self {
        Self {
            course_id: course_id.into(),
            year,
            semester,
        }
    }
}
