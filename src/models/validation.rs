use std::fmt;

use crate::models::{Course, InstanceId, NewInstanceRequest, Semester};

pub const MAX_COURSE_ID_LEN: usize = 10;
pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 500;
pub const MIN_YEAR: i32 = 1900;
pub const MAX_YEAR: i32 = 2100;

const SEMESTER_RANGE: &str = "Semester must be between 1 and 8";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Every field problem found in one submission.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn for_field(&self, field: &str) -> Option<&str> {
        self.errors
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    fn into_result<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "Validation failed: {}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

fn validate_course_id(errors: &mut ValidationErrors, course_id: &str) {
    if course_id.is_empty() {
        errors.push("courseId", "Course ID is required");
    } else if !course_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        errors.push("courseId", "Only letters, numbers, and hyphens are allowed");
    } else if course_id.chars().count() > MAX_COURSE_ID_LEN {
        errors.push("courseId", "Course ID must be at most 10 characters");
    }
}

/// Checks a course form and returns it normalized: trimmed fields and
/// blank prerequisite entries removed.
pub fn validate_course(course: Course) -> Result<Course, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let course_id = course.course_id.trim().to_string();
    let title = course.title.trim().to_string();
    let description = course
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());
    let prerequisite_ids: Vec<String> = course
        .prerequisite_ids
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();

    validate_course_id(&mut errors, &course_id);

    if title.is_empty() {
        errors.push("title", "Title is required");
    } else if title.chars().count() > MAX_TITLE_LEN {
        errors.push("title", "Title must be at most 100 characters");
    }

    if let Some(d) = &description {
        if d.chars().count() > MAX_DESCRIPTION_LEN {
            errors.push("description", "Description must be at most 500 characters");
        }
    }

    if !course_id.is_empty() && prerequisite_ids.iter().any(|id| *id == course_id) {
        errors.push("prerequisiteIds", "A course cannot be its own prerequisite");
    }

    errors.into_result(Course {
        course_id,
        title,
        description,
        prerequisite_ids,
    })
}

pub fn validate_instance(req: NewInstanceRequest) -> Result<NewInstanceRequest, ValidationErrors> {
    let mut errors = ValidationErrors::default();
    let course_id = req.course_id.trim().to_string();

    if course_id.is_empty() {
        errors.push("courseId", "Course is required");
    }
    if !(MIN_YEAR..=MAX_YEAR).contains(&req.year) {
        errors.push("year", format!("Year must be between {} and {}", MIN_YEAR, MAX_YEAR));
    }
    if Semester::new(req.semester).is_err() {
        errors.push("semester", SEMESTER_RANGE);
    }

    errors.into_result(NewInstanceRequest {
        course_id,
        year: req.year,
        semester: req.semester,
    })
}

/// Checks a course id that will be sent as a path segment. The value is
/// checked as given, without trimming.
pub fn validate_course_key(course_id: &str) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    validate_course_id(&mut errors, course_id);
    errors.into_result(())
}

pub fn validate_instance_id(id: &InstanceId) -> Result<(), ValidationErrors> {
    validate_course_key(&id.course_id)
}

pub fn validate_semester(value: u8) -> Result<Semester, ValidationErrors> {
    Semester::new(value).map_err(|_| {
        let mut errors = ValidationErrors::default();
        errors.push("semester", SEMESTER_RANGE);
        errors
    })
}
