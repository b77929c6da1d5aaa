use serde::Serialize;

use crate::models::{AcademicPeriod, Course, CourseInstance};

pub const DEFAULT_PAGE_SIZE: usize = 10;

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

/// Courses whose id, title or description contain `term`, ignoring case.
pub fn filter_courses<'a>(courses: &'a [Course], term: &str) -> Vec<&'a Course> {
    let term = term.trim().to_lowercase();
    courses
        .iter()
        .filter(|c| {
            term.is_empty()
                || contains_ci(&c.course_id, &term)
                || contains_ci(&c.title, &term)
                || contains_ci(c.description_text(), &term)
        })
        .collect()
}

/// Instances whose course id or embedded course title contain `term`.
pub fn filter_instances<'a>(instances: &'a [CourseInstance], term: &str) -> Vec<&'a CourseInstance> {
    let term = term.trim().to_lowercase();
    instances
        .iter()
        .filter(|i| {
            term.is_empty()
                || contains_ci(&i.course_id, &term)
                || i.course_title().is_some_and(|t| contains_ci(t, &term))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Zero-based.
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn page_count(&self) -> usize {
        if self.per_page == 0 {
            0
        } else {
            self.total.div_ceil(self.per_page)
        }
    }
}

/// Slices page `page` (zero-based) out of `items`. Out-of-range pages are empty.
pub fn paginate<T: Clone>(items: &[T], page: usize, per_page: usize) -> Page<T> {
    let per_page = if per_page == 0 { DEFAULT_PAGE_SIZE } else { per_page };
    let start = page.saturating_mul(per_page).min(items.len());
    let end = start.saturating_add(per_page).min(items.len());
    Page {
        items: items[start..end].to_vec(),
        page,
        per_page,
        total: items.len(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseOption {
    pub id: String,
    pub label: String,
}

/// Choices for a course picker, optionally leaving one course out.
pub fn course_options(courses: &[Course], exclude: Option<&str>) -> Vec<CourseOption> {
    courses
        .iter()
        .filter(|c| exclude != Some(c.course_id.as_str()))
        .map(|c| CourseOption {
            id: c.course_id.clone(),
            label: format!("{} - {}", c.course_id, c.title),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub period: AcademicPeriod,
    pub total_courses: usize,
    pub current_period_instances: usize,
    pub total_instances: usize,
}
