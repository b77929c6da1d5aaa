use tracing::{debug, info};

use crate::error::ApiError;
use crate::http::{ApiPath, HttpClient, RequestOptions};
use crate::models::Course;
use crate::services::normalize::{into_list, into_one};

/// Typed operations on `/course` endpoints. Holds no state of its own.
#[derive(Clone)]
pub struct CourseService {
    http: HttpClient,
}

impl CourseService {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    pub async fn list_courses(&self) -> Result<Vec<Course>, ApiError> {
        debug!("fetching all courses");
        match self
            .http
            .get("/getAll/course", RequestOptions::new().allow_not_found())
            .await
        {
            Ok(body) => into_list(body),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e.or_message("Failed to load courses")),
        }
    }

    pub async fn get_course(&self, course_id: &str) -> Result<Course, ApiError> {
        debug!("fetching course {}", course_id);
        let body = self
            .http
            .get(ApiPath::new("/getById/course").segment(course_id), RequestOptions::new())
            .await
            .map_err(|e| e.or_message("Failed to load course"))?;

        into_one(body)?.ok_or_else(|| ApiError::Client {
            status: 404,
            message: Some(format!("Course {} not found", course_id)),
        })
    }

    pub async fn create_course(&self, course: &Course) -> Result<Course, ApiError> {
        info!("creating course {}", course.course_id);
        let body = self
            .http
            .post("/course", RequestOptions::new().json(course)?)
            .await
            .map_err(|e| e.or_message("Failed to create course"))?;

        Ok(into_one(body)?.unwrap_or_else(|| course.clone()))
    }

    /// Full-record update.
    pub async fn update_course(&self, course_id: &str, course: &Course) -> Result<Course, ApiError> {
        info!("updating course {}", course_id);
        let body = self
            .http
            .put(
                ApiPath::new("/update/course").segment(course_id),
                RequestOptions::new().json(course)?,
            )
            .await
            .map_err(|e| e.or_message("Failed to update course"))?;

        Ok(into_one(body)?.unwrap_or_else(|| course.clone()))
    }

    pub async fn delete_course(&self, course_id: &str) -> Result<(), ApiError> {
        info!("deleting course {}", course_id);
        self.http
            .delete(ApiPath::new("/delete/course").segment(course_id), RequestOptions::new())
            .await
            .map_err(|e| e.or_message("Failed to delete course"))?;
        Ok(())
    }
}
