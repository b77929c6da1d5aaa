use tracing::{debug, info};

use crate::error::ApiError;
use crate::http::{ApiPath, HttpClient, RequestOptions};
use crate::models::{AcademicPeriod, CourseInstance, InstanceId, NewInstanceRequest, Semester};
use crate::services::normalize::{into_list, into_one};

/// Typed operations on `/instance` endpoints. Instances have no update.
#[derive(Clone)]
pub struct InstanceService {
    http: HttpClient,
}

impl InstanceService {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    pub async fn list_all_instances(&self) -> Result<Vec<CourseInstance>, ApiError> {
        debug!("fetching all course instances");
        self.list(ApiPath::new("/instance/getAllCourseInstance")).await
    }

    pub async fn list_instances(&self, period: AcademicPeriod) -> Result<Vec<CourseInstance>, ApiError> {
        debug!("fetching instances for {}", period);
        self.list(
            ApiPath::new("/instance")
                .segment(period.year)
                .segment(period.semester),
        )
        .await
    }

    async fn list(&self, path: ApiPath) -> Result<Vec<CourseInstance>, ApiError> {
        match self
            .http
            .get(path, RequestOptions::new().allow_not_found())
            .await
        {
            Ok(body) => into_list(body),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e.or_message("Failed to load course instances")),
        }
    }

    pub async fn get_instance(&self, id: &InstanceId) -> Result<CourseInstance, ApiError> {
        debug!("fetching instance {} for {}", id.course_id, id.period());
        let body = self
            .http
            .get(instance_path(id), RequestOptions::new())
            .await
            .map_err(|e| e.or_message("Failed to load course instance"))?;

        into_one(body)?.ok_or_else(|| instance_not_found(id))
    }

    /// Like `get_instance`, but a missing instance is `None` and sends no notice.
    pub async fn find_instance(&self, id: &InstanceId) -> Result<Option<CourseInstance>, ApiError> {
        debug!("looking up instance {} for {}", id.course_id, id.period());
        match self
            .http
            .get(instance_path(id), RequestOptions::new().allow_not_found())
            .await
        {
            Ok(body) => into_one(body),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.or_message("Failed to load course instance")),
        }
    }

    pub async fn create_instance(&self, req: &NewInstanceRequest) -> Result<CourseInstance, ApiError> {
        info!(
            "creating instance {} for {}-{}",
            req.course_id, req.year, req.semester
        );
        let body = self
            .http
            .post("/instance", RequestOptions::new().json(req)?)
            .await
            .map_err(|e| e.or_message("Failed to create instance"))?;

        match into_one(body)? {
            Some(instance) => Ok(instance),
            None => echo_instance(req),
        }
    }

    pub async fn delete_instance(&self, id: &InstanceId) -> Result<(), ApiError> {
        info!("deleting instance {} for {}", id.course_id, id.period());
        self.http
            .delete(instance_path(id), RequestOptions::new())
            .await
            .map_err(|e| e.or_message("Failed to delete instance"))?;
        Ok(())
    }
}

fn instance_path(id: &InstanceId) -> ApiPath {
    ApiPath::new("/instance")
        .segment(id.year)
        .segment(id.semester)
        .segment(&id.course_id)
}

fn instance_not_found(id: &InstanceId) -> ApiError {
    ApiError::Client {
        status: 404,
        message: Some(format!(
            "Instance {} for {} not found",
            id.course_id,
            id.period()
        )),
    }
}

fn echo_instance(req: &NewInstanceRequest) -> Result<CourseInstance, ApiError> {
    let semester = Semester::new(req.semester).map_err(|e| ApiError::Request {
        message: Some(e.to_string()),
    })?;
    Ok(CourseInstance {
        course_id: req.course_id.clone(),
        year: req.year,
        semester,
        course: None,
    })
}
