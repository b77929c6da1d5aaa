use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::info;

use crate::cache::{
    KeyFilter, MutateOptions, ObserverOptions, QueryCache, QueryObserver, QueryState, ReadOptions,
    ResourceKind,
};
use crate::error::{ApiError, AppError};
use crate::http::{Notice, Notifier};
use crate::listing::DashboardStats;
use crate::models::{
    AcademicPeriod, Course, CourseInstance, InstanceId, NewInstanceRequest, Semester,
    validate_course, validate_course_key, validate_instance, validate_instance_id,
};
use crate::services::{CourseService, InstanceService};

/// Cache keys used by the catalog.
pub mod keys {
    use crate::cache::{QueryKey, ResourceKind};
    use crate::models::{AcademicPeriod, InstanceId, Semester};

    pub fn courses() -> QueryKey {
        QueryKey::new(ResourceKind::Course, ["list"])
    }

    pub fn course(course_id: &str) -> QueryKey {
        QueryKey::new(ResourceKind::Course, ["detail", course_id])
    }

    pub fn all_instances() -> QueryKey {
        QueryKey::new(ResourceKind::CourseInstance, ["all"])
    }

    pub fn instances(period: AcademicPeriod) -> QueryKey {
        QueryKey::new(
            ResourceKind::CourseInstance,
            [
                "period".to_string(),
                period.year.to_string(),
                period.semester.to_string(),
            ],
        )
    }

    pub fn instance(id: &InstanceId) -> QueryKey {
        QueryKey::new(
            ResourceKind::CourseInstance,
            [
                "detail".to_string(),
                id.year.to_string(),
                id.semester.to_string(),
                id.course_id.clone(),
            ],
        )
    }

    pub fn instance_lookup(id: &InstanceId) -> QueryKey {
        QueryKey::new(
            ResourceKind::CourseInstance,
            [
                "lookup".to_string(),
                id.year.to_string(),
                id.semester.to_string(),
                id.course_id.clone(),
            ],
        )
    }

    pub fn instances_filtered(year: Option<i32>, semester: Option<Semester>) -> QueryKey {
        let any = || "*".to_string();
        QueryKey::new(
            ResourceKind::CourseInstance,
            [
                "filtered".to_string(),
                year.map(|y| y.to_string()).unwrap_or_else(any),
                semester.map(|s| s.to_string()).unwrap_or_else(any),
            ],
        )
    }
}

type ApiFuture<T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send>>;

fn list_courses_fn(svc: CourseService) -> impl Fn() -> ApiFuture<Vec<Course>> + Send + Sync + 'static {
    move || -> ApiFuture<Vec<Course>> {
        let svc = svc.clone();
        Box::pin(async move { svc.list_courses().await })
    }
}

/// Filters of the instance list view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceFilter {
    pub year: Option<i32>,
    pub semester: Option<Semester>,
    pub search: Option<String>,
}

impl InstanceFilter {
    pub fn period(period: AcademicPeriod) -> Self {
        Self {
            year: Some(period.year),
            semester: Some(period.semester),
            search: None,
        }
    }

    fn search_term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Course and instance queries and mutations, routed through one cache.
#[derive(Clone)]
pub struct Catalog {
    courses: CourseService,
    instances: InstanceService,
    cache: QueryCache,
    notifier: Arc<dyn Notifier>,
}

impl Catalog {
    pub fn new(
        courses: CourseService,
        instances: InstanceService,
        cache: QueryCache,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            courses,
            instances,
            cache,
            notifier,
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn course_service(&self) -> &CourseService {
        &self.courses
    }

    pub fn instance_service(&self) -> &InstanceService {
        &self.instances
    }

    // ---- course queries ----

    pub fn courses(&self) -> QueryState<Vec<Course>> {
        self.cache
            .read(&keys::courses(), list_courses_fn(self.courses.clone()), ReadOptions::default())
    }

    pub async fn fetch_courses(&self) -> Result<Arc<Vec<Course>>, ApiError> {
        self.cache
            .fetch(&keys::courses(), list_courses_fn(self.courses.clone()), ReadOptions::default())
            .await
    }

    pub async fn refetch_courses(&self) -> Result<Arc<Vec<Course>>, ApiError> {
        self.cache
            .refetch(&keys::courses(), list_courses_fn(self.courses.clone()))
            .await
    }

    pub fn course(&self, course_id: &str) -> QueryState<Course> {
        let svc = self.courses.clone();
        let id = course_id.to_string();
        self.cache.read(
            &keys::course(course_id),
            move || {
                let svc = svc.clone();
                let id = id.clone();
                async move { svc.get_course(&id).await }
            },
            ReadOptions::default(),
        )
    }

    pub async fn fetch_course(&self, course_id: &str) -> Result<Arc<Course>, ApiError> {
        let svc = self.courses.clone();
        let id = course_id.to_string();
        self.cache
            .fetch(
                &keys::course(course_id),
                move || {
                    let svc = svc.clone();
                    let id = id.clone();
                    async move { svc.get_course(&id).await }
                },
                ReadOptions::default(),
            )
            .await
    }

    // ---- instance queries ----

    pub fn all_instances(&self) -> QueryState<Vec<CourseInstance>> {
        let svc = self.instances.clone();
        self.cache.read(
            &keys::all_instances(),
            move || {
                let svc = svc.clone();
                async move { svc.list_all_instances().await }
            },
            ReadOptions::default(),
        )
    }

    pub async fn fetch_all_instances(&self) -> Result<Arc<Vec<CourseInstance>>, ApiError> {
        let svc = self.instances.clone();
        self.cache
            .fetch(
                &keys::all_instances(),
                move || {
                    let svc = svc.clone();
                    async move { svc.list_all_instances().await }
                },
                ReadOptions::default(),
            )
            .await
    }

    pub fn instances(&self, period: AcademicPeriod) -> QueryState<Vec<CourseInstance>> {
        let svc = self.instances.clone();
        self.cache.read(
            &keys::instances(period),
            move || {
                let svc = svc.clone();
                async move { svc.list_instances(period).await }
            },
            ReadOptions::default(),
        )
    }

    pub async fn fetch_instances(&self, period: AcademicPeriod) -> Result<Arc<Vec<CourseInstance>>, ApiError> {
        let svc = self.instances.clone();
        self.cache
            .fetch(
                &keys::instances(period),
                move || {
                    let svc = svc.clone();
                    async move { svc.list_instances(period).await }
                },
                ReadOptions::default(),
            )
            .await
    }

    pub async fn refetch_instances(&self, period: AcademicPeriod) -> Result<Arc<Vec<CourseInstance>>, ApiError> {
        let svc = self.instances.clone();
        self.cache
            .refetch(&keys::instances(period), move || {
                let svc = svc.clone();
                async move { svc.list_instances(period).await }
            })
            .await
    }

    pub fn instance(&self, id: &InstanceId) -> QueryState<CourseInstance> {
        let svc = self.instances.clone();
        let owned = id.clone();
        self.cache.read(
            &keys::instance(id),
            move || {
                let svc = svc.clone();
                let id = owned.clone();
                async move { svc.get_instance(&id).await }
            },
            ReadOptions::default(),
        )
    }

    pub async fn fetch_instance(&self, id: &InstanceId) -> Result<Arc<CourseInstance>, ApiError> {
        let svc = self.instances.clone();
        let owned = id.clone();
        self.cache
            .fetch(
                &keys::instance(id),
                move || {
                    let svc = svc.clone();
                    let id = owned.clone();
                    async move { svc.get_instance(&id).await }
                },
                ReadOptions::default(),
            )
            .await
    }

    /// Observer for the instance list view, which keeps the previous page of
    /// results visible while a new filter loads.
    pub fn instance_list_observer(&self) -> QueryObserver<Vec<CourseInstance>> {
        QueryObserver::new(self.cache.clone(), ObserverOptions::keep_previous())
    }

    /// Points `observer` at the query matching `filter`:
    /// a search term with a full period looks up that one instance,
    /// no filter at all lists everything, a full period lists the period,
    /// and a partial period filters the full list.
    pub fn observe_instances(
        &self,
        observer: &mut QueryObserver<Vec<CourseInstance>>,
        filter: &InstanceFilter,
    ) -> QueryState<Vec<CourseInstance>> {
        let svc = self.instances.clone();
        match (filter.year, filter.semester, filter.search_term()) {
            (Some(year), Some(semester), Some(term)) => {
                let id = InstanceId::new(year, semester, term);
                observer.observe(keys::instance_lookup(&id), move || {
                    let svc = svc.clone();
                    let id = id.clone();
                    async move {
                        let found = svc.find_instance(&id).await?;
                        Ok(found.into_iter().collect())
                    }
                })
            }
            (None, None, _) => observer.observe(keys::all_instances(), move || {
                let svc = svc.clone();
                async move { svc.list_all_instances().await }
            }),
            (Some(year), Some(semester), None) => {
                let period = AcademicPeriod::new(year, semester);
                observer.observe(keys::instances(period), move || {
                    let svc = svc.clone();
                    async move { svc.list_instances(period).await }
                })
            }
            (year, semester, _) => observer.observe(keys::instances_filtered(year, semester), move || {
                let svc = svc.clone();
                async move {
                    let all = svc.list_all_instances().await?;
                    Ok(all
                        .into_iter()
                        .filter(|i| year.is_none_or(|y| i.year == y))
                        .filter(|i| semester.is_none_or(|s| i.semester == s))
                        .collect())
                }
            }),
        }
    }

    pub async fn dashboard(&self, period: AcademicPeriod) -> Result<DashboardStats, ApiError> {
        let (courses, current, all) = tokio::try_join!(
            self.fetch_courses(),
            self.fetch_instances(period),
            self.fetch_all_instances(),
        )?;
        Ok(DashboardStats {
            period,
            total_courses: courses.len(),
            current_period_instances: current.len(),
            total_instances: all.len(),
        })
    }

    // ---- mutations ----

    pub async fn create_course(&self, course: Course) -> Result<Course, AppError> {
        let course = validate_course(course)?;
        let svc = self.courses.clone();
        let created = self
            .cache
            .mutate(
                move || async move { svc.create_course(&course).await },
                MutateOptions::invalidate(KeyFilter::Exact(keys::courses())),
            )
            .await?;
        info!("course {} created", created.course_id);
        self.notifier
            .notify(Notice::success(format!("Course {} created", created.course_id)));
        Ok(created)
    }

    pub async fn update_course(&self, course_id: &str, course: Course) -> Result<Course, AppError> {
        validate_course_key(course_id)?;
        let course = validate_course(course)?;
        let svc = self.courses.clone();
        let path_id = course_id.to_string();
        let options = MutateOptions::invalidate(keys::courses())
            .and(keys::course(course_id))
            .and(keys::course(&course.course_id));
        let updated = self
            .cache
            .mutate(
                move || async move { svc.update_course(&path_id, &course).await },
                options,
            )
            .await?;
        info!("course {} updated", course_id);
        self.notifier
            .notify(Notice::success(format!("Course {} updated", updated.course_id)));
        Ok(updated)
    }

    /// Deleting a course also invalidates instances, which may reference it.
    pub async fn delete_course(&self, course_id: &str) -> Result<(), AppError> {
        validate_course_key(course_id)?;
        let svc = self.courses.clone();
        let id = course_id.to_string();
        self.cache
            .mutate(
                move || async move { svc.delete_course(&id).await },
                MutateOptions::invalidate(ResourceKind::Course).and(ResourceKind::CourseInstance),
            )
            .await?;
        info!("course {} deleted", course_id);
        self.notifier
            .notify(Notice::success(format!("Course {} deleted", course_id)));
        Ok(())
    }

    pub async fn create_instance(&self, req: NewInstanceRequest) -> Result<CourseInstance, AppError> {
        let req = validate_instance(req)?;
        let svc = self.instances.clone();
        let created = self
            .cache
            .mutate(
                move || async move { svc.create_instance(&req).await },
                MutateOptions::invalidate(ResourceKind::CourseInstance),
            )
            .await?;
        self.notifier.notify(Notice::success(format!(
            "Instance {} for {} created",
            created.course_id,
            created.period()
        )));
        Ok(created)
    }

    pub async fn delete_instance(&self, id: &InstanceId) -> Result<(), AppError> {
        validate_instance_id(id)?;
        let svc = self.instances.clone();
        let owned = id.clone();
        self.cache
            .mutate(
                move || async move { svc.delete_instance(&owned).await },
                MutateOptions::invalidate(ResourceKind::CourseInstance),
            )
            .await?;
        self.notifier.notify(Notice::success(format!(
            "Instance {} for {} deleted",
            id.course_id,
            id.period()
        )));
        Ok(())
    }

    pub fn invalidate(&self, filter: &KeyFilter) -> usize {
        self.cache.invalidate(filter)
    }
}
