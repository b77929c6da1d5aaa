#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Request, State};
use axum::http::{StatusCode, header::AUTHORIZATION};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::json;

use catalog_client::db::{MemoryTokenStore, TokenStore};
use catalog_client::http::{Notice, NoticeLevel, Notifier};
use catalog_client::models::{Course, CourseInstance, NewInstanceRequest, Semester};
use catalog_client::{ClientConfig, ClientContext};

#[derive(Default)]
pub struct MockState {
    pub courses: Vec<Course>,
    pub instances: Vec<CourseInstance>,
    pub hits: HashMap<String, usize>,
    pub auth_headers: Vec<Option<String>>,
    pub force_status: Option<u16>,
    pub delay: Option<Duration>,
}

pub type SharedState = Arc<Mutex<MockState>>;

/// In-process stand-in for the catalog API, served under `/api/v1`.
pub struct MockApi {
    pub addr: SocketAddr,
    pub state: SharedState,
}

impl MockApi {
    pub async fn spawn() -> Self {
        let state: SharedState = Arc::new(Mutex::new(MockState::default()));

        let api = Router::new()
            .route("/getAll/course", get(list_courses))
            .route("/getById/course/{id}", get(get_course))
            .route("/course", post(create_course))
            .route("/update/course/{id}", put(update_course))
            .route("/delete/course/{id}", delete(delete_course))
            .route("/instance/getAllCourseInstance", get(list_all_instances))
            .route("/instance/{year}/{semester}", get(list_instances))
            .route(
                "/instance/{year}/{semester}/{course_id}",
                get(get_instance).delete(delete_instance),
            )
            .route("/instance", post(create_instance));

        let app = Router::new()
            .nest("/api/v1", api)
            .layer(middleware::from_fn_with_state(state.clone(), record))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock api");
        let addr = listener.local_addr().expect("mock api addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock api crashed");
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.state.lock().unwrap().hits.get(path).copied().unwrap_or(0)
    }

    pub fn last_auth(&self) -> Option<String> {
        self.state.lock().unwrap().auth_headers.last().cloned().flatten()
    }

    pub fn force_status(&self, status: Option<u16>) {
        self.state.lock().unwrap().force_status = status;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().delay = delay;
    }

    pub fn seed_course(&self, course: Course) {
        self.state.lock().unwrap().courses.push(course);
    }

    pub fn seed_instance(&self, course_id: &str, year: i32, semester: u8) {
        let mut state = self.state.lock().unwrap();
        let course = state.courses.iter().find(|c| c.course_id == course_id).cloned();
        state.instances.push(CourseInstance {
            course_id: course_id.to_string(),
            year,
            semester: Semester::new(semester).unwrap(),
            course,
        });
    }
}

async fn record(State(state): State<SharedState>, req: Request, next: Next) -> Response {
    let (forced, delay) = {
        let mut s = state.lock().unwrap();
        *s.hits.entry(req.uri().path().to_string()).or_insert(0) += 1;
        let auth = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        s.auth_headers.push(auth);
        (s.force_status, s.delay)
    };

    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if let Some(code) = forced {
        let status = StatusCode::from_u16(code).unwrap();
        return (status, Json(json!({ "message": format!("forced {}", code) }))).into_response();
    }
    next.run(req).await
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "message": message }))).into_response()
}

async fn list_courses(State(state): State<SharedState>) -> Response {
    let s = state.lock().unwrap();
    if s.courses.is_empty() {
        return not_found("No courses found");
    }
    Json(s.courses.clone()).into_response()
}

async fn get_course(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    let s = state.lock().unwrap();
    match s.courses.iter().find(|c| c.course_id == id) {
        Some(course) => Json(json!({ "data": course })).into_response(),
        None => not_found("Course not found"),
    }
}

async fn create_course(State(state): State<SharedState>, Json(course): Json<Course>) -> Response {
    let mut s = state.lock().unwrap();
    if s.courses.iter().any(|c| c.course_id == course.course_id) {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "message": format!("Course {} already exists", course.course_id) })),
        )
            .into_response();
    }
    s.courses.push(course.clone());
    (StatusCode::CREATED, Json(course)).into_response()
}

async fn update_course(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(course): Json<Course>,
) -> Response {
    let mut s = state.lock().unwrap();
    match s.courses.iter_mut().find(|c| c.course_id == id) {
        Some(existing) => {
            *existing = course.clone();
            Json(course).into_response()
        }
        None => not_found("Course not found"),
    }
}

async fn delete_course(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    let mut s = state.lock().unwrap();
    let before = s.courses.len();
    s.courses.retain(|c| c.course_id != id);
    if s.courses.len() == before {
        return not_found("Course not found");
    }
    s.instances.retain(|i| i.course_id != id);
    StatusCode::NO_CONTENT.into_response()
}

async fn list_all_instances(State(state): State<SharedState>) -> Response {
    let s = state.lock().unwrap();
    Json(json!({ "data": s.instances })).into_response()
}

async fn list_instances(
    State(state): State<SharedState>,
    Path((year, semester)): Path<(i32, u8)>,
) -> Response {
    let s = state.lock().unwrap();
    let found: Vec<CourseInstance> = s
        .instances
        .iter()
        .filter(|i| i.year == year && i.semester.get() == semester)
        .cloned()
        .collect();
    if found.is_empty() {
        return not_found("No instances found");
    }
    Json(found).into_response()
}

async fn get_instance(
    State(state): State<SharedState>,
    Path((year, semester, course_id)): Path<(i32, u8, String)>,
) -> Response {
    let s = state.lock().unwrap();
    match s
        .instances
        .iter()
        .find(|i| i.year == year && i.semester.get() == semester && i.course_id == course_id)
    {
        Some(instance) => Json(instance.clone()).into_response(),
        None => not_found("Instance not found"),
    }
}

async fn create_instance(
    State(state): State<SharedState>,
    Json(req): Json<NewInstanceRequest>,
) -> Response {
    let mut s = state.lock().unwrap();
    let Some(course) = s.courses.iter().find(|c| c.course_id == req.course_id).cloned() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "Course does not exist" })),
        )
            .into_response();
    };
    let instance = CourseInstance {
        course_id: req.course_id,
        year: req.year,
        semester: Semester::new(req.semester).unwrap(),
        course: Some(course),
    };
    s.instances.push(instance.clone());
    (StatusCode::CREATED, Json(instance)).into_response()
}

async fn delete_instance(
    State(state): State<SharedState>,
    Path((year, semester, course_id)): Path<(i32, u8, String)>,
) -> Response {
    let mut s = state.lock().unwrap();
    let before = s.instances.len();
    s.instances
        .retain(|i| !(i.year == year && i.semester.get() == semester && i.course_id == course_id));
    if s.instances.len() == before {
        return not_found("Instance not found");
    }
    StatusCode::NO_CONTENT.into_response()
}

/// Collects notices instead of showing them.
#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<Notice>>,
    pub expired: AtomicUsize,
}

impl RecordingNotifier {
    pub fn errors(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.level == NoticeLevel::Error)
            .cloned()
            .collect()
    }

    pub fn expired_count(&self) -> usize {
        self.expired.load(Ordering::SeqCst)
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }

    fn session_expired(&self) {
        self.expired.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub api: MockApi,
    pub ctx: ClientContext,
    pub notifier: Arc<RecordingNotifier>,
    pub tokens: Arc<MemoryTokenStore>,
}

pub async fn harness() -> Harness {
    harness_with(|config| config).await
}

pub async fn harness_with(tweak: impl FnOnce(ClientConfig) -> ClientConfig) -> Harness {
    let api = MockApi::spawn().await;
    let notifier = Arc::new(RecordingNotifier::default());
    let tokens = Arc::new(MemoryTokenStore::new());
    let config = tweak(ClientConfig::new(api.url()).with_timeout(Duration::from_secs(5)));
    let ctx = ClientContext::init(
        config,
        tokens.clone() as Arc<dyn TokenStore>,
        notifier.clone() as Arc<dyn Notifier>,
    )
    .expect("client context");
    Harness {
        api,
        ctx,
        notifier,
        tokens,
    }
}

pub fn course(id: &str, title: &str) -> Course {
    Course {
        course_id: id.to_string(),
        title: title.to_string(),
        description: Some(String::new()),
        prerequisite_ids: Vec::new(),
    }
}
