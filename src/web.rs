use axum::{
    Form, Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::auth::{self, CredentialCheck};
use crate::config::DashboardConfig;
use crate::dashboard::{Dashboard, FacetOptions};
use crate::error::DashboardError;
use crate::export;
use crate::filter::{self, FilterRequest};
use crate::session::{Access, ExpiryNotice, SessionState};

const ADMIN_COOKIE: &str = "admin_session";
const ADMIN_SESSION_HOURS: i64 = 12;
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Shared server state
///
/// The session mutex orders every pass: an upload write, a refresh and a
/// dashboard read never interleave.
pub struct AppState {
    dashboard: Dashboard,
    session: Mutex<SessionState>,
    credentials: Box<dyn CredentialCheck>,
    admin_sessions: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl AppState {
    pub fn new(dashboard: Dashboard, credentials: Box<dyn CredentialCheck>) -> Self {
        Self {
            dashboard,
            session: Mutex::new(SessionState::empty()),
            credentials,
            admin_sessions: Mutex::new(HashMap::new()),
        }
    }

    fn session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admin_sessions(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.admin_sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create an admin session and return its id
    fn open_admin_session(&self, now: DateTime<Utc>) -> String {
        let session_id = Uuid::new_v4().to_string();
        let mut sessions = self.admin_sessions();
        sessions.retain(|_, expires_at| *expires_at > now);
        sessions.insert(session_id.clone(), now + Duration::hours(ADMIN_SESSION_HOURS));
        session_id
    }

    /// Whether the request may perform admin actions
    fn is_admin(&self, jar: &CookieJar, now: DateTime<Utc>) -> bool {
        if !self.credentials.required() {
            return true;
        }
        jar.get(ADMIN_COOKIE)
            .and_then(|cookie| self.admin_sessions().get(cookie.value()).copied())
            .is_some_and(|expires_at| expires_at > now)
    }
}

#[derive(Serialize)]
struct ApiResponse {
    status: String,
    message: Option<String>,
}

impl ApiResponse {
    fn ok(message: Option<String>) -> Json<Self> {
        Json(Self {
            status: "ok".to_string(),
            message,
        })
    }
}

#[derive(Deserialize)]
struct LoginForm {
    password: String,
}

#[derive(Deserialize, Default)]
struct SelectionQuery {
    months: Option<String>,
    machines: Option<String>,
    sizes: Option<String>,
    format: Option<String>,
}

impl SelectionQuery {
    fn request(&self) -> FilterRequest {
        FilterRequest::from_lists(
            self.months.as_deref(),
            self.machines.as_deref(),
            self.sizes.as_deref(),
        )
    }
}

/// Map a pipeline error to an HTTP response
fn error_response(err: DashboardError) -> Response {
    let status = match err {
        DashboardError::Parse(_) | DashboardError::EmptyUpload => StatusCode::BAD_REQUEST,
        DashboardError::Unauthorized => StatusCode::UNAUTHORIZED,
        DashboardError::UploadIo { .. } | DashboardError::Config(_) | DashboardError::Export(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    warn!("request failed: {}", err);
    (
        status,
        Json(ApiResponse {
            status: "error".to_string(),
            message: Some(err.to_string()),
        }),
    )
        .into_response()
}

/// Response telling the client to show the upload prompt
///
/// `notice` is the session's last expiry notice, if any.
fn upload_required(access: &Access, notice: Option<ExpiryNotice>) -> Response {
    (
        StatusCode::CONFLICT,
        Json(serde_json::json!({
            "status": "upload_required",
            "state": access.state(),
            "expiry": notice,
        })),
    )
        .into_response()
}

/// Build the router for `state`
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(serve_dashboard))
        .route("/api/status", get(get_status))
        .route("/api/facets", get(get_facets))
        .route("/api/dashboard", get(get_dashboard))
        .route("/api/export", get(export_rows))
        .route("/api/login", post(handle_login))
        .route("/api/logout", post(handle_logout))
        .route("/api/upload", post(upload_spreadsheet))
        .route("/api/reset", post(reset_session))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Run the dashboard server until it is stopped
///
/// # Arguments
/// * `config` - Runtime configuration, including bind address and refresh period
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Error if the server could not start
pub async fn run(config: DashboardConfig) -> Result<(), Box<dyn std::error::Error>> {
    let credentials = auth::credential_from_config(config.admin_password_hash.as_deref())?;
    if !credentials.required() {
        warn!("no admin password hash configured, upload and reset are open to everyone");
    }

    let bind_addr = config.bind_addr.clone();
    let app_state = Arc::new(AppState::new(Dashboard::new(config), credentials));
    spawn_refresh(app_state.clone());

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{}", bind_addr);
    axum::serve(listener, router(app_state)).await?;

    Ok(())
}

/// Periodically resolve the session so expiry is noticed without viewers
///
/// The notice from a pass that detects expiry stays in the session, so
/// viewers still see it on their next request.
pub fn spawn_refresh(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    // tokio's interval panics on a zero period
    let period = state
        .dashboard
        .config()
        .refresh_interval
        .max(std::time::Duration::from_millis(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let mut session = state.session();
            match state.dashboard.resolve(&mut session, Utc::now()) {
                Ok(access) => debug!(
                    "refresh: state {:?}, {:.1}h remaining",
                    access.state(),
                    access.remaining_hours()
                ),
                Err(e) => warn!("refresh failed: {}", e),
            }
        }
    })
}

async fn serve_dashboard() -> Html<&'static str> {
    Html(include_str!("./static/dashboard.html"))
}

async fn get_status(State(state): State<Arc<AppState>>) -> Response {
    let mut session = state.session();
    match state.dashboard.status(&mut session, Utc::now()) {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_facets(State(state): State<Arc<AppState>>) -> Response {
    let mut session = state.session();
    match state.dashboard.resolve(&mut session, Utc::now()) {
        Ok(access) => match access.dataset() {
            Some(dataset) => Json(FacetOptions::of(dataset)).into_response(),
            None => upload_required(&access, session.last_expiry().cloned()),
        },
        Err(e) => error_response(e),
    }
}

async fn get_dashboard(
    Query(params): Query<SelectionQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let mut session = state.session();
    let access = match state.dashboard.resolve(&mut session, Utc::now()) {
        Ok(access) => access,
        Err(e) => return error_response(e),
    };
    let notice = session.last_expiry().cloned();
    drop(session);

    let Some(dataset) = access.dataset() else {
        return upload_required(&access, notice);
    };
    let selection = params.request().resolve(dataset);
    match state.dashboard.view(&access, &selection) {
        Some(view) => Json(view).into_response(),
        None => upload_required(&access, notice),
    }
}

async fn export_rows(
    Query(params): Query<SelectionQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let mut session = state.session();
    let access = match state.dashboard.resolve(&mut session, Utc::now()) {
        Ok(access) => access,
        Err(e) => return error_response(e),
    };
    let notice = session.last_expiry().cloned();
    drop(session);

    let Some(dataset) = access.dataset() else {
        return upload_required(&access, notice);
    };
    let selection = params.request().resolve(dataset);
    let rows = filter::apply(dataset, &selection);

    let (content_type, filename, body) = match params.format.as_deref().unwrap_or("csv") {
        "csv" => ("text/csv", "production.csv", export::to_csv(&rows).into_bytes()),
        "xlsx" => match export::to_xlsx(&rows) {
            Ok(bytes) => (
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                "production.xlsx",
                bytes,
            ),
            Err(e) => return error_response(e),
        },
        other => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse {
                    status: "error".to_string(),
                    message: Some(format!("unsupported export format '{}'", other)),
                }),
            )
                .into_response();
        }
    };

    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        Body::from(body),
    )
        .into_response()
}

async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    if !state.credentials.verify(&form.password) {
        return error_response(DashboardError::Unauthorized);
    }
    let session_id = state.open_admin_session(Utc::now());
    let mut cookie = Cookie::new(ADMIN_COOKIE, session_id);
    cookie.set_http_only(true);
    cookie.set_path("/");
    info!("admin logged in");
    (jar.add(cookie), ApiResponse::ok(None)).into_response()
}

async fn handle_logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(ADMIN_COOKIE) {
        state.admin_sessions().remove(cookie.value());
    }
    let mut cookie = Cookie::new(ADMIN_COOKIE, "");
    cookie.set_path("/");
    (jar.remove(cookie), ApiResponse::ok(None)).into_response()
}

async fn upload_spreadsheet(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut multipart: Multipart,
) -> Response {
    if !state.is_admin(&jar, Utc::now()) {
        return error_response(DashboardError::Unauthorized);
    }

    let mut file_data = Vec::new();
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() == Some("spreadsheet") {
                    match field.bytes().await {
                        Ok(bytes) => file_data = bytes.to_vec(),
                        Err(e) => {
                            return error_response(DashboardError::Parse(format!(
                                "failed to read upload: {}",
                                e
                            )));
                        }
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                return error_response(DashboardError::Parse(format!(
                    "malformed upload: {}",
                    e
                )));
            }
        }
    }

    let mut session = state.session();
    match state.dashboard.upload(&mut session, &file_data, Utc::now()) {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

async fn reset_session(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    if !state.is_admin(&jar, Utc::now()) {
        return error_response(DashboardError::Unauthorized);
    }
    let mut session = state.session();
    match state.dashboard.reset(&mut session) {
        Ok(()) => ApiResponse::ok(Some("dataset cleared".to_string())).into_response(),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Argon2Credential, OpenAccess};
    use axum::http::Request;
    use rust_xlsxwriter::Workbook;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "prodboard-boundary";

    fn production_workbook() -> Vec<u8> {
        let mut workbook = Workbook::new();
        let ws = workbook.add_worksheet();
        ws.set_name("POWERBI SUMMARY").unwrap();
        for (c, name) in ["MONTH", "MACHINE", "PIPE", "EXPECTED", "RECORDED"]
            .iter()
            .enumerate()
        {
            ws.write_string(0, c as u16, *name).unwrap();
        }
        let rows = [
            ("Jan", "M1", "2in", 100.0, 90.0),
            ("Jan", "M1", "3in", 200.0, 220.0),
            ("Feb", "M2", "2in", 50.0, 60.0),
        ];
        for (r, (month, machine, pipe, expected, recorded)) in rows.iter().enumerate() {
            let r = (r + 1) as u32;
            ws.write_string(r, 0, *month).unwrap();
            ws.write_string(r, 1, *machine).unwrap();
            ws.write_string(r, 2, *pipe).unwrap();
            ws.write_number(r, 3, *expected).unwrap();
            ws.write_number(r, 4, *recorded).unwrap();
        }
        workbook.save_to_buffer().unwrap()
    }

    fn app_state(
        credentials: Box<dyn CredentialCheck>,
        tweak: impl FnOnce(&mut DashboardConfig),
    ) -> (TempDir, Arc<AppState>) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DashboardConfig {
            data_dir: dir.path().join("data"),
            ..DashboardConfig::default()
        };
        tweak(&mut config);
        let state = Arc::new(AppState::new(Dashboard::new(config), credentials));
        (dir, state)
    }

    fn upload_request(bytes: &[u8], cookie: Option<&str>) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"spreadsheet\"; filename=\"upload.xlsx\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                BOUNDARY
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        let mut builder = Request::post("/api/upload").header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn post(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::post(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn send(state: &Arc<AppState>, request: Request<Body>) -> Response {
        router(state.clone()).oneshot(request).await.unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn admin_gate_protects_upload_and_reset() {
        let hash = auth::hash_password("line-7").unwrap();
        let (_dir, state) = app_state(Box::new(Argon2Credential::from_hash(hash).unwrap()), |_| {});

        let response = send(&state, upload_request(&production_workbook(), None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = send(&state, post("/api/reset", None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let wrong = Request::post("/api/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("password=line-8"))
            .unwrap();
        assert_eq!(send(&state, wrong).await.status(), StatusCode::UNAUTHORIZED);

        let login = Request::post("/api/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("password=line-7"))
            .unwrap();
        let response = send(&state, login).await;
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        let cookie = set_cookie.split(';').next().unwrap();
        assert!(cookie.starts_with("admin_session="));

        let response = send(&state, upload_request(&production_workbook(), Some(cookie))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["rows"], 3);

        let response = send(&state, post("/api/reset", Some(cookie))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn admin_session_lapses_after_twelve_hours() {
        let hash = auth::hash_password("line-7").unwrap();
        let (_dir, state) = app_state(Box::new(Argon2Credential::from_hash(hash).unwrap()), |_| {});
        let now = Utc::now();
        let session_id = state.open_admin_session(now);
        let jar = CookieJar::new().add(Cookie::new(ADMIN_COOKIE, session_id));

        assert!(state.is_admin(&jar, now + Duration::hours(11)));
        assert!(!state.is_admin(&jar, now + Duration::hours(13)));
        assert!(!state.is_admin(&CookieJar::new(), now));
    }

    #[tokio::test]
    async fn empty_slot_answers_upload_required() {
        let (_dir, state) = app_state(Box::new(OpenAccess), |_| {});

        let response = send(&state, get("/api/dashboard")).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = json_body(response).await;
        assert_eq!(body["status"], "upload_required");
        assert_eq!(body["state"], "empty");
        assert!(body["expiry"].is_null());
    }

    #[tokio::test]
    async fn empty_month_list_selects_nothing() {
        let (_dir, state) = app_state(Box::new(OpenAccess), |_| {});
        let response = send(&state, upload_request(&production_workbook(), None)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(send(&state, get("/api/dashboard")).await).await;
        assert_eq!(body["rows"].as_array().unwrap().len(), 3);

        let body = json_body(send(&state, get("/api/dashboard?months=")).await).await;
        assert_eq!(body["rows"].as_array().unwrap().len(), 0);
        assert!(body["kpis"]["avg_expected"].is_null());

        let body = json_body(send(&state, get("/api/dashboard?months=Jan&machines=M1")).await).await;
        assert_eq!(body["rows"].as_array().unwrap().len(), 2);
        assert_eq!(body["kpis"]["avg_expected"], 150.0);
    }

    #[tokio::test]
    async fn export_format_selects_content_type() {
        let (_dir, state) = app_state(Box::new(OpenAccess), |_| {});
        send(&state, upload_request(&production_workbook(), None)).await;

        let response = send(&state, get("/api/export")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&bytes).lines().count(), 4);

        let response = send(&state, get("/api/export?format=xlsx&machines=M2")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .contains("spreadsheetml"));

        let response = send(&state, get("/api/export?format=pdf")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn refresh_keeps_expiry_notice_for_viewers() {
        let (_dir, state) = app_state(Box::new(OpenAccess), |config| {
            config.expiry = std::time::Duration::from_secs(1);
            config.refresh_interval = std::time::Duration::from_millis(100);
        });
        let response = send(&state, upload_request(&production_workbook(), None)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let refresh = spawn_refresh(state.clone());
        tokio::time::sleep(std::time::Duration::from_millis(2500)).await;

        // The refresh pass has already discarded the upload
        assert!(!state.dashboard.config().upload_path().exists());

        let body = json_body(send(&state, get("/api/status")).await).await;
        assert_eq!(body["state"], "empty");
        assert!(!body["expiry"].is_null());

        let response = send(&state, get("/api/dashboard")).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(!json_body(response).await["expiry"].is_null());

        refresh.abort();
    }

    #[tokio::test]
    async fn zero_refresh_period_does_not_kill_the_task() {
        let (_dir, state) = app_state(Box::new(OpenAccess), |config| {
            config.refresh_interval = std::time::Duration::ZERO;
        });
        let refresh = spawn_refresh(state);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!refresh.is_finished());
        refresh.abort();
    }
}
