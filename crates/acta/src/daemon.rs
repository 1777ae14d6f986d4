use std::collections::BTreeMap;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::rejection::QueryRejection;
use axum::extract::{Form, FromRequest, Path, Query, Request, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::db::Db;
use crate::error::{Action, ActaError, error_body};
use crate::filter;
use crate::reconcile;
use crate::types::{IssueView, NewIssue, ProjectPolicy};

type AppState = Arc<Mutex<Db>>;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub project_policy: ProjectPolicy,
}

struct AppError(ActaError, Action);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let AppError(err, action) = self;
        match &err {
            ActaError::Internal(detail) => tracing::error!(?action, "{detail}"),
            other => tracing::warn!(?action, "request rejected: {other}"),
        }
        // Logical failures are reported in the body; the status is always 200.
        Json(error_body(&err, action)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ResultResponse {
    pub result: String,
    #[serde(rename = "_id")]
    pub id: String,
}

/// Request body fields flattened to strings, from either a JSON object or a
/// urlencoded form. A body in any other content type is read as empty.
pub struct FieldsBody(pub Result<BTreeMap<String, String>, ActaError>);

impl<S> FromRequest<S> for FieldsBody
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let fields = if content_type.starts_with("application/json") {
            Json::<serde_json::Map<String, serde_json::Value>>::from_request(req, state)
                .await
                .map(|Json(map)| flatten_json(map))
                .map_err(|e| ActaError::InvalidBody(e.body_text()))
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            Form::<BTreeMap<String, String>>::from_request(req, state)
                .await
                .map(|Form(map)| map)
                .map_err(|e| ActaError::InvalidBody(e.body_text()))
        } else {
            Ok(BTreeMap::new())
        };

        Ok(FieldsBody(fields))
    }
}

fn flatten_json(map: serde_json::Map<String, serde_json::Value>) -> BTreeMap<String, String> {
    map.into_iter()
        .map(|(key, value)| {
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                serde_json::Value::Bool(b) => b.to_string(),
                other => other.to_string(),
            };
            (key, text)
        })
        .collect()
}

fn lock(state: &AppState) -> Result<MutexGuard<'_, Db>, ActaError> {
    state
        .lock()
        .map_err(|_| ActaError::Internal("store lock poisoned".to_string()))
}

pub fn router(db: Db) -> Router {
    let state: AppState = Arc::new(Mutex::new(db));

    Router::new()
        .route(
            "/api/issues/{project}",
            get(list_issues)
                .post(create_issue)
                .put(update_issue)
                .delete(delete_issue),
        )
        .route("/status", get(status))
        .with_state(state)
}

pub async fn start(config: DaemonConfig) -> Result<(), ActaError> {
    let db = Db::open(&config.data_dir, config.project_policy)?;
    let app = router(db);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .map_err(|e| ActaError::Internal(format!("failed to bind port {}: {e}", config.port)))?;

    tracing::info!(
        port = config.port,
        project_names = ?config.project_policy,
        "acta listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ActaError::Internal(format!("server error: {e}")))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to install ctrl+c handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

// --- Request orchestration ---

pub fn list(
    db: &Db,
    project: &str,
    params: &BTreeMap<String, String>,
) -> Result<Vec<IssueView>, ActaError> {
    let project_id = db
        .resolve_project(project)?
        .ok_or_else(|| ActaError::NoSuchProject(project.to_string()))?;

    let predicates = filter::build(&project_id, params);
    tracing::debug!(?predicates, "filtering issues");

    let issues = db.list_issues(&predicates)?;
    Ok(issues.into_iter().map(IssueView::from).collect())
}

pub fn create(
    db: &Db,
    project: &str,
    fields: &BTreeMap<String, String>,
) -> Result<IssueView, ActaError> {
    let new = NewIssue::from_fields(fields)?;
    let project_id = db.resolve_or_create_project(project)?;
    Ok(db.create_issue(&project_id, &new)?.into())
}

/// Returns the id of the updated issue.
pub fn update(
    db: &Db,
    project: &str,
    mut fields: BTreeMap<String, String>,
) -> Result<String, ActaError> {
    let id = reconcile::take_id(&mut fields)?;
    let (patch, change_count) = reconcile::reconcile(&fields);
    if change_count == 0 {
        return Err(ActaError::NoUpdateFields(id));
    }

    let project_id = db
        .resolve_project(project)?
        .ok_or_else(|| ActaError::IssueNotFound(id.clone()))?;
    db.update_issue(&project_id, &id, &patch)?;
    Ok(id)
}

/// Returns the id of the deleted issue.
pub fn delete(
    db: &Db,
    project: &str,
    mut fields: BTreeMap<String, String>,
) -> Result<String, ActaError> {
    let id = reconcile::take_id(&mut fields)?;
    let project_id = db
        .resolve_project(project)?
        .ok_or_else(|| ActaError::IssueNotFound(id.clone()))?;
    db.delete_issue(&project_id, &id)?;
    Ok(id)
}

// --- Endpoints ---

async fn list_issues(
    State(db): State<AppState>,
    Path(project): Path<String>,
    query: Result<Query<BTreeMap<String, String>>, QueryRejection>,
) -> Result<Json<Vec<IssueView>>, AppError> {
    let fail = |e: ActaError| AppError(e, Action::List);
    let Query(params) = query.map_err(|e| fail(ActaError::InvalidQuery(e.body_text())))?;
    let db = lock(&db).map_err(fail)?;
    let issues = list(&db, &project, &params).map_err(fail)?;
    Ok(Json(issues))
}

async fn create_issue(
    State(db): State<AppState>,
    Path(project): Path<String>,
    body: FieldsBody,
) -> Result<Json<IssueView>, AppError> {
    let fail = |e: ActaError| AppError(e, Action::Create);
    let fields = body.0.map_err(fail)?;
    let db = lock(&db).map_err(fail)?;
    let issue = create(&db, &project, &fields).map_err(fail)?;
    Ok(Json(issue))
}

async fn update_issue(
    State(db): State<AppState>,
    Path(project): Path<String>,
    body: FieldsBody,
) -> Result<Json<ResultResponse>, AppError> {
    let fail = |e: ActaError| AppError(e, Action::Update);
    let fields = body.0.map_err(fail)?;
    let db = lock(&db).map_err(fail)?;
    let id = update(&db, &project, fields).map_err(fail)?;
    Ok(Json(ResultResponse {
        result: "successfully updated".to_string(),
        id,
    }))
}

async fn delete_issue(
    State(db): State<AppState>,
    Path(project): Path<String>,
    body: FieldsBody,
) -> Result<Json<ResultResponse>, AppError> {
    let fail = |e: ActaError| AppError(e, Action::Delete);
    let fields = body.0.map_err(fail)?;
    let db = lock(&db).map_err(fail)?;
    let id = delete(&db, &project, fields).map_err(fail)?;
    Ok(Json(ResultResponse {
        result: "successfully deleted".to_string(),
        id,
    }))
}

async fn status() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
