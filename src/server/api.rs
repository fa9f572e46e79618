use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{ProjectError, SandboxError};
use crate::foundry::Foundry;
use crate::registry::{ProjectStatus, Template};
use crate::sandbox::{FileEntry, PathSandbox};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub foundry: Arc<Foundry>,
}

pub type SharedState = Arc<AppState>;

// ── Request / response payloads ───────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub template: Option<Template>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub project_id: String,
    pub status: ProjectStatus,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub project_id: String,
    pub status: ProjectStatus,
    pub preview_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct FilesResponse {
    pub project_id: String,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub project_id: String,
    pub preview_url: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<ProjectError> for ApiError {
    fn from(err: ProjectError) -> Self {
        match err {
            ProjectError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            ProjectError::Validation(_) => ApiError::BadRequest(err.to_string()),
            ProjectError::Sandbox(SandboxError::PathValidation { .. }) => {
                ApiError::Forbidden(err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

/// Routes relative to the API prefix.
pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/generate", post(start_generation))
        .route("/projects/{id}/status", get(get_status))
        .route("/projects/{id}/files", get(list_files))
        .route("/projects/{id}/preview", get(get_preview))
        .route("/projects/{id}/preview/{*path}", get(serve_preview_file))
        .route("/projects/{id}/regenerate", post(regenerate))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn start_generation(
    State(state): State<SharedState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<GenerateResponse>), ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let project = state
        .foundry
        .generate(&request.prompt, request.template)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(GenerateResponse {
            project_id: project.id.clone(),
            status: project.status,
        }),
    ))
}

async fn regenerate(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<GenerateResponse>), ApiError> {
    let project = state.foundry.regenerate(&id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(GenerateResponse {
            project_id: project.id.clone(),
            status: project.status,
        }),
    ))
}

async fn get_status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let registry = state.foundry.registry();
    let project = registry.get(&id).await?;
    Ok(Json(StatusResponse {
        project_id: project.id.clone(),
        status: project.status,
        preview_url: registry.preview_url(&project),
        created_at: project.created_at,
        updated_at: project.updated_at,
    }))
}

async fn list_files(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<FilesResponse>, ApiError> {
    let files = state.foundry.registry().list_files(&id).await?;
    Ok(Json(FilesResponse {
        project_id: id,
        files,
    }))
}

async fn get_preview(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let registry = state.foundry.registry();
    let project = registry.get(&id).await?;
    Ok(Json(PreviewResponse {
        project_id: project.id.clone(),
        preview_url: registry.preview_url(&project),
    }))
}

/// Serve a file from the generation root. Directories serve their
/// `index.html`.
async fn serve_preview_file(
    State(state): State<SharedState>,
    Path((id, path)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let project = state.foundry.registry().get(&id).await?;
    let sandbox = PathSandbox::new(project.generation_root());

    let mut resolved = sandbox.resolve(&path).map_err(ProjectError::from)?;
    if resolved.is_dir() {
        resolved = sandbox
            .resolve(&format!("{}/index.html", path.trim_end_matches('/')))
            .map_err(ProjectError::from)?;
    }

    let bytes = match tokio::fs::read(&resolved).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!("File '{}' not found", path)));
        }
        Err(e) => {
            warn!(project_id = %id, path = %path, error = %e, "Failed to read preview file");
            return Err(ApiError::Internal(format!("Failed to read '{}'", path)));
        }
    };

    let mime = mime_guess::from_path(&resolved).first_or_octet_stream();
    Response::builder()
        .header(header::CONTENT_TYPE, mime.as_ref())
        .body(Body::from(bytes))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FoundryConfig;
    use crate::scaffold::StaticScaffolder;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn state(dir: &tempfile::TempDir) -> SharedState {
        let mut config = FoundryConfig::default();
        config.projects.root = dir.path().join("projects");
        let foundry = Foundry::new(config, None, Arc::new(StaticScaffolder::new()));
        Arc::new(AppState {
            foundry: Arc::new(foundry),
        })
    }

    fn app(state: SharedState) -> Router {
        Router::new().nest("/api", api_router()).with_state(state)
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_generate_returns_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(state(&dir))
            .oneshot(post_json(
                "/api/generate",
                serde_json::json!({"prompt": "Build a landing page", "template": "vite"}),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "created");
        assert_eq!(json["project_id"].as_str().unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_generate_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);

        for body in [
            serde_json::json!({"prompt": ""}),
            serde_json::json!({"prompt": "x".repeat(4097)}),
            serde_json::json!({"prompt": "ok", "template": "angular"}),
            serde_json::json!({"template": "vite"}),
        ] {
            let resp = app(state.clone())
                .oneshot(post_json("/api/generate", body))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            assert!(body_json(resp).await["error"].is_string());
        }
    }

    #[tokio::test]
    async fn test_unknown_project_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        for uri in [
            "/api/projects/nope/status",
            "/api/projects/nope/files",
            "/api/projects/nope/preview",
            "/api/projects/nope/preview/index.html",
        ] {
            let resp = app(state.clone()).oneshot(get(uri)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_status_files_and_preview_for_existing_project() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let registry = state.foundry.registry().clone();
        let project = registry.create("prompt", None).await.unwrap();
        let root = project.generation_root();
        std::fs::create_dir_all(root.join("css")).unwrap();
        std::fs::write(root.join("index.html"), "<h1>hi</h1>").unwrap();
        std::fs::write(root.join("css/site.css"), "body{}").unwrap();
        registry.set_preview(&project.id, "index.html").await.unwrap();

        let resp = app(state.clone())
            .oneshot(get(&format!("/api/projects/{}/status", project.id)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "created");
        let expected_url = format!("/api/projects/{}/preview/index.html", project.id);
        assert_eq!(json["preview_url"], expected_url.as_str());

        let resp = app(state.clone())
            .oneshot(get(&format!("/api/projects/{}/files", project.id)))
            .await
            .unwrap();
        let json = body_json(resp).await;
        let paths: Vec<_> = json["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["path"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(paths, vec!["css", "css/site.css", "index.html"]);

        let resp = app(state.clone())
            .oneshot(get(&format!("/api/projects/{}/preview", project.id)))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["preview_url"], expected_url.as_str());

        let resp = app(state.clone())
            .oneshot(get(&expected_url))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/html");
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"<h1>hi</h1>");

        let resp = app(state)
            .oneshot(get(&format!("/api/projects/{}/preview/css/site.css", project.id)))
            .await
            .unwrap();
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/css");
    }

    #[tokio::test]
    async fn test_preview_escape_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let project = state.foundry.registry().create("prompt", None).await.unwrap();
        std::fs::write(project.project_dir.join("secret.txt"), "secret").unwrap();

        let resp = app(state)
            .oneshot(get(&format!(
                "/api/projects/{}/preview/..%2Fsecret.txt",
                project.id
            )))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_missing_preview_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let project = state.foundry.registry().create("prompt", None).await.unwrap();

        let resp = app(state)
            .oneshot(get(&format!("/api/projects/{}/preview/nope.js", project.id)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
