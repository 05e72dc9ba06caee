use crate::engine::{EngineError, EngineHandle, EngineStatus, RecommendResult};
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use spectacles_model::recommender::RecommendError;
use spectacles_vision::AnalyzerError;
use thiserror::Error;
use tower_http::trace::TraceLayer;

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const INDEX_HTML: &str = include_str!("../static/index.html");

#[derive(Clone)]
struct AppState {
    engine: EngineHandle,
    default_top_k: usize,
}

pub fn router(engine: EngineHandle, default_top_k: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/recommend", post(recommend))
        .route("/api/status", get(status))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState {
            engine,
            default_top_k,
        })
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_upload"),
            Self::Engine(EngineError::Analyzer(e)) => match e {
                AnalyzerError::ImageDecode(_)
                | AnalyzerError::ImageOpen { .. }
                | AnalyzerError::EmptyImage => (StatusCode::BAD_REQUEST, "bad_upload"),
                AnalyzerError::NoFaceDetected => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "no_face_detected")
                }
                AnalyzerError::AmbiguousLandmarks(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "ambiguous_landmarks")
                }
                AnalyzerError::Detector(_) | AnalyzerError::Mesh(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal")
                }
            },
            Self::Engine(EngineError::Recommend(
                RecommendError::Encoding(_) | RecommendError::ArtifactMismatch(_),
            )) => (StatusCode::UNPROCESSABLE_ENTITY, "schema_mismatch"),
            Self::Engine(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, code, "request rejected");
        }
        let body = json!({
            "error": code,
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Serialize)]
struct StatusResponse {
    version: &'static str,
    #[serde(flatten)]
    engine: EngineStatus,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        engine: state.engine.status().clone(),
    })
}

#[derive(Debug, Deserialize)]
struct RecommendQuery {
    top_k: Option<usize>,
}

async fn recommend(
    State(state): State<AppState>,
    query: Result<Query<RecommendQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<RecommendResult>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let top_k = query.top_k.unwrap_or(state.default_top_k);
    if top_k == 0 {
        return Err(ApiError::BadRequest("top_k must be at least 1".to_string()));
    }

    let mut multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let mut image = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() == Some("image") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            image = Some(bytes.to_vec());
            break;
        }
    }
    let image = image
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing multipart field `image`".to_string()))?;

    tracing::debug!(bytes = image.len(), top_k, "recommend request");
    let result = state.engine.recommend(image, top_k).await?;
    Ok(Json(result))
}
