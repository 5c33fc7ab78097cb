//! HTTP surface for triggering report imports.

use std::path::PathBuf;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::import::{ImportError, ImportService};
use crate::store::StatisticsStore;

pub const IMPORT_ROUTE: &str = "/services/import_report";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRequest {
    pub path: PathBuf,
    #[serde(default)]
    pub series_id: Option<String>,
}

pub fn import_router<S>(service: ImportService<S>) -> Router
where
    S: StatisticsStore + Send + 'static,
{
    Router::new()
        .route(IMPORT_ROUTE, post(post_import_report::<S>))
        .with_state(service)
}

impl ImportError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedInput(_) => StatusCode::BAD_REQUEST,
            Self::CorruptReport(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ReconciliationFailed(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ImportError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.kind(), "message": self.to_string() });
        (self.status_code(), Json(body)).into_response()
    }
}

async fn post_import_report<S>(
    State(service): State<ImportService<S>>,
    Json(request): Json<ImportRequest>,
) -> Result<Response, ImportError>
where
    S: StatisticsStore + Send + 'static,
{
    info!(
        component = "http",
        event = "http.import.request",
        path = %request.path.display(),
        series_id = request.series_id.as_deref().unwrap_or("")
    );

    let summary = service
        .import_report(request.series_id, request.path)
        .await?;
    Ok((StatusCode::OK, Json(summary)).into_response())
}
