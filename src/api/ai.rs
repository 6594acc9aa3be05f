use std::sync::Arc;

use axum::{
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::{
    auth::ClubOnly,
    error::{AppError, AppResult},
    vision::EventDraft,
    AppContext,
};

#[derive(Deserialize)]
struct ExtractRequest {
    image: String,
    caption: Option<String>,
}

/// Accepts both bare base64 and `data:image/...;base64,` URLs.
fn strip_data_url(image: &str) -> &str {
    let image = image.trim();
    match image.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => image,
    }
}

async fn extract_event(
    Extension(ctx): Extension<Arc<AppContext>>,
    ClubOnly(caller): ClubOnly,
    Json(req): Json<ExtractRequest>,
) -> AppResult<Json<EventDraft>> {
    let image = strip_data_url(&req.image);
    let bytes = STANDARD
        .decode(image)
        .map_err(|_| AppError::bad_request("image is not valid base64"))?;
    if !infer::is_image(&bytes) {
        return Err(AppError::bad_request("upload is not an image"));
    }

    let draft = ctx
        .vision
        .extract(image, req.caption.as_deref())
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, model = ctx.vision.model(), "event extraction failed");
            AppError::from(StatusCode::BAD_GATEWAY, "vision model is unavailable")
        })?;

    tracing::info!(club_id = caller.user_id, bytes = bytes.len(), "event details extracted");
    Ok(Json(draft))
}

#[derive(Serialize)]
struct VisionStatus {
    available: bool,
    model: String,
}

async fn status(Extension(ctx): Extension<Arc<AppContext>>) -> Json<VisionStatus> {
    Json(VisionStatus {
        available: ctx.vision.is_available().await,
        model: ctx.vision.model().to_string(),
    })
}

pub fn app() -> Router {
    Router::new()
        .route("/extract-event", post(extract_event))
        .route("/status", get(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::Role, test_support};
    use axum::http::Method;
    use serde_json::json;

    #[test]
    fn data_urls_are_unwrapped() {
        assert_eq!(strip_data_url("data:image/png;base64,iVBORw0"), "iVBORw0");
        assert_eq!(strip_data_url("  iVBORw0\n"), "iVBORw0");
        assert_eq!(strip_data_url("abc;base64,def"), "abc;base64,def");
    }

    #[tokio::test]
    async fn students_cannot_extract() {
        let token = test_support::token(3, Role::Student);
        let (status, _) = test_support::send(
            Method::POST,
            "/api/ai/extract-event",
            Some(&token),
            Some(json!({ "image": "aGVsbG8=" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn garbage_images_are_rejected() {
        let token = test_support::token(7, Role::Club);
        let (status, body) = test_support::send(
            Method::POST,
            "/api/ai/extract-event",
            Some(&token),
            Some(json!({ "image": "not base64 at all!" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "image is not valid base64");

        let (status, body) = test_support::send(
            Method::POST,
            "/api/ai/extract-event",
            Some(&token),
            Some(json!({ "image": "aGVsbG8=" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "upload is not an image");
    }
}
