//! Static file serving.
//!
//! `/assets/*` is served from `<static_dir>/assets`; every other path gets
//! `<static_dir>/index.html` so the front-end can do its own routing.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::extract::{self, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;

use crate::state::AppState;

/// Create router for static assets with SPA fallback.
pub(crate) fn static_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/assets/{*path}", get(serve_asset))
        .fallback(serve_index)
}

async fn serve_asset(
    State(state): State<Arc<AppState>>,
    extract::Path(path): extract::Path<String>,
) -> Response {
    let Some(relative) = safe_relative(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let file = state.static_dir.join("assets").join(relative);

    match tokio::fs::read(&file).await {
        Ok(content) => {
            let mime = mime_guess::from_path(&file).first_or_octet_stream();
            ([(header::CONTENT_TYPE, mime.to_string())], content).into_response()
        }
        Err(e) => {
            tracing::debug!(path = %file.display(), error = %e, "Asset not found");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

async fn serve_index(State(state): State<Arc<AppState>>) -> Response {
    let index = state.static_dir.join("index.html");
    match tokio::fs::read(&index).await {
        Ok(content) => (
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            content,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(path = %index.display(), error = %e, "index.html not found");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Request path as a relative filesystem path, rejecting traversal.
fn safe_relative(path: &str) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(segment) => relative.push(segment),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_relative_plain() {
        assert_eq!(
            safe_relative("js/app.js"),
            Some(PathBuf::from("js/app.js"))
        );
        assert_eq!(safe_relative("./app.css"), Some(PathBuf::from("app.css")));
    }

    #[test]
    fn test_safe_relative_rejects_traversal() {
        assert_eq!(safe_relative("../secret.txt"), None);
        assert_eq!(safe_relative("js/../../secret.txt"), None);
        assert_eq!(safe_relative("/etc/passwd"), None);
    }

    #[test]
    fn test_safe_relative_empty() {
        assert_eq!(safe_relative(""), None);
        assert_eq!(safe_relative("."), None);
    }
}
