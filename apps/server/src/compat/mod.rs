//! qBittorrent Web API compatibility layer
//!
//! Reproduces the subset of `/api/v2` that media managers use to drive a
//! download client. Every route except `auth/login` requires a session.

mod handlers;
mod params;

pub use handlers::{BuildInfo, APP_VERSION, BUILD_INFO, WEB_API_VERSION};
pub use params::split_batch;

use crate::auth::SESSION_COOKIE;
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::{header::COOKIE, HeaderMap},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use handlers::*;

/// Build the `/api/v2` router
pub fn router(state: AppState) -> Router {
    let open = Router::new().route("/auth/login", get(auth_login).post(auth_login));

    let protected = Router::new()
        .route("/auth/logout", get(auth_logout).post(auth_logout))
        // application
        .route("/app/version", get(app_version).post(app_version))
        .route(
            "/app/webapiVersion",
            get(app_webapi_version).post(app_webapi_version),
        )
        .route("/app/buildInfo", get(app_build_info).post(app_build_info))
        .route("/app/shutdown", get(app_shutdown).post(app_shutdown))
        .route("/app/preferences", get(app_preferences).post(app_preferences))
        .route("/app/setPreferences", get(accepted).post(accepted))
        .route(
            "/app/defaultSavePath",
            get(app_default_save_path).post(app_default_save_path),
        )
        // torrents
        .route("/torrents/info", get(torrents_info).post(torrents_info))
        .route(
            "/torrents/properties",
            get(torrents_properties).post(torrents_properties),
        )
        .route("/torrents/delete", get(torrents_delete).post(torrents_delete))
        .route("/torrents/add", get(torrents_add).post(torrents_add))
        .route(
            "/torrents/setCategory",
            get(torrents_set_category).post(torrents_set_category),
        )
        .route(
            "/torrents/categories",
            get(torrents_categories).post(torrents_categories),
        )
        .route("/torrents/pause", get(accepted).post(accepted))
        .route("/torrents/resume", get(accepted).post(accepted))
        .route("/torrents/setShareLimits", get(accepted).post(accepted))
        .route("/torrents/createCategory", get(accepted).post(accepted))
        .route("/torrents/editCategory", get(accepted).post(accepted))
        .route("/torrents/removeCategories", get(accepted).post(accepted))
        .route("/torrents/setForcestart", get(accepted).post(accepted))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    Router::new()
        .nest("/api/v2", open.merge(protected))
        .with_state(state)
}

/// Reject requests without a live session with a bare 401
async fn require_session(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(session) = session_from_headers(req.headers()) else {
        return Err(ApiError::Unauthorized);
    };
    if !state.auth.is_authenticated(&session).await {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(req).await)
}

/// Session id from the `SID` cookie
pub(crate) fn session_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|raw| cookie_value(raw, SESSION_COOKIE))
}

fn cookie_value(raw: &str, name: &str) -> Option<String> {
    raw.split(';').find_map(|entry| {
        let (key, value) = entry.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case(name) {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}
