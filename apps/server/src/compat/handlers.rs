//! qBittorrent Web API v2 handlers

use crate::auth::SESSION_COOKIE;
use crate::compat::params::{
    split_batch, AddParams, DeleteParams, HashParams, LoginParams, QbParams, SetCategoryParams,
};
use crate::compat::session_from_headers;
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{
        header::{CONTENT_TYPE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use dlbridge_types::{AppPreferences, TorrentCategory, TorrentInfo, TorrentProperties};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const APP_VERSION: &str = "v4.2.3";
pub const WEB_API_VERSION: &str = "2.4.1";

/// Response of `app/buildInfo`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    pub bitness: u32,
    pub boost: &'static str,
    pub libtorrent: &'static str,
    pub openssl: &'static str,
    pub qt: &'static str,
    pub zlib: &'static str,
}

pub const BUILD_INFO: BuildInfo = BuildInfo {
    bitness: 64,
    boost: "1.72.0",
    libtorrent: "1.2.5.0",
    openssl: "1.1.1f",
    qt: "5.13.2",
    zlib: "1.2.11",
};

fn plain(body: &'static str) -> Response {
    let mut response = body.into_response();
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Empty 200, the reply to every accepted command
fn ok_empty() -> Response {
    StatusCode::OK.into_response()
}

// ============================================================================
// Auth
// ============================================================================

pub async fn auth_login(
    State(state): State<AppState>,
    QbParams(params): QbParams<LoginParams>,
) -> Result<Response, ApiError> {
    let session = state
        .auth
        .login(&params.username, &params.password)
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let Some(session) = session else {
        return Ok(plain("Fails."));
    };

    let cookie = HeaderValue::from_str(&format!("{}={}; HttpOnly; Path=/", SESSION_COOKIE, session))
        .map_err(|_| ApiError::bad_request("Failed to encode session cookie"))?;
    let mut response = plain("Ok.");
    response.headers_mut().insert(SET_COOKIE, cookie);
    Ok(response)
}

pub async fn auth_logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if let Some(session) = session_from_headers(&headers) {
        state
            .auth
            .logout(&session)
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
    }
    Ok(ok_empty())
}

// ============================================================================
// Application
// ============================================================================

pub async fn app_version() -> Response {
    plain(APP_VERSION)
}

pub async fn app_webapi_version() -> Response {
    plain(WEB_API_VERSION)
}

pub async fn app_build_info() -> Json<BuildInfo> {
    Json(BUILD_INFO)
}

pub async fn app_shutdown() -> Response {
    info!("Ignoring shutdown request from API client");
    ok_empty()
}

pub async fn app_preferences(
    State(state): State<AppState>,
) -> Result<Json<AppPreferences>, ApiError> {
    Ok(Json(state.registry.preferences().await?))
}

pub async fn app_default_save_path(State(state): State<AppState>) -> Result<String, ApiError> {
    Ok(state.registry.default_save_path().await?)
}

// ============================================================================
// Torrents
// ============================================================================

pub async fn torrents_info(
    State(state): State<AppState>,
) -> Result<Json<Vec<TorrentInfo>>, ApiError> {
    Ok(Json(state.registry.torrent_info().await?))
}

pub async fn torrents_properties(
    State(state): State<AppState>,
    QbParams(params): QbParams<HashParams>,
) -> Result<Json<TorrentProperties>, ApiError> {
    state
        .registry
        .torrent_properties(params.hash.trim())
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

/// Deletes every hash in order; the first failure ends the batch
pub async fn torrents_delete(
    State(state): State<AppState>,
    QbParams(params): QbParams<DeleteParams>,
) -> Result<Response, ApiError> {
    for hash in split_batch(&params.hashes, '|') {
        debug!("Deleting torrent {}", hash);
        state.registry.delete(hash, params.delete_files).await?;
    }
    Ok(ok_empty())
}

/// Adds every URL in order; the first failure ends the batch
pub async fn torrents_add(
    State(state): State<AppState>,
    QbParams(params): QbParams<AddParams>,
) -> Result<Response, ApiError> {
    for url in split_batch(&params.urls, '\n') {
        debug!("Adding {}", url);
        state.registry.add(url).await?;
    }
    Ok(ok_empty())
}

pub async fn torrents_set_category(
    State(state): State<AppState>,
    QbParams(params): QbParams<SetCategoryParams>,
) -> Result<Response, ApiError> {
    for hash in split_batch(&params.hashes, '|') {
        state
            .registry
            .set_category(hash, params.category.as_deref())
            .await?;
    }
    Ok(ok_empty())
}

pub async fn torrents_categories(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<String, TorrentCategory>>, ApiError> {
    Ok(Json(state.registry.categories().await?))
}

/// Accepted for compatibility, changes nothing
pub async fn accepted() -> Response {
    ok_empty()
}
