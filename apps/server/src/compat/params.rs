//! Request parameters for the compatibility routes
//!
//! qBittorrent clients send the same parameters either in the query string
//! (GET) or in a urlencoded, multipart or JSON body (POST); [`QbParams`]
//! accepts all of them.

use crate::error::ApiError;
use axum::{
    async_trait,
    body::Body,
    extract::{FromRequest, Multipart, Query, Request},
    http::{header::CONTENT_TYPE, Method},
    Form, Json,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;

pub struct QbParams<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for QbParams<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if req.method() != Method::GET && content_type.starts_with("application/json") {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            return Ok(Self(value));
        }

        if req.method() != Method::GET
            && content_type.starts_with("application/x-www-form-urlencoded")
        {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            return Ok(Self(value));
        }

        if req.method() != Method::GET && content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            return Ok(Self(from_multipart(multipart, state).await?));
        }

        if req.method() != Method::GET && !content_type.is_empty() {
            return Err(ApiError::bad_request(format!(
                "Unsupported content type: {}",
                content_type
            )));
        }

        let Query(value) =
            Query::<T>::try_from_uri(req.uri()).map_err(|e| ApiError::bad_request(e.body_text()))?;
        Ok(Self(value))
    }
}

/// Decode the text fields of a multipart body. File parts (`.torrent`
/// uploads) are skipped.
async fn from_multipart<T, S>(mut multipart: Multipart, state: &S) -> Result<T, ApiError>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    let mut pairs: Vec<(String, String)> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        if field.file_name().is_some() {
            continue;
        }
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let value = field
            .text()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        pairs.push((name, value));
    }
    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter())
        .finish();

    let request = axum::http::Request::builder()
        .method(Method::POST)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let Form(value) = Form::<T>::from_request(request, state)
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?;
    Ok(value)
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginParams {
    #[serde(default, alias = "userName", alias = "UserName")]
    pub username: String,
    #[serde(default, alias = "Password")]
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct HashParams {
    #[serde(default, alias = "Hash")]
    pub hash: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    #[serde(default, alias = "Hashes")]
    pub hashes: String,
    #[serde(default, rename = "deleteFiles", alias = "DeleteFiles")]
    pub delete_files: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct AddParams {
    #[serde(default, alias = "Urls")]
    pub urls: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SetCategoryParams {
    #[serde(default, alias = "Hashes")]
    pub hashes: String,
    #[serde(default, alias = "Category")]
    pub category: Option<String>,
}

/// Split a delimited batch parameter, trimming each element and skipping
/// empty ones
pub fn split_batch(raw: &str, delimiter: char) -> Vec<&str> {
    raw.split(delimiter)
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .collect()
}
