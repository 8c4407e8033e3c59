//! Review API handlers. JSON in/out: success responses wrap their payload
//! in `{"data": …}` with optional `pagination`; failures return
//! `{"error": …, "code": …}` with a stable short code.

pub mod batches;
pub mod cache;
pub mod conversations;
pub mod health;
pub mod proposals;
pub mod rulesets;
pub mod runs;
pub mod streams;
pub mod webhooks;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use docsmith_store::StoreError;

#[derive(Serialize)]
pub struct Envelope<T: Serialize> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

#[derive(Serialize)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
    pub total: usize,
}

#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: &'static str,
}

pub type ApiResult<T> = Result<Json<Envelope<T>>, (StatusCode, Json<ApiError>)>;

pub fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(Envelope {
        data,
        pagination: None,
    }))
}

pub fn ok_paginated<T: Serialize>(data: T, limit: usize, offset: usize, total: usize) -> ApiResult<T> {
    Ok(Json(Envelope {
        data,
        pagination: Some(Pagination {
            limit,
            offset,
            total,
        }),
    }))
}

pub fn unauthorized<T: Serialize>() -> ApiResult<T> {
    Err((
        StatusCode::UNAUTHORIZED,
        Json(ApiError {
            error: "Set 'Authorization: Bearer <admin token>'".to_string(),
            code: "UNAUTHORIZED",
        }),
    ))
}

pub fn bad_request<T: Serialize>(message: impl Into<String>) -> ApiResult<T> {
    Err((
        StatusCode::BAD_REQUEST,
        Json(ApiError {
            error: message.into(),
            code: "BAD_REQUEST",
        }),
    ))
}

/// Map store failures onto HTTP statuses; the short code travels verbatim.
pub fn store_error(e: StoreError) -> (StatusCode, Json<ApiError>) {
    let status = match &e {
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::Frozen { .. } | StoreError::BatchNotDraft { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ApiError {
            error: e.to_string(),
            code: e.code(),
        }),
    )
}
