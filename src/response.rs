// src/response.rs

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::ErrorCode;

/// Standardized API response envelope.
/// Every JSON response, success or failure, has this shape.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    pub metadata: Metadata,
}

/// Structured error payload carried inside the envelope.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub per_page: i64,
    pub total_items: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(page: i64, per_page: i64, total_items: i64) -> Self {
        let total_pages = if per_page > 0 {
            (total_items + per_page - 1) / per_page
        } else {
            0
        };
        Self {
            page,
            per_page,
            total_items,
            total_pages,
        }
    }
}

/// Request tracing metadata attached to every response.
#[derive(Debug, Serialize)]
pub struct Metadata {
    pub request_id: String,
    pub timestamp: String,
}

impl Metadata {
    pub fn build() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Sends a successful JSON response with the given status code and data.
pub fn success<T: Serialize>(status: StatusCode, data: T) -> Response {
    let body = Envelope {
        data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        error: None,
        pagination: None,
        metadata: Metadata::build(),
    };
    (status, Json(body)).into_response()
}

/// Sends a successful response with pagination metadata.
pub fn success_paginated<T: Serialize>(
    status: StatusCode,
    data: T,
    pagination: Pagination,
) -> Response {
    let body = Envelope {
        data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        error: None,
        pagination: Some(pagination),
        metadata: Metadata::build(),
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_rounds_up() {
        let p = Pagination::new(1, 10, 25);
        assert_eq!(p.total_pages, 3);
        let p = Pagination::new(1, 10, 30);
        assert_eq!(p.total_pages, 3);
    }
}
