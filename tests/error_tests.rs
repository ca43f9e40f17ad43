// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::http::StatusCode;
use axum::response::IntoResponse;
use docstore_identity::error::{AppError, StoreError};

#[test]
fn test_retryable_kinds() {
    assert!(StoreError::Conflict("taken".to_string()).is_retryable());
    assert!(StoreError::Concurrency("stale".to_string()).is_retryable());

    assert!(!StoreError::Validation("empty".to_string()).is_retryable());
    assert!(!StoreError::Configuration("no index".to_string()).is_retryable());
    assert!(!StoreError::Database("down".to_string()).is_retryable());
    assert!(!StoreError::NotFound("gone".to_string()).is_retryable());
}

#[test]
fn test_store_errors_map_to_status_codes() {
    let cases = [
        (StoreError::NotFound("x".to_string()), StatusCode::NOT_FOUND),
        (StoreError::Validation("x".to_string()), StatusCode::BAD_REQUEST),
        (StoreError::Conflict("x".to_string()), StatusCode::CONFLICT),
        (StoreError::Concurrency("x".to_string()), StatusCode::CONFLICT),
        (
            StoreError::Database("x".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
        (
            StoreError::Configuration("x".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];

    for (err, status) in cases {
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), status);
    }
}
