// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::HeaderMap;

use super::*;

fn headers_with(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(parsed) = value.parse() {
        headers.insert("authorization", parsed);
    }
    headers
}

#[test]
fn no_configured_token_allows_all() {
    assert!(validate_bearer(&HeaderMap::new(), None).is_ok());
    assert!(validate_ws_query("", None).is_ok());
}

#[test]
fn bearer_accepts_exact_match() {
    let headers = headers_with("Bearer sekrit");
    assert!(validate_bearer(&headers, Some("sekrit")).is_ok());
}

#[yare::parameterized(
    missing = { HeaderMap::new() },
    wrong_scheme = { headers_with("Basic sekrit") },
    wrong_token = { headers_with("Bearer nope") },
)]
fn bearer_rejects(headers: HeaderMap) {
    assert_eq!(validate_bearer(&headers, Some("sekrit")).err(), Some(FaultCode::Unauthorized));
}

#[test]
fn ws_query_token() {
    assert!(validate_ws_query("token=sekrit", Some("sekrit")).is_ok());
    assert!(validate_ws_query("a=b&token=sekrit&c=d", Some("sekrit")).is_ok());
    assert_eq!(
        validate_ws_query("token=wrong", Some("sekrit")).err(),
        Some(FaultCode::Unauthorized)
    );
    assert_eq!(validate_ws_query("", Some("sekrit")).err(), Some(FaultCode::Unauthorized));
}
