// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::{HeaderMap, HeaderValue};

use super::{constant_time_eq, validate_bearer};
use crate::error::HubError;

fn headers(auth: Option<&'static str>) -> HeaderMap {
    let mut map = HeaderMap::new();
    if let Some(value) = auth {
        map.insert("authorization", HeaderValue::from_static(value));
    }
    map
}

#[yare::parameterized(
    equal          = { "secret", "secret", true },
    different      = { "secret", "secreT", false },
    shorter        = { "secre", "secret", false },
    both_empty     = { "", "", true },
)]
fn compares_tokens(a: &str, b: &str, expected: bool) {
    assert_eq!(constant_time_eq(a, b), expected);
}

#[yare::parameterized(
    disabled       = { None, None, true },
    disabled_extra = { None, Some("Bearer anything"), true },
    valid          = { Some("tok"), Some("Bearer tok"), true },
    wrong_token    = { Some("tok"), Some("Bearer nope"), false },
    missing_header = { Some("tok"), None, false },
    wrong_scheme   = { Some("tok"), Some("Basic tok"), false },
)]
fn validates_bearer(expected: Option<&str>, auth: Option<&'static str>, ok: bool) {
    let result = validate_bearer(&headers(auth), expected);
    assert_eq!(result.is_ok(), ok, "got {result:?}");
    if !ok {
        assert_eq!(result, Err(HubError::Unauthorized));
    }
}
