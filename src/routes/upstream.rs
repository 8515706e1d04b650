//! The liveness handler.
//!
//! Answers every request with 200 OK, `Content-Type: text/plain` and the body
//! `OK`. Nothing about the request is inspected, so the handler cannot fail and
//! no request can influence another's response.

use http::header::{HeaderName, CONTENT_TYPE};

use crate::config::{RESPONSE_BODY, RESPONSE_CONTENT_TYPE};

/// Fixed-response handler.
pub async fn ok() -> ([(HeaderName, &'static str); 1], &'static str) {
    ([(CONTENT_TYPE, RESPONSE_CONTENT_TYPE)], RESPONSE_BODY)
}
