use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockBuilder};

pub(crate) const GENERATE_CONTENT_PATH_REGEX: &str = r"^/v1beta/models/[^/]+:generateContent$";
pub(crate) const UPLOAD_PATH: &str = "/upload/v1beta/files";
pub(crate) const FILE_STATUS_PATH_REGEX: &str = r"^/v1beta/files/[^/]+$";

pub(crate) fn post_path_regex(pattern: &str) -> MockBuilder {
    Mock::given(method("POST")).and(path_regex(pattern))
}

pub(crate) fn get_path_regex(pattern: &str) -> MockBuilder {
    Mock::given(method("GET")).and(path_regex(pattern))
}

pub(crate) fn post_path(exact: &str) -> MockBuilder {
    Mock::given(method("POST")).and(path(exact))
}

pub(crate) fn text_response(text: &str) -> serde_json::Value {
    serde_json::json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] }
        }]
    })
}
