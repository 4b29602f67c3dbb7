//! Helpers for deriving cache metadata from HTTP responses.

use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap};

use crate::metadata::ContentInfo;

/// Extract [`ContentInfo`] from response headers.
///
/// Unparsable or absent headers degrade to unknown values, never errors.
pub fn content_info_from_headers(headers: &HeaderMap) -> ContentInfo {
    let content_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let accepts_byte_ranges = headers
        .get(ACCEPT_RANGES)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("bytes"));

    ContentInfo {
        content_length,
        content_type,
        accepts_byte_ranges,
    }
}

/// Extract [`ContentInfo`] from a response, typically the HEAD request
/// made before streaming a resource into the cache.
pub fn content_info_from_response(response: &reqwest::Response) -> ContentInfo {
    content_info_from_headers(response.headers())
}
