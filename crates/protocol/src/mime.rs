//! Content-type inference for downloads.

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

/// Fallback content type for unknown extensions.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Extension (lowercase, without dot) to content-type table.
const CONTENT_TYPES: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("json", "application/json"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("epub", "application/epub+zip"),
    ("pdf", "application/pdf"),
];

/// Infer the content type of `path` from its extension.
pub fn content_type_for(path: &str) -> &'static str {
    let name = basename(path);
    let Some((_, ext)) = name.rsplit_once('.') else {
        return OCTET_STREAM;
    };

    CONTENT_TYPES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(ext))
        .map(|(_, content_type)| *content_type)
        .unwrap_or(OCTET_STREAM)
}

/// Last segment of a slash-separated path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// `Content-Disposition` value that makes browsers save the file.
///
/// The quoted `filename` is printable ASCII only. Names that needed
/// rewriting also carry the exact name as RFC 5987 `filename*`.
pub fn attachment_disposition(path: &str) -> String {
    let name = basename(path);
    let fallback: String = name
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();

    if fallback == name {
        return format!("attachment; filename=\"{}\"", fallback);
    }

    let clean: String = name.chars().filter(|c| !c.is_control()).collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        utf8_percent_encode(&clean, NON_ALPHANUMERIC)
    )
}
