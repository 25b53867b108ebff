//! Capture targets: URL parsing and output file naming.

use thiserror::Error;
use url::Url;

pub const DEFAULT_NAME: &str = "document";
pub const MAX_NAME_LEN: usize = 120;

const FORBIDDEN_CHARS: &[char] = &[' ', '*', '"', '/', '\\', '<', '>', ':', '|', '?'];
const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "file"];
/// Path segments that describe a view rather than the document.
const GENERIC_SEGMENTS: &[&str] = &[
    "view", "edit", "preview", "read", "embed", "content", "index.html", "index.htm",
];

#[derive(Debug, Error)]
pub enum TargetParseError {
    #[error("Invalid URL '{value}': {message}. Hint: include http(s):// and ensure the URL is well-formed.")]
    InvalidUrl { value: String, message: String },
    #[error("Unsupported URL scheme '{scheme}' in '{value}'. Supported schemes: {supported}.")]
    UnsupportedScheme {
        value: String,
        scheme: String,
        supported: String,
    },
}

pub fn parse_target(value: &str) -> Result<Url, TargetParseError> {
    let trimmed = value.trim();
    let url = Url::parse(trimmed).map_err(|e| TargetParseError::InvalidUrl {
        value: trimmed.to_string(),
        message: e.to_string(),
    })?;

    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(TargetParseError::UnsupportedScheme {
            value: trimmed.to_string(),
            scheme: url.scheme().to_string(),
            supported: SUPPORTED_SCHEMES.join(", "),
        });
    }
    if url.scheme() != "file" && url.host_str().map_or(true, str::is_empty) {
        return Err(TargetParseError::InvalidUrl {
            value: trimmed.to_string(),
            message: "missing host".to_string(),
        });
    }
    Ok(url)
}

/// Make `raw` safe to use as a file stem.
///
/// Forbidden characters and control characters become `_`. Names without a
/// single alphanumeric character fall back to [`DEFAULT_NAME`].
pub fn sanitize_name(raw: &str) -> String {
    usable_name(raw).unwrap_or_else(|| DEFAULT_NAME.to_string())
}

fn usable_name(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if FORBIDDEN_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .take(MAX_NAME_LEN)
        .collect();

    let cleaned = cleaned.trim_end_matches('.');
    cleaned
        .chars()
        .any(char::is_alphanumeric)
        .then(|| cleaned.to_string())
}

/// Output name: explicit name, then page title, then the last meaningful URL
/// path segment, then the host.
pub fn derive_name(explicit: Option<&str>, title: Option<&str>, url: &Url) -> String {
    let from_path = url.path_segments().and_then(|segments| {
        segments
            .filter(|s| !s.is_empty())
            .filter(|s| !GENERIC_SEGMENTS.contains(&s.to_ascii_lowercase().as_str()))
            .last()
            .map(strip_web_extension)
    });

    [explicit, title, from_path, url.host_str()]
        .into_iter()
        .flatten()
        .find_map(usable_name)
        .unwrap_or_else(|| DEFAULT_NAME.to_string())
}

fn strip_web_extension(segment: &str) -> &str {
    for ext in [".html", ".htm", ".pdf", ".php", ".aspx"] {
        if let Some(stem) = segment.strip_suffix(ext) {
            if !stem.is_empty() {
                return stem;
            }
        }
    }
    segment
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn forbidden_characters_become_underscores() {
        assert_eq!(
            sanitize_name("My/Title: With*Forbidden\"Chars"),
            "My_Title__With_Forbidden_Chars"
        );
        assert_eq!(sanitize_name("tab\there"), "tab_here");
    }

    #[test]
    fn unusable_names_fall_back() {
        assert_eq!(sanitize_name(""), DEFAULT_NAME);
        assert_eq!(sanitize_name("???"), DEFAULT_NAME);
        assert_eq!(sanitize_name("..."), DEFAULT_NAME);
    }

    #[test]
    fn long_names_are_capped() {
        let long = "a".repeat(500);
        assert_eq!(sanitize_name(&long).chars().count(), MAX_NAME_LEN);
    }

    #[test]
    fn naming_priority() {
        let u = url("https://docs.example.com/document/1234/annual-report.html");
        assert_eq!(derive_name(Some("mine"), Some("Title"), &u), "mine");
        assert_eq!(derive_name(None, Some("Annual Report"), &u), "Annual_Report");
        assert_eq!(derive_name(None, None, &u), "annual-report");
        assert_eq!(derive_name(None, Some("  "), &u), "annual-report");
    }

    #[test]
    fn generic_segments_are_skipped() {
        let u = url("https://docs.example.com/d/xyz/view");
        assert_eq!(derive_name(None, None, &u), "xyz");
        let root = url("https://docs.example.com/");
        assert_eq!(derive_name(None, None, &root), "docs.example.com");
    }

    #[test]
    fn parse_target_rejects_bad_input() {
        assert!(matches!(
            parse_target("not a url"),
            Err(TargetParseError::InvalidUrl { .. })
        ));
        assert!(matches!(
            parse_target("ftp://example.com/doc"),
            Err(TargetParseError::UnsupportedScheme { .. })
        ));
        assert!(parse_target(" https://example.com/doc ").is_ok());
    }
}
