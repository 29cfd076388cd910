//! Subject and body extraction from a merged document

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TITLE_REGEX: Regex =
        Regex::new(r"(?is)<title[^>]*>(.*?)</title\s*>(?:[ \t]*\r?\n)*").unwrap();
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
}

/// Subject used when none can be inferred
pub const DEFAULT_SUBJECT: &str = "No Subject";

/// A subject line and the body that remains once it is removed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedMessage {
    /// The subject line, never empty
    pub subject: String,

    /// The remaining body
    pub body: String,
}

/// Extracts a subject, falling back to [`DEFAULT_SUBJECT`]
pub fn extract(document: &str) -> ExtractedMessage {
    extract_or(document, DEFAULT_SUBJECT)
}

/// Extracts a subject from `document`, falling back to `default_subject`.
///
/// A `<title>` element wins. Otherwise the first non-empty line becomes the
/// subject unless it starts with a tag, in which case the document is treated
/// as all body.
pub fn extract_or(document: &str, default_subject: &str) -> ExtractedMessage {
    if let Some(caps) = TITLE_REGEX.captures(document) {
        let span = caps.get(0).map_or(0..0, |m| m.range());
        let title = collapse_whitespace(caps.get(1).map_or("", |m| m.as_str()));
        let body = format!("{}{}", &document[..span.start], &document[span.end..]);

        return ExtractedMessage {
            subject: non_empty_or(title, default_subject),
            body: body.trim().to_string(),
        };
    }

    let lines: Vec<&str> = document.lines().collect();

    let Some(first) = lines.iter().position(|line| !line.trim().is_empty()) else {
        return ExtractedMessage {
            subject: default_subject.to_string(),
            body: document.to_string(),
        };
    };

    let candidate = lines[first].trim();

    if candidate.starts_with('<') {
        return ExtractedMessage {
            subject: default_subject.to_string(),
            body: lines[first..].join("\n"),
        };
    }

    ExtractedMessage {
        subject: collapse_whitespace(candidate),
        body: lines[first + 1..].join("\n").trim().to_string(),
    }
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_REGEX.replace_all(text.trim(), " ").into_owned()
}

fn non_empty_or(subject: String, default_subject: &str) -> String {
    if subject.is_empty() {
        default_subject.to_string()
    } else {
        subject
    }
}
