//! Template formats and their conversion into deliverable bodies

use std::{fmt, panic, path::Path, str::FromStr};

use lazy_static::lazy_static;
use pulldown_cmark::{html, Event, Options, Parser};
use regex::{Captures, Regex};
use tracing::warn;

const DETECTION_SAMPLE: usize = 1000;

lazy_static! {
    static ref MARKUP_REGEX: Regex = Regex::new(concat!(
        r"(?i)<!doctype|</?(?:html|head|body|title|style|p|div|span|br|hr|table|tr|td|th",
        r"|ul|ol|li|a|img|h[1-6]|strong|em|b|i|u|blockquote|pre|center|font)(?:[\s/][^>]*)?>",
    ))
    .unwrap();
    static ref HEAD_REGEX: Regex = Regex::new(r"(?is)<head\b.*?</head\s*>").unwrap();
    static ref STYLE_REGEX: Regex = Regex::new(r"(?is)<style\b.*?</style\s*>").unwrap();
    static ref SCRIPT_REGEX: Regex = Regex::new(r"(?is)<script\b.*?</script\s*>").unwrap();
    static ref COMMENT_REGEX: Regex = Regex::new(r"(?s)<!--.*?-->").unwrap();
    static ref LINK_REGEX: Regex = Regex::new(
        r#"(?is)<a\b[^>]*?\bhref\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a\s*>"#
    )
    .unwrap();
    static ref BREAK_REGEX: Regex = Regex::new(r"(?i)<br\s*/?>|<hr\b[^>]*>").unwrap();
    static ref LIST_ITEM_REGEX: Regex = Regex::new(r"(?i)<li\b[^>]*>").unwrap();
    static ref BLOCK_END_REGEX: Regex = Regex::new(
        r"(?i)</(?:p|div|h[1-6]|li|tr|table|ul|ol|blockquote|pre|section|article|header|footer)\s*>"
    )
    .unwrap();
    static ref TAG_REGEX: Regex = Regex::new(r"(?s)<[^>]*>").unwrap();
    static ref BLANK_LINES_REGEX: Regex = Regex::new(r"\n{3,}").unwrap();
}

/// The format a template is written in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    /// An HTML document
    Markup,

    /// Markdown
    Structured,

    /// Plain text, sent as is
    Plain,
}

impl SourceFormat {
    /// Infers the format from a file extension, if it is a known one
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let extension = path.as_ref().extension()?.to_str()?.to_lowercase();

        match extension.as_str() {
            "html" | "htm" => Some(Self::Markup),
            "md" | "markdown" => Some(Self::Structured),
            "txt" | "text" => Some(Self::Plain),
            _ => None,
        }
    }

    /// Guesses the format from the start of the content: anything containing
    /// common HTML tags is markup, everything else is treated as Markdown.
    pub fn detect(content: &str) -> Self {
        let end = content
            .char_indices()
            .nth(DETECTION_SAMPLE)
            .map_or(content.len(), |(i, _)| i);

        if MARKUP_REGEX.is_match(&content[..end]) {
            Self::Markup
        } else {
            Self::Structured
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Markup => write!(f, "html"),
            Self::Structured => write!(f, "markdown"),
            Self::Plain => write!(f, "text"),
        }
    }
}

impl FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "html" | "htm" | "markup" => Ok(Self::Markup),
            "markdown" | "md" | "structured" => Ok(Self::Structured),
            "text" | "txt" | "plain" => Ok(Self::Plain),
            other => Err(format!(
                "unknown template format \"{other}\", expected html, markdown or text"
            )),
        }
    }
}

/// The two bodies of a multi-part message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rendition {
    /// The HTML body
    pub html: String,

    /// The plain text body
    pub plain: String,
}

/// Converts a body written in `format` into HTML and plain text.
///
/// Markdown is converted with a parser created for this call only, so nothing
/// carries over from one recipient to the next.
pub fn normalize(body: &str, format: SourceFormat) -> Rendition {
    match format {
        SourceFormat::Markup => Rendition {
            html: body.to_string(),
            plain: html_to_plain(body),
        },
        SourceFormat::Structured => Rendition {
            html: convert_or_unchanged(body, markdown_to_html),
            plain: body.to_string(),
        },
        SourceFormat::Plain => Rendition {
            html: html_document(&format!(
                "<pre style=\"font-family: monospace; white-space: pre-wrap;\">{}</pre>\n",
                html_escape::encode_text(body)
            )),
            plain: body.to_string(),
        },
    }
}

/// Runs `convert` and wraps its output in a document, or returns `body`
/// unconverted if the conversion panics
fn convert_or_unchanged(body: &str, convert: fn(&str) -> String) -> String {
    match panic::catch_unwind(|| convert(body)) {
        Ok(html) => html_document(&html),
        Err(_) => {
            warn!("markdown conversion failed, sending the body unconverted");
            body.to_string()
        }
    }
}

fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_SMART_PUNCTUATION);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    // single newlines are line breaks in an email, not soft wraps
    let parser = Parser::new_ext(markdown, options).map(|event| match event {
        Event::SoftBreak => Event::HardBreak,
        event => event,
    });

    let mut output = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut output, parser);

    output
}

fn html_document(body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n</head>\n<body>\n{body}</body>\n</html>\n"
    )
}

/// Renders an HTML document as readable plain text, keeping link targets
fn html_to_plain(document: &str) -> String {
    let text = HEAD_REGEX.replace_all(document, "");
    let text = STYLE_REGEX.replace_all(&text, "");
    let text = SCRIPT_REGEX.replace_all(&text, "");
    let text = COMMENT_REGEX.replace_all(&text, "");

    let text = LINK_REGEX.replace_all(&text, |caps: &Captures<'_>| {
        let href = caps[1].trim();
        let label = TAG_REGEX.replace_all(&caps[2], "");
        let label = label.trim();

        if label.is_empty() || label == href || href.strip_prefix("mailto:") == Some(label) {
            href.to_string()
        } else {
            format!("{label} ({href})")
        }
    });

    let text = BREAK_REGEX.replace_all(&text, "\n");
    let text = LIST_ITEM_REGEX.replace_all(&text, "- ");
    let text = BLOCK_END_REGEX.replace_all(&text, "\n");
    let text = TAG_REGEX.replace_all(&text, "");
    let text = html_escape::decode_html_entities(&text);

    let text = text
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");

    BLANK_LINES_REGEX
        .replace_all(&text, "\n\n")
        .trim()
        .to_string()
}
