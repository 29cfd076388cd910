//! Placeholder substitution

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use super::RecipientRow;

lazy_static! {
    static ref PLACEHOLDER_REGEX: Regex =
        Regex::new(r"\$(?:\{([^{}]+)\}|([A-Za-z_][A-Za-z0-9_]*))").unwrap();
}

/// Replaces `$name` and `${name}` placeholders with the row's values.
///
/// Names are matched case-insensitively against the row's columns. A bare
/// name is a letter or underscore followed by letters, digits and underscores,
/// so it ends at the first other character: `$e-mail` is `$e` followed by
/// `-mail`. Columns such as `e-mail` or `email address` must be written braced
/// (`${e-mail}`, `${email address}`). Placeholders naming a column the row
/// does not have are left as written.
pub fn merge(template: &str, row: &RecipientRow) -> String {
    PLACEHOLDER_REGEX
        .replace_all(template, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map_or("", |m| m.as_str());

            match row.get(name) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
