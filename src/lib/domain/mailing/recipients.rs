//! Recipient tables loaded from delimited text

use std::sync::Arc;

use tracing::{debug, warn};

use super::errors::LoadRecipientsError;

/// Column names tried, in order, when looking for the recipient address
pub const ADDRESS_COLUMNS: [&str; 5] = [
    "email",
    "email address",
    "email_address",
    "e-mail",
    "recipient",
];

const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];
const SNIFF_SAMPLE: usize = 1024;
const SNIFF_LINES: usize = 10;
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Windows-1252 code points for 0x80..=0x9F; `None` marks undefined bytes.
const WINDOWS_1252_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'), None, Some('\u{201A}'), Some('\u{0192}'),
    Some('\u{201E}'), Some('\u{2026}'), Some('\u{2020}'), Some('\u{2021}'),
    Some('\u{02C6}'), Some('\u{2030}'), Some('\u{0160}'), Some('\u{2039}'),
    Some('\u{0152}'), None, Some('\u{017D}'), None,
    None, Some('\u{2018}'), Some('\u{2019}'), Some('\u{201C}'),
    Some('\u{201D}'), Some('\u{2022}'), Some('\u{2013}'), Some('\u{2014}'),
    Some('\u{02DC}'), Some('\u{2122}'), Some('\u{0161}'), Some('\u{203A}'),
    Some('\u{0153}'), None, Some('\u{017E}'), Some('\u{0178}'),
];

/// One row of recipient data, keyed by lower-cased column name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecipientRow {
    columns: Arc<[String]>,
    values: Vec<String>,
}

impl RecipientRow {
    /// Builds a row from `(column, value)` pairs. Column names are trimmed and
    /// lower-cased; later duplicates are ignored.
    pub fn new<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut columns: Vec<String> = Vec::new();
        let mut values = Vec::new();

        for (name, value) in fields {
            let name = normalize_column(name.as_ref());

            if name.is_empty() || columns.contains(&name) {
                continue;
            }

            columns.push(name);
            values.push(value.into());
        }

        Self {
            columns: columns.into(),
            values,
        }
    }

    /// Looks up a field, ignoring the case of `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = normalize_column(name);

        self.columns
            .iter()
            .position(|column| *column == name)
            .map(|i| self.values[i].as_str())
    }

    /// Whether every field of the row is empty or whitespace
    pub fn is_blank(&self) -> bool {
        self.values.iter().all(|value| value.trim().is_empty())
    }
}

/// An ordered table of recipients
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecipientTable {
    columns: Arc<[String]>,
    rows: Vec<RecipientRow>,
}

impl RecipientTable {
    /// Parses a delimited text table.
    ///
    /// The bytes are decoded as UTF-8, falling back to Windows-1252, and a
    /// leading byte-order mark is dropped. The delimiter is sniffed from the
    /// start of the content and defaults to a comma. Column names are trimmed
    /// and lower-cased; unnamed columns are dropped.
    ///
    /// # Errors
    /// * [`LoadRecipientsError::Encoding`] when the bytes cannot be decoded
    /// * [`LoadRecipientsError::NoHeader`] when there is no header row
    /// * [`LoadRecipientsError::Parse`] when the table is malformed
    pub fn load(raw: &[u8]) -> Result<Self, LoadRecipientsError> {
        let text = decode(raw)?;

        if text.trim().is_empty() {
            return Err(LoadRecipientsError::NoHeader);
        }

        let delimiter = sniff_delimiter(&text);
        debug!("using {:?} as the recipient file delimiter", delimiter as char);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut columns = Vec::new();
        let mut positions = Vec::new();

        for (i, header) in reader.headers()?.iter().enumerate() {
            let name = normalize_column(header);

            if name.is_empty() {
                warn!("dropping unnamed column {} from the recipient file", i + 1);
                continue;
            }

            if columns.contains(&name) {
                warn!("dropping duplicate column {:?} from the recipient file", name);
                continue;
            }

            columns.push(name);
            positions.push(i);
        }

        if columns.is_empty() {
            return Err(LoadRecipientsError::NoHeader);
        }

        let columns: Arc<[String]> = columns.into();
        let mut rows = Vec::new();

        for record in reader.records() {
            let record = record?;

            let values = positions
                .iter()
                .map(|&i| record.get(i).unwrap_or_default().to_string())
                .collect();

            rows.push(RecipientRow {
                columns: Arc::clone(&columns),
                values,
            });
        }

        debug!("loaded {} recipient rows with columns {:?}", rows.len(), columns);

        Ok(Self { columns, rows })
    }

    /// A one-row table holding only an `email` column, used for manual sends
    pub fn single(address: &str) -> Self {
        let row = RecipientRow::new([(ADDRESS_COLUMNS[0], address.trim())]);

        Self {
            columns: Arc::clone(&row.columns),
            rows: vec![row],
        }
    }

    /// The normalized column names in file order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The rows in file order
    pub fn rows(&self) -> &[RecipientRow] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Resolves the column holding recipient addresses.
    ///
    /// Well-known names are tried in the order of [`ADDRESS_COLUMNS`], then any
    /// column whose name contains `mail`.
    pub fn address_column(&self) -> Result<&str, LoadRecipientsError> {
        ADDRESS_COLUMNS
            .iter()
            .find_map(|candidate| self.columns.iter().find(|column| column == candidate))
            .or_else(|| self.columns.iter().find(|column| column.contains("mail")))
            .map(String::as_str)
            .ok_or_else(|| LoadRecipientsError::NoAddressColumn {
                columns: self.columns.to_vec(),
            })
    }
}

fn normalize_column(name: &str) -> String {
    name.trim().trim_start_matches('\u{feff}').trim().to_lowercase()
}

fn decode(raw: &[u8]) -> Result<String, LoadRecipientsError> {
    let raw = raw.strip_prefix(UTF8_BOM).unwrap_or(raw);

    match std::str::from_utf8(raw) {
        Ok(text) => Ok(text.to_string()),
        Err(_) => {
            debug!("recipient file is not UTF-8, decoding as Windows-1252");

            raw.iter()
                .map(|&byte| match byte {
                    0x80..=0x9F => WINDOWS_1252_HIGH[usize::from(byte - 0x80)],
                    _ => Some(char::from(byte)),
                })
                .collect::<Option<String>>()
                .ok_or(LoadRecipientsError::Encoding)
        }
    }
}

/// Picks the delimiter that splits the sampled lines into a consistent number
/// of fields, preferring the one producing the most fields.
fn sniff_delimiter(text: &str) -> u8 {
    let sample: String = text.chars().take(SNIFF_SAMPLE).collect();
    let truncated = sample.len() < text.len();

    let mut lines: Vec<&str> = sample
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(SNIFF_LINES)
        .collect();

    if truncated && lines.len() > 1 {
        lines.pop();
    }

    let Some((header, body)) = lines.split_first() else {
        return b',';
    };

    let header_counts = DELIMITERS.map(|delimiter| count_unquoted(header, delimiter));

    let consistent = DELIMITERS
        .iter()
        .zip(header_counts)
        .filter(|&(&delimiter, count)| {
            count > 0
                && body
                    .iter()
                    .all(|line| count_unquoted(line, delimiter) == count)
        })
        .max_by_key(|&(_, count)| count);

    let frequent = DELIMITERS
        .iter()
        .zip(header_counts)
        .filter(|&(_, count)| count > 0)
        .max_by_key(|&(_, count)| count);

    consistent
        .or(frequent)
        .map(|(&delimiter, _)| delimiter)
        .unwrap_or(b',')
}

fn count_unquoted(line: &str, delimiter: u8) -> usize {
    let mut quoted = false;
    let mut count = 0;

    for byte in line.bytes() {
        match byte {
            b'"' => quoted = !quoted,
            b if b == delimiter && !quoted => count += 1,
            _ => {}
        }
    }

    count
}
