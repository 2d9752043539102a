//! `.zem` metadata files.
//!
//! A content server hands the browser a small file describing the document
//! to edit. The format is a block of `key:value` header lines, one empty line,
//! then the raw document body:
//!
//! ```text
//! url:http://cms.example.com/site/index_html
//! meta_type:Page Template
//! content_type:text/html
//! lock-token:3f1b…
//!
//! <html>…</html>
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::MetadataError;

/// Parsed header block of a `.zem` file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metadata {
    pub url: String,
    pub meta_type: Option<String>,
    pub content_type: Option<String>,
    pub title: Option<String>,
    /// Lock already held by this user in another session.
    pub lock_token: Option<String>,
    /// Server hint that an existing lock may be borrowed without asking.
    pub borrow_lock: bool,
    /// Body was left out of the file and must be fetched from `url`.
    pub skip_data: bool,
    pub auth: Option<String>,
    pub cookie: Option<String>,
    /// Headers with no dedicated field, keyed in lowercase.
    pub extra: BTreeMap<String, String>,
}

/// A whole `.zem` file: headers plus document body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZemFile {
    pub metadata: Metadata,
    pub body: Vec<u8>,
}

impl ZemFile {
    /// Read and parse the file at `path`.
    pub fn read(path: &Path) -> Result<Self, MetadataError> {
        let bytes = std::fs::read(path).map_err(|source| MetadataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&bytes)
    }

    /// Parse raw `.zem` bytes. Both `\n` and `\r\n` line endings are accepted
    /// in the header block; the body is kept byte for byte.
    pub fn parse(bytes: &[u8]) -> Result<Self, MetadataError> {
        let mut metadata = Metadata::default();
        let mut url = None;
        let mut cursor = 0usize;
        let mut line_no = 0usize;

        while cursor < bytes.len() {
            let end = bytes[cursor..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|i| cursor + i)
                .unwrap_or(bytes.len());
            let raw = &bytes[cursor..end];
            cursor = (end + 1).min(bytes.len());
            line_no += 1;

            let line = String::from_utf8_lossy(raw);
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                break;
            }

            let Some((key, value)) = line.split_once(':') else {
                return Err(MetadataError::MalformedHeader {
                    line: line_no,
                    text: line.to_owned(),
                });
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim().to_owned();

            match key.as_str() {
                "url" => url = Some(value),
                "meta_type" => metadata.meta_type = non_empty(value),
                "content_type" => metadata.content_type = non_empty(value),
                "title" => metadata.title = non_empty(value),
                "lock-token" => metadata.lock_token = non_empty(value),
                "borrow_lock" => metadata.borrow_lock = parse_flag(&value),
                "skip_data" => metadata.skip_data = parse_flag(&value),
                "auth" => metadata.auth = non_empty(value),
                "cookie" => metadata.cookie = non_empty(value),
                _ => {
                    metadata.extra.insert(key, value);
                }
            }
        }

        metadata.url = url.filter(|u| !u.is_empty()).ok_or(MetadataError::MissingUrl)?;
        Ok(Self {
            metadata,
            body: bytes[cursor..].to_vec(),
        })
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// File extension (with leading dot) for a MIME content type.
pub fn extension_for_content_type(content_type: Option<&str>) -> &'static str {
    let Some(content_type) = content_type else {
        return ".txt";
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "text/html" => ".html",
        "text/css" => ".css",
        "text/xml" | "application/xml" => ".xml",
        "text/javascript" | "application/javascript" | "application/x-javascript" => ".js",
        "application/json" => ".json",
        "text/x-python" => ".py",
        "text/markdown" | "text/x-rst" => ".txt",
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "image/gif" => ".gif",
        "image/svg+xml" => ".svg",
        "application/pdf" => ".pdf",
        _ => ".txt",
    }
}
