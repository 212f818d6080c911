//! # Form Decoding
//!
//! Decodes `application/x-www-form-urlencoded` and `multipart/form-data`
//! bodies into [`FormData`]: text fields (repeatable, in order) plus file
//! uploads. Other content types produce an empty form.

use crate::codec::collect_pairs;
use crate::error::{Error, Result};
use crate::media::MediaType;
use crate::value::Value;
use hyper::body::Bytes;

/// One uploaded file of a multipart body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// Form field name
    pub name: String,
    /// Client-side file name
    pub filename: String,
    /// Declared part content type, `application/octet-stream` when absent
    pub content_type: String,
    /// File contents
    pub bytes: Bytes,
}

impl FileUpload {
    /// File size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the file is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Decoded form fields and files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    fields: Vec<(String, String)>,
    files: Vec<FileUpload>,
}

impl FormData {
    /// Decode a body according to its content type
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedBody` when the body does not decode, e.g. a
    /// multipart body without a boundary.
    pub fn parse(content_type: Option<&MediaType>, body: &[u8]) -> Result<Self> {
        let Some(media) = content_type else {
            return Ok(Self::default());
        };

        if media.same_essence(&MediaType::FORM) {
            let fields = serde_urlencoded::from_bytes(body).map_err(|e| malformed(media, e))?;
            Ok(Self {
                fields,
                files: Vec::new(),
            })
        } else if media.same_essence(&MediaType::MULTIPART) {
            let boundary = media
                .param("boundary")
                .ok_or_else(|| malformed(media, "missing boundary parameter"))?;
            parse_multipart(boundary, body).map_err(|reason| malformed(media, reason))
        } else {
            Ok(Self::default())
        }
    }

    /// Field value (all occurrences)
    #[must_use]
    pub fn field(&self, name: &str) -> Value {
        let values: Vec<String> = self
            .fields
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .collect();
        Value::multiple(name, values)
    }

    /// Fields as a JSON object; repeated names become arrays
    #[must_use]
    pub fn to_map(&self) -> serde_json::Map<String, serde_json::Value> {
        collect_pairs(self.fields.clone())
    }

    /// Raw field pairs in body order
    #[must_use]
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// All uploaded files
    #[must_use]
    pub fn files(&self) -> &[FileUpload] {
        &self.files
    }

    /// First file uploaded under `name`
    #[must_use]
    pub fn file(&self, name: &str) -> Option<&FileUpload> {
        self.files.iter().find(|f| f.name == name)
    }
}

fn malformed(media: &MediaType, reason: impl ToString) -> Error {
    Error::MalformedBody {
        media_type: media.essence().to_string(),
        reason: reason.to_string(),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_multipart(boundary: &str, body: &[u8]) -> std::result::Result<FormData, String> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut form = FormData::default();

    let start = find(body, delimiter).ok_or("boundary not found")?;
    let mut rest = &body[start + delimiter.len()..];

    loop {
        if rest.starts_with(b"--") {
            return Ok(form);
        }
        rest = rest
            .strip_prefix(b"\r\n")
            .ok_or("expected CRLF after boundary")?;

        let header_end = find(rest, b"\r\n\r\n").ok_or("unterminated part headers")?;
        let headers = std::str::from_utf8(&rest[..header_end]).map_err(|e| e.to_string())?;
        rest = &rest[header_end + 4..];

        let mut closing = Vec::with_capacity(delimiter.len() + 2);
        closing.extend_from_slice(b"\r\n");
        closing.extend_from_slice(delimiter);
        let content_end = find(rest, &closing).ok_or("unterminated part")?;
        let content = &rest[..content_end];
        rest = &rest[content_end + closing.len()..];

        add_part(&mut form, headers, content)?;
    }
}

fn add_part(form: &mut FormData, headers: &str, content: &[u8]) -> std::result::Result<(), String> {
    let mut name = None;
    let mut filename = None;
    let mut content_type = None;

    for line in headers.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if key.trim().eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').skip(1) {
                let Some((k, v)) = param.trim().split_once('=') else {
                    continue;
                };
                let v = v.trim().trim_matches('"').to_string();
                match k.trim() {
                    "name" => name = Some(v),
                    "filename" => filename = Some(v),
                    _ => {}
                }
            }
        } else if key.trim().eq_ignore_ascii_case("content-type") {
            content_type = Some(value.to_string());
        }
    }

    let name = name.ok_or("part without a name")?;
    match filename {
        Some(filename) => form.files.push(FileUpload {
            name,
            filename,
            content_type: content_type.unwrap_or_else(|| MediaType::OCTET_STREAM.to_string()),
            bytes: Bytes::copy_from_slice(content),
        }),
        None => {
            let text = String::from_utf8(content.to_vec()).map_err(|e| e.to_string())?;
            form.fields.push((name, text));
        }
    }
    Ok(())
}
