//! Multipart bodies that can be sent more than once.
//!
//! `reqwest::multipart::Form` is consumed by `send()`, so uploads keep
//! their parts here and build a fresh form for each attempt.

use std::path::Path;

use reqwest::multipart::{Form, Part};

#[derive(Debug, Clone)]
enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: Option<String>,
        bytes: Vec<u8>,
    },
}

/// A multipart upload body (product images, attachments, CSV imports).
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    parts: Vec<FormPart>,
}

impl UploadForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain text field.
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(FormPart::Text {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Add an in-memory file field.
    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime: Option<&str>,
        bytes: Vec<u8>,
    ) -> Self {
        self.parts.push(FormPart::File {
            name: name.into(),
            file_name: file_name.into(),
            mime: mime.map(str::to_string),
            bytes,
        });
        self
    }

    /// Add a file field read from disk. The mime type is guessed from the
    /// extension for the formats the backend accepts.
    pub async fn file_from_path(
        self,
        name: impl Into<String>,
        path: &Path,
    ) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let mime = guess_mime(path);
        Ok(self.file(name, file_name, mime, bytes))
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Build a `reqwest` form for one attempt.
    ///
    /// An unparseable mime type falls back to no content type on that part.
    pub fn to_form(&self) -> Form {
        self.parts.iter().fold(Form::new(), |form, part| match part {
            FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
            FormPart::File {
                name,
                file_name,
                mime,
                bytes,
            } => {
                let base = || Part::bytes(bytes.clone()).file_name(file_name.clone());
                let part = match mime {
                    Some(m) => base().mime_str(m).unwrap_or_else(|e| {
                        log::warn!("Ignoring invalid mime type {} for {}: {}", m, file_name, e);
                        base()
                    }),
                    None => base(),
                };
                form.part(name.clone(), part)
            }
        })
    }
}

fn guess_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "csv" => "text/csv",
        "json" => "application/json",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    };
    Some(mime)
}
