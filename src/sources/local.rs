use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::sources::{Candidate, CandidateSource, Enumeration, SourceError};

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "heic"];

/// One already-received multipart file part.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub data: Vec<u8>,
}

/// Local-upload adapter. Files failing validation are rejected up front so
/// they never consume a worker.
pub struct LocalSource {
    files: Vec<UploadedFile>,
}

impl LocalSource {
    pub fn new(files: Vec<UploadedFile>) -> Self {
        Self { files }
    }
}

fn allowed_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| ALLOWED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[async_trait]
impl CandidateSource for LocalSource {
    async fn enumerate(self: Box<Self>) -> Result<Enumeration, SourceError> {
        let mut out = Enumeration::default();
        for file in self.files {
            if !allowed_extension(&file.name) {
                debug!(name = %file.name, "rejecting upload with disallowed extension");
                out.rejected.push(file.name);
                continue;
            }
            if file.data.len() > MAX_UPLOAD_BYTES {
                debug!(name = %file.name, size = file.data.len(), "rejecting oversized upload");
                out.rejected.push(file.name);
                continue;
            }
            out.candidates.push(Candidate { name: file.name, data: file.data });
        }
        Ok(out)
    }
}
