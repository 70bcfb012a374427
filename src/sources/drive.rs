use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::sources::{Candidate, CandidateSource, Enumeration, SourceError};
use crate::utils::config::GoogleDriveConfig;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";
const LIST_PAGE_SIZE: u32 = 1000;

static FOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/folders/([A-Za-z0-9_-]+)").unwrap());

/// Pulls the folder id out of a shared Drive link. `None` is an input
/// error; the pass never starts.
pub fn extract_folder_id(link: &str) -> Option<String> {
    FOLDER_RE.captures(link).map(|c| c[1].to_string())
}

#[derive(Debug, Error)]
pub enum DriveError {
    /// Authentication failed or was revoked. Fatal for the whole pass:
    /// affected candidates are reported unmatched instead of aborting.
    #[error("drive authentication failed")]
    Auth,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
}

/// Minimal Drive v3 client: refresh-token auth, folder listing, media
/// download.
pub struct DriveClient {
    http: reqwest::Client,
    config: GoogleDriveConfig,
}

impl DriveClient {
    pub fn new(config: GoogleDriveConfig) -> Self {
        Self { http: reqwest::Client::new(), config }
    }

    async fn access_token(&self) -> Result<String, DriveError> {
        let response = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", self.config.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        if matches!(
            response.status(),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(DriveError::Auth);
        }
        let token: TokenResponse = response.error_for_status()?.json().await?;
        Ok(token.access_token)
    }

    /// Boot-time readiness probe: refresh a token and list a single file.
    pub async fn check_ready(&self) -> anyhow::Result<()> {
        let token = self.access_token().await?;
        self.http
            .get(format!("{DRIVE_API}/files"))
            .bearer_auth(token)
            .query(&[("pageSize", "1")])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Non-recursive listing of image-mimetype files in a folder.
    pub async fn list_images(&self, token: &str, folder_id: &str) -> Result<Vec<DriveFile>, DriveError> {
        let q = format!("'{folder_id}' in parents and mimeType contains 'image/' and trashed=false");
        let page_size = LIST_PAGE_SIZE.to_string();
        let response = self
            .http
            .get(format!("{DRIVE_API}/files"))
            .bearer_auth(token)
            .query(&[
                ("q", q.as_str()),
                ("fields", "files(id, name)"),
                ("pageSize", page_size.as_str()),
            ])
            .send()
            .await?;
        if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(DriveError::Auth);
        }
        let list: FileList = response.error_for_status()?.json().await?;
        Ok(list.files)
    }

    /// Downloads file content chunk by chunk until complete.
    pub async fn download(&self, token: &str, file_id: &str) -> Result<Vec<u8>, DriveError> {
        let mut response = self
            .http
            .get(format!("{DRIVE_API}/files/{file_id}"))
            .bearer_auth(token)
            .query(&[("alt", "media")])
            .send()
            .await?;
        if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(DriveError::Auth);
        }
        response = response.error_for_status()?;
        let mut data = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }
}

/// Remote-drive adapter: lists the folder, then fetches bytes
/// sequentially; the engine parallelizes the compute side.
pub struct DriveSource {
    client: Arc<DriveClient>,
    folder_id: String,
}

impl DriveSource {
    pub fn from_link(client: Arc<DriveClient>, link: &str) -> Result<Self, SourceError> {
        let folder_id = extract_folder_id(link).ok_or(SourceError::BadFolderLink)?;
        Ok(Self { client, folder_id })
    }
}

#[async_trait]
impl CandidateSource for DriveSource {
    async fn enumerate(self: Box<Self>) -> Result<Enumeration, SourceError> {
        let token = match self.client.access_token().await {
            Ok(token) => token,
            Err(DriveError::Auth) => {
                warn!("drive authentication failed; reporting no candidates");
                return Ok(Enumeration::default());
            }
            Err(DriveError::Http(e)) => return Err(SourceError::Other(e.into())),
        };
        let files = match self.client.list_images(&token, &self.folder_id).await {
            Ok(files) => files,
            Err(DriveError::Auth) => {
                warn!("drive authentication rejected while listing; reporting no candidates");
                return Ok(Enumeration::default());
            }
            Err(DriveError::Http(e)) => return Err(SourceError::Other(e.into())),
        };

        let mut out = Enumeration::default();
        let mut auth_lost = false;
        for file in files {
            if auth_lost {
                out.rejected.push(file.name);
                continue;
            }
            match self.client.download(&token, &file.id).await {
                Ok(data) => out.candidates.push(Candidate { name: file.name, data }),
                Err(DriveError::Auth) => {
                    warn!("drive authentication lost mid-fetch; remaining files go unmatched");
                    auth_lost = true;
                    out.rejected.push(file.name);
                }
                Err(DriveError::Http(e)) => {
                    warn!(name = %file.name, "drive download failed: {e}");
                    out.rejected.push(file.name);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_folder_id_from_share_link() {
        let link = "https://drive.google.com/drive/folders/1aB_c-D2eF?usp=sharing";
        assert_eq!(extract_folder_id(link).as_deref(), Some("1aB_c-D2eF"));
    }

    #[test]
    fn rejects_links_without_folder_segment() {
        assert!(extract_folder_id("https://drive.google.com/file/d/abc/view").is_none());
        assert!(extract_folder_id("").is_none());
        assert!(extract_folder_id("/folders/").is_none());
    }

    #[test]
    fn folder_id_stops_at_non_id_characters() {
        assert_eq!(
            extract_folder_id("https://drive.google.com/drive/folders/abc123/extra").as_deref(),
            Some("abc123")
        );
    }
}
