pub mod drive;
pub mod local;

use async_trait::async_trait;
use thiserror::Error;

/// One image to be tested against the reference. Lives only for the
/// duration of a single pass.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub data: Vec<u8>,
}

/// Adapter output: fetched candidates plus the names that already failed
/// (download error, validation). Rejected names are classified unmatched
/// without touching the encoder.
#[derive(Debug, Default)]
pub struct Enumeration {
    pub candidates: Vec<Candidate>,
    pub rejected: Vec<String>,
}

impl Enumeration {
    pub fn total(&self) -> usize {
        self.candidates.len() + self.rejected.len()
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("drive link does not contain a /folders/<id> segment")]
    BadFolderLink,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Consumes the adapter; enumeration happens once per pass.
    async fn enumerate(self: Box<Self>) -> Result<Enumeration, SourceError>;
}
