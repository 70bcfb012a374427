pub mod api;
pub mod archive;
pub mod db;
pub mod pipeline;
pub mod sources;
pub mod utils;

use std::sync::Arc;

use crate::db::progress::ProgressStore;
use crate::db::reference::ReferenceStore;
use crate::db::Pool;
use crate::pipeline::encoder::{Embedding, EncodingCache, FaceEncoder};
use crate::pipeline::image;
use crate::pipeline::matcher::MatchOptions;
use crate::sources::drive::DriveClient;
use crate::utils::config::Config;

pub struct AppState {
    pub config: Config,
    pub progress: Arc<ProgressStore>,
    pub references: Arc<ReferenceStore>,
    /// Process-wide reference-encoding cache, bounded and keyed by session.
    pub encoding_cache: Arc<EncodingCache>,
    pub face_encoder: Arc<dyn FaceEncoder>,
    pub drive: Arc<DriveClient>,
    pub match_options: MatchOptions,
}

impl AppState {
    pub fn new(
        config: Config,
        pool: Pool,
        face_encoder: Arc<dyn FaceEncoder>,
        drive: Arc<DriveClient>,
    ) -> Self {
        let match_options =
            MatchOptions { batch_size: config.batch_size, workers: config.match_workers };
        Self {
            progress: Arc::new(ProgressStore::new(pool.clone())),
            references: Arc::new(ReferenceStore::new(pool)),
            encoding_cache: Arc::new(EncodingCache::default()),
            face_encoder,
            drive,
            match_options,
            config,
        }
    }

    /// Stores (or replaces) the session's reference image. Replacing the
    /// reference makes any cached encodings stale, so the cache entry is
    /// dropped in the same step.
    pub async fn store_reference(
        &self,
        session_id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<()> {
        let references = self.references.clone();
        let sid = session_id.to_string();
        let name = filename.to_string();
        tokio::task::spawn_blocking(move || references.store(&sid, &name, &bytes)).await??;
        self.encoding_cache.invalidate(session_id);
        Ok(())
    }

    /// Loads the session's reference encodings from cache, or computes them
    /// from the stored reference image and caches the result. An empty set
    /// means no face was detected.
    pub async fn reference_encodings(&self, session_id: &str) -> anyhow::Result<Arc<Vec<Embedding>>> {
        if let Some(cached) = self.encoding_cache.get(session_id) {
            return Ok(cached);
        }
        let references = self.references.clone();
        let sid = session_id.to_string();
        let bytes = tokio::task::spawn_blocking(move || references.load(&sid)).await??;
        let Some(bytes) = bytes else {
            return Ok(Arc::new(Vec::new()));
        };
        let face_encoder = self.face_encoder.clone();
        let encodings = tokio::task::spawn_blocking(move || {
            image::load_image(&bytes).map(|img| face_encoder.encode(&img)).unwrap_or_default()
        })
        .await?;
        if encodings.is_empty() {
            return Ok(Arc::new(Vec::new()));
        }
        Ok(self.encoding_cache.insert(session_id, encodings))
    }
}
