#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use faceapp_backend::db::{self, Pool};
use faceapp_backend::pipeline::encoder::{Embedding, FaceEncoder};
use faceapp_backend::pipeline::matcher::ProgressSink;
use faceapp_backend::sources::{Candidate, CandidateSource, Enumeration, SourceError};
use image::DynamicImage;
use parking_lot::Mutex;
use tempfile::TempDir;

/// Create a temporary SQLite database pool for testing
pub fn setup_test_pool() -> (TempDir, PathBuf, Pool) {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("faceapp.db");
    let pool = db::create_pool(&db_path, 4).unwrap();
    (tmp, db_path, pool)
}

/// PNG bytes for a solid image of the given width; the stub encoder turns
/// the width back into an embedding, so width doubles as face identity.
pub fn png_bytes(width: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(image::RgbImage::new(width, 2));
    let mut bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageOutputFormat::Png).unwrap();
    bytes
}

pub fn candidate(name: &str, width: u32) -> Candidate {
    Candidate { name: name.to_string(), data: png_bytes(width) }
}

pub fn corrupt_candidate(name: &str) -> Candidate {
    Candidate { name: name.to_string(), data: b"not an image at all".to_vec() }
}

/// Images of this width behave as if no face was detected.
pub const NO_FACE_WIDTH: u32 = 7;

/// Deterministic stand-in for the ONNX encoder: one embedding per image,
/// equal to the image width.
pub struct StubEncoder;

impl FaceEncoder for StubEncoder {
    fn encode(&self, image: &DynamicImage) -> Vec<Embedding> {
        if image.width() == NO_FACE_WIDTH {
            Vec::new()
        } else {
            vec![vec![image.width() as f32]]
        }
    }
}

pub fn stub_encoder() -> Arc<dyn FaceEncoder> {
    Arc::new(StubEncoder)
}

/// Records every publish so tests can assert ordering and monotonicity.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<(usize, usize)>>,
}

impl ProgressSink for RecordingSink {
    fn set_progress(&self, _session_id: &str, current: usize, total: usize) -> anyhow::Result<()> {
        self.events.lock().push((current, total));
        Ok(())
    }
}

/// A sink that always fails, for the best-effort publishing contract.
pub struct FailingSink;

impl ProgressSink for FailingSink {
    fn set_progress(&self, _session_id: &str, _current: usize, _total: usize) -> anyhow::Result<()> {
        anyhow::bail!("progress store unreachable")
    }
}

/// Hands a pre-built enumeration to the engine.
pub struct FixedSource(pub Enumeration);

#[async_trait]
impl CandidateSource for FixedSource {
    async fn enumerate(self: Box<Self>) -> Result<Enumeration, SourceError> {
        Ok(self.0)
    }
}

pub fn source(enumeration: Enumeration) -> Box<dyn CandidateSource> {
    Box::new(FixedSource(enumeration))
}

/// Flags whether the engine ever asked for the candidate list.
pub struct TrackingSource {
    pub enumerated: Arc<AtomicBool>,
}

#[async_trait]
impl CandidateSource for TrackingSource {
    async fn enumerate(self: Box<Self>) -> Result<Enumeration, SourceError> {
        self.enumerated.store(true, Ordering::SeqCst);
        Ok(Enumeration::default())
    }
}
