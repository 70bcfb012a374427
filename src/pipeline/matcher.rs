use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::pipeline::encoder::{self, Embedding, FaceEncoder};
use crate::pipeline::image;
use crate::sources::{Candidate, CandidateSource, Enumeration, SourceError};

/// Candidates dispatched per batch; the whole batch's raw bytes are
/// resident at once, so this caps peak memory.
pub const BATCH_SIZE: usize = 30;

/// Write-through progress sink keyed by session. Publishing is best-effort:
/// the engine logs and swallows sink failures.
pub trait ProgressSink: Send + Sync {
    fn set_progress(&self, session_id: &str, current: usize, total: usize) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct MatchedImage {
    pub name: String,
    pub data: Bytes,
}

/// Partition of all candidates after a pass. Bytes are only retained for
/// matched items.
#[derive(Debug, Default)]
pub struct PassOutcome {
    pub matched: Vec<MatchedImage>,
    pub unmatched: Vec<String>,
}

#[derive(Debug, Error)]
pub enum PassError {
    /// Zero faces in the reference image. Terminal for the pass, never
    /// retried, and distinct from any per-candidate failure.
    #[error("no face detected in the reference image")]
    NoReferenceFace,
    #[error(transparent)]
    Source(#[from] SourceError),
}

#[derive(Clone, Debug)]
pub struct MatchOptions {
    pub batch_size: usize,
    pub workers: usize,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self { batch_size: BATCH_SIZE, workers: num_cpus::get().max(1) }
    }
}

enum Verdict {
    Matched(String, Bytes),
    Unmatched(String),
}

/// Runs one matching pass for a session: fans candidates out over a bounded
/// worker pool in fixed-size batches, publishes progress per completed
/// item, and classifies every per-item failure as unmatched. One
/// candidate's failure never affects another's result.
///
/// The reference is validated before the source is enumerated, so a
/// faceless reference never costs a single candidate download.
pub async fn run_pass(
    session_id: &str,
    reference: Arc<Vec<Embedding>>,
    source: Box<dyn CandidateSource>,
    face_encoder: Arc<dyn FaceEncoder>,
    progress: Arc<dyn ProgressSink>,
    opts: &MatchOptions,
) -> Result<PassOutcome, PassError> {
    if reference.is_empty() {
        return Err(PassError::NoReferenceFace);
    }

    let Enumeration { candidates, rejected } = source.enumerate().await?;
    let total = candidates.len() + rejected.len();
    debug!(session = session_id, total, "enumeration complete");
    publish(&progress, session_id, 0, total).await;

    let mut outcome = PassOutcome::default();
    let mut current = 0usize;

    // Items the adapter already failed (download error, validation) count
    // as completed units so `current` can reach `total`.
    for name in rejected {
        outcome.unmatched.push(name);
        current += 1;
        publish(&progress, session_id, current, total).await;
    }

    let semaphore = Arc::new(Semaphore::new(opts.workers.max(1)));
    let mut pending = candidates.into_iter();
    loop {
        let batch: Vec<Candidate> = pending.by_ref().take(opts.batch_size.max(1)).collect();
        if batch.is_empty() {
            break;
        }
        let mut set: JoinSet<Verdict> = JoinSet::new();
        for candidate in batch {
            let semaphore = semaphore.clone();
            let reference = reference.clone();
            let face_encoder = face_encoder.clone();
            set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return Verdict::Unmatched(candidate.name),
                };
                let name = candidate.name.clone();
                let result = tokio::task::spawn_blocking(move || {
                    match_one(candidate, &reference, face_encoder.as_ref())
                })
                .await;
                match result {
                    Ok(verdict) => verdict,
                    Err(e) => {
                        warn!(name = %name, "match worker panicked: {e}");
                        Verdict::Unmatched(name)
                    }
                }
            });
        }
        while let Some(joined) = set.join_next().await {
            let verdict = match joined {
                Ok(v) => v,
                Err(e) => {
                    // All fallible work happens inside spawn_blocking above,
                    // so this only fires on task abort. Still counts toward
                    // the total so `current` can reach it.
                    warn!("match task failed: {e}");
                    current += 1;
                    publish(&progress, session_id, current, total).await;
                    continue;
                }
            };
            match verdict {
                Verdict::Matched(name, data) => outcome.matched.push(MatchedImage { name, data }),
                Verdict::Unmatched(name) => outcome.unmatched.push(name),
            }
            current += 1;
            // Per-image granularity even though dispatch is chunked.
            publish(&progress, session_id, current, total).await;
        }
    }

    debug!(
        session = session_id,
        matched = outcome.matched.len(),
        unmatched = outcome.unmatched.len(),
        "pass complete"
    );
    Ok(outcome)
}

fn match_one(candidate: Candidate, reference: &[Embedding], face_encoder: &dyn FaceEncoder) -> Verdict {
    let Some(img) = image::load_image(&candidate.data) else {
        return Verdict::Unmatched(candidate.name);
    };
    let encodings = face_encoder.encode(&img);
    if encoder::is_match(reference, &encodings) {
        Verdict::Matched(candidate.name, Bytes::from(candidate.data))
    } else {
        Verdict::Unmatched(candidate.name)
    }
}

/// Sink writes hit SQLite, so they run on the blocking pool; awaiting the
/// handle keeps publishes ordered. Failures are logged, never propagated.
async fn publish(sink: &Arc<dyn ProgressSink>, session_id: &str, current: usize, total: usize) {
    let sink = sink.clone();
    let sid = session_id.to_string();
    match tokio::task::spawn_blocking(move || sink.set_progress(&sid, current, total)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(session = session_id, "progress publish failed: {e:#}"),
        Err(e) => warn!(session = session_id, "progress publish task failed: {e}"),
    }
}
