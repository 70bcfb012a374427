use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::archive;
use crate::db::progress::PROGRESS_TTL_SECS;
use crate::pipeline::matcher::{self, ProgressSink};
use crate::sources::drive::DriveSource;
use crate::sources::local::{LocalSource, UploadedFile};
use crate::sources::CandidateSource;
use crate::AppState;

pub async fn health() -> impl IntoResponse {
    let body = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(body))
}

fn mint_session_id() -> String {
    format!("{}_{}", Uuid::new_v4(), Utc::now().timestamp())
}

/// Mints a session id and seeds its progress record so pollers see zeroes
/// instead of a missing session.
pub async fn new_session(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let session_id = mint_session_id();
    let progress = state.progress.clone();
    let sid = session_id.clone();
    tokio::task::spawn_blocking(move || progress.set(&sid, 0, 0, PROGRESS_TTL_SECS))
        .await
        .map_err(|e| ApiError::Internal(e.into()))??;
    Ok(Json(json!({ "session_id": session_id })))
}

pub async fn progress(
    State(state): State<Arc<AppState>>,
    UrlPath(session_id): UrlPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.progress.clone();
    let record = tokio::task::spawn_blocking(move || store.get(&session_id))
        .await
        .map_err(|e| ApiError::Internal(e.into()))??;
    Ok(Json(record))
}

/// Sweeps expired progress records and the reference images of those
/// sessions, returning how many sessions were removed.
pub async fn clean_expired(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let progress = state.progress.clone();
    let references = state.references.clone();
    let now = Utc::now().timestamp();
    let expired = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<String>> {
        let ids = progress.purge_expired(now)?;
        for id in &ids {
            references.delete(id)?;
        }
        Ok(ids)
    })
    .await
    .map_err(|e| ApiError::Internal(e.into()))??;
    for id in &expired {
        state.encoding_cache.invalidate(id);
        info!(session = %id, "deleted expired session");
    }
    Ok(Json(json!({
        "deleted": expired.len(),
        "message": format!("Expired sessions deleted: {}", expired.len()),
    })))
}

#[derive(Default)]
struct MatchForm {
    session_id: String,
    source: String,
    drive_link: String,
    locals: Vec<UploadedFile>,
    reference: Option<(String, Vec<u8>)>,
    webcam: Option<String>,
}

async fn read_form(mut multipart: Multipart) -> Result<MatchForm, ApiError> {
    let mut form = MatchForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("session_id") => form.session_id = field.text().await?,
            Some("source_select") => form.source = field.text().await?,
            Some("drive_link") => form.drive_link = field.text().await?,
            Some("local_folder[]") => {
                let name = field.file_name().unwrap_or("upload").to_string();
                let data = field.bytes().await?.to_vec();
                form.locals.push(UploadedFile { name, data });
            }
            Some("popup_file") => {
                let name = field.file_name().unwrap_or("reference").to_string();
                let data = field.bytes().await?.to_vec();
                if !data.is_empty() {
                    form.reference = Some((name, data));
                }
            }
            Some("popup_webcam_image") => form.webcam = Some(field.text().await?),
            _ => {}
        }
    }
    Ok(form)
}

/// Decodes a `data:image/png;base64,...` payload from the webcam capture.
fn decode_webcam(data_url: &str) -> Result<Vec<u8>, ApiError> {
    let encoded = data_url.split(',').nth(1).ok_or(ApiError::BadWebcamImage)?;
    BASE64.decode(encoded.trim()).map_err(|_| ApiError::BadWebcamImage)
}

/// The reference filename is re-minted so uploads can't collide or leak
/// the original name.
fn reference_filename(original: &str) -> String {
    let ext = Path::new(original).extension().and_then(|e| e.to_str()).unwrap_or("png");
    format!("{}.{}", Uuid::new_v4(), ext)
}

/// The main matching endpoint: stores the reference image, validates its
/// encodings, runs a pass over the selected source, and returns the
/// matched set as a zip attachment.
pub async fn match_photos(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = read_form(multipart).await?;
    let session_id =
        if form.session_id.trim().is_empty() { mint_session_id() } else { form.session_id.clone() };

    let (ref_name, ref_bytes) = match (form.reference, &form.webcam) {
        (Some((name, bytes)), _) => (reference_filename(&name), bytes),
        (None, Some(data_url)) => (format!("{}.png", Uuid::new_v4()), decode_webcam(data_url)?),
        (None, None) => return Err(ApiError::MissingReference),
    };

    state.store_reference(&session_id, &ref_name, ref_bytes).await?;

    let source: Box<dyn CandidateSource> = match form.source.as_str() {
        "drive" => Box::new(DriveSource::from_link(state.drive.clone(), &form.drive_link)?),
        "local" => Box::new(LocalSource::new(form.locals)),
        _ => return Err(ApiError::NoSource),
    };

    // Reference encodings are resolved before the engine touches the
    // source; a faceless reference must not trigger any downloads.
    let reference = state.reference_encodings(&session_id).await?;
    info!(session = %session_id, "pass starting");
    let pass_result = matcher::run_pass(
        &session_id,
        reference,
        source,
        state.face_encoder.clone(),
        state.progress.clone() as Arc<dyn ProgressSink>,
        &state.match_options,
    )
    .await;

    // Transient reference storage is cleared whether the pass succeeded,
    // matched nothing, or failed outright.
    {
        let references = state.references.clone();
        let sid = session_id.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || references.delete(&sid))
            .await
            .map_err(|e| anyhow!(e))
            .and_then(|r| r)
        {
            warn!(session = %session_id, "failed to delete reference image: {e:#}");
        }
    }

    let outcome = pass_result?;
    info!(
        session = %session_id,
        matched = outcome.matched.len(),
        unmatched = outcome.unmatched.len(),
        "pass finished"
    );

    if outcome.matched.is_empty() {
        return Err(ApiError::NoFaceDetected);
    }

    let data = archive::package_matched(&outcome.matched).context("failed to build archive")?;
    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", archive::ARCHIVE_NAME),
        ),
    ];
    Ok((StatusCode::OK, headers, data).into_response())
}
