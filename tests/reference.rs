mod common;

use std::path::PathBuf;
use std::sync::Arc;

use common::{png_bytes, setup_test_pool, stub_encoder, NO_FACE_WIDTH};
use faceapp_backend::sources::drive::DriveClient;
use faceapp_backend::utils::config::{Config, GoogleDriveConfig};
use faceapp_backend::AppState;
use tempfile::TempDir;

fn test_state() -> (TempDir, Arc<AppState>) {
    let (tmp, _db_path, pool) = setup_test_pool();
    let config = Config {
        data: PathBuf::from(tmp.path()),
        port: 0,
        match_workers: 2,
        batch_size: 4,
        drive: GoogleDriveConfig {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: "token".to_string(),
        },
    };
    let drive = Arc::new(DriveClient::new(config.drive.clone()));
    (tmp, Arc::new(AppState::new(config, pool, stub_encoder(), drive)))
}

#[tokio::test]
async fn encodings_are_cached_per_session() {
    let (_tmp, state) = test_state();
    state.store_reference("sess", "a.png", png_bytes(100)).await.unwrap();

    let first = state.reference_encodings("sess").await.unwrap();
    assert_eq!(first[0][0], 100.0);

    // Second lookup must come out of the cache, not a recompute.
    let again = state.reference_encodings("sess").await.unwrap();
    assert!(Arc::ptr_eq(&first, &again));
}

#[tokio::test]
async fn replacing_the_reference_recomputes_encodings() {
    let (_tmp, state) = test_state();
    state.store_reference("sess", "a.png", png_bytes(100)).await.unwrap();
    let first = state.reference_encodings("sess").await.unwrap();
    assert_eq!(first[0][0], 100.0);

    // A new reference for the same session must not serve the stale
    // cached encodings.
    state.store_reference("sess", "b.png", png_bytes(200)).await.unwrap();
    let replaced = state.reference_encodings("sess").await.unwrap();
    assert_eq!(replaced[0][0], 200.0);
}

#[tokio::test]
async fn missing_reference_yields_empty_encodings() {
    let (_tmp, state) = test_state();
    let encodings = state.reference_encodings("nope").await.unwrap();
    assert!(encodings.is_empty());
}

#[tokio::test]
async fn faceless_reference_is_not_cached() {
    let (_tmp, state) = test_state();
    state.store_reference("sess", "blank.png", png_bytes(NO_FACE_WIDTH)).await.unwrap();
    let empty = state.reference_encodings("sess").await.unwrap();
    assert!(empty.is_empty());

    // A usable reference stored afterwards must be picked up.
    state.store_reference("sess", "face.png", png_bytes(100)).await.unwrap();
    let encodings = state.reference_encodings("sess").await.unwrap();
    assert_eq!(encodings[0][0], 100.0);
}
