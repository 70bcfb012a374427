use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use faceapp_backend::sources::drive::DriveClient;
use faceapp_backend::utils::config::Config;
use faceapp_backend::utils::logging;
use faceapp_backend::{api, db, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cfg = Config::from_env().context("invalid configuration")?;

    let db_dir = cfg.data.join("db");
    std::fs::create_dir_all(&db_dir)?;
    let db_path = db_dir.join("faceapp.db");
    let pool = db::create_pool(&db_path, 10)?;

    #[cfg(not(target_env = "msvc"))]
    let _vips = libvips::VipsApp::new("faceapp", false)?;

    #[cfg(not(feature = "facial-recognition"))]
    {
        let _ = pool;
        anyhow::bail!("faceapp-backend was built without the facial-recognition feature");
    }

    #[cfg(feature = "facial-recognition")]
    {
        use faceapp_backend::pipeline::encoder::FaceEncoder;
        use faceapp_backend::pipeline::face::OnnxFaceEncoder;

        info!("Checking dependencies before startup...");
        let mut encoder = OnnxFaceEncoder::new(cfg.data.join("models"));
        encoder.initialize().await.context("face models failed to initialize")?;
        let face_encoder: Arc<dyn FaceEncoder> = Arc::new(encoder);

        // Fail fast if the progress store or the Drive API is unusable.
        pool.get()?
            .query_row("SELECT 1", [], |r| r.get::<_, i64>(0))
            .context("progress store not ready")?;
        let drive = Arc::new(DriveClient::new(cfg.drive.clone()));
        drive.check_ready().await.context("Google Drive API not ready")?;
        info!("All dependencies ready");

        let port = cfg.port;
        let state = Arc::new(AppState::new(cfg, pool, face_encoder, drive));
        let app = api::routes::router(state);
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(%addr, "listening");
        axum::serve(listener, app).await?;
        Ok(())
    }
}
