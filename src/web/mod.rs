//! Web frontend: an HTML form plus a small JSON API
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /` | Upload form |
//! | `POST /generate` | Multipart form in, HTML result page out |
//! | `POST /api/generate` | Multipart form in, image bytes out |
//! | `GET /api/presets` | Size presets and backgrounds as JSON |
//! | `GET /health` | Liveness check |

mod handlers;
pub mod page;

use crate::error::Result;
use crate::studio::IdPhotoStudio;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Default upload limit, 20 MiB
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Listener and request limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body
    pub max_upload_bytes: usize,
    /// Load the segmentation session before the first request
    pub preload: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            preload: false,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Shared by every handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub studio: Arc<IdPhotoStudio>,
}

impl AppState {
    #[must_use]
    pub fn new(studio: Arc<IdPhotoStudio>) -> Self {
        Self { studio }
    }
}

/// Build the application router
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/generate", post(handlers::generate_page))
        .route("/api/generate", post(handlers::generate_api))
        .route("/api/presets", get(handlers::presets))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// Bind and serve until Ctrl-C
///
/// With `preload` set the model is loaded in the background, so the server
/// accepts connections right away.
///
/// # Errors
/// - The address cannot be bound
/// - The server fails while running
pub async fn serve(config: &ServerConfig, studio: Arc<IdPhotoStudio>) -> Result<()> {
    if config.preload {
        let studio = Arc::clone(&studio);
        tokio::spawn(async move {
            if let Err(e) = studio.preload().await {
                warn!("Model preload failed, will retry on first request: {e}");
            }
        });
    }

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!(
        address = %listener.local_addr()?,
        max_upload_mb = config.max_upload_bytes / (1024 * 1024),
        "🚀 iPhoto ID listening"
    );

    let app = router(AppState::new(studio), config.max_upload_bytes);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::MockBackendFactory;
    use crate::config::{OutputFormat, StudioConfig};
    use crate::models::ModelSpec;
    use crate::services::ImageCodec;
    use crate::session_cache::SessionCache;
    use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
    use tempfile::TempDir;

    const BOUNDARY: &str = "----iphoto-id-test-boundary";

    struct TestServer {
        base_url: String,
        client: reqwest::Client,
        _model_dir: TempDir,
        _cache_dir: TempDir,
    }

    async fn start_server(max_upload_bytes: usize) -> TestServer {
        let model_dir = TempDir::new().unwrap();
        crate::models::tests::write_model_folder(model_dir.path(), &["model.onnx"]);
        let cache_dir = TempDir::new().unwrap();

        let config = StudioConfig::builder()
            .model_spec(ModelSpec::new(model_dir.path().to_string_lossy()))
            .cache_dir(Some(cache_dir.path().to_path_buf()))
            .auto_download(false)
            .build()
            .unwrap();
        let studio = IdPhotoStudio::with_factory(
            config,
            Arc::new(MockBackendFactory::default()),
            Arc::new(SessionCache::new()),
        )
        .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let app = router(AppState::new(Arc::new(studio)), max_upload_bytes);
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.unwrap();
        });

        TestServer {
            base_url: format!("http://{address}"),
            client: reqwest::Client::new(),
            _model_dir: model_dir,
            _cache_dir: cache_dir,
        }
    }

    /// `(name, value)` text fields followed by an optional photo
    fn multipart_body(fields: &[(&str, &str)], photo: Option<&[u8]>) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some(photo) = photo {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"me.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(photo);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    impl TestServer {
        async fn post_form(&self, path: &str, body: Vec<u8>) -> reqwest::Response {
            self.client
                .post(format!("{}{path}", self.base_url))
                .header(
                    reqwest::header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(body)
                .send()
                .await
                .unwrap()
        }

        async fn get(&self, path: &str) -> reqwest::Response {
            self.client
                .get(format!("{}{path}", self.base_url))
                .send()
                .await
                .unwrap()
        }
    }

    async fn json_body(response: reqwest::Response) -> serde_json::Value {
        serde_json::from_slice(&response.bytes().await.unwrap()).unwrap()
    }

    fn portrait_jpeg() -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(120, 160, Rgb([210, 170, 150])));
        ImageCodec::encode(&image, OutputFormat::Jpeg, 95).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_index() {
        let server = start_server(DEFAULT_MAX_UPLOAD_BYTES).await;

        let health = server.get("/health").await;
        assert_eq!(health.status(), 200);
        assert_eq!(health.text().await.unwrap(), "ok");

        let index = server.get("/").await;
        assert_eq!(index.status(), 200);
        let html = index.text().await.unwrap();
        assert!(html.contains(r#"action="/generate""#));
        assert!(html.contains(r#"value="one-inch-hd" selected"#));
        assert!(html.contains(r#"value="blue" checked"#));
    }

    #[tokio::test]
    async fn test_presets_catalog() {
        let server = start_server(DEFAULT_MAX_UPLOAD_BYTES).await;
        let catalog = json_body(server.get("/api/presets").await).await;

        let presets = catalog["presets"].as_array().unwrap();
        assert_eq!(presets.len(), 5);
        assert_eq!(presets[0]["key"], "one-inch");
        assert_eq!(presets[0]["width"], 295);
        assert_eq!(presets[0]["height"], 413);

        let backgrounds = catalog["backgrounds"].as_array().unwrap();
        assert_eq!(backgrounds.len(), 4);
        assert_eq!(backgrounds[0]["color"], serde_json::json!([67, 142, 219]));
        assert_eq!(backgrounds[3]["key"], "transparent");
        assert!(backgrounds[3]["color"].is_null());
        assert_eq!(backgrounds[3]["format"], "png");
    }

    #[tokio::test]
    async fn test_api_generate_returns_attachment() {
        let server = start_server(DEFAULT_MAX_UPLOAD_BYTES).await;
        let body = multipart_body(
            &[("preset", "one-inch"), ("background", "red")],
            Some(&portrait_jpeg()),
        );

        let response = server.post_form("/api/generate", body).await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-type"], "image/jpeg");
        assert_eq!(
            response.headers()["content-disposition"],
            "attachment; filename=\"id_photo_one-inch.jpeg\""
        );

        let bytes = response.bytes().await.unwrap();
        let decoded = ImageCodec::decode(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (295, 413));
    }

    #[tokio::test]
    async fn test_api_generate_transparent_png() {
        let server = start_server(DEFAULT_MAX_UPLOAD_BYTES).await;
        let body = multipart_body(
            &[("preset", "small-two-inch"), ("background", "transparent")],
            Some(&portrait_jpeg()),
        );

        let response = server.post_form("/api/generate", body).await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-type"], "image/png");
        let decoded = ImageCodec::decode(&response.bytes().await.unwrap()).unwrap();
        assert_eq!(decoded.dimensions(), (567, 390));
        assert!(decoded.color().has_alpha());
    }

    #[tokio::test]
    async fn test_api_errors_are_json_with_hint() {
        let server = start_server(DEFAULT_MAX_UPLOAD_BYTES).await;

        let missing = server
            .post_form("/api/generate", multipart_body(&[("preset", "two-inch")], None))
            .await;
        assert_eq!(missing.status(), 400);
        let body = json_body(missing).await;
        assert!(body["error"].as_str().unwrap().contains("No photo uploaded"));
        assert_eq!(body["hint"], page::RETRY_HINT);

        let broken = server
            .post_form(
                "/api/generate",
                multipart_body(&[], Some(b"definitely not an image")),
            )
            .await;
        assert_eq!(broken.status(), 500);
        let body = json_body(broken).await;
        assert!(!body["error"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_page_generate_success() {
        let server = start_server(DEFAULT_MAX_UPLOAD_BYTES).await;
        let body = multipart_body(
            &[("preset", "two-inch"), ("background", "white")],
            Some(&portrait_jpeg()),
        );

        let response = server.post_form("/generate", body).await;
        assert_eq!(response.status(), 200);
        let html = response.text().await.unwrap();
        assert!(html.contains(r#"download="id_photo_two-inch.jpeg""#));
        assert!(html.contains("data:image/jpeg;base64,"));
        assert!(html.contains(r#"value="white" checked"#));
    }

    #[tokio::test]
    async fn test_page_errors_render_form_with_hint() {
        let server = start_server(DEFAULT_MAX_UPLOAD_BYTES).await;

        let bad_preset = server
            .post_form(
                "/generate",
                multipart_body(&[("preset", "three-inch")], Some(&portrait_jpeg())),
            )
            .await;
        assert_eq!(bad_preset.status(), 400);
        let html = bad_preset.text().await.unwrap();
        assert!(html.contains("three-inch"));
        assert!(html.contains(page::RETRY_HINT));

        let broken = server
            .post_form(
                "/generate",
                multipart_body(&[("background", "red")], Some(b"GIF89a nope")),
            )
            .await;
        assert_eq!(broken.status(), 500);
        let html = broken.text().await.unwrap();
        assert!(html.contains("Something went wrong"));
        assert!(html.contains(r#"value="red" checked"#));
    }

    #[tokio::test]
    async fn test_non_multipart_post_is_rejected() {
        let server = start_server(DEFAULT_MAX_UPLOAD_BYTES).await;
        let response = server
            .client
            .post(format!("{}/generate", server.base_url))
            .body("photo=me.jpg")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_upload_limit() {
        let server = start_server(1024).await;
        let body = multipart_body(&[], Some(&vec![0u8; 4096]));

        let response = server.post_form("/api/generate", body).await;
        assert_eq!(response.status(), 413);
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:8501");
        assert_eq!(config.max_upload_bytes, 20 * 1024 * 1024);
        assert!(!config.preload);
    }
}
