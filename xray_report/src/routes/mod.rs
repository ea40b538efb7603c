mod chat;
mod error;
mod health;
mod index;
mod metrics;
mod predict;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(index::index))
        .route("/upload", post(predict::predict))
        .route("/predict", post(predict::predict))
        .route("/chat", post(chat::chat))
        .route("/healthcheck", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
}

#[cfg(test)]
mod tests {
    use crate::{
        diagnosis::DiagnosisService,
        report::TemplateComposer,
        server::{build_router, SharedState},
        telemetry::Metrics,
        uploads::UploadStore,
    };
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        Router,
    };
    use image::RgbImage;
    use std::{
        io::Cursor,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };
    use tempfile::TempDir;
    use tower::ServiceExt;
    use xray_inference::{
        ClassProbabilities, Classifier, GeneratorKind, GeneratorRegistry, InferenceError,
        TextGenerator,
    };

    const BOUNDARY: &str = "xray-test-boundary";

    struct CountingClassifier {
        logits: [f32; 3],
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Classifier for CountingClassifier {
        async fn classify(&self, _image: RgbImage) -> Result<ClassProbabilities, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ClassProbabilities::from_logits(&self.logits)
        }
    }

    struct EchoGenerator(GeneratorKind);

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        fn kind(&self) -> GeneratorKind {
            self.0
        }

        async fn generate(
            &self,
            prompt: &str,
            _max_length: usize,
        ) -> Result<String, InferenceError> {
            Ok(format!("[{}] {}", self.0, prompt))
        }
    }

    struct TestApp {
        router: Router,
        classifier: Arc<CountingClassifier>,
        uploads: TempDir,
    }

    async fn test_app(registry: GeneratorRegistry) -> TestApp {
        let uploads = tempfile::tempdir().unwrap();
        let classifier = Arc::new(CountingClassifier {
            logits: [3.0, 0.2, 0.1],
            calls: AtomicUsize::new(0),
        });
        let metrics = Arc::new(Metrics::new().unwrap());
        let state = SharedState {
            diagnosis: Arc::new(DiagnosisService::new(
                classifier.clone(),
                Arc::new(TemplateComposer),
                metrics.clone(),
            )),
            registry: Arc::new(registry),
            uploads: UploadStore::new(uploads.path()).await.unwrap(),
            metrics,
            max_length: 250,
        };

        TestApp {
            router: build_router(state, 1024 * 1024),
            classifier,
            uploads,
        }
    }

    fn bart_registry() -> GeneratorRegistry {
        let mut registry = GeneratorRegistry::new();
        registry.insert(Arc::new(EchoGenerator(GeneratorKind::Bart)));
        registry
    }

    fn png_bytes() -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        RgbImage::from_pixel(64, 48, image::Rgb([120, 120, 120]))
            .write_to(&mut buffer, image::ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    /// Parts are `(field name, filename, content)`.
    fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, content) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match filename {
                Some(filename) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        name, filename
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                ),
            }
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn multipart_request(uri: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn error_message(body: &str) -> String {
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        json["error"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let app = test_app(GeneratorRegistry::new()).await;
        let request = Request::get("/healthcheck").body(Body::empty()).unwrap();

        let (status, body) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"status":"Available"}"#);
    }

    #[tokio::test]
    async fn test_index_page() {
        let app = test_app(GeneratorRegistry::new()).await;
        let request = Request::get("/").body(Body::empty()).unwrap();

        let (status, body) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("enctype=\"multipart/form-data\""));
    }

    #[tokio::test]
    async fn test_predict_without_file_part() {
        let app = test_app(GeneratorRegistry::new()).await;
        let body = multipart_body(&[("llm", None, &b"gpt2"[..])]);

        let (status, body) = send(&app.router, multipart_request("/predict", body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), "No file part");
        assert_eq!(app.classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_predict_without_filename() {
        let app = test_app(GeneratorRegistry::new()).await;
        let body = multipart_body(&[("file", Some(""), &b"abc"[..])]);

        let (status, body) = send(&app.router, multipart_request("/predict", body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), "No selected file");
        assert_eq!(app.classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_predict_empty_file() {
        let app = test_app(GeneratorRegistry::new()).await;
        let body = multipart_body(&[("image", Some("scan.png"), &b""[..])]);

        let (status, body) = send(&app.router, multipart_request("/predict", body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), "Uploaded file is empty");
        assert_eq!(app.classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_predict_not_multipart() {
        let app = test_app(GeneratorRegistry::new()).await;
        let request = Request::post("/predict")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("hello"))
            .unwrap();

        let (status, body) = send(&app.router, request).await;

        assert!(status.is_client_error());
        assert!(!error_message(&body).is_empty());
        assert_eq!(app.classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upload_normal_image() {
        let app = test_app(GeneratorRegistry::new()).await;
        let png = png_bytes();
        let body = multipart_body(&[("file", Some("chest scan.png"), png.as_slice())]);

        let (status, body) = send(&app.router, multipart_request("/upload", body)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Result: Normal"));
        assert!(body.contains("appears normal"));
        assert!(body.contains("_chest_scan.png"));
        assert_eq!(app.classifier.calls.load(Ordering::SeqCst), 1);

        let stored: Vec<_> = std::fs::read_dir(app.uploads.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].ends_with("_chest_scan.png"));
    }

    #[tokio::test]
    async fn test_uploaded_image_is_served() {
        let app = test_app(GeneratorRegistry::new()).await;
        std::fs::write(app.uploads.path().join("abc_scan.png"), b"png-bytes").unwrap();
        let request = Request::get("/uploads/abc_scan.png")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "png-bytes");
    }

    #[tokio::test]
    async fn test_predict_corrupt_image() {
        let app = test_app(GeneratorRegistry::new()).await;
        let body = multipart_body(&[("file", Some("scan.png"), &b"definitely not a png"[..])]);

        let (status, body) = send(&app.router, multipart_request("/predict", body)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error_message(&body), "Error during classification");
        assert_eq!(app.classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chat_unknown_llm_uses_summarizer() {
        let app = test_app(bart_registry()).await;
        let request = Request::post("/chat")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("user_input=is+this+serious%3F&llm=something"))
            .unwrap();

        let (status, body) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[bart] Medical conversation: is this serious?");
    }

    #[tokio::test]
    async fn test_chat_accepts_multipart_form() {
        let app = test_app(bart_registry()).await;
        let body = multipart_body(&[
            ("user_input", None, &b"what does this mean?"[..]),
            ("llm", None, &b"gptneo"[..]),
        ]);

        let (status, body) = send(&app.router, multipart_request("/chat", body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[bart] Medical conversation: what does this mean?");
    }

    #[tokio::test]
    async fn test_chat_without_generators() {
        let app = test_app(GeneratorRegistry::new()).await;
        let request = Request::post("/chat")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("user_input=hello&llm=gpt2"))
            .unwrap();

        let (status, body) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error_message(&body), "Error during report generation");
    }

    #[tokio::test]
    async fn test_metrics_after_requests() {
        let app = test_app(GeneratorRegistry::new()).await;
        send(&app.router, Request::get("/").body(Body::empty()).unwrap()).await;

        let request = Request::get("/metrics").body(Body::empty()).unwrap();
        let (status, body) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("requests_total{route=\"/\"} 1"));
    }
}
