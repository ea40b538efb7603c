use crate::{
    report::{Report, ReportComposer, ReportError, ReportRequest},
    telemetry::Metrics,
};
use axum::body::Bytes;
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tracing::instrument;
use xray_inference::{preprocess::decode_image, Classifier, InferenceError};

#[derive(Error, Debug)]
pub enum DiagnosisError {
    #[error("Image decode failed: {0}")]
    Decode(InferenceError),
    #[error("Classification failed: {0}")]
    Classification(InferenceError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Decodes an uploaded image, classifies it and writes the report.
pub struct DiagnosisService {
    classifier: Arc<dyn Classifier>,
    composer: Arc<dyn ReportComposer>,
    metrics: Arc<Metrics>,
}

impl DiagnosisService {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        composer: Arc<dyn ReportComposer>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            classifier,
            composer,
            metrics,
        }
    }

    #[instrument(skip(self, image_data, request), fields(bytes = image_data.len()))]
    pub async fn diagnose(
        &self,
        image_data: Bytes,
        request: &ReportRequest,
        route: &str,
    ) -> Result<Report, DiagnosisError> {
        let image = tokio::task::spawn_blocking(move || decode_image(&image_data))
            .await
            .map_err(|e| DiagnosisError::Decode(e.into()))?
            .map_err(DiagnosisError::Decode)?;

        let start = Instant::now();
        let probabilities = self
            .classifier
            .classify(image)
            .await
            .map_err(DiagnosisError::Classification)?;
        self.metrics
            .record_prediction_duration(start.elapsed().as_millis() as u64, route);

        let condition = probabilities.prediction();
        self.metrics.record_prediction(condition.label());
        tracing::info!(
            "Predicted {} with confidence {:.4}",
            condition,
            probabilities.confidence()
        );

        Ok(self.composer.compose(&probabilities, request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::TemplateComposer;
    use async_trait::async_trait;
    use image::RgbImage;
    use std::io::Cursor;
    use xray_inference::{ClassProbabilities, Condition};

    struct FixedClassifier([f32; 3]);

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(&self, _image: RgbImage) -> Result<ClassProbabilities, InferenceError> {
            ClassProbabilities::from_logits(&self.0)
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl Classifier for FailingClassifier {
        async fn classify(&self, _image: RgbImage) -> Result<ClassProbabilities, InferenceError> {
            Err(InferenceError::SessionPoisoned)
        }
    }

    fn png_bytes() -> Bytes {
        let mut buffer = Cursor::new(Vec::new());
        RgbImage::from_pixel(32, 32, image::Rgb([90, 90, 90]))
            .write_to(&mut buffer, image::ImageFormat::Png)
            .unwrap();
        Bytes::from(buffer.into_inner())
    }

    fn service(classifier: Arc<dyn Classifier>) -> (DiagnosisService, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let service = DiagnosisService::new(
            classifier,
            Arc::new(TemplateComposer),
            metrics.clone(),
        );
        (service, metrics)
    }

    #[tokio::test]
    async fn test_diagnose_covid() {
        let (service, metrics) = service(Arc::new(FixedClassifier([0.1, 2.5, 0.3])));

        let report = service
            .diagnose(png_bytes(), &ReportRequest::default(), "/predict")
            .await
            .unwrap();

        assert_eq!(report.condition, Condition::Covid19);
        assert!(report.narrative.contains("COVID-19"));
        assert!(metrics
            .encode()
            .unwrap()
            .contains("predictions_total{condition=\"COVID-19\"} 1"));
    }

    #[tokio::test]
    async fn test_diagnose_rejects_corrupt_image() {
        let (service, _) = service(Arc::new(FixedClassifier([1.0, 0.0, 0.0])));

        let result = service
            .diagnose(
                Bytes::from_static(b"not an image"),
                &ReportRequest::default(),
                "/predict",
            )
            .await;

        assert!(matches!(result, Err(DiagnosisError::Decode(_))));
    }

    #[tokio::test]
    async fn test_diagnose_classifier_failure() {
        let (service, _) = service(Arc::new(FailingClassifier));

        let result = service
            .diagnose(png_bytes(), &ReportRequest::default(), "/predict")
            .await;

        assert!(matches!(result, Err(DiagnosisError::Classification(_))));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_diagnose_large_image_on_single_thread_runtime() {
        let (service, _) = service(Arc::new(FixedClassifier([0.0, 0.0, 1.0])));
        let mut buffer = Cursor::new(Vec::new());
        RgbImage::from_pixel(2000, 1500, image::Rgb([10, 200, 30]))
            .write_to(&mut buffer, image::ImageFormat::Png)
            .unwrap();

        // Only runs if decoding hands the runtime thread back.
        let ticker = tokio::spawn(async {});
        let report = service
            .diagnose(
                Bytes::from(buffer.into_inner()),
                &ReportRequest::default(),
                "/predict",
            )
            .await
            .unwrap();

        assert!(ticker.is_finished());
        assert_eq!(report.condition, Condition::Pneumonia);
    }
}
