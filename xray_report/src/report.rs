use crate::{config::ReportStrategy, telemetry::Metrics};
use async_trait::async_trait;
use serde::Serialize;
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use xray_inference::{
    ClassProbabilities, Condition, GeneratorKind, GeneratorRegistry, InferenceError,
};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Report generation failed: {0}")]
    Generation(#[from] InferenceError),
}

#[derive(Debug, Clone, Default)]
pub struct ReportRequest {
    /// Raw `llm` form value.
    pub llm: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub condition: Condition,
    pub confidence: f32,
    pub probabilities: ClassProbabilities,
    pub narrative: String,
    pub clinical_notes: Option<String>,
    #[serde(skip)]
    pub strategy: ReportStrategy,
}

#[async_trait]
pub trait ReportComposer: Send + Sync + 'static {
    async fn compose(
        &self,
        probabilities: &ClassProbabilities,
        request: &ReportRequest,
    ) -> Result<Report, ReportError>;
}

pub fn format_percent(probability: f32) -> String {
    format!("{:.2}%", probability as f64 * 100.0)
}

/// Fixed prose per condition plus a probability breakdown. Deterministic.
#[derive(Debug, Clone, Default)]
pub struct TemplateComposer;

impl TemplateComposer {
    pub fn narrative(probabilities: &ClassProbabilities) -> String {
        let condition = probabilities.prediction();
        let confidence = format_percent(probabilities.confidence());

        let details = match condition {
            Condition::Covid19 => format!(
                "The X-ray shows signs consistent with COVID-19, such as ground-glass opacities \
                 and bilateral patchy shadows, often seen in early stages of infection. \
                 The confidence level for this diagnosis is {}. ",
                confidence
            ),
            Condition::Pneumonia => format!(
                "The X-ray indicates features typical of pneumonia, including alveolar opacities, \
                 which may appear as consolidation or air bronchograms. This is consistent with \
                 an active infection. The confidence level for this diagnosis is {}. ",
                confidence
            ),
            Condition::Normal => format!(
                "The X-ray appears normal with no signs of significant abnormalities. \
                 There are no visible opacities, consolidations, or other patterns indicative \
                 of infection. The confidence level for this result is {}. ",
                confidence
            ),
        };

        let mut message = details + "\n\nProbability Breakdown:\n";
        for (condition, probability) in probabilities.iter() {
            message.push_str(&format!(
                "- {}: {}\n",
                condition.label(),
                format_percent(probability)
            ));
        }
        message
    }
}

#[async_trait]
impl ReportComposer for TemplateComposer {
    async fn compose(
        &self,
        probabilities: &ClassProbabilities,
        _request: &ReportRequest,
    ) -> Result<Report, ReportError> {
        Ok(Report {
            condition: probabilities.prediction(),
            confidence: probabilities.confidence(),
            probabilities: probabilities.clone(),
            narrative: Self::narrative(probabilities),
            clinical_notes: None,
            strategy: ReportStrategy::Template,
        })
    }
}

/// Asks a pretrained language model to write about the predicted condition.
pub struct GenerativeComposer {
    registry: Arc<GeneratorRegistry>,
    max_length: usize,
    metrics: Option<Arc<Metrics>>,
}

impl GenerativeComposer {
    pub fn new(registry: Arc<GeneratorRegistry>, max_length: usize) -> Self {
        Self {
            registry,
            max_length,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

pub fn report_prompt(condition: Condition) -> String {
    format!("Disease detected: {}", condition.label())
}

pub fn clinical_notes(condition: Condition) -> &'static str {
    match condition {
        Condition::Pneumonia => {
            "Pneumonia is a lung infection caused by bacteria, viruses, or fungi. \
             Symptoms include fever, cough, difficulty breathing, and chest pain. \
             Pneumonia can be caused by various pathogens, including Streptococcus pneumoniae, \
             Haemophilus influenzae, and viruses like the flu or COVID-19. \
             Treatment typically includes antibiotics for bacterial pneumonia, antivirals for \
             viral pneumonia, and supportive care like oxygen therapy and fluids. Treatment \
             should be guided by clinical symptoms, imaging results, and culture or PCR tests."
        }
        Condition::Covid19 => {
            "COVID-19 is a disease caused by the SARS-CoV-2 virus, affecting the respiratory \
             system. Symptoms include fever, dry cough, fatigue, shortness of breath, and loss \
             of taste or smell. Some individuals may experience severe symptoms, leading to \
             pneumonia, acute respiratory distress syndrome (ARDS), and multi-organ failure. \
             COVID-19 is primarily transmitted via respiratory droplets, and prevention \
             includes wearing masks, social distancing, and vaccination. Management may involve \
             hospitalization, oxygen therapy, and antivirals, with treatment tailored to the \
             severity of the symptoms."
        }
        Condition::Normal => {
            "No disease detected. The X-ray shows normal, and further diagnostic processes \
             are recommended."
        }
    }
}

#[async_trait]
impl ReportComposer for GenerativeComposer {
    async fn compose(
        &self,
        probabilities: &ClassProbabilities,
        request: &ReportRequest,
    ) -> Result<Report, ReportError> {
        let condition = probabilities.prediction();
        let kind = GeneratorKind::from_form_value(request.llm.as_deref());
        let generator = self.registry.resolve(kind)?;

        let start = Instant::now();
        let narrative = generator
            .generate(&report_prompt(condition), self.max_length)
            .await?;
        if let Some(metrics) = &self.metrics {
            metrics.record_generation_duration(
                start.elapsed().as_millis() as u64,
                generator.kind().as_str(),
            );
        }

        Ok(Report {
            condition,
            confidence: probabilities.confidence(),
            probabilities: probabilities.clone(),
            narrative,
            clinical_notes: Some(clinical_notes(condition).to_string()),
            strategy: ReportStrategy::Generative,
        })
    }
}
