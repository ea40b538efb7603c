use crate::config::{Config, ReportStrategy};
use crate::diagnosis::DiagnosisService;
use crate::report::{GenerativeComposer, ReportComposer, TemplateComposer};
use crate::server::{HttpServer, SharedState};
use crate::telemetry::Metrics;
use crate::uploads::UploadStore;

use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};
use xray_inference::{Classifier, GeneratorRegistry, OrtClipClassifier};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let classifier: Arc<dyn Classifier> = match OrtClipClassifier::new(&config.classifier) {
        Ok(classifier) => Arc::new(classifier),
        Err(e) => {
            tracing::error!("Failed to initialize classifier: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let registry = match GeneratorRegistry::from_config(&config.generators) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            tracing::error!("Failed to initialize text generators: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let metrics = Arc::new(Metrics::new()?);

    let composer: Arc<dyn ReportComposer> = match config.report.strategy {
        ReportStrategy::Template => Arc::new(TemplateComposer),
        ReportStrategy::Generative => Arc::new(
            GenerativeComposer::new(registry.clone(), config.report.max_length)
                .with_metrics(metrics.clone()),
        ),
    };
    tracing::info!("Report strategy: {:?}", config.report.strategy);

    let uploads = UploadStore::new(&config.uploads.dir).await?;

    let state = SharedState {
        diagnosis: Arc::new(DiagnosisService::new(
            classifier,
            composer,
            metrics.clone(),
        )),
        registry,
        uploads,
        metrics,
        max_length: config.report.max_length,
    };

    let server = HttpServer::new(state, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
