use xray_report::{config, start_app, telemetry::init_tracing};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::get_configuration()?;
    init_tracing(config.log_level.as_str());

    start_app(config).await?;

    Ok(())
}
