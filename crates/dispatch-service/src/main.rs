//! Task-dispatch worker orchestrator binary entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use dispatch_service::domain::config::DispatchConfig;

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::var("DISPATCH_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config/dispatch.toml"));

    let config = match DispatchConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut telemetry_config = dispatch_telemetry::TelemetryConfig::from_env();
    telemetry_config.log_level = config.telemetry.log_level.clone();
    telemetry_config.json_logs = config.telemetry.json_logs;
    telemetry_config.environment = config.telemetry.environment.clone();

    let _telemetry_guard = match dispatch_telemetry::init_telemetry(telemetry_config).await {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("telemetry initialization failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = dispatch_service::run(config).await {
        tracing::error!(error = %e, "dispatch service exited with an error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
