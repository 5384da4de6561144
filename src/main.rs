//! BLE Security Profiler - Main Entry Point

use std::sync::Arc;

use ble_security_profiler::{
    Orchestrator,
    backend::BluerBackend,
    config::{CliArgs, Settings},
    core::passkey::{PasskeyStrategy, StdinPrompt},
};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ble_security_profiler=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let args = CliArgs::parse();
    info!(?args, "Starting BLE security profiler");
    let settings = Settings::from(args);

    let passkeys = PasskeyStrategy::from_source(&settings.passkey).await?;

    let backend = match BluerBackend::new(settings.adapter.as_deref()).await {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            error!("Failed to open Bluetooth adapter: {}", e);
            return Err(e.into());
        }
    };

    let mut orchestrator = Orchestrator::new(
        backend,
        settings.device,
        settings.profile.clone(),
        passkeys,
        StdinPrompt,
    );

    let report = tokio::select! {
        result = orchestrator.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), aborting profile");
            return Err("Profiling interrupted".into());
        }
    };

    report.write_json(&settings.output).await?;
    info!(entries = report.len(), complete = report.is_complete(), "Done");
    Ok(())
}
