//! Assessor - turn-based evaluation sessions between an evaluator and a subject agent

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "assessor=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting Assessor v{}", env!("CARGO_PKG_VERSION"));

    // Run CLI
    assessor::cli::run()?;

    Ok(())
}
