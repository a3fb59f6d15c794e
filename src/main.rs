use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use consult_core::config::Config;
use consult_core::orchestrator::SessionOrchestrator;
use consult_core::repository::memory::{
    InMemoryCaseRepository, InMemoryFeedbackRepository, InMemoryParticipantRepository,
    InMemorySessionRepository,
};
use consult_core::scheduler::TokioScheduler;

#[derive(Parser, Debug)]
#[command(name = "consult", version, about = "Session Orchestration Core server")]
struct Cli {
    /// Path to a TOML config file; falls back to environment variables and
    /// built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.format {
        consult_core::config::LogFormat::Json => subscriber.json().init(),
        consult_core::config::LogFormat::Compact => subscriber.compact().init(),
        consult_core::config::LogFormat::Pretty => subscriber.pretty().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    init_tracing(&config);

    let sessions = Arc::new(InMemorySessionRepository::default());
    let participants = Arc::new(InMemoryParticipantRepository::default());
    let feedback = Arc::new(InMemoryFeedbackRepository::default());
    let cases = Arc::new(InMemoryCaseRepository::default());
    let scheduler = Arc::new(TokioScheduler::new());

    let orchestrator = SessionOrchestrator::new(
        sessions,
        participants,
        feedback,
        cases,
        scheduler,
        Duration::from_secs(config.session_defaults.idle_timeout_secs),
        config.session_defaults.feedback_phase_seconds,
        config.session_defaults.code_generation_attempts,
    );

    #[cfg(feature = "http-api")]
    {
        let server = consult_core::HttpApiServer::new(config.api.clone(), orchestrator);
        server.start().await?;
    }

    #[cfg(not(feature = "http-api"))]
    {
        tracing::warn!("built without the http-api feature; nothing to serve");
        let _ = orchestrator;
    }

    Ok(())
}
