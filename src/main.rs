use std::process::ExitCode;
use std::sync::Arc;

use scam_replier::config::ReplierConfig;
use scam_replier::llm::create_provider;
use scam_replier::logging;
use scam_replier::mailbox::ImapSmtpGateway;
use scam_replier::orchestrator::Orchestrator;
use scam_replier::reply::ReplyGenerator;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Warning: a rustls crypto provider was already installed");
    }

    let config = match ReplierConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let _log_guard = logging::init(&config.log)?;

    tracing::info!(
        imap = %config.credentials.imap_host,
        smtp = %config.credentials.smtp_host,
        user = %config.credentials.username,
        filter = %config.credentials.search_filter,
        "Validation passed"
    );

    let llm = create_provider(&config.llm)?;
    let generator = ReplyGenerator::new(llm, config.persona.clone());
    let gateway = Arc::new(ImapSmtpGateway::new(config.credentials.clone()));
    let orchestrator = Orchestrator::new(gateway, generator, config.poll_interval);

    tokio::select! {
        result = orchestrator.run() => {
            let Err(fatal) = result;
            tracing::error!(error = %fatal, "Fatal error, exiting");
            Ok(ExitCode::FAILURE)
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            Ok(ExitCode::SUCCESS)
        }
    }
}
