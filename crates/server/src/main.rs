use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use docproc_server::{build_router, startup};

/// Document processing service.
#[derive(Parser, Debug)]
#[command(name = "docproc-server", version)]
struct Cli {
    /// Bind address (overrides HOST).
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides PORT).
    #[arg(long, short)]
    port: Option<u16>,

    /// Config profile (overrides DOCPROC_PROFILE).
    #[arg(long, env = "DOCPROC_PROFILE")]
    profile: Option<String>,
}

fn load_config(cli: &Cli) -> anyhow::Result<docproc_core::Config> {
    docproc_core::config::load_dotenv();
    let mut config = match cli.profile.as_deref() {
        Some(profile) => docproc_core::Config::for_profile(profile),
        None => docproc_core::Config::from_env(),
    };
    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.validate()?;
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    config.log_summary();
    debug!(config = %config.redacted_summary(), "effective configuration");

    let state = startup::build_app_state(&config).await?;
    let orchestrator = state.orchestrator.clone();
    let background = orchestrator.spawn_background();

    let app = build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{addr} (docs at /docs)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.shutdown();
    for handle in background {
        let _ = handle.await;
    }
    info!("server stopped");
    Ok(())
}
