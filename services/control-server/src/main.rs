use clap::Parser;
use control_core::{register_builtin_controllers, ControllerRegistry, FleetConfig};
use control_server::state::AppState;

/// Control-plane server for a fleet of hardware controllers.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the fleet configuration JSON document.
    #[arg(long, default_value = "controllers.json")]
    config: std::path::PathBuf,

    /// Address to bind the HTTP listener to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: std::net::SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = FleetConfig::load_from_path(&args.config)
        .inspect_err(|err| tracing::error!(path = %args.config.display(), error = %err, "failed to load fleet config"))?;

    let mut registry = ControllerRegistry::new();
    register_builtin_controllers(&mut registry);

    let state = AppState::bootstrap(&registry, &config.controllers).await?;
    let router = control_server::build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(addr = %args.bind, "control server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown().await;
    Ok(())
}

/// Waits for ctrl-c or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
