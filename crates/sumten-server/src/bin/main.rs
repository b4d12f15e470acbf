use tracing_subscriber::EnvFilter;

use sumten_server::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG=sumten_server=debug for per-message output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .compact()
        .init();

    let config = Config::from_env()?;
    let (app, _state) = sumten_server::build_app(&config).await?;

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        %addr,
        static_dir = %config.static_dir.display(),
        database = %config.database_url,
        "server running"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
