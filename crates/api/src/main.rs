use anyhow::Context;

use orchard_api::config::AppConfig;
use orchard_infra::SweepRunner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is normal outside local development.
    let _ = dotenvy::dotenv();

    let config = AppConfig::from_env().context("invalid configuration")?;
    orchard_observability::init(config.log_format);
    if config.uses_dev_jwt_secret() {
        tracing::warn!("ORCHARD_JWT_SECRET not set; using insecure dev default");
    }

    let (app, services) = orchard_api::app::build_app(&config)
        .await
        .context("failed to initialize storage")?;

    let sweep = config.sweep_interval.map(|interval| {
        let runner = SweepRunner {
            interval,
            ..SweepRunner::default()
        };
        runner.spawn(services.sweeper.clone())
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .context("server error")?;

    if let Some(handle) = sweep {
        handle.shutdown().await;
    }

    Ok(())
}
