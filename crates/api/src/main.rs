use anyhow::Context;
use tracing::{info, warn};

use cohort_api::app::build_app;
use cohort_infra::{Config, InMemoryStore, PostgresStore, Services};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cohort_observability::init();

    let config = Config::from_env()?;

    let app = match &config.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url, config.database_max_connections)
                .await
                .context("failed to connect to postgres")?;
            store.migrate().await.context("failed to apply schema")?;
            build_app(Services::new(store), &config.jwt_secret)
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory storage");
            build_app(Services::new(InMemoryStore::new()), &config.jwt_secret)
        }
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
