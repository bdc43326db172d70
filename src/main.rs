use anyhow::Context;
use mlspace::configuration::get_configuration;
use mlspace::projects::{ProjectRegistry, StaticProjectRegistry};
use mlspace::startup;
use mlspace::telemetry::{get_subscriber, init_subscriber};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = get_subscriber("mlspace".into(), "info".into());
    init_subscriber(subscriber);

    let settings = get_configuration().context("Failed to read configuration.")?;

    let pool = match &settings.database {
        Some(database) => {
            tracing::info!(
                db_host = %database.host,
                db_port = database.port,
                db_name = %database.database_name,
                "Connecting to PostgreSQL"
            );
            let connect_options = PgConnectOptions::new()
                .host(&database.host)
                .port(database.port)
                .username(&database.username)
                .password(&database.password)
                .database(&database.database_name)
                .ssl_mode(PgSslMode::Disable);
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(30))
                .connect_with(connect_options)
                .await
                .context("Failed to connect to database.")?;
            Some(pool)
        }
        None => {
            tracing::info!("No database configured, keeping schedules in memory");
            None
        }
    };

    let projects: Arc<dyn ProjectRegistry> = Arc::new(StaticProjectRegistry::new());
    let app = startup::build(&settings, pool, projects)
        .await
        .context("Failed to build the control plane.")?;

    tracing::info!(backend = ?settings.backend, "Control plane started");
    tokio::select! {
        _ = app.scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }
    Ok(())
}
