pub mod api;
pub mod config;
pub mod dispatcher;
pub mod gateway;
pub mod handlers;
pub mod metrics_defs;
pub mod postgres;
pub mod protocol;
pub mod rate_gate;
pub mod retry;
pub mod store;
pub mod supervisor;
pub mod types;

#[cfg(test)]
mod testutils;

use api::{RpcService, ServerError};
use axum::Router;
use config::{Config, ValidationError};
use dispatcher::{Dispatcher, RegistrationError};
use postgres::PgConnector;
use std::sync::Arc;
use store::{Connector, StoreError};
use supervisor::ConnectionSupervisor;

#[derive(thiserror::Error, Debug)]
pub enum LocationsError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("database setup failed: {0}")]
    Store(#[from] StoreError),

    #[error("could not establish initial database connection to {0}")]
    DatabaseUnavailable(String),

    #[error("method registration failed: {0}")]
    Registration(#[from] RegistrationError),

    #[error("server error: {0}")]
    Server(#[from] ServerError),
}

/// Runs the locations service against the configured Postgres database until shutdown.
pub async fn run(config: Config) -> Result<(), LocationsError> {
    config.validate()?;
    let url = config.database.connection_url()?;
    let connector = PgConnector::new(&url, config.database.tls)?;

    run_with_connector(config, Arc::new(connector)).await
}

/// Connects with the startup retry budget, then serves. The server never starts
/// listening without a live session.
pub async fn run_with_connector(
    config: Config,
    connector: Arc<dyn Connector>,
) -> Result<(), LocationsError> {
    let target = connector.describe();
    let supervisor = Arc::new(ConnectionSupervisor::new(connector));

    tracing::info!("Connecting to database at {target}");
    if !supervisor.ensure(&config.database.startup_retry).await {
        return Err(LocationsError::DatabaseUnavailable(target));
    }

    let app = build_app(&config, supervisor)?;
    api::serve(&config.listener, app).await?;
    Ok(())
}

/// Registers the RPC methods and builds the HTTP router over `supervisor`.
pub fn build_app(
    config: &Config,
    supervisor: Arc<ConnectionSupervisor>,
) -> Result<Router, RegistrationError> {
    let mut dispatcher = Dispatcher::new();
    handlers::register_location_methods(&mut dispatcher, supervisor.clone())?;
    tracing::info!("Registered RPC methods: {}", dispatcher.method_names().join(", "));

    let service = RpcService::new(supervisor, dispatcher, config);
    Ok(api::router(
        Arc::new(service),
        &config.cors.effective_origins(),
    ))
}
