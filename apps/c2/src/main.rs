//! Secchiware C2 - main entry point.
//!
//! Starts the Actix-web server with configured routes and middleware, the
//! liveness sweeper, and the shared broker every worker coordinates
//! through. `--stop-environments` runs the fleet-shutdown maintenance task
//! instead of serving.

mod api;
mod auth;
mod broker;
mod config;
mod db;
mod entity;
mod error;
mod middleware;
mod migration;
mod services;

use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{http::header, web, App, HttpServer};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::auth::Verifier;
use crate::broker::{Broker, MemoryBroker};
use crate::config::Config;
use crate::db::DbPool;
use crate::services::liveness::{self, SweeperConfig};
use crate::services::{shutdown, NodeClient, Repository};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            error!("RUST_ENV must be 'development' or 'production'; in production,");
            error!("C2_DATABASE_URL, C2_CLIENT_SECRET and C2_NODE_SECRET must be set");
            std::process::exit(1);
        }
    };

    info!("========================================");
    info!("  Secchiware C2");
    info!("  Environment: {}", config.environment);
    info!("========================================");

    if config.is_development() {
        warn!("running in DEVELOPMENT mode - do not use in production!");
    }

    let pool = DbPool::new(&config.database)
        .await
        .expect("failed to initialize database");
    info!("database connection established");

    pool.run_migrations()
        .await
        .expect("failed to run migrations");
    info!("database migrations complete");

    let node_client = Arc::new(
        NodeClient::new(&config.auth.node_secret, config.node.timeout_ms)
            .expect("failed to build node HTTP client"),
    );

    // Maintenance mode: shut the fleet down and exit.
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|arg| arg == "--stop-environments") {
        info!("stopping active environments");
        if let Err(e) = shutdown::stop_active_environments(&pool, &node_client).await {
            error!("failed to stop environments: {e}");
            std::process::exit(1);
        }
        return Ok(());
    }

    let repository = Repository::new(config.tests_path.clone());
    repository
        .ensure()
        .expect("failed to create the tests repository");
    info!("tests repository at {:?}", config.tests_path);

    // The broker is the only shared mutable state; everything else reaches
    // it through this handle.
    let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());

    let verifier = web::Data::new(Verifier::new(&config.auth, broker.clone()));

    liveness::start(
        pool.clone(),
        broker.clone(),
        node_client.clone(),
        SweeperConfig {
            interval_secs: config.node.sweep_interval_secs,
            lock_ttl: Duration::from_secs(config.node.lock_ttl_secs),
            lock_wait: Duration::from_secs(config.node.lock_wait_secs),
        },
    );

    let bind_address = config.server.bind_address();
    let allowed_origins = config.server.allowed_origins.clone();
    let is_development = config.is_development();

    let pool_data = web::Data::new(pool.clone());
    let broker_data: web::Data<dyn Broker> = web::Data::from(broker.clone());
    let repository_data = web::Data::new(repository);
    let client_data = web::Data::from(node_client.clone());
    let config_data = web::Data::new(config);

    info!("starting server at http://{bind_address}");

    let server = HttpServer::new(move || {
        // Unlisted origins receive no ACAO header, which browsers treat
        // as a CORS denial; an empty list means same-origin only.
        let allowed_methods = vec!["GET", "POST", "PATCH", "DELETE", "OPTIONS"];
        let allowed_headers = vec![
            header::AUTHORIZATION,
            header::ACCEPT,
            header::CONTENT_TYPE,
            "Digest".parse().unwrap(),
            "Timestamp".parse().unwrap(),
        ];

        let cors = if is_development {
            Cors::default()
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allowed_methods(allowed_methods)
                .allowed_headers(allowed_headers)
                .max_age(3600)
        } else {
            let mut cors_builder = Cors::default()
                .allowed_methods(allowed_methods)
                .allowed_headers(allowed_headers)
                .max_age(3600);
            for origin in &allowed_origins {
                cors_builder = cors_builder.allowed_origin(origin);
            }
            cors_builder
        };

        // Bundle uploads arrive as one in-memory body.
        const MAX_UPLOAD_SIZE: usize = 64 * 1024 * 1024;

        App::new()
            .wrap(cors)
            .wrap(middleware::RequestLogger)
            .app_data(web::PayloadConfig::new(MAX_UPLOAD_SIZE))
            .app_data(pool_data.clone())
            .app_data(broker_data.clone())
            .app_data(repository_data.clone())
            .app_data(client_data.clone())
            .app_data(verifier.clone())
            .app_data(config_data.clone())
            .configure(api::configure_environment_routes)
            .configure(api::configure_session_routes)
            .configure(api::configure_execution_routes)
            .configure(api::configure_test_set_routes)
    })
    .bind(&bind_address)?;

    server.run().await?;

    // The listener is down; give every registered node the stop order and
    // close their sessions.
    info!("server stopped, shutting down active environments");
    if let Err(e) = shutdown::stop_active_environments(&pool, &node_client).await {
        warn!("fleet shutdown incomplete: {e}");
    }

    Ok(())
}
