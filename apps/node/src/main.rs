//! Secchiware node - main entry point.
//!
//! Registers with the C2 and serves the local test API. When the C2 cannot
//! be reached at startup the node falls back to stand-alone mode: it runs
//! every installed test once, prints the report array to stdout and exits.

mod api;
mod auth;
mod c2_client;
mod config;
mod error;
mod registry;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use clap::Parser;
use secchiware_protocol::runner::Selection;
use secchiware_protocol::platform;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{ExecutionLock, ShutdownHandle};
use crate::auth::RequestAuthenticator;
use crate::c2_client::C2Client;
use crate::config::NodeConfig;
use crate::registry::SharedRegistry;

/// Exit code for startup misconfiguration.
const EXIT_MISCONFIGURED: u8 = 1;
/// Exit code for fatal runtime errors.
const EXIT_FATAL: u8 = 2;

/// Secchiware node: serves transparency tests inside an analysis environment.
#[derive(Parser)]
#[command(name = "secchiware-node", version)]
struct Args {
    /// Path to the JSON configuration file.
    config: PathBuf,
}

#[actix_web::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");

    let config = match NodeConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            return ExitCode::from(EXIT_MISCONFIGURED);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&config.test_root) {
        error!("failed to create test root {:?}: {e}", config.test_root);
        return ExitCode::from(EXIT_MISCONFIGURED);
    }

    let registry = match SharedRegistry::open(config.test_root.clone()) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            error!("failed to load installed test sets: {e}");
            return ExitCode::from(EXIT_MISCONFIGURED);
        }
    };

    let c2 = match C2Client::new(&config) {
        Ok(c2) => c2,
        Err(e) => {
            error!("failed to build HTTP client: {e}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    let platform_info = platform::gather();
    info!(
        "registering with C2 at {} as {}:{}",
        config.c2_base_url(),
        config.listen_ip,
        config.listen_port
    );

    if let Err(e) = c2
        .register(&config.listen_ip, config.listen_port, &platform_info)
        .await
    {
        warn!("registration failed: {e}");
        warn!("falling back to stand-alone mode");
        return run_stand_alone(&registry);
    }
    info!("connected successfully");

    let authenticator = web::Data::new(RequestAuthenticator::new(
        config.c2_key_id.clone(),
        &config.c2_secret,
        config.skew_secs,
    ));
    let registry_data = web::Data::from(registry.clone());
    let execution_lock = web::Data::new(ExecutionLock::new());
    let (shutdown, mut shutdown_rx) = ShutdownHandle::new();
    let shutdown_data = web::Data::new(shutdown);
    let bind_address = config.bind_address();

    // Bundle uploads arrive as one in-memory body.
    const MAX_UPLOAD_SIZE: usize = 64 * 1024 * 1024;

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(web::PayloadConfig::new(MAX_UPLOAD_SIZE))
            .app_data(registry_data.clone())
            .app_data(authenticator.clone())
            .app_data(execution_lock.clone())
            .app_data(shutdown_data.clone())
            .configure(api::configure_routes)
    })
    .bind(&bind_address);

    let server = match server {
        Ok(server) => server.run(),
        Err(e) => {
            error!("failed to bind {bind_address}: {e}");
            if let Err(e) = c2.deregister(&config.listen_ip, config.listen_port).await {
                warn!("failed to deregister after bind failure: {e}");
            }
            // A node that cannot listen still produces its evidence once.
            let _ = run_stand_alone(&registry);
            return ExitCode::from(EXIT_MISCONFIGURED);
        }
    };

    info!("listening on http://{bind_address}");

    // DELETE / asks the listener to stop; its 204 is already on the wire
    // when the stop begins.
    let handle = server.handle();
    let remote_stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let remote_stop_flag = remote_stop.clone();
    tokio::spawn(async move {
        if shutdown_rx.recv().await.is_some() {
            remote_stop_flag.store(true, std::sync::atomic::Ordering::SeqCst);
            handle.stop(true).await;
        }
    });

    if let Err(e) = server.await {
        error!("server error: {e}");
        return ExitCode::from(EXIT_FATAL);
    }

    if remote_stop.load(std::sync::atomic::Ordering::SeqCst) {
        // The C2 ordered the shutdown and closes the session on its side.
        info!("stopped on C2 request");
    } else {
        info!("deregistering from C2");
        if let Err(e) = c2.deregister(&config.listen_ip, config.listen_port).await {
            warn!("could not contact Command and Control server before exiting: {e}");
        }
    }

    info!("exiting");
    ExitCode::SUCCESS
}

/// Runs every installed test once and prints the report array to stdout.
fn run_stand_alone(registry: &SharedRegistry) -> ExitCode {
    let snapshot = registry.snapshot();
    let plan = match snapshot.plan(&Selection::default()) {
        Ok(plan) => plan,
        Err(e) => {
            error!("failed to resolve installed tests: {e}");
            return ExitCode::from(EXIT_FATAL);
        }
    };
    let reports = snapshot.run(&plan);
    match serde_json::to_string(&reports) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("failed to serialize reports: {e}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}
