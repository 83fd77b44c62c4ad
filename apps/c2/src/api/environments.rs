//! Environment (live node) handlers.
//!
//! Registration state for one `(ip, port)` endpoint is only ever touched
//! under that endpoint's broker mutex; listings read the active-node table
//! without locks and tolerate eventual consistency with the database.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use secchiware_protocol::bundle::BundleError;
use secchiware_protocol::{PlatformInfo, TestReport};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::auth::Verifier;
use crate::broker::{self, Broker, LockGuard};
use crate::config::Config;
use crate::db::{executions, reports, sessions, DbPool};
use crate::error::{AppError, AppResult};
use crate::services::active_nodes::{self, ActiveEntry};
use crate::services::{NodeClient, Repository};

/// One row of `GET /environments`.
#[derive(Debug, Serialize)]
pub struct EnvironmentSummary {
    pub session_id: i32,
    pub ip: String,
    pub port: u16,
    pub session_start: String,
}

/// Body of `POST /environments`.
#[derive(Debug, Deserialize)]
pub struct RegisterEnvironment {
    pub ip: String,
    pub port: u16,
    pub platform_info: PlatformInfo,
}

/// GET /environments: the active-node table.
async fn list_environments(broker: web::Data<dyn Broker>) -> AppResult<HttpResponse> {
    let broker = broker.into_inner();
    let environments: Vec<EnvironmentSummary> = active_nodes::list(&broker)
        .into_iter()
        .map(|(ip, port, entry)| EnvironmentSummary {
            session_id: entry.session_id,
            ip,
            port,
            session_start: entry.session_start,
        })
        .collect();
    Ok(HttpResponse::Ok().json(environments))
}

/// POST /environments: a node registers itself.
async fn add_environment(
    req: HttpRequest,
    body: web::Bytes,
    verifier: web::Data<Verifier>,
    pool: web::Data<DbPool>,
    broker: web::Data<dyn Broker>,
    config: web::Data<Config>,
) -> AppResult<HttpResponse> {
    verifier.verify_node(&req, Some(&body))?;
    check_is_json(&req)?;

    let registration: RegisterEnvironment = serde_json::from_slice(&body).map_err(|_| {
        AppError::Validation("One or more keys missing in request's body".to_string())
    })?;
    let RegisterEnvironment {
        ip,
        port,
        platform_info,
    } = registration;

    let broker = broker.into_inner();
    let _guard = endpoint_lock(&broker, &config, &ip, port).await?;

    let conn = pool.connection();
    if let Some(previous) = sessions::close_active(conn, &ip, port).await? {
        // An active session for this endpoint means its node went away
        // without deregistering.
        info!("closed stale session {previous} for {ip}:{port}");
        active_nodes::remove(&broker, &ip, port);
    }

    let session = sessions::open(conn, &ip, port, &platform_info).await?;
    active_nodes::put(
        &broker,
        &ip,
        port,
        &ActiveEntry {
            session_id: session.id,
            session_start: session.session_start.clone(),
            platform_info,
        },
    );

    info!("environment registered at {ip}:{port} (session {})", session.id);
    Ok(HttpResponse::NoContent().finish())
}

/// DELETE /environments/{ip}/{port}: a node deregisters.
async fn remove_environment(
    req: HttpRequest,
    path: web::Path<(String, u16)>,
    verifier: web::Data<Verifier>,
    pool: web::Data<DbPool>,
    broker: web::Data<dyn Broker>,
    config: web::Data<Config>,
) -> AppResult<HttpResponse> {
    verifier.verify_node(&req, None)?;
    let (ip, port) = path.into_inner();

    let broker = broker.into_inner();
    let _guard = endpoint_lock(&broker, &config, &ip, port).await?;

    match sessions::close_active(pool.connection(), &ip, port).await? {
        Some(session_id) => {
            active_nodes::remove(&broker, &ip, port);
            info!("environment at {ip}:{port} deregistered (session {session_id})");
            Ok(HttpResponse::NoContent().finish())
        }
        None => Err(not_registered(&ip, port)),
    }
}

/// GET /environments/{ip}/{port}/info: platform fingerprint.
async fn environment_info(
    path: web::Path<(String, u16)>,
    broker: web::Data<dyn Broker>,
) -> AppResult<HttpResponse> {
    let (ip, port) = path.into_inner();
    let broker = broker.into_inner();
    let entry =
        active_nodes::get(&broker, &ip, port).ok_or_else(|| not_registered(&ip, port))?;
    Ok(HttpResponse::Ok().json(entry.platform_info))
}

/// GET /environments/{ip}/{port}/installed: proxy the node's tree.
async fn list_installed(
    path: web::Path<(String, u16)>,
    broker: web::Data<dyn Broker>,
    client: web::Data<NodeClient>,
) -> AppResult<HttpResponse> {
    let (ip, port) = path.into_inner();
    let broker = broker.into_inner();
    check_registered(&broker, &ip, port)?;

    let response = client.list_installed(&ip, port).await?;
    if response.status().as_u16() != 200 {
        return Err(unexpected_response(&ip, port));
    }
    let body = response
        .bytes()
        .await
        .map_err(|_| unexpected_response(&ip, port))?;
    Ok(HttpResponse::Ok()
        .content_type("application/json")
        .body(body))
}

/// PATCH /environments/{ip}/{port}/installed: replicate repository
/// packages onto the node.
async fn install_packages(
    req: HttpRequest,
    body: web::Bytes,
    path: web::Path<(String, u16)>,
    verifier: web::Data<Verifier>,
    broker: web::Data<dyn Broker>,
    client: web::Data<NodeClient>,
    repository: web::Data<Repository>,
    config: web::Data<Config>,
) -> AppResult<HttpResponse> {
    verifier.verify_client(&req, Some(&body))?;
    let (ip, port) = path.into_inner();
    let broker = broker.into_inner();
    check_registered(&broker, &ip, port)?;
    check_is_json(&req)?;

    let packages: Vec<String> = serde_json::from_slice(&body).map_err(|_| {
        AppError::Validation("Request body must be a JSON array of package names".to_string())
    })?;

    // The bundle is packed under the repository mutex, then shipped under
    // the endpoint mutex; the repository is released in between.
    let bundle_bytes = {
        let _repo_guard = repository_lock(&broker, &config).await?;
        repository.pack(&packages).map_err(|e| match e {
            BundleError::Io(e) => AppError::Internal(e.to_string()),
            other => AppError::Validation(other.to_string()),
        })?
    };

    let _guard = endpoint_lock(&broker, &config, &ip, port).await?;
    let response = client.install(&ip, port, bundle_bytes).await?;
    match response.status().as_u16() {
        204 => {
            info!("replicated {} package(s) to {ip}:{port}", packages.len());
            Ok(HttpResponse::NoContent().finish())
        }
        // These mean the C2 itself produced a request the node refused.
        400 | 401 | 415 => Err(AppError::Internal(format!(
            "node at {ip}:{port} refused a C2-built replication request: {}",
            response.status()
        ))),
        _ => Err(unexpected_response(&ip, port)),
    }
}

/// DELETE /environments/{ip}/{port}/installed/{package}: remove one
/// package from the node.
async fn delete_installed(
    req: HttpRequest,
    path: web::Path<(String, u16, String)>,
    verifier: web::Data<Verifier>,
    broker: web::Data<dyn Broker>,
    client: web::Data<NodeClient>,
    config: web::Data<Config>,
) -> AppResult<HttpResponse> {
    verifier.verify_client(&req, None)?;
    let (ip, port, package) = path.into_inner();
    let broker = broker.into_inner();
    check_registered(&broker, &ip, port)?;

    let _guard = endpoint_lock(&broker, &config, &ip, port).await?;
    let response = client.remove_package(&ip, port, &package).await?;
    match response.status().as_u16() {
        204 => Ok(HttpResponse::NoContent().finish()),
        401 | 404 => Err(AppError::NotFound(format!(
            "'{package}' not found at {ip}:{port}"
        ))),
        _ => Err(unexpected_response(&ip, port)),
    }
}

/// GET /environments/{ip}/{port}/reports: trigger execution on the node
/// and persist the evidence.
async fn execute_tests(
    req: HttpRequest,
    path: web::Path<(String, u16)>,
    query: web::Query<HashMap<String, String>>,
    pool: web::Data<DbPool>,
    broker: web::Data<dyn Broker>,
    client: web::Data<NodeClient>,
) -> AppResult<HttpResponse> {
    let (ip, port) = path.into_inner();
    let broker = broker.into_inner();
    let entry =
        active_nodes::get(&broker, &ip, port).ok_or_else(|| not_registered(&ip, port))?;

    const SELECTORS: [&str; 4] = ["packages", "modules", "test_sets", "tests"];
    if query.keys().any(|key| !SELECTORS.contains(&key.as_str())) {
        return Err(AppError::Validation("Invalid query parameters".to_string()));
    }

    let response = client.run_tests(&ip, port, req.query_string()).await?;
    let test_reports: Vec<TestReport> = match response.status().as_u16() {
        200 => response
            .json()
            .await
            .map_err(|_| unexpected_response(&ip, port))?,
        400 => {
            return Err(AppError::Internal(format!(
                "node at {ip}:{port} refused a C2-forwarded selector"
            )))
        }
        404 => {
            return Err(AppError::NotFound(
                "A specified entity does not exist in the node.".to_string(),
            ))
        }
        _ => return Err(unexpected_response(&ip, port)),
    };

    // Evidence durability is best-effort: the operator gets the reports
    // even when persisting them fails.
    let conn = pool.connection();
    match executions::open(conn, entry.session_id).await {
        Ok(execution) => {
            if let Err(e) = reports::insert_many(conn, execution.id, &test_reports).await {
                error!("failed to persist reports for execution {}: {e}", execution.id);
            }
        }
        Err(e) => error!("failed to open execution for session {}: {e}", entry.session_id),
    }

    Ok(HttpResponse::Ok().json(test_reports))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/environments")
            .route(web::get().to(list_environments))
            .route(web::post().to(add_environment)),
    )
    .service(
        web::resource("/environments/{ip}/{port}")
            .route(web::delete().to(remove_environment)),
    )
    .service(
        web::resource("/environments/{ip}/{port}/info")
            .route(web::get().to(environment_info)),
    )
    .service(
        web::resource("/environments/{ip}/{port}/installed")
            .route(web::get().to(list_installed))
            .route(web::patch().to(install_packages)),
    )
    .service(
        web::resource("/environments/{ip}/{port}/installed/{package}")
            .route(web::delete().to(delete_installed)),
    )
    .service(
        web::resource("/environments/{ip}/{port}/reports")
            .route(web::get().to(execute_tests)),
    );
}

fn check_is_json(req: &HttpRequest) -> AppResult<()> {
    let is_json = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if !is_json {
        return Err(AppError::UnsupportedMedia(
            "Content Type is not application/json".to_string(),
        ));
    }
    Ok(())
}

fn check_registered(broker: &Arc<dyn Broker>, ip: &str, port: u16) -> AppResult<()> {
    active_nodes::get(broker, ip, port)
        .map(|_| ())
        .ok_or_else(|| not_registered(ip, port))
}

fn not_registered(ip: &str, port: u16) -> AppError {
    AppError::NotFound(format!("No environment registered at {ip}:{port}"))
}

fn unexpected_response(ip: &str, port: u16) -> AppError {
    AppError::Upstream(format!("Unexpected response from node at {ip}:{port}"))
}

async fn endpoint_lock(
    broker: &Arc<dyn Broker>,
    config: &Config,
    ip: &str,
    port: u16,
) -> AppResult<LockGuard> {
    named_lock(broker, config, &active_nodes::mutex_name(ip, port)).await
}

async fn repository_lock(broker: &Arc<dyn Broker>, config: &Config) -> AppResult<LockGuard> {
    named_lock(broker, config, Repository::MUTEX).await
}

async fn named_lock(
    broker: &Arc<dyn Broker>,
    config: &Config,
    name: &str,
) -> AppResult<LockGuard> {
    broker::lock(
        broker,
        name,
        Duration::from_secs(config.node.lock_ttl_secs),
        Duration::from_secs(config.node.lock_wait_secs),
    )
    .await
    .ok_or_else(|| AppError::Internal(format!("could not acquire mutex '{name}'")))
}
