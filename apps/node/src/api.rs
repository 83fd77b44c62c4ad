//! HTTP surface of the node.
//!
//! | Method/Path | Auth | Effect |
//! |---|---|---|
//! | `GET /test_sets` | none | installed tree |
//! | `PATCH /test_sets` | C2 | install a bundle |
//! | `DELETE /test_sets/{package}` | C2 | remove a root package |
//! | `GET /reports` | none | execute selected tests |
//! | `DELETE /` | C2 | graceful shutdown |

use std::collections::HashMap;
use std::fs;

use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::StreamExt;
use secchiware_protocol::bundle::{self, BundleError};
use secchiware_protocol::manifest::validate_identifier;
use secchiware_protocol::runner::Selection;
use tokio::sync::mpsc;
use tracing::info;

use crate::auth::RequestAuthenticator;
use crate::error::{AppError, AppResult};
use crate::registry::SharedRegistry;

/// Serializes test executions; tests may not be re-entrant.
pub struct ExecutionLock(pub tokio::sync::Mutex<()>);

impl ExecutionLock {
    pub fn new() -> Self {
        Self(tokio::sync::Mutex::new(()))
    }
}

/// Lets the shutdown endpoint stop the listener from inside a handler.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: mpsc::Sender<()>,
}

impl ShutdownHandle {
    pub fn new() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    pub fn trigger(&self) {
        let _ = self.tx.try_send(());
    }
}

/// GET /test_sets: the installed `PackageInfo` tree.
async fn list_test_sets(registry: web::Data<SharedRegistry>) -> AppResult<HttpResponse> {
    let snapshot = registry.snapshot();
    Ok(HttpResponse::Ok().json(snapshot.packages()))
}

/// PATCH /test_sets: verify and merge-install an uploaded bundle.
async fn install_test_sets(
    req: HttpRequest,
    body: web::Bytes,
    auth: web::Data<RequestAuthenticator>,
    registry: web::Data<SharedRegistry>,
) -> AppResult<HttpResponse> {
    if !is_multipart(&req) {
        return Err(AppError::UnsupportedMedia(
            "Invalid request's content type".to_string(),
        ));
    }
    auth.verify(&req, Some(&body))?;

    let bundle = read_packages_part(&req, body).await?;

    let registry = registry.into_inner();
    let installed = web::block(move || {
        let _guard = registry.write_guard();
        let installed = bundle::unpack(&bundle, registry.root())?;
        registry
            .reload()
            .map_err(|e| BundleError::Io(std::io::Error::other(e.to_string())))?;
        Ok::<_, BundleError>(installed)
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?
    .map_err(map_bundle_error)?;

    info!("installed packages: {}", installed.join(", "));
    Ok(HttpResponse::NoContent().finish())
}

/// DELETE /test_sets/{package}: remove a root package and its tests.
async fn delete_package(
    req: HttpRequest,
    path: web::Path<String>,
    auth: web::Data<RequestAuthenticator>,
    registry: web::Data<SharedRegistry>,
) -> AppResult<HttpResponse> {
    auth.verify(&req, None)?;

    let package = path.into_inner();
    if validate_identifier(&package).is_err() {
        return Err(AppError::NotFound("Package not found".to_string()));
    }

    let registry = registry.into_inner();
    web::block(move || {
        let _guard = registry.write_guard();
        let dir = registry.root().join(&package);
        if !dir.is_dir() {
            return Err(AppError::NotFound("Package not found".to_string()));
        }
        fs::remove_dir_all(&dir).map_err(|e| AppError::Internal(e.to_string()))?;
        registry
            .reload()
            .map_err(|e| AppError::Internal(e.to_string()))?;
        info!("removed package {package}");
        Ok(())
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::NoContent().finish())
}

/// GET /reports: execute the selected tests and return their reports.
async fn execute_tests(
    query: web::Query<HashMap<String, String>>,
    registry: web::Data<SharedRegistry>,
    lock: web::Data<ExecutionLock>,
) -> AppResult<HttpResponse> {
    let selection = parse_selection(query.into_inner())?;
    let snapshot = registry.snapshot();
    let plan = snapshot
        .plan(&selection)
        .map_err(|e| AppError::NotFound(e.to_string()))?;

    // One execution at a time per node.
    let _guard = lock.0.lock().await;
    let reports = web::block(move || snapshot.run(&plan))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(HttpResponse::Ok().json(reports))
}

/// DELETE /: acknowledge, then stop the listener and exit.
async fn shutdown(
    req: HttpRequest,
    auth: web::Data<RequestAuthenticator>,
    handle: web::Data<ShutdownHandle>,
) -> AppResult<HttpResponse> {
    auth.verify(&req, None)?;
    info!("shutdown requested by the C2");
    handle.trigger();
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/test_sets")
            .route(web::get().to(list_test_sets))
            .route(web::patch().to(install_test_sets)),
    )
    .service(web::resource("/test_sets/{package}").route(web::delete().to(delete_package)))
    .service(web::resource("/reports").route(web::get().to(execute_tests)))
    .service(web::resource("/").route(web::delete().to(shutdown)));
}

fn is_multipart(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"))
}

/// Extracts the bytes of the multipart part named `packages` from the raw
/// body. The body was already digest-checked as received, so the multipart
/// stream is rebuilt from the same bytes.
async fn read_packages_part(req: &HttpRequest, body: web::Bytes) -> Result<Vec<u8>, AppError> {
    let stream = futures_util::stream::once(futures_util::future::ok::<
        _,
        actix_web::error::PayloadError,
    >(body));
    let mut multipart = Multipart::new(req.headers(), stream);

    while let Some(item) = multipart.next().await {
        let mut field =
            item.map_err(|e| AppError::Validation(format!("multipart error: {e}")))?;
        let is_packages = field
            .content_disposition()
            .and_then(|cd| cd.get_name())
            .is_some_and(|name| name == "packages");

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk =
                chunk.map_err(|e| AppError::Validation(format!("multipart error: {e}")))?;
            data.extend_from_slice(&chunk);
        }
        if is_packages {
            return Ok(data);
        }
    }

    Err(AppError::Validation(
        "'packages' key not found in request's body".to_string(),
    ))
}

fn parse_selection(mut params: HashMap<String, String>) -> Result<Selection, AppError> {
    let selection = Selection {
        packages: split_list(params.remove("packages")),
        modules: split_list(params.remove("modules")),
        test_sets: split_list(params.remove("test_sets")),
        tests: split_list(params.remove("tests")),
    };
    if !params.is_empty() {
        return Err(AppError::Validation("Invalid query parameters".to_string()));
    }
    Ok(selection)
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| v.split(',').map(|s| s.to_string()).collect())
        .unwrap_or_default()
}

fn map_bundle_error(e: BundleError) -> AppError {
    match e {
        BundleError::Io(e) => AppError::Internal(e.to_string()),
        other => AppError::Validation(format!("Invalid request's content: {other}")),
    }
}
