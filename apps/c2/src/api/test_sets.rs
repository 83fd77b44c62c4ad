//! Master repository handlers.
//!
//! The repository holds the packages the C2 can replicate to nodes.
//! Mutations run under the repository broker mutex; listings read the
//! directory directly.

use std::time::Duration;

use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::StreamExt;
use secchiware_protocol::bundle::BundleError;
use tracing::info;

use crate::auth::Verifier;
use crate::broker::{self, Broker, LockGuard};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::services::Repository;

/// GET /test_sets: the repository's package trees.
async fn list_test_sets(repository: web::Data<Repository>) -> AppResult<HttpResponse> {
    let repository = repository.into_inner();
    let packages = web::block(move || repository.list())
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(|e| AppError::Internal(format!("repository scan failed: {e}")))?;
    Ok(HttpResponse::Ok().json(packages))
}

/// PATCH /test_sets: upload a bundle into the repository.
async fn upload_test_sets(
    req: HttpRequest,
    body: web::Bytes,
    verifier: web::Data<Verifier>,
    broker: web::Data<dyn Broker>,
    repository: web::Data<Repository>,
    config: web::Data<Config>,
) -> AppResult<HttpResponse> {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));
    if !is_multipart {
        return Err(AppError::UnsupportedMedia(
            "Invalid request's content type".to_string(),
        ));
    }
    verifier.verify_client(&req, Some(&body))?;

    let bundle_bytes = read_packages_part(&req, body).await?;

    let broker = broker.into_inner();
    let _guard = repository_lock(&broker, &config).await?;
    let repository = repository.into_inner();
    let installed = web::block(move || repository.install(&bundle_bytes))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(|e| match e {
            BundleError::Io(e) => AppError::Internal(e.to_string()),
            other => AppError::Validation(format!("Invalid file content: {other}")),
        })?;

    info!("repository received packages: {}", installed.join(", "));
    Ok(HttpResponse::NoContent().finish())
}

/// DELETE /test_sets/{package}: drop a package from the repository.
async fn delete_test_set(
    req: HttpRequest,
    path: web::Path<String>,
    verifier: web::Data<Verifier>,
    broker: web::Data<dyn Broker>,
    repository: web::Data<Repository>,
    config: web::Data<Config>,
) -> AppResult<HttpResponse> {
    verifier.verify_client(&req, None)?;
    let package = path.into_inner();

    let broker = broker.into_inner();
    let _guard = repository_lock(&broker, &config).await?;
    let repository = repository.into_inner();
    let removed = {
        let package = package.clone();
        web::block(move || repository.delete(&package))
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?
            .map_err(|e| AppError::Internal(e.to_string()))?
    };
    if !removed {
        return Err(AppError::NotFound(format!(
            "Package '{package}' not found"
        )));
    }

    info!("repository package {package} deleted");
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/test_sets")
            .route(web::get().to(list_test_sets))
            .route(web::patch().to(upload_test_sets)),
    )
    .service(web::resource("/test_sets/{package}").route(web::delete().to(delete_test_set)));
}

/// Extracts the bytes of the multipart part named `packages` from the raw
/// body, which was already digest-checked as received.
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

async fn repository_lock(
    broker: &std::sync::Arc<dyn Broker>,
    config: &Config,
) -> AppResult<LockGuard> {
    broker::lock(
        broker,
        Repository::MUTEX,
        Duration::from_secs(config.node.lock_ttl_secs),
        Duration::from_secs(config.node.lock_wait_secs),
    )
    .await
    .ok_or_else(|| AppError::Internal("could not acquire the repository mutex".to_string()))
}
