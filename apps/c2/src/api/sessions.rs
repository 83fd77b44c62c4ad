//! Session history handlers.

use std::collections::HashMap;

use actix_web::{web, HttpRequest, HttpResponse};
use secchiware_protocol::PlatformInfo;
use serde::Serialize;
use tracing::info;

use crate::auth::Verifier;
use crate::db::search::{self, SearchOptions};
use crate::db::sessions::{self, SessionFilters};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};

/// One row of `GET /sessions`.
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub session_id: i32,
    pub session_start: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_end: Option<String>,
    pub ip: String,
    pub port: i32,
    pub platform_os_system: String,
}

/// Response of `GET /sessions/{id}`.
#[derive(Debug, Serialize)]
pub struct SessionDetail {
    pub session_id: i32,
    pub session_start: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_end: Option<String>,
    pub ip: String,
    pub port: i32,
    pub platform_info: PlatformInfo,
}

/// GET /sessions: parametrized history search.
async fn search_sessions(
    query: web::Query<HashMap<String, String>>,
    pool: web::Data<DbPool>,
) -> AppResult<HttpResponse> {
    let mut params = query.into_inner();
    let (filters, options) = parse_parameters(&mut params)?;

    let found = sessions::search(pool.connection(), &filters, &options).await?;
    let summaries: Vec<SessionSummary> = found
        .into_iter()
        .map(|s| SessionSummary {
            session_id: s.id,
            session_start: s.session_start,
            session_end: s.session_end,
            ip: s.env_ip,
            port: s.env_port,
            platform_os_system: s.env_os_system,
        })
        .collect();
    Ok(HttpResponse::Ok().json(summaries))
}

/// GET /sessions/{id}: one session with its platform fingerprint.
async fn get_session(path: web::Path<i32>, pool: web::Data<DbPool>) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let session = sessions::find_by_id(pool.connection(), id)
        .await?
        .ok_or_else(|| AppError::NotFound("No session found with given id".to_string()))?;

    let detail = SessionDetail {
        session_id: session.id,
        platform_info: sessions::platform_info(&session),
        session_start: session.session_start,
        session_end: session.session_end,
        ip: session.env_ip,
        port: session.env_port,
    };
    Ok(HttpResponse::Ok().json(detail))
}

/// DELETE /sessions/{id}: drop a finished session and its evidence.
async fn delete_session(
    req: HttpRequest,
    path: web::Path<i32>,
    verifier: web::Data<Verifier>,
    pool: web::Data<DbPool>,
) -> AppResult<HttpResponse> {
    verifier.verify_client(&req, None)?;
    let id = path.into_inner();
    sessions::delete(pool.connection(), id).await?;
    info!("session {id} deleted");
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/sessions").route(web::get().to(search_sessions)))
        .service(
            web::resource("/sessions/{id}")
                .route(web::get().to(get_session))
                .route(web::delete().to(delete_session)),
        );
}

fn parse_parameters(
    params: &mut HashMap<String, String>,
) -> AppResult<(SessionFilters, SearchOptions)> {
    let map_err = AppError::Validation;

    let filters = SessionFilters {
        ids: search::take_int_list(params, "ids").map_err(map_err)?,
        start_from: params.remove("start_from"),
        start_to: params.remove("start_to"),
        end_from: params.remove("end_from"),
        end_to: params.remove("end_to"),
        ips: search::take_list(params, "ips"),
        ports: search::take_int_list(params, "ports").map_err(map_err)?,
        systems: search::take_list(params, "systems"),
    };
    let options =
        search::parse_options(params, sessions::ORDER_COLUMNS).map_err(map_err)?;
    search::ensure_consumed(params).map_err(map_err)?;
    Ok((filters, options))
}
