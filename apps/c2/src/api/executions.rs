//! Execution history handlers.

use std::collections::HashMap;

use actix_web::{web, HttpRequest, HttpResponse};
use secchiware_protocol::TestReport;
use serde::Serialize;
use tracing::info;

use crate::auth::Verifier;
use crate::db::executions::{self, ExecutionFilters};
use crate::db::search::{self, SearchOptions};
use crate::db::{reports, DbPool};
use crate::error::{AppError, AppResult};

/// One row of `GET /executions`, with its evidence inlined.
#[derive(Debug, Serialize)]
pub struct ExecutionDetail {
    pub execution_id: i32,
    pub session_id: i32,
    pub timestamp_registered: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reports: Vec<TestReport>,
}

/// GET /executions: parametrized history search with nested reports.
async fn search_executions(
    query: web::Query<HashMap<String, String>>,
    pool: web::Data<DbPool>,
) -> AppResult<HttpResponse> {
    let mut params = query.into_inner();
    let (filters, options) = parse_parameters(&mut params)?;

    let conn = pool.connection();
    let found = executions::search(conn, &filters, &options).await?;

    let mut results = Vec::with_capacity(found.len());
    for execution in found {
        let rows = reports::find_by_execution(conn, execution.id).await?;
        let wire: Vec<TestReport> = rows
            .iter()
            .map(reports::to_wire)
            .collect::<AppResult<_>>()?;
        results.push(ExecutionDetail {
            execution_id: execution.id,
            session_id: execution.fk_session,
            timestamp_registered: execution.timestamp_registered,
            reports: wire,
        });
    }
    Ok(HttpResponse::Ok().json(results))
}

/// DELETE /executions/{id}: drop one execution and its reports.
async fn delete_execution(
    req: HttpRequest,
    path: web::Path<i32>,
    verifier: web::Data<Verifier>,
    pool: web::Data<DbPool>,
) -> AppResult<HttpResponse> {
    verifier.verify_client(&req, None)?;
    let id = path.into_inner();
    if !executions::delete(pool.connection(), id).await? {
        return Err(AppError::NotFound(
            "No execution found with given id".to_string(),
        ));
    }
    info!("execution {id} deleted");
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/executions").route(web::get().to(search_executions)))
        .service(web::resource("/executions/{id}").route(web::delete().to(delete_execution)));
}

fn parse_parameters(
    params: &mut HashMap<String, String>,
) -> AppResult<(ExecutionFilters, SearchOptions)> {
    let map_err = AppError::Validation;

    let filters = ExecutionFilters {
        ids: search::take_int_list(params, "ids").map_err(map_err)?,
        sessions: search::take_int_list(params, "sessions").map_err(map_err)?,
        registered_from: params.remove("registered_from"),
        registered_to: params.remove("registered_to"),
    };
    let options =
        search::parse_options(params, executions::ORDER_COLUMNS).map_err(map_err)?;
    search::ensure_consumed(params).map_err(map_err)?;
    Ok((filters, options))
}
