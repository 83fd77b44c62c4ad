//! Session queries.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use secchiware_protocol::PlatformInfo;

use super::search::SearchOptions;
use super::timestamp_now;
use crate::entity::session::{self, Column, Entity as Session};
use crate::error::{AppError, AppResult};

/// Filters accepted by `GET /sessions`.
#[derive(Debug, Clone, Default)]
pub struct SessionFilters {
    pub ids: Vec<i32>,
    pub start_from: Option<String>,
    pub start_to: Option<String>,
    pub end_from: Option<String>,
    pub end_to: Option<String>,
    pub ips: Vec<String>,
    pub ports: Vec<i32>,
    pub systems: Vec<String>,
}

/// API names accepted in `order_by`.
pub const ORDER_COLUMNS: &[&str] = &["id", "start", "end", "ip", "port", "system"];

fn order_column(name: &str) -> Column {
    match name {
        "start" => Column::SessionStart,
        "end" => Column::SessionEnd,
        "ip" => Column::EnvIp,
        "port" => Column::EnvPort,
        "system" => Column::EnvOsSystem,
        _ => Column::Id,
    }
}

/// Opens a new session for a registering node.
pub async fn open(
    conn: &DatabaseConnection,
    ip: &str,
    port: u16,
    platform: &PlatformInfo,
) -> AppResult<session::Model> {
    let model = session::ActiveModel {
        session_start: Set(timestamp_now()),
        session_end: Set(None),
        env_ip: Set(ip.to_string()),
        env_port: Set(i32::from(port)),
        env_platform: Set(platform.platform.clone()),
        env_node: Set(platform.node.clone()),
        env_os_system: Set(platform.os.system.clone()),
        env_os_release: Set(platform.os.release.clone()),
        env_os_version: Set(platform.os.version.clone()),
        env_hw_machine: Set(platform.hardware.machine.clone()),
        env_hw_processor: Set(platform.hardware.processor.clone()),
        env_rt_build_no: Set(platform.runtime.build.0.clone()),
        env_rt_build_date: Set(platform.runtime.build.1.clone()),
        env_rt_compiler: Set(platform.runtime.compiler.clone()),
        env_rt_implementation: Set(platform.runtime.implementation.clone()),
        env_rt_version: Set(platform.runtime.version.clone()),
        ..Default::default()
    };
    Ok(model.insert(conn).await?)
}

/// The active session for an endpoint, if any.
pub async fn find_active(
    conn: &DatabaseConnection,
    ip: &str,
    port: u16,
) -> AppResult<Option<session::Model>> {
    Ok(Session::find()
        .filter(Column::EnvIp.eq(ip))
        .filter(Column::EnvPort.eq(i32::from(port)))
        .filter(Column::SessionEnd.is_null())
        .one(conn)
        .await?)
}

/// Closes the active session for an endpoint. Returns its id, or `None`
/// when there was no active session.
pub async fn close_active(
    conn: &DatabaseConnection,
    ip: &str,
    port: u16,
) -> AppResult<Option<i32>> {
    let Some(active) = find_active(conn, ip, port).await? else {
        return Ok(None);
    };
    let id = active.id;
    let mut model: session::ActiveModel = active.into();
    model.session_end = Set(Some(timestamp_now()));
    model.update(conn).await?;
    Ok(Some(id))
}

/// Closes every active session. Used by the shutdown task.
pub async fn close_all_active(conn: &DatabaseConnection) -> AppResult<u64> {
    let result = Session::update_many()
        .col_expr(
            Column::SessionEnd,
            sea_orm::sea_query::Expr::value(timestamp_now()),
        )
        .filter(Column::SessionEnd.is_null())
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Every currently active session.
pub async fn all_active(conn: &DatabaseConnection) -> AppResult<Vec<session::Model>> {
    Ok(Session::find()
        .filter(Column::SessionEnd.is_null())
        .order_by_asc(Column::EnvIp)
        .order_by_asc(Column::EnvPort)
        .all(conn)
        .await?)
}

pub async fn find_by_id(
    conn: &DatabaseConnection,
    id: i32,
) -> AppResult<Option<session::Model>> {
    Ok(Session::find_by_id(id).one(conn).await?)
}

/// Deletes a finished session; executions and reports cascade.
///
/// Fails with 400 while the session is still active.
pub async fn delete(conn: &DatabaseConnection, id: i32) -> AppResult<()> {
    let session = find_by_id(conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound("No session found with given id".to_string()))?;
    if session.session_end.is_none() {
        return Err(AppError::Validation("Session is still active".to_string()));
    }
    Session::delete_by_id(id).exec(conn).await?;
    Ok(())
}

/// Parametrized search over sessions.
pub async fn search(
    conn: &DatabaseConnection,
    filters: &SessionFilters,
    options: &SearchOptions,
) -> AppResult<Vec<session::Model>> {
    let mut query = Session::find();

    if !filters.ids.is_empty() {
        query = query.filter(Column::Id.is_in(filters.ids.clone()));
    }
    if let Some(from) = &filters.start_from {
        query = query.filter(Column::SessionStart.gte(from.clone()));
    }
    if let Some(to) = &filters.start_to {
        query = query.filter(Column::SessionStart.lte(to.clone()));
    }
    if let Some(from) = &filters.end_from {
        query = query.filter(Column::SessionEnd.gte(from.clone()));
    }
    if let Some(to) = &filters.end_to {
        query = query.filter(Column::SessionEnd.lte(to.clone()));
    }
    if !filters.ips.is_empty() {
        query = query.filter(Column::EnvIp.is_in(filters.ips.clone()));
    }
    if !filters.ports.is_empty() {
        query = query.filter(Column::EnvPort.is_in(filters.ports.clone()));
    }
    if !filters.systems.is_empty() {
        query = query.filter(Column::EnvOsSystem.is_in(filters.systems.clone()));
    }

    if let Some(name) = &options.order_by {
        query = query.order_by(order_column(name), options.arrange.clone());
    } else {
        query = query.order_by(Column::Id, options.arrange.clone());
    }
    if let Some(limit) = options.limit {
        query = query.limit(limit);
    }
    if let Some(offset) = options.offset {
        query = query.offset(offset);
    }

    Ok(query.all(conn).await?)
}

/// Rebuilds the wire platform fingerprint from the denormalized columns.
pub fn platform_info(session: &session::Model) -> PlatformInfo {
    use secchiware_protocol::platform::{HardwareInfo, OsInfo, RuntimeInfo};

    PlatformInfo {
        platform: session.env_platform.clone(),
        node: session.env_node.clone(),
        os: OsInfo {
            system: session.env_os_system.clone(),
            release: session.env_os_release.clone(),
            version: session.env_os_version.clone(),
        },
        hardware: HardwareInfo {
            machine: session.env_hw_machine.clone(),
            processor: session.env_hw_processor.clone(),
        },
        runtime: RuntimeInfo {
            build: (
                session.env_rt_build_no.clone(),
                session.env_rt_build_date.clone(),
            ),
            compiler: session.env_rt_compiler.clone(),
            implementation: session.env_rt_implementation.clone(),
            version: session.env_rt_version.clone(),
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::test_pool;
    use sea_orm::Order;
    use secchiware_protocol::platform::{HardwareInfo, OsInfo, RuntimeInfo};

    pub(crate) fn sample_platform() -> PlatformInfo {
        PlatformInfo {
            platform: "Linux-6.1.0-x86_64".to_string(),
            node: "sandbox-1".to_string(),
            os: OsInfo {
                system: "Linux".to_string(),
                release: "6.1.0".to_string(),
                version: "#1 SMP".to_string(),
            },
            hardware: HardwareInfo {
                machine: "x86_64".to_string(),
                processor: "GenuineIntel".to_string(),
            },
            runtime: RuntimeInfo {
                build: ("9fc6b4312".to_string(), "2025-01-07".to_string()),
                compiler: "rustc 1.84.0 (9fc6b4312 2025-01-07)".to_string(),
                implementation: "rustc".to_string(),
                version: "1.84.0".to_string(),
            },
        }
    }

    fn default_options() -> SearchOptions {
        SearchOptions {
            order_by: None,
            arrange: Order::Asc,
            limit: None,
            offset: None,
        }
    }

    #[tokio::test]
    async fn open_and_close_round_trip() {
        let pool = test_pool().await;
        let conn = pool.connection();
        let platform = sample_platform();

        let session = open(conn, "10.0.0.2", 4900, &platform).await.unwrap();
        assert!(session.session_end.is_none());
        assert!(find_active(conn, "10.0.0.2", 4900).await.unwrap().is_some());

        let closed = close_active(conn, "10.0.0.2", 4900).await.unwrap();
        assert_eq!(closed, Some(session.id));
        assert!(find_active(conn, "10.0.0.2", 4900).await.unwrap().is_none());

        // Closing again finds nothing: the second DELETE is a 404 upstream.
        assert_eq!(close_active(conn, "10.0.0.2", 4900).await.unwrap(), None);
    }

    #[tokio::test]
    async fn at_most_one_active_session_per_endpoint() {
        let pool = test_pool().await;
        let conn = pool.connection();
        let platform = sample_platform();

        open(conn, "10.0.0.2", 4900, &platform).await.unwrap();
        // The partial unique index refuses a second active session.
        assert!(open(conn, "10.0.0.2", 4900, &platform).await.is_err());

        close_active(conn, "10.0.0.2", 4900).await.unwrap();
        // A closed session no longer blocks registration.
        open(conn, "10.0.0.2", 4900, &platform).await.unwrap();
    }

    #[tokio::test]
    async fn active_sessions_cannot_be_deleted() {
        let pool = test_pool().await;
        let conn = pool.connection();
        let session = open(conn, "10.0.0.2", 4900, &sample_platform())
            .await
            .unwrap();

        assert!(matches!(
            delete(conn, session.id).await,
            Err(AppError::Validation(_))
        ));

        close_active(conn, "10.0.0.2", 4900).await.unwrap();
        delete(conn, session.id).await.unwrap();
        assert!(matches!(
            delete(conn, session.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn search_filters_and_orders() {
        let pool = test_pool().await;
        let conn = pool.connection();
        let platform = sample_platform();

        open(conn, "10.0.0.1", 4900, &platform).await.unwrap();
        open(conn, "10.0.0.2", 4900, &platform).await.unwrap();
        open(conn, "10.0.0.3", 4901, &platform).await.unwrap();

        let filters = SessionFilters {
            ports: vec![4900],
            ..SessionFilters::default()
        };
        let options = SearchOptions {
            order_by: Some("ip".to_string()),
            arrange: Order::Desc,
            ..default_options()
        };
        let found = search(conn, &filters, &options).await.unwrap();
        let ips: Vec<&str> = found.iter().map(|s| s.env_ip.as_str()).collect();
        assert_eq!(ips, vec!["10.0.0.2", "10.0.0.1"]);

        let options = SearchOptions {
            limit: Some(1),
            offset: Some(1),
            ..default_options()
        };
        let found = search(conn, &SessionFilters::default(), &options)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].env_ip, "10.0.0.2");
    }

    #[tokio::test]
    async fn platform_info_round_trips_through_columns() {
        let pool = test_pool().await;
        let conn = pool.connection();
        let platform = sample_platform();
        let session = open(conn, "10.0.0.2", 4900, &platform).await.unwrap();
        assert_eq!(platform_info(&session), platform);
    }
}
