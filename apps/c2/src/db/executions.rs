//! Execution queries.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};

use super::search::SearchOptions;
use super::timestamp_now;
use crate::entity::execution::{self, Column, Entity as Execution};
use crate::error::AppResult;

/// Filters accepted by `GET /executions`.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilters {
    pub ids: Vec<i32>,
    pub sessions: Vec<i32>,
    pub registered_from: Option<String>,
    pub registered_to: Option<String>,
}

/// API names accepted in `order_by`.
pub const ORDER_COLUMNS: &[&str] = &["id", "session", "registered"];

fn order_column(name: &str) -> Column {
    match name {
        "session" => Column::FkSession,
        "registered" => Column::TimestampRegistered,
        _ => Column::Id,
    }
}

/// Opens an execution row for a freshly triggered run.
pub async fn open(conn: &DatabaseConnection, session_id: i32) -> AppResult<execution::Model> {
    let model = execution::ActiveModel {
        fk_session: Set(session_id),
        timestamp_registered: Set(timestamp_now()),
        ..Default::default()
    };
    Ok(model.insert(conn).await?)
}

/// Deletes an execution; its reports cascade. Returns whether it existed.
pub async fn delete(conn: &DatabaseConnection, id: i32) -> AppResult<bool> {
    let result = Execution::delete_by_id(id).exec(conn).await?;
    Ok(result.rows_affected == 1)
}

/// Parametrized search over executions.
pub async fn search(
    conn: &DatabaseConnection,
    filters: &ExecutionFilters,
    options: &SearchOptions,
) -> AppResult<Vec<execution::Model>> {
    let mut query = Execution::find();

    if !filters.ids.is_empty() {
        query = query.filter(Column::Id.is_in(filters.ids.clone()));
    }
    if !filters.sessions.is_empty() {
        query = query.filter(Column::FkSession.is_in(filters.sessions.clone()));
    }
    if let Some(from) = &filters.registered_from {
        query = query.filter(Column::TimestampRegistered.gte(from.clone()));
    }
    if let Some(to) = &filters.registered_to {
        query = query.filter(Column::TimestampRegistered.lte(to.clone()));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sessions::{self, tests::sample_platform};
    use crate::db::{reports, test_pool};
    use sea_orm::Order;
    use secchiware_protocol::report::TestReport;

    fn default_options() -> SearchOptions {
        SearchOptions {
            order_by: None,
            arrange: Order::Asc,
            limit: None,
            offset: None,
        }
    }

    fn sample_report(name: &str) -> TestReport {
        TestReport {
            test_name: name.to_string(),
            test_description: "sample".to_string(),
            result_code: 1,
            timestamp_start: "2026-03-01T00:00:00.000000Z".to_string(),
            timestamp_end: "2026-03-01T00:00:01.000000Z".to_string(),
            additional_info: None,
        }
    }

    #[tokio::test]
    async fn session_deletion_cascades_to_executions_and_reports() {
        let pool = test_pool().await;
        let conn = pool.connection();

        let session = sessions::open(conn, "10.0.0.2", 4900, &sample_platform())
            .await
            .unwrap();
        let execution = open(conn, session.id).await.unwrap();
        reports::insert_many(conn, execution.id, &[sample_report("p1.m.S.a")])
            .await
            .unwrap();

        sessions::close_active(conn, "10.0.0.2", 4900).await.unwrap();
        sessions::delete(conn, session.id).await.unwrap();

        let leftover = search(conn, &ExecutionFilters::default(), &default_options())
            .await
            .unwrap();
        assert!(leftover.is_empty());
        assert!(reports::find_by_execution(conn, execution.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn execution_deletion_cascades_to_reports() {
        let pool = test_pool().await;
        let conn = pool.connection();

        let session = sessions::open(conn, "10.0.0.2", 4900, &sample_platform())
            .await
            .unwrap();
        let execution = open(conn, session.id).await.unwrap();
        reports::insert_many(
            conn,
            execution.id,
            &[sample_report("p1.m.S.a"), sample_report("p1.m.S.b")],
        )
        .await
        .unwrap();

        assert!(delete(conn, execution.id).await.unwrap());
        assert!(!delete(conn, execution.id).await.unwrap());
        assert!(reports::find_by_execution(conn, execution.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn search_filters_by_session() {
        let pool = test_pool().await;
        let conn = pool.connection();

        let first = sessions::open(conn, "10.0.0.1", 4900, &sample_platform())
            .await
            .unwrap();
        let second = sessions::open(conn, "10.0.0.2", 4900, &sample_platform())
            .await
            .unwrap();
        open(conn, first.id).await.unwrap();
        open(conn, second.id).await.unwrap();
        open(conn, second.id).await.unwrap();

        let filters = ExecutionFilters {
            sessions: vec![second.id],
            ..ExecutionFilters::default()
        };
        let found = search(conn, &filters, &default_options()).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|e| e.fk_session == second.id));
    }
}
