//! Report queries.

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use secchiware_protocol::TestReport;

use crate::entity::report::{self, Column, Entity as Report};
use crate::error::{AppError, AppResult};

/// Persists the reports of one execution.
pub async fn insert_many(
    conn: &DatabaseConnection,
    execution_id: i32,
    reports: &[TestReport],
) -> AppResult<()> {
    if reports.is_empty() {
        return Ok(());
    }
    let rows: Vec<report::ActiveModel> = reports
        .iter()
        .map(|r| {
            let additional_info = r
                .additional_info
                .as_ref()
                .map(|info| serde_json::to_string(info).unwrap_or_default());
            report::ActiveModel {
                fk_execution: Set(execution_id),
                test_name: Set(r.test_name.clone()),
                test_description: Set(r.test_description.clone()),
                result_code: Set(r.result_code),
                timestamp_start: Set(r.timestamp_start.clone()),
                timestamp_end: Set(r.timestamp_end.clone()),
                additional_info: Set(additional_info),
                ..Default::default()
            }
        })
        .collect();
    Report::insert_many(rows).exec(conn).await?;
    Ok(())
}

/// The reports of one execution, in `timestamp_start` order.
pub async fn find_by_execution(
    conn: &DatabaseConnection,
    execution_id: i32,
) -> AppResult<Vec<report::Model>> {
    Ok(Report::find()
        .filter(Column::FkExecution.eq(execution_id))
        .order_by_asc(Column::TimestampStart)
        .all(conn)
        .await?)
}

/// Rebuilds the wire report from a persisted row.
pub fn to_wire(row: &report::Model) -> AppResult<TestReport> {
    let additional_info = row
        .additional_info
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| AppError::Internal(format!("corrupt additional_info: {e}")))?;
    Ok(TestReport {
        test_name: row.test_name.clone(),
        test_description: row.test_description.clone(),
        result_code: row.result_code,
        timestamp_start: row.timestamp_start.clone(),
        timestamp_end: row.timestamp_end.clone(),
        additional_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sessions::{self, tests::sample_platform};
    use crate::db::{executions, test_pool};
    use serde_json::json;

    #[tokio::test]
    async fn reports_round_trip_with_additional_info() {
        let pool = test_pool().await;
        let conn = pool.connection();

        let session = sessions::open(conn, "10.0.0.2", 4900, &sample_platform())
            .await
            .unwrap();
        let execution = executions::open(conn, session.id).await.unwrap();

        let mut info = serde_json::Map::new();
        info.insert("error".to_string(), json!("setup failed"));
        let reports = vec![
            TestReport {
                test_name: "p1.m.S.b".to_string(),
                test_description: "later".to_string(),
                result_code: -1,
                timestamp_start: "2026-03-01T00:00:02.000000Z".to_string(),
                timestamp_end: "2026-03-01T00:00:03.000000Z".to_string(),
                additional_info: Some(info),
            },
            TestReport {
                test_name: "p1.m.S.a".to_string(),
                test_description: "earlier".to_string(),
                result_code: 1,
                timestamp_start: "2026-03-01T00:00:00.000000Z".to_string(),
                timestamp_end: "2026-03-01T00:00:01.000000Z".to_string(),
                additional_info: None,
            },
        ];
        insert_many(conn, execution.id, &reports).await.unwrap();

        let rows = find_by_execution(conn, execution.id).await.unwrap();
        let restored: Vec<TestReport> =
            rows.iter().map(|r| to_wire(r).unwrap()).collect();
        // Ordered by timestamp_start, not insertion order.
        assert_eq!(restored[0], reports[1]);
        assert_eq!(restored[1], reports[0]);
    }
}
