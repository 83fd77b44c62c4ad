//! Migration: Create the report table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Report::Table)
                    .col(
                        ColumnDef::new(Report::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Report::FkExecution).integer().not_null())
                    .col(ColumnDef::new(Report::TestName).string().not_null())
                    .col(ColumnDef::new(Report::TestDescription).string().not_null())
                    .col(ColumnDef::new(Report::ResultCode).integer().not_null())
                    .col(ColumnDef::new(Report::TimestampStart).string().not_null())
                    .col(ColumnDef::new(Report::TimestampEnd).string().not_null())
                    .col(ColumnDef::new(Report::AdditionalInfo).text())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_report_execution")
                            .from(Report::Table, Report::FkExecution)
                            .to(Execution::Table, Execution::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_report_execution")
                    .table(Report::Table)
                    .col(Report::FkExecution)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Report::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Report {
    Table,
    Id,
    FkExecution,
    TestName,
    TestDescription,
    ResultCode,
    TimestampStart,
    TimestampEnd,
    AdditionalInfo,
}

#[derive(DeriveIden)]
enum Execution {
    Table,
    Id,
}
