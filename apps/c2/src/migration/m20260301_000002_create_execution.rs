//! Migration: Create the execution table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Execution::Table)
                    .col(
                        ColumnDef::new(Execution::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Execution::FkSession).integer().not_null())
                    .col(
                        ColumnDef::new(Execution::TimestampRegistered)
                            .string()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_execution_session")
                            .from(Execution::Table, Execution::FkSession)
                            .to(Session::Table, Session::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_execution_session")
                    .table(Execution::Table)
                    .col(Execution::FkSession)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Execution::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Execution {
    Table,
    Id,
    FkSession,
    TimestampRegistered,
}

#[derive(DeriveIden)]
enum Session {
    Table,
    Id,
}
