//! Migration: Create the session table.
//!
//! A partial unique index enforces "at most one active session per
//! (env_ip, env_port)"; registration closes any previous active session
//! before inserting, serialized by the broker mutex for that endpoint.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Session::Table)
                    .col(
                        ColumnDef::new(Session::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Session::SessionStart).string().not_null())
                    .col(ColumnDef::new(Session::SessionEnd).string())
                    .col(ColumnDef::new(Session::EnvIp).string().not_null())
                    .col(ColumnDef::new(Session::EnvPort).integer().not_null())
                    .col(ColumnDef::new(Session::EnvPlatform).string().not_null())
                    .col(ColumnDef::new(Session::EnvNode).string().not_null())
                    .col(ColumnDef::new(Session::EnvOsSystem).string().not_null())
                    .col(ColumnDef::new(Session::EnvOsRelease).string().not_null())
                    .col(ColumnDef::new(Session::EnvOsVersion).string().not_null())
                    .col(ColumnDef::new(Session::EnvHwMachine).string().not_null())
                    .col(ColumnDef::new(Session::EnvHwProcessor).string().not_null())
                    .col(ColumnDef::new(Session::EnvRtBuildNo).string().not_null())
                    .col(ColumnDef::new(Session::EnvRtBuildDate).string().not_null())
                    .col(ColumnDef::new(Session::EnvRtCompiler).string().not_null())
                    .col(
                        ColumnDef::new(Session::EnvRtImplementation)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Session::EnvRtVersion).string().not_null())
                    .to_owned(),
            )
            .await?;

        // Partial indexes are not expressible through the schema builder.
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX idx_session_active \
                 ON session (env_ip, env_port) WHERE session_end IS NULL",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Session::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Session {
    Table,
    Id,
    SessionStart,
    SessionEnd,
    EnvIp,
    EnvPort,
    EnvPlatform,
    EnvNode,
    EnvOsSystem,
    EnvOsRelease,
    EnvOsVersion,
    EnvHwMachine,
    EnvHwProcessor,
    EnvRtBuildNo,
    EnvRtBuildDate,
    EnvRtCompiler,
    EnvRtImplementation,
    EnvRtVersion,
}
