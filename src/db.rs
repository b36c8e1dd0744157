use anyhow::Result;
use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;

use crate::migration::Migrator;

/// Create a SeaORM connection. Works for both `postgres://` and `sqlite:` urls.
pub async fn create_orm_conn(database_url: &str) -> Result<DatabaseConnection> {
    let conn = Database::connect(database_url).await?;
    Ok(conn)
}

/// Apply every pending migration.
pub async fn run_migrations(conn: &DatabaseConnection) -> Result<()> {
    Migrator::up(conn, None).await?;
    Ok(())
}

/// Connect and migrate in one step; used by the server, the seeder and tests.
pub async fn connect_and_migrate(database_url: &str) -> Result<DatabaseConnection> {
    let conn = create_orm_conn(database_url).await?;
    run_migrations(&conn).await?;
    tracing::debug!("database schema is up to date");
    Ok(conn)
}
