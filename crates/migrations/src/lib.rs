mod codeintel;
mod frontend;

pub use codeintel::CODEINTEL_MIGRATIONS;
pub use frontend::FRONTEND_MIGRATIONS;

use indoc::indoc;
use sqlx::{query, query_as, FromRow, PgPool, Postgres, Row, Transaction};
use thiserror::Error;
use tracing::{info, warn};

const MINIMUM_SERVER_VERSION: u32 = 120000;

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Error occurred while parsing postgres version: {0}")]
    ParseVersionError(#[from] std::num::ParseIntError),
    #[error("codeintel_worker requires PostgreSQL v12.0 or greater (detected `server_version_num` = {0})")]
    IncompatibleVersion(u32),
    #[error("Database is at migration {latest_migration} which includes breaking migration {latest_breaking_migration}, but this worker only knows migrations up to {highest_migration}")]
    IncompatibleRevision {
        latest_migration: i32,
        latest_breaking_migration: i32,
        highest_migration: i32,
    },
    #[error("Error occurred while migrating: {0}")]
    SqlError(#[from] sqlx::Error),
}

/// A single forward-only schema change.
pub struct Migration {
    pub(crate) id: i32,
    pub(crate) name: &'static str,
    pub(crate) is_breaking: bool,
    pub(crate) stmts: &'static [&'static str],
}

impl Migration {
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_breaking(&self) -> bool {
        self.is_breaking
    }

    async fn execute(&self, tx: &mut Transaction<'_, Postgres>) -> Result<(), sqlx::Error> {
        for stmt in self.stmts {
            query(stmt).execute(tx.as_mut()).await?;
        }
        Ok(())
    }
}

#[derive(FromRow, Default)]
struct MigrationStatus {
    server_version_num: String,
    id: Option<i32>,
    biggest_breaking_id: Option<i32>,
}

/// Checks that the connected server is recent enough.
pub fn check_postgres_version(version_string: &str) -> Result<u32, MigrateError> {
    let version = version_string.parse::<u32>()?;

    if version < MINIMUM_SERVER_VERSION {
        return Err(MigrateError::IncompatibleVersion(version));
    }

    Ok(version)
}

async fn migration_status(pool: &PgPool) -> Result<MigrationStatus, MigrateError> {
    query(indoc! {r#"
        create table if not exists codeintel_worker_migrations (
            id int primary key,
            name text not null,
            ts timestamptz default now() not null,
            breaking boolean not null default false
        );
    "#})
    .execute(pool)
    .await?;

    let status = query_as::<_, MigrationStatus>(indoc! {r#"
        select current_setting('server_version_num') as server_version_num,
            (select id from codeintel_worker_migrations order by id desc limit 1) as id,
            (select id from codeintel_worker_migrations where breaking is true order by id desc limit 1) as biggest_breaking_id;
    "#})
    .fetch_one(pool)
    .await?;

    Ok(status)
}

/// Applies every migration of `migrations` newer than the last one recorded
/// in the database, each inside its own transaction.
///
/// Use [`FRONTEND_MIGRATIONS`] against the frontend database and
/// [`CODEINTEL_MIGRATIONS`] against the codeintel database.
pub async fn migrate(pool: &PgPool, migrations: &[Migration]) -> Result<(), MigrateError> {
    let status = migration_status(pool).await?;
    check_postgres_version(&status.server_version_num)?;

    let latest_migration = status.id.unwrap_or(0);
    let highest_migration = migrations.iter().map(Migration::id).max().unwrap_or(0);

    if let Some(latest_breaking_migration) = status.biggest_breaking_id {
        if highest_migration < latest_breaking_migration {
            return Err(MigrateError::IncompatibleRevision {
                latest_migration,
                latest_breaking_migration,
                highest_migration,
            });
        }
    }

    if highest_migration < latest_migration {
        warn!(
            latest_migration,
            highest_migration, "Database schema is newer than this worker. Attempting to continue regardless."
        );
    }

    let mut migrated = false;
    for migration in migrations.iter().filter(|m| m.id > latest_migration) {
        migrated = true;
        info!(
            migration_number = migration.id,
            migration_name = migration.name,
            is_breaking_migration = migration.is_breaking,
            "Running migration"
        );

        let mut tx = pool.begin().await?;
        migration.execute(&mut tx).await?;
        query("insert into codeintel_worker_migrations (id, name, breaking) values ($1, $2, $3)")
            .bind(migration.id)
            .bind(migration.name)
            .bind(migration.is_breaking)
            .execute(tx.as_mut())
            .await?;
        tx.commit().await?;
    }

    if migrated {
        info!("Migrations complete");
    }

    Ok(())
}

/// Returns the id of the last applied migration, if any.
pub async fn current_migration(pool: &PgPool) -> Result<Option<i32>, MigrateError> {
    let row = query("select max(id) as id from codeintel_worker_migrations")
        .fetch_one(pool)
        .await?;
    Ok(row.try_get("id")?)
}
