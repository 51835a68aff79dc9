use chrono::{DateTime, Utc};
use indoc::indoc;
use sqlx::{query, query_as};

use crate::errors::{StoreError, StoreResultExt};
use crate::store::DbHandle;
use crate::uploads::bundle::{Package, PackageReference};

/// Records the committer date of `commit` and copies it onto its uploads.
#[tracing::instrument(skip_all, err, fields(db.system="postgresql", repository_id = repository_id, commit = commit))]
pub async fn update_committed_at(
    db: &DbHandle,
    repository_id: i32,
    commit: &str,
    committed_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    db.execute(
        query(indoc! {r#"
            with inserted as (
                insert into codeintel_commit_dates (repository_id, commit, committed_at)
                    values ($1::integer, $2::text, $3::timestamptz)
                    on conflict do nothing
            )
            update lsif_uploads
                set committed_at = $3::timestamptz
                where repository_id = $1::integer
                    and commit = $2::text
                    and committed_at is null
        "#})
        .bind(repository_id)
        .bind(commit)
        .bind(committed_at),
    )
    .await
    .op("store.update_committed_at")?;

    Ok(())
}

/// Soft-deletes the completed uploads the new one replaces.
#[tracing::instrument(skip_all, err, fields(db.system="postgresql", repository_id = repository_id, commit = commit, root = root, indexer = indexer))]
pub async fn delete_overlapping_dumps(
    db: &DbHandle,
    repository_id: i32,
    commit: &str,
    root: &str,
    indexer: &str,
) -> Result<u64, StoreError> {
    let result = db
        .execute(
            query(indoc! {r#"
                update lsif_uploads
                    set state = 'deleting'
                    where repository_id = $1::integer
                        and commit = $2::text
                        and root = $3::text
                        and indexer = $4::text
                        and state = 'completed'
            "#})
            .bind(repository_id)
            .bind(commit)
            .bind(root)
            .bind(indexer),
        )
        .await
        .op("store.delete_overlapping_dumps")?;

    Ok(result.rows_affected())
}

struct PackageColumns {
    schemes: Vec<String>,
    managers: Vec<String>,
    names: Vec<String>,
    versions: Vec<String>,
}

impl<'a> FromIterator<&'a Package> for PackageColumns {
    fn from_iter<I: IntoIterator<Item = &'a Package>>(iter: I) -> Self {
        let mut columns = PackageColumns {
            schemes: Vec::new(),
            managers: Vec::new(),
            names: Vec::new(),
            versions: Vec::new(),
        };
        for package in iter {
            columns.schemes.push(package.scheme.clone());
            columns.managers.push(package.manager.clone());
            columns.names.push(package.name.clone());
            columns.versions.push(package.version.clone());
        }
        columns
    }
}

/// Replaces the packages provided by `upload_id`.
#[tracing::instrument(skip_all, err, fields(db.system="postgresql", upload_id = upload_id, count = packages.len()))]
pub async fn update_packages(
    db: &DbHandle,
    upload_id: i64,
    packages: &[Package],
) -> Result<(), StoreError> {
    const OP: &str = "store.update_packages";

    db.execute(query("delete from lsif_packages where dump_id = $1::bigint").bind(upload_id))
        .await
        .op(OP)?;

    if packages.is_empty() {
        return Ok(());
    }

    let columns: PackageColumns = packages.iter().collect();
    db.execute(
        query(indoc! {r#"
            insert into lsif_packages (dump_id, scheme, manager, name, version)
                select $1::bigint, scheme, manager, name, version
                from unnest($2::text[], $3::text[], $4::text[], $5::text[])
                    as t(scheme, manager, name, version)
        "#})
        .bind(upload_id)
        .bind(columns.schemes)
        .bind(columns.managers)
        .bind(columns.names)
        .bind(columns.versions),
    )
    .await
    .op(OP)?;

    Ok(())
}

/// Replaces the packages `upload_id` depends on.
#[tracing::instrument(skip_all, err, fields(db.system="postgresql", upload_id = upload_id, count = references.len()))]
pub async fn update_package_references(
    db: &DbHandle,
    upload_id: i64,
    references: &[PackageReference],
) -> Result<(), StoreError> {
    const OP: &str = "store.update_package_references";

    db.execute(query("delete from lsif_references where dump_id = $1::bigint").bind(upload_id))
        .await
        .op(OP)?;

    if references.is_empty() {
        return Ok(());
    }

    let columns: PackageColumns = references.iter().map(|r| &r.package).collect();
    db.execute(
        query(indoc! {r#"
            insert into lsif_references (dump_id, scheme, manager, name, version)
                select $1::bigint, scheme, manager, name, version
                from unnest($2::text[], $3::text[], $4::text[], $5::text[])
                    as t(scheme, manager, name, version)
        "#})
        .bind(upload_id)
        .bind(columns.schemes)
        .bind(columns.managers)
        .bind(columns.names)
        .bind(columns.versions),
    )
    .await
    .op(OP)?;

    Ok(())
}

#[tracing::instrument(skip_all, err, fields(db.system="postgresql", upload_id = upload_id))]
pub async fn insert_dependency_syncing_job(
    db: &DbHandle,
    upload_id: i64,
) -> Result<i64, StoreError> {
    let (id,) = db
        .fetch_one(
            query_as::<_, (i64,)>(indoc! {r#"
                insert into lsif_dependency_syncing_jobs (upload_id)
                    values ($1::bigint)
                    returning id::bigint
            "#})
            .bind(upload_id),
        )
        .await
        .op("store.insert_dependency_syncing_job")?;

    Ok(id)
}

/// Bumps the dirty token of the repository so its commit graph is recomputed.
#[tracing::instrument(skip_all, err, fields(db.system="postgresql", repository_id = repository_id))]
pub async fn set_repository_as_dirty(db: &DbHandle, repository_id: i32) -> Result<(), StoreError> {
    db.execute(
        query(indoc! {r#"
            insert into lsif_dirty_repositories (repository_id, dirty_token, update_token)
                values ($1::integer, 1, 0)
                on conflict (repository_id) do update
                    set dirty_token = lsif_dirty_repositories.dirty_token + 1
        "#})
        .bind(repository_id),
    )
    .await
    .op("store.set_repository_as_dirty")?;

    Ok(())
}
