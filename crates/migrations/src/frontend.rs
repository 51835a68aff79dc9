use indoc::indoc;

use crate::Migration;

/// Queue and metadata tables living in the frontend database.
pub const FRONTEND_MIGRATIONS: &[Migration] = &[
    Migration {
        id: 1,
        name: "create_lsif_uploads",
        is_breaking: false,
        stmts: &[
            indoc! {r#"
                create table lsif_uploads (
                    id bigserial primary key,
                    repository_id integer not null,
                    commit text not null,
                    root text not null default '',
                    indexer text not null,
                    content_type text not null default 'application/x-ndjson+lsif',
                    state text not null default 'queued',
                    upload_size bigint,
                    uncompressed_size bigint,
                    uploaded_at timestamptz not null default now(),
                    started_at timestamptz,
                    finished_at timestamptz,
                    process_after timestamptz,
                    num_resets integer not null default 0,
                    num_failures integer not null default 0,
                    failure_message text,
                    worker_hostname text,
                    last_heartbeat_at timestamptz,
                    cancel boolean not null default false,
                    committed_at timestamptz
                );
            "#},
            indoc! {r#"
                create index lsif_uploads_state_process_after
                    on lsif_uploads (state, process_after, uploaded_at, id);
            "#},
            indoc! {r#"
                create unique index lsif_uploads_repository_id_commit_root_indexer
                    on lsif_uploads (repository_id, commit, root, indexer)
                    where state = 'completed';
            "#},
        ],
    },
    Migration {
        id: 2,
        name: "create_package_tables",
        is_breaking: false,
        stmts: &[
            indoc! {r#"
                create table lsif_packages (
                    id serial primary key,
                    dump_id bigint not null references lsif_uploads (id) on delete cascade,
                    scheme text not null,
                    manager text not null default '',
                    name text not null,
                    version text
                );
            "#},
            indoc! {r#"
                create index lsif_packages_dump_id on lsif_packages (dump_id);
            "#},
            indoc! {r#"
                create table lsif_references (
                    id serial primary key,
                    dump_id bigint not null references lsif_uploads (id) on delete cascade,
                    scheme text not null,
                    manager text not null default '',
                    name text not null,
                    version text
                );
            "#},
            indoc! {r#"
                create index lsif_references_dump_id on lsif_references (dump_id);
            "#},
        ],
    },
    Migration {
        id: 3,
        name: "create_downstream_bookkeeping",
        is_breaking: false,
        stmts: &[
            indoc! {r#"
                create table lsif_dependency_syncing_jobs (
                    id serial primary key,
                    upload_id bigint not null references lsif_uploads (id) on delete cascade,
                    state text not null default 'queued',
                    queued_at timestamptz not null default now(),
                    started_at timestamptz,
                    finished_at timestamptz,
                    failure_message text
                );
            "#},
            indoc! {r#"
                create table lsif_dirty_repositories (
                    repository_id integer primary key,
                    dirty_token integer not null default 0,
                    update_token integer not null default 0,
                    updated_at timestamptz
                );
            "#},
            indoc! {r#"
                create table codeintel_commit_dates (
                    repository_id integer not null,
                    commit text not null,
                    committed_at timestamptz not null,
                    primary key (repository_id, commit)
                );
            "#},
        ],
    },
];
