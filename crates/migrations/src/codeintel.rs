use indoc::indoc;

use crate::Migration;

/// Content tables living in the codeintel database.
///
/// Every primary key starts with `dump_id`: writing the same upload twice
/// raises a unique violation instead of duplicating rows.
pub const CODEINTEL_MIGRATIONS: &[Migration] = &[Migration {
    id: 1,
    name: "create_lsif_data_tables",
    is_breaking: false,
    stmts: &[
        indoc! {r#"
            create table lsif_data_metadata (
                dump_id bigint primary key,
                num_result_chunks integer not null
            );
        "#},
        indoc! {r#"
            create table lsif_data_documents (
                dump_id bigint not null,
                path text not null,
                data jsonb not null,
                primary key (dump_id, path)
            );
        "#},
        indoc! {r#"
            create table lsif_data_result_chunks (
                dump_id bigint not null,
                idx integer not null,
                data jsonb not null,
                primary key (dump_id, idx)
            );
        "#},
        indoc! {r#"
            create table lsif_data_definitions (
                dump_id bigint not null,
                scheme text not null,
                identifier text not null,
                data jsonb not null,
                primary key (dump_id, scheme, identifier)
            );
        "#},
        indoc! {r#"
            create table lsif_data_references (
                dump_id bigint not null,
                scheme text not null,
                identifier text not null,
                data jsonb not null,
                primary key (dump_id, scheme, identifier)
            );
        "#},
        indoc! {r#"
            create table lsif_data_implementations (
                dump_id bigint not null,
                scheme text not null,
                identifier text not null,
                data jsonb not null,
                primary key (dump_id, scheme, identifier)
            );
        "#},
    ],
}];
