//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Documents table schema.
#[derive(Iden)]
pub enum Documents {
    Table,
    #[iden = "collection"]
    Collection,
    #[iden = "id"]
    Id,
    #[iden = "version"]
    Version,
    #[iden = "update_time"]
    UpdateTime,
    #[iden = "data"]
    Data,
}

/// Store-wide counters.
#[derive(Iden)]
pub enum StoreMeta {
    Table,
    #[iden = "key"]
    Key,
    #[iden = "value"]
    Value,
}

/// Key of the commit version counter in `store_meta`.
pub const VERSION_KEY: &str = "version";

/// SQL for creating the documents table.
pub const CREATE_DOCUMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    version INTEGER NOT NULL,
    update_time TEXT NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (collection, id)
)
"#;

/// SQL for creating the counters table.
pub const CREATE_STORE_META_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL
)
"#;
