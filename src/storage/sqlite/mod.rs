//! SQLite DocumentStore implementation.
//!
//! All documents share one table keyed by `(collection, id)` with the body
//! stored as JSON text. The commit version counter lives in `store_meta`
//! and is advanced inside the same transaction as the writes.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tokio::sync::broadcast;
use tracing::debug;

use crate::storage::helpers::{
    apply_batch, touched_collections, touched_paths, validate_batch, LoadedDocuments, StagedWrite,
};
use crate::storage::schema::{
    Documents, StoreMeta, CREATE_DOCUMENTS_TABLE, CREATE_STORE_META_TABLE, VERSION_KEY,
};
use crate::storage::{
    format_store_time, ChangeNotice, CollectionPath, CommitResult, DocPath, Document,
    DocumentStore, Result, WriteBatch, CHANGE_CHANNEL_CAPACITY,
};

/// Path value that selects a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// SQLite implementation of DocumentStore.
pub struct SqliteDocumentStore {
    pool: SqlitePool,
    changes: broadcast::Sender<ChangeNotice>,
}

impl SqliteDocumentStore {
    /// Create a new SQLite document store over an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { pool, changes }
    }

    /// Open (creating if needed) the database file at `path`.
    ///
    /// `:memory:` opens a private in-memory database on a single
    /// connection, since each SQLite connection would otherwise see its own
    /// empty database.
    pub async fn open(path: &str) -> Result<Self> {
        let pool = if path == IN_MEMORY {
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    crate::storage::StorageError::Unavailable(format!(
                        "cannot create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
            SqlitePool::connect(&format!("sqlite:{}?mode=rwc", path)).await?
        };
        Ok(Self::new(pool))
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_DOCUMENTS_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_STORE_META_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn decode_row(collection: &CollectionPath, row: &SqliteRow) -> Result<Document> {
        let id: String = row.get("id");
        let version: i64 = row.get("version");
        let update_time: String = row.get("update_time");
        let data: String = row.get("data");

        let data: Map<String, Value> = serde_json::from_str(&data)?;
        let update_time = DateTime::parse_from_rfc3339(&update_time)?.with_timezone(&Utc);

        Ok(Document {
            path: collection.doc(id),
            version: version as u64,
            update_time,
            data,
        })
    }

    async fn load(conn: &mut SqliteConnection, path: &DocPath) -> Result<Option<Document>> {
        let query = Query::select()
            .columns([
                Documents::Id,
                Documents::Version,
                Documents::UpdateTime,
                Documents::Data,
            ])
            .from(Documents::Table)
            .and_where(Expr::col(Documents::Collection).eq(path.collection.as_str()))
            .and_where(Expr::col(Documents::Id).eq(path.id.as_str()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
        row.map(|row| Self::decode_row(&path.collection, &row))
            .transpose()
    }

    async fn current_version(conn: &mut SqliteConnection) -> Result<u64> {
        let query = Query::select()
            .column(StoreMeta::Value)
            .from(StoreMeta::Table)
            .and_where(Expr::col(StoreMeta::Key).eq(VERSION_KEY))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
        Ok(row.map(|row| row.get::<i64, _>(0) as u64).unwrap_or(0))
    }

    async fn store_version(conn: &mut SqliteConnection, version: u64) -> Result<()> {
        let query = Query::insert()
            .into_table(StoreMeta::Table)
            .columns([StoreMeta::Key, StoreMeta::Value])
            .values_panic([VERSION_KEY.into(), (version as i64).into()])
            .on_conflict(
                OnConflict::column(StoreMeta::Key)
                    .update_column(StoreMeta::Value)
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(())
    }

    async fn persist(conn: &mut SqliteConnection, write: &StagedWrite) -> Result<()> {
        let (path, doc) = write;
        let query = match doc {
            Some(doc) => Query::insert()
                .into_table(Documents::Table)
                .columns([
                    Documents::Collection,
                    Documents::Id,
                    Documents::Version,
                    Documents::UpdateTime,
                    Documents::Data,
                ])
                .values_panic([
                    path.collection.as_str().into(),
                    path.id.as_str().into(),
                    (doc.version as i64).into(),
                    format_store_time(doc.update_time).into(),
                    serde_json::to_string(&doc.data)?.into(),
                ])
                .on_conflict(
                    OnConflict::columns([Documents::Collection, Documents::Id])
                        .update_columns([
                            Documents::Version,
                            Documents::UpdateTime,
                            Documents::Data,
                        ])
                        .to_owned(),
                )
                .to_string(SqliteQueryBuilder),
            None => Query::delete()
                .from_table(Documents::Table)
                .and_where(Expr::col(Documents::Collection).eq(path.collection.as_str()))
                .and_where(Expr::col(Documents::Id).eq(path.id.as_str()))
                .to_string(SqliteQueryBuilder),
        };

        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(())
    }

    /// Apply a batch within an already-started transaction.
    async fn apply(
        conn: &mut SqliteConnection,
        batch: &WriteBatch,
    ) -> Result<(CommitResult, Vec<CollectionPath>)> {
        let mut loaded = LoadedDocuments::new();
        for path in touched_paths(batch) {
            let doc = Self::load(conn, &path).await?;
            loaded.insert(path, doc);
        }

        let version = Self::current_version(conn).await? + 1;
        let commit_time = Utc::now();
        let writes = apply_batch(batch, loaded, version, commit_time)?;

        for write in &writes {
            Self::persist(conn, write).await?;
        }
        Self::store_version(conn, version).await?;

        let result = CommitResult {
            version,
            commit_time,
            writes: writes.len(),
        };
        Ok((result, touched_collections(&writes)))
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>> {
        let mut conn = self.pool.acquire().await?;
        Self::load(&mut conn, path).await
    }

    async fn list(&self, collection: &CollectionPath) -> Result<Vec<Document>> {
        let query = Query::select()
            .columns([
                Documents::Id,
                Documents::Version,
                Documents::UpdateTime,
                Documents::Data,
            ])
            .from(Documents::Table)
            .and_where(Expr::col(Documents::Collection).eq(collection.as_str()))
            .order_by(Documents::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            docs.push(Self::decode_row(collection, &row)?);
        }
        Ok(docs)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitResult> {
        validate_batch(&batch)?;

        // BEGIN IMMEDIATE takes the write lock up front so version reads and
        // precondition checks cannot interleave with another writer.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        match Self::apply(&mut conn, &batch).await {
            Ok((result, collections)) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                debug!(version = result.version, writes = result.writes, "Batch committed");
                for collection in collections {
                    let _ = self.changes.send(ChangeNotice {
                        collection,
                        version: result.version,
                    });
                }
                Ok(result)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    fn changes(&self) -> broadcast::Receiver<ChangeNotice> {
        self.changes.subscribe()
    }
}
