//! libSQL-backed document store for protocol and resource records.
//!
//! The [`Storage`] struct wraps a libSQL database holding loosely-typed JSON
//! documents in two collections, `protocols` and `resources`.
//!
//! **Access rules:**
//! - Catalog generation: read-only via [`Storage::open_readonly`]
//! - Record import: read-write via [`Storage::open`]

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use serde_json::Value;
use turnip_shared::{RawRecord, RecordOrder, Result, TurnipError};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// The two document collections of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Protocols,
    Resources,
}

impl Collection {
    fn table(self) -> &'static str {
        match self {
            Self::Protocols => "protocols",
            Self::Resources => "resources",
        }
    }
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| TurnipError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(TurnipError::storage)?;

        let conn = db.connect().map_err(TurnipError::storage)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TurnipError::Storage(format!(
                "no record store at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(TurnipError::storage)?;

        let conn = db.connect().map_err(TurnipError::storage)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        TurnipError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(TurnipError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// All protocol documents, in the requested order.
    pub async fn fetch_protocols(&self, order: RecordOrder) -> Result<Vec<RawRecord>> {
        self.fetch(Collection::Protocols, order).await
    }

    /// All resource documents, in the requested order.
    pub async fn fetch_resources(&self, order: RecordOrder) -> Result<Vec<RawRecord>> {
        self.fetch(Collection::Resources, order).await
    }

    /// Read every document of a collection.
    ///
    /// A body that is not valid JSON is returned as a JSON string so the
    /// normalizer reports it against its record instead of failing the query.
    /// Name order compares names case-insensitively, ties keep insertion
    /// order, and documents without a name sort last.
    pub async fn fetch(&self, collection: Collection, order: RecordOrder) -> Result<Vec<RawRecord>> {
        let sql = format!("SELECT seq, body FROM {} ORDER BY seq", collection.table());

        let mut rows = self
            .conn
            .query(&sql, params![])
            .await
            .map_err(TurnipError::storage)?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(TurnipError::storage)? {
            let seq: i64 = row.get(0).map_err(TurnipError::storage)?;
            let body: String = row.get(1).map_err(TurnipError::storage)?;
            let value = serde_json::from_str(&body).unwrap_or_else(|e| {
                tracing::warn!(seq, error = %e, "stored document is not valid JSON");
                Value::String(body)
            });
            records.push(RawRecord::new(seq.to_string(), value));
        }

        if order == RecordOrder::Name {
            records.sort_by_cached_key(|record| match stored_name(&record.body) {
                Some(name) => (false, name.to_lowercase()),
                None => (true, String::new()),
            });
        }

        tracing::debug!(
            collection = collection.table(),
            count = records.len(),
            "fetched documents"
        );
        Ok(records)
    }

    /// Protocol names in insertion order. Names are matched the way the
    /// normalizer matches them; documents without one are skipped.
    pub async fn protocol_names(&self) -> Result<Vec<String>> {
        let records = self.fetch(Collection::Protocols, RecordOrder::Insertion).await?;
        Ok(records.iter().filter_map(|r| stored_name(&r.body)).collect())
    }

    /// Number of stored protocol documents.
    pub async fn count_protocols(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM protocols", params![])
            .await
            .map_err(TurnipError::storage)?;

        match rows.next().await.map_err(TurnipError::storage)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(TurnipError::storage)? as u64),
            None => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Inserts
    // -----------------------------------------------------------------------

    /// Append a protocol document. Returns its store identifier.
    pub async fn insert_protocol(&self, doc: &Value) -> Result<String> {
        self.insert(Collection::Protocols, doc).await
    }

    /// Append a resource document. Returns its store identifier.
    pub async fn insert_resource(&self, doc: &Value) -> Result<String> {
        self.insert(Collection::Resources, doc).await
    }

    async fn insert(&self, collection: Collection, doc: &Value) -> Result<String> {
        self.check_writable()?;
        if !doc.is_object() {
            return Err(TurnipError::validation(format!(
                "{} documents must be JSON objects",
                collection.table()
            )));
        }

        let body = serde_json::to_string(doc)
            .map_err(|e| TurnipError::validation(format!("JSON serialization failed: {e}")))?;
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            "INSERT INTO {} (body, created_at) VALUES (?1, ?2)",
            collection.table()
        );

        self.conn
            .execute(&sql, params![body.as_str(), now.as_str()])
            .await
            .map_err(TurnipError::storage)?;

        Ok(self.conn.last_insert_rowid().to_string())
    }
}

/// The trimmed, non-empty `name` of a stored document. The key is matched
/// case-insensitively.
fn stored_name(body: &Value) -> Option<String> {
    let obj = body.as_object()?;
    let (_, value) = obj.iter().find(|(k, _)| k.eq_ignore_ascii_case("name"))?;
    let name = value.as_str()?.trim();
    (!name.is_empty()).then(|| name.to_string())
}
