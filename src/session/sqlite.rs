// ABOUTME: SQLite session: path validation, PRAGMA-based catalog, interruptible scans
// ABOUTME: Inserts go through the prepared statement cache of the connection

use super::{quote_with, ColumnMeta, RowSink, ScanOutcome, Session, TableName};
use crate::dump::types::canonicalize_sqlite;
use crate::dump::{TypeKind, Value};
use anyhow::{bail, Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Validate a SQLite file path
///
/// Accepts `sqlite://path`, `sqlite:path` or a bare path. The file must
/// exist and carry a `.db`, `.sqlite` or `.sqlite3` extension.
pub fn validate_sqlite_path(path: &str) -> Result<PathBuf> {
    let path = path
        .strip_prefix("sqlite://")
        .or_else(|| path.strip_prefix("sqlite:"))
        .unwrap_or(path);
    if path.is_empty() {
        bail!("SQLite file path cannot be empty");
    }

    let canonical = PathBuf::from(path).canonicalize().with_context(|| {
        format!(
            "Failed to resolve SQLite file path '{}'. \
             File may not exist or may not be readable.",
            path
        )
    })?;
    if !canonical.is_file() {
        bail!("Path '{}' is not a regular file (may be a directory)", path);
    }

    let ext = canonical
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    if !["db", "sqlite", "sqlite3"].contains(&ext) {
        bail!(
            "Invalid SQLite file '{}'. Must end in .db, .sqlite, or .sqlite3",
            path
        );
    }

    tracing::debug!("Validated SQLite path: {}", canonical.display());
    Ok(canonical)
}

fn value_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn bind_value(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as V;
    match value {
        Value::Null => V::Null,
        Value::Int(v) => V::Integer(i64::from(*v)),
        Value::Long(v) => V::Integer(*v),
        Value::Double(v) => V::Real(*v),
        Value::Decimal(s)
        | Value::Text(s)
        | Value::Date(s)
        | Value::Time(s)
        | Value::Timestamp(s) => V::Text(s.clone()),
    }
}

pub struct SqliteSession {
    conn: Connection,
    insert_sql: Option<String>,
}

impl SqliteSession {
    /// Open an existing SQLite file for reading and writing
    pub fn open(path: &str) -> Result<Self> {
        let canonical = validate_sqlite_path(path)?;
        tracing::info!("Opening SQLite database: {}", canonical.display());

        let conn = Connection::open_with_flags(
            &canonical,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open SQLite database: {}", canonical.display()))?;

        let _version: String = conn
            .query_row("SELECT sqlite_version()", [], |row| row.get(0))
            .context("Failed to query SQLite version (database may be corrupted)")?;

        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            insert_sql: None,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn scan_rows(
        &self,
        sql: &str,
        cancel: &CancellationToken,
        on_row: &mut RowSink<'_>,
    ) -> Result<ScanOutcome> {
        let mut outcome = ScanOutcome::default();
        let mut stmt = self
            .conn
            .prepare(sql)
            .with_context(|| format!("Failed to prepare query: {}", sql))?;
        let width = stmt.column_count();
        let mut rows = stmt.query([]).context("Failed to run query")?;

        loop {
            let row = match rows.next() {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(_) if cancel.is_cancelled() => {
                    outcome.cancelled = true;
                    break;
                }
                Err(e) => return Err(e).context("Failed to fetch row"),
            };
            let cells = (0..width)
                .map(|i| row.get_ref(i).map(value_text))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            on_row(cells)?;
            outcome.rows += 1;
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
        }
        Ok(outcome)
    }
}

impl Session for SqliteSession {
    fn vendor(&self) -> &'static str {
        "SQLite"
    }

    async fn database_info(&mut self) -> Result<String> {
        Ok(format!("SQLite {}", rusqlite::version()))
    }

    async fn list_tables(&mut self) -> Result<Vec<TableName>> {
        tracing::debug!("Listing tables from SQLite database");
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type='table' \
                 AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name",
            )
            .context("Failed to prepare statement to list tables")?;

        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to query table list")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to collect table names")?;

        Ok(tables.into_iter().map(TableName::new).collect())
    }

    async fn table_columns(&mut self, table: &TableName) -> Result<Vec<ColumnMeta>> {
        let sql = format!("PRAGMA table_info({})", self.qualified(table));
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("Failed to read columns of '{}'", table))?;
        let columns = stmt
            .query_map([], |row| {
                let type_name: String = row.get(2)?;
                Ok(ColumnMeta {
                    name: row.get(1)?,
                    sql_type: type_name.clone(),
                    type_name,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    async fn foreign_keys(&mut self, table: &TableName) -> Result<Vec<TableName>> {
        let sql = format!("PRAGMA foreign_key_list({})", self.qualified(table));
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("Failed to read foreign keys of '{}'", table))?;
        let mut targets: Vec<TableName> = Vec::new();
        for target in stmt.query_map([], |row| row.get::<_, String>(2))? {
            let target = TableName::new(target?);
            if !targets.iter().any(|t| t.same_table(&target)) {
                targets.push(target);
            }
        }
        Ok(targets)
    }

    async fn count_rows(&mut self, sql: &str) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(sql, [], |row| row.get(0))
            .with_context(|| format!("Failed to count rows: {}", sql))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn describe_query(&mut self, sql: &str) -> Result<Vec<ColumnMeta>> {
        let stmt = self
            .conn
            .prepare(sql)
            .with_context(|| format!("Failed to prepare query: {}", sql))?;
        Ok(stmt
            .columns()
            .iter()
            .map(|c| {
                let decl = c.decl_type().unwrap_or("").to_string();
                ColumnMeta {
                    name: c.name().to_string(),
                    type_name: decl.clone(),
                    sql_type: decl,
                }
            })
            .collect())
    }

    async fn scan(
        &mut self,
        sql: &str,
        cancel: &CancellationToken,
        on_row: &mut RowSink<'_>,
    ) -> Result<ScanOutcome> {
        // the scan runs synchronously; a watcher interrupts it from another worker
        let handle = self.conn.get_interrupt_handle();
        let token = cancel.clone();
        let watcher = tokio::spawn(async move {
            token.cancelled().await;
            handle.interrupt();
        });

        let result = self.scan_rows(sql, cancel, on_row);
        watcher.abort();
        result
    }

    async fn begin(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN").context("BEGIN failed")
    }

    async fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT").context("COMMIT failed")
    }

    async fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK").context("ROLLBACK failed")
    }

    async fn prepare_insert(&mut self, table: &TableName, columns: &[String]) -> Result<()> {
        let names: Vec<String> = columns.iter().map(|c| self.quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.qualified(table),
            names.join(", "),
            placeholders.join(", ")
        );
        self.conn
            .prepare_cached(&sql)
            .with_context(|| format!("Failed to prepare insert into '{}'", table))?;
        tracing::debug!("Prepared insert: {}", sql);
        self.insert_sql = Some(sql);
        Ok(())
    }

    async fn insert_row(&mut self, row: &[Value]) -> Result<()> {
        let sql = self
            .insert_sql
            .as_deref()
            .context("insert_row called before prepare_insert")?;
        let mut stmt = self.conn.prepare_cached(sql)?;
        stmt.execute(params_from_iter(row.iter().map(bind_value)))?;
        Ok(())
    }

    async fn release_insert(&mut self) -> Result<()> {
        self.insert_sql = None;
        self.conn.flush_prepared_statement_cache();
        Ok(())
    }

    fn quote_ident(&self, ident: &str) -> String {
        quote_with(ident, '"')
    }

    fn column_kind(&self, type_name: &str) -> TypeKind {
        canonicalize_sqlite(type_name)
    }
}
