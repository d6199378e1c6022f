// ABOUTME: Database session abstraction used by the dump engine
// ABOUTME: Catalog lookups, streaming scans with cancellation, and transactional inserts

pub mod mysql;
pub mod postgres;
pub mod sqlite;

use crate::dump::{canonicalize, TypeKind, Value};
use anyhow::{bail, Result};
use std::fmt;
use tokio_util::sync::CancellationToken;

/// A table reference as typed by the user or returned by a catalog.
///
/// `schema.table` is split at the first dot. A name given in double quotes
/// is case-sensitive and is never corrected against the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
    pub case_sensitive: bool,
}

fn strip_quotes(part: &str) -> (String, bool) {
    let part = part.trim();
    if part.len() >= 2 && part.starts_with('"') && part.ends_with('"') {
        (part[1..part.len() - 1].replace("\"\"", "\""), true)
    } else {
        (part.to_string(), false)
    }
}

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            case_sensitive: false,
        }
    }

    pub fn with_schema(schema: Option<String>, name: impl Into<String>) -> Self {
        Self {
            schema,
            name: name.into(),
            case_sensitive: false,
        }
    }

    /// Parse a table reference as typed on the command line
    ///
    /// # Examples
    ///
    /// ```
    /// # use tabledump::session::TableName;
    /// let t = TableName::parse("sales.orders");
    /// assert_eq!(t.schema.as_deref(), Some("sales"));
    /// assert_eq!(t.name, "orders");
    /// assert!(!t.case_sensitive);
    ///
    /// let t = TableName::parse("\"MixedCase\"");
    /// assert_eq!(t.name, "MixedCase");
    /// assert!(t.case_sensitive);
    /// ```
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let case_sensitive = raw.starts_with('"');
        let split = if case_sensitive {
            raw.find("\".").map(|i| i + 1)
        } else {
            raw.find('.').filter(|i| *i > 0)
        };
        let (schema, name) = match split {
            Some(dot) => (Some(strip_quotes(&raw[..dot]).0), strip_quotes(&raw[dot + 1..])),
            None => (None, strip_quotes(raw)),
        };
        Self {
            schema,
            name: name.0,
            case_sensitive: case_sensitive || name.1,
        }
    }

    /// Whether both names denote the same catalog table
    pub fn same_table(&self, other: &TableName) -> bool {
        let eq = |a: &str, b: &str| {
            if self.case_sensitive || other.case_sensitive {
                a == b
            } else {
                a.eq_ignore_ascii_case(b)
            }
        };
        let schema_eq = match (&self.schema, &other.schema) {
            (None, None) => true,
            (Some(a), Some(b)) => eq(a, b),
            _ => false,
        };
        schema_eq && eq(&self.name, &other.name)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Column as reported by a catalog or a query description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    /// Vendor type name fed to the type canonicalizer
    pub type_name: String,
    /// Type expression usable in SQL against this database
    pub sql_type: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    pub rows: u64,
    pub cancelled: bool,
}

/// Callback receiving each scanned row in the driver's textual form.
pub type RowSink<'a> = dyn FnMut(Vec<Option<String>>) -> Result<()> + 'a;

/// Operations the dump engine needs from a database connection.
///
/// Implementations exist for PostgreSQL, MySQL and SQLite. The engine is
/// generic over this trait, so nothing here needs to be object safe.
#[allow(async_fn_in_trait)]
pub trait Session {
    /// Short vendor name used in log lines
    fn vendor(&self) -> &'static str;

    /// Product and version of the connected server
    async fn database_info(&mut self) -> Result<String>;

    async fn list_tables(&mut self) -> Result<Vec<TableName>>;

    /// Columns of `table` in ordinal order; empty if the table does not exist
    async fn table_columns(&mut self, table: &TableName) -> Result<Vec<ColumnMeta>>;

    /// Tables referenced by foreign keys of `table`
    async fn foreign_keys(&mut self, table: &TableName) -> Result<Vec<TableName>>;

    /// Run a `SELECT count(*)`-style statement
    async fn count_rows(&mut self, sql: &str) -> Result<u64>;

    /// Result columns of a query without running it
    async fn describe_query(&mut self, sql: &str) -> Result<Vec<ColumnMeta>>;

    /// Stream the rows of `sql` into `on_row`.
    ///
    /// Stops early when `cancel` fires; the running statement is cancelled
    /// on the server so a blocked read returns promptly.
    async fn scan(
        &mut self,
        sql: &str,
        cancel: &CancellationToken,
        on_row: &mut RowSink<'_>,
    ) -> Result<ScanOutcome>;

    async fn begin(&mut self) -> Result<()>;
    async fn commit(&mut self) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;

    /// Prepare the parameterized insert used by `insert_row`
    async fn prepare_insert(&mut self, table: &TableName, columns: &[String]) -> Result<()>;

    /// Insert one row; a failure affects only this row
    async fn insert_row(&mut self, row: &[Value]) -> Result<()>;

    /// Drop the statement prepared by `prepare_insert`
    async fn release_insert(&mut self) -> Result<()>;

    fn quote_ident(&self, ident: &str) -> String;

    /// Dump kind for a type name reported by `table_columns` or `describe_query`
    fn column_kind(&self, type_name: &str) -> TypeKind {
        canonicalize(type_name)
    }

    /// Schema-qualified, quoted name for use in SQL
    fn qualified(&self, table: &TableName) -> String {
        match &table.schema {
            Some(schema) => format!("{}.{}", self.quote_ident(schema), self.quote_ident(&table.name)),
            None => self.quote_ident(&table.name),
        }
    }
}

/// Quote an identifier with `quote`, doubling embedded quote characters
pub(crate) fn quote_with(ident: &str, quote: char) -> String {
    let doubled = format!("{quote}{quote}");
    format!("{quote}{}{quote}", ident.replace(quote, &doubled))
}

/// Database kinds selectable by connection URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Postgres,
    Mysql,
    Sqlite,
}

impl DatabaseKind {
    /// Detect the database from a connection URL or SQLite file path
    pub fn detect(url: &str) -> Result<Self> {
        let lower = url.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Ok(DatabaseKind::Postgres)
        } else if lower.starts_with("mysql://") {
            Ok(DatabaseKind::Mysql)
        } else if lower.starts_with("sqlite:")
            || lower.ends_with(".db")
            || lower.ends_with(".sqlite")
            || lower.ends_with(".sqlite3")
        {
            Ok(DatabaseKind::Sqlite)
        } else {
            bail!(
                "Unsupported connection '{}'. Expected postgresql://, mysql://, sqlite:// \
                 or a path to a .db/.sqlite/.sqlite3 file",
                crate::utils::sanitize_identifier(url)
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_qualified_names() {
        let t = TableName::parse("orders");
        assert_eq!(t.schema, None);
        assert_eq!(t.name, "orders");

        let t = TableName::parse("sales.orders.archive");
        assert_eq!(t.schema.as_deref(), Some("sales"));
        assert_eq!(t.name, "orders.archive");

        let t = TableName::parse(".hidden");
        assert_eq!(t.schema, None);
        assert_eq!(t.name, ".hidden");
    }

    #[test]
    fn test_parse_quoted_names_are_case_sensitive() {
        let t = TableName::parse("\"Sales\".\"Orders\"");
        assert_eq!(t.schema.as_deref(), Some("Sales"));
        assert_eq!(t.name, "Orders");
        assert!(t.case_sensitive);

        let t = TableName::parse("\"Has.Dot\"");
        assert_eq!(t.schema, None);
        assert_eq!(t.name, "Has.Dot");
    }

    #[test]
    fn test_same_table_respects_case_sensitivity() {
        let plain = TableName::parse("ORDERS");
        assert!(plain.same_table(&TableName::new("orders")));
        let quoted = TableName::parse("\"ORDERS\"");
        assert!(!quoted.same_table(&TableName::new("orders")));
        assert!(!plain.same_table(&TableName::parse("sales.orders")));
    }

    #[test]
    fn test_quote_with_doubles_quote_char() {
        assert_eq!(quote_with("a\"b", '"'), "\"a\"\"b\"");
        assert_eq!(quote_with("weird`name", '`'), "`weird``name`");
    }

    #[test]
    fn test_detect_database_kind() {
        assert_eq!(
            DatabaseKind::detect("postgresql://u@h/db").unwrap(),
            DatabaseKind::Postgres
        );
        assert_eq!(
            DatabaseKind::detect("mysql://u@h/db").unwrap(),
            DatabaseKind::Mysql
        );
        assert_eq!(
            DatabaseKind::detect("sqlite:///tmp/x.db").unwrap(),
            DatabaseKind::Sqlite
        );
        assert_eq!(
            DatabaseKind::detect("/tmp/data.sqlite3").unwrap(),
            DatabaseKind::Sqlite
        );
        assert!(DatabaseKind::detect("mongodb://h/db").is_err());
    }
}
